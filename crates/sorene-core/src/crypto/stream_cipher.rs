//! AES-256-GCM 流式加密
//!
//! 线格式：
//!
//! ```text
//! nonce(12) | header(4) ciphertext||tag | header(4) ciphertext||tag | ...
//! ```
//!
//! - header: 大端 u32，最高位为最后一块标志，低 31 位为密文长度（含 16 字节 tag）
//! - header 作为 AEAD 关联数据参与认证
//! - 第 i 块 nonce = 基础 nonce 的后 8 字节 XOR i (大端)
//!
//! 每块在 tag 校验通过后才交给调用方，因此未经认证的字节永远不会到达文件写入端。
//! 缺少最后一块即视为截断。

use super::key_exchange::SharedKey;
use crate::error::{Result, TransferError};
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use rand::rngs::OsRng;
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
/// 单块明文最大长度
pub const CHUNK_SIZE: usize = 64 * 1024;

const FINAL_FLAG: u32 = 0x8000_0000;
const MAX_SEALED_LEN: usize = CHUNK_SIZE + TAG_LEN;

/// 绑定到单个会话、单个方向的加密器
///
/// `encrypting_writer` / `decrypting_reader` 消耗自身，
/// 同一密钥下不会出现两个随机 nonce 流。
pub struct StreamCipher {
    cipher: Aes256Gcm,
}

impl StreamCipher {
    pub fn new(key: &SharedKey) -> Self {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
        Self { cipher }
    }

    /// 写入随机 nonce 并返回加密写入器
    pub async fn encrypting_writer<W>(self, mut inner: W) -> Result<EncryptingWriter<W>>
    where
        W: AsyncWrite + Unpin,
    {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        inner.write_all(&nonce).await?;

        Ok(EncryptingWriter {
            inner,
            cipher: self.cipher,
            base_nonce: nonce,
            counter: 0,
            pending: Vec::with_capacity(CHUNK_SIZE + TAG_LEN),
        })
    }

    /// 读取 nonce 并返回解密读取器
    pub async fn decrypting_reader<R>(self, mut inner: R) -> Result<DecryptingReader<R>>
    where
        R: AsyncRead + Unpin,
    {
        let mut nonce = [0u8; NONCE_LEN];
        inner.read_exact(&mut nonce).await.map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                TransferError::Crypto("stream ended before the nonce".into())
            } else {
                TransferError::Io(e)
            }
        })?;

        Ok(DecryptingReader {
            inner,
            cipher: self.cipher,
            base_nonce: nonce,
            counter: 0,
            plain: Vec::with_capacity(MAX_SEALED_LEN),
            pos: 0,
            finished: false,
        })
    }
}

fn chunk_nonce(base: &[u8; NONCE_LEN], counter: u64) -> [u8; NONCE_LEN] {
    let mut nonce = *base;
    for (b, c) in nonce[4..].iter_mut().zip(counter.to_be_bytes()) {
        *b ^= c;
    }
    nonce
}

fn chunk_header(sealed_len: usize, last: bool) -> [u8; 4] {
    // sealed_len <= MAX_SEALED_LEN，远小于 2^31
    let mut value = sealed_len as u32;
    if last {
        value |= FINAL_FLAG;
    }
    value.to_be_bytes()
}

/// 加密写入器
pub struct EncryptingWriter<W> {
    inner: W,
    cipher: Aes256Gcm,
    base_nonce: [u8; NONCE_LEN],
    counter: u64,
    pending: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> EncryptingWriter<W> {
    /// 写入明文；凑满一块即加密发送
    pub async fn write_all(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let n = (CHUNK_SIZE - self.pending.len()).min(data.len());
            self.pending.extend_from_slice(&data[..n]);
            data = &data[n..];
            if self.pending.len() == CHUNK_SIZE {
                self.seal(false).await?;
            }
        }
        Ok(())
    }

    /// 发送缓冲中的不完整块
    pub async fn flush(&mut self) -> Result<()> {
        if !self.pending.is_empty() {
            self.seal(false).await?;
        }
        self.inner.flush().await?;
        Ok(())
    }

    /// 写出最后一块（可为空）并返回底层流
    ///
    /// 只有调用了 `finish` 的流才能被对端完整解密。
    pub async fn finish(mut self) -> Result<W> {
        self.seal(true).await?;
        self.inner.flush().await?;
        Ok(self.inner)
    }

    async fn seal(&mut self, last: bool) -> Result<()> {
        let nonce = chunk_nonce(&self.base_nonce, self.counter);
        self.counter = self
            .counter
            .checked_add(1)
            .ok_or_else(|| TransferError::Crypto("chunk counter exhausted".into()))?;

        let header = chunk_header(self.pending.len() + TAG_LEN, last);
        self.cipher
            .encrypt_in_place(Nonce::from_slice(&nonce), &header, &mut self.pending)
            .map_err(|_| TransferError::Crypto("encryption failed".into()))?;

        self.inner.write_all(&header).await?;
        self.inner.write_all(&self.pending).await?;
        self.pending.clear();
        Ok(())
    }
}

/// 解密读取器
pub struct DecryptingReader<R> {
    inner: R,
    cipher: Aes256Gcm,
    base_nonce: [u8; NONCE_LEN],
    counter: u64,
    plain: Vec<u8>,
    pos: usize,
    finished: bool,
}

impl<R: AsyncRead + Unpin> DecryptingReader<R> {
    /// 读取已认证的明文，返回 0 表示流正常结束
    pub async fn read(&mut self, out: &mut [u8]) -> Result<usize> {
        while self.pos == self.plain.len() {
            if self.finished {
                return Ok(0);
            }
            self.open_next().await?;
        }
        let n = (self.plain.len() - self.pos).min(out.len());
        out[..n].copy_from_slice(&self.plain[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    /// 已认证但尚未读出的明文字节数；为 0 时下一次读取会等待网络
    pub fn buffered(&self) -> usize {
        self.plain.len() - self.pos
    }

    async fn open_next(&mut self) -> Result<()> {
        let mut header = [0u8; 4];
        read_exact_or_truncated(&mut self.inner, &mut header).await?;
        let value = u32::from_be_bytes(header);
        let last = value & FINAL_FLAG != 0;
        let sealed_len = (value & !FINAL_FLAG) as usize;
        if !(TAG_LEN..=MAX_SEALED_LEN).contains(&sealed_len) {
            return Err(TransferError::Crypto(format!(
                "invalid chunk length {sealed_len}"
            )));
        }

        self.plain.resize(sealed_len, 0);
        self.pos = 0;
        read_exact_or_truncated(&mut self.inner, &mut self.plain).await?;

        let nonce = chunk_nonce(&self.base_nonce, self.counter);
        self.counter = self
            .counter
            .checked_add(1)
            .ok_or_else(|| TransferError::Crypto("chunk counter exhausted".into()))?;
        if self
            .cipher
            .decrypt_in_place(Nonce::from_slice(&nonce), &header, &mut self.plain)
            .is_err()
        {
            self.plain.clear();
            return Err(TransferError::Crypto("authentication failed".into()));
        }

        if last {
            let mut extra = [0u8; 1];
            if self.inner.read(&mut extra).await? != 0 {
                self.plain.clear();
                return Err(TransferError::Crypto(
                    "unexpected data after final chunk".into(),
                ));
            }
            self.finished = true;
        }
        Ok(())
    }
}

async fn read_exact_or_truncated<R: AsyncRead + Unpin>(inner: &mut R, buf: &mut [u8]) -> Result<()> {
    match inner.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
            Err(TransferError::Crypto("stream truncated".into()))
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SharedKey {
        SharedKey::from_bytes([0x42; 32])
    }

    async fn seal(plaintext: &[u8]) -> Vec<u8> {
        let mut writer = StreamCipher::new(&key())
            .encrypting_writer(Vec::new())
            .await
            .unwrap();
        writer.write_all(plaintext).await.unwrap();
        writer.finish().await.unwrap()
    }

    async fn open(ciphertext: &[u8]) -> Result<Vec<u8>> {
        let mut reader = StreamCipher::new(&key())
            .decrypting_reader(ciphertext)
            .await?;
        let mut out = Vec::new();
        let mut buf = [0u8; 1000];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    #[tokio::test]
    async fn test_roundtrip_multi_chunk() {
        let plaintext: Vec<u8> = (0..CHUNK_SIZE * 2 + 1234).map(|i| (i % 251) as u8).collect();
        let sealed = seal(&plaintext).await;
        // nonce + 3 块，每块 header + tag
        assert_eq!(sealed.len(), NONCE_LEN + plaintext.len() + 3 * (4 + TAG_LEN));
        assert_eq!(open(&sealed).await.unwrap(), plaintext);
    }

    #[tokio::test]
    async fn test_buffered_counts_unread_plaintext() {
        let sealed = seal(b"0123456789").await;
        let mut reader = StreamCipher::new(&key())
            .decrypting_reader(sealed.as_slice())
            .await
            .unwrap();
        assert_eq!(reader.buffered(), 0);

        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 4);
        assert_eq!(reader.buffered(), 6);
        let mut rest = [0u8; 16];
        assert_eq!(reader.read(&mut rest).await.unwrap(), 6);
        assert_eq!(reader.buffered(), 0);
    }

    #[tokio::test]
    async fn test_roundtrip_empty() {
        let sealed = seal(b"").await;
        assert_eq!(sealed.len(), NONCE_LEN + 4 + TAG_LEN);
        assert!(open(&sealed).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_flush_emits_partial_chunk() {
        let mut writer = StreamCipher::new(&key())
            .encrypting_writer(Vec::new())
            .await
            .unwrap();
        writer.write_all(b"hello ").await.unwrap();
        writer.flush().await.unwrap();
        writer.write_all(b"world").await.unwrap();
        let sealed = writer.finish().await.unwrap();
        assert_eq!(open(&sealed).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_every_single_byte_flip_is_detected() {
        let sealed = seal(b"the quick brown fox jumps over the lazy dog").await;
        for i in 0..sealed.len() {
            let mut tampered = sealed.clone();
            tampered[i] ^= 0x01;
            match open(&tampered).await {
                Err(TransferError::Crypto(_)) => {}
                other => panic!("flip at {i} not detected: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_short_nonce() {
        let err = open(&[1, 2, 3]).await.unwrap_err();
        assert!(matches!(err, TransferError::Crypto(_)));
    }

    #[tokio::test]
    async fn test_missing_final_chunk_is_truncation() {
        let mut writer = StreamCipher::new(&key())
            .encrypting_writer(Vec::new())
            .await
            .unwrap();
        writer.write_all(b"partial").await.unwrap();
        writer.flush().await.unwrap();
        // 不调用 finish：模拟发送端中途失败
        let sealed = writer.inner.clone();

        let mut reader = StreamCipher::new(&key())
            .decrypting_reader(sealed.as_slice())
            .await
            .unwrap();
        let mut buf = [0u8; 64];
        // 已认证的块可以交付
        assert_eq!(reader.read(&mut buf).await.unwrap(), 7);
        assert!(matches!(
            reader.read(&mut buf).await,
            Err(TransferError::Crypto(_))
        ));
    }

    #[tokio::test]
    async fn test_trailing_data_rejected() {
        let mut sealed = seal(b"data").await;
        sealed.push(0);
        assert!(matches!(open(&sealed).await, Err(TransferError::Crypto(_))));
    }

    #[tokio::test]
    async fn test_wrong_key_fails() {
        let sealed = seal(b"secret").await;
        let mut reader = StreamCipher::new(&SharedKey::from_bytes([1; 32]))
            .decrypting_reader(sealed.as_slice())
            .await
            .unwrap();
        let mut buf = [0u8; 16];
        assert!(matches!(
            reader.read(&mut buf).await,
            Err(TransferError::Crypto(_))
        ));
    }

    #[test]
    fn test_chunk_nonce_distinct() {
        let base = [9u8; NONCE_LEN];
        assert_eq!(chunk_nonce(&base, 0), base);
        assert_ne!(chunk_nonce(&base, 1), chunk_nonce(&base, 2));
        assert_eq!(chunk_nonce(&base, 1)[..4], base[..4]);
    }
}
