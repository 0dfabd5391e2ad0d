//! 明文握手：交换长度前缀的 ECDH 公钥
//!
//! ```text
//! len: u32 (大端) | public key (SPKI DER 或 SEC1 未压缩点)
//! ```
//!
//! 主动连接方（发送端）先写后读，接受连接方（接收端）先读后写。

use crate::crypto::{KeyExchange, SharedKey};
use crate::error::{Result, TransferError};
use log::debug;
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// 公钥长度上限，远大于任何合法编码
pub const MAX_PUBLIC_KEY_LEN: usize = 1024;

pub async fn write_public_key<W>(writer: &mut W, key: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(key.len())
        .map_err(|_| TransferError::Handshake(format!("public key too long: {}", key.len())))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(key).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_public_key<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut len = [0u8; 4];
    read_exact(reader, &mut len).await?;
    let len = u32::from_be_bytes(len) as usize;
    if len == 0 || len > MAX_PUBLIC_KEY_LEN {
        return Err(TransferError::Handshake(format!(
            "invalid public key length {len}"
        )));
    }

    let mut key = vec![0u8; len];
    read_exact(reader, &mut key).await?;
    Ok(key)
}

async fn read_exact<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(TransferError::Handshake(
            "peer closed the connection during handshake".into(),
        )),
        Err(e) => Err(e.into()),
    }
}

/// 连接方：先发送本地公钥
pub async fn initiate<S>(stream: &mut S) -> Result<SharedKey>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let local = KeyExchange::generate()?;
    write_public_key(stream, local.public_key_bytes()).await?;
    let peer = read_public_key(stream).await?;
    debug!("Received peer public key ({} bytes)", peer.len());
    local.derive_shared(&peer)
}

/// 接受方：先读取对端公钥
pub async fn respond<S>(stream: &mut S) -> Result<SharedKey>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let peer = read_public_key(stream).await?;
    debug!("Received peer public key ({} bytes)", peer.len());
    let local = KeyExchange::generate()?;
    write_public_key(stream, local.public_key_bytes()).await?;
    local.derive_shared(&peer)
}
