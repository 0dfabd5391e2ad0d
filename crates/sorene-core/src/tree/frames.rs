//! 字节流与帧之间的适配
//!
//! 目录任务按字节流读写记录，而通道以帧为单位传递；
//! `FrameSink` 把字节攒满一帧再写入通道，`FrameSource` 反向拆帧。

use crate::error::{Result, TransferError};
use crate::io::{BufferPool, Channel, Frame};
use std::io::ErrorKind;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// 写入端：字节流 -> 帧
pub struct FrameSink {
    channel: Arc<Channel>,
    pool: Arc<BufferPool>,
    current: Option<Frame>,
}

impl FrameSink {
    pub fn new(channel: Arc<Channel>, pool: Arc<BufferPool>) -> Self {
        Self {
            channel,
            pool,
            current: None,
        }
    }

    pub async fn write_all(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let frame = self.current.get_or_insert_with(|| self.pool.pop());
            let n = frame.extend_from_slice(data);
            data = &data[n..];
            if frame.is_full() {
                self.send_current().await?;
            }
        }
        Ok(())
    }

    /// 从 `reader` 读入恰好 `len` 字节，每读到一段调用一次 `on_chunk`
    ///
    /// 数据直接读进帧缓冲区，不经过中间拷贝。源数据不足 `len` 时返回 `UnexpectedEof`。
    pub async fn copy_from<R, F>(&mut self, reader: &mut R, len: u64, mut on_chunk: F) -> Result<()>
    where
        R: AsyncRead + Unpin,
        F: FnMut(usize),
    {
        let mut left = len;
        while left > 0 {
            let frame = self.current.get_or_insert_with(|| self.pool.pop());
            let want = usize::try_from(left).unwrap_or(usize::MAX).min(frame.remaining());
            let n = reader.read(&mut frame.unfilled_mut()[..want]).await?;
            if n == 0 {
                return Err(std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "source ended before its declared size",
                )
                .into());
            }
            frame.advance(n);
            left -= n as u64;
            on_chunk(n);
            if frame.is_full() {
                self.send_current().await?;
            }
        }
        Ok(())
    }

    /// 发送未满的当前帧
    pub async fn flush(&mut self) -> Result<()> {
        match self.current.take() {
            Some(frame) if !frame.is_empty() => self.channel.write(frame).await,
            Some(frame) => {
                self.pool.push(frame);
                Ok(())
            }
            None => Ok(()),
        }
    }

    async fn send_current(&mut self) -> Result<()> {
        if let Some(frame) = self.current.take() {
            self.channel.write(frame).await?;
        }
        Ok(())
    }
}

/// 读取端：帧 -> 字节流
pub struct FrameSource {
    channel: Arc<Channel>,
    pool: Arc<BufferPool>,
    current: Option<Frame>,
    pos: usize,
}

impl FrameSource {
    pub fn new(channel: Arc<Channel>, pool: Arc<BufferPool>) -> Self {
        Self {
            channel,
            pool,
            current: None,
            pos: 0,
        }
    }

    /// 保证当前帧还有未读数据；通道结束时返回 false
    async fn fill(&mut self) -> bool {
        loop {
            if let Some(frame) = &self.current {
                if self.pos < frame.len() {
                    return true;
                }
            }
            if let Some(done) = self.current.take() {
                self.pool.push(done);
            }
            match self.channel.read().await {
                Some(frame) => {
                    self.current = Some(frame);
                    self.pos = 0;
                }
                None => return false,
            }
        }
    }

    /// 流是否已结束（无更多字节）
    pub async fn at_end(&mut self) -> bool {
        !self.fill().await
    }

    pub async fn read_exact(&mut self, out: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < out.len() {
            if !self.fill().await {
                return Err(TransferError::Protocol("stream ended inside a record".into()));
            }
            let Some(frame) = &self.current else {
                continue;
            };
            let n = (frame.len() - self.pos).min(out.len() - filled);
            out[filled..filled + n].copy_from_slice(&frame.as_slice()[self.pos..self.pos + n]);
            self.pos += n;
            filled += n;
        }
        Ok(())
    }

    /// 把接下来的 `len` 字节写入 `writer`
    pub async fn copy_to<W, F>(&mut self, writer: &mut W, len: u64, mut on_chunk: F) -> Result<()>
    where
        W: AsyncWrite + Unpin,
        F: FnMut(usize),
    {
        let mut left = len;
        while left > 0 {
            if !self.fill().await {
                return Err(TransferError::Protocol("stream ended inside a file".into()));
            }
            let Some(frame) = &self.current else {
                continue;
            };
            let n = usize::try_from(left)
                .unwrap_or(usize::MAX)
                .min(frame.len() - self.pos);
            writer
                .write_all(&frame.as_slice()[self.pos..self.pos + n])
                .await?;
            self.pos += n;
            left -= n as u64;
            on_chunk(n);
        }
        Ok(())
    }

    /// 归还当前帧
    pub fn release(&mut self) {
        if let Some(frame) = self.current.take() {
            self.pool.push(frame);
        }
        self.pos = 0;
    }
}
