//! 发送端会话
//!
//! 连接对端、握手，然后把目录读取任务写入通道的帧加密发送。
//! 只有目录任务和网络循环都成功时才写出最后一块，
//! 否则对端会把流视为截断。

use super::{
    Role, SessionContext, SessionHandle, combine, guarded, handshake, joined, parse_peer_address,
};
use crate::config::TransferSettings;
use crate::crypto::{EncryptingWriter, StreamCipher};
use crate::error::{Result, TransferError};
use crate::io::{AverageRateCounter, BufferPool, Channel};
use crate::tree::{DirectoryReader, TreeStats};
use log::{debug, info};
use std::net::SocketAddrV4;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

pub struct Sender {
    settings: TransferSettings,
}

impl Sender {
    pub fn new(settings: TransferSettings) -> Self {
        Self { settings }
    }

    /// 开始发送
    ///
    /// `entries` 为 `root` 下的相对路径，为空时发送整个目录。
    /// 地址在任何网络操作之前校验，非法时直接返回错误。
    pub fn start(
        &self,
        root: impl Into<PathBuf>,
        entries: Vec<String>,
        peer: &str,
    ) -> Result<SessionHandle> {
        let peer = parse_peer_address(peer)?;
        self.settings.validate()?;

        let addr = SocketAddrV4::new(peer, self.settings.port);
        let ctx = SessionContext::new(Role::Send, &self.settings);
        let handle = ctx.handle(None);
        let settings = self.settings.clone();
        let root = root.into();
        info!("Sending {:?} to {}", root, addr);

        tokio::spawn(async move {
            let outcome = run(&ctx, &settings, root, entries, addr).await;
            ctx.finish(outcome);
        });
        Ok(handle)
    }
}

async fn run(
    ctx: &SessionContext,
    settings: &TransferSettings,
    root: PathBuf,
    entries: Vec<String>,
    addr: SocketAddrV4,
) -> Result<TreeStats> {
    let cancel = ctx.cancel_token().clone();
    let io_timeout = settings.io_timeout();

    let mut stream = guarded(
        &cancel,
        settings.connect_timeout(),
        "connecting to the peer",
        TcpStream::connect(addr),
    )
    .await?;
    stream.set_nodelay(true)?;
    debug!("Connected to {}", addr);

    let key = guarded(
        &cancel,
        io_timeout,
        "exchanging keys",
        handshake::initiate(&mut stream),
    )
    .await?;
    let (_read_half, write_half) = stream.into_split();
    let mut writer = guarded(
        &cancel,
        io_timeout,
        "writing the stream nonce",
        StreamCipher::new(&key).encrypting_writer(write_half),
    )
    .await?;
    info!("Handshake with {} complete", addr);

    let channel = Arc::new(Channel::new(settings.send_buffer_capacity)?);
    let pool = Arc::new(BufferPool::new(settings.buffer_size));
    ctx.start_streaming(channel.clone());

    let worker_cancel = cancel.child_token();
    let worker = DirectoryReader::new(
        root,
        entries,
        channel.clone(),
        pool.clone(),
        ctx.progress(),
        worker_cancel.clone(),
    )
    .spawn();

    let pumped = tokio::select! {
        biased;
        () = cancel.cancelled() => Err(TransferError::Cancelled),
        r = drain_to_peer(&channel, &pool, &mut writer, ctx.rate(), io_timeout) => r,
    };
    if pumped.is_err() {
        worker_cancel.cancel();
        channel.close();
    }
    let worker = joined(worker.await);
    let stats = combine(pumped, worker, cancel.is_cancelled())?;

    let mut inner = guarded(&cancel, io_timeout, "committing the stream", writer.finish()).await?;
    guarded(&cancel, io_timeout, "closing the connection", inner.shutdown()).await?;
    Ok(stats)
}

/// 网络循环：通道 -> 加密流
async fn drain_to_peer<W>(
    channel: &Channel,
    pool: &BufferPool,
    writer: &mut EncryptingWriter<W>,
    rate: &AverageRateCounter,
    io_timeout: Duration,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = channel.read().await {
        tokio::time::timeout(io_timeout, writer.write_all(frame.as_slice()))
            .await
            .map_err(|_| TransferError::Timeout("writing to the peer"))??;
        rate.increase(frame.len() as u64);
        pool.push(frame);
    }
    Ok(())
}
