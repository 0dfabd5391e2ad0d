//! 接收端会话
//!
//! 监听端口，接受一个连接后握手，把解密后的明文按帧写入通道，
//! 由目录写入任务还原到目标目录。

use super::{Role, SessionContext, SessionHandle, combine, guarded, handshake, joined};
use crate::config::TransferSettings;
use crate::crypto::{DecryptingReader, StreamCipher};
use crate::error::{Result, TransferError};
use crate::io::{AverageRateCounter, BufferPool, Channel};
use crate::tree::{DirectoryWriter, TreeStats};
use log::{debug, info};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

pub struct Receiver {
    settings: TransferSettings,
}

impl Receiver {
    pub fn new(settings: TransferSettings) -> Self {
        Self { settings }
    }

    /// 开始接收
    ///
    /// 返回前已经完成端口绑定，绑定失败会直接返回错误；
    /// 实际监听地址可通过 [`SessionHandle::local_addr`] 获取。
    pub async fn start(&self, dest: impl Into<PathBuf>) -> Result<SessionHandle> {
        self.settings.validate()?;

        let bind = SocketAddr::new(self.settings.bind_address, self.settings.port);
        let listener = TcpListener::bind(bind).await?;
        let local = listener.local_addr()?;
        let dest = dest.into();
        info!("Receiving into {:?}, listening on {}", dest, local);

        let ctx = SessionContext::new(Role::Receive, &self.settings);
        let handle = ctx.handle(Some(local));
        let settings = self.settings.clone();

        tokio::spawn(async move {
            let outcome = run(&ctx, &settings, listener, dest).await;
            ctx.finish(outcome);
        });
        Ok(handle)
    }
}

async fn run(
    ctx: &SessionContext,
    settings: &TransferSettings,
    listener: TcpListener,
    dest: PathBuf,
) -> Result<TreeStats> {
    let cancel = ctx.cancel_token().clone();
    let io_timeout = settings.io_timeout();

    let mut stream = accept_one(listener, &cancel, settings.accept_poll()).await?;
    stream.set_nodelay(true)?;

    let key = guarded(
        &cancel,
        io_timeout,
        "exchanging keys",
        handshake::respond(&mut stream),
    )
    .await?;
    // 写半部保持打开直到会话结束
    let (read_half, _write_half) = stream.into_split();
    let mut reader = guarded(
        &cancel,
        io_timeout,
        "reading the stream nonce",
        StreamCipher::new(&key).decrypting_reader(read_half),
    )
    .await?;
    info!("Handshake complete");

    let channel = Arc::new(Channel::new(settings.receive_buffer_capacity)?);
    let pool = Arc::new(BufferPool::new(settings.buffer_size));
    ctx.start_streaming(channel.clone());

    let worker_cancel = cancel.child_token();
    let worker = DirectoryWriter::new(
        dest,
        channel.clone(),
        pool.clone(),
        ctx.progress(),
        worker_cancel.clone(),
    )
    .spawn();

    let pumped = tokio::select! {
        biased;
        () = cancel.cancelled() => Err(TransferError::Cancelled),
        r = fill_from_peer(&mut reader, &channel, &pool, ctx.rate(), io_timeout) => r,
    };
    if pumped.is_err() {
        worker_cancel.cancel();
    }
    channel.close();
    let worker = joined(worker.await);
    combine(pumped, worker, cancel.is_cancelled())
}

/// 等待第一个连接，之后监听套接字随即释放
async fn accept_one(
    listener: TcpListener,
    cancel: &CancellationToken,
    poll: Duration,
) -> Result<TcpStream> {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(TransferError::Cancelled),
            r = tokio::time::timeout(poll, listener.accept()) => match r {
                Ok(Ok((stream, peer))) => {
                    info!("Accepted connection from {}", peer);
                    return Ok(stream);
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => debug!("Still waiting for a sender"),
            },
        }
    }
}

/// 网络循环：解密流 -> 通道
///
/// 已解密的明文用完时立即交出当前帧，不等帧填满；流正常结束时返回。
/// 写入任务退出会关闭通道，此时不再等待网络，返回 `ChannelClosed`。
async fn fill_from_peer<R>(
    reader: &mut DecryptingReader<R>,
    channel: &Channel,
    pool: &BufferPool,
    rate: &AverageRateCounter,
    io_timeout: Duration,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    loop {
        let mut frame = pool.pop();
        let mut eof = false;
        while !frame.is_full() {
            if !frame.is_empty() && reader.buffered() == 0 {
                break;
            }
            let read = tokio::select! {
                biased;
                () = channel.closed() => None,
                r = tokio::time::timeout(io_timeout, reader.read(frame.unfilled_mut())) => Some(r),
            };
            let Some(read) = read else {
                pool.push(frame);
                return Err(TransferError::ChannelClosed);
            };
            let n = read.map_err(|_| TransferError::Timeout("reading from the peer"))??;
            if n == 0 {
                eof = true;
                break;
            }
            frame.advance(n);
            rate.increase(n as u64);
        }

        if frame.is_empty() {
            pool.push(frame);
        } else {
            channel.write(frame).await?;
        }
        if eof {
            return Ok(());
        }
    }
}
