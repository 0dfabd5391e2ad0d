//! 传输会话编排
//!
//! 每个会话经历 `Handshake -> Streaming -> Finished`：
//!
//! 1. 明文交换 ECDH 公钥，派生会话密钥
//! 2. 目录任务与网络循环通过 [`Channel`] 并发运行
//! 3. 两者都结束后合并结果，发布 [`TransferResult`]
//!
//! 会话在后台任务中运行，调用方通过 [`SessionHandle`] 查询状态或取消。

pub mod handshake;
pub mod receiver;
pub mod registry;
pub mod sender;

use crate::config::TransferSettings;
use crate::error::{ErrorKind, Result, TransferError};
use crate::io::{AverageRateCounter, Channel, Progress, ProgressTracker, format_size};
use crate::tree::TreeStats;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use receiver::Receiver;
pub use registry::SessionRegistry;
pub use sender::Sender;

/// 会话角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Send,
    Receive,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Send => f.write_str("send"),
            Role::Receive => f.write_str("receive"),
        }
    }
}

/// 会话阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Handshake,
    Streaming,
    Finished,
}

/// 会话最终结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    pub success: bool,
    pub error_kind: Option<ErrorKind>,
    /// 最后一个错误的可读描述
    pub reason: Option<String>,
    pub stats: TreeStats,
}

impl TransferResult {
    pub fn succeeded(stats: TreeStats) -> Self {
        Self {
            success: true,
            error_kind: None,
            reason: None,
            stats,
        }
    }

    pub fn failed(error: &TransferError) -> Self {
        Self {
            success: false,
            error_kind: Some(error.kind()),
            reason: Some(error.to_string()),
            stats: TreeStats::default(),
        }
    }
}

/// 定时发布的会话状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub role: Role,
    pub phase: Phase,
    pub progress: Progress,
    /// 平滑后的速率 (bytes/s)
    pub rate: u64,
    /// 已经过网络的明文字节数
    pub transferred: u64,
    pub buffer_used: usize,
    pub buffer_capacity: usize,
}

impl SessionStatus {
    fn new(role: Role) -> Self {
        Self {
            role,
            phase: Phase::Handshake,
            progress: Progress::default(),
            rate: 0,
            transferred: 0,
            buffer_used: 0,
            buffer_capacity: 0,
        }
    }
}

/// 运行中会话的句柄
///
/// 可以任意克隆；所有克隆共享同一个取消令牌。
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: Uuid,
    role: Role,
    cancel: CancellationToken,
    progress: watch::Receiver<Progress>,
    status: watch::Receiver<SessionStatus>,
    result: watch::Receiver<Option<TransferResult>>,
    local_addr: Option<SocketAddr>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// 接收端实际监听的地址
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// 请求取消；已结束的会话不受影响
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// 当前进度（实时）
    pub fn progress(&self) -> Progress {
        self.progress.borrow().clone()
    }

    /// 最近一次发布的状态
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// 结果，会话未结束时为 `None`
    pub fn result(&self) -> Option<TransferResult> {
        self.result.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.result.borrow().is_some()
    }

    /// 等待会话结束
    pub async fn wait(&self) -> TransferResult {
        let mut rx = self.result.clone();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(result) => (*result).clone(),
            Err(_) => None,
        };
        // 会话任务异常退出时没有发布结果
        outcome.unwrap_or_else(|| {
            TransferResult::failed(&TransferError::Io(std::io::Error::other(
                "session task exited without a result",
            )))
        })
    }
}

/// 会话任务持有的发布端
pub(crate) struct SessionContext {
    id: Uuid,
    role: Role,
    cancel: CancellationToken,
    /// 会话结束时触发，停止计时器
    done: CancellationToken,
    progress: Arc<ProgressTracker>,
    rate: Arc<AverageRateCounter>,
    status: Arc<watch::Sender<SessionStatus>>,
    result: watch::Sender<Option<TransferResult>>,
    interval: Duration,
}

impl SessionContext {
    pub(crate) fn new(role: Role, settings: &TransferSettings) -> Self {
        let (status, _) = watch::channel(SessionStatus::new(role));
        let (result, _) = watch::channel(None);
        Self {
            id: Uuid::new_v4(),
            role,
            cancel: CancellationToken::new(),
            done: CancellationToken::new(),
            progress: Arc::new(ProgressTracker::new()),
            rate: Arc::new(AverageRateCounter::new(settings.rate_window)),
            status: Arc::new(status),
            result,
            interval: settings.progress_interval(),
        }
    }

    pub(crate) fn handle(&self, local_addr: Option<SocketAddr>) -> SessionHandle {
        SessionHandle {
            id: self.id,
            role: self.role,
            cancel: self.cancel.clone(),
            progress: self.progress.subscribe(),
            status: self.status.subscribe(),
            result: self.result.subscribe(),
            local_addr,
        }
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn progress(&self) -> Arc<ProgressTracker> {
        self.progress.clone()
    }

    pub(crate) fn rate(&self) -> &AverageRateCounter {
        &self.rate
    }

    /// 进入传输阶段并启动采样计时器
    pub(crate) fn start_streaming(&self, channel: Arc<Channel>) {
        self.status.send_modify(|s| {
            s.phase = Phase::Streaming;
            s.buffer_capacity = channel.capacity();
        });

        let role = self.role;
        let done = self.done.clone();
        let status = self.status.clone();
        let progress = self.progress.clone();
        let rate = self.rate.clone();
        let interval = self.interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // 第一次 tick 立即完成
            ticker.tick().await;
            let millis = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX).max(1);
            loop {
                tokio::select! {
                    () = done.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let per_second = rate.rate().saturating_mul(1000) / millis;
                let used = channel.capacity() - channel.available();
                status.send_modify(|s| {
                    s.progress = progress.snapshot();
                    s.rate = per_second;
                    s.transferred = rate.total();
                    s.buffer_used = used;
                });
                debug!(
                    "[{}] {}/s, buffer {}/{}",
                    role,
                    format_size(per_second as f64),
                    format_size(used as f64),
                    format_size(channel.capacity() as f64)
                );
            }
        });
    }

    /// 发布最终状态和结果
    pub(crate) fn finish(self, outcome: Result<TreeStats>) {
        self.done.cancel();
        let result = match &outcome {
            Ok(stats) => {
                info!(
                    "[{}] Transfer finished: {} files, {} bytes",
                    self.role,
                    stats.files,
                    format_size(stats.bytes as f64)
                );
                TransferResult::succeeded(*stats)
            }
            Err(e) => {
                warn!("[{}] Transfer failed: {}", self.role, e);
                TransferResult::failed(e)
            }
        };
        self.status.send_modify(|s| {
            s.phase = Phase::Finished;
            s.progress = self.progress.snapshot();
            s.rate = 0;
            s.transferred = self.rate.total();
            s.buffer_used = 0;
        });
        self.result.send_replace(Some(result));
    }
}

/// 合并网络循环与目录任务的结果
///
/// 令牌已取消时一律视为取消；网络循环仅因目录任务关闭通道而失败时，
/// 报告目录任务的错误。
pub(crate) fn combine(
    pumped: Result<()>,
    worker: Result<TreeStats>,
    cancelled: bool,
) -> Result<TreeStats> {
    if cancelled {
        return Err(TransferError::Cancelled);
    }
    match (pumped, worker) {
        (Ok(()), Ok(stats)) => Ok(stats),
        (Err(TransferError::ChannelClosed), Err(e)) => Err(e),
        (Err(e), _) | (Ok(()), Err(e)) => Err(e),
    }
}

pub(crate) fn joined(
    joined: std::result::Result<Result<TreeStats>, JoinError>,
) -> Result<TreeStats> {
    joined.unwrap_or_else(|e| Err(TransferError::Io(std::io::Error::other(e))))
}

/// 等待 `fut`，同时响应取消和超时
pub(crate) async fn guarded<T, E, F>(
    cancel: &CancellationToken,
    limit: Duration,
    what: &'static str,
    fut: F,
) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    E: Into<TransferError>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(TransferError::Cancelled),
        r = tokio::time::timeout(limit, fut) => match r {
            Ok(r) => r.map_err(Into::into),
            Err(_) => Err(TransferError::Timeout(what)),
        },
    }
}

/// 解析点分十进制 IPv4 地址
pub fn parse_peer_address(address: &str) -> Result<Ipv4Addr> {
    address
        .trim()
        .parse()
        .map_err(|_| TransferError::InvalidAddress(address.to_string()))
}
