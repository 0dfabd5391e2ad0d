//! 有界字节通道
//!
//! 目录任务与网络循环之间的背压边界：容量按字节计算而非帧数，
//! 快的一端会被慢的一端限速。
//!
//! 策略：
//! - 长度超过容量的帧直接返回 [`TransferError::FrameTooLarge`]，不截断也不阻塞
//! - 写入空帧等同于 [`Channel::close`]（流结束标记）
//! - 关闭后任何写入（包括空帧）都失败，读取方继续取完剩余帧后得到 `None`

use super::buffer_pool::Frame;
use crate::error::{Result, TransferError};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

struct State {
    queue: VecDeque<Frame>,
    available: usize,
    closed: bool,
}

pub struct Channel {
    capacity: usize,
    state: Mutex<State>,
    readable: Notify,
    writable: Notify,
}

impl Channel {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(TransferError::Config(
                "channel capacity must be at least 1 byte".into(),
            ));
        }
        Ok(Self {
            capacity,
            state: Mutex::new(State {
                queue: VecDeque::new(),
                available: capacity,
                closed: false,
            }),
            readable: Notify::new(),
            writable: Notify::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 写入一帧，字节预算不足时等待
    pub async fn write(&self, frame: Frame) -> Result<()> {
        if frame.is_empty() {
            if self.mark_closed() {
                return Err(TransferError::ChannelClosed);
            }
            return Ok(());
        }
        if frame.len() > self.capacity {
            return Err(TransferError::FrameTooLarge {
                len: frame.len(),
                capacity: self.capacity,
            });
        }

        loop {
            let notified = self.writable.notified();
            tokio::pin!(notified);
            // 先登记再检查状态，避免丢失唤醒
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.closed {
                    return Err(TransferError::ChannelClosed);
                }
                if state.available >= frame.len() {
                    state.available -= frame.len();
                    state.queue.push_back(frame);
                    drop(state);
                    self.readable.notify_waiters();
                    return Ok(());
                }
            }

            notified.await;
        }
    }

    /// 读取一帧；通道关闭且取空后返回 `None`
    pub async fn read(&self) -> Option<Frame> {
        loop {
            let notified = self.readable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(frame) = state.queue.pop_front() {
                    state.available += frame.len();
                    drop(state);
                    self.writable.notify_waiters();
                    return Some(frame);
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// 禁止后续写入并唤醒所有等待者
    pub fn close(&self) {
        self.mark_closed();
    }

    /// 返回调用前是否已经关闭
    fn mark_closed(&self) -> bool {
        let was_closed = std::mem::replace(&mut self.lock().closed, true);
        self.writable.notify_waiters();
        self.readable.notify_waiters();
        was_closed
    }

    /// 等待通道被关闭（不论由哪一端关闭）
    pub async fn closed(&self) {
        loop {
            let notified = self.writable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.lock().closed {
                return;
            }
            notified.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 剩余字节预算（仅用于进度展示）
    pub fn available(&self) -> usize {
        self.lock().available
    }

    /// 队列中的帧数
    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }
}
