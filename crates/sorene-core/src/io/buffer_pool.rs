//! 帧与缓冲池
//!
//! 热路径上复用固定容量的缓冲区，避免反复分配。

use std::sync::{Mutex, PoisonError};

/// 在通道中流动的字节块
///
/// `0 <= len <= capacity`。帧通过所有权移动在任务之间传递，同一时刻只有一个持有者。
pub struct Frame {
    buf: Box<[u8]>,
    len: usize,
}

impl Frame {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// 剩余可写入字节数
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.len
    }

    pub fn is_full(&self) -> bool {
        self.len == self.buf.len()
    }

    /// 有效数据
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// 尚未写入的部分，配合 [`Frame::advance`] 直接读入
    pub fn unfilled_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.len..]
    }

    /// 标记 `n` 个字节已写入 `unfilled_mut()`
    pub fn advance(&mut self, n: usize) {
        assert!(n <= self.remaining(), "advance past frame capacity");
        self.len += n;
    }

    /// 尽量追加数据，返回实际复制的字节数
    pub fn extend_from_slice(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.remaining());
        self.buf[self.len..self.len + n].copy_from_slice(&data[..n]);
        self.len += n;
        n
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("len", &self.len)
            .field("capacity", &self.buf.len())
            .finish()
    }
}

/// 缓冲池
///
/// 池的大小只会增长到同时在途帧数的峰值，不设上限。
pub struct BufferPool {
    buffer_size: usize,
    buffers: Mutex<Vec<Frame>>,
}

impl BufferPool {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size,
            buffers: Mutex::new(Vec::new()),
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// 取出一个空帧（池为空时新分配），从不阻塞
    pub fn pop(&self) -> Frame {
        let recycled = self
            .buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        recycled.unwrap_or_else(|| Frame::with_capacity(self.buffer_size))
    }

    /// 归还帧以便复用，长度被重置
    pub fn push(&self, mut frame: Frame) {
        // 其他容量的帧不属于本池
        if frame.capacity() != self.buffer_size {
            return;
        }
        frame.clear();
        self.buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(frame);
    }

    /// 池中空闲帧数量
    pub fn idle(&self) -> usize {
        self.buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
