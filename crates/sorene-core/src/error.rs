//! 传输错误类型
//!
//! 所有核心模块共享同一个错误枚举，会话结束时通过 [`TransferError::kind`]
//! 归类为可序列化的 [`ErrorKind`]，供 UI / IPC 展示。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 传输引擎错误
#[derive(Debug, Error)]
pub enum TransferError {
    /// 握手阶段的公钥数据格式错误或长度非法
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// 对端公钥无法解码为曲线上的点
    #[error("key agreement failed: {0}")]
    KeyAgreement(String),

    /// 认证失败、nonce 不完整或密文流被截断
    #[error("crypto error: {0}")]
    Crypto(String),

    /// 向已关闭的通道写入
    #[error("channel closed")]
    ChannelClosed,

    /// 帧长度超过通道容量
    #[error("frame of {len} bytes exceeds channel capacity of {capacity} bytes")]
    FrameTooLarge { len: usize, capacity: usize },

    /// 条目路径非法（绝对路径、`..` 等）
    #[error("invalid entry path: {0:?}")]
    InvalidPath(String),

    /// 目录流格式错误
    #[error("protocol error: {0}")]
    Protocol(String),

    /// 对端地址不是合法的 IPv4 点分十进制
    #[error("invalid peer address: {0:?}")]
    InvalidAddress(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("timed out while {0}")]
    Timeout(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// 用户取消
    #[error("transfer cancelled")]
    Cancelled,
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Handshake,
    Crypto,
    ChannelClosed,
    Protocol,
    InvalidInput,
    Io,
    Cancelled,
}

impl TransferError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::Handshake(_) | TransferError::KeyAgreement(_) => ErrorKind::Handshake,
            TransferError::Crypto(_) => ErrorKind::Crypto,
            TransferError::ChannelClosed => ErrorKind::ChannelClosed,
            TransferError::InvalidPath(_) | TransferError::Protocol(_) => ErrorKind::Protocol,
            TransferError::FrameTooLarge { .. }
            | TransferError::InvalidAddress(_)
            | TransferError::Config(_) => ErrorKind::InvalidInput,
            TransferError::Timeout(_) | TransferError::Io(_) => ErrorKind::Io,
            TransferError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransferError>;
