//! Sorene Core Library
//!
//! 局域网内点对点目录传输引擎：一次连接传输一棵目录树，全程加密。
//!
//! # 模块
//!
//! - **crypto**: ECDH (P-256) 密钥交换和 AES-256-GCM 流式加密
//! - **io**: 缓冲池、有界背压通道、速率与进度统计
//! - **tree**: 目录流格式、发送端读取任务、接收端写入任务
//! - **session**: 握手、发送/接收会话编排、会话注册表
//! - **ipc**: 守护进程与 CLI 的消息格式
//!
//! # 使用示例
//!
//! ## 接收
//!
//! ```ignore
//! use sorene_core::{Receiver, TransferSettings};
//!
//! let receiver = Receiver::new(TransferSettings::load());
//! let handle = receiver.start("/home/user/Downloads").await?;
//! let result = handle.wait().await;
//! ```
//!
//! ## 发送
//!
//! ```ignore
//! use sorene_core::{Sender, TransferSettings};
//!
//! let sender = Sender::new(TransferSettings::load());
//! let handle = sender.start("/home/user/Photos", vec![], "192.168.1.20")?;
//! println!("{:?}", handle.progress());
//! ```

pub mod config;
pub mod crypto;
pub mod error;
pub mod io;
pub mod ipc;
pub mod session;
pub mod tree;

pub use config::{DEFAULT_PORT, TransferSettings};
pub use error::{ErrorKind, Result, TransferError};
pub use io::{Progress, format_size};
pub use session::{
    Phase, Receiver, Role, Sender, SessionHandle, SessionRegistry, SessionStatus, TransferResult,
};
pub use tree::TreeStats;
