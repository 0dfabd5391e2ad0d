//! 流水线基础设施
//!
//! - **buffer_pool**: 帧与可复用缓冲池
//! - **channel**: 按字节计量的有界背压通道
//! - **rate**: 吞吐量统计
//! - **progress**: 进度快照发布

pub mod buffer_pool;
pub mod channel;
pub mod progress;
pub mod rate;

pub use buffer_pool::{BufferPool, Frame};
pub use channel::Channel;
pub use progress::{Progress, ProgressTracker};
pub use rate::{AverageRateCounter, RateCounter, format_size};
