//! 传输配置和持久化
//!
//! 提供端口、缓冲区大小、超时等设置的存储和读取。

use crate::error::{Result, TransferError};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

/// 默认 TCP 端口
pub const DEFAULT_PORT: u16 = 14645;

const KIB: usize = 1024;
const MIB: usize = 1024 * 1024;

/// 传输设置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    /// 接收端监听端口，发送端连接端口
    pub port: u16,
    /// 接收端监听地址
    pub bind_address: IpAddr,
    /// 缓冲池中每个帧的容量
    pub buffer_size: usize,
    /// 发送端通道字节容量
    pub send_buffer_capacity: usize,
    /// 接收端通道字节容量
    pub receive_buffer_capacity: usize,
    pub connect_timeout_ms: u64,
    /// 握手及单次套接字读写超时
    pub io_timeout_ms: u64,
    /// accept 等待切片，保证取消在该间隔内可见
    pub accept_poll_ms: u64,
    /// 进度采样间隔
    pub progress_interval_ms: u64,
    /// 平均速率窗口（采样次数）
    pub rate_window: usize,
    /// 默认接收目录
    pub download_dir: PathBuf,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            buffer_size: 64 * KIB,
            send_buffer_capacity: 8 * MIB,
            receive_buffer_capacity: 112 * MIB,
            connect_timeout_ms: 4000,
            io_timeout_ms: 30_000,
            accept_poll_ms: 1000,
            progress_interval_ms: 1000,
            rate_window: 5,
            download_dir: dirs::download_dir().unwrap_or_else(|| PathBuf::from(".")),
        }
    }
}

impl TransferSettings {
    /// 获取配置文件路径
    fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sorene");
        config_dir.join("settings.toml")
    }

    /// 加载设置（如果文件不存在或无法解析则使用默认值）
    pub fn load() -> Self {
        let path = Self::config_path();
        if path.exists() {
            match fs::read_to_string(&path) {
                Ok(content) => match toml::from_str::<Self>(&content) {
                    Ok(settings) => {
                        debug!("Loaded settings from {:?}", path);
                        return settings;
                    }
                    Err(e) => {
                        log::warn!("Failed to parse settings: {}, using defaults", e);
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read settings file: {}, using defaults", e);
                }
            }
        }
        Self::default()
    }

    /// 保存设置
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| TransferError::Config(format!("cannot serialize settings: {e}")))?;
        fs::write(&path, content)?;
        debug!("Saved settings to {:?}", path);
        Ok(())
    }

    /// 检查设置是否可用
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("buffer_size", self.buffer_size as u64),
            ("send_buffer_capacity", self.send_buffer_capacity as u64),
            ("receive_buffer_capacity", self.receive_buffer_capacity as u64),
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("io_timeout_ms", self.io_timeout_ms),
            ("accept_poll_ms", self.accept_poll_ms),
            ("progress_interval_ms", self.progress_interval_ms),
            ("rate_window", self.rate_window as u64),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(TransferError::Config(format!("{name} must be positive")));
        }
        let smallest = self.send_buffer_capacity.min(self.receive_buffer_capacity);
        if self.buffer_size > smallest {
            return Err(TransferError::Config(format!(
                "buffer_size {} exceeds channel capacity {}",
                self.buffer_size, smallest
            )));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn accept_poll(&self) -> Duration {
        Duration::from_millis(self.accept_poll_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}
