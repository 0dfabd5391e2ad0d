//! Sorene Daemon
//!
//! 后台守护进程，负责：
//! - 持有发送/接收会话（每个角色最多一个）
//! - 通过 Unix Socket 与 CLI 通信

mod ipc;
mod service;

use anyhow::Result;
use service::Service;
use sorene_core::TransferSettings;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 桥接 log crate（sorene-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    // 初始化日志
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,sorene_core=debug")),
        )
        .try_init();

    tracing::info!("Sorene Daemon starting...");

    let settings = TransferSettings::load();
    settings.validate()?;
    tracing::info!(
        "Port {}, downloads go to {:?}",
        settings.port,
        settings.download_dir
    );

    let service = Arc::new(Service::new(settings));
    let ipc_handle = tokio::spawn(ipc::run_ipc_server(service.clone()));

    // 等待 IPC 服务退出或收到 Ctrl-C
    tokio::select! {
        res = ipc_handle => {
            tracing::error!("IPC server exited: {:?}", res);
        }
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
            }
            tracing::info!("Shutting down");
        }
    }

    service.shutdown().await;
    let _ = std::fs::remove_file(sorene_core::ipc::socket_path());
    Ok(())
}
