//! IPC Server - Unix Domain Socket 通信

use crate::service::Service;
use anyhow::Result;
use sorene_core::ipc::{IpcRequest, IpcResponse, read_message, socket_path, write_message};
use sorene_core::TransferError;
use std::path::Path;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};

pub async fn run_ipc_server(service: Arc<Service>) -> Result<()> {
    serve(&socket_path(), service).await
}

pub async fn serve(path: &Path, service: Arc<Service>) -> Result<()> {
    // 删除旧的 socket 文件
    let _ = std::fs::remove_file(path);

    let listener = UnixListener::bind(path)?;
    tracing::info!("IPC server listening on {:?}", path);

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let service = service.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, &service).await {
                        tracing::debug!("IPC client error: {}", e);
                    }
                });
            }
            Err(e) => {
                tracing::warn!("Failed to accept IPC connection: {}", e);
            }
        }
    }
}

async fn handle_client(stream: UnixStream, service: &Service) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    loop {
        let request = match read_message::<_, IpcRequest>(&mut reader).await {
            Ok(Some(request)) => request,
            Ok(None) => break,
            Err(TransferError::Protocol(message)) => {
                let response = IpcResponse::Error {
                    message: format!("Invalid request: {message}"),
                };
                write_message(&mut writer, &response).await?;
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        tracing::debug!("Request: {:?}", request);
        let response = service.handle(request).await;
        write_message(&mut writer, &response).await?;
    }

    Ok(())
}
