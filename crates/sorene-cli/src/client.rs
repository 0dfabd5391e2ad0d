//! IPC Client - 与守护进程通信

use anyhow::Result;
use sorene_core::ipc::{IpcRequest, IpcResponse, read_message, socket_path, write_message};
use tokio::io::BufReader;
use tokio::net::UnixStream;

/// 发送请求并返回响应，不打印任何内容
pub async fn request(request: &IpcRequest) -> Result<IpcResponse> {
    let path = socket_path();

    let stream = match UnixStream::connect(&path).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("❌ 无法连接到守护进程: {}", e);
            eprintln!("   请确保 sorene-daemon 正在运行 ({})", path.display());
            return Err(e.into());
        }
    };

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    write_message(&mut writer, request).await?;
    read_message(&mut reader)
        .await?
        .ok_or_else(|| anyhow::anyhow!("daemon closed the connection without a response"))
}

/// 发送请求并打印 ok / error 消息
pub async fn send_request(req: IpcRequest) -> Result<IpcResponse> {
    let response = request(&req).await?;

    match &response {
        IpcResponse::Ok { message } => println!("✅ {}", message),
        IpcResponse::Error { message } => eprintln!("❌ {}", message),
        IpcResponse::Status { .. } => {}
    }

    Ok(response)
}
