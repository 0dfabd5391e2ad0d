//! 守护进程与 CLI 之间的 IPC 消息
//!
//! 每条消息是一行 JSON，通过 Unix Domain Socket 传递。

use crate::error::{Result, TransferError};
use crate::session::{Role, SessionHandle, SessionStatus, TransferResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

pub fn socket_path() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join("sorene.sock")
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum IpcRequest {
    #[serde(rename = "send")]
    Send {
        root: String,
        #[serde(default)]
        files: Vec<String>,
        host: String,
    },
    #[serde(rename = "receive")]
    Receive { output: Option<String> },
    #[serde(rename = "status")]
    Status { role: Option<Role> },
    #[serde(rename = "stop")]
    Stop { role: Option<Role> },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum IpcResponse {
    #[serde(rename = "ok")]
    Ok { message: String },
    #[serde(rename = "error")]
    Error { message: String },
    #[serde(rename = "status")]
    Status { sessions: Vec<SessionReport> },
}

/// 单个会话的状态报告
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub id: Uuid,
    pub local_addr: Option<String>,
    pub status: SessionStatus,
    /// 会话结束后才有
    pub result: Option<TransferResult>,
}

impl From<&SessionHandle> for SessionReport {
    fn from(handle: &SessionHandle) -> Self {
        Self {
            id: handle.id(),
            local_addr: handle.local_addr().map(|a| a.to_string()),
            status: handle.status(),
            result: handle.result(),
        }
    }
}

/// 写出一条消息（JSON + 换行）
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(message)
        .map_err(|e| TransferError::Protocol(format!("cannot encode message: {e}")))?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// 读取一条消息，对端关闭时返回 `None`
pub async fn read_message<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    serde_json::from_str(line.trim_end())
        .map(Some)
        .map_err(|e| TransferError::Protocol(format!("invalid message: {e}")))
}
