//! Core Service - 把 IPC 请求分派给会话注册表

use sorene_core::ipc::{IpcRequest, IpcResponse, SessionReport};
use sorene_core::{Role, SessionRegistry, TransferSettings};
use std::path::PathBuf;

pub struct Service {
    registry: SessionRegistry,
}

impl Service {
    pub fn new(settings: TransferSettings) -> Self {
        Self {
            registry: SessionRegistry::new(settings),
        }
    }

    pub async fn handle(&self, request: IpcRequest) -> IpcResponse {
        match request {
            IpcRequest::Send { root, files, host } => {
                tracing::info!("Send {} {:?} -> {}", root, files, host);
                match self.registry.start_send(&root, files, &host).await {
                    Ok(handle) => IpcResponse::Ok {
                        message: format!("send session {} started", handle.id()),
                    },
                    Err(e) => error(e),
                }
            }
            IpcRequest::Receive { output } => {
                let dest = output.map_or_else(
                    || self.registry.settings().download_dir.clone(),
                    PathBuf::from,
                );
                tracing::info!("Receive into {:?}", dest);
                match self.registry.start_receive(&dest).await {
                    Ok(handle) => IpcResponse::Ok {
                        message: match handle.local_addr() {
                            Some(addr) => format!("listening on {addr}, saving to {}", dest.display()),
                            None => format!("saving to {}", dest.display()),
                        },
                    },
                    Err(e) => error(e),
                }
            }
            IpcRequest::Status { role } => {
                let handles = match role {
                    Some(role) => self.registry.handle(role).await.into_iter().collect(),
                    None => self.registry.handles().await,
                };
                IpcResponse::Status {
                    sessions: handles.iter().map(SessionReport::from).collect(),
                }
            }
            IpcRequest::Stop { role } => {
                let roles = match role {
                    Some(role) => vec![role],
                    None => vec![Role::Send, Role::Receive],
                };
                let mut stopped = Vec::new();
                for role in roles {
                    if self.registry.cancel(role).await {
                        stopped.push(role.to_string());
                    }
                }
                let message = if stopped.is_empty() {
                    "no running session".to_string()
                } else {
                    format!("stopped {}", stopped.join(", "))
                };
                IpcResponse::Ok { message }
            }
        }
    }

    /// 取消所有会话（守护进程退出前）
    pub async fn shutdown(&self) {
        for role in [Role::Send, Role::Receive] {
            if self.registry.cancel(role).await {
                if let Some(handle) = self.registry.handle(role).await {
                    handle.wait().await;
                }
            }
        }
    }
}

fn error(e: sorene_core::TransferError) -> IpcResponse {
    tracing::warn!("Request failed: {}", e);
    IpcResponse::Error {
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn service() -> Service {
        Service::new(TransferSettings {
            port: 0,
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            accept_poll_ms: 100,
            ..TransferSettings::default()
        })
    }

    #[tokio::test]
    async fn test_status_without_sessions() {
        let service = service();
        let response = service.handle(IpcRequest::Status { role: None }).await;
        assert_eq!(response, IpcResponse::Status { sessions: vec![] });
    }

    #[tokio::test]
    async fn test_stop_without_sessions() {
        let response = service().handle(IpcRequest::Stop { role: None }).await;
        assert_eq!(
            response,
            IpcResponse::Ok {
                message: "no running session".into()
            }
        );
    }

    #[tokio::test]
    async fn test_send_with_bad_host_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let response = service()
            .handle(IpcRequest::Send {
                root: dir.path().to_string_lossy().into_owned(),
                files: vec![],
                host: "nowhere".into(),
            })
            .await;
        assert!(matches!(response, IpcResponse::Error { .. }));
    }

    #[tokio::test]
    async fn test_receive_then_stop() {
        let dir = tempfile::tempdir().unwrap();
        let service = service();
        let response = service
            .handle(IpcRequest::Receive {
                output: Some(dir.path().to_string_lossy().into_owned()),
            })
            .await;
        assert!(matches!(response, IpcResponse::Ok { .. }));

        let IpcResponse::Status { sessions } = service
            .handle(IpcRequest::Status {
                role: Some(Role::Receive),
            })
            .await
        else {
            panic!("expected a status response");
        };
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].local_addr.is_some());
        assert!(sessions[0].result.is_none());

        let response = service
            .handle(IpcRequest::Stop {
                role: Some(Role::Receive),
            })
            .await;
        assert_eq!(
            response,
            IpcResponse::Ok {
                message: "stopped receive".into()
            }
        );
        service.shutdown().await;
    }
}
