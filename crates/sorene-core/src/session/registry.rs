//! 会话注册表
//!
//! 每个角色同时最多一个会话。启动新会话前取消并等待同角色的旧会话，
//! 保证固定端口已经释放。

use super::{
    Receiver, Role, SessionHandle, SessionStatus, Sender, TransferResult, parse_peer_address,
};
use crate::config::TransferSettings;
use crate::error::Result;
use crate::io::Progress;
use log::info;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;

pub struct SessionRegistry {
    settings: TransferSettings,
    sessions: Mutex<HashMap<Role, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new(settings: TransferSettings) -> Self {
        Self {
            settings,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    pub async fn start_send(
        &self,
        root: impl Into<PathBuf>,
        entries: Vec<String>,
        peer: &str,
    ) -> Result<SessionHandle> {
        // 地址非法时不影响正在运行的会话
        parse_peer_address(peer)?;

        let mut sessions = self.sessions.lock().await;
        if let Some(previous) = sessions.remove(&Role::Send) {
            retire(previous).await;
        }
        let handle = Sender::new(self.settings.clone()).start(root, entries, peer)?;
        sessions.insert(Role::Send, handle.clone());
        Ok(handle)
    }

    pub async fn start_receive(&self, dest: impl Into<PathBuf>) -> Result<SessionHandle> {
        let mut sessions = self.sessions.lock().await;
        if let Some(previous) = sessions.remove(&Role::Receive) {
            retire(previous).await;
        }
        let handle = Receiver::new(self.settings.clone()).start(dest).await?;
        sessions.insert(Role::Receive, handle.clone());
        Ok(handle)
    }

    /// 取消指定角色的会话，返回是否有未结束的会话被取消
    pub async fn cancel(&self, role: Role) -> bool {
        let sessions = self.sessions.lock().await;
        match sessions.get(&role) {
            Some(handle) if !handle.is_finished() => {
                info!("Cancelling {} session {}", role, handle.id());
                handle.cancel();
                true
            }
            _ => false,
        }
    }

    pub async fn handle(&self, role: Role) -> Option<SessionHandle> {
        self.sessions.lock().await.get(&role).cloned()
    }

    /// 所有已登记的会话（含已结束的）
    pub async fn handles(&self) -> Vec<SessionHandle> {
        let sessions = self.sessions.lock().await;
        [Role::Send, Role::Receive]
            .iter()
            .filter_map(|role| sessions.get(role).cloned())
            .collect()
    }

    pub async fn progress(&self, role: Role) -> Option<Progress> {
        self.handle(role).await.map(|h| h.progress())
    }

    pub async fn status(&self, role: Role) -> Option<SessionStatus> {
        self.handle(role).await.map(|h| h.status())
    }

    /// 会话结果；没有会话或尚未结束时为 `None`
    pub async fn result(&self, role: Role) -> Option<TransferResult> {
        self.handle(role).await.and_then(|h| h.result())
    }
}

async fn retire(previous: SessionHandle) {
    if !previous.is_finished() {
        info!(
            "Replacing running {} session {}",
            previous.role(),
            previous.id()
        );
        previous.cancel();
    }
    previous.wait().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, TransferError};
    use std::net::{IpAddr, Ipv4Addr};

    fn local_settings() -> TransferSettings {
        TransferSettings {
            port: 0,
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            accept_poll_ms: 100,
            ..TransferSettings::default()
        }
    }

    #[tokio::test]
    async fn test_empty_registry() {
        let registry = SessionRegistry::new(local_settings());
        assert!(registry.handle(Role::Send).await.is_none());
        assert!(!registry.cancel(Role::Receive).await);
        assert!(registry.result(Role::Receive).await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_address_keeps_previous_session() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SessionRegistry::new(local_settings());
        let first = registry.start_receive(dir.path()).await.unwrap();

        let err = registry
            .start_send(dir.path(), vec![], "not-an-ip")
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidAddress(_)));
        assert!(!first.is_finished());
        assert!(registry.handle(Role::Send).await.is_none());

        assert!(registry.cancel(Role::Receive).await);
        first.wait().await;
    }

    #[tokio::test]
    async fn test_starting_a_role_replaces_the_previous_session() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SessionRegistry::new(local_settings());

        let first = registry.start_receive(dir.path()).await.unwrap();
        let second = registry.start_receive(dir.path()).await.unwrap();
        assert_ne!(first.id(), second.id());

        let replaced = first.result().expect("previous session finished");
        assert_eq!(replaced.error_kind, Some(ErrorKind::Cancelled));
        assert!(!second.is_finished());
        assert_eq!(
            registry.handle(Role::Receive).await.map(|h| h.id()),
            Some(second.id())
        );

        assert!(registry.cancel(Role::Receive).await);
        assert_eq!(second.wait().await.error_kind, Some(ErrorKind::Cancelled));
        assert!(!registry.cancel(Role::Receive).await);
    }
}
