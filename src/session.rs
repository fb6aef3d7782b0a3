use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{RwLock, watch};
use tracing::warn;

use crate::error::{Error, Result};
use crate::records::{Session, User};

/// Shared handle to the signed-in session.
///
/// Components receive a clone instead of reaching for global state, and
/// anything that renders auth-dependent UI subscribes to the watch channel to
/// hear sign-in and sign-out as they happen. Optionally backed by a JSON file
/// so a session survives process restarts.
#[derive(Clone)]
pub struct SessionContext {
    inner: Arc<RwLock<Option<Session>>>,
    changes: Arc<watch::Sender<Option<User>>>,
    file: Option<PathBuf>,
}

impl SessionContext {
    /// In-memory only, starts signed out.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            inner: Arc::new(RwLock::new(None)),
            changes: Arc::new(tx),
            file: None,
        }
    }

    /// Persists the session to `file` on change and can restore it later.
    pub fn with_file(file: PathBuf) -> Self {
        let mut ctx = Self::new();
        ctx.file = Some(file);
        ctx
    }

    /// Load a previously persisted session, if any. Returns whether one was
    /// found. A corrupt file is treated as signed out.
    pub async fn restore(&self) -> Result<bool> {
        let Some(file) = &self.file else {
            return Ok(false);
        };
        let raw = match tokio::fs::read_to_string(file).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => {
                return Err(Error::Other(format!(
                    "cannot read session file {}: {e}",
                    file.display()
                )));
            }
        };
        match serde_json::from_str::<Session>(&raw) {
            Ok(session) => {
                let user = session.user.clone();
                *self.inner.write().await = Some(session);
                self.changes.send_replace(Some(user));
                Ok(true)
            }
            Err(e) => {
                warn!("discarding unreadable session file: {e}");
                Ok(false)
            }
        }
    }

    pub async fn set(&self, session: Session) {
        let user = session.user.clone();
        if let Some(file) = &self.file {
            match serde_json::to_string_pretty(&session) {
                Ok(json) => {
                    if let Some(parent) = file.parent()
                        && !parent.as_os_str().is_empty()
                        && let Err(e) = tokio::fs::create_dir_all(parent).await
                    {
                        warn!("cannot create session dir {}: {e}", parent.display());
                    }
                    if let Err(e) = tokio::fs::write(file, json).await {
                        warn!("cannot persist session to {}: {e}", file.display());
                    }
                }
                Err(e) => warn!("cannot serialize session: {e}"),
            }
        }
        *self.inner.write().await = Some(session);
        self.changes.send_replace(Some(user));
    }

    pub async fn clear(&self) {
        if let Some(file) = &self.file
            && let Err(e) = tokio::fs::remove_file(file).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!("cannot remove session file {}: {e}", file.display());
        }
        *self.inner.write().await = None;
        self.changes.send_replace(None);
    }

    pub async fn current(&self) -> Option<Session> {
        self.inner.read().await.clone()
    }

    pub async fn access_token(&self) -> Option<String> {
        self.inner
            .read()
            .await
            .as_ref()
            .map(|s| s.access_token.clone())
    }

    pub async fn user(&self) -> Option<User> {
        self.inner.read().await.as_ref().map(|s| s.user.clone())
    }

    pub async fn is_signed_in(&self) -> bool {
        self.inner.read().await.is_some()
    }

    /// Auth-change feed. The current value is the signed-in user, if any.
    pub fn subscribe(&self) -> watch::Receiver<Option<User>> {
        self.changes.subscribe()
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: &str) -> Session {
        Session {
            access_token: format!("token-{id}"),
            refresh_token: Some(format!("refresh-{id}")),
            expires_in: Some(3600),
            user: User {
                id: id.to_string(),
                email: Some(format!("{id}@example.com")),
            },
        }
    }

    #[tokio::test]
    async fn subscribers_see_sign_in_and_out() {
        let ctx = SessionContext::new();
        let mut rx = ctx.subscribe();
        assert!(rx.borrow().is_none());

        ctx.set(session("u1")).await;
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().as_ref().map(|u| u.id.clone()), Some("u1".into()));

        ctx.clear().await;
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_none());
    }

    #[tokio::test]
    async fn persists_and_restores_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("state").join("session.json");

        let ctx = SessionContext::with_file(file.clone());
        ctx.set(session("u2")).await;
        assert!(file.exists());

        let restored = SessionContext::with_file(file.clone());
        assert!(restored.restore().await.unwrap());
        assert_eq!(
            restored.user().await.map(|u| u.id),
            Some("u2".to_string())
        );

        restored.clear().await;
        assert!(!file.exists());
        let empty = SessionContext::with_file(file);
        assert!(!empty.restore().await.unwrap());
    }

    #[tokio::test]
    async fn corrupt_session_file_reads_as_signed_out() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("session.json");
        tokio::fs::write(&file, "{not json").await.unwrap();

        let ctx = SessionContext::with_file(file);
        assert!(!ctx.restore().await.unwrap());
        assert!(!ctx.is_signed_in().await);
    }
}
