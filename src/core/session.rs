use std::path::PathBuf;
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};
use super::errors::{Result, SessionError};

/// Credentials and identity of the logged in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub auth_token: String,
    pub user_name: String,
    pub user_email: String,
}

/// Session state shared by every component.
///
/// Set at login with [`SessionContext::init`], read by each authorized call and
/// by channel authentication, wiped by [`SessionContext::clear`]. When a state
/// file is configured the identity survives restarts.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    inner: Arc<RwLock<Option<SessionIdentity>>>,
    state_file: Option<PathBuf>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state_file(state_file: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(None)),
            state_file: Some(state_file.into()),
        }
    }

    pub async fn init(
        &self,
        auth_token: impl Into<String>,
        user_name: impl Into<String>,
        user_email: impl Into<String>,
    ) -> Result<()> {
        let identity = SessionIdentity {
            auth_token: auth_token.into(),
            user_name: user_name.into(),
            user_email: user_email.into(),
        };

        if identity.auth_token.is_empty() {
            return Err(SessionError::InvalidInput("Empty auth token".to_string()));
        }

        self.save_state(&identity).await?;
        info!(user_email = %identity.user_email, "session initialized");
        *self.inner.write().await = Some(identity);

        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        self.inner.write().await.take();

        if let Some(path) = &self.state_file {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }

        info!("session cleared");
        Ok(())
    }

    pub async fn identity(&self) -> Option<SessionIdentity> {
        self.inner.read().await.clone()
    }

    pub async fn token(&self) -> Option<String> {
        self.inner.read().await.as_ref().map(|identity| identity.auth_token.clone())
    }

    /// Token for an authorized call, `Unauthorized` when logged out.
    pub async fn require_token(&self) -> Result<String> {
        self.token()
            .await
            .ok_or_else(|| SessionError::unauthorized("No auth token, login required"))
    }

    pub async fn user_email(&self) -> Option<String> {
        self.inner.read().await.as_ref().map(|identity| identity.user_email.clone())
    }

    pub async fn user_name(&self) -> Option<String> {
        self.inner.read().await.as_ref().map(|identity| identity.user_name.clone())
    }

    pub async fn is_authenticated(&self) -> bool {
        self.inner.read().await.is_some()
    }

    /// Reload the identity from the state file. Returns whether one was found.
    pub async fn restore(&self) -> Result<bool> {
        let Some(path) = &self.state_file else {
            return Ok(false);
        };

        if !tokio::fs::try_exists(path).await? {
            return Ok(false);
        }

        let data = tokio::fs::read_to_string(path).await?;
        let identity: SessionIdentity = serde_json::from_str(&data)?;
        debug!(path = %path.display(), "session restored");
        *self.inner.write().await = Some(identity);

        Ok(true)
    }

    async fn save_state(&self, identity: &SessionIdentity) -> Result<()> {
        if let Some(path) = &self.state_file {
            let data = serde_json::to_string_pretty(identity)?;
            tokio::fs::write(path, data).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_and_clear() {
        let session = SessionContext::new();
        assert!(session.require_token().await.unwrap_err().is_unauthorized());

        session.init("tok", "Test User", "a@x.com").await.unwrap();
        assert_eq!(session.token().await.as_deref(), Some("tok"));
        assert_eq!(session.user_email().await.as_deref(), Some("a@x.com"));

        session.clear().await.unwrap();
        assert!(session.token().await.is_none());
        assert!(!session.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_empty_token_rejected() {
        let session = SessionContext::new();
        let result = session.init("", "Test User", "a@x.com").await;
        assert!(matches!(result, Err(SessionError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_persist_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let session = SessionContext::with_state_file(&path);
        session.init("tok", "Test User", "a@x.com").await.unwrap();

        let restored = SessionContext::with_state_file(&path);
        assert!(restored.restore().await.unwrap());
        assert_eq!(restored.identity().await, session.identity().await);

        restored.clear().await.unwrap();
        assert!(!path.exists());
        assert!(!SessionContext::with_state_file(&path).restore().await.unwrap());
    }
}
