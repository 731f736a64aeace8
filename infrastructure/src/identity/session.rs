use application::{ApplicationError, IdentityProvider};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, instrument};

/// Revocable writer identity, like a connected wallet account.
#[derive(Debug, Clone, Default)]
pub struct SessionIdentity {
    current: Arc<RwLock<Option<String>>>,
}

impl SessionIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connected(identity: impl Into<String>) -> Self {
        Self {
            current: Arc::new(RwLock::new(Some(identity.into()))),
        }
    }

    /// Replaces the active identity (e.g. after an account switch).
    #[instrument(skip(self))]
    pub async fn connect(&self, identity: &str) -> Result<(), ApplicationError> {
        let identity = identity.trim();
        if identity.is_empty() {
            return Err(ApplicationError::InvalidInput(
                "Identity cannot be empty".to_string(),
            ));
        }
        *self.current.write().await = Some(identity.to_string());
        info!("Writer identity connected");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn disconnect(&self) {
        *self.current.write().await = None;
        info!("Writer identity disconnected");
    }
}

#[async_trait]
impl IdentityProvider for SessionIdentity {
    async fn current_identity(&self) -> Option<String> {
        self.current.read().await.clone()
    }
}
