use crate::{Error, Result};
use async_trait::async_trait;
use mockall::automock;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// The application under test, as resolved at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetIdentity {
    pub guid: Uuid,
    pub url: String,
}

#[automock]
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Fetches a fresh auth token; may block while the provider refreshes.
    async fn current_token(&self) -> Result<String>;

    async fn resolve_target(&self, app_name: &str) -> Result<TargetIdentity>;
}

/// Token snapshot tagged with the refresh that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub generation: u64,
}

/// The one auth token shared by every worker.
///
/// Readers get a cloned snapshot taken under the read lock. Refreshes hold the
/// write lock for the whole provider call, so concurrent refreshes queue up
/// and each one observes the result of the previous.
#[derive(Debug)]
pub struct SharedCredential {
    inner: RwLock<Credential>,
}

impl SharedCredential {
    pub fn new(token: String) -> Self {
        Self {
            inner: RwLock::new(Credential {
                token,
                generation: 0,
            }),
        }
    }

    pub async fn snapshot(&self) -> Credential {
        self.inner.read().await.clone()
    }

    /// Replaces the token unless someone already refreshed it after `seen`.
    ///
    /// Workers that lose their stream at the same moment end up sharing a
    /// single provider call instead of each fetching a token of their own.
    pub async fn refresh(
        &self,
        seen: &Credential,
        provider: &dyn CredentialProvider,
    ) -> Result<Credential> {
        let mut current = self.inner.write().await;
        if current.generation != seen.generation {
            return Ok(current.clone());
        }

        let token = provider
            .current_token()
            .await
            .map_err(|err| Error::CredentialRefresh(Box::new(err)))?;
        current.token = token;
        current.generation += 1;
        info!(generation = current.generation, "auth token refreshed");
        metrics::counter!("router_probe_token_refreshed").increment(1);

        Ok(current.clone())
    }
}
