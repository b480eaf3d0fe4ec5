use async_trait::async_trait;
use log::{debug, warn};
use std::sync::{Arc, RwLock};

/// Supplies a credential for the signaling connection. Implementations
/// usually hit the app backend; they must be safe to call repeatedly.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn load_token(&self) -> Result<String, anyhow::Error>;
}

/// Decorator that remembers the last token the delegate produced, so an
/// expired cache can be told apart from a provider that never loaded.
pub struct CacheableTokenProvider {
    delegate: Arc<dyn TokenProvider>,
    cached: RwLock<String>,
}

impl CacheableTokenProvider {
    pub fn new(delegate: Arc<dyn TokenProvider>) -> Self {
        Self {
            delegate,
            cached: RwLock::new(String::new()),
        }
    }

    pub fn cached_token(&self) -> String {
        self.cached.read().unwrap().clone()
    }
}

#[async_trait]
impl TokenProvider for CacheableTokenProvider {
    async fn load_token(&self) -> Result<String, anyhow::Error> {
        let token = self.delegate.load_token().await?;
        *self.cached.write().unwrap() = token.clone();
        Ok(token)
    }
}

/// Owns the credential the connection presents and its refresh lifecycle.
/// All reads are cheap; only `load_sync` goes back to the provider.
#[derive(Default)]
pub struct TokenManager {
    provider: RwLock<Option<Arc<dyn TokenProvider>>>,
    token: RwLock<String>,
}

impl TokenManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_token_provider(&self, provider: Arc<dyn TokenProvider>) {
        *self.provider.write().unwrap() = Some(provider);
        self.expire_token();
    }

    pub fn has_token_provider(&self) -> bool {
        self.provider.read().unwrap().is_some()
    }

    /// The cached token; empty when expired or never loaded.
    pub fn get_token(&self) -> String {
        self.token.read().unwrap().clone()
    }

    pub fn has_token(&self) -> bool {
        !self.token.read().unwrap().is_empty()
    }

    /// Push a credential obtained out of band (e.g. the caller rotated it).
    pub fn update_token(&self, token: impl Into<String>) {
        *self.token.write().unwrap() = token.into();
    }

    /// Drop the cached token so the next load must go to the provider.
    pub fn expire_token(&self) {
        self.token.write().unwrap().clear();
    }

    /// Force a provider round-trip. Returns the refreshed token, or an
    /// empty string when no provider is installed or the load failed.
    /// Callers branch on emptiness, they never see the provider error.
    pub async fn load_sync(&self) -> String {
        let provider = self.provider.read().unwrap().clone();
        let Some(provider) = provider else {
            warn!(target: "callsig::token", "no token provider installed, returning empty token");
            return String::new();
        };
        match provider.load_token().await {
            Ok(token) => {
                debug!(target: "callsig::token", "token refreshed");
                *self.token.write().unwrap() = token.clone();
                token
            }
            Err(err) => {
                warn!(target: "callsig::token", "token load failed: {err:#}");
                String::new()
            }
        }
    }

    /// Make sure a token is cached before dialing, loading one if needed.
    pub async fn ensure_token_loaded(&self) {
        if !self.has_token() {
            self.load_sync().await;
        }
    }
}
