//! HTTP-01 challenge responder.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::transport::BoxError;

/// Makes a key authorization reachable at
/// `/.well-known/acme-challenge/{token}` for the CA to fetch.
#[async_trait]
pub trait ChallengeResponder: Send + Sync {
    async fn publish(&self, token: &str, key_authorization: &str) -> Result<(), BoxError>;

    async fn withdraw(&self, token: &str) -> Result<(), BoxError>;
}

/// In-process token table served by the HTTP server's challenge route.
///
/// Clones share the same table.
#[derive(Debug, Default, Clone)]
pub struct ChallengeStore {
    tokens: Arc<DashMap<String, String>>,
}

impl ChallengeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, token: &str) -> Option<String> {
        self.tokens.get(token).map(|v| v.value().clone())
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl ChallengeResponder for ChallengeStore {
    async fn publish(&self, token: &str, key_authorization: &str) -> Result<(), BoxError> {
        tracing::debug!(token = %token, "Publishing challenge token");
        self.tokens
            .insert(token.to_string(), key_authorization.to_string());
        Ok(())
    }

    async fn withdraw(&self, token: &str) -> Result<(), BoxError> {
        tracing::debug!(token = %token, "Withdrawing challenge token");
        self.tokens.remove(token);
        Ok(())
    }
}
