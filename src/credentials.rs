//! Credential Provider
//!
//! Bearer credentials are owned by an external auth collaborator. The engine
//! only asks for the current token, asks for a refresh after a 401, and clears
//! it when the refresh fails.

use crate::error::Result;
use async_trait::async_trait;
use std::sync::RwLock;

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Current bearer token, if any.
    async fn get(&self) -> Result<Option<String>>;

    /// Obtain a fresh token after the backend rejected the current one.
    /// `Ok(None)` means no refresh is possible.
    async fn refresh(&self) -> Result<Option<String>>;

    /// Forget the current token.
    async fn clear(&self);
}

/// Fixed token handed over by the caller (CLI flag, env var, tests).
pub struct StaticCredentials {
    token: RwLock<Option<String>>,
}

impl StaticCredentials {
    pub fn new(token: Option<String>) -> Self {
        let token = token.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
        Self {
            token: RwLock::new(token),
        }
    }

    pub fn from_env(var: &str) -> Self {
        Self::new(std::env::var(var).ok())
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn get(&self) -> Result<Option<String>> {
        Ok(self.token.read().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn refresh(&self) -> Result<Option<String>> {
        Ok(None)
    }

    async fn clear(&self) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}
