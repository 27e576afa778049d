use async_trait::async_trait;
use tokio::sync::RwLock;
use url::Url;

use crate::matrix::{command::{self, Command}, error::MatrixError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Caller-owned storage for the access/refresh token pair.
///
/// The client reads through this on every call and writes refreshed tokens
/// back; it never keeps its own copy beyond a single `execute`.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn get(&self, kind: TokenKind) -> Option<String>;
    async fn set(&self, kind: TokenKind, value: String);
}

/// Builds the command that exchanges a refresh token for a new pair.
pub trait RefreshCommandBuilder: Send + Sync {
    fn build(&self, server_url: &Url, refresh_token: &str) -> Result<Command, MatrixError>;
}

impl<F> RefreshCommandBuilder for F
where
    F: Fn(&Url, &str) -> Result<Command, MatrixError> + Send + Sync,
{
    fn build(&self, server_url: &Url, refresh_token: &str) -> Result<Command, MatrixError> {
        self(server_url, refresh_token)
    }
}

/// `POST /_matrix/client/v3/refresh`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardRefresh;

impl RefreshCommandBuilder for StandardRefresh {
    fn build(&self, server_url: &Url, refresh_token: &str) -> Result<Command, MatrixError> {
        command::refresh(server_url, refresh_token)
    }
}

/// In-memory token pair, for single-process callers and tests.
#[derive(Debug, Default)]
pub struct MemoryTokens {
    inner: RwLock<(Option<String>, Option<String>)>,
}

impl MemoryTokens {
    pub fn new(access: impl Into<String>, refresh: Option<String>) -> Self {
        Self {
            inner: RwLock::new((Some(access.into()), refresh)),
        }
    }
}

#[async_trait]
impl TokenProvider for MemoryTokens {
    async fn get(&self, kind: TokenKind) -> Option<String> {
        let tokens = self.inner.read().await;
        match kind {
            TokenKind::Access => tokens.0.clone(),
            TokenKind::Refresh => tokens.1.clone(),
        }
    }

    async fn set(&self, kind: TokenKind, value: String) {
        let mut tokens = self.inner.write().await;
        match kind {
            TokenKind::Access => tokens.0 = Some(value),
            TokenKind::Refresh => tokens.1 = Some(value),
        }
    }
}
