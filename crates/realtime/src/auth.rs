//! Login and persisted credentials.
//!
//! [`AuthApi::login`] exchanges a username and password for a bearer
//! token via `POST {api}/auth/login`. The token lives in a
//! [`TokenStore`], optionally backed by a JSON file so the operator does
//! not have to log in on every start. Any 401 from an authenticated call
//! clears the store.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

/// Credentials as persisted on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    pub token_type: String,
    /// Opaque user record returned by the backend.
    #[serde(default)]
    pub user: Option<serde_json::Value>,
    pub saved_at: chrono::DateTime<chrono::Utc>,
}

/// Response body of `POST /auth/login`.
#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub user: Option<serde_json::Value>,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Login rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Token storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Token encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Username and password are required")]
    MissingCredentials,
}

/// Shared, optionally file-backed token holder. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct TokenStore {
    path: Option<PathBuf>,
    current: Arc<Mutex<Option<StoredToken>>>,
}

impl TokenStore {
    /// A store that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open a file-backed store. A missing file yields an empty store; an
    /// unreadable one is logged and ignored.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let current = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<StoredToken>(&text) {
                Ok(token) => Some(token),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring corrupt token file");
                    None
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Could not read token file");
                None
            }
        };
        Self {
            path: Some(path),
            current: Arc::new(Mutex::new(current)),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn current(&self) -> Option<StoredToken> {
        self.lock().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.lock().as_ref().map(|t| t.access_token.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock().is_some()
    }

    /// Replace the held token and persist it.
    pub fn save(&self, token: StoredToken) -> Result<(), AuthError> {
        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, serde_json::to_vec_pretty(&token)?)?;
        }
        *self.lock() = Some(token);
        Ok(())
    }

    /// Forget the token, in memory and on disk.
    pub fn clear(&self) {
        *self.lock() = None;
        if let Some(path) = &self.path {
            match std::fs::remove_file(path) {
                Ok(()) => tracing::info!(path = %path.display(), "Cleared stored credentials"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Could not remove token file")
                }
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<StoredToken>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// HTTP client for the login endpoint.
pub struct AuthApi {
    client: reqwest::Client,
    api_url: String,
    tokens: TokenStore,
}

impl AuthApi {
    pub fn new(api_url: impl Into<String>, tokens: TokenStore) -> Self {
        Self::with_client(reqwest::Client::new(), api_url, tokens)
    }

    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>, tokens: TokenStore) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    /// Log in and persist the returned token.
    pub async fn login(&self, username: &str, password: &str) -> Result<StoredToken, AuthError> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }

        let response = self
            .client
            .post(format!("{}/auth/login", self.api_url))
            .json(&serde_json::json!({
                "username": username,
                "password": password,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let login: LoginResponse = response.json().await?;
        let token = StoredToken {
            access_token: login.access_token,
            token_type: login.token_type,
            user: login.user,
            saved_at: chrono::Utc::now(),
        };
        self.tokens.save(token.clone())?;
        tracing::info!(username, "Logged in");
        Ok(token)
    }

    /// Reuse the stored token when present, otherwise log in.
    pub async fn ensure_logged_in(
        &self,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<StoredToken, AuthError> {
        if let Some(token) = self.tokens.current() {
            tracing::debug!("Using stored credentials");
            return Ok(token);
        }
        match (username, password) {
            (Some(u), Some(p)) => self.login(u, p).await,
            _ => Err(AuthError::MissingCredentials),
        }
    }

    pub fn logout(&self) {
        self.tokens.clear();
    }
}
