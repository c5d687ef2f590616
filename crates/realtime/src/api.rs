//! HTTP client for the control endpoint.
//!
//! Control messages (`start_streaming`, `stop_streaming`,
//! `user_dish_mapping`) are posted as their `{type, data}` envelope to
//! `POST {api}/command`. Success is any 2xx status; the body is ignored.

use async_trait::async_trait;
use traycam_core::wire::ControlCommand;

use crate::auth::TokenStore;

/// Anything that can deliver a control command.
///
/// The driver only sees this trait, so tests can swap in a recorder.
#[async_trait]
pub trait ControlChannel: Send + Sync + 'static {
    async fn send_command(&self, command: &ControlCommand) -> Result<(), ControlApiError>;
}

/// Errors from the control HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum ControlApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend returned a non-2xx status code.
    #[error("Control API error ({status}): {body}")]
    ApiError {
        status: u16,
        /// Raw response body, shown to the operator verbatim.
        body: String,
    },

    /// The command could not be carried over the realtime channel.
    #[error("Realtime channel unavailable: {0}")]
    ChannelClosed(String),

    /// The command could not be encoded for the realtime channel.
    #[error("Command encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl ControlApiError {
    /// Message suitable for the operator's error banner.
    pub fn operator_message(&self) -> String {
        match self {
            Self::ApiError { body, .. } if !body.trim().is_empty() => body.clone(),
            other => other.to_string(),
        }
    }
}

/// HTTP client for the control endpoint.
#[derive(Clone)]
pub struct ControlApi {
    client: reqwest::Client,
    api_url: String,
    tokens: Option<TokenStore>,
}

impl ControlApi {
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8000`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Reuse an existing [`reqwest::Client`] for connection pooling.
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            tokens: None,
        }
    }

    /// Attach bearer credentials from `tokens` to every request. A 401
    /// response clears the store.
    pub fn with_tokens(mut self, tokens: TokenStore) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// `POST {api}/command` with the command envelope.
    pub async fn post_command(&self, command: &ControlCommand) -> Result<(), ControlApiError> {
        let mut request = self
            .client
            .post(format!("{}/command", self.api_url))
            .json(command);
        if let Some(token) = self.tokens.as_ref().and_then(TokenStore::access_token) {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        check_status(response, self.tokens.as_ref()).await
    }
}

// ---- response helpers shared by the HTTP clients ----

/// Ensure the response has a success status code. A 401 also drops the
/// stored credentials.
pub(crate) async fn ensure_success(
    response: reqwest::Response,
    tokens: Option<&TokenStore>,
) -> Result<reqwest::Response, ControlApiError> {
    let status = response.status();
    if !status.is_success() {
        if status == reqwest::StatusCode::UNAUTHORIZED {
            if let Some(tokens) = tokens {
                tokens.clear();
            }
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        return Err(ControlApiError::ApiError {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

/// Check the status and deserialize the JSON body.
pub(crate) async fn parse_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    tokens: Option<&TokenStore>,
) -> Result<T, ControlApiError> {
    let response = ensure_success(response, tokens).await?;
    Ok(response.json::<T>().await?)
}

/// Assert the response has a success status code, discarding the body.
async fn check_status(
    response: reqwest::Response,
    tokens: Option<&TokenStore>,
) -> Result<(), ControlApiError> {
    ensure_success(response, tokens).await?;
    Ok(())
}

#[async_trait]
impl ControlChannel for ControlApi {
    async fn send_command(&self, command: &ControlCommand) -> Result<(), ControlApiError> {
        tracing::debug!(kind = command.kind(), "Posting control command");
        self.post_command(command).await
    }
}
