//! Channel credential acquisition.
//!
//! A channel token is scoped to one channel and one participant identity and
//! is issued by an HTTP endpoint guarded by the identity authority:
//!
//! ```text
//! POST <token_endpoint>
//! Authorization: Bearer <identity proof>
//! {"channelName": "...", "uid": "..."}
//!
//! 200 {"token": "..."}
//! ```
//!
//! The identity proof comes from an [`IdentityProvider`] (the signed-in
//! user's session) or from an override supplied by the caller. A missing or
//! rejected proof is an authentication failure and is never retried here:
//! only a fresh sign-in can fix it.
//!
//! # Security
//!
//! - Proofs and tokens are held as `SecretString` and never logged
//! - Error bodies are logged at trace level only
//! - HTTP timeouts prevent hanging joins

use crate::config::ControllerConfig;
use crate::observability::metrics::record_token_request;

use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use common::types::{ChannelName, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, trace, warn};

/// Connect timeout for the credential endpoint.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that can occur while acquiring a channel token.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// No signed-in identity is available.
    #[error("No authenticated identity available")]
    NotAuthenticated,

    /// The endpoint rejected the identity proof (401, 403).
    #[error("Authentication rejected: {0}")]
    AuthenticationRejected(String),

    /// Network failure, server error or unexpected status.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// The response body could not be understood.
    #[error("Invalid token response: {0}")]
    InvalidResponse(String),

    /// The HTTP client could not be built.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl TokenError {
    /// Whether the failure can only be fixed by signing in again.
    #[must_use]
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            TokenError::NotAuthenticated | TokenError::AuthenticationRejected(_)
        )
    }
}

/// The external identity authority holding the signed-in user's session.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Current identity proof (a bearer token), or `None` when signed out.
    async fn identity_proof(&self) -> Option<SecretString>;
}

/// Produces short-lived channel credentials.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Fetch a token for `uid` in `channel`.
    ///
    /// `proof_override` replaces the identity provider's proof when the
    /// caller already holds a fresh one.
    async fn fetch_token(
        &self,
        channel: &ChannelName,
        uid: &UserId,
        proof_override: Option<&SecretString>,
    ) -> Result<SecretString, TokenError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest<'a> {
    channel_name: &'a str,
    uid: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// [`TokenSource`] backed by the credential-issuing HTTP endpoint.
#[derive(Clone)]
pub struct HttpTokenProvider {
    http_client: reqwest::Client,
    endpoint: String,
    identity: Arc<dyn IdentityProvider>,
}

impl std::fmt::Debug for HttpTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTokenProvider")
            .field("endpoint", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl HttpTokenProvider {
    /// Create a provider for the endpoint in `config`.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Configuration` if the HTTP client cannot be built.
    pub fn new(
        config: &ControllerConfig,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<Self, TokenError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.token_http_timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| TokenError::Configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            endpoint: config.token_endpoint.clone(),
            identity,
        })
    }

    async fn request_token(
        &self,
        channel: &ChannelName,
        uid: &UserId,
        proof: &SecretString,
    ) -> Result<SecretString, TokenError> {
        let body = TokenRequest {
            channel_name: channel.as_str(),
            uid: uid.as_str(),
        };

        let response = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(proof.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                debug!(target: "session.token", error = %e, "Token request failed");
                TokenError::HttpError(e.to_string())
            })?;

        let status = response.status();

        if status.is_success() {
            let parsed: TokenResponse = response.json().await.map_err(|e| {
                warn!(target: "session.token", error = %e, "Failed to parse token response");
                TokenError::InvalidResponse(e.to_string())
            })?;

            if parsed.token.is_empty() {
                return Err(TokenError::InvalidResponse("empty token".to_string()));
            }

            Ok(SecretString::from(parsed.token))
        } else if status.as_u16() == 401 || status.as_u16() == 403 {
            let body = response.text().await.unwrap_or_else(|e| {
                trace!(target: "session.token", error = %e, "Failed to read error response body");
                "<failed to read body>".to_string()
            });
            warn!(
                target: "session.token",
                status = %status,
                "Identity proof rejected by token endpoint"
            );
            trace!(target: "session.token", body = %body, "Rejection response body");
            Err(TokenError::AuthenticationRejected(format!("Status {status}")))
        } else if status.is_server_error() {
            warn!(target: "session.token", status = %status, "Token endpoint returned server error");
            Err(TokenError::HttpError(format!("Token endpoint server error: {status}")))
        } else {
            warn!(target: "session.token", status = %status, "Unexpected response from token endpoint");
            Err(TokenError::HttpError(format!("Unexpected status: {status}")))
        }
    }
}

#[async_trait]
impl TokenSource for HttpTokenProvider {
    #[instrument(skip_all, fields(channel = %channel, uid = %uid))]
    async fn fetch_token(
        &self,
        channel: &ChannelName,
        uid: &UserId,
        proof_override: Option<&SecretString>,
    ) -> Result<SecretString, TokenError> {
        let proof = match proof_override {
            Some(proof) => proof.clone(),
            None => match self.identity.identity_proof().await {
                Some(proof) => proof,
                None => {
                    warn!(target: "session.token", "No signed-in identity, cannot request channel token");
                    record_token_request("auth_rejected");
                    return Err(TokenError::NotAuthenticated);
                }
            },
        };

        let result = self.request_token(channel, uid, &proof).await;

        match &result {
            Ok(_) => {
                debug!(target: "session.token", "Channel token acquired");
                record_token_request("success");
            }
            Err(e) if e.is_authentication() => record_token_request("auth_rejected"),
            Err(_) => record_token_request("error"),
        }

        result
    }
}
