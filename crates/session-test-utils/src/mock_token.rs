//! Mock token source and identity authority.

use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use common::types::{ChannelName, UserId};
use session_controller::{IdentityProvider, TokenError, TokenSource};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// One recorded `fetch_token` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRequestRecord {
    pub channel: String,
    pub uid: String,
    /// The override proof, exposed for assertions.
    pub proof_override: Option<String>,
}

/// Token source returning scripted results.
pub struct MockTokenSource {
    /// Results to return in order; `Ok("test-token")` once exhausted.
    responses: Mutex<VecDeque<Result<String, TokenError>>>,
    /// Error returned on every call when set.
    always_fail: Option<TokenError>,
    call_count: AtomicUsize,
    requests: Mutex<Vec<TokenRequestRecord>>,
}

impl MockTokenSource {
    /// Create a mock that always issues a token.
    pub fn accepting() -> Self {
        Self::with_responses(Vec::new())
    }

    /// Create a mock that always fails with `error`.
    pub fn failing(error: TokenError) -> Self {
        Self {
            always_fail: Some(error),
            ..Self::accepting()
        }
    }

    /// Create a mock that returns `responses` in sequence.
    pub fn with_responses(responses: Vec<Result<String, TokenError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            always_fail: None,
            call_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Get the number of calls made.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<TokenRequestRecord> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TokenSource for MockTokenSource {
    async fn fetch_token(
        &self,
        channel: &ChannelName,
        uid: &UserId,
        proof_override: Option<&SecretString>,
    ) -> Result<SecretString, TokenError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(TokenRequestRecord {
            channel: channel.as_str().to_string(),
            uid: uid.as_str().to_string(),
            proof_override: proof_override.map(|p| p.expose_secret().to_string()),
        });

        if let Some(error) = &self.always_fail {
            return Err(error.clone());
        }

        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(Ok(token)) => Ok(SecretString::from(token)),
            Some(Err(e)) => Err(e),
            None => Ok(SecretString::from("test-token")),
        }
    }
}

/// Identity authority whose sign-in state the test controls.
pub struct MockIdentityProvider {
    proof: Mutex<Option<String>>,
    call_count: AtomicUsize,
}

impl MockIdentityProvider {
    /// A signed-in user holding `proof`.
    pub fn signed_in(proof: &str) -> Self {
        Self {
            proof: Mutex::new(Some(proof.to_string())),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn signed_out() -> Self {
        Self {
            proof: Mutex::new(None),
            call_count: AtomicUsize::new(0),
        }
    }

    /// Simulate the identity session expiring.
    pub fn sign_out(&self) {
        *self.proof.lock().unwrap() = None;
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    async fn identity_proof(&self) -> Option<SecretString> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.proof.lock().unwrap().clone().map(SecretString::from)
    }
}
