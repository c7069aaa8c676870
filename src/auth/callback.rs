//! Authorization callback handling
//!
//! The authorization server redirects back to the dashboard with either
//! `?code=...` or `?error=...`. [`CallbackHandler`] turns that redirect into a
//! stored Token Record and reports progress as a [`CallbackState`].

use tokio::sync::watch;

use super::oauth::OAuthClient;
use crate::error::{AuthError, AuthErrorKind, AuthResult};

/// Progress of one callback
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CallbackState {
    /// Nothing happened yet
    #[default]
    Idle,
    /// Validating parameters or exchanging the code
    Processing,
    /// Token Record stored; a redirect to the landing page follows
    Success,
    /// Terminal failure
    Error {
        /// Error classification
        kind: AuthErrorKind,
        /// Message to show the user
        message: String,
        /// Whether a retry button should be offered
        retryable: bool,
    },
}

/// Input of the callback state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackEvent {
    /// Processing began
    Started,
    /// Session established
    Succeeded,
    /// Processing failed
    Failed {
        /// Error classification
        kind: AuthErrorKind,
        /// Message to show the user
        message: String,
    },
}

impl CallbackState {
    /// Pure transition function
    ///
    /// Events that make no sense in the current state leave it unchanged.
    #[must_use]
    pub fn reduce(self, event: CallbackEvent) -> Self {
        match (self, event) {
            (_, CallbackEvent::Started) => Self::Processing,
            (Self::Processing, CallbackEvent::Succeeded) => Self::Success,
            (Self::Processing, CallbackEvent::Failed { kind, message }) => Self::Error {
                retryable: kind == AuthErrorKind::CodeExpired,
                kind,
                message,
            },
            (state, event) => {
                tracing::debug!(?state, ?event, "Ignoring out-of-order callback event");
                state
            }
        }
    }

    /// Whether a loading indicator should be shown
    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Processing)
    }

    /// Whether the callback has finished, one way or the other
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error { .. })
    }

    /// Whether the failure was an expired authorization code
    #[must_use]
    pub fn is_code_expired(&self) -> bool {
        matches!(
            self,
            Self::Error {
                kind: AuthErrorKind::CodeExpired,
                ..
            }
        )
    }

    /// Error message, if failed
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Error { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// Query parameters of the redirect back from the authorization server
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    /// Authorization code
    pub code: Option<String>,
    /// Error code reported by the authorization server
    pub error: Option<String>,
    /// Error description reported by the authorization server
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Parse a full callback URL or a bare query string (`?code=...`)
    #[must_use]
    pub fn parse(callback: &str) -> Self {
        let query = match url::Url::parse(callback) {
            Ok(url) => url.query().unwrap_or_default().to_string(),
            Err(_) => callback.trim().trim_start_matches('?').to_string(),
        };

        let mut params = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let value = Some(value.into_owned()).filter(|v| !v.is_empty());
            match key.as_ref() {
                "code" => params.code = value,
                "error" => params.error = value,
                "error_description" => params.error_description = value,
                _ => {}
            }
        }
        params
    }
}

/// Drives one redirect back from the authorization server to completion
#[derive(Debug)]
pub struct CallbackHandler {
    client: OAuthClient,
    state: watch::Sender<CallbackState>,
}

impl CallbackHandler {
    /// Create a handler in the `Idle` state
    #[must_use]
    pub fn new(client: OAuthClient) -> Self {
        let (state, _) = watch::channel(CallbackState::Idle);
        Self { client, state }
    }

    /// Get the OAuth client
    #[must_use]
    pub fn client(&self) -> &OAuthClient {
        &self.client
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> CallbackState {
        self.state.borrow().clone()
    }

    /// Watch state changes, for rendering
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CallbackState> {
        self.state.subscribe()
    }

    fn dispatch(&self, event: CallbackEvent) -> CallbackState {
        self.state
            .send_modify(|state| *state = std::mem::take(state).reduce(event));
        self.state()
    }

    fn fail(&self, error: &AuthError) -> CallbackState {
        tracing::warn!(kind = ?error.kind(), "Authentication callback failed: {error}");
        self.dispatch(CallbackEvent::Failed {
            kind: error.kind(),
            message: error.to_string(),
        })
    }

    /// Process the redirect at `callback_url`
    ///
    /// Returns `None` without doing anything when another invocation in this
    /// session is already processing a callback. Otherwise returns the final
    /// state; on success the landing page redirect has been issued after the
    /// configured delay.
    ///
    /// The state reflects the login outcome only. The Token Record is stored
    /// before the redirect, so a navigator failure at that point is logged and
    /// the result stays `Success`; the caller can still move on to the landing
    /// page itself.
    pub async fn handle(&self, callback_url: &str) -> Option<CallbackState> {
        let params = CallbackParams::parse(callback_url);

        if let Some(error) = params.error {
            let message = match params.error_description {
                Some(description) => format!("{error}: {description}"),
                None => error,
            };
            self.dispatch(CallbackEvent::Started);
            return Some(self.fail(&AuthError::ProviderDenied(message)));
        }

        let store = self.client.store();
        let guard = match store.try_acquire_processing() {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                tracing::debug!("Callback already being processed, skipping duplicate");
                return None;
            }
            Err(e) => {
                self.dispatch(CallbackEvent::Started);
                return Some(self.fail(&AuthError::from(e)));
            }
        };

        self.dispatch(CallbackEvent::Started);
        let outcome = self.process(params.code).await;
        if outcome.is_err() {
            if let Err(e) = store.clear_pkce_session() {
                tracing::error!("Failed to purge PKCE session: {e}");
            }
        }
        drop(guard);

        match outcome {
            Ok(()) => {
                let state = self.dispatch(CallbackEvent::Succeeded);
                self.redirect_to_landing().await;
                Some(state)
            }
            Err(e) => Some(self.fail(&e)),
        }
    }

    async fn process(&self, code: Option<String>) -> AuthResult<()> {
        let store = self.client.store();
        let pkce = store.pkce_session()?;

        let (code, pkce) = match (code, pkce) {
            (Some(code), Some(pkce)) => (code, pkce),
            (Some(_), None) if self.has_valid_session() => {
                tracing::debug!("Verifier already consumed and session valid, callback is redundant");
                return Ok(());
            }
            _ => return Err(AuthError::MissingParameters),
        };

        let now = self.client.now_millis();
        if let Some(started_at) = pkce.started_at {
            let elapsed = now.saturating_sub(started_at);
            let lifetime =
                u64::try_from(self.client.config().code_lifetime.as_millis()).unwrap_or(u64::MAX);
            if elapsed > lifetime {
                tracing::warn!(elapsed_secs = elapsed / 1000, "Authorization code expired");
                return Err(AuthError::code_expired());
            }
            tracing::debug!(elapsed_secs = elapsed / 1000, "Authorization code within validity window");
        }

        if self.has_valid_session() {
            tracing::debug!("Valid token already stored, skipping exchange");
            store.clear_pkce_session()?;
            return Ok(());
        }

        let record = self.client.exchange_code(&code, &pkce.verifier).await?;
        store.save_token_record(&record)?;
        store.clear_pkce_session()?;

        if let Some(started_at) = pkce.started_at {
            tracing::info!(
                elapsed_ms = self.client.now_millis().saturating_sub(started_at),
                "Authentication completed"
            );
        } else {
            tracing::info!("Authentication completed");
        }
        Ok(())
    }

    fn has_valid_session(&self) -> bool {
        let now = self.client.now_millis();
        self.client
            .store()
            .token_record()
            .ok()
            .flatten()
            .is_some_and(|record| record.is_valid(now))
    }

    async fn redirect_to_landing(&self) {
        let delay = self.client.config().redirect_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let landing_url = &self.client.config().landing_url;
        if let Err(e) = self.client.navigator().navigate(landing_url) {
            tracing::error!(%landing_url, "Redirect to landing page failed: {e}");
        }
    }

    /// Start a new login attempt, offered after an expired code
    ///
    /// # Errors
    ///
    /// Returns the error of [`OAuthClient::initiate_login`].
    pub async fn retry(&self) -> AuthResult<()> {
        tracing::debug!("Retrying login after failed callback");
        self.client.initiate_login().await
    }
}
