//! OAuth 2.0 client with PKCE support for RondiTrack authentication

use reqwest::header::ACCEPT;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::token::{
    PkceSession, TokenRecord, TokenResponse, classify_exchange_failure, error_message,
    expires_at_from,
};
use crate::clock::{Clock, SystemClock};
use crate::config::AuthConfig;
use crate::error::{AuthError, AuthResult};
use crate::navigator::{Navigator, SystemBrowser};
use crate::pkce::PkceChallenge;
use crate::storage::{CredentialStore, FileStore, MemoryStore, StorageKey};

/// Time allowed for the authorization server liveness probe
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Builder for [`OAuthClient`]
#[derive(Debug, Default)]
pub struct OAuthClientBuilder {
    config: Option<AuthConfig>,
    store: Option<CredentialStore>,
    navigator: Option<Arc<dyn Navigator>>,
    clock: Option<Arc<dyn Clock>>,
    http_client: Option<reqwest::Client>,
}

impl OAuthClientBuilder {
    /// Create a new builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set custom configuration (default: [`AuthConfig::from_env`])
    #[must_use]
    pub fn config(mut self, config: AuthConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set custom credential store (default: [`FileStore`] + [`MemoryStore`])
    #[must_use]
    pub fn store(mut self, store: CredentialStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Set custom navigator (default: [`SystemBrowser`])
    #[must_use]
    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    /// Set custom clock (default: [`SystemClock`])
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set custom HTTP client
    #[must_use]
    pub fn http_client(mut self, http_client: reqwest::Client) -> Self {
        self.http_client = Some(http_client);
        self
    }

    /// Build the OAuth client
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidConfig` if the configuration does not validate.
    pub fn build(self) -> AuthResult<OAuthClient> {
        let config = self.config.unwrap_or_else(AuthConfig::from_env);
        config.validate()?;

        Ok(OAuthClient {
            config,
            store: self.store.unwrap_or_else(|| {
                CredentialStore::new(Arc::new(FileStore::new()), Arc::new(MemoryStore::new()))
            }),
            navigator: self.navigator.unwrap_or_else(|| Arc::new(SystemBrowser)),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            http_client: self.http_client.unwrap_or_default(),
        })
    }
}

/// OAuth client for RondiTrack authentication
///
/// Cheap to clone; clones share the same store, navigator and clock.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    config: AuthConfig,
    store: CredentialStore,
    navigator: Arc<dyn Navigator>,
    clock: Arc<dyn Clock>,
    http_client: reqwest::Client,
}

impl OAuthClient {
    /// Create a client from environment configuration with default backends
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new() -> AuthResult<Self> {
        Self::builder().build()
    }

    /// Create a builder for custom configuration
    #[must_use]
    pub fn builder() -> OAuthClientBuilder {
        OAuthClientBuilder::new()
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Get the credential store
    #[must_use]
    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub(crate) fn navigator(&self) -> &dyn Navigator {
        &*self.navigator
    }

    pub(crate) fn http_client(&self) -> &reqwest::Client {
        &self.http_client
    }

    pub(crate) fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    /// Start the authorization flow
    ///
    /// Clears leftovers of any earlier attempt, checks that the authorization
    /// server answers, stores a fresh PKCE Session and navigates to the
    /// authorize URL.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::ServiceUnavailable` if the authorization server
    /// cannot be reached; nothing is persisted and no navigation happens in
    /// that case.
    pub async fn initiate_login(&self) -> AuthResult<()> {
        self.store.clear_all()?;

        self.probe_authorization_server().await?;

        let pkce = PkceChallenge::generate(self.config.verifier_length)?;
        self.store.save_pkce_session(&PkceSession {
            verifier: pkce.verifier,
            started_at: Some(self.now_millis()),
        })?;

        let auth_url = self.authorization_url(&pkce.challenge)?;
        tracing::info!(authorize_url = %self.config.authorize_url, "Redirecting to authorization server");

        if let Err(e) = self.navigator.navigate(auth_url.as_str()) {
            self.store.clear_pkce_session()?;
            return Err(e);
        }
        Ok(())
    }

    /// Build the authorization URL with PKCE challenge
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Url` if the configured authorize URL is invalid.
    pub fn authorization_url(&self, code_challenge: &str) -> AuthResult<Url> {
        let mut url = Url::parse(&self.config.authorize_url)?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("code_challenge", code_challenge)
            .append_pair("code_challenge_method", "S256");
        Ok(url)
    }

    /// Check that the authorization server answers at all
    ///
    /// Any HTTP response counts as alive, whatever its status.
    async fn probe_authorization_server(&self) -> AuthResult<()> {
        tracing::debug!(url = %self.config.authorize_url, "Probing authorization server");

        match self
            .http_client
            .head(&self.config.authorize_url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => {
                tracing::debug!(status = %response.status(), "Authorization server reachable");
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Authorization server unreachable: {e}");
                Err(AuthError::service_unavailable(
                    "could not connect to the OAuth2 server, check that it is running",
                ))
            }
        }
    }

    /// Exchange an authorization code for a Token Record
    ///
    /// Nothing is persisted here; the callback handler owns storage.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::CodeExpired` or `AuthError::ExchangeFailed` on a
    /// non-success status, `AuthError::InvalidResponse` when a success body has
    /// no access token, `AuthError::Http` on transport failure.
    pub async fn exchange_code(&self, code: &str, code_verifier: &str) -> AuthResult<TokenRecord> {
        let body = serde_json::json!({
            "grant_type": "code",
            "code": code,
            "redirect_uri": self.config.redirect_uri,
            "client_id": self.config.client_id,
            "code_verifier": code_verifier
        });

        tracing::debug!(token_url = %self.config.token_url, "Exchanging authorization code");
        let response = self
            .http_client
            .post(&self.config.token_url)
            .header(ACCEPT, "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let response_text = response.text().await?;

        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "Token exchange rejected");
            return Err(classify_exchange_failure(status.as_u16(), &response_text));
        }

        let token_response: TokenResponse = serde_json::from_str(&response_text).map_err(|e| {
            AuthError::invalid_response(format!("Failed to parse token response: {e}"))
        })?;

        TokenRecord::from_response(token_response, self.now_millis())
    }

    /// Renew the access token with the stored refresh token
    ///
    /// Any failure logs the user out and returns `false`.
    pub async fn refresh_access_token(&self) -> bool {
        match self.try_refresh().await {
            Ok(()) => {
                tracing::info!("Access token refreshed");
                true
            }
            Err(e) => {
                tracing::warn!("Token refresh failed: {e}");
                self.logout_quietly();
                false
            }
        }
    }

    async fn try_refresh(&self) -> AuthResult<()> {
        let refresh_token = self
            .store
            .get(StorageKey::RefreshToken)?
            .filter(|token| !token.is_empty())
            .ok_or(AuthError::NoRefreshToken)?;

        let body = serde_json::json!({
            "grant_type": self.config.refresh_grant.as_str(),
            "refresh_token": refresh_token,
            "client_id": self.config.client_id
        });

        let response = self
            .http_client
            .post(&self.config.token_url)
            .header(ACCEPT, "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let response_text = response.text().await?;

        if !status.is_success() {
            return Err(AuthError::exchange_failed(error_message(
                status.as_u16(),
                &response_text,
            )));
        }

        let token_response: TokenResponse = serde_json::from_str(&response_text).map_err(|e| {
            AuthError::invalid_response(format!("Failed to parse refresh response: {e}"))
        })?;

        let access_token = token_response
            .access_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| AuthError::invalid_response("refresh returned no access token"))?;
        let expires_at = token_response
            .expires_in
            .map(|seconds| expires_at_from(self.now_millis(), seconds));

        self.store.update_tokens(
            &access_token,
            token_response
                .refresh_token
                .as_deref()
                .filter(|token| !token.is_empty()),
            expires_at,
        )?;
        Ok(())
    }

    /// Log out: purge every credential and go back to the login page
    ///
    /// Safe to call without a session.
    ///
    /// # Errors
    ///
    /// Returns the first storage error hit while purging (every key is still
    /// attempted and the navigation still happens), or a navigation error.
    pub fn logout(&self) -> AuthResult<()> {
        let purged = self.store.clear_all();
        tracing::info!("Logged out");
        self.navigator.navigate(&self.config.login_url)?;
        purged.map_err(AuthError::from)
    }

    pub(crate) fn logout_quietly(&self) {
        if let Err(e) = self.logout() {
            tracing::error!("Logout failed: {e}");
        }
    }

    /// Access token of a valid session
    ///
    /// An expired or unreadable Token Record is purged through [`logout`](Self::logout).
    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        match self.store.token_record() {
            Ok(Some(record)) if record.is_valid(self.now_millis()) => Some(record.access_token),
            Ok(Some(_)) => {
                tracing::debug!("Stored access token expired");
                self.logout_quietly();
                None
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Unreadable token record: {e}");
                self.logout_quietly();
                None
            }
        }
    }

    /// Check if a valid Token Record is stored, without side effects
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.current_token()
            .is_some_and(|record| record.is_valid(self.now_millis()))
    }

    /// Get the stored Token Record without validating it
    #[must_use]
    pub fn current_token(&self) -> Option<TokenRecord> {
        self.store.token_record().ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navigator::RecordingNavigator;

    fn test_client() -> OAuthClient {
        OAuthClient::builder()
            .config(AuthConfig::from_urls(
                "https://app.example",
                "https://api.example/api/v1/",
                "https://sec.example/oauth/v1/token",
            ))
            .store(CredentialStore::in_memory())
            .navigator(Arc::new(RecordingNavigator::new()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_authorization_url() {
        let client = test_client();
        let url = client.authorization_url("challenge123").unwrap();

        assert_eq!(url.path(), "/oauth/v1/authorize");
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("client_id".into(), "ronditrack-web-app".into()),
                (
                    "redirect_uri".into(),
                    "https://app.example/auth/callback".into()
                ),
                ("response_type".into(), "code".into()),
                ("code_challenge".into(), "challenge123".into()),
                ("code_challenge_method".into(), "S256".into()),
            ]
        );
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let mut config = AuthConfig::default();
        config.client_id = String::new();
        assert!(matches!(
            OAuthClient::builder().config(config).build(),
            Err(AuthError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_logout_without_session_is_noop() {
        let client = test_client();
        client.logout().unwrap();
        client.logout().unwrap();
        assert!(client.current_token().is_none());
    }

    #[test]
    fn test_access_token_purges_expired_record() {
        let client = test_client();
        let now = client.now_millis();
        client
            .store()
            .save_token_record(&TokenRecord {
                access_token: "stale".into(),
                refresh_token: Some("r".into()),
                expires_at: Some(now.saturating_sub(1)),
                user_info: None,
            })
            .unwrap();

        assert!(!client.is_authenticated());
        assert!(client.access_token().is_none());
        assert!(client.store().get(StorageKey::RefreshToken).unwrap().is_none());
    }

    #[test]
    fn test_access_token_of_valid_record() {
        let client = test_client();
        client
            .store()
            .save_token_record(&TokenRecord {
                access_token: "live".into(),
                refresh_token: None,
                expires_at: Some(client.now_millis() + 60_000),
                user_info: None,
            })
            .unwrap();

        assert!(client.is_authenticated());
        assert_eq!(client.access_token().as_deref(), Some("live"));
    }
}
