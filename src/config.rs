//! Deployment configuration
//!
//! Every deployment (development, qa, staging, production) talks to its own
//! RondiTrack API and its own authorization server. The values are opaque to
//! the rest of the crate; they are selected here from the environment.

use std::str::FromStr;
use std::time::Duration;
use typed_builder::TypedBuilder;

use crate::error::{AuthError, AuthResult};

/// OAuth client id registered for the dashboard
pub const DEFAULT_CLIENT_ID: &str = "ronditrack-web-app";

/// Maximum age of an authorization request before its code is considered expired
pub const DEFAULT_CODE_LIFETIME: Duration = Duration::from_secs(5 * 60);

/// Delay between a successful callback and the redirect to the landing page
pub const DEFAULT_REDIRECT_DELAY: Duration = Duration::from_millis(1000);

/// Default PKCE verifier length
pub const DEFAULT_VERIFIER_LENGTH: usize = 64;

const TOKEN_PATH: &str = "/oauth/v1/token";
const AUTHORIZE_PATH: &str = "/oauth/v1/authorize";
const CALLBACK_PATH: &str = "/auth/callback";
const LOGIN_PATH: &str = "/login";
const LANDING_PATH: &str = "/dashboard";

/// Environment variable selecting the deployment
pub const ENV_APP_ENV: &str = "RONDITRACK_APP_ENV";
/// Environment variable overriding the API base URL
pub const ENV_API_BASE_URL: &str = "RONDITRACK_API_BASE_URL";
/// Environment variable overriding the OAuth token URL
pub const ENV_OAUTH_URL: &str = "RONDITRACK_OAUTH_URL";
/// Environment variable overriding the dashboard origin
pub const ENV_APP_URL: &str = "RONDITRACK_APP_URL";

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Local development
    #[default]
    Development,
    /// QA deployment
    Qa,
    /// Staging deployment
    Staging,
    /// Production deployment
    Production,
}

impl Environment {
    /// Default RondiTrack API base URL (with trailing slash)
    #[must_use]
    pub fn api_base_url(self) -> &'static str {
        match self {
            Self::Development => "https://api-qa.ronditrack.online/api/v1/",
            Self::Qa => "https://qa.api.ronditrack.online/api/v1/",
            Self::Staging => "https://staging.api.ronditrack.online/api/v1/",
            Self::Production => "https://api.ronditrack.online/api/v1/",
        }
    }

    /// Default OAuth token endpoint
    #[must_use]
    pub fn oauth_token_url(self) -> &'static str {
        match self {
            Self::Development | Self::Qa => "https://api-sec-qa.ronditrack.online/oauth/v1/token",
            Self::Staging => "https://api-sec-staging.ronditrack.online/oauth/v1/token",
            Self::Production => "https://api-sec.ronditrack.online/oauth/v1/token",
        }
    }

    /// Default dashboard origin
    #[must_use]
    pub fn app_url(self) -> &'static str {
        match self {
            Self::Development => "http://localhost:5173",
            Self::Qa => "https://qa.ronditrack.online",
            Self::Staging => "https://staging.ronditrack.online",
            Self::Production => "https://ronditrack.online",
        }
    }
}

impl FromStr for Environment {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "qa" => Ok(Self::Qa),
            "staging" => Ok(Self::Staging),
            "production" | "prod" => Ok(Self::Production),
            other => Err(AuthError::invalid_config(format!(
                "unknown environment '{other}'"
            ))),
        }
    }
}

/// Grant type sent on token refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshGrant {
    /// `grant_type: "token"`, what the RondiTrack server accepts
    #[default]
    Token,
    /// Standard `grant_type: "refresh_token"`
    RefreshToken,
}

impl RefreshGrant {
    /// Wire value of the grant type
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Token => "token",
            Self::RefreshToken => "refresh_token",
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, TypedBuilder)]
pub struct AuthConfig {
    /// OAuth client ID
    #[builder(default = DEFAULT_CLIENT_ID.to_string(), setter(into))]
    pub client_id: String,
    /// Authorization endpoint URL
    #[builder(setter(into))]
    pub authorize_url: String,
    /// Token endpoint URL
    #[builder(setter(into))]
    pub token_url: String,
    /// Fixed callback URL registered with the authorization server
    #[builder(setter(into))]
    pub redirect_uri: String,
    /// RondiTrack API base URL, endpoints are appended verbatim
    #[builder(setter(into))]
    pub api_base_url: String,
    /// Login entry point, target of logout
    #[builder(setter(into))]
    pub login_url: String,
    /// Landing page after a successful callback
    #[builder(setter(into))]
    pub landing_url: String,
    /// Maximum age of an authorization code
    #[builder(default = DEFAULT_CODE_LIFETIME)]
    pub code_lifetime: Duration,
    /// Delay before redirecting to the landing page
    #[builder(default = DEFAULT_REDIRECT_DELAY)]
    pub redirect_delay: Duration,
    /// PKCE verifier length (43..=128)
    #[builder(default = DEFAULT_VERIFIER_LENGTH)]
    pub verifier_length: usize,
    /// Grant type used for refresh requests
    #[builder(default)]
    pub refresh_grant: RefreshGrant,
    /// User info attributes a session must carry to be accepted
    #[builder(default = vec!["branch_id".to_string()])]
    pub required_claims: Vec<String>,
}

impl AuthConfig {
    /// Configuration for a deployment, using its default URLs
    #[must_use]
    pub fn for_environment(env: Environment) -> Self {
        Self::from_urls(env.app_url(), env.api_base_url(), env.oauth_token_url())
    }

    /// Build a configuration from the three deployment URLs
    ///
    /// The authorize URL is derived from the token URL, the callback, login
    /// and landing URLs from the dashboard origin.
    #[must_use]
    pub fn from_urls(app_url: &str, api_base_url: &str, token_url: &str) -> Self {
        let app_url = app_url.trim_end_matches('/');
        Self::builder()
            .authorize_url(authorize_url_for(token_url))
            .token_url(token_url)
            .redirect_uri(format!("{app_url}{CALLBACK_PATH}"))
            .api_base_url(api_base_url)
            .login_url(format!("{app_url}{LOGIN_PATH}"))
            .landing_url(format!("{app_url}{LANDING_PATH}"))
            .build()
    }

    /// Load configuration from `RONDITRACK_*` environment variables
    ///
    /// An unknown `RONDITRACK_APP_ENV` falls back to development.
    #[must_use]
    pub fn from_env() -> Self {
        let env = std::env::var(ENV_APP_ENV)
            .ok()
            .and_then(|value| match value.parse::<Environment>() {
                Ok(env) => Some(env),
                Err(e) => {
                    tracing::warn!("{e}, falling back to development");
                    None
                }
            })
            .unwrap_or_default();

        let app_url = std::env::var(ENV_APP_URL).unwrap_or_else(|_| env.app_url().to_string());
        let api_base_url =
            std::env::var(ENV_API_BASE_URL).unwrap_or_else(|_| env.api_base_url().to_string());
        let token_url =
            std::env::var(ENV_OAUTH_URL).unwrap_or_else(|_| env.oauth_token_url().to_string());

        tracing::debug!(environment = ?env, %token_url, "Loaded auth configuration");
        Self::from_urls(&app_url, &api_base_url, &token_url)
    }

    /// Check that the configured values are usable
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidConfig` for unparsable URLs, an empty client
    /// id or an illegal verifier length.
    pub fn validate(&self) -> AuthResult<()> {
        if self.client_id.trim().is_empty() {
            return Err(AuthError::invalid_config("client_id is empty"));
        }
        if !(43..=128).contains(&self.verifier_length) {
            return Err(AuthError::InvalidVerifierLength(self.verifier_length));
        }
        for (name, value) in [
            ("authorize_url", &self.authorize_url),
            ("token_url", &self.token_url),
            ("redirect_uri", &self.redirect_uri),
            ("api_base_url", &self.api_base_url),
            ("login_url", &self.login_url),
            ("landing_url", &self.landing_url),
        ] {
            url::Url::parse(value)
                .map_err(|e| AuthError::invalid_config(format!("{name} '{value}': {e}")))?;
        }
        Ok(())
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::for_environment(Environment::default())
    }
}

/// Derive the authorize endpoint from the token endpoint
fn authorize_url_for(token_url: &str) -> String {
    let base = token_url.trim_end_matches('/');
    let base = base.strip_suffix(TOKEN_PATH).unwrap_or(base);
    format!("{base}{AUTHORIZE_PATH}")
}
