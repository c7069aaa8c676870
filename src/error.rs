//! Error types for RondiTrack authentication

use thiserror::Error;

/// Errors raised by the credential stores
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error while reading or writing a durable store
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A stored value exists but cannot be decoded
    #[error("Corrupted value for key '{key}': {reason}")]
    Corrupted {
        /// Storage key holding the bad value
        key: &'static str,
        /// What was wrong with it
        reason: String,
    },

    /// An in-memory store lock was poisoned by a panicking writer
    #[error("Storage lock poisoned")]
    Poisoned,
}

/// Coarse classification of [`AuthError`], used by UIs to decide what to show
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthErrorKind {
    /// Authorization server unreachable before any state was mutated
    ServiceUnavailable,
    /// Callback invoked without `code` or without a stored verifier
    MissingParameters,
    /// The authorization server redirected back with `?error=...`
    ProviderDenied,
    /// Authorization code aged past its validity window
    CodeExpired,
    /// Any other non-success response from the token endpoint
    ExchangeFailed,
    /// Success status but the body lacked the expected fields
    InvalidResponse,
    /// Stored session violates an invariant
    SessionCorrupted,
    /// Request rejected as unauthenticated
    Unauthorized,
    /// Non-success response from the RondiTrack API
    Api,
    /// Local failure (configuration, storage, transport, navigation)
    Internal,
}

/// Main error type for authentication operations
#[derive(Debug, Error)]
pub enum AuthError {
    /// OAuth liveness probe failed
    #[error("Authorization service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Callback is missing the authorization code or the PKCE verifier
    #[error("Missing authentication parameters. Please try again.")]
    MissingParameters,

    /// Authorization server reported an error on the redirect
    #[error("Authentication error: {0}")]
    ProviderDenied(String),

    /// Authorization code is too old to be exchanged
    #[error("{0}")]
    CodeExpired(String),

    /// Token endpoint rejected the exchange
    #[error("Token exchange failed: {0}")]
    ExchangeFailed(String),

    /// Token endpoint answered with success but an unusable body
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Stored session failed an integrity check
    #[error("Session corrupted: {0}")]
    SessionCorrupted(String),

    /// No refresh token is stored
    #[error("No refresh token available")]
    NoRefreshToken,

    /// API request rejected with 401 and could not be recovered by a refresh
    #[error("Unauthorized: session expired")]
    Unauthorized,

    /// RondiTrack API returned a non-success status
    #[error("HTTP error {status}: {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body text
        message: String,
    },

    /// PKCE verifier length outside the legal 43..=128 range
    #[error("Code verifier length {0} is outside the allowed range 43..=128")]
    InvalidVerifierLength(usize),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Navigation to a URL could not be performed
    #[error("Could not navigate: {0}")]
    Navigation(String),

    /// Credential store error
    #[error("Credential store error: {0}")]
    Storage(#[from] StorageError),

    /// HTTP client error
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parse error
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

/// Result type for authentication operations
pub type AuthResult<T> = Result<T, AuthError>;

impl AuthError {
    /// Create a service unavailable error
    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    /// Create a code expired error with the default user-facing message
    #[must_use]
    pub fn code_expired() -> Self {
        Self::CodeExpired(
            "The authorization code has expired. Please log in again.".to_string(),
        )
    }

    /// Create an exchange failed error
    pub fn exchange_failed(msg: impl Into<String>) -> Self {
        Self::ExchangeFailed(msg.into())
    }

    /// Create an invalid response error
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a navigation error
    pub fn navigation(msg: impl Into<String>) -> Self {
        Self::Navigation(msg.into())
    }

    /// Classify this error
    #[must_use]
    pub fn kind(&self) -> AuthErrorKind {
        match self {
            Self::ServiceUnavailable(_) => AuthErrorKind::ServiceUnavailable,
            Self::MissingParameters => AuthErrorKind::MissingParameters,
            Self::ProviderDenied(_) => AuthErrorKind::ProviderDenied,
            Self::CodeExpired(_) => AuthErrorKind::CodeExpired,
            Self::ExchangeFailed(_) => AuthErrorKind::ExchangeFailed,
            Self::InvalidResponse(_) => AuthErrorKind::InvalidResponse,
            Self::SessionCorrupted(_) => AuthErrorKind::SessionCorrupted,
            Self::NoRefreshToken | Self::Unauthorized => AuthErrorKind::Unauthorized,
            Self::Api { .. } => AuthErrorKind::Api,
            Self::InvalidVerifierLength(_)
            | Self::InvalidConfig(_)
            | Self::Navigation(_)
            | Self::Storage(_)
            | Self::Http(_)
            | Self::Json(_)
            | Self::Url(_) => AuthErrorKind::Internal,
        }
    }

    /// Whether the user can recover by restarting the login flow right away
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            AuthErrorKind::CodeExpired | AuthErrorKind::ServiceUnavailable
        )
    }
}
