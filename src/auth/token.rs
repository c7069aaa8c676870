//! Token Record, PKCE Session and token endpoint wire types

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{AuthError, AuthResult};

/// Cached user profile returned alongside the access token
///
/// Kept as the raw JSON object the server sent so that deployment-specific
/// attributes survive the round trip through storage.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserInfo(serde_json::Map<String, serde_json::Value>);

impl UserInfo {
    /// Wrap a JSON object
    #[must_use]
    pub fn new(fields: serde_json::Map<String, serde_json::Value>) -> Self {
        Self(fields)
    }

    /// Look up an attribute; null and empty-string values count as absent
    #[must_use]
    pub fn claim(&self, name: &str) -> Option<&serde_json::Value> {
        self.0.get(name).filter(|value| match value {
            serde_json::Value::Null => false,
            serde_json::Value::String(s) => !s.trim().is_empty(),
            _ => true,
        })
    }

    /// Whether the attribute is present
    #[must_use]
    pub fn has_claim(&self, name: &str) -> bool {
        self.claim(name).is_some()
    }

    /// User id
    #[must_use]
    pub fn id(&self) -> Option<&serde_json::Value> {
        self.claim("id")
    }

    /// Display name
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.claim("name").and_then(serde_json::Value::as_str)
    }

    /// Role attribute
    #[must_use]
    pub fn role(&self) -> Option<&serde_json::Value> {
        self.claim("role")
    }

    /// Assigned branch identifier
    #[must_use]
    pub fn branch_id(&self) -> Option<&serde_json::Value> {
        self.claim("branch_id")
    }

    /// Underlying JSON object
    #[must_use]
    pub fn as_map(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.0
    }
}

/// Durable bundle describing the authenticated session
#[derive(Debug, Clone, PartialEq)]
pub struct TokenRecord {
    /// Bearer credential for API calls
    pub access_token: String,
    /// Credential used to mint a new record
    pub refresh_token: Option<String>,
    /// Epoch milliseconds after which the access token is no longer valid
    pub expires_at: Option<u64>,
    /// Cached profile snapshot
    pub user_info: Option<UserInfo>,
}

impl TokenRecord {
    /// Build a record from a token endpoint response received at `now_millis`
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidResponse` if the response carries no
    /// non-empty access token.
    pub fn from_response(response: TokenResponse, now_millis: u64) -> AuthResult<Self> {
        let access_token = response
            .access_token
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| AuthError::invalid_response("no valid access token received"))?;

        Ok(Self {
            access_token,
            refresh_token: response.refresh_token.filter(|token| !token.is_empty()),
            expires_at: response
                .expires_in
                .map(|seconds| expires_at_from(now_millis, seconds)),
            user_info: response.user,
        })
    }

    /// A record is valid iff it has an access token and `now < expires_at`
    #[must_use]
    pub fn is_valid(&self, now_millis: u64) -> bool {
        !self.access_token.is_empty()
            && self
                .expires_at
                .is_some_and(|expires_at| now_millis < expires_at)
    }

    /// Get the Authorization header value
    #[must_use]
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    /// Get remaining validity duration, if known
    #[must_use]
    pub fn remaining_validity(&self, now_millis: u64) -> Option<Duration> {
        self.expires_at
            .filter(|expires_at| *expires_at > now_millis)
            .map(|expires_at| Duration::from_millis(expires_at - now_millis))
    }
}

/// Absolute expiry for a token issued at `now_millis` lasting `expires_in` seconds
///
/// Fractional lifetimes are truncated to whole milliseconds; negative or NaN
/// lifetimes expire immediately.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn expires_at_from(now_millis: u64, expires_in: f64) -> u64 {
    // Float-to-int casts saturate, NaN becomes 0
    now_millis.saturating_add((expires_in.max(0.0) * 1000.0) as u64)
}

/// Ephemeral state of one login attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceSession {
    /// Code verifier sent on exchange
    pub verifier: String,
    /// Epoch milliseconds when the authorization request was issued
    pub started_at: Option<u64>,
}

/// Success body of the token endpoint
///
/// The RondiTrack server answers the code exchange with `accessToken` and the
/// refresh grant with `access_token`. Both spellings are accepted, also
/// together in one body, with `accessToken` taking precedence.
#[derive(Debug, Default, Deserialize)]
#[serde(from = "RawTokenResponse")]
pub struct TokenResponse {
    /// Access token
    pub access_token: Option<String>,
    /// Refresh token
    pub refresh_token: Option<String>,
    /// Lifetime in seconds, any JSON number
    pub expires_in: Option<f64>,
    /// Profile snapshot
    pub user: Option<UserInfo>,
}

#[derive(Deserialize)]
struct RawTokenResponse {
    #[serde(default, rename = "accessToken")]
    access_token_camel: Option<String>,
    #[serde(default, rename = "access_token")]
    access_token_snake: Option<String>,
    #[serde(default, rename = "refresh_token")]
    refresh_token_snake: Option<String>,
    #[serde(default, rename = "refreshToken")]
    refresh_token_camel: Option<String>,
    #[serde(default)]
    expires_in: Option<f64>,
    #[serde(default)]
    user: Option<UserInfo>,
}

fn first_present(preferred: Option<String>, fallback: Option<String>) -> Option<String> {
    preferred
        .filter(|token| !token.trim().is_empty())
        .or(fallback.filter(|token| !token.trim().is_empty()))
}

impl From<RawTokenResponse> for TokenResponse {
    fn from(raw: RawTokenResponse) -> Self {
        Self {
            access_token: first_present(raw.access_token_camel, raw.access_token_snake),
            refresh_token: first_present(raw.refresh_token_snake, raw.refresh_token_camel),
            expires_in: raw.expires_in,
            user: raw.user,
        }
    }
}

/// Structured error body of the token endpoint
#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    /// Error code
    pub error: String,
    /// Human-readable description
    #[serde(default)]
    pub error_description: Option<String>,
}

impl ErrorResponse {
    /// Best message to show: the description, falling back to the code
    #[must_use]
    pub fn message(&self) -> &str {
        self.error_description
            .as_deref()
            .filter(|description| !description.is_empty())
            .unwrap_or(&self.error)
    }
}

/// Compatibility shim for the token endpoint's untyped "code expired" errors.
///
/// The server reports an expired authorization code either as a message
/// containing "expired" or as a bare 500. Both are matched here and nowhere
/// else.
#[must_use]
pub fn looks_like_expired_code(status: u16, body: &str) -> bool {
    status == 500 || body.to_ascii_lowercase().contains("expired")
}

/// Turn a non-success token endpoint response into an error
///
/// Expired-code signatures become `AuthError::CodeExpired`; anything else is
/// `AuthError::ExchangeFailed` with the structured error message, or the raw
/// body when it is not JSON.
#[must_use]
pub fn classify_exchange_failure(status: u16, body: &str) -> AuthError {
    if looks_like_expired_code(status, body) {
        return AuthError::CodeExpired(
            "The authorization code has expired. This usually happens when too much time \
             passes between authorization and token exchange."
                .to_string(),
        );
    }

    AuthError::exchange_failed(error_message(status, body))
}

/// Best-effort message from a token endpoint error body
///
/// Structured `{error, error_description}` bodies yield their message; any
/// other body is returned raw, prefixed with the status.
#[must_use]
pub fn error_message(status: u16, body: &str) -> String {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(error) => error.message().to_string(),
        Err(_) if body.trim().is_empty() => format!("HTTP {status}: could not obtain token"),
        Err(_) => format!("HTTP {status}: {}", body.trim()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(value: serde_json::Value) -> UserInfo {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_from_response_computes_expiry() {
        let response: TokenResponse =
            serde_json::from_value(json!({"accessToken": "tok1", "expires_in": 3600})).unwrap();
        let record = TokenRecord::from_response(response, 1_000).unwrap();
        assert_eq!(record.access_token, "tok1");
        assert_eq!(record.expires_at, Some(3_601_000));
        assert!(record.user_info.is_none());
    }

    #[test]
    fn test_from_response_accepts_snake_case() {
        let response: TokenResponse = serde_json::from_value(
            json!({"access_token": "tok2", "refresh_token": "r1", "expires_in": 60}),
        )
        .unwrap();
        let record = TokenRecord::from_response(response, 0).unwrap();
        assert_eq!(record.access_token, "tok2");
        assert_eq!(record.refresh_token.as_deref(), Some("r1"));
    }

    #[test]
    fn test_from_response_accepts_fractional_lifetime() {
        let response: TokenResponse = serde_json::from_value(
            json!({"accessToken": "tok1", "expires_in": 3600.0, "user": {"branch_id": 3}}),
        )
        .unwrap();
        let record = TokenRecord::from_response(response, 1_000).unwrap();
        assert_eq!(record.expires_at, Some(3_601_000));
        assert!(record.user_info.unwrap().has_claim("branch_id"));

        let response: TokenResponse =
            serde_json::from_value(json!({"accessToken": "tok1", "expires_in": 1.5})).unwrap();
        assert_eq!(
            TokenRecord::from_response(response, 0).unwrap().expires_at,
            Some(1_500)
        );
    }

    #[test]
    fn test_from_response_with_both_spellings() {
        let response: TokenResponse = serde_json::from_str(
            r#"{"accessToken":"camel","access_token":"snake","refresh_token":"r1","refreshToken":"r2","expires_in":60}"#,
        )
        .unwrap();
        assert_eq!(response.access_token.as_deref(), Some("camel"));
        assert_eq!(response.refresh_token.as_deref(), Some("r1"));

        // An empty preferred spelling falls back to the other one
        let response: TokenResponse =
            serde_json::from_value(json!({"accessToken": "", "access_token": "snake"})).unwrap();
        assert_eq!(response.access_token.as_deref(), Some("snake"));
    }

    #[test]
    fn test_expires_at_from_odd_lifetimes() {
        assert_eq!(expires_at_from(1_000, 60.0), 61_000);
        assert_eq!(expires_at_from(1_000, -5.0), 1_000);
        assert_eq!(expires_at_from(1_000, f64::NAN), 1_000);
        assert_eq!(expires_at_from(1_000, f64::INFINITY), u64::MAX);
    }

    #[test]
    fn test_from_response_requires_access_token() {
        let response: TokenResponse =
            serde_json::from_value(json!({"expires_in": 3600, "user": {"id": 1}})).unwrap();
        assert!(matches!(
            TokenRecord::from_response(response, 0),
            Err(AuthError::InvalidResponse(_))
        ));

        let response: TokenResponse =
            serde_json::from_value(json!({"accessToken": ""})).unwrap();
        assert!(TokenRecord::from_response(response, 0).is_err());
    }

    #[test]
    fn test_validity() {
        let record = TokenRecord {
            access_token: "tok".into(),
            refresh_token: None,
            expires_at: Some(5_000),
            user_info: None,
        };
        assert!(record.is_valid(4_999));
        assert!(!record.is_valid(5_000));
        assert_eq!(
            record.remaining_validity(4_000),
            Some(Duration::from_millis(1_000))
        );
        assert_eq!(record.remaining_validity(6_000), None);

        let no_expiry = TokenRecord {
            expires_at: None,
            ..record
        };
        assert!(!no_expiry.is_valid(0));
    }

    #[test]
    fn test_authorization_header() {
        let record = TokenRecord {
            access_token: "abc".into(),
            refresh_token: None,
            expires_at: None,
            user_info: None,
        };
        assert_eq!(record.authorization_header(), "Bearer abc");
    }

    #[test]
    fn test_user_info_claims() {
        let info = user(json!({"id": 7, "name": "Ana", "role": "admin", "branch_id": null, "zone": ""}));
        assert_eq!(info.id(), Some(&json!(7)));
        assert_eq!(info.name(), Some("Ana"));
        assert!(info.role().is_some());
        assert!(info.branch_id().is_none());
        assert!(!info.has_claim("zone"));
        assert!(!info.has_claim("missing"));

        let info = user(json!({"branch_id": 3}));
        assert!(info.has_claim("branch_id"));
    }

    #[test]
    fn test_expired_signatures() {
        assert!(looks_like_expired_code(400, "Authorization code expired"));
        assert!(looks_like_expired_code(400, r#"{"error":"code EXPIRED"}"#));
        assert!(looks_like_expired_code(500, "internal"));
        assert!(!looks_like_expired_code(400, "invalid_grant"));
    }

    #[test]
    fn test_classify_exchange_failure() {
        assert!(matches!(
            classify_exchange_failure(500, "boom"),
            AuthError::CodeExpired(_)
        ));

        let err = classify_exchange_failure(
            400,
            r#"{"error":"invalid_grant","error_description":"PKCE verification failed"}"#,
        );
        assert!(matches!(&err, AuthError::ExchangeFailed(m) if m == "PKCE verification failed"));

        let err = classify_exchange_failure(400, r#"{"error":"invalid_client"}"#);
        assert!(matches!(&err, AuthError::ExchangeFailed(m) if m == "invalid_client"));

        assert_eq!(error_message(502, "  "), "HTTP 502: could not obtain token");

        let err = classify_exchange_failure(403, "forbidden by proxy");
        assert!(matches!(&err, AuthError::ExchangeFailed(m) if m == "HTTP 403: forbidden by proxy"));
    }
}
