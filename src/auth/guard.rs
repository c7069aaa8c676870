//! Route guard for protected views

use super::oauth::OAuthClient;

/// Outcome of a session check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionVerdict {
    /// Token valid and profile complete
    Valid,
    /// No access token stored, leftover token fields purged
    NoSession,
    /// Access token missing expiry or past it
    Expired,
    /// No cached user profile
    MissingUserInfo,
    /// Profile lacks a required claim
    MissingClaim(String),
    /// Stored state could not be decoded
    Unreadable,
}

impl SessionVerdict {
    /// Whether protected content may be shown
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    fn requires_logout(&self) -> bool {
        !matches!(self, Self::Valid | Self::NoSession)
    }
}

/// Checks the stored session before protected content renders
///
/// Every failing check other than a missing session forces a logout, which
/// purges storage and navigates to the login page.
#[derive(Debug, Clone)]
pub struct SessionGuard {
    client: OAuthClient,
}

impl SessionGuard {
    /// Create a guard over `client`
    #[must_use]
    pub fn new(client: OAuthClient) -> Self {
        Self { client }
    }

    /// Run every check and log out when one fails
    #[must_use]
    pub fn evaluate(&self) -> SessionVerdict {
        let verdict = self.inspect();
        if verdict.requires_logout() {
            tracing::warn!(?verdict, "Session rejected, logging out");
            self.client.logout_quietly();
        } else if verdict == SessionVerdict::NoSession {
            tracing::debug!("No stored session");
        }
        verdict
    }

    /// Whether protected content may be shown
    #[must_use]
    pub fn is_session_valid(&self) -> bool {
        self.evaluate().is_valid()
    }

    fn inspect(&self) -> SessionVerdict {
        let record = match self.client.store().token_record() {
            Ok(Some(record)) => record,
            Ok(None) => {
                match self.client.store().purge_partial_token_record() {
                    Ok(true) => tracing::warn!("Purged token fields stored without an access token"),
                    Ok(false) => {}
                    Err(e) => tracing::error!("Failed to purge partial session: {e}"),
                }
                return SessionVerdict::NoSession;
            }
            Err(e) => {
                tracing::warn!("Failed to read stored session: {e}");
                return SessionVerdict::Unreadable;
            }
        };

        if !record.is_valid(self.client.now_millis()) {
            return SessionVerdict::Expired;
        }

        let Some(user_info) = record.user_info else {
            return SessionVerdict::MissingUserInfo;
        };

        self.client
            .config()
            .required_claims
            .iter()
            .find(|claim| !user_info.has_claim(claim))
            .map_or(SessionVerdict::Valid, |claim| {
                SessionVerdict::MissingClaim(claim.to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{TokenRecord, UserInfo};
    use crate::clock::ManualClock;
    use crate::config::AuthConfig;
    use crate::navigator::RecordingNavigator;
    use crate::storage::{CredentialStore, StorageKey};
    use serde_json::json;
    use std::sync::Arc;

    const NOW: u64 = 1_700_000_000_000;

    fn setup() -> (SessionGuard, Arc<RecordingNavigator>) {
        let navigator = Arc::new(RecordingNavigator::new());
        let client = OAuthClient::builder()
            .config(AuthConfig::from_urls(
                "https://app.example",
                "https://api.example/api/v1/",
                "https://sec.example/oauth/v1/token",
            ))
            .store(CredentialStore::in_memory())
            .navigator(navigator.clone())
            .clock(Arc::new(ManualClock::new(NOW)))
            .build()
            .unwrap();
        (SessionGuard::new(client), navigator)
    }

    fn record(expires_at: Option<u64>, user: Option<serde_json::Value>) -> TokenRecord {
        TokenRecord {
            access_token: "access".into(),
            refresh_token: Some("refresh".into()),
            expires_at,
            user_info: user.map(|v| serde_json::from_value::<UserInfo>(v).unwrap()),
        }
    }

    fn assert_purged(guard: &SessionGuard) {
        for key in StorageKey::ALL {
            assert!(guard.client.store().get(key).unwrap().is_none(), "{key:?} survived");
        }
    }

    #[test]
    fn test_valid_session() {
        let (guard, navigator) = setup();
        guard
            .client
            .store()
            .save_token_record(&record(
                Some(NOW + 60_000),
                Some(json!({"id": 7, "name": "Ana", "branch_id": 3})),
            ))
            .unwrap();

        assert_eq!(guard.evaluate(), SessionVerdict::Valid);
        assert!(guard.is_session_valid());
        assert!(navigator.visited().is_empty());
    }

    #[test]
    fn test_no_session_does_not_navigate() {
        let (guard, navigator) = setup();
        assert_eq!(guard.evaluate(), SessionVerdict::NoSession);
        assert!(navigator.visited().is_empty());
    }

    #[test]
    fn test_partial_record_is_purged_without_navigation() {
        let (guard, navigator) = setup();
        let store = guard.client.store();
        store.set(StorageKey::RefreshToken, "refresh").unwrap();
        store
            .set(StorageKey::TokenExpiration, &(NOW + 60_000).to_string())
            .unwrap();
        store.set(StorageKey::UserInfo, r#"{"branch_id": 3}"#).unwrap();

        assert_eq!(guard.evaluate(), SessionVerdict::NoSession);
        assert_purged(&guard);
        assert!(navigator.visited().is_empty());
    }

    #[test]
    fn test_expired_session_logs_out() {
        let (guard, navigator) = setup();
        guard
            .client
            .store()
            .save_token_record(&record(Some(NOW), Some(json!({"branch_id": 3}))))
            .unwrap();

        assert_eq!(guard.evaluate(), SessionVerdict::Expired);
        assert_purged(&guard);
        assert_eq!(navigator.last().as_deref(), Some("https://app.example/login"));
    }

    #[test]
    fn test_missing_expiry_is_expired() {
        let (guard, _) = setup();
        guard
            .client
            .store()
            .save_token_record(&record(None, Some(json!({"branch_id": 3}))))
            .unwrap();
        assert_eq!(guard.evaluate(), SessionVerdict::Expired);
    }

    #[test]
    fn test_missing_user_info_logs_out() {
        let (guard, navigator) = setup();
        guard
            .client
            .store()
            .save_token_record(&record(Some(NOW + 60_000), None))
            .unwrap();

        assert_eq!(guard.evaluate(), SessionVerdict::MissingUserInfo);
        assert_purged(&guard);
        assert_eq!(navigator.visited().len(), 1);
    }

    #[test]
    fn test_missing_branch_logs_out() {
        let (guard, navigator) = setup();
        guard
            .client
            .store()
            .save_token_record(&record(
                Some(NOW + 60_000),
                Some(json!({"id": 7, "branch_id": null})),
            ))
            .unwrap();

        assert_eq!(
            guard.evaluate(),
            SessionVerdict::MissingClaim("branch_id".into())
        );
        assert_purged(&guard);
        assert_eq!(navigator.last().as_deref(), Some("https://app.example/login"));
    }

    #[test]
    fn test_unreadable_user_info_logs_out() {
        let (guard, _) = setup();
        let store = guard.client.store();
        store.set(StorageKey::AccessToken, "access").unwrap();
        store
            .set(StorageKey::TokenExpiration, &(NOW + 60_000).to_string())
            .unwrap();
        store.set(StorageKey::UserInfo, "{not json").unwrap();

        assert_eq!(guard.evaluate(), SessionVerdict::Unreadable);
        assert_purged(&guard);
    }
}
