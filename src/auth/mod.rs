//! OAuth authentication for RondiTrack
//!
//! Implements the Authorization Code flow with PKCE (Proof Key for Code
//! Exchange) against the RondiTrack security service, plus the session
//! lifecycle around it.
//!
//! # Overview
//!
//! 1. [`OAuthClient::initiate_login`] probes the authorization server, stores a
//!    fresh verifier and navigates to the authorize URL with its challenge
//! 2. The user authenticates; the server redirects back with `?code=...`
//! 3. [`CallbackHandler::handle`] exchanges code + verifier for a Token Record
//!    and redirects to the landing page
//! 4. [`SessionGuard`] gates protected views on a valid, complete session
//! 5. [`OAuthClient::refresh_access_token`] renews the access token; any
//!    failure logs the user out
//!
//! # Example
//!
//! ```no_run
//! use ronditrack_auth::auth::{CallbackHandler, OAuthClient, SessionGuard};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = OAuthClient::new()?;
//!     client.initiate_login().await?;
//!
//!     // Later, once the browser lands on the redirect URI
//!     let handler = CallbackHandler::new(client.clone());
//!     if let Some(state) = handler.handle("https://localhost:5173/auth/callback?code=abc").await {
//!         println!("Callback finished: {state:?}");
//!     }
//!
//!     if SessionGuard::new(client).is_session_valid() {
//!         println!("Signed in");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Security
//!
//! - PKCE prevents authorization code interception attacks
//! - The verifier is single-use and purged on every terminal callback outcome
//! - File-backed credentials are stored with user-only permissions (600)

mod callback;
mod guard;
mod oauth;
mod token;

pub use callback::{CallbackEvent, CallbackHandler, CallbackParams, CallbackState};
pub use guard::{SessionGuard, SessionVerdict};
pub use oauth::{OAuthClient, OAuthClientBuilder};
pub use token::{
    ErrorResponse, PkceSession, TokenRecord, TokenResponse, UserInfo, classify_exchange_failure,
    error_message, expires_at_from, looks_like_expired_code,
};
