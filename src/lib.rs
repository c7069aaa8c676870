//! # RondiTrack authentication client
//!
//! OAuth 2.0 Authorization Code + PKCE client and session lifecycle for the
//! RondiTrack security-rounds platform. Async/await, strong typing,
//! tokio-based.
//!
//! ## Quick Start
//!
//! ```no_run
//! use ronditrack_auth::{CallbackHandler, CallbackState, OAuthClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Configuration comes from RONDITRACK_* environment variables
//!     let client = OAuthClient::new()?;
//!
//!     // Opens the browser on the authorization server
//!     client.initiate_login().await?;
//!
//!     // The browser comes back to the redirect URI
//!     let handler = CallbackHandler::new(client.clone());
//!     match handler.handle("http://localhost:5173/auth/callback?code=abc").await {
//!         Some(CallbackState::Success) => println!("Signed in"),
//!         Some(state) => println!("Login failed: {:?}", state.error_message()),
//!         None => println!("Another callback is already running"),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Core Features
//!
//! ### 1. Login with PKCE
//!
//! [`OAuthClient::initiate_login`] checks that the authorization server
//! answers, stores a fresh code verifier and navigates to the authorize URL.
//! [`CallbackHandler`] later exchanges the returned code for a Token Record.
//!
//! ### 2. Guarding protected views
//!
//! ```no_run
//! # use ronditrack_auth::{OAuthClient, SessionGuard, SessionVerdict};
//! # fn example(client: OAuthClient) {
//! match SessionGuard::new(client).evaluate() {
//!     SessionVerdict::Valid => { /* render */ }
//!     SessionVerdict::NoSession => { /* show the login page */ }
//!     verdict => eprintln!("Session rejected: {verdict:?}"),
//! }
//! # }
//! ```
//!
//! ### 3. Authorized API calls
//!
//! ```no_run
//! # use ronditrack_auth::{ApiClient, OAuthClient};
//! # async fn example(client: OAuthClient) -> Result<(), ronditrack_auth::AuthError> {
//! let api = ApiClient::new(client)?;
//! let profile = api.user_profile().await?;
//! println!("Hello {:?}", profile.name());
//! # Ok(())
//! # }
//! ```
//!
//! A `401` answer triggers one token refresh and one replay; a failed refresh
//! logs the user out.
//!
//! ## Architecture
//!
//! - [`auth`]: OAuth client, callback state machine, session guard
//! - [`api`]: Bearer-authorized JSON client
//! - [`storage`]: Credential Store over durable and session-scoped backends
//! - [`pkce`]: Verifier and S256 challenge generation
//! - [`config`]: Environment-driven configuration
//! - [`navigator`]: Browser navigation seam
//! - [`clock`]: Time source seam
//! - [`error`]: Error types and handling
//!
//! ## Logging
//!
//! This crate uses [`tracing`](https://crates.io/crates/tracing) for structured logging.
//! Tracing events are always emitted but are zero-cost when no subscriber is attached.
//! Tokens and verifiers are never logged.
//!
//! ```rust,ignore
//! tracing_subscriber::fmt::init();
//! ```
//!
//! ## Error Handling
//!
//! All fallible operations return [`AuthResult<T>`]:
//!
//! ```no_run
//! # use ronditrack_auth::{AuthError, OAuthClient};
//! # async fn example(client: OAuthClient) {
//! match client.initiate_login().await {
//!     Ok(()) => {}
//!     Err(AuthError::ServiceUnavailable(msg)) => eprintln!("Server down: {msg}"),
//!     Err(e) => eprintln!("Error: {e}"),
//! }
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod navigator;
pub mod pkce;
pub mod storage;

// Re-export commonly used types
pub use api::ApiClient;
pub use auth::{
    CallbackEvent, CallbackHandler, CallbackState, OAuthClient, OAuthClientBuilder, PkceSession,
    SessionGuard, SessionVerdict, TokenRecord, UserInfo,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AuthConfig, Environment, RefreshGrant};
pub use error::{AuthError, AuthErrorKind, AuthResult, StorageError};
pub use navigator::{Navigator, RecordingNavigator, SystemBrowser};
pub use pkce::PkceChallenge;
pub use storage::{CredentialStore, FileStore, KeyValueStore, MemoryStore, StorageKey};

/// Version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
