//! Navigation away from the current page
//!
//! Starting a login, finishing a callback and logging out all end in a full
//! navigation. [`SystemBrowser`] hands the URL to the platform browser;
//! [`RecordingNavigator`] only remembers it, for headless hosts and tests.

use std::process::Command;
use std::sync::Mutex;

use crate::error::{AuthError, AuthResult};

/// Performs a full navigation to an absolute URL
pub trait Navigator: Send + Sync + std::fmt::Debug {
    /// Navigate to `url`
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Navigation` if the navigation could not be started.
    fn navigate(&self, url: &str) -> AuthResult<()>;
}

/// Opens URLs in the default system browser
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl Navigator for SystemBrowser {
    fn navigate(&self, url: &str) -> AuthResult<()> {
        tracing::debug!("Opening browser");
        browser_command(url)?
            .spawn()
            .map(|_| ())
            .map_err(|e| AuthError::navigation(e.to_string()))
    }
}

#[cfg(target_os = "macos")]
fn browser_command(url: &str) -> AuthResult<Command> {
    let mut command = Command::new("open");
    command.arg(url);
    Ok(command)
}

#[cfg(target_os = "linux")]
fn browser_command(url: &str) -> AuthResult<Command> {
    let mut command = Command::new("xdg-open");
    command.arg(url);
    Ok(command)
}

#[cfg(target_os = "windows")]
fn browser_command(url: &str) -> AuthResult<Command> {
    let mut command = Command::new("cmd");
    command.args(["/C", "start", "", url]);
    Ok(command)
}

#[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
fn browser_command(url: &str) -> AuthResult<Command> {
    Err(AuthError::navigation(format!(
        "no browser launcher for this platform: {url}"
    )))
}

/// Remembers every navigation instead of performing it
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    visited: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    /// Create an empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All URLs navigated to, oldest first
    #[must_use]
    pub fn visited(&self) -> Vec<String> {
        self.visited
            .lock()
            .map(|visited| visited.clone())
            .unwrap_or_default()
    }

    /// Most recent navigation
    #[must_use]
    pub fn last(&self) -> Option<String> {
        self.visited().pop()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, url: &str) -> AuthResult<()> {
        self.visited
            .lock()
            .map_err(|_| AuthError::navigation("navigation log poisoned"))?
            .push(url.to_string());
        Ok(())
    }
}
