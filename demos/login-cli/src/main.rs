//! RondiTrack Login CLI
//!
//! Signs in to the RondiTrack dashboard from a terminal with OAuth2 + PKCE.
//!
//! Features:
//! - `login`: opens the authorization page, then reads the redirect URL you
//!   paste back and exchanges its code for tokens
//! - `status`: runs the session guard over the stored credentials
//! - `refresh`: renews the access token
//! - `profile`: fetches the signed-in user's profile
//! - `logout`: purges every stored credential
//!
//! Run with:
//!   RONDITRACK_APP_ENV=qa cargo run -p ronditrack-login -- login

use clap::{Parser, Subcommand};
use console::style;
use ronditrack_auth::auth::{CallbackHandler, CallbackState};
use ronditrack_auth::{
    ApiClient, AuthConfig, AuthResult, CredentialStore, FileStore, MemoryStore, Navigator,
    OAuthClient, SessionGuard, SessionVerdict, SystemBrowser,
};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Terminal login for the RondiTrack dashboard
#[derive(Parser, Debug)]
#[command(name = "ronditrack-login")]
#[command(about = "Sign in to RondiTrack with OAuth2 + PKCE")]
struct Args {
    /// Credential file (default: platform config directory)
    #[arg(long)]
    credentials: Option<PathBuf>,

    /// Print URLs instead of opening the browser
    #[arg(long)]
    no_browser: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a login and complete it with the pasted redirect URL
    Login,
    /// Check the stored session
    Status,
    /// Renew the access token
    Refresh,
    /// Fetch the user profile
    Profile,
    /// Purge stored credentials
    Logout,
}

/// Prints the URL for the user to open by hand
#[derive(Debug)]
struct PrintNavigator;

impl Navigator for PrintNavigator {
    fn navigate(&self, url: &str) -> AuthResult<()> {
        println!("{} {}", style("Open:").cyan().bold(), style(url).underlined());
        Ok(())
    }
}

fn build_client(args: &Args) -> anyhow::Result<OAuthClient> {
    let durable = match &args.credentials {
        Some(path) => FileStore::with_path(path.clone()),
        None => FileStore::new(),
    };
    tracing::debug!(path = %durable.path().display(), "Using credential file");

    let navigator: Arc<dyn Navigator> = if args.no_browser {
        Arc::new(PrintNavigator)
    } else {
        Arc::new(SystemBrowser)
    };

    // No page to render between the callback and the redirect
    let mut config = AuthConfig::from_env();
    config.redirect_delay = Duration::ZERO;

    Ok(OAuthClient::builder()
        .config(config)
        .store(CredentialStore::new(
            Arc::new(durable),
            Arc::new(MemoryStore::new()),
        ))
        .navigator(navigator)
        .build()?)
}

fn prompt(message: &str) -> anyhow::Result<String> {
    print!("{} ", style(message).bold());
    std::io::stdout().flush()?;

    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

async fn login(client: &OAuthClient) -> anyhow::Result<()> {
    client.initiate_login().await?;
    println!(
        "{}",
        style("Authenticate in the browser, then paste the URL you were redirected to.").dim()
    );

    let callback_url = prompt("Redirect URL:")?;
    let handler = CallbackHandler::new(client.clone());

    match handler.handle(&callback_url).await {
        Some(CallbackState::Success) => {
            let name = client
                .current_token()
                .and_then(|record| record.user_info)
                .and_then(|user| user.name().map(str::to_string));
            match name {
                Some(name) => println!("{} Signed in as {name}", style("✓").green().bold()),
                None => println!("{} Signed in", style("✓").green().bold()),
            }
        }
        Some(CallbackState::Error {
            message, retryable, ..
        }) => {
            eprintln!("{} {message}", style("error:").red().bold());
            if retryable {
                println!(
                    "{}",
                    style("The code expired. Run `ronditrack-login login` again.").yellow()
                );
            }
        }
        Some(state) => tracing::warn!(?state, "Callback ended in an unexpected state"),
        None => println!("{}", style("A login is already being completed.").yellow()),
    }
    Ok(())
}

fn status(client: &OAuthClient) {
    let record = client.current_token();
    let verdict = SessionGuard::new(client.clone()).evaluate();

    match verdict {
        SessionVerdict::Valid => {
            println!("{} Session valid", style("✓").green().bold());
            if let Some(record) = record {
                let now = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
                    .unwrap_or_default();
                if let Some(remaining) = record.remaining_validity(now) {
                    println!("  {} {}s", style("Expires in:").dim(), remaining.as_secs());
                }
                if let Some(user) = record.user_info {
                    if let Some(name) = user.name() {
                        println!("  {} {name}", style("User:").dim());
                    }
                    if let Some(branch) = user.branch_id() {
                        println!("  {} {branch}", style("Branch:").dim());
                    }
                }
            }
        }
        SessionVerdict::NoSession => println!("{}", style("Not signed in").yellow()),
        verdict => println!(
            "{} Session rejected ({verdict:?}), credentials purged",
            style("✗").red().bold()
        ),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing (use RUST_LOG to override)
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ronditrack_auth=debug,ronditrack_login=info,warn".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let client = build_client(&args)?;

    match args.command {
        Command::Login => login(&client).await?,
        Command::Status => status(&client),
        Command::Refresh => {
            if client.refresh_access_token().await {
                println!("{} Access token refreshed", style("✓").green().bold());
            } else {
                eprintln!(
                    "{} Refresh failed, you have been logged out",
                    style("error:").red().bold()
                );
            }
        }
        Command::Profile => {
            let api = ApiClient::new(client)?;
            let profile = api.user_profile().await?;
            println!("{}", serde_json::to_string_pretty(profile.as_map())?);
        }
        Command::Logout => {
            client.logout()?;
            println!("{} Logged out", style("✓").green().bold());
        }
    }
    Ok(())
}
