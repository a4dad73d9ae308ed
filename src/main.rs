//! azureadmin - interactive console for Azure AD directory administration.
//!
//! Signs the operator in through the browser, then drives user, license, group
//! and MFA-method maintenance against Microsoft Graph from a numbered menu.

#![deny(clippy::all)]

mod auth;
mod config;
mod console;
mod directory;
mod error;
mod ops;
#[cfg(test)]
mod testing;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use auth::oauth::OAuth2Client;
use auth::{BrowserSignIn, RetryPolicy, ScopeSet, SessionManager};
use config::Config;
use console::{ErrorLog, TerminalPrompter};
use directory::GraphClient;
use error::AppError;

fn main() {
    // Load .env file (if present) before anything else
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            eprintln!("\nPlease set the following environment variables:");
            eprintln!("  AZURE_CLIENT_ID=<your-azure-ad-client-id>");
            eprintln!("  AZURE_TENANT_ID=<your-tenant-id>");
            std::process::exit(1);
        }
    };

    init_logging(&config.logging.level);
    info!("Starting {} v{}", config.app.name, config.app.version);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => exit_with(AppError::Io(e)),
    };

    if let Err(e) = runtime.block_on(run(config)) {
        exit_with(e);
    }
    info!("Goodbye");
}

/// Initialize tracing to stderr so it never interleaves with menu output on stdout.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

fn exit_with(e: AppError) -> ! {
    error!("Fatal: {}", e);
    eprintln!("{}", e.user_message());
    std::process::exit(1);
}

async fn run(config: Config) -> Result<(), AppError> {
    let oauth_client =
        OAuth2Client::new(&config).map_err(|e| AppError::Config(format!("{:#}", e)))?;
    let sign_in = BrowserSignIn::new(oauth_client, config.session.sign_in_timeout());
    let mut manager = SessionManager::new(sign_in, ScopeSet::new(&config.oauth.scopes.scopes));
    let retry = RetryPolicy {
        max_attempts: config.session.max_connect_attempts,
        backoff: config.session.retry_backoff(),
    };

    let graph = GraphClient::new(config.api.graph_base_url())?;
    let error_log = ErrorLog::new(config.logging.error_log_path());
    info!("Recording failures to {}", error_log.path().display());
    let mut prompter = TerminalPrompter;

    let result = console::run(
        &mut manager,
        &retry,
        &graph,
        &mut prompter,
        &error_log,
        &config.directory,
    )
    .await;

    manager.disconnect().await;
    result
}
