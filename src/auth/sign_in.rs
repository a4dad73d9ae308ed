//! Interactive browser sign-in backing the session manager.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info};
use url::Url;

use super::callback_server::{self, CallbackResult};
use super::oauth::{parse_callback_url, OAuth2Client, PkceChallenge, TokenResponse};
use super::secure::SecureString;
use super::session::{ScopeSet, Session, SessionProvider};
use crate::console::prompt::Prompter;
use crate::error::AuthError;

/// Signs in through the system browser using authorization code + PKCE.
pub struct BrowserSignIn {
    oauth_client: OAuth2Client,
    timeout: Duration,
}

impl BrowserSignIn {
    pub fn new(oauth_client: OAuth2Client, timeout: Duration) -> Self {
        Self {
            oauth_client,
            timeout,
        }
    }
}

#[async_trait]
impl SessionProvider for BrowserSignIn {
    async fn connect(
        &self,
        scopes: &ScopeSet,
        prompter: &mut dyn Prompter,
    ) -> Result<Session, AuthError> {
        let scopes: Vec<String> = scopes.iter().cloned().collect();
        let pkce = PkceChallenge::new();
        let request = self.oauth_client.authorization_request(&pkce, &scopes)?;

        let port = callback_server::callback_port(self.oauth_client.redirect_uri());
        let listener = callback_server::bind(port)
            .map_err(|e| AuthError::OAuthFailed(format!("Failed to start callback server: {}", e)))?;

        for line in sign_in_notice(&request.url) {
            prompter.say(&line);
        }
        if let Err(e) = open::that(request.url.as_str()) {
            error!("Failed to open browser: {}", e);
        }

        let timeout = self.timeout;
        let result = tokio::task::spawn_blocking(move || {
            callback_server::wait_for_callback(listener, timeout)
        })
        .await
        .map_err(|e| AuthError::OAuthFailed(e.to_string()))?;

        let url = match result {
            CallbackResult::Success(url) => url,
            CallbackResult::TimedOut => return Err(AuthError::CallbackTimeout),
            CallbackResult::Error(e) => return Err(AuthError::OAuthFailed(e)),
        };

        let (code, state) = parse_callback_url(&url)?;
        if state != request.state {
            return Err(AuthError::StateValidationFailed);
        }

        let tokens = self
            .oauth_client
            .exchange_code(&code, &pkce.verifier, &scopes)
            .await?;

        info!("Sign-in successful");
        Ok(session_from_tokens(tokens, None))
    }

    async fn refresh(&self, session: &Session) -> Result<Session, AuthError> {
        let refresh_token = session
            .refresh_token()
            .ok_or_else(|| AuthError::TokenRefreshFailed("No refresh token".into()))?;
        let scopes: Vec<String> = session.granted_scopes().iter().cloned().collect();

        let tokens = self.oauth_client.refresh_token(refresh_token, &scopes).await?;

        Ok(session_from_tokens(tokens, session.refresh_token()))
    }

    async fn disconnect(&self, session: Session) {
        // Tokens are memory-only; dropping the session zeroizes them
        info!("Signed out (session valid until {})", session.expires_at());
        drop(session);
    }
}

/// What the operator is told while the browser sign-in is pending.
fn sign_in_notice(url: &Url) -> Vec<String> {
    vec![
        "Opening your browser to sign in. If it does not open, visit:".to_string(),
        url.to_string(),
        String::new(),
    ]
}

/// Build a session from a token response, keeping the previous refresh token if none was issued.
fn session_from_tokens(tokens: TokenResponse, previous_refresh: Option<&str>) -> Session {
    let expires_at = Utc::now() + chrono::Duration::seconds(tokens.expires_in as i64);
    let refresh_token = tokens
        .refresh_token
        .map(SecureString::from)
        .or_else(|| previous_refresh.map(SecureString::from));

    Session::new(
        SecureString::from(tokens.access_token),
        refresh_token,
        ScopeSet::from_granted(&tokens.scope),
        expires_at,
    )
}
