//! Directory session management.
//!
//! A [`Session`] is the single authenticated context of the console. It is owned by the
//! [`SessionManager`] and passed by reference to every directory call.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::oauth::GRAPH_RESOURCE;
use super::secure::SecureString;
use crate::console::prompt::Prompter;
use crate::error::AuthError;

/// Tokens this close to expiry are treated as expired.
const EXPIRY_SKEW_SECONDS: i64 = 60;

/// Normalised set of permission scopes.
///
/// Comparison ignores case and the Graph resource prefix, so
/// `https://graph.microsoft.com/User.Read` and `user.read` are the same scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeSet(BTreeSet<String>);

impl ScopeSet {
    pub fn new<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            scopes
                .into_iter()
                .map(|s| normalize_scope(s.as_ref()))
                .filter(|s| !s.is_empty())
                .collect(),
        )
    }

    /// Parse the space-separated `scope` field of a token response.
    pub fn from_granted(scope: &str) -> Self {
        Self::new(scope.split_whitespace())
    }

    /// Scopes of `required` that this set does not contain.
    pub fn missing_from(&self, required: &ScopeSet) -> Vec<String> {
        required.0.difference(&self.0).cloned().collect()
    }

    pub fn is_superset_of(&self, required: &ScopeSet) -> bool {
        required.0.is_subset(&self.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scopes: Vec<&str> = self.0.iter().map(String::as_str).collect();
        f.write_str(&scopes.join(" "))
    }
}

fn normalize_scope(scope: &str) -> String {
    let scope = scope.trim();
    let scope = scope
        .strip_prefix(GRAPH_RESOURCE)
        .unwrap_or(scope);
    scope.to_ascii_lowercase()
}

/// Authenticated session context.
pub struct Session {
    access_token: SecureString,
    refresh_token: Option<SecureString>,
    granted: ScopeSet,
    expires_at: DateTime<Utc>,
    valid: AtomicBool,
}

impl Session {
    pub fn new(
        access_token: SecureString,
        refresh_token: Option<SecureString>,
        granted: ScopeSet,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            granted,
            expires_at,
            valid: AtomicBool::new(true),
        }
    }

    pub fn access_token(&self) -> &str {
        self.access_token.as_str()
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_ref().map(|t| t.as_str())
    }

    pub fn granted_scopes(&self) -> &ScopeSet {
        &self.granted
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Mark the session as no longer usable. The next `ensure_connected` re-establishes it.
    pub fn invalidate(&self) {
        if self.valid.swap(false, Ordering::SeqCst) {
            warn!("Session marked invalid; it will be re-established");
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at - chrono::Duration::seconds(EXPIRY_SKEW_SECONDS) <= Utc::now()
    }

    /// Valid, unexpired session.
    pub fn is_usable(&self) -> bool {
        self.is_valid() && !self.is_expired()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("granted", &self.granted)
            .field("expires_at", &self.expires_at)
            .field("valid", &self.is_valid())
            .finish_non_exhaustive()
    }
}

/// Establishes and tears down authenticated sessions.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Establish a new session requesting exactly `scopes`. Operator instructions go to
    /// `prompter`.
    async fn connect(
        &self,
        scopes: &ScopeSet,
        prompter: &mut dyn Prompter,
    ) -> Result<Session, AuthError>;

    /// Renew an expired session without changing its scopes.
    async fn refresh(&self, session: &Session) -> Result<Session, AuthError>;

    /// Tear down a session.
    async fn disconnect(&self, session: Session);
}

/// Owns the process-wide session and keeps it connected with the required scopes.
pub struct SessionManager<P> {
    provider: P,
    required: ScopeSet,
    session: Option<Session>,
}

impl<P: SessionProvider> SessionManager<P> {
    pub fn new(provider: P, required: ScopeSet) -> Self {
        Self {
            provider,
            required,
            session: None,
        }
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn required_scopes(&self) -> &ScopeSet {
        &self.required
    }

    /// Make sure a usable session with every required scope exists.
    ///
    /// A session missing scopes is torn down and re-established with the full required
    /// set. Failures are returned to the caller, which owns the retry policy.
    pub async fn ensure_connected(
        &mut self,
        prompter: &mut dyn Prompter,
    ) -> Result<(), AuthError> {
        let Some(current) = self.session.take() else {
            info!("No active session, connecting");
            return self.connect(prompter).await;
        };

        let missing = current.granted_scopes().missing_from(&self.required);
        if !missing.is_empty() {
            info!(
                "Session is missing scopes [{}], reconnecting with the full set",
                missing.join(", ")
            );
            self.provider.disconnect(current).await;
            return self.connect(prompter).await;
        }

        if current.is_usable() {
            self.session = Some(current);
            return Ok(());
        }

        if current.refresh_token().is_some() {
            match self.provider.refresh(&current).await {
                Ok(renewed) if renewed.granted_scopes().is_superset_of(&self.required) => {
                    info!("Session renewed until {}", renewed.expires_at());
                    self.session = Some(renewed);
                    return Ok(());
                }
                Ok(_) => warn!("Renewed session lost required scopes, signing in again"),
                Err(e) => warn!("Session refresh failed: {}, signing in again", e),
            }
        }

        self.provider.disconnect(current).await;
        self.connect(prompter).await
    }

    async fn connect(&mut self, prompter: &mut dyn Prompter) -> Result<(), AuthError> {
        let session = self.provider.connect(&self.required, prompter).await?;

        let missing = session.granted_scopes().missing_from(&self.required);
        if !missing.is_empty() {
            self.provider.disconnect(session).await;
            return Err(AuthError::MissingScopes(missing.join(", ")));
        }

        info!("Connected, session valid until {}", session.expires_at());
        self.session = Some(session);
        Ok(())
    }

    /// Tear down the session at program exit.
    pub async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            self.provider.disconnect(session).await;
            info!("Session closed");
        }
    }
}

/// Bounded reconnect policy used by the console loop.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

/// Call `ensure_connected` until it succeeds or `policy.max_attempts` is reached.
///
/// Waits `policy.backoff` between attempts. Exhaustion yields
/// [`AuthError::RetriesExhausted`], which the console treats as fatal.
pub async fn connect_with_retry<P: SessionProvider>(
    manager: &mut SessionManager<P>,
    policy: &RetryPolicy,
    prompter: &mut dyn Prompter,
) -> Result<(), AuthError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match manager.ensure_connected(&mut *prompter).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt >= policy.max_attempts => {
                return Err(AuthError::RetriesExhausted {
                    attempts: attempt,
                    last_error: e.to_string(),
                });
            }
            Err(e) => {
                warn!(
                    "Connection attempt {}/{} failed: {}",
                    attempt, policy.max_attempts, e
                );
                tokio::time::sleep(policy.backoff).await;
            }
        }
    }
}
