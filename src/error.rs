//! Error types for the azureadmin console.
//!
//! Uses `thiserror` for library-style errors with automatic `Display` and `Error` implementations.

use thiserror::Error;

/// Top-level application error type.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Prompt error: {0}")]
    Prompt(#[from] PromptError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Authentication and session errors.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("OAuth2 authorization failed: {0}")]
    OAuthFailed(String),

    #[error("Invalid authorization code")]
    InvalidAuthCode,

    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    #[error("Token refresh failed: {0}")]
    TokenRefreshFailed(String),

    #[error("State validation failed (possible CSRF attack)")]
    StateValidationFailed,

    #[error("OAuth callback timeout")]
    CallbackTimeout,

    #[error("User cancelled authentication")]
    UserCancelled,

    #[error("Session is missing required permissions: {0}")]
    MissingScopes(String),

    #[error("Could not connect after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

/// Errors returned by the directory service collaborator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("Directory request failed: {0}")]
    Request(String),

    #[error("Failed to parse API response: {0}")]
    ParseFailed(String),

    #[error("Unauthorized (401): Token may be expired")]
    Unauthorized,

    #[error("Forbidden (403): Insufficient permissions")]
    Forbidden,

    #[error("Not found (404)")]
    NotFound,

    #[error("Rate limited (429): Too many requests")]
    RateLimited,

    #[error("Bad request (400): {0}")]
    BadRequest(String),

    #[error("Conflict (409): {0}")]
    Conflict(String),
}

impl ApiError {
    /// Returns true if the session must be re-established before the next call.
    pub fn requires_reconnect(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }

    /// Returns a user-friendly message for display in the console.
    pub fn user_message(&self) -> String {
        match self {
            Self::Unauthorized => "Session expired. You will be asked to sign in again.".into(),
            Self::Forbidden => "Insufficient permissions for this operation.".into(),
            Self::NotFound => "The object was not found in the directory.".into(),
            Self::RateLimited => "Too many requests. Please wait a moment.".into(),
            Self::BadRequest(msg) | Self::Conflict(msg) => {
                format!("The directory rejected the request: {}", msg)
            }
            Self::Request(_) => "Network error. Check your connection.".into(),
            Self::ParseFailed(_) => "Unexpected response from the directory.".into(),
        }
    }
}

/// Local input validation failures. Always recovered by re-prompting.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Display name cannot be empty")]
    EmptyDisplayName,

    #[error("Mail nickname cannot be empty")]
    EmptyMailNickname,

    #[error("'{0}' is not a valid principal name (expected user@domain.tld)")]
    InvalidPrincipalName(String),

    #[error("A user with principal name '{0}' already exists")]
    PrincipalNameTaken(String),

    #[error("Password must be at least {0} characters")]
    PasswordTooShort(usize),

    #[error("Password must contain an uppercase letter")]
    PasswordMissingUppercase,

    #[error("Password must contain a lowercase letter")]
    PasswordMissingLowercase,

    #[error("Password must contain a digit")]
    PasswordMissingDigit,

    #[error("Password must contain a special character")]
    PasswordMissingSymbol,

    #[error("Search text cannot be empty")]
    EmptySearch,

    #[error("'{0}' is not a valid selection")]
    InvalidSelection(String),

    #[error("License {0} has no available seats")]
    NoSeatsAvailable(String),
}

/// Operator input errors.
#[derive(Error, Debug)]
pub enum PromptError {
    #[error("Input closed")]
    Closed,

    #[error("Terminal interaction failed: {0}")]
    Io(String),
}

impl AppError {
    /// Returns a user-friendly message for display in the console.
    pub fn user_message(&self) -> String {
        match self {
            Self::Auth(AuthError::OAuthFailed(_)) => "Sign-in failed. Please try again.".into(),
            Self::Auth(AuthError::TokenRefreshFailed(_)) => {
                "Session expired. Please sign in again.".into()
            }
            Self::Auth(AuthError::StateValidationFailed) => {
                "Security error. Please try signing in again.".into()
            }
            Self::Auth(AuthError::CallbackTimeout) => "Sign-in timed out. Please try again.".into(),
            Self::Auth(AuthError::UserCancelled) => "Sign-in was cancelled.".into(),
            Self::Auth(AuthError::RetriesExhausted { attempts, .. }) => {
                format!("Could not connect to the directory after {} attempts.", attempts)
            }
            Self::Api(e) => e.user_message(),
            Self::Validation(e) => e.to_string(),
            Self::Config(_) => "Configuration error. Please check settings.".into(),
            _ => "An error occurred. Please try again.".into(),
        }
    }
}
