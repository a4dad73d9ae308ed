//! Azure AD authentication module.
//!
//! Provides OAuth2 with PKCE sign-in and the session manager that keeps the
//! console connected with the permissions it needs.

pub mod callback_server;
pub mod oauth;
pub mod secure;
pub mod session;
pub mod sign_in;

pub use secure::SecureString;
pub use session::{connect_with_retry, RetryPolicy, ScopeSet, Session, SessionManager, SessionProvider};
pub use sign_in::BrowserSignIn;
