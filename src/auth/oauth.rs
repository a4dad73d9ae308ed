//! Authorization-code flow with PKCE against the Microsoft identity platform.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::Rng;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, error};
use url::Url;

use crate::config::Config;
use crate::error::AuthError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Resource prefix for delegated Graph permissions.
pub const GRAPH_RESOURCE: &str = "https://graph.microsoft.com/";

/// OpenID Connect scopes that are never resource-qualified.
const OIDC_SCOPES: &[&str] = &["openid", "profile", "email", "offline_access"];

/// PKCE code verifier and its S256 challenge.
#[derive(Debug)]
pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
}

impl PkceChallenge {
    pub fn new() -> Self {
        let verifier = random_token(32);
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }
}

impl Default for PkceChallenge {
    fn default() -> Self {
        Self::new()
    }
}

fn random_token(len: usize) -> String {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// A browser sign-in request: where to send the operator and the state to expect back.
#[derive(Debug)]
pub struct AuthorizationRequest {
    pub url: Url,
    pub state: String,
}

/// Ways of obtaining a token from the token endpoint.
enum TokenGrant<'a> {
    AuthorizationCode { code: &'a str, verifier: &'a str },
    RefreshToken(&'a str),
}

impl TokenGrant<'_> {
    fn failure(&self, message: String) -> AuthError {
        match self {
            Self::AuthorizationCode { .. } => AuthError::TokenExchangeFailed(message),
            Self::RefreshToken(_) => AuthError::TokenRefreshFailed(message),
        }
    }
}

/// Public-client OAuth2 for the configured tenant.
pub struct OAuth2Client {
    client_id: String,
    redirect_uri: String,
    authorize_endpoint: String,
    token_endpoint: String,
    http_client: reqwest::Client,
}

impl OAuth2Client {
    pub fn new(config: &Config) -> Result<Self> {
        let authorize_endpoint = config.auth_url();
        Url::parse(&authorize_endpoint)
            .with_context(|| format!("Invalid authorize endpoint '{}'", authorize_endpoint))?;

        let http_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client_id: config.oauth.client_id.clone(),
            redirect_uri: config.oauth.redirect_uri.clone(),
            authorize_endpoint,
            token_endpoint: config.token_url(),
            http_client,
        })
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Build the URL the operator opens to consent to `scopes`.
    pub fn authorization_request(
        &self,
        pkce: &PkceChallenge,
        scopes: &[String],
    ) -> Result<AuthorizationRequest, AuthError> {
        let state = random_token(16);
        let mut url = Url::parse(&self.authorize_endpoint)
            .map_err(|e| AuthError::OAuthFailed(format!("Invalid authorize endpoint: {}", e)))?;

        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_mode", "query")
            .append_pair("scope", &scope_param(scopes))
            .append_pair("state", &state)
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", "S256")
            .append_pair("prompt", "select_account");

        Ok(AuthorizationRequest { url, state })
    }

    pub async fn exchange_code(
        &self,
        code: &str,
        verifier: &str,
        scopes: &[String],
    ) -> Result<TokenResponse, AuthError> {
        self.request_token(TokenGrant::AuthorizationCode { code, verifier }, scopes)
            .await
    }

    pub async fn refresh_token(
        &self,
        refresh_token: &str,
        scopes: &[String],
    ) -> Result<TokenResponse, AuthError> {
        self.request_token(TokenGrant::RefreshToken(refresh_token), scopes)
            .await
    }

    async fn request_token(
        &self,
        grant: TokenGrant<'_>,
        scopes: &[String],
    ) -> Result<TokenResponse, AuthError> {
        let scope = scope_param(scopes);
        let mut params = vec![
            ("client_id", self.client_id.as_str()),
            ("scope", scope.as_str()),
        ];
        match &grant {
            TokenGrant::AuthorizationCode { code, verifier } => {
                params.push(("grant_type", "authorization_code"));
                params.push(("code", code));
                params.push(("redirect_uri", self.redirect_uri.as_str()));
                params.push(("code_verifier", verifier));
            }
            TokenGrant::RefreshToken(token) => {
                params.push(("grant_type", "refresh_token"));
                params.push(("refresh_token", token));
            }
        }

        let response = self
            .http_client
            .post(&self.token_endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| grant.failure(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Token request failed: HTTP {} - {}", status, body);
            let message = serde_json::from_str::<TokenErrorResponse>(&body)
                .ok()
                .and_then(|e| e.error_description.or(e.error))
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Err(grant.failure(message));
        }

        let tokens: TokenResponse = response
            .json()
            .await
            .map_err(|e| grant.failure(e.to_string()))?;
        debug!("Token granted for scopes: {}", tokens.scope);
        Ok(tokens)
    }
}

/// The `scope` request parameter: Graph-qualified permissions plus `offline_access`.
pub fn scope_param(scopes: &[String]) -> String {
    let mut parts: Vec<String> = scopes
        .iter()
        .map(|s| {
            if s.contains("://") || OIDC_SCOPES.contains(&s.as_str()) {
                s.clone()
            } else {
                format!("{}{}", GRAPH_RESOURCE, s)
            }
        })
        .collect();
    if !parts.iter().any(|s| s == "offline_access") {
        parts.push("offline_access".to_string());
    }
    parts.join(" ")
}

// --- API Response Types ---

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: u64,
    pub refresh_token: Option<String>,
    /// Space-separated granted scopes.
    #[serde(default)]
    pub scope: String,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: Option<String>,
    error_description: Option<String>,
}

/// Extract `(code, state)` from the redirect the browser delivered.
pub fn parse_callback_url(url_string: &str) -> Result<(String, String), AuthError> {
    let url = Url::parse(url_string).map_err(|_| AuthError::InvalidAuthCode)?;
    let params: HashMap<_, _> = url.query_pairs().collect();

    if let Some(error) = params.get("error") {
        if error == "access_denied" {
            return Err(AuthError::UserCancelled);
        }
        let description = params
            .get("error_description")
            .map(|s| s.to_string())
            .unwrap_or_else(|| error.to_string());
        return Err(AuthError::OAuthFailed(description));
    }

    let code = params
        .get("code")
        .ok_or(AuthError::InvalidAuthCode)?
        .to_string();
    let state = params
        .get("state")
        .ok_or(AuthError::StateValidationFailed)?
        .to_string();

    Ok((code, state))
}
