use log::info;
use thiserror::Error;

use crate::config::OAuthSettings;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("OAuth client id is not configured")]
    MissingClientId,
    #[error("Invalid authorize URL: {0}")]
    InvalidUrl(String),
}

/// Where a login redirect should send the user.
#[derive(Debug, Clone, PartialEq)]
pub struct LoginRedirect {
    pub url: String,
    pub state: String,
}

/// Source of the authenticated identity. Tokens are opaque to the core.
pub trait IdentityProvider: Send + Sync {
    fn is_authenticated(&self) -> bool;
    fn token(&self) -> Option<String>;
    /// Starts the external redirect-based login flow.
    fn login(&self) -> Result<LoginRedirect, AuthError>;
}

/// Identity backed by an already-issued token.
pub struct TokenIdentity {
    token: Option<String>,
    oauth: OAuthSettings,
}

impl TokenIdentity {
    pub fn new(token: Option<String>, oauth: OAuthSettings) -> Self {
        Self {
            token: token.filter(|t| !t.trim().is_empty()),
            oauth,
        }
    }

    pub fn from_env(var: &str, oauth: OAuthSettings) -> Self {
        Self::new(std::env::var(var).ok(), oauth)
    }

    pub fn anonymous(oauth: OAuthSettings) -> Self {
        Self::new(None, oauth)
    }
}

impl IdentityProvider for TokenIdentity {
    fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    fn token(&self) -> Option<String> {
        self.token.clone()
    }

    fn login(&self) -> Result<LoginRedirect, AuthError> {
        if self.oauth.client_id.is_empty() {
            return Err(AuthError::MissingClientId);
        }
        let state = uuid::Uuid::new_v4().simple().to_string();
        let url = reqwest::Url::parse_with_params(
            &self.oauth.authorize_url,
            &[
                ("client_id", self.oauth.client_id.as_str()),
                ("redirect_uri", self.oauth.redirect_uri.as_str()),
                ("scope", self.oauth.scope.as_str()),
                ("state", state.as_str()),
            ],
        )
        .map_err(|e| AuthError::InvalidUrl(e.to_string()))?;
        info!("Login required: open {}", url);
        Ok(LoginRedirect {
            url: url.to_string(),
            state,
        })
    }
}
