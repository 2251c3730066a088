use crate::browser::UrlOpener;
use crate::credentials::{CredentialStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
use crate::media::AuthState;
use crate::spotify_client::{SpotifyClient, TokenReply};
use reqwest::StatusCode;
use std::sync::Arc;
use url::Url;

/// Access token plus the refresh token that renews it
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish()
    }
}

/// Owns the OAuth session: sign-in, code exchange, refresh and sign-out
///
/// Failures never propagate out of here. They are logged and, where the
/// session can no longer be trusted, the manager falls back to
/// [`AuthState::Unauthenticated`].
pub struct TokenManager {
    client: SpotifyClient,
    store: Arc<dyn CredentialStore>,
    opener: Arc<dyn UrlOpener>,
    tokens: Option<TokenPair>,
}

impl TokenManager {
    pub fn new(
        client: SpotifyClient,
        store: Arc<dyn CredentialStore>,
        opener: Arc<dyn UrlOpener>,
    ) -> Self {
        Self {
            client,
            store,
            opener,
            tokens: None,
        }
    }

    /// Authenticated exactly while a non-empty access token is held
    pub fn auth_state(&self) -> AuthState {
        match &self.tokens {
            Some(pair) if !pair.access_token.is_empty() => AuthState::Authenticated,
            _ => AuthState::Unauthenticated,
        }
    }

    pub fn access_token(&self) -> Option<&str> {
        self.tokens
            .as_ref()
            .map(|pair| pair.access_token.as_str())
            .filter(|token| !token.is_empty())
    }

    /// Pick up a session persisted by an earlier run
    pub fn restore(&mut self) -> AuthState {
        let access_token = match self.store.get(ACCESS_TOKEN_KEY) {
            Ok(Some(token)) if !token.is_empty() => token,
            Ok(_) => {
                log::info!("No stored Spotify session");
                return AuthState::Unauthenticated;
            }
            Err(e) => {
                log::warn!("Failed to read stored access token: {}", e);
                return AuthState::Unauthenticated;
            }
        };

        let refresh_token = self.store.get(REFRESH_TOKEN_KEY).unwrap_or_else(|e| {
            log::warn!("Failed to read stored refresh token: {}", e);
            None
        });

        self.tokens = Some(TokenPair {
            access_token,
            refresh_token,
        });
        log::info!("Restored Spotify session from credential store");
        self.auth_state()
    }

    /// Drop any current session and send the user to the consent page
    pub fn sign_in(&mut self) {
        self.clear_session();

        let url = self.client.authorize_url();
        log::info!("Opening Spotify authorization page");

        if let Err(e) = self.opener.open(&url) {
            log::error!("Failed to open browser: {}", e);
            log::info!("Visit this URL to connect Spotify: {}", url);
        }
    }

    /// Handle the redirect delivered through the custom URL scheme
    ///
    /// Returns true when the callback produced an authenticated session.
    pub async fn handle_callback(&mut self, redirect_url: &str) -> bool {
        let url = match Url::parse(redirect_url) {
            Ok(url) => url,
            Err(e) => {
                log::warn!("Ignoring malformed callback URL: {}", e);
                return false;
            }
        };

        let code = url
            .query_pairs()
            .find(|(name, _)| name == "code")
            .map(|(_, value)| value.into_owned());

        match code {
            Some(code) => self.exchange_code(&code).await,
            None => {
                log::debug!("Callback carried no authorization code");
                false
            }
        }
    }

    async fn exchange_code(&mut self, code: &str) -> bool {
        let reply = match self.client.exchange_code(code).await {
            Ok(reply) => reply,
            Err(e) => {
                log::warn!("Authorization code exchange failed: {}", e);
                return false;
            }
        };

        if let Some(error) = &reply.body.error {
            log::warn!(
                "Authorization code rejected: {} {}",
                error,
                reply.body.error_description.as_deref().unwrap_or_default()
            );
            return false;
        }

        let Some(access_token) = reply.body.access_token.filter(|token| !token.is_empty()) else {
            log::warn!("Token response carried no access token");
            return false;
        };

        self.tokens = Some(TokenPair {
            access_token,
            refresh_token: reply.body.refresh_token,
        });
        self.persist();

        log::info!("Successfully authenticated with Spotify");
        self.auth_state() == AuthState::Authenticated
    }

    /// Renew the access token; any failure ends the session
    pub async fn refresh(&mut self) -> AuthState {
        let Some(refresh_token) = self.tokens.as_ref().and_then(|pair| pair.refresh_token.clone())
        else {
            log::warn!("No refresh token available, signing out");
            self.clear_session();
            return AuthState::Unauthenticated;
        };

        log::info!("Refreshing Spotify access token");

        match self.client.refresh_access_token(&refresh_token).await {
            Ok(TokenReply { status, body }) if status == StatusCode::OK => match body
                .access_token
                .filter(|token| !token.is_empty())
            {
                Some(access_token) => {
                    self.tokens = Some(TokenPair {
                        access_token,
                        refresh_token: body.refresh_token.or(Some(refresh_token)),
                    });
                    self.persist();
                    log::info!("Token refreshed successfully");
                }
                None => {
                    log::warn!("Refresh response carried no access token, signing out");
                    self.clear_session();
                }
            },
            Ok(TokenReply { status, body }) => {
                log::warn!(
                    "Token refresh rejected ({}): {}, signing out",
                    status,
                    body.error.as_deref().unwrap_or("no error given")
                );
                self.clear_session();
            }
            Err(e) => {
                log::warn!("Token refresh failed: {}, signing out", e);
                self.clear_session();
            }
        }

        self.auth_state()
    }

    pub fn sign_out(&mut self) {
        self.clear_session();
        log::info!("Signed out of Spotify");
    }

    fn clear_session(&mut self) {
        self.tokens = None;

        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY] {
            if let Err(e) = self.store.delete(key) {
                log::warn!("Failed to remove {} from credential store: {}", key, e);
            }
        }
    }

    fn persist(&self) {
        let Some(pair) = &self.tokens else {
            return;
        };

        if let Err(e) = self.store.set(ACCESS_TOKEN_KEY, &pair.access_token) {
            log::warn!("Failed to store access token: {}", e);
        }

        let result = match &pair.refresh_token {
            Some(token) => self.store.set(REFRESH_TOKEN_KEY, token),
            None => self.store.delete(REFRESH_TOKEN_KEY),
        };
        if let Err(e) = result {
            log::warn!("Failed to store refresh token: {}", e);
        }
    }
}
