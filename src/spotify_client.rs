use crate::error::{ClockworkError, Result};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

const AUTHORIZE_URL: &str = "https://accounts.spotify.com/authorize";
const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const PLAYER_URL: &str = "https://api.spotify.com/v1/me/player?additional_types=track,episode";

/// Custom-scheme target the OS hands back to us after authorization
pub const REDIRECT_URI: &str = "clockwork://spotifyauth";

/// Everything needed to display current playback, nothing more
pub const SCOPES: [&str; 3] = [
    "user-read-playback-state",
    "user-read-currently-playing",
    "user-read-playback-position",
];

/// Where the provider lives; overridable so tests can target a mock server
#[derive(Debug, Clone)]
pub struct SpotifyEndpoints {
    pub authorize_url: String,
    pub token_url: String,
    pub player_url: String,
}

impl Default for SpotifyEndpoints {
    fn default() -> Self {
        Self {
            authorize_url: AUTHORIZE_URL.to_string(),
            token_url: TOKEN_URL.to_string(),
            player_url: PLAYER_URL.to_string(),
        }
    }
}

impl SpotifyEndpoints {
    /// Same paths as the real service, rooted at `base`
    #[cfg(test)]
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            authorize_url: format!("{}/authorize", base),
            token_url: format!("{}/api/token", base),
            player_url: format!("{}/v1/me/player?additional_types=track,episode", base),
        }
    }
}

/// The registered application identity
#[derive(Clone)]
pub struct AppCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl std::fmt::Debug for AppCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}

impl AppCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: REDIRECT_URI.to_string(),
        }
    }

    /// Read the client id and secret from the environment
    pub fn from_env() -> Result<Self> {
        let client_id = std::env::var("SPOTIFY_CLIENT_ID").map_err(|_| {
            ClockworkError::AuthenticationFailed(
                "SPOTIFY_CLIENT_ID environment variable not set".to_string(),
            )
        })?;

        let client_secret = std::env::var("SPOTIFY_CLIENT_SECRET").map_err(|_| {
            ClockworkError::AuthenticationFailed(
                "SPOTIFY_CLIENT_SECRET environment variable not set".to_string(),
            )
        })?;

        Ok(Self::new(client_id, client_secret))
    }
}

/// Body of a token endpoint reply; every field is optional because both
/// success and error replies share the endpoint
#[derive(Debug, Default, Deserialize)]
pub struct TokenResponse {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug)]
pub struct TokenReply {
    pub status: StatusCode,
    pub body: TokenResponse,
}

/// Player endpoint reply, bucketed by status code
#[derive(Debug, PartialEq)]
pub enum PlayerResponse {
    /// 204: nothing is active on any device
    NoContent,
    /// 401: the access token was rejected
    Unauthorized,
    /// 200 with the raw JSON body
    Body(String),
    Other(StatusCode),
}

/// Thin HTTP layer over the accounts and player endpoints
#[derive(Debug, Clone)]
pub struct SpotifyClient {
    http: Client,
    credentials: AppCredentials,
    endpoints: SpotifyEndpoints,
}

impl SpotifyClient {
    /// Create a client with its own HTTP connection pool
    pub fn new(credentials: AppCredentials, endpoints: SpotifyEndpoints) -> Result<Self> {
        let http = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self::with_http(http, credentials, endpoints))
    }

    pub fn with_http(http: Client, credentials: AppCredentials, endpoints: SpotifyEndpoints) -> Self {
        Self {
            http,
            credentials,
            endpoints,
        }
    }

    /// Build the URL the user has to visit to grant access
    pub fn authorize_url(&self) -> String {
        format!(
            "{}?client_id={}&response_type=code&redirect_uri={}&scope={}&show_dialog=true",
            self.endpoints.authorize_url,
            urlencoding::encode(&self.credentials.client_id),
            urlencoding::encode(&self.credentials.redirect_uri),
            urlencoding::encode(&SCOPES.join(" ")),
        )
    }

    /// Trade an authorization code for a token pair
    pub async fn exchange_code(&self, code: &str) -> Result<TokenReply> {
        self.request_token(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.credentials.redirect_uri.as_str()),
        ])
        .await
    }

    /// Trade a refresh token for a new access token
    pub async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenReply> {
        self.request_token(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<TokenReply> {
        let response = self
            .http
            .post(&self.endpoints.token_url)
            .basic_auth(&self.credentials.client_id, Some(&self.credentials.client_secret))
            .form(form)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        let body: TokenResponse = serde_json::from_str(&text)?;

        Ok(TokenReply { status, body })
    }

    /// Ask for the current playback state of the signed-in user
    pub async fn current_playback(&self, access_token: &str) -> Result<PlayerResponse> {
        let response = self
            .http
            .get(&self.endpoints.player_url)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        log::debug!("Player endpoint answered {}", status);

        match status {
            StatusCode::NO_CONTENT => Ok(PlayerResponse::NoContent),
            StatusCode::UNAUTHORIZED => Ok(PlayerResponse::Unauthorized),
            StatusCode::OK => Ok(PlayerResponse::Body(response.text().await?)),
            other => Ok(PlayerResponse::Other(other)),
        }
    }
}
