use crate::media::{AuthState, NowPlayingSnapshot, PlaybackObservation};
use crate::spotify_client::{PlayerResponse, SpotifyClient};
use crate::token_manager::TokenManager;
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Subset of the player endpoint payload we read
#[derive(Debug, Deserialize)]
struct PlayerState {
    is_playing: Option<bool>,
    currently_playing_type: Option<String>,
    item: Option<PlayingItem>,
}

#[derive(Debug, Deserialize)]
struct PlayingItem {
    name: Option<String>,
    #[serde(default)]
    artists: Vec<NamedRef>,
    show: Option<NamedRef>,
}

#[derive(Debug, Deserialize)]
struct NamedRef {
    name: Option<String>,
}

/// Turn a 200 body into an observation
///
/// `None` means the payload was unusable and the previous observation should
/// stand.
pub fn classify_player_state(body: &str) -> Option<PlaybackObservation> {
    let state: PlayerState = match serde_json::from_str(body) {
        Ok(state) => state,
        Err(e) => {
            log::debug!("Unreadable player payload: {}", e);
            return None;
        }
    };

    if !state.is_playing? {
        return Some(PlaybackObservation::idle());
    }

    match state.currently_playing_type.as_deref() {
        Some("track") => {
            let item = state.item?;
            let artist = item.artists.into_iter().next()?.name?;
            Some(PlaybackObservation::track(item.name?, artist))
        }
        Some("episode") => {
            let item = state.item?;
            let show = item.show?.name?;
            Some(PlaybackObservation::episode(item.name?, show))
        }
        _ => Some(PlaybackObservation::playing_unknown()),
    }
}

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not signed in, no request issued
    Skipped,
    /// The observation was replaced
    Updated,
    /// Transport failure, unexpected status or malformed payload
    Unchanged,
    /// The access token was rejected and a refresh was attempted
    Refreshed(AuthState),
}

#[derive(Debug)]
enum ManagerCommand {
    SignIn,
    Callback(String),
    SignOut,
}

/// Owns the OAuth session, the poller and the current observation
///
/// Every mutation goes through `&mut self`, so once the manager is moved into
/// its task by [`NowPlayingManager::spawn`] all state changes are serialized
/// onto that task.
pub struct NowPlayingManager {
    tokens: TokenManager,
    client: SpotifyClient,
    observation: PlaybackObservation,
    snapshot_tx: watch::Sender<NowPlayingSnapshot>,
}

impl NowPlayingManager {
    pub fn new(tokens: TokenManager, client: SpotifyClient) -> Self {
        let snapshot = NowPlayingSnapshot {
            auth_state: tokens.auth_state(),
            observation: PlaybackObservation::idle(),
        };
        let (snapshot_tx, _) = watch::channel(snapshot);

        Self {
            tokens,
            client,
            observation: PlaybackObservation::idle(),
            snapshot_tx,
        }
    }

    pub fn snapshot(&self) -> NowPlayingSnapshot {
        NowPlayingSnapshot {
            auth_state: self.tokens.auth_state(),
            observation: self.observation.clone(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<NowPlayingSnapshot> {
        self.snapshot_tx.subscribe()
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }

    /// Restore a persisted session, if any
    pub fn restore(&mut self) -> AuthState {
        let state = self.tokens.restore();
        self.publish();
        state
    }

    pub fn sign_in(&mut self) {
        self.tokens.sign_in();
        self.observation = PlaybackObservation::idle();
        self.publish();
    }

    /// Exchange the code in `redirect_url` and poll right away on success
    pub async fn handle_callback(&mut self, redirect_url: &str) {
        if self.tokens.handle_callback(redirect_url).await {
            self.publish();
            self.tick().await;
        }
    }

    pub fn sign_out(&mut self) {
        self.tokens.sign_out();
        self.observation = PlaybackObservation::idle();
        self.publish();
    }

    /// Poll the player endpoint once
    pub async fn tick(&mut self) -> TickOutcome {
        let Some(access_token) = self.tokens.access_token() else {
            return TickOutcome::Skipped;
        };

        let response = match self.client.current_playback(access_token).await {
            Ok(response) => response,
            Err(e) => {
                log::debug!("Now-playing request failed: {}", e);
                return TickOutcome::Unchanged;
            }
        };

        match response {
            PlayerResponse::NoContent => self.replace(PlaybackObservation::idle()),
            PlayerResponse::Unauthorized => {
                log::info!("Access token rejected by player endpoint");
                // Observation stays as it was, only the auth state may move
                let state = self.tokens.refresh().await;
                self.publish();
                TickOutcome::Refreshed(state)
            }
            PlayerResponse::Body(body) => match classify_player_state(&body) {
                Some(observation) => self.replace(observation),
                None => {
                    log::warn!("Player payload missing required fields, keeping previous state");
                    TickOutcome::Unchanged
                }
            },
            PlayerResponse::Other(status) => {
                log::warn!("Unexpected player endpoint status: {}", status);
                TickOutcome::Unchanged
            }
        }
    }

    fn replace(&mut self, observation: PlaybackObservation) -> TickOutcome {
        if self.observation != observation {
            log::debug!("Now playing: {:?}", observation);
        }
        self.observation = observation;
        self.publish();
        TickOutcome::Updated
    }

    async fn apply(&mut self, command: ManagerCommand) {
        match command {
            ManagerCommand::SignIn => self.sign_in(),
            ManagerCommand::Callback(url) => self.handle_callback(&url).await,
            ManagerCommand::SignOut => self.sign_out(),
        }
    }

    /// Move the manager onto its own task, ticking every `period`
    pub fn spawn(mut self, period: Duration) -> NowPlayingHandle {
        let (command_tx, mut command_rx) = mpsc::channel(16);
        let snapshots = self.subscribe();

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            log::info!("Started now-playing polling ({:?} interval)", period);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.tick().await;
                    }
                    command = command_rx.recv() => match command {
                        Some(command) => self.apply(command).await,
                        None => break,
                    },
                }
            }

            log::info!("Now-playing polling stopped");
        });

        NowPlayingHandle {
            command_tx,
            snapshots,
            task: Some(task),
        }
    }
}

/// Handle to a spawned [`NowPlayingManager`]; dropping it stops the task
pub struct NowPlayingHandle {
    command_tx: mpsc::Sender<ManagerCommand>,
    snapshots: watch::Receiver<NowPlayingSnapshot>,
    task: Option<JoinHandle<()>>,
}

impl NowPlayingHandle {
    pub async fn sign_in(&self) {
        self.send(ManagerCommand::SignIn).await;
    }

    pub async fn handle_callback(&self, redirect_url: impl Into<String>) {
        self.send(ManagerCommand::Callback(redirect_url.into())).await;
    }

    pub async fn sign_out(&self) {
        self.send(ManagerCommand::SignOut).await;
    }

    async fn send(&self, command: ManagerCommand) {
        if let Err(e) = self.command_tx.send(command).await {
            log::error!("Now-playing task is gone, dropped {:?}", e.0);
        }
    }

    /// Latest published state
    pub fn snapshot(&self) -> NowPlayingSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<NowPlayingSnapshot> {
        self.snapshots.clone()
    }

    /// Stop polling and wait for the task to finish
    pub async fn shutdown(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for NowPlayingHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{CredentialStore, MemoryStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
    use crate::media::MediaType;
    use crate::spotify_client::{AppCredentials, SpotifyEndpoints};
    use crate::token_manager::tests::{seed_session, test_manager};
    use std::sync::Arc;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn manager_for(base: &str) -> (NowPlayingManager, Arc<MemoryStore>) {
        let (tokens, store, _) = test_manager(base);
        let client = SpotifyClient::new(
            AppCredentials::new("client", "secret"),
            SpotifyEndpoints::with_base(base),
        )
        .unwrap();
        (NowPlayingManager::new(tokens, client), store)
    }

    async fn signed_in(server: &MockServer) -> (NowPlayingManager, Arc<MemoryStore>) {
        let (mut manager, store) = manager_for(&server.uri());
        seed_session(&store, "access", Some("refresh"));
        manager.restore();
        (manager, store)
    }

    async fn mount_player(server: &MockServer, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path("/v1/me/player"))
            .respond_with(response)
            .mount(server)
            .await;
    }

    #[test]
    fn test_classify_track() {
        let body = r#"{
            "is_playing": true,
            "currently_playing_type": "track",
            "item": {"name": "X", "artists": [{"name": "Y"}, {"name": "Z"}]}
        }"#;
        let observation = classify_player_state(body).unwrap();
        assert_eq!(observation, PlaybackObservation::track("X", "Y"));
        assert!(observation.is_playing());
        assert_eq!(observation.media_type(), MediaType::Track);
    }

    #[test]
    fn test_classify_episode() {
        let body = r#"{
            "is_playing": true,
            "currently_playing_type": "episode",
            "item": {"name": "Pilot", "show": {"name": "The Show"}}
        }"#;
        assert_eq!(
            classify_player_state(body),
            Some(PlaybackObservation::episode("Pilot", "The Show"))
        );
    }

    #[test]
    fn test_classify_paused_ignores_item() {
        let body = r#"{
            "is_playing": false,
            "currently_playing_type": "track",
            "item": {"name": "X", "artists": [{"name": "Y"}]}
        }"#;
        assert_eq!(classify_player_state(body), Some(PlaybackObservation::idle()));
    }

    #[test]
    fn test_classify_other_types() {
        let body = r#"{"is_playing": true, "currently_playing_type": "ad", "item": null}"#;
        let observation = classify_player_state(body).unwrap();
        assert!(observation.is_playing());
        assert_eq!(observation.media_type(), MediaType::None);
        assert!(observation.media().is_none());
    }

    #[test]
    fn test_classify_malformed_payloads() {
        assert_eq!(classify_player_state("<html>"), None);
        assert_eq!(classify_player_state(r#"{"currently_playing_type": "track"}"#), None);
        assert_eq!(
            classify_player_state(
                r#"{"is_playing": true, "currently_playing_type": "track", "item": {"name": "X", "artists": []}}"#
            ),
            None
        );
        assert_eq!(
            classify_player_state(
                r#"{"is_playing": true, "currently_playing_type": "episode", "item": {"name": "X"}}"#
            ),
            None
        );
    }

    #[tokio::test]
    async fn test_tick_without_session_issues_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let (mut manager, _) = manager_for(&server.uri());
        assert_eq!(manager.tick().await, TickOutcome::Skipped);
        assert_eq!(manager.tick().await, TickOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_tick_reads_track_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me/player"))
            .and(header("authorization", "Bearer access"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "is_playing": true,
                "currently_playing_type": "track",
                "item": {"name": "X", "artists": [{"name": "Y"}]}
            })))
            .mount(&server)
            .await;

        let (mut manager, _) = signed_in(&server).await;
        let mut snapshots = manager.subscribe();

        assert_eq!(manager.tick().await, TickOutcome::Updated);
        assert_eq!(manager.snapshot().observation, PlaybackObservation::track("X", "Y"));

        assert!(snapshots.has_changed().unwrap());
        let snapshot = snapshots.borrow_and_update().clone();
        assert_eq!(snapshot.auth_state, AuthState::Authenticated);
        assert_eq!(snapshot.observation, PlaybackObservation::track("X", "Y"));
    }

    #[tokio::test]
    async fn test_no_content_means_idle() {
        let server = MockServer::start().await;
        mount_player(&server, ResponseTemplate::new(204)).await;

        let (mut manager, _) = signed_in(&server).await;
        manager.observation = PlaybackObservation::track("Old", "Song");

        assert_eq!(manager.tick().await, TickOutcome::Updated);
        assert_eq!(manager.snapshot().observation, PlaybackObservation::idle());
    }

    #[tokio::test]
    async fn test_unauthorized_refreshes_once_and_keeps_observation() {
        let server = MockServer::start().await;
        mount_player(&server, ResponseTemplate::new(401)).await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "renewed"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (mut manager, store) = signed_in(&server).await;
        let before = PlaybackObservation::track("X", "Y");
        manager.observation = before.clone();

        assert_eq!(
            manager.tick().await,
            TickOutcome::Refreshed(AuthState::Authenticated)
        );
        assert_eq!(manager.snapshot().observation, before);
        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("renewed"));
    }

    #[tokio::test]
    async fn test_failed_refresh_after_unauthorized_signs_out() {
        let server = MockServer::start().await;
        mount_player(&server, ResponseTemplate::new(401)).await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant"
            })))
            .mount(&server)
            .await;

        let (mut manager, store) = signed_in(&server).await;
        let before = PlaybackObservation::track("X", "Y");
        manager.observation = before.clone();

        assert_eq!(
            manager.tick().await,
            TickOutcome::Refreshed(AuthState::Unauthenticated)
        );
        assert_eq!(manager.snapshot().auth_state, AuthState::Unauthenticated);
        assert_eq!(manager.snapshot().observation, before);
        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap(), None);
        assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap(), None);
        assert_eq!(manager.tick().await, TickOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_unexpected_status_and_bad_payload_keep_previous_state() {
        let server = MockServer::start().await;
        mount_player(&server, ResponseTemplate::new(503)).await;

        let (mut manager, _) = signed_in(&server).await;
        let before = PlaybackObservation::episode("Pilot", "The Show");
        manager.observation = before.clone();
        assert_eq!(manager.tick().await, TickOutcome::Unchanged);
        assert_eq!(manager.snapshot().observation, before);

        server.reset().await;
        mount_player(
            &server,
            ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "is_playing": true,
                "currently_playing_type": "track",
                "item": {"artists": [{"name": "Y"}]}
            })),
        )
        .await;
        assert_eq!(manager.tick().await, TickOutcome::Unchanged);
        assert_eq!(manager.snapshot().observation, before);
    }

    #[tokio::test]
    async fn test_transport_failure_keeps_previous_state() {
        // Nothing listens on the discard port
        let (mut manager, store) = manager_for("http://127.0.0.1:9");
        seed_session(&store, "access", Some("refresh"));
        manager.restore();
        manager.observation = PlaybackObservation::track("X", "Y");

        assert_eq!(manager.tick().await, TickOutcome::Unchanged);
        assert_eq!(manager.snapshot().observation, PlaybackObservation::track("X", "Y"));
        assert_eq!(manager.snapshot().auth_state, AuthState::Authenticated);
    }

    #[tokio::test]
    async fn test_callback_polls_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "access",
                "refresh_token": "refresh"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/me/player"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "is_playing": true,
                "currently_playing_type": "episode",
                "item": {"name": "Pilot", "show": {"name": "The Show"}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (mut manager, _) = manager_for(&server.uri());
        manager.handle_callback("clockwork://spotifyauth?code=abc").await;

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.auth_state, AuthState::Authenticated);
        assert_eq!(
            snapshot.observation,
            PlaybackObservation::episode("Pilot", "The Show")
        );
    }

    #[tokio::test]
    async fn test_sign_out_clears_media_and_credentials() {
        let server = MockServer::start().await;
        let (mut manager, store) = signed_in(&server).await;
        manager.observation = PlaybackObservation::track("X", "Y");

        manager.sign_out();

        assert_eq!(manager.snapshot(), NowPlayingSnapshot::default());
        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap(), None);
        assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_spawned_manager_polls_and_obeys_commands() {
        let server = MockServer::start().await;
        mount_player(
            &server,
            ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "is_playing": true,
                "currently_playing_type": "track",
                "item": {"name": "X", "artists": [{"name": "Y"}]}
            })),
        )
        .await;

        let (manager, _) = signed_in(&server).await;
        let handle = manager.spawn(Duration::from_millis(20));
        let mut snapshots = handle.subscribe();

        tokio::time::timeout(
            Duration::from_secs(5),
            snapshots.wait_for(|s| s.observation == PlaybackObservation::track("X", "Y")),
        )
        .await
        .expect("poll result published")
        .unwrap();

        handle.sign_out().await;
        tokio::time::timeout(
            Duration::from_secs(5),
            snapshots.wait_for(|s| s.auth_state == AuthState::Unauthenticated),
        )
        .await
        .expect("sign-out published")
        .unwrap();

        assert_eq!(handle.snapshot().observation, PlaybackObservation::idle());
        handle.shutdown().await;
    }
}
