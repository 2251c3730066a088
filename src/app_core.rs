use crate::browser::SystemBrowser;
use crate::config::AppConfig;
use crate::credentials::{CredentialStore, KeyringStore, MemoryStore, ACCESS_TOKEN_KEY};
use crate::display;
use crate::error::{ClockworkError, Result};
use crate::now_playing::{NowPlayingHandle, NowPlayingManager};
use crate::spotify_client::{AppCredentials, SpotifyClient, SpotifyEndpoints};
use crate::token_manager::TokenManager;
use crate::update_manager::{UpdateHandle, UpdateManager, UpdateState};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};

const CALLBACK_SCHEME: &str = "clockwork://";

/// Events that can occur in the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    SignIn,
    SpotifyCallback(String),
    SignOut,
    ToggleSeconds,
    Toggle24Hour,
    CheckForUpdates,
    Quit,
}

impl AppEvent {
    /// Interpret one line typed (or pasted) on stdin
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();

        if line.starts_with(CALLBACK_SCHEME) {
            return Some(AppEvent::SpotifyCallback(line.to_string()));
        }

        match line.to_ascii_lowercase().as_str() {
            "connect" | "signin" => Some(AppEvent::SignIn),
            "disconnect" | "signout" => Some(AppEvent::SignOut),
            "seconds" => Some(AppEvent::ToggleSeconds),
            "24h" => Some(AppEvent::Toggle24Hour),
            "update" => Some(AppEvent::CheckForUpdates),
            "quit" | "exit" => Some(AppEvent::Quit),
            _ => None,
        }
    }
}

/// Main application structure coordinating all components
pub struct App {
    config: AppConfig,
    now_playing: NowPlayingHandle,
    updates: UpdateHandle,
    event_rx: mpsc::Receiver<AppEvent>,
    event_tx: mpsc::Sender<AppEvent>,
}

impl App {
    /// Create a new App instance, initializing all components
    pub fn new() -> Result<Self> {
        log::info!("Initializing application components");

        // Load configuration from disk
        let config = AppConfig::load()?;
        log::info!("Configuration loaded");

        // Create event channel for communication between components
        let (event_tx, event_rx) = mpsc::channel(100);

        // Initialize Spotify session and start polling
        let client = SpotifyClient::new(AppCredentials::from_env()?, SpotifyEndpoints::default())?;
        let tokens = TokenManager::new(
            client.clone(),
            credential_store(),
            Arc::new(SystemBrowser),
        );

        let mut manager = NowPlayingManager::new(tokens, client);
        manager.restore();
        let now_playing = manager.spawn(Duration::from_secs(config.poll_interval_secs.max(1)));
        log::info!("Now-playing manager started");

        // Start periodic update checks
        let updates = UpdateManager::new()?.spawn(Duration::from_secs(
            config.update_check_interval_secs.max(60),
        ));
        log::info!("Update manager started");

        Ok(Self {
            config,
            now_playing,
            updates,
            event_rx,
            event_tx,
        })
    }

    /// Sender for feeding events from outside the loop
    pub fn event_sender(&self) -> mpsc::Sender<AppEvent> {
        self.event_tx.clone()
    }

    /// Run the main event loop
    pub async fn run(mut self) -> Result<()> {
        log::info!("Starting main event loop");

        spawn_stdin_reader(self.event_tx.clone());

        let mut render = interval(Duration::from_secs(1));
        render.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Redraw as soon as playback or update state moves
        let mut snapshots = self.now_playing.subscribe();
        let mut update_states = self.updates.subscribe();

        loop {
            tokio::select! {
                _ = render.tick() => {
                    self.render()?;
                }
                Ok(()) = snapshots.changed() => {
                    self.render()?;
                }
                Ok(()) = update_states.changed() => {
                    let state = update_states.borrow_and_update().clone();
                    report_update_state(&state);
                }
                Some(event) = self.event_rx.recv() => {
                    match event {
                        AppEvent::SignIn => self.now_playing.sign_in().await,
                        AppEvent::SpotifyCallback(url) => self.now_playing.handle_callback(url).await,
                        AppEvent::SignOut => self.now_playing.sign_out().await,
                        AppEvent::ToggleSeconds => {
                            self.config.show_seconds = !self.config.show_seconds;
                            self.save_config();
                        }
                        AppEvent::Toggle24Hour => {
                            self.config.use_24_hour_time = !self.config.use_24_hour_time;
                            self.save_config();
                        }
                        AppEvent::CheckForUpdates => self.updates.check_now(),
                        AppEvent::Quit => {
                            log::info!("Quit event received");
                            break;
                        }
                    }
                    self.render()?;
                }
                _ = tokio::signal::ctrl_c() => {
                    log::info!("Interrupted");
                    break;
                }
            }
        }

        self.shutdown().await
    }

    fn render(&self) -> Result<()> {
        let line = display::status_line(&chrono::Local::now(), &self.config, &self.now_playing.snapshot());

        let mut stdout = std::io::stdout().lock();
        write!(stdout, "\r\x1b[2K{}", line)
            .and_then(|_| stdout.flush())
            .map_err(|e| ClockworkError::UIError(format!("Failed to draw status line: {}", e)))
    }

    fn save_config(&self) {
        if let Err(e) = self.config.save() {
            log::error!("Failed to save settings: {}", e);
        }
    }

    /// Perform graceful shutdown
    async fn shutdown(self) -> Result<()> {
        log::info!("Shutting down application");

        // Stop background tasks
        self.now_playing.shutdown().await;
        self.updates.shutdown().await;

        // Save configuration
        self.config.save()?;
        log::info!("Configuration saved");

        println!();
        log::info!("Shutdown complete");
        Ok(())
    }
}

/// Tell the user what the last update check found
fn report_update_state(state: &UpdateState) -> Option<String> {
    let message = if let Some(error) = &state.error_message {
        error.clone()
    } else if let Some(path) = state.downloaded_app_path.as_ref().filter(|_| state.download_complete) {
        format!("Update downloaded to {:?}, replace the installed app to finish", path)
    } else if state.update_available {
        "Update available".to_string()
    } else {
        return None;
    };

    if state.error_message.is_some() {
        log::warn!("{}", message);
    } else {
        log::info!("{}", message);
    }
    Some(message)
}

/// Keychain-backed store, or a process-local one if the keychain can't be read
fn credential_store() -> Arc<dyn CredentialStore> {
    let keyring = KeyringStore::new();

    match keyring.get(ACCESS_TOKEN_KEY) {
        Ok(_) => Arc::new(keyring),
        Err(e) => {
            log::warn!("Keychain unavailable ({}), Spotify session will not survive a restart", e);
            Arc::new(MemoryStore::new())
        }
    }
}

/// Forward stdin lines as events until stdin closes
fn spawn_stdin_reader(event_tx: mpsc::Sender<AppEvent>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        while let Ok(Some(line)) = lines.next_line().await {
            match AppEvent::parse(&line) {
                Some(event) => {
                    if event_tx.send(event).await.is_err() {
                        break;
                    }
                }
                None if line.trim().is_empty() => {}
                None => log::warn!(
                    "Unknown command {:?} (connect, disconnect, seconds, 24h, update, quit)",
                    line.trim()
                ),
            }
        }
    });
}
