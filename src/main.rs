mod app_core;
mod browser;
mod config;
mod credentials;
mod display;
mod error;
mod media;
mod now_playing;
mod spotify_client;
mod token_manager;
mod update_manager;

use app_core::{App, AppEvent};
use error::ClockworkError;

/// Info by default; `filters` (RUST_LOG syntax) overrides it
fn logger_builder(filters: Option<&str>) -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(log::LevelFilter::Info);
    if let Some(filters) = filters {
        builder.parse_filters(filters);
    }
    builder
}

#[tokio::main]
async fn main() -> Result<(), ClockworkError> {
    // Initialize logging
    logger_builder(std::env::var("RUST_LOG").ok().as_deref()).init();

    log::info!("Starting Clockwork...");

    let app = App::new()?;

    // The OS launches us with the redirect URL after the user grants access
    let launch_callback = std::env::args()
        .nth(1)
        .and_then(|arg| AppEvent::parse(&arg))
        .filter(|event| matches!(event, AppEvent::SpotifyCallback(_)));

    if let Some(callback) = launch_callback {
        if let Err(e) = app.event_sender().send(callback).await {
            log::error!("Failed to queue launch argument: {}", e);
        }
    }

    log::info!("Clockwork initialized successfully");
    app.run().await
}
