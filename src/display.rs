use crate::config::AppConfig;
use crate::media::{AuthState, MediaType, NowPlayingSnapshot};
use chrono::{DateTime, TimeZone};

const CONNECT_PROMPT: &str = "Connect to Spotify";
const IDLE_HINT: &str = "Play some music on Spotify for it to show up here";

/// Clock text for `time` according to the user's settings
pub fn format_time<Tz: TimeZone>(time: &DateTime<Tz>, config: &AppConfig) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let pattern = match (config.use_24_hour_time, config.show_seconds) {
        (true, true) => "%H:%M:%S",
        (true, false) => "%H:%M",
        (false, true) => "%-I:%M:%S %p",
        (false, false) => "%-I:%M %p",
    };
    time.format(pattern).to_string()
}

/// Lines shown under the clock
pub fn now_playing_lines(snapshot: &NowPlayingSnapshot) -> Vec<String> {
    if snapshot.auth_state == AuthState::Unauthenticated {
        return vec![CONNECT_PROMPT.to_string()];
    }

    let observation = &snapshot.observation;
    match (observation.is_playing(), observation.media()) {
        (true, Some(media)) => {
            let subtitle = match observation.media_type() {
                MediaType::Episode => format!("from {}", media.subtitle),
                _ => format!("by {}", media.subtitle),
            };
            vec![media.title.clone(), subtitle]
        }
        _ => vec![IDLE_HINT.to_string()],
    }
}

/// Single status line for the terminal front end
pub fn status_line<Tz: TimeZone>(
    time: &DateTime<Tz>,
    config: &AppConfig,
    snapshot: &NowPlayingSnapshot,
) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "{}  |  {}",
        format_time(time, config),
        now_playing_lines(snapshot).join(" ")
    )
}
