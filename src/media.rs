/// Whether the app currently holds a usable access token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthState {
    #[default]
    Unauthenticated,
    Authenticated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaType {
    #[default]
    None,
    Track,
    Episode,
}

/// Title plus artist (tracks) or show name (episodes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaInfo {
    pub title: String,
    pub subtitle: String,
}

/// Remote playback state as seen by one poll
///
/// `media` is only ever set while something is playing, so the fields are
/// private and the constructors below are the only way to build one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlaybackObservation {
    is_playing: bool,
    media_type: MediaType,
    media: Option<MediaInfo>,
}

impl PlaybackObservation {
    /// Nothing is playing
    pub fn idle() -> Self {
        Self::default()
    }

    /// Playback is active but the item is of a kind we don't display
    pub fn playing_unknown() -> Self {
        Self {
            is_playing: true,
            media_type: MediaType::None,
            media: None,
        }
    }

    pub fn track(title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self::playing(MediaType::Track, title.into(), artist.into())
    }

    pub fn episode(title: impl Into<String>, show: impl Into<String>) -> Self {
        Self::playing(MediaType::Episode, title.into(), show.into())
    }

    fn playing(media_type: MediaType, title: String, subtitle: String) -> Self {
        Self {
            is_playing: true,
            media_type,
            media: Some(MediaInfo { title, subtitle }),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn media(&self) -> Option<&MediaInfo> {
        self.media.as_ref()
    }
}

/// What the view layer gets to see after every state change
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NowPlayingSnapshot {
    pub auth_state: AuthState,
    pub observation: PlaybackObservation,
}
