use serde::{Deserialize, Serialize};

/// Externally visible lifecycle of the streaming player.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PlaybackState {
    /// Nothing has been played yet.
    #[default]
    Idle = 0,
    /// Decoding has started but the prebuffer threshold is not reached yet.
    Buffering = 1,
    /// Audio is being rendered by the output device.
    Playing = 2,
    /// Paused by the caller; the device is paused on the next tick.
    Paused = 3,
    /// Stop requested; device resources are released on the next tick.
    Stopping = 4,
    /// Session finished (end of stream or stop).
    Stopped = 5,
    /// Transport, decode or device failure. Sticky until the next `play`.
    Error = 6,
}

impl PlaybackState {
    /// Decode a state previously stored with `as u8`.
    ///
    /// Unknown values map to `Error` so a corrupted value never looks healthy.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Buffering,
            2 => Self::Playing,
            3 => Self::Paused,
            4 => Self::Stopping,
            5 => Self::Stopped,
            _ => Self::Error,
        }
    }

    /// States in which a session owns (or is about to own) device resources.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Buffering | Self::Playing | Self::Paused | Self::Stopping
        )
    }

    /// States counted as "a track is in progress" by hosts.
    pub fn is_playing_or_buffering(self) -> bool {
        matches!(self, Self::Buffering | Self::Playing)
    }

    /// States after which no further audio will be produced for the session.
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Idle | Self::Stopped | Self::Error)
    }
}

/// Reason why a track stopped producing audio.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackEndReason {
    /// Natural end of stream.
    Eof,
    /// Decoder, transport, or output error interrupted playback.
    Error,
    /// Playback was explicitly stopped by the caller.
    Stopped,
}

/// Point-in-time view of the player, suitable for status lines and UIs.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PlayerStatus {
    /// Current lifecycle state.
    pub state: PlaybackState,
    /// URL of the current stream, if any.
    pub url: Option<String>,
    /// Elapsed playback time in milliseconds.
    pub played_ms: u64,
    /// Known or estimated total duration in milliseconds (0 when unknown).
    pub duration_ms: u64,
    /// Whether `duration_ms` came from caller metadata rather than the estimate.
    pub duration_known: bool,
    /// Whether the decode worker reached the natural end of the stream.
    pub decoding_complete: bool,
    /// Whether a byte-range seek is currently possible.
    pub can_seek: bool,
    /// Output gain in `[0, 1]`.
    pub volume: f32,
    /// Total stream length in bytes, when the server reported it.
    pub content_length: Option<u64>,
    /// Bitrate detected from the first decoded frame (bits/sec).
    pub bitrate_bps: Option<u32>,
    /// Chunks waiting in the PCM queue.
    pub queued_chunks: usize,
    /// Last error text; empty when healthy.
    pub last_error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_u8_roundtrips_known_states() {
        for state in [
            PlaybackState::Idle,
            PlaybackState::Buffering,
            PlaybackState::Playing,
            PlaybackState::Paused,
            PlaybackState::Stopping,
            PlaybackState::Stopped,
            PlaybackState::Error,
        ] {
            assert_eq!(PlaybackState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn from_u8_unknown_is_error() {
        assert_eq!(PlaybackState::from_u8(42), PlaybackState::Error);
    }

    #[test]
    fn active_states_exclude_terminal_ones() {
        assert!(PlaybackState::Buffering.is_active());
        assert!(PlaybackState::Stopping.is_active());
        assert!(!PlaybackState::Idle.is_active());
        assert!(!PlaybackState::Stopped.is_active());
        assert!(!PlaybackState::Error.is_active());
    }

    #[test]
    fn state_serializes_snake_case() {
        let json = serde_json::to_string(&PlaybackState::Buffering).unwrap();
        assert_eq!(json, "\"buffering\"");
        let reason = serde_json::to_string(&PlaybackEndReason::Eof).unwrap();
        assert_eq!(reason, "\"eof\"");
    }

    #[test]
    fn status_default_is_idle_and_empty() {
        let status = PlayerStatus::default();
        assert_eq!(status.state, PlaybackState::Idle);
        assert_eq!(status.duration_ms, 0);
        assert!(status.last_error.is_empty());
    }
}
