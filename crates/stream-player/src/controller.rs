//! Track-level facade over [`StreamPlayer`]: end-of-track detection, pause
//! toggling and synced lyrics.

use stream_player_types::{PlaybackEndReason, PlaybackState};

use crate::lyrics::Lyrics;
use crate::output::OutputDevice;
use crate::player::StreamPlayer;

pub struct PlayerController<D: OutputDevice> {
    player: StreamPlayer<D>,
    lyrics: Lyrics,
    track_active: bool,
    manual_stop: bool,
}

impl<D: OutputDevice> PlayerController<D> {
    pub fn new(player: StreamPlayer<D>) -> Self {
        Self {
            player,
            lyrics: Lyrics::default(),
            track_active: false,
            manual_stop: false,
        }
    }

    pub fn player(&self) -> &StreamPlayer<D> {
        &self.player
    }

    pub fn player_mut(&mut self) -> &mut StreamPlayer<D> {
        &mut self.player
    }

    /// Start a track; `known_duration_ms` of 0 means "estimate while decoding".
    /// Lyrics of the previous track are dropped.
    pub fn play_track(&mut self, url: &str, known_duration_ms: u64) {
        self.player.play(url);
        if known_duration_ms > 0 {
            self.player.set_known_duration(known_duration_ms);
        }
        self.lyrics = Lyrics::default();
        self.track_active = true;
        self.manual_stop = false;
    }

    pub fn toggle_pause(&mut self) {
        match self.player.state() {
            PlaybackState::Paused => self.player.resume(),
            PlaybackState::Playing | PlaybackState::Buffering => self.player.pause(),
            _ => {}
        }
    }

    /// Stop on the user's behalf; the end is reported as `Stopped`, not `Eof`.
    pub fn stop_manually(&mut self) {
        self.manual_stop = true;
        self.player.stop();
    }

    pub fn set_lyrics(&mut self, lyrics: Lyrics) {
        tracing::debug!(lines = lyrics.lines().len(), "lyrics loaded");
        self.lyrics = lyrics;
    }

    pub fn lyrics(&self) -> &Lyrics {
        &self.lyrics
    }

    /// Active and upcoming lyric line at the current position.
    pub fn current_lyric(&self) -> (&str, &str) {
        self.lyrics.current_and_next(self.player.played_ms())
    }

    /// Drive the player; returns why the track ended, exactly once per track.
    pub fn tick(&mut self) -> Option<PlaybackEndReason> {
        self.player.tick();
        let state = self.player.state();

        if self.track_active && state.is_finished() {
            self.track_active = false;
            let reason = if state == PlaybackState::Error {
                PlaybackEndReason::Error
            } else if self.manual_stop {
                PlaybackEndReason::Stopped
            } else {
                PlaybackEndReason::Eof
            };
            self.manual_stop = false;
            tracing::info!(?reason, played = %format_time(self.player.played_ms()), "track ended");
            return Some(reason);
        }
        if state.is_playing_or_buffering() {
            self.track_active = true;
        }
        None
    }
}

/// `m:ss` with minutes unbounded.
pub fn format_time(ms: u64) -> String {
    let total = ms / 1000;
    format!("{}:{:02}", total / 60, total % 60)
}
