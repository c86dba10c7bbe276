//! Playback driver: owns the output device and moves audio from the decode
//! worker to it, one non-blocking [`StreamPlayer::tick`] at a time.
//!
//! Control calls (`play`, `pause`, `stop`, `seek`, ...) only change state and
//! manage the decode worker. The device is touched exclusively inside `tick`
//! (and on drop), so the host decides which thread owns audio output.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use stream_player_types::{PlaybackState, PlayerStatus};

use crate::clock::{Clock, SystemClock};
use crate::config::PlayerConfig;
use crate::decode::DecodeJob;
use crate::output::{BufferPool, OutputDevice, VoiceId, VoiceState};
use crate::queue::PcmQueue;
use crate::source::{HttpMp3Opener, StreamOpener};
use crate::state::PlayerShared;
use crate::worker::DecodeWorker;

/// One decode run: the worker and the queue it fills.
struct Session {
    queue: Arc<PcmQueue>,
    worker: DecodeWorker,
}

/// Device handles held between the first active tick and release.
struct OutputResources {
    voice: VoiceId,
    pool: BufferPool,
}

/// Streaming MP3 player over an [`OutputDevice`].
pub struct StreamPlayer<D: OutputDevice> {
    device: D,
    config: PlayerConfig,
    opener: Arc<dyn StreamOpener>,
    clock: Arc<dyn Clock>,
    shared: Arc<PlayerShared>,
    session: Option<Session>,
    output: Option<OutputResources>,
    url: Option<String>,
    volume: f32,
    played_ms: u64,
    last_tick_ms: Option<u64>,
    /// The voice has been started since the last flush.
    playback_started: bool,
    /// Buffers submitted since the last flush.
    prebuffered: usize,
    /// Drop everything queued on the device at the next tick.
    flush_pending: bool,
}

impl<D: OutputDevice> StreamPlayer<D> {
    pub fn new(device: D) -> Self {
        Self::with_config(device, PlayerConfig::default())
    }

    /// HTTP + MP3 player with the given tuning and the wall clock.
    pub fn with_config(device: D, config: PlayerConfig) -> Self {
        let opener = Arc::new(HttpMp3Opener::new(
            config.http.clone(),
            config.max_corrupt_frames,
        ));
        Self::with_parts(device, config, opener, Arc::new(SystemClock::new()))
    }

    /// Fully injected constructor: byte source and time source included.
    pub fn with_parts(
        device: D,
        config: PlayerConfig,
        opener: Arc<dyn StreamOpener>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let volume = sanitize_volume(config.default_volume);
        Self {
            device,
            config,
            opener,
            clock,
            shared: Arc::new(PlayerShared::new()),
            session: None,
            output: None,
            url: None,
            volume,
            played_ms: 0,
            last_tick_ms: None,
            playback_started: false,
            prebuffered: 0,
            flush_pending: false,
        }
    }

    /// Start streaming `url` from the beginning, replacing any current stream.
    ///
    /// Never fails directly; problems surface as [`PlaybackState::Error`].
    pub fn play(&mut self, url: &str) {
        tracing::info!(url, "play");
        self.end_session();
        if self.output.is_some() {
            self.flush_pending = true;
        }
        self.playback_started = false;
        self.prebuffered = 0;
        self.played_ms = 0;
        self.last_tick_ms = None;
        self.shared.progress.reset();
        self.url = Some(url.to_string());

        let session = self.shared.begin_session();
        self.start_worker(session, url.to_string(), 0, false);
    }

    /// Pause output; decoding continues until the queue is full.
    pub fn pause(&mut self) {
        let state = self.state();
        if state.is_playing_or_buffering() && self.shared.transition(state, PlaybackState::Paused) {
            tracing::debug!(from = ?state, "paused");
        }
    }

    pub fn resume(&mut self) {
        let next = if self.playback_started {
            PlaybackState::Playing
        } else {
            PlaybackState::Buffering
        };
        if self.shared.transition(PlaybackState::Paused, next) {
            tracing::debug!(to = ?next, "resumed");
        }
    }

    /// Stop the current stream. Device resources go on the next tick; with no
    /// device yet the player settles in `Stopped` right away.
    pub fn stop(&mut self) {
        let state = self.state();
        self.shared.request_stop();
        self.shared.renew_session();
        self.end_session();
        if state.is_active() {
            self.shared.set_unless_error(PlaybackState::Stopping);
            tracing::info!("stop");
        }
        if self.output.is_none() {
            self.shared
                .transition(PlaybackState::Stopping, PlaybackState::Stopped);
        }
    }

    /// Restart decoding at the byte offset matching `target_ms`.
    ///
    /// A silent no-op unless the stream is active and [`Self::can_seek`] holds.
    pub fn seek(&mut self, target_ms: u64) {
        let state = self.state();
        if !matches!(
            state,
            PlaybackState::Buffering | PlaybackState::Playing | PlaybackState::Paused
        ) {
            tracing::debug!(?state, "seek ignored: no active stream");
            return;
        }
        let target = target_ms.min(self.duration_ms());
        let Some(offset) = self.shared.progress.seek_offset(target) else {
            tracing::debug!(target_ms, "seek ignored: length or bitrate unknown");
            return;
        };
        let Some(url) = self.url.clone() else {
            return;
        };

        tracing::info!(target_ms = target, offset, "seek");
        self.end_session();
        let session = self.shared.renew_session();
        self.played_ms = target;
        if self.output.is_some() {
            self.flush_pending = true;
        }
        self.playback_started = false;
        self.prebuffered = 0;
        if state != PlaybackState::Paused {
            self.shared.set_unless_error(PlaybackState::Buffering);
        }
        self.start_worker(session, url, offset, true);
    }

    /// Seek to a fraction of the duration; `progress` is clamped into `[0, 1]`.
    pub fn seek_to_progress(&mut self, progress: f32) {
        if !progress.is_finite() {
            return;
        }
        let duration = self.duration_ms();
        if duration == 0 {
            return;
        }
        let target = (duration as f64 * f64::from(progress.clamp(0.0, 1.0))).round() as u64;
        self.seek(target);
    }

    /// Output gain, clamped into `[0, 1]` (NaN counts as 0). Applied on the next tick.
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = sanitize_volume(volume);
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Advance playback. Call periodically (every few tens of ms) from the
    /// thread that owns the device. Never blocks.
    pub fn tick(&mut self) {
        let now = self.clock.now_ms();
        let delta = self
            .last_tick_ms
            .map_or(0, |last| now.saturating_sub(last));
        self.last_tick_ms = Some(now);

        let state = self.state();
        let stopping = self.shared.stop_requested() || state == PlaybackState::Stopping;

        if self.output.is_none() {
            if stopping {
                self.shared
                    .transition(PlaybackState::Stopping, PlaybackState::Stopped);
                return;
            }
            if !matches!(
                state,
                PlaybackState::Buffering | PlaybackState::Playing | PlaybackState::Paused
            ) {
                return;
            }
            if !self.init_output() {
                return;
            }
        }
        let Some(voice) = self.output.as_ref().map(|o| o.voice) else {
            return;
        };

        self.device.set_gain(voice, self.volume);

        if stopping {
            self.release_output();
            if let Some(session) = &self.session {
                session.queue.clear();
            }
            self.shared
                .transition(PlaybackState::Stopping, PlaybackState::Stopped);
            return;
        }

        if self.flush_pending {
            self.flush_output(voice);
        }

        if state == PlaybackState::Paused {
            self.device.pause(voice);
            self.reclaim_processed(voice);
            return;
        }

        self.reclaim_processed(voice);
        if self.playback_started
            && self.device.buffers_queued(voice) > 0
            && self.device.voice_state(voice) != VoiceState::Playing
        {
            tracing::debug!("restarting output voice");
            self.device.play(voice);
        }

        if self.device.voice_state(voice) == VoiceState::Playing {
            self.played_ms = self.played_ms.saturating_add(delta);
            let duration = self.duration_ms();
            if duration > 0 {
                self.played_ms = self.played_ms.min(duration);
            }
        }

        if !self.drain_queue(voice) {
            return;
        }

        let decode_done = self
            .session
            .as_ref()
            .is_none_or(|s| !s.worker.is_alive());
        let incoming_empty = self.session.as_ref().is_none_or(|s| s.queue.is_empty());

        // Streams shorter than the prebuffer start once nothing more is coming.
        if !self.playback_started && self.prebuffered > 0 && decode_done && incoming_empty {
            self.start_voice(voice);
        }

        if decode_done
            && (self.known_duration_reached() || (incoming_empty && self.output_drained(voice)))
        {
            self.finish_stream();
            return;
        }

        if !self.playback_started {
            self.shared
                .transition(PlaybackState::Playing, PlaybackState::Buffering);
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.state()
    }

    pub fn played_ms(&self) -> u64 {
        self.played_ms
    }

    /// Known duration if set, else the running decoded estimate.
    pub fn duration_ms(&self) -> u64 {
        self.shared.progress.duration_ms()
    }

    /// Authoritative duration from track metadata; `0` clears it.
    pub fn set_known_duration(&mut self, ms: u64) {
        self.shared.progress.set_known_duration(ms);
    }

    pub fn has_known_duration(&self) -> bool {
        self.shared.progress.known_duration_ms().is_some()
    }

    pub fn can_seek(&self) -> bool {
        self.shared.progress.can_seek()
    }

    pub fn is_decoding_complete(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.worker.is_complete())
    }

    /// Error text of the last failure; empty when healthy.
    pub fn last_error(&self) -> String {
        self.shared.last_error()
    }

    /// `played / duration` in `[0, 1]`; 0 while the duration is unknown.
    pub fn progress(&self) -> f32 {
        let duration = self.duration_ms();
        if duration == 0 {
            return 0.0;
        }
        (self.played_ms as f64 / duration as f64).clamp(0.0, 1.0) as f32
    }

    pub fn status(&self) -> PlayerStatus {
        PlayerStatus {
            state: self.state(),
            url: self.url.clone(),
            played_ms: self.played_ms,
            duration_ms: self.duration_ms(),
            duration_known: self.has_known_duration(),
            decoding_complete: self.is_decoding_complete(),
            can_seek: self.can_seek(),
            volume: self.volume,
            content_length: self.shared.progress.content_length(),
            bitrate_bps: self.shared.progress.bitrate_bps(),
            queued_chunks: self.session.as_ref().map_or(0, |s| s.queue.len()),
            last_error: self.last_error(),
        }
    }

    fn start_worker(&mut self, session: u64, url: String, offset: u64, seek_restart: bool) {
        let queue = Arc::new(PcmQueue::new(self.config.queue_capacity));
        let job = DecodeJob {
            url,
            offset,
            seek_restart,
            session,
            queue: queue.clone(),
            shared: self.shared.clone(),
            opener: self.opener.clone(),
            config: self.config.clone(),
            cancel: Arc::new(AtomicBool::new(false)),
            complete: Arc::new(AtomicBool::new(false)),
        };
        match DecodeWorker::spawn(job) {
            Ok(worker) => self.session = Some(Session { queue, worker }),
            Err(e) => self.shared.fail_session(session, format!("{e:#}")),
        }
    }

    /// Cancel and join the decode worker, dropping whatever it queued.
    fn end_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.worker.stop(self.config.join_timeout());
            let dropped = session.queue.clear();
            if dropped > 0 {
                tracing::debug!(dropped, "discarded queued chunks");
            }
        }
    }

    fn init_output(&mut self) -> bool {
        let voice = match self.device.create_voice() {
            Ok(v) => v,
            Err(e) => {
                self.fail_output(format!("output init failed: {e:#}"));
                return false;
            }
        };
        let buffers = match self.device.create_buffers(self.config.device_buffers.max(1)) {
            Ok(b) => b,
            Err(e) => {
                self.device.delete_voice(voice);
                self.fail_output(format!("output init failed: {e:#}"));
                return false;
            }
        };
        self.device.set_gain(voice, self.volume);
        tracing::debug!(voice, buffers = buffers.len(), "output initialised");
        self.output = Some(OutputResources {
            voice,
            pool: BufferPool::new(buffers),
        });
        self.playback_started = false;
        self.prebuffered = 0;
        self.flush_pending = false;
        true
    }

    /// Device-side failure: error state, and the worker has nobody to feed.
    fn fail_output(&mut self, message: String) {
        self.shared.fail(message);
        self.end_session();
    }

    fn release_output(&mut self) {
        let Some(output) = self.output.take() else {
            return;
        };
        self.device.stop(output.voice);
        for _ in 0..output.pool.all().len() {
            if self.device.unqueue_processed(output.voice).is_none() {
                break;
            }
        }
        self.device.delete_buffers(output.pool.all());
        self.device.delete_voice(output.voice);
        self.playback_started = false;
        self.prebuffered = 0;
        self.flush_pending = false;
        tracing::debug!(voice = output.voice, "output released");
    }

    /// Stop the voice and take every buffer back.
    fn flush_output(&mut self, voice: VoiceId) {
        self.device.stop(voice);
        self.reclaim_processed(voice);
        self.flush_pending = false;
        self.playback_started = false;
        self.prebuffered = 0;
        tracing::debug!("output flushed");
    }

    fn reclaim_processed(&mut self, voice: VoiceId) {
        let Some(output) = self.output.as_mut() else {
            return;
        };
        let mut n = self.device.buffers_processed(voice);
        while n > 0 {
            match self.device.unqueue_processed(voice) {
                Some(id) => output.pool.reclaim(id),
                None => break,
            }
            n -= 1;
        }
    }

    /// Fill free device buffers from the queue. `false` after a device failure.
    fn drain_queue(&mut self, voice: VoiceId) -> bool {
        let Some(queue) = self.session.as_ref().map(|s| s.queue.clone()) else {
            return true;
        };
        let prebuffer = self.config.prebuffer_chunks.max(1);
        loop {
            let Some(output) = self.output.as_mut() else {
                return true;
            };
            if output.pool.free_count() == 0 {
                return true;
            }
            let Some(chunk) = queue.poll() else {
                return true;
            };
            let Some(buffer) = output.pool.take_free() else {
                return true;
            };
            if let Err(e) = self.device.submit(voice, buffer, &chunk) {
                output.pool.return_free(buffer);
                self.fail_output(format!("output submit failed: {e:#}"));
                return false;
            }
            output.pool.mark_in_flight(buffer);
            self.prebuffered += 1;
            if !self.playback_started && self.prebuffered >= prebuffer {
                self.start_voice(voice);
            }
        }
    }

    fn start_voice(&mut self, voice: VoiceId) {
        self.device.play(voice);
        self.playback_started = true;
        if self.shared.set_unless_error(PlaybackState::Playing) {
            tracing::debug!(buffers = self.prebuffered, "playback started");
        }
    }

    /// Nothing left on the device: no queued buffers, or a voice that ran dry.
    fn output_drained(&self, voice: VoiceId) -> bool {
        let queued = self.device.buffers_queued(voice);
        queued == 0
            || (self.playback_started
                && self.device.voice_state(voice) == VoiceState::Stopped
                && self.device.buffers_processed(voice) >= queued)
    }

    /// Played time caught up with the metadata duration, whatever is still queued.
    fn known_duration_reached(&self) -> bool {
        self.shared
            .progress
            .known_duration_ms()
            .is_some_and(|known| self.played_ms >= known)
    }

    fn finish_stream(&mut self) {
        let duration = self.duration_ms();
        if duration > 0 {
            self.played_ms = duration;
        }
        self.release_output();
        if self.shared.set_unless_error(PlaybackState::Stopped) {
            tracing::info!(played_ms = self.played_ms, "end of stream");
        }
    }
}

impl<D: OutputDevice> Drop for StreamPlayer<D> {
    fn drop(&mut self) {
        self.shared.renew_session();
        self.end_session();
        self.release_output();
    }
}

fn sanitize_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        0.0
    } else {
        volume.clamp(0.0, 1.0)
    }
}
