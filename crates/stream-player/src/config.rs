use std::time::Duration;

use serde::Deserialize;

/// Tuning parameters shared by the decode worker and the playback driver.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Target duration of one decoded PCM chunk.
    pub chunk_ms: u32,
    /// Capacity of the PCM queue between decode thread and drive tick (chunks).
    pub queue_capacity: usize,
    /// Number of output device buffers owned by the voice.
    pub device_buffers: usize,
    /// Buffers submitted before the initial play command.
    pub prebuffer_chunks: usize,
    /// Sleep between enqueue attempts while the queue is full.
    pub enqueue_retry_ms: u64,
    /// Bounded wait for the decode worker on stop/seek.
    pub join_timeout_ms: u64,
    /// Consecutive corrupt frames tolerated before decoding gives up.
    pub max_corrupt_frames: u32,
    /// Initial output gain in `[0, 1]`.
    pub default_volume: f32,
    /// HTTP transport settings.
    pub http: HttpConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            chunk_ms: 150,
            queue_capacity: 24,
            device_buffers: 6,
            prebuffer_chunks: 3,
            enqueue_retry_ms: 10,
            join_timeout_ms: 1000,
            max_corrupt_frames: 8,
            default_volume: 1.0,
            http: HttpConfig::default(),
        }
    }
}

impl PlayerConfig {
    pub fn enqueue_retry(&self) -> Duration {
        Duration::from_millis(self.enqueue_retry_ms.max(1))
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

/// Settings for the streaming HTTP GET.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Connection establishment timeout.
    pub connect_timeout_ms: u64,
    /// Overall request timeout, applied until the response headers arrive.
    pub request_timeout_ms: u64,
    /// `User-Agent` header value.
    pub user_agent: String,
    /// Read buffer wrapped around the response body.
    pub read_buffer_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            request_timeout_ms: 30_000,
            user_agent: concat!("stream-player/", env!("CARGO_PKG_VERSION")).to_string(),
            read_buffer_bytes: 64 * 1024,
        }
    }
}

impl HttpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
