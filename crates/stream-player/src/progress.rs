//! Duration and seek bookkeeping shared between the decode thread and the driver.
//!
//! The decode thread writes the running decoded duration, the content length
//! and the detected bitrate; the driver reads them every tick. All fields are
//! plain atomics, `0` standing for "unknown".

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct Progress {
    decoded_us: AtomicU64,
    known_duration_ms: AtomicU64,
    content_length: AtomicU64,
    bitrate_bps: AtomicU32,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything about the previous stream.
    pub fn reset(&self) {
        self.decoded_us.store(0, Ordering::Relaxed);
        self.known_duration_ms.store(0, Ordering::Relaxed);
        self.content_length.store(0, Ordering::Relaxed);
        self.bitrate_bps.store(0, Ordering::Relaxed);
    }

    pub fn add_decoded(&self, duration: Duration) {
        self.decoded_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Running total of decoded audio; under-reports until decoding completes.
    pub fn decoded_ms(&self) -> u64 {
        self.decoded_us.load(Ordering::Relaxed) / 1000
    }

    /// Authoritative duration from track metadata; `0` clears it.
    pub fn set_known_duration(&self, ms: u64) {
        self.known_duration_ms.store(ms, Ordering::Relaxed);
    }

    pub fn known_duration_ms(&self) -> Option<u64> {
        nonzero(self.known_duration_ms.load(Ordering::Relaxed))
    }

    pub fn set_content_length(&self, bytes: u64) {
        self.content_length.store(bytes, Ordering::Relaxed);
    }

    pub fn content_length(&self) -> Option<u64> {
        nonzero(self.content_length.load(Ordering::Relaxed))
    }

    /// Keep the first non-zero bitrate seen for the stream.
    pub fn record_bitrate(&self, bps: u32) {
        if bps == 0 {
            return;
        }
        let _ = self
            .bitrate_bps
            .compare_exchange(0, bps, Ordering::Relaxed, Ordering::Relaxed);
    }

    pub fn bitrate_bps(&self) -> Option<u32> {
        let v = self.bitrate_bps.load(Ordering::Relaxed);
        (v > 0).then_some(v)
    }

    /// Known duration when available, otherwise the decoded estimate (0 if neither).
    pub fn duration_ms(&self) -> u64 {
        self.known_duration_ms().unwrap_or_else(|| self.decoded_ms())
    }

    /// Detected bitrate, or one derived from content length and known duration.
    pub fn effective_bitrate_bps(&self) -> Option<u64> {
        if let Some(bps) = self.bitrate_bps() {
            return Some(u64::from(bps));
        }
        let len = self.content_length()?;
        let known = self.known_duration_ms()?;
        estimate_bitrate_bps(len, known)
    }

    pub fn can_seek(&self) -> bool {
        self.duration_ms() > 0
            && self.content_length().is_some()
            && self.effective_bitrate_bps().is_some()
    }

    /// Byte offset for `target_ms`, or `None` when seeking is not possible.
    pub fn seek_offset(&self, target_ms: u64) -> Option<u64> {
        if !self.can_seek() {
            return None;
        }
        let bitrate = self.effective_bitrate_bps()?;
        let len = self.content_length()?;
        Some(byte_offset_for(target_ms, bitrate, len))
    }
}

/// `target_ms * bitrate / 8000`, clamped into `[0, content_length - 1]`.
pub fn byte_offset_for(target_ms: u64, bitrate_bps: u64, content_length: u64) -> u64 {
    let raw = u128::from(target_ms) * u128::from(bitrate_bps) / 8000;
    let max = content_length.saturating_sub(1);
    u64::try_from(raw).unwrap_or(u64::MAX).min(max)
}

/// Average bitrate implied by a byte length and a duration.
pub fn estimate_bitrate_bps(content_length: u64, duration_ms: u64) -> Option<u64> {
    if content_length == 0 || duration_ms == 0 {
        return None;
    }
    let bps = u128::from(content_length) * 8000 / u128::from(duration_ms);
    u64::try_from(bps).ok().filter(|b| *b > 0)
}

fn nonzero(v: u64) -> Option<u64> {
    (v > 0).then_some(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_offset_matches_bitrate_math() {
        assert_eq!(byte_offset_for(90_000, 160_000, 3_600_000), 1_800_000);
    }

    #[test]
    fn byte_offset_clamps_to_last_byte() {
        assert_eq!(byte_offset_for(1_000_000, 320_000, 1000), 999);
        assert_eq!(byte_offset_for(0, 320_000, 1000), 0);
        assert_eq!(byte_offset_for(10, 320_000, 0), 0);
    }

    #[test]
    fn known_duration_overrides_estimate() {
        let p = Progress::new();
        p.add_decoded(Duration::from_millis(1500));
        assert_eq!(p.duration_ms(), 1500);
        p.set_known_duration(180_000);
        assert_eq!(p.duration_ms(), 180_000);
        p.set_known_duration(0);
        assert_eq!(p.duration_ms(), 1500);
    }

    #[test]
    fn first_bitrate_wins() {
        let p = Progress::new();
        p.record_bitrate(0);
        assert_eq!(p.bitrate_bps(), None);
        p.record_bitrate(128_000);
        p.record_bitrate(320_000);
        assert_eq!(p.bitrate_bps(), Some(128_000));
    }

    #[test]
    fn cannot_seek_without_metadata() {
        let p = Progress::new();
        assert!(!p.can_seek());
        assert_eq!(p.seek_offset(1000), None);

        p.set_known_duration(180_000);
        assert!(!p.can_seek(), "content length is still unknown");
    }

    #[test]
    fn bitrate_is_estimated_from_length_and_known_duration() {
        let p = Progress::new();
        p.set_content_length(3_600_000);
        p.set_known_duration(180_000);
        assert_eq!(p.effective_bitrate_bps(), Some(160_000));
        assert!(p.can_seek());
        assert_eq!(p.seek_offset(90_000), Some(1_800_000));
    }

    #[test]
    fn reset_clears_all_fields() {
        let p = Progress::new();
        p.add_decoded(Duration::from_secs(1));
        p.set_known_duration(5);
        p.set_content_length(10);
        p.record_bitrate(1);
        p.reset();
        assert_eq!(p.duration_ms(), 0);
        assert_eq!(p.content_length(), None);
        assert_eq!(p.bitrate_bps(), None);
    }

    #[test]
    fn estimate_bitrate_rejects_zero_inputs() {
        assert_eq!(estimate_bitrate_bps(0, 1000), None);
        assert_eq!(estimate_bitrate_bps(1000, 0), None);
    }
}
