//! Decoded PCM units and the accumulator that builds them.
//!
//! The decoder produces one [`DecodedFrame`] per compressed MP3 frame (~26 ms).
//! [`ChunkAssembler`] groups consecutive frames into [`PcmChunk`]s of a target
//! duration so the driver submits a handful of device buffers per second
//! instead of one per frame.

use std::time::Duration;

/// Initial byte capacity of a chunk buffer before any growth.
const INITIAL_CHUNK_BYTES: usize = 64 * 1024;

/// One decoded compressed frame: interleaved `i16` samples plus its format.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedFrame {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Bitrate of the compressed frame in bits/sec (0 when unknown).
    pub bitrate_bps: u32,
}

impl DecodedFrame {
    /// Samples per channel carried by this frame.
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }
}

/// A ready-to-play block of interleaved little-endian 16-bit PCM.
#[derive(Clone, Debug, PartialEq)]
pub struct PcmChunk {
    pub pcm: Vec<u8>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Bitrate of the first compressed frame that went into this chunk.
    pub bitrate_bps: u32,
}

impl PcmChunk {
    /// Samples per channel.
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.pcm.len() / (2 * self.channels as usize)
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.frames() as u64 * 1_000_000 / self.sample_rate as u64)
    }

    /// Iterate the interleaved samples as `i16`.
    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        self.pcm
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
    }
}

/// Accumulates decoded frames until the target chunk duration is reached.
#[derive(Debug)]
pub struct ChunkAssembler {
    target: Duration,
    buf: Vec<u8>,
    sample_rate: u32,
    channels: u16,
    bitrate_bps: u32,
    frames: u64,
}

impl ChunkAssembler {
    pub fn new(target_ms: u32) -> Self {
        Self {
            target: Duration::from_millis(u64::from(target_ms.max(1))),
            buf: Vec::new(),
            sample_rate: 0,
            channels: 0,
            bitrate_bps: 0,
            frames: 0,
        }
    }

    /// Duration of the audio currently held but not yet emitted.
    pub fn pending(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.frames * 1_000_000 / self.sample_rate as u64)
    }

    /// Append one frame; returns a finished chunk once the target is reached.
    ///
    /// A frame whose format differs from the chunk in progress closes that chunk
    /// early and starts the next one, so interleaving never mixes layouts.
    pub fn push(&mut self, frame: &DecodedFrame) -> Option<PcmChunk> {
        if frame.channels == 0 || frame.sample_rate == 0 {
            return None;
        }

        let mut flushed = None;
        if self.frames > 0
            && (frame.sample_rate != self.sample_rate || frame.channels != self.channels)
        {
            tracing::warn!(
                from_rate = self.sample_rate,
                to_rate = frame.sample_rate,
                from_channels = self.channels,
                to_channels = frame.channels,
                "stream format changed mid-chunk"
            );
            flushed = self.take_chunk();
        }

        if self.frames == 0 {
            self.sample_rate = frame.sample_rate;
            self.channels = frame.channels;
            self.bitrate_bps = frame.bitrate_bps;
            if self.buf.capacity() == 0 {
                self.buf.reserve_exact(INITIAL_CHUNK_BYTES);
            }
        }

        let needed = frame.samples.len() * 2;
        self.grow_for(needed);
        for s in &frame.samples {
            self.buf.extend_from_slice(&s.to_le_bytes());
        }
        self.frames += frame.frames() as u64;

        if flushed.is_some() {
            return flushed;
        }
        if self.pending() >= self.target {
            return self.take_chunk();
        }
        None
    }

    /// Emit whatever is buffered as a final (possibly short) chunk.
    pub fn finish(&mut self) -> Option<PcmChunk> {
        self.take_chunk()
    }

    /// Double the capacity (at least enough for `needed` more bytes) when exhausted.
    fn grow_for(&mut self, needed: usize) {
        let remaining = self.buf.capacity() - self.buf.len();
        if remaining >= needed {
            return;
        }
        let new_cap = (self.buf.capacity() * 2).max(self.buf.len() + needed);
        self.buf.reserve_exact(new_cap - self.buf.len());
    }

    fn take_chunk(&mut self) -> Option<PcmChunk> {
        if self.frames == 0 {
            return None;
        }
        let pcm = std::mem::take(&mut self.buf);
        let chunk = PcmChunk {
            pcm,
            sample_rate: self.sample_rate,
            channels: self.channels,
            bitrate_bps: self.bitrate_bps,
        };
        self.frames = 0;
        Some(chunk)
    }
}
