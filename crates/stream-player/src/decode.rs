//! Streaming decode stage.
//!
//! Uses Symphonia to:
//! - probe an MP3 byte stream
//! - decode packets into interleaved `i16` frames
//! - regroup frames into ~150 ms [`PcmChunk`]s pushed into a bounded [`PcmQueue`]
//!
//! One [`DecodeJob`] runs per session on its own thread and ends on end of
//! stream, cancellation, or error.

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSourceStream, ReadOnlySource};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::chunk::{ChunkAssembler, DecodedFrame, PcmChunk};
use crate::config::PlayerConfig;
use crate::mpeg;
use crate::queue::{PcmQueue, PushOutcome};
use crate::source::StreamOpener;
use crate::state::PlayerShared;

/// Pull-based source of decoded audio frames.
pub trait FrameSource {
    /// Next decoded frame; `Ok(None)` at end of stream.
    fn next_frame(&mut self) -> Result<Option<DecodedFrame>>;
}

/// MP3 frame decoder over any byte reader.
pub struct Mp3Frames {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_buf: Option<SampleBuffer<i16>>,
    corrupt_run: u32,
    max_corrupt_frames: u32,
}

impl Mp3Frames {
    /// Probe `reader` as MP3 and prepare a decoder for its default track.
    ///
    /// Isolated corrupt frames are skipped; more than `max_corrupt_frames`
    /// in a row fail the stream.
    pub fn new<R: Read + Send + 'static>(reader: R, max_corrupt_frames: u32) -> Result<Self> {
        let source = ReadOnlySource::new(SyncReader(Mutex::new(reader)));
        let mss = MediaSourceStream::new(Box::new(source), Default::default());

        let mut hint = Hint::new();
        hint.with_extension("mp3");
        hint.mime_type("audio/mpeg");

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .context("probe mp3 stream")?;

        let format = probed.format;
        let track = format
            .default_track()
            .ok_or_else(|| anyhow!("no audio track in stream"))?;
        let track_id = track.id;
        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .context("create mp3 decoder")?;

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_buf: None,
            corrupt_run: 0,
            max_corrupt_frames,
        })
    }
}

impl FrameSource for Mp3Frames {
    fn next_frame(&mut self) -> Result<Option<DecodedFrame>> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(e).context("read mp3 frame"),
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(msg)) => {
                    self.corrupt_run += 1;
                    tracing::warn!(error = msg, run = self.corrupt_run, "skipping corrupt frame");
                    if self.corrupt_run > self.max_corrupt_frames {
                        return Err(anyhow!(
                            "{} consecutive corrupt frames (last: {msg})",
                            self.corrupt_run
                        ));
                    }
                    continue;
                }
                Err(e) => return Err(e).context("decode mp3 frame"),
            };
            self.corrupt_run = 0;

            let spec = *decoded.spec();
            let frames = decoded.frames();
            if frames == 0 {
                continue;
            }
            let channels = spec.channels.count();
            let needed = frames * channels;
            if self
                .sample_buf
                .as_ref()
                .is_none_or(|buf| buf.capacity() < needed)
            {
                self.sample_buf = Some(SampleBuffer::<i16>::new(frames as u64, spec));
            }
            let Some(buf) = self.sample_buf.as_mut() else {
                continue;
            };
            buf.copy_interleaved_ref(decoded);

            return Ok(Some(DecodedFrame {
                samples: buf.samples().to_vec(),
                sample_rate: spec.rate,
                channels: channels as u16,
                bitrate_bps: mpeg::frame_bitrate_bps(packet.buf(), spec.rate, frames),
            }));
        }
    }
}

/// Symphonia's `MediaSource` wants `Sync`; network readers are only `Send`.
struct SyncReader<R>(Mutex<R>);

impl<R: Read> Read for SyncReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.0.get_mut() {
            Ok(r) => r.read(buf),
            Err(poisoned) => poisoned.into_inner().read(buf),
        }
    }
}

/// Everything one decode session needs, moved onto its worker thread.
pub struct DecodeJob {
    pub url: String,
    pub offset: u64,
    /// A seek restart must not add to the decoded-duration estimate.
    pub seek_restart: bool,
    pub session: u64,
    pub queue: Arc<PcmQueue>,
    pub shared: Arc<PlayerShared>,
    pub opener: Arc<dyn StreamOpener>,
    pub config: PlayerConfig,
    pub cancel: Arc<AtomicBool>,
    pub complete: Arc<AtomicBool>,
}

impl DecodeJob {
    /// Worker entry point: run the session and report any failure.
    pub fn run(self) {
        tracing::debug!(url = %self.url, offset = self.offset, session = self.session, "decode started");
        match self.stream() {
            Ok(()) => {
                tracing::debug!(
                    session = self.session,
                    complete = self.complete.load(Ordering::Relaxed),
                    "decode finished"
                );
            }
            Err(e) if self.cancelled() => {
                tracing::debug!(session = self.session, error = %format!("{e:#}"), "decode aborted after cancel");
            }
            Err(e) => self.shared.fail_session(self.session, format!("{e:#}")),
        }
    }

    fn stream(&self) -> Result<()> {
        let opened = self.opener.open(&self.url, self.offset)?;
        if let Some(len) = opened.content_length {
            if self.is_current() {
                self.shared.progress.set_content_length(len);
            }
        }

        let mut frames = opened.frames;
        let mut assembler = ChunkAssembler::new(self.config.chunk_ms);
        loop {
            if self.cancelled() {
                return Ok(());
            }
            match frames.next_frame()? {
                Some(frame) => {
                    if self.is_current() {
                        self.shared.progress.record_bitrate(frame.bitrate_bps);
                    }
                    if let Some(chunk) = assembler.push(&frame) {
                        if !self.emit(chunk) {
                            return Ok(());
                        }
                    }
                }
                None => {
                    if let Some(chunk) = assembler.finish() {
                        if !self.emit(chunk) {
                            return Ok(());
                        }
                    }
                    self.complete.store(true, Ordering::Release);
                    return Ok(());
                }
            }
        }
    }

    /// Queue a chunk; `false` when the session was cancelled meanwhile.
    fn emit(&self, chunk: PcmChunk) -> bool {
        let duration = chunk.duration();
        let outcome = self
            .queue
            .push_blocking(chunk, &self.cancel, self.config.enqueue_retry());
        if outcome != PushOutcome::Queued {
            return false;
        }
        // Dropped chunks never count toward the estimate.
        if !self.seek_restart && self.is_current() {
            self.shared.progress.add_decoded(duration);
        }
        true
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn is_current(&self) -> bool {
        self.shared.is_current(self.session)
    }
}
