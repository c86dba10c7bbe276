//! CPAL-backed [`OutputDevice`].
//!
//! Each voice owns one CPAL output stream, opened on the first submitted
//! buffer at the closest supported rate to that chunk. Submitted buffers are
//! converted to the stream's channel count and run through the voice's
//! streaming resampler up front; the real-time callback only copies samples,
//! applies gain and counts finished buffers.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};

use crate::chunk::PcmChunk;
use crate::device::{pick_device, pick_output_config};
use crate::output::{BufferId, OutputDevice, VoiceId, VoiceState};
use crate::resample::StreamResampler;

/// Output through the host's audio device via CPAL.
pub struct CpalOutput {
    host: cpal::Host,
    device_name: Option<String>,
    device: Option<cpal::Device>,
    voices: HashMap<VoiceId, CpalVoice>,
    buffers: HashSet<BufferId>,
    next_id: u32,
}

impl CpalOutput {
    /// `device_name` selects an output by case-insensitive substring; `None` uses the default.
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            host: cpal::default_host(),
            device_name,
            device: None,
            voices: HashMap::new(),
            buffers: HashSet::new(),
            next_id: 1,
        }
    }

    fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }

    fn voice(&self, voice: VoiceId) -> Option<&CpalVoice> {
        self.voices.get(&voice)
    }

    fn voice_mut(&mut self, voice: VoiceId) -> Option<&mut CpalVoice> {
        self.voices.get_mut(&voice)
    }
}

struct CpalVoice {
    shared: Arc<VoiceShared>,
    stream: Option<OpenStream>,
    /// Rate conversion state carried from one submitted buffer to the next.
    resampler: Mutex<Option<StreamResampler>>,
    /// Submitted buffer ids in play order, processed ones included.
    queued: VecDeque<BufferId>,
    state: VoiceState,
}

impl CpalVoice {
    fn new() -> Self {
        Self {
            shared: Arc::new(VoiceShared {
                running: AtomicBool::new(false),
                gain_bits: AtomicU32::new(1.0f32.to_bits()),
                feed: Mutex::new(Feed::default()),
            }),
            stream: None,
            resampler: Mutex::new(None),
            queued: VecDeque::new(),
            state: VoiceState::Initial,
        }
    }

    fn resampler(&self) -> MutexGuard<'_, Option<StreamResampler>> {
        match self.resampler.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Interleaved `f32` in the stream's layout and rate.
    fn convert(&self, chunk: &PcmChunk, out_rate: u32, out_channels: usize) -> Result<Vec<f32>> {
        let out_channels = out_channels.max(1);
        let mapped = to_output_layout(chunk, out_channels);
        if chunk.sample_rate == 0 || chunk.sample_rate == out_rate {
            return Ok(mapped);
        }

        let mut slot = self.resampler();
        let mut out = Vec::new();
        if slot.as_ref().is_some_and(|r| r.from_rate() != chunk.sample_rate) {
            if let Some(mut previous) = slot.take() {
                out = previous.finish()?;
            }
        }
        if slot.is_none() {
            tracing::debug!(from = chunk.sample_rate, to = out_rate, "resampling output");
            *slot = Some(StreamResampler::new(chunk.sample_rate, out_rate, out_channels)?);
        }
        if let Some(resampler) = slot.as_mut() {
            out.extend(resampler.process(&mapped)?);
        }
        Ok(out)
    }

    /// Queue whatever the resampler still holds once the feed ran dry.
    /// `true` when there was something left to play.
    fn flush_tail(&self, feed: &mut Feed) -> bool {
        let mut slot = self.resampler();
        let Some(resampler) = slot.as_mut().filter(|r| r.has_pending()) else {
            return false;
        };
        match resampler.finish() {
            Ok(tail) if !tail.is_empty() => {
                feed.pending.push_back(Segment {
                    samples: tail,
                    buffer: false,
                });
                feed.starved = false;
                true
            }
            Ok(_) => false,
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "resampler tail dropped");
                false
            }
        }
    }
}

struct OpenStream {
    // Held for its lifetime; dropping it closes the device stream.
    _stream: cpal::Stream,
    rate: u32,
    channels: usize,
}

/// State shared with the real-time callback.
struct VoiceShared {
    running: AtomicBool,
    gain_bits: AtomicU32,
    feed: Mutex<Feed>,
}

impl VoiceShared {
    fn feed(&self) -> MutexGuard<'_, Feed> {
        match self.feed.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Samples ready for the callback, already in the stream format.
struct Segment {
    samples: Vec<f32>,
    /// Counts as a processed buffer once played; resampler tails do not.
    buffer: bool,
}

#[derive(Default)]
struct Feed {
    pending: VecDeque<Segment>,
    current: Vec<f32>,
    pos: usize,
    current_is_buffer: bool,
    processed: usize,
    /// Ran dry while playing; stays set until the next `play` or a tail flush.
    starved: bool,
}

impl OutputDevice for CpalOutput {
    fn create_voice(&mut self) -> Result<VoiceId> {
        if self.device.is_none() {
            let device = pick_device(&self.host, self.device_name.as_deref())?;
            if let Ok(desc) = device.description() {
                tracing::info!(device = %desc.name(), "output device selected");
            }
            self.device = Some(device);
        }
        let id = self.alloc_id();
        self.voices.insert(id, CpalVoice::new());
        Ok(id)
    }

    fn create_buffers(&mut self, count: usize) -> Result<Vec<BufferId>> {
        let ids: Vec<BufferId> = (0..count).map(|_| self.alloc_id()).collect();
        self.buffers.extend(ids.iter().copied());
        Ok(ids)
    }

    fn submit(&mut self, voice: VoiceId, buffer: BufferId, chunk: &PcmChunk) -> Result<()> {
        if !self.buffers.contains(&buffer) {
            return Err(anyhow!("unknown buffer {buffer}"));
        }
        let device = self
            .device
            .clone()
            .ok_or_else(|| anyhow!("output device not initialised"))?;
        let v = self
            .voices
            .get_mut(&voice)
            .ok_or_else(|| anyhow!("unknown voice {voice}"))?;

        if v.stream.is_none() {
            v.stream = Some(open_stream(&device, chunk.sample_rate, &v.shared)?);
        }
        let Some((rate, channels)) = v.stream.as_ref().map(|s| (s.rate, s.channels)) else {
            return Err(anyhow!("output stream unavailable"));
        };
        let samples = v.convert(chunk, rate, channels)?;
        v.shared.feed().pending.push_back(Segment {
            samples,
            buffer: true,
        });
        v.queued.push_back(buffer);
        Ok(())
    }

    fn buffers_processed(&self, voice: VoiceId) -> usize {
        self.voice(voice)
            .map(|v| v.shared.feed().processed.min(v.queued.len()))
            .unwrap_or(0)
    }

    fn buffers_queued(&self, voice: VoiceId) -> usize {
        self.voice(voice).map(|v| v.queued.len()).unwrap_or(0)
    }

    fn unqueue_processed(&mut self, voice: VoiceId) -> Option<BufferId> {
        let v = self.voice_mut(voice)?;
        let mut feed = v.shared.feed();
        if feed.processed == 0 {
            return None;
        }
        let id = v.queued.pop_front()?;
        feed.processed -= 1;
        Some(id)
    }

    fn voice_state(&self, voice: VoiceId) -> VoiceState {
        let Some(v) = self.voice(voice) else {
            return VoiceState::Stopped;
        };
        if v.state != VoiceState::Playing {
            return v.state;
        }
        let mut feed = v.shared.feed();
        if !feed.starved || v.flush_tail(&mut feed) {
            VoiceState::Playing
        } else {
            VoiceState::Stopped
        }
    }

    fn play(&mut self, voice: VoiceId) {
        let Some(v) = self.voice_mut(voice) else {
            return;
        };
        {
            let mut feed = v.shared.feed();
            feed.starved = feed.pending.is_empty() && feed.pos >= feed.current.len();
        }
        v.shared.running.store(true, Ordering::Release);
        v.state = VoiceState::Playing;
    }

    fn pause(&mut self, voice: VoiceId) {
        let Some(v) = self.voice_mut(voice) else {
            return;
        };
        v.shared.running.store(false, Ordering::Release);
        if v.state == VoiceState::Playing {
            v.state = VoiceState::Paused;
        }
    }

    fn stop(&mut self, voice: VoiceId) {
        let Some(v) = self.voice_mut(voice) else {
            return;
        };
        v.shared.running.store(false, Ordering::Release);
        {
            let mut feed = v.shared.feed();
            feed.pending.clear();
            feed.current.clear();
            feed.pos = 0;
            feed.current_is_buffer = false;
            feed.starved = false;
            feed.processed = v.queued.len();
        }
        if let Some(resampler) = v.resampler().as_mut() {
            resampler.reset();
        }
        v.state = VoiceState::Stopped;
    }

    fn set_gain(&mut self, voice: VoiceId, gain: f32) {
        if let Some(v) = self.voice(voice) {
            v.shared.gain_bits.store(gain.to_bits(), Ordering::Relaxed);
        }
    }

    fn delete_buffers(&mut self, buffers: &[BufferId]) {
        for id in buffers {
            self.buffers.remove(id);
        }
    }

    fn delete_voice(&mut self, voice: VoiceId) {
        if let Some(v) = self.voices.remove(&voice) {
            v.shared.running.store(false, Ordering::Release);
        }
    }
}

fn open_stream(device: &cpal::Device, rate: u32, shared: &Arc<VoiceShared>) -> Result<OpenStream> {
    let supported = pick_output_config(device, rate)?;
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.config();
    let channels = usize::from(config.channels.max(1));

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, &config, shared.clone()),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, &config, shared.clone()),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, &config, shared.clone()),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, &config, shared.clone()),
        other => Err(anyhow!("unsupported sample format: {other:?}")),
    }?;
    stream.play().context("start output stream")?;

    tracing::info!(
        rate = config.sample_rate,
        channels,
        format = ?sample_format,
        source_rate = rate,
        "output stream opened"
    );
    Ok(OpenStream {
        _stream: stream,
        rate: config.sample_rate,
        channels,
    })
}

/// Type-specialized stream builder; the callback plays queued buffers in order.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    shared: Arc<VoiceShared>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);
            if !shared.running.load(Ordering::Acquire) {
                data.fill(silence);
                return;
            }
            let gain = f32::from_bits(shared.gain_bits.load(Ordering::Relaxed));
            let mut guard = shared.feed();
            let written = fill_from_feed(&mut guard, data, gain);
            data[written..].fill(silence);
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}

/// Copy queued samples into `data`; returns how many slots were written.
fn fill_from_feed<T>(feed: &mut Feed, data: &mut [T], gain: f32) -> usize
where
    T: cpal::Sample + cpal::FromSample<f32>,
{
    if feed.starved {
        return 0;
    }
    let mut i = 0;
    while i < data.len() {
        if feed.pos >= feed.current.len() {
            if feed.current_is_buffer {
                feed.processed += 1;
                feed.current_is_buffer = false;
            }
            match feed.pending.pop_front() {
                Some(next) => {
                    feed.current = next.samples;
                    feed.pos = 0;
                    feed.current_is_buffer = next.buffer;
                }
                None => {
                    feed.starved = true;
                    break;
                }
            }
            continue;
        }
        let n = (data.len() - i).min(feed.current.len() - feed.pos);
        for (dst, src) in data[i..i + n]
            .iter_mut()
            .zip(&feed.current[feed.pos..feed.pos + n])
        {
            *dst = <T as cpal::Sample>::from_sample::<f32>(src * gain);
        }
        feed.pos += n;
        i += n;
    }
    i
}

/// Scale a chunk to `f32` and map it onto `out_channels`.
fn to_output_layout(chunk: &PcmChunk, out_channels: usize) -> Vec<f32> {
    let in_channels = usize::from(chunk.channels.max(1));
    let src: Vec<f32> = chunk.samples().map(|s| f32::from(s) / 32768.0).collect();
    map_channels(&src, in_channels, out_channels)
}

/// Mono↔stereo mapping; other layouts clamp to the available source channels.
fn map_channels(src: &[f32], in_channels: usize, out_channels: usize) -> Vec<f32> {
    if in_channels == out_channels {
        return src.to_vec();
    }
    let mut out = Vec::with_capacity(src.len() / in_channels * out_channels);
    for frame in src.chunks_exact(in_channels) {
        for ch in 0..out_channels {
            let v = match (in_channels, out_channels) {
                (2, 1) => 0.5 * (frame[0] + frame[1]),
                (1, _) => frame[0],
                _ => frame[ch.min(in_channels - 1)],
            };
            out.push(v);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(samples: &[i16], rate: u32, channels: u16) -> PcmChunk {
        PcmChunk {
            pcm: samples.iter().flat_map(|s| s.to_le_bytes()).collect(),
            sample_rate: rate,
            channels,
            bitrate_bps: 0,
        }
    }

    #[test]
    fn mono_is_duplicated_to_stereo() {
        let out = map_channels(&[0.25, -0.5], 1, 2);
        assert_eq!(out, vec![0.25, 0.25, -0.5, -0.5]);
    }

    #[test]
    fn stereo_is_averaged_to_mono() {
        let out = map_channels(&[0.2, 0.4, -1.0, 1.0], 2, 1);
        assert_eq!(out.len(), 2);
        assert!((out[0] - 0.3).abs() < 1e-6);
        assert_eq!(out[1], 0.0);
    }

    fn buffer(samples: Vec<f32>) -> Segment {
        Segment {
            samples,
            buffer: true,
        }
    }

    #[test]
    fn matching_rate_passes_scaled_samples_through() {
        let voice = CpalVoice::new();
        let chunk = pcm(&[16384, -32768], 48_000, 1);
        let out = voice.convert(&chunk, 48_000, 1).unwrap();
        assert_eq!(out, vec![0.5, -1.0]);
        assert!(voice.resampler().is_none());
    }

    #[test]
    fn voice_resampler_spans_submitted_buffers() {
        let voice = CpalVoice::new();
        let chunk = pcm(&vec![1000; 6615 * 2], 44_100, 2);
        let mut frames = 0;
        for _ in 0..10 {
            frames += voice.convert(&chunk, 48_000, 2).unwrap().len() / 2;
        }
        let mut feed = Feed::default();
        assert!(voice.flush_tail(&mut feed));
        frames += feed.pending.iter().map(|s| s.samples.len() / 2).sum::<usize>();

        assert_eq!(frames as u64, 66_150 * 48_000 / 44_100);
        assert!(!feed.pending[0].buffer);
        assert!(!voice.flush_tail(&mut Feed::default()), "tail is flushed once");
    }

    #[test]
    fn rate_change_starts_a_new_resampler() {
        let voice = CpalVoice::new();
        voice.convert(&pcm(&vec![0; 2048], 44_100, 1), 48_000, 1).unwrap();
        let out = voice.convert(&pcm(&vec![0; 2048], 32_000, 1), 48_000, 1).unwrap();
        assert!(!out.is_empty(), "previous stream's tail comes out first");
        assert_eq!(voice.resampler().as_ref().map(|r| r.from_rate()), Some(32_000));
    }

    #[test]
    fn feed_counts_processed_buffers_and_starves() {
        let mut feed = Feed::default();
        feed.pending.push_back(buffer(vec![0.5; 4]));
        feed.pending.push_back(buffer(vec![0.25; 2]));

        let mut out = [0.0f32; 4];
        assert_eq!(fill_from_feed(&mut feed, &mut out, 1.0), 4);
        assert_eq!(out, [0.5; 4]);
        assert_eq!(feed.processed, 0);

        let mut out = [0.0f32; 4];
        assert_eq!(fill_from_feed(&mut feed, &mut out, 2.0), 2);
        assert_eq!(&out[..2], &[0.5, 0.5]);
        assert_eq!(feed.processed, 2);
        assert!(feed.starved);

        feed.pending.push_back(buffer(vec![1.0; 2]));
        assert_eq!(fill_from_feed(&mut feed, &mut out, 1.0), 0, "starved until replayed");
    }

    #[test]
    fn resampler_tail_plays_without_counting_as_a_buffer() {
        let mut feed = Feed::default();
        feed.pending.push_back(buffer(vec![0.5; 2]));
        feed.pending.push_back(Segment {
            samples: vec![0.1; 2],
            buffer: false,
        });

        let mut out = [0.0f32; 8];
        assert_eq!(fill_from_feed(&mut feed, &mut out, 1.0), 4);
        assert_eq!(feed.processed, 1);
        assert!(feed.starved);
    }
}
