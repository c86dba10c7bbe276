//! Streaming sample-rate conversion for the output voices.
//!
//! Chunks arrive one submitted buffer at a time. The sinc resampler keeps its
//! filter state across them and holds back input that does not fill a whole
//! block, so buffer edges stay continuous. [`StreamResampler::finish`] drains
//! the held-back tail and the filter delay.

use anyhow::{Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

/// Input frames per resampler call.
const BLOCK_FRAMES: usize = 1024;

pub(crate) struct StreamResampler {
    inner: Async<f32>,
    from: u32,
    to: u32,
    channels: usize,
    /// Interleaved input not yet processed (less than one block).
    input: Vec<f32>,
    scratch: Vec<f32>,
    /// Leading output frames still owed to the filter delay.
    delay_left: usize,
    frames_in: u64,
    frames_out: u64,
}

impl StreamResampler {
    pub(crate) fn new(from: u32, to: u32, channels: usize) -> Result<Self> {
        if from == 0 || to == 0 || channels == 0 {
            return Err(anyhow!("invalid resampler shape: {from} -> {to} Hz, {channels} ch"));
        }
        let sinc_len = 128;
        let window = WindowFunction::BlackmanHarris2;
        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff: calculate_cutoff(sinc_len, window),
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window,
        };
        let inner = Async::<f32>::new_sinc(
            f64::from(to) / f64::from(from),
            1.1,
            &params,
            BLOCK_FRAMES,
            channels,
            FixedAsync::Input,
        )
        .map_err(|e| anyhow!("resampler init: {e}"))?;

        let scratch = vec![0.0; inner.output_frames_max() * channels];
        let delay_left = inner.output_delay();
        Ok(Self {
            inner,
            from,
            to,
            channels,
            input: Vec::with_capacity(BLOCK_FRAMES * channels),
            scratch,
            delay_left,
            frames_in: 0,
            frames_out: 0,
        })
    }

    pub(crate) fn from_rate(&self) -> u32 {
        self.from
    }

    /// Input was fed since the last reset, so [`Self::finish`] has audio to give.
    pub(crate) fn has_pending(&self) -> bool {
        self.frames_in > 0
    }

    /// Feed interleaved samples; returns whatever whole blocks produced.
    pub(crate) fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        self.input.extend_from_slice(samples);
        self.frames_in += (samples.len() / self.channels) as u64;

        let block_len = BLOCK_FRAMES * self.channels;
        let mut out = Vec::new();
        let mut start = 0;
        while self.input.len() - start >= block_len {
            let produced = run_block(
                &mut self.inner,
                &mut self.scratch,
                self.channels,
                &self.input[start..start + block_len],
                None,
            )?;
            self.take_output(produced, &mut out);
            start += block_len;
        }
        self.input.drain(..start);
        Ok(out)
    }

    /// Flush the held-back tail and the filter delay, trimmed so the total
    /// output matches the input duration; then start over.
    pub(crate) fn finish(&mut self) -> Result<Vec<f32>> {
        let expected = self.frames_in * u64::from(self.to) / u64::from(self.from);
        let mut out = Vec::new();

        let tail = std::mem::take(&mut self.input);
        let tail_frames = tail.len() / self.channels;
        if tail_frames > 0 {
            let produced = run_block(
                &mut self.inner,
                &mut self.scratch,
                self.channels,
                &tail,
                Some(tail_frames),
            )?;
            self.take_output(produced, &mut out);
        }

        let silence = vec![0.0; BLOCK_FRAMES * self.channels];
        let mut rounds = 0;
        while self.frames_out < expected && rounds < 8 {
            let produced =
                run_block(&mut self.inner, &mut self.scratch, self.channels, &silence, None)?;
            self.take_output(produced, &mut out);
            rounds += 1;
        }

        let excess = self.frames_out.saturating_sub(expected) as usize * self.channels;
        out.truncate(out.len().saturating_sub(excess));
        self.reset();
        Ok(out)
    }

    /// Drop held-back input and filter state.
    pub(crate) fn reset(&mut self) {
        self.inner.reset();
        self.input.clear();
        self.delay_left = self.inner.output_delay();
        self.frames_in = 0;
        self.frames_out = 0;
    }

    fn take_output(&mut self, produced: usize, out: &mut Vec<f32>) {
        let skip = self.delay_left.min(produced);
        self.delay_left -= skip;
        out.extend_from_slice(&self.scratch[skip * self.channels..produced * self.channels]);
        self.frames_out += (produced - skip) as u64;
    }
}

fn run_block(
    resampler: &mut Async<f32>,
    scratch: &mut [f32],
    channels: usize,
    block: &[f32],
    partial_len: Option<usize>,
) -> Result<usize> {
    let frames = block.len() / channels;
    let input = InterleavedSlice::new(block, channels, frames)
        .map_err(|e| anyhow!("interleaved slice (input): {e}"))?;
    let out_frames = scratch.len() / channels;
    let mut output = InterleavedSlice::new_mut(scratch, channels, out_frames)
        .map_err(|e| anyhow!("interleaved slice (output): {e}"))?;

    let indexing = Indexing {
        input_offset: 0,
        output_offset: 0,
        active_channels_mask: None,
        partial_len,
    };
    let (_consumed, produced) = resampler
        .process_into_buffer(&input, &mut output, Some(&indexing))
        .map_err(|e| anyhow!("resample: {e}"))?;
    Ok(produced)
}
