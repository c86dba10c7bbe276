//! Foreground tick loop for one track.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use stream_player::PlayerController;
use stream_player::controller::format_time;
use stream_player::lyrics::Lyrics;
use stream_player::output::OutputDevice;
use stream_player_types::{PlaybackEndReason, PlaybackState};

const STATUS_INTERVAL: Duration = Duration::from_secs(1);

pub struct PlayOptions {
    pub url: String,
    pub duration_ms: Option<u64>,
    pub seek_ms: Option<u64>,
    pub volume: Option<f32>,
    pub lyrics: Option<Lyrics>,
    pub status_json: bool,
    pub tick: Duration,
}

/// Play `opts.url` until the track ends or `interrupt` is raised.
pub fn run_track<D: OutputDevice>(
    controller: &mut PlayerController<D>,
    opts: PlayOptions,
    interrupt: &AtomicBool,
) -> Result<PlaybackEndReason> {
    if let Some(volume) = opts.volume {
        controller.player_mut().set_volume(volume);
    }
    controller.play_track(&opts.url, opts.duration_ms.unwrap_or(0));
    if let Some(lyrics) = opts.lyrics {
        controller.set_lyrics(lyrics);
    }
    tracing::info!(url = %opts.url, "playing");

    let mut pending_seek = opts.seek_ms;
    let mut last_state = controller.player().state();
    let mut last_lyric = String::new();
    let mut last_status = Instant::now();
    let mut interrupted = false;

    loop {
        if !interrupted && interrupt.load(Ordering::Relaxed) {
            interrupted = true;
            tracing::info!("interrupted; stopping");
            controller.stop_manually();
        }

        let ended = controller.tick();
        let state = controller.player().state();

        if state != last_state {
            tracing::info!(
                from = ?last_state,
                to = ?state,
                played = %format_time(controller.player().played_ms()),
                duration = %format_time(controller.player().duration_ms()),
                "state"
            );
            last_state = state;
            if opts.status_json {
                print_status(controller)?;
                last_status = Instant::now();
            }
        }

        if let Some(target) = pending_seek {
            if seek_ready(state) && controller.player().can_seek() {
                tracing::info!(target = %format_time(target), "seeking");
                controller.player_mut().seek(target);
                pending_seek = None;
            }
        }

        let (line, next) = controller.current_lyric();
        if line != last_lyric {
            if !line.is_empty() {
                tracing::info!(next, "lyric: {line}");
            }
            last_lyric = line.to_string();
        }

        if let Some(reason) = ended {
            if opts.status_json {
                print_status(controller)?;
            }
            return Ok(reason);
        }

        if opts.status_json && last_status.elapsed() >= STATUS_INTERVAL {
            print_status(controller)?;
            last_status = Instant::now();
        }

        thread::sleep(opts.tick);
    }
}

fn seek_ready(state: PlaybackState) -> bool {
    matches!(
        state,
        PlaybackState::Buffering | PlaybackState::Playing | PlaybackState::Paused
    )
}

fn print_status<D: OutputDevice>(controller: &PlayerController<D>) -> Result<()> {
    let line = serde_json::to_string(&controller.player().status()).context("encode status")?;
    println!("{line}");
    Ok(())
}
