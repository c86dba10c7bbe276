//! stream-player: play an MP3 stream over HTTP through the default (or a
//! selected) output device.
//!
//! The library's player never blocks its caller, so the binary owns a plain
//! foreground loop that ticks it every `--tick-ms`. Ctrl-C turns into a manual
//! stop; the process exits non-zero when playback ends in an error.

mod cli;
mod config;
mod runtime;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use stream_player::lyrics::Lyrics;
use stream_player::playback::CpalOutput;
use stream_player::{PlayerController, StreamPlayer};
use stream_player_types::PlaybackEndReason;
use tracing_subscriber::EnvFilter;

use crate::config::FileConfig;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,stream_player=info")
        }))
        .init();

    let file = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let device = args.device.clone().or_else(|| file.device.clone());

    match args.cmd {
        cli::Command::ListDevices => list_devices(),
        cli::Command::Play {
            url,
            duration_ms,
            seek_ms,
            volume,
            lyrics,
            status_json,
        } => {
            let lyrics = match lyrics {
                Some(path) => {
                    let raw = std::fs::read_to_string(&path)
                        .with_context(|| format!("read lyrics {:?}", path))?;
                    Some(Lyrics::parse(&raw))
                }
                None => None,
            };
            let tick_ms = args
                .tick_ms
                .or(file.tick_ms)
                .unwrap_or(cli::DEFAULT_TICK_MS)
                .max(1);

            let interrupt = Arc::new(AtomicBool::new(false));
            let flag = interrupt.clone();
            ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed))
                .context("install ctrl-c handler")?;

            if let Some(name) = &device {
                tracing::info!(device = %name, "output device requested");
            }
            let player = StreamPlayer::with_config(CpalOutput::new(device), file.player_config());
            let mut controller = PlayerController::new(player);
            let opts = runtime::PlayOptions {
                url,
                duration_ms,
                seek_ms,
                volume,
                lyrics,
                status_json,
                tick: Duration::from_millis(tick_ms),
            };

            match runtime::run_track(&mut controller, opts, &interrupt)? {
                PlaybackEndReason::Error => {
                    Err(anyhow!("playback failed: {}", controller.player().last_error()))
                }
                reason => {
                    tracing::info!(?reason, "done");
                    Ok(())
                }
            }
        }
    }
}

fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    let devices = stream_player::device::list_devices(&host)?;
    if devices.is_empty() {
        println!("no output devices");
    }
    for (i, info) in devices.iter().enumerate() {
        let marker = if info.is_default { " (default)" } else { "" };
        println!(
            "#{i}: {}{marker}  {}-{} Hz",
            info.name, info.min_rate, info.max_rate
        );
    }
    Ok(())
}
