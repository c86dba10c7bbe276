use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub const DEFAULT_TICK_MS: u64 = 50;

#[derive(Parser, Debug)]
#[command(name = "stream-player", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Use a specific output device by substring match
    #[arg(long, global = true)]
    pub device: Option<String>,

    /// TOML file with `[player]` and `[http]` tables
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Interval between player ticks in milliseconds
    #[arg(long, global = true)]
    pub tick_ms: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Stream an MP3 URL to the output device
    Play {
        /// HTTP(S) URL of the MP3 stream
        url: String,

        /// Track length from metadata; estimated while decoding when omitted
        #[arg(long)]
        duration_ms: Option<u64>,

        /// Seek here once the stream's bitrate and length are known
        #[arg(long)]
        seek_ms: Option<u64>,

        /// Output gain in [0, 1]
        #[arg(long)]
        volume: Option<f32>,

        /// LRC file with synced lyrics
        #[arg(long)]
        lyrics: Option<PathBuf>,

        /// Print a JSON status line on every state change and once per second
        #[arg(long)]
        status_json: bool,
    },

    /// List output devices and exit
    ListDevices,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_parses_flags_in_any_position() {
        let args = Args::try_parse_from([
            "stream-player",
            "--tick-ms",
            "20",
            "play",
            "http://music.test/a.mp3",
            "--seek-ms",
            "90000",
            "--device",
            "usb",
            "--status-json",
        ])
        .unwrap();
        assert_eq!(args.tick_ms, Some(20));
        assert_eq!(args.device.as_deref(), Some("usb"));
        match args.cmd {
            Command::Play {
                url,
                seek_ms,
                duration_ms,
                status_json,
                ..
            } => {
                assert_eq!(url, "http://music.test/a.mp3");
                assert_eq!(seek_ms, Some(90_000));
                assert_eq!(duration_ms, None);
                assert!(status_json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn list_devices_subcommand() {
        let args = Args::try_parse_from(["stream-player", "list-devices"]).unwrap();
        assert!(matches!(args.cmd, Command::ListDevices));
        assert!(args.config.is_none());
    }

    #[test]
    fn play_requires_url() {
        assert!(Args::try_parse_from(["stream-player", "play"]).is_err());
    }
}
