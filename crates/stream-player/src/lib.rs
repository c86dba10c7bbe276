pub mod chunk;
pub mod clock;
pub mod config;
pub mod controller;
pub mod decode;
pub mod device;
pub mod lyrics;
pub mod mpeg;
pub mod output;
pub mod playback;
pub mod player;
pub mod progress;
pub mod queue;
mod resample;
pub mod source;
pub mod state;
pub mod transport;
pub mod worker;

#[cfg(test)]
mod testing;

pub use controller::PlayerController;
pub use player::StreamPlayer;
pub use stream_player_types::{PlaybackEndReason, PlaybackState, PlayerStatus};
