//! Optional TOML configuration for the CLI host.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use stream_player::config::{HttpConfig, PlayerConfig};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Output device substring; `--device` wins over it.
    pub device: Option<String>,
    pub tick_ms: Option<u64>,
    pub player: PlayerConfig,
    /// Top-level `[http]` table; replaces `[player.http]` when present.
    pub http: Option<HttpConfig>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {:?}", path))?;
        toml::from_str::<FileConfig>(&raw).with_context(|| format!("parse config {:?}", path))
    }

    pub fn player_config(&self) -> PlayerConfig {
        let mut player = self.player.clone();
        if let Some(http) = &self.http {
            player.http = http.clone();
        }
        player
    }
}
