//! TNC configuration, loaded from a TOML file (ambient concern not covered
//! by the DLSM itself). Mirrors the serde-derived config pattern used for
//! build-time configuration elsewhere in the wider ecosystem, applied here
//! to runtime TNC setup.

use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    pub channel: u8,
    pub callsigns: Vec<String>,
    #[serde(default = "default_txdelay")]
    pub txdelay: u8,
    #[serde(default = "default_persistence")]
    pub persistence: u8,
    #[serde(default = "default_slottime")]
    pub slottime: u8,
    #[serde(default = "default_txtail")]
    pub txtail: u8,
    #[serde(default)]
    pub full_duplex: bool,
    #[serde(default)]
    pub serial_port: Option<String>,
    /// Identifies the physical audio device this channel rides on. Two
    /// channels sharing this key (e.g. a stereo card's left/right side)
    /// serialize transmissions through one output lock; left unset, each
    /// channel gets its own.
    #[serde(default)]
    pub audio_device: Option<String>,
    /// Post-carrier dwell before the persistence loop, ×10ms (spec §4.2
    /// step 4).
    #[serde(default)]
    pub dwait: u8,
}

fn default_txdelay() -> u8 {
    50
}
fn default_persistence() -> u8 {
    63
}
fn default_slottime() -> u8 {
    10
}
fn default_txtail() -> u8 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct TncConfig {
    #[serde(default = "default_kiss_tcp_port")]
    pub kiss_tcp_port: u16,
    #[serde(default = "default_kiss_tcp_clients")]
    pub kiss_tcp_clients: usize,
    #[serde(default)]
    pub agw_tcp_port: Option<u16>,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    #[serde(default = "default_n2")]
    pub n2: u8,
    #[serde(default = "default_frack_ms")]
    pub frack_ms: u64,
}

fn default_kiss_tcp_port() -> u16 {
    8001
}
fn default_kiss_tcp_clients() -> usize {
    3
}
fn default_n2() -> u8 {
    10
}
fn default_frack_ms() -> u64 {
    3000
}

impl Default for TncConfig {
    fn default() -> Self {
        Self {
            kiss_tcp_port: default_kiss_tcp_port(),
            kiss_tcp_clients: default_kiss_tcp_clients(),
            agw_tcp_port: None,
            channels: Vec::new(),
            n2: default_n2(),
            frack_ms: default_frack_ms(),
        }
    }
}

impl TncConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_channel_config() {
        let text = r#"
            kiss_tcp_port = 8011

            [[channels]]
            channel = 0
            callsigns = ["N0CALL-1"]
        "#;
        let cfg: TncConfig = toml::from_str(text).unwrap();
        assert_eq!(cfg.kiss_tcp_port, 8011);
        assert_eq!(cfg.channels.len(), 1);
        assert_eq!(cfg.channels[0].txdelay, 50);
        assert!(!cfg.channels[0].full_duplex);
    }

    #[test]
    fn defaults_apply_with_no_config() {
        let cfg = TncConfig::default();
        assert_eq!(cfg.kiss_tcp_clients, 3);
        assert_eq!(cfg.n2, 10);
    }
}
