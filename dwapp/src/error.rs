use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TncError {
    #[error("I/O error on channel device: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("no channel configured with index {0}")]
    UnknownChannel(u8),

    #[error("channel access timed out after 60s")]
    ChannelAccessTimeout,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {0}: {1}")]
    Read(PathBuf, std::io::Error),

    #[error("could not parse config file {0}: {1}")]
    Parse(PathBuf, toml::de::Error),
}
