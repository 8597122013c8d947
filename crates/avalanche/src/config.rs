//! Runtime settings of the engine.
//!
//! Settings are layered, in order of priority:
//!
//! Environment (`AVALANCHE_*`) --overrides--> File --overrides--> Defaults
use std::{path::Path, time::Duration};

use directories::UserDirs;
use serde::Deserialize;

use crate::error::Error;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Where the files of new torrents are written to.
    pub download_dir: String,

    /// Port announced to trackers and used by the listener.
    /// Default: 51413
    pub local_peer_port: u16,

    /// Default: 50
    pub max_torrent_peers: usize,

    /// How long to wait for a TCP connection to a peer.
    pub connect_timeout_secs: u64,

    /// A peer that sends no complete message for this long is dropped.
    pub peer_timeout_secs: u64,

    /// Timeout of a single HTTP announce.
    pub tracker_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let download_dir = UserDirs::new()
            .and_then(|u| u.download_dir().map(|d| d.to_string_lossy().into_owned()))
            .unwrap_or_else(|| ".".to_owned());

        Self {
            download_dir,
            local_peer_port: 51413,
            max_torrent_peers: 50,
            connect_timeout_secs: 10,
            peer_timeout_secs: 120,
            tracker_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Load the configuration, optionally from a TOML file.
    ///
    /// A missing file is not an error, only a malformed one is.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            );
        }

        let config = builder
            .add_source(config::Environment::with_prefix("AVALANCHE"))
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_timeout_secs)
    }

    pub fn tracker_timeout(&self) -> Duration {
        Duration::from_secs(self.tracker_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn file_overrides_defaults() -> Result<(), Error> {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile()?;
        writeln!(file, "local_peer_port = 6881")?;
        writeln!(file, "download_dir = \"/tmp/avalanche\"")?;

        let config = Config::load(Some(file.path()))?;

        assert_eq!(config.local_peer_port, 6881);
        assert_eq!(config.download_dir, "/tmp/avalanche");
        assert_eq!(config.max_torrent_peers, 50);
        assert_eq!(config.peer_timeout(), Duration::from_secs(120));
        Ok(())
    }

    #[test]
    fn missing_file_uses_defaults() -> Result<(), Error> {
        let config = Config::load(Some(Path::new("/nonexistent/avalanche.toml")))?;
        assert_eq!(config.local_peer_port, 51413);
        Ok(())
    }
}
