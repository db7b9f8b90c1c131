use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::protocol::MAX_FRAME_SIZE;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Bind address
    pub bind_addr: String,

    /// Port to listen on
    pub port: u16,

    /// Maximum concurrent client connections
    pub max_connections: usize,

    /// Read buffer size per connection; must hold at least one full frame
    pub connection_buffer_size: usize,

    /// TCP nodelay
    pub tcp_nodelay: bool,

    /// Poll timeout in milliseconds; bounds how long the event loop waits
    /// before it checks the shutdown flag again
    pub poll_timeout_ms: u64,

    /// Log level
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            port: 3535,
            max_connections: 10000,
            connection_buffer_size: 16 * 1024, // 16KB
            tcp_nodelay: true,
            poll_timeout_ms: 1000,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Example
    ///
    /// ```no_run
    /// use marlinkv::Config;
    ///
    /// # fn main() -> anyhow::Result<()> {
    /// let config = Config::from_file("config.toml")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_connections == 0 {
            anyhow::bail!("max_connections must be > 0");
        }

        if self.connection_buffer_size < MAX_FRAME_SIZE {
            anyhow::bail!(
                "connection_buffer_size must be >= {} to hold a full frame",
                MAX_FRAME_SIZE
            );
        }

        if self.poll_timeout_ms == 0 {
            anyhow::bail!("poll_timeout_ms must be > 0");
        }

        Ok(())
    }
}
