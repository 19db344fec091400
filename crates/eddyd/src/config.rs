//! TOML configuration for the Eddy daemon.
//!
//! Every section is optional; command-line flags override file values.

use std::path::Path;
use std::time::Duration;

use eddy_net::ClientConfig;
use serde::Deserialize;

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Consistent-hash ring parameters.
    pub ring: RingSection,
    /// Listener settings.
    pub server: ServerSection,
    /// Outgoing RPC policy.
    pub rpc: RpcSection,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[ring]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RingSection {
    /// Number of positions on the ring. Must match across all servers.
    pub size: u64,
}

impl Default for RingSection {
    fn default() -> Self {
        Self { size: 128 }
    }
}

/// `[server]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// TCP port to accept connections on.
    pub port: u16,
    /// Only listen on the loopback interface.
    pub local_only: bool,
    /// Address a hosted block store is listed under on the ring. Migrations
    /// addressed to it are skipped as self-transfers.
    pub advertise_addr: Option<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: 8080,
            local_only: false,
            advertise_addr: None,
        }
    }
}

/// `[rpc]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RpcSection {
    /// Deadline for one RPC attempt, in milliseconds.
    pub timeout_ms: u64,
    /// Deadline for one migration (a block store moving a whole range).
    pub migration_timeout_ms: u64,
    /// Total attempts per call, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry, doubled after each failure.
    pub backoff_ms: u64,
}

impl Default for RpcSection {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            migration_timeout_ms: 300_000,
            max_attempts: 3,
            backoff_ms: 100,
        }
    }
}

impl RpcSection {
    /// Migration deadline as a [`Duration`].
    pub fn migration_timeout(&self) -> Duration {
        Duration::from_millis(self.migration_timeout_ms)
    }
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"warn"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CliConfig {
    /// Load config from a TOML file, or use defaults if no path given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)?;
                let config: CliConfig = toml::from_str(&content)?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// The block store's ring address: `[server] advertise_addr`, or
    /// `localhost:<port>` when unset.
    pub fn advertise_addr(&self) -> String {
        self.server
            .advertise_addr
            .clone()
            .unwrap_or_else(|| format!("localhost:{}", self.server.port))
    }

    /// RPC policy handed to [`eddy_net::RpcClient`].
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_millis(self.rpc.timeout_ms),
            migration_timeout: self.rpc.migration_timeout(),
            max_attempts: self.rpc.max_attempts.max(1),
            backoff: Duration::from_millis(self.rpc.backoff_ms),
        }
    }
}
