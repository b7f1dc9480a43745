use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bind address
    pub bind_addr: String,

    /// Port to listen on (0 binds an ephemeral port)
    pub port: u16,

    /// Maximum connected clients (None for no limit)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_clients: Option<usize>,

    /// Accept operator commands from stdin
    pub interactive: bool,

    /// Upper bound on a single poll call, in milliseconds
    pub poll_timeout_ms: u64,

    /// Interval between heartbeat sweeps, in milliseconds
    pub pulse_interval_ms: u64,

    /// Largest message accepted before it is force-terminated
    pub max_message_size: usize,

    /// Registry capacity floor (includes the listener slot)
    pub registry_min_capacity: usize,

    /// Readiness events drained per poll call
    pub events_capacity: usize,

    /// TCP nodelay
    pub tcp_nodelay: bool,

    /// Log level
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 9000,
            max_clients: None,
            interactive: false,
            poll_timeout_ms: 200,
            pulse_interval_ms: 30_000,
            max_message_size: 0xFFFF,
            registry_min_capacity: 4,
            events_capacity: 1024,
            tcp_nodelay: true,
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
    /// use pulse_relay::Config;
    ///
    /// # fn main() -> anyhow::Result<()> {
    /// let config = Config::from_file("relay.toml")?;
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
        if self.poll_timeout_ms == 0 {
            anyhow::bail!("poll_timeout_ms must be > 0");
        }

        if self.pulse_interval_ms == 0 {
            anyhow::bail!("pulse_interval_ms must be > 0");
        }

        if self.max_message_size < 2 {
            anyhow::bail!("max_message_size must be >= 2");
        }

        if self.registry_min_capacity < 2 {
            anyhow::bail!("registry_min_capacity must be >= 2");
        }

        if self.events_capacity == 0 {
            anyhow::bail!("events_capacity must be > 0");
        }

        Ok(())
    }

    /// Translate the command-line client limit, where a negative value removes it.
    pub fn client_limit_from_arg(max_clients: i64) -> Option<usize> {
        usize::try_from(max_clients).ok()
    }

    /// Address the listener binds to
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn pulse_interval(&self) -> Duration {
        Duration::from_millis(self.pulse_interval_ms)
    }

    /// Whether accepting one more client would exceed the limit
    pub fn at_client_limit(&self, connected: usize) -> bool {
        match self.max_clients {
            Some(limit) => connected >= limit,
            None => false,
        }
    }
}
