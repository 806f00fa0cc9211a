use serde::Deserialize;
use std::{env, time::Duration};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 6600;
const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(3);
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);
// Floors applied to configured intervals; zero would panic the ticker or spin reconnects
const MIN_RETRY_INTERVAL: Duration = Duration::from_millis(10);
const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(50);

/// Connection settings, fixed for the lifetime of a connector.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    /// Delay between connection attempts
    #[serde(with = "millis")]
    pub retry_interval: Duration,
    /// Period of the status-refreshing heartbeat
    #[serde(with = "millis")]
    pub heartbeat_interval: Duration,
    /// Read/write timeout of a single request; the idle wait is not bounded
    #[serde(with = "millis")]
    pub io_timeout: Duration,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            password: None,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }
}

impl ConnectorConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            ..Self::default()
        }
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// `host:port` for display, with IPv6 literals bracketed.
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Delay between connection attempts actually used, never below a small floor.
    pub fn retry_delay(&self) -> Duration {
        self.retry_interval.max(MIN_RETRY_INTERVAL)
    }

    /// Heartbeat period actually used, never zero.
    pub fn heartbeat_period(&self) -> Duration {
        self.heartbeat_interval.max(MIN_HEARTBEAT_INTERVAL)
    }

    /// Reads settings from the environment, with defaults for anything unset.
    ///
    /// `MPD_HOST` accepts the usual `password@host` form. `MPD_PASSWORD`
    /// overrides a password given that way.
    pub fn from_env() -> Self {
        // optionally load .env
        let _ = dotenvy::dotenv();

        // helper to parse millis into Duration
        fn parse_millis(var: &str, default: Duration) -> Duration {
            env::var(var)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(default)
        }

        // helper to parse seconds into Duration
        fn parse_secs(var: &str, default: Duration) -> Duration {
            env::var(var)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        }

        let (password, host) = match env::var("MPD_HOST") {
            Ok(value) if !value.is_empty() => split_host(&value),
            _ => (None, DEFAULT_HOST.to_string()),
        };
        let password = env::var("MPD_PASSWORD")
            .ok()
            .filter(|p| !p.is_empty())
            .or(password);

        ConnectorConfig {
            host,
            port: env::var("MPD_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            password,
            retry_interval: parse_millis("MPD_RETRY_INTERVAL_MS", DEFAULT_RETRY_INTERVAL),
            heartbeat_interval: parse_millis("MPD_HEARTBEAT_INTERVAL_MS", DEFAULT_HEARTBEAT_INTERVAL),
            io_timeout: parse_secs("MPD_IO_TIMEOUT_SECS", DEFAULT_IO_TIMEOUT),
        }
    }
}

// Password stays out of logs
impl std::fmt::Debug for ConnectorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("retry_interval", &self.retry_interval)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("io_timeout", &self.io_timeout)
            .finish()
    }
}

/// Splits `password@host`. An `@` at the very start is part of an abstract
/// socket name, not a password separator.
pub(crate) fn split_host(value: &str) -> (Option<String>, String) {
    match value.rsplit_once('@') {
        Some((password, host)) if !password.is_empty() && !host.is_empty() => {
            (Some(password.to_string()), host.to_string())
        }
        _ => (None, value.to_string()),
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
