use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub transport: TransportConfig,
    pub reconnect: ReconnectConfig,
    pub backend: BackendConfig,
    pub store: StoreConfig,
    pub database: DatabaseConfig,
    pub preferences: PreferencesConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// WebSocket endpoint of the notification server (`ws://` or `wss://`).
    pub socket_url: String,
    /// How long to wait for the server's `connected` acknowledgement.
    pub connect_timeout_seconds: u64,
    /// Heartbeat interval; `0` disables pings.
    pub ping_interval_seconds: u64,
    /// Whether a credential change is pushed over the open socket
    /// (`authenticate` frame) instead of forcing a reconnect.
    pub credential_hot_swap: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    /// Maximum number of retries per connection cycle before giving up.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for each subsequent retry.
    pub base_delay_ms: u64,
    /// Cap for exponential backoff.
    pub max_delay_ms: u64,
    /// Randomization factor in `[0, 1]` applied to each delay.
    pub jitter: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// GraphQL endpoint used for mutations and snapshot queries.
    pub api_url: String,
    pub request_timeout_seconds: u64,
    /// Number of notifications requested for the initial snapshot and resync.
    pub fetch_limit: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Maximum number of notifications retained in memory.
    pub capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreferencesConfig {
    /// Key under which delivery preferences are stored.
    pub storage_key: String,
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn ping_interval(&self) -> Option<Duration> {
        (self.ping_interval_seconds > 0).then(|| Duration::from_secs(self.ping_interval_seconds))
    }
}

fn parse_bool(var: &str, default: bool) -> bool {
    match env::var(var) {
        Ok(v) => match v.to_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

fn parse_or<T: FromStr>(var: &str, default: T) -> T {
    env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn validate_url(var: &str, value: &str, schemes: &[&str]) -> Result<(), ConfigError> {
    let url = url::Url::parse(value).map_err(|_| ConfigError::InvalidValue(var.to_string()))?;
    if schemes.contains(&url.scheme()) {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue(var.to_string()))
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();

        let config = Config {
            transport: TransportConfig {
                socket_url: env::var("NOTIFICATIONS_SOCKET_URL")
                    .unwrap_or_else(|_| defaults.transport.socket_url.clone()),
                connect_timeout_seconds: parse_or(
                    "SOCKET_CONNECT_TIMEOUT_SECONDS",
                    defaults.transport.connect_timeout_seconds,
                ),
                ping_interval_seconds: parse_or(
                    "SOCKET_PING_INTERVAL_SECONDS",
                    defaults.transport.ping_interval_seconds,
                ),
                credential_hot_swap: parse_bool(
                    "SOCKET_CREDENTIAL_HOT_SWAP",
                    defaults.transport.credential_hot_swap,
                ),
            },
            reconnect: ReconnectConfig {
                max_attempts: parse_or("RECONNECT_MAX_ATTEMPTS", defaults.reconnect.max_attempts),
                base_delay_ms: parse_or(
                    "RECONNECT_BASE_DELAY_MS",
                    defaults.reconnect.base_delay_ms,
                ),
                max_delay_ms: parse_or("RECONNECT_MAX_DELAY_MS", defaults.reconnect.max_delay_ms),
                jitter: parse_or("RECONNECT_JITTER", defaults.reconnect.jitter),
            },
            backend: BackendConfig {
                api_url: env::var("NOTIFICATIONS_API_URL")
                    .unwrap_or_else(|_| defaults.backend.api_url.clone()),
                request_timeout_seconds: parse_or(
                    "BACKEND_REQUEST_TIMEOUT_SECONDS",
                    defaults.backend.request_timeout_seconds,
                ),
                fetch_limit: parse_or("NOTIFICATIONS_FETCH_LIMIT", defaults.backend.fetch_limit),
            },
            store: StoreConfig {
                capacity: parse_or("NOTIFICATION_STORE_CAPACITY", defaults.store.capacity),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or_else(|_| defaults.database.url.clone()),
                max_connections: parse_or(
                    "DATABASE_MAX_CONNECTIONS",
                    defaults.database.max_connections,
                ),
            },
            preferences: PreferencesConfig {
                storage_key: env::var("PREFERENCES_STORAGE_KEY")
                    .unwrap_or_else(|_| defaults.preferences.storage_key.clone()),
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks that hold no matter where the config came from; errors name
    /// the environment variable that feeds the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_url(
            "NOTIFICATIONS_SOCKET_URL",
            &self.transport.socket_url,
            &["ws", "wss"],
        )?;
        validate_url(
            "NOTIFICATIONS_API_URL",
            &self.backend.api_url,
            &["http", "https"],
        )?;
        if self.store.capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "NOTIFICATION_STORE_CAPACITY".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.reconnect.jitter) {
            return Err(ConfigError::InvalidValue("RECONNECT_JITTER".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            transport: TransportConfig {
                socket_url: "ws://localhost:4000/notifications".to_string(),
                connect_timeout_seconds: 10,
                ping_interval_seconds: 25,
                credential_hot_swap: true,
            },
            reconnect: ReconnectConfig {
                max_attempts: 5,
                base_delay_ms: 1000,
                max_delay_ms: 30_000,
                jitter: 0.0,
            },
            backend: BackendConfig {
                api_url: "http://localhost:4000/graphql".to_string(),
                request_timeout_seconds: 15,
                fetch_limit: 50,
            },
            store: StoreConfig { capacity: 50 },
            database: DatabaseConfig {
                url: "sqlite://data/client.db".to_string(),
                max_connections: 1,
            },
            preferences: PreferencesConfig {
                storage_key: "notification_preferences".to_string(),
            },
        }
    }
}
