use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use crate::marketplace::schema::MIN_LISTING_IMAGES;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub marketplace: MarketplaceConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig {
                log_level,
                ansi: environment == AppEnvironment::Development,
                show_targets: environment != AppEnvironment::Production,
            },
            marketplace: MarketplaceConfig::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    /// Colour output; only for local development terminals.
    pub ansi: bool,
    pub show_targets: bool,
}

pub const DEFAULT_LISTING_WINDOW_DAYS: i64 = 21;
pub const MAX_LISTING_WINDOW_DAYS: i64 = 3650;
pub const DEFAULT_MINIMUM_AGE: u32 = 18;
const MAX_READ_RETRIES: u8 = 2;

const DEFAULT_IMAGES: [&str; 4] = [
    "https://media.rental-market.local/defaults/exterior.jpg",
    "https://media.rental-market.local/defaults/living-room.jpg",
    "https://media.rental-market.local/defaults/bedroom.jpg",
    "https://media.rental-market.local/defaults/kitchen.jpg",
];

/// Policy values shared by every lifecycle manager. Built once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketplaceConfig {
    /// Days between a listing's creation and its expiry.
    pub listing_window_days: i64,
    /// Minimum account holder age in whole years.
    pub minimum_age: u32,
    /// Extra attempts granted to idempotent store reads.
    pub read_retries: u8,
    /// Images attached to a listing created without any.
    pub default_images: Vec<String>,
    /// Period of the background expiry and repair sweep; zero disables it.
    pub sweep_interval_secs: u64,
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            listing_window_days: DEFAULT_LISTING_WINDOW_DAYS,
            minimum_age: DEFAULT_MINIMUM_AGE,
            read_retries: 1,
            default_images: DEFAULT_IMAGES.iter().map(|url| url.to_string()).collect(),
            sweep_interval_secs: 300,
        }
    }
}

impl MarketplaceConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let listing_window_days =
            parse_var("MARKET_LISTING_WINDOW_DAYS", defaults.listing_window_days)?;
        if !(1..=MAX_LISTING_WINDOW_DAYS).contains(&listing_window_days) {
            return Err(ConfigError::InvalidNumber {
                variable: "MARKET_LISTING_WINDOW_DAYS",
            });
        }

        let read_retries = parse_var("MARKET_READ_RETRIES", defaults.read_retries)?;
        if read_retries > MAX_READ_RETRIES {
            return Err(ConfigError::InvalidNumber {
                variable: "MARKET_READ_RETRIES",
            });
        }

        let default_images = match env::var("MARKET_DEFAULT_IMAGES") {
            Ok(raw) => {
                let mut images: Vec<String> = Vec::new();
                for url in raw.split(',').map(str::trim).filter(|url| !url.is_empty()) {
                    if !images.iter().any(|seen| seen == url) {
                        images.push(url.to_string());
                    }
                }
                if images.len() < MIN_LISTING_IMAGES {
                    return Err(ConfigError::SparseMediaSet {
                        found: images.len(),
                    });
                }
                images
            }
            Err(_) => defaults.default_images,
        };

        Ok(Self {
            listing_window_days,
            minimum_age: parse_var("MARKET_MINIMUM_AGE", defaults.minimum_age)?,
            read_retries,
            default_images,
            sweep_interval_secs: parse_var("MARKET_SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs)?,
        })
    }
}

fn parse_var<T: std::str::FromStr>(variable: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(variable) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { variable }),
        Err(_) => Ok(default),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { variable: &'static str },
    SparseMediaSet { found: usize },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { variable } => {
                write!(f, "{variable} must be a positive number within range")
            }
            ConfigError::SparseMediaSet { found } => write!(
                f,
                "MARKET_DEFAULT_IMAGES must list at least {MIN_LISTING_IMAGES} distinct URLs, found {found}"
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidNumber { .. }
            | ConfigError::SparseMediaSet { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        for variable in [
            "APP_ENV",
            "APP_HOST",
            "APP_PORT",
            "APP_LOG_LEVEL",
            "MARKET_LISTING_WINDOW_DAYS",
            "MARKET_MINIMUM_AGE",
            "MARKET_READ_RETRIES",
            "MARKET_DEFAULT_IMAGES",
            "MARKET_SWEEP_INTERVAL_SECS",
        ] {
            env::remove_var(variable);
        }
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert!(config.telemetry.ansi);
        assert_eq!(config.marketplace, MarketplaceConfig::default());
        assert_eq!(config.marketplace.listing_window_days, 21);
        assert_eq!(config.marketplace.default_images.len(), 4);
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
        reset_env();
    }

    #[test]
    fn marketplace_overrides_are_parsed() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("MARKET_LISTING_WINDOW_DAYS", "14");
        env::set_var("MARKET_MINIMUM_AGE", "21");
        env::set_var(
            "MARKET_DEFAULT_IMAGES",
            "https://a/1.jpg, https://a/2.jpg,,https://a/3.jpg,https://a/1.jpg,https://a/4.jpg",
        );
        let config = AppConfig::load().expect("config loads");
        assert_eq!(config.marketplace.listing_window_days, 14);
        assert_eq!(config.marketplace.minimum_age, 21);
        assert_eq!(
            config.marketplace.default_images,
            ["https://a/1.jpg", "https://a/2.jpg", "https://a/3.jpg", "https://a/4.jpg"]
                .map(str::to_string)
                .to_vec()
        );
        reset_env();
    }

    #[test]
    fn rejects_out_of_range_values() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("MARKET_READ_RETRIES", "5");
        assert!(matches!(
            AppConfig::load(),
            Err(ConfigError::InvalidNumber {
                variable: "MARKET_READ_RETRIES"
            })
        ));

        reset_env();
        env::set_var("MARKET_DEFAULT_IMAGES", " , ");
        assert!(matches!(
            AppConfig::load(),
            Err(ConfigError::SparseMediaSet { found: 0 })
        ));

        reset_env();
        env::set_var("MARKET_DEFAULT_IMAGES", "https://a/1.jpg,https://a/2.jpg");
        assert!(matches!(
            AppConfig::load(),
            Err(ConfigError::SparseMediaSet { found: 2 })
        ));

        reset_env();
        env::set_var(
            "MARKET_DEFAULT_IMAGES",
            "https://a/1.jpg,https://a/1.jpg,https://a/2.jpg,https://a/2.jpg",
        );
        assert!(matches!(
            AppConfig::load(),
            Err(ConfigError::SparseMediaSet { found: 2 })
        ));
        reset_env();
    }

    #[test]
    fn rejects_listing_windows_outside_bounds() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        for raw in ["0", "-3", "3651", "200000000"] {
            reset_env();
            env::set_var("MARKET_LISTING_WINDOW_DAYS", raw);
            assert!(matches!(
                AppConfig::load(),
                Err(ConfigError::InvalidNumber {
                    variable: "MARKET_LISTING_WINDOW_DAYS"
                })
            ));
        }

        reset_env();
        env::set_var("MARKET_LISTING_WINDOW_DAYS", "3650");
        let config = AppConfig::load().expect("upper bound accepted");
        assert_eq!(config.marketplace.listing_window_days, MAX_LISTING_WINDOW_DAYS);
        reset_env();
    }
}
