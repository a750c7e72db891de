//! Configuration management

use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub geoip: GeoIpConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub janitor: JanitorConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    10000
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite file, or `:memory:`
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_database_url() -> String {
    "ipwatch.db".to_string()
}

fn default_max_connections() -> u32 {
    8
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeoIpConfig {
    #[serde(default = "default_geoip_database")]
    pub database: String,
    /// JSON table of zone offsets and spoken languages per country
    #[serde(default = "default_country_data")]
    pub country_data: String,
}

impl Default for GeoIpConfig {
    fn default() -> Self {
        Self {
            database: default_geoip_database(),
            country_data: default_country_data(),
        }
    }
}

fn default_geoip_database() -> String {
    "GeoLite2-City.mmdb".to_string()
}

fn default_country_data() -> String {
    "countrydata.json".to_string()
}

/// Dedup windows per endpoint, in hours.
#[derive(Debug, Clone, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_check_window")]
    pub check_window_hours: u32,
    #[serde(default = "default_ip_window")]
    pub ip_window_hours: u32,
    #[serde(default = "default_ip_window")]
    pub ipinfo_window_hours: u32,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            check_window_hours: default_check_window(),
            ip_window_hours: default_ip_window(),
            ipinfo_window_hours: default_ip_window(),
        }
    }
}

fn default_check_window() -> u32 {
    1
}

fn default_ip_window() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct JanitorConfig {
    #[serde(default = "default_janitor_interval")]
    pub interval_hours: u32,
    #[serde(default = "default_max_age")]
    pub max_age_hours: u32,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            interval_hours: default_janitor_interval(),
            max_age_hours: default_max_age(),
        }
    }
}

fn default_janitor_interval() -> u32 {
    12
}

fn default_max_age() -> u32 {
    24
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_sweep_minutes")]
    pub interval_minutes: u32,
    #[serde(default = "default_sweep_minutes")]
    pub offline_after_minutes: u32,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_sweep_minutes(),
            offline_after_minutes: default_sweep_minutes(),
        }
    }
}

fn default_sweep_minutes() -> u32 {
    15
}

/// Offline-device notifications. Without a webhook URL they only go to the log.
#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub webhook_url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub user: String,
    #[serde(default = "default_notify_title")]
    pub title: String,
    #[serde(default)]
    pub sound: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            token: String::new(),
            user: String::new(),
            title: default_notify_title(),
            sound: String::new(),
        }
    }
}

fn default_notify_title() -> String {
    "Device Warning".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load() -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config.toml").required(false))
            .add_source(
                config::Environment::with_prefix("IPWATCH")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let settings = builder.build()?;
        let config: Config = settings.try_deserialize()?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Invalid port: 0 is not allowed");
        }
        if self.server.host.is_empty() {
            anyhow::bail!("Server host cannot be empty");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }
        if self.database.max_connections == 0 {
            anyhow::bail!("database.max_connections must be at least 1");
        }

        let windows = [
            ("dedup.check_window_hours", self.dedup.check_window_hours),
            ("dedup.ip_window_hours", self.dedup.ip_window_hours),
            ("dedup.ipinfo_window_hours", self.dedup.ipinfo_window_hours),
            ("janitor.interval_hours", self.janitor.interval_hours),
            ("janitor.max_age_hours", self.janitor.max_age_hours),
            ("sweep.interval_minutes", self.sweep.interval_minutes),
            ("sweep.offline_after_minutes", self.sweep.offline_after_minutes),
        ];
        for (name, value) in windows {
            if value == 0 {
                anyhow::bail!("{} must be greater than 0", name);
            }
        }

        let url = &self.notify.webhook_url;
        if !url.is_empty() && !(url.starts_with("http://") || url.starts_with("https://")) {
            anyhow::bail!("Invalid notify.webhook_url '{}': must be an http(s) URL", url);
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("Invalid logging level '{}'. Must be one of: {:?}", self.logging.level, valid_levels);
        }

        Ok(())
    }

    pub fn janitor_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.janitor.interval_hours) * 3600)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.sweep.interval_minutes) * 60)
    }

    pub fn offline_after(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.sweep.offline_after_minutes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dedup.check_window_hours, 1);
        assert_eq!(config.dedup.ip_window_hours, 5);
        assert_eq!(config.janitor.max_age_hours, 24);
        assert_eq!(config.sweep.offline_after_minutes, 15);
    }

    #[test]
    fn rejects_zero_window() {
        let mut config = Config::default();
        config.dedup.ipinfo_window_hours = 0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("dedup.ipinfo_window_hours"));
    }

    #[test]
    fn rejects_non_http_webhook() {
        let mut config = Config::default();
        config.notify.webhook_url = "ftp://example.com/hook".to_string();
        assert!(config.validate().is_err());

        config.notify.webhook_url = "https://example.com/hook".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_unknown_log_level() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }
}
