//!
//! Documentation of the config module.
//! Sets up the 'config' and 'logger'.
//!

extern crate confy;

use anyhow::Context;
use serde::{Serialize, Deserialize};
use std::default::Default;

/// Name of the on-disk config file, next to the binary's working directory
pub const CONFIG_FILE: &str = "parkpal.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParkpalConfig {
    pub print_log: bool,
    pub log_file: String,
    pub log_level: String,
    pub database: String,
    pub database_uri: String,
    pub timeout: u64,
    pub address: String,
    pub port: u16,
    pub jwt_secret: Option<String>,
    pub token_ttl_days: i64,
    pub cors_origin: String,
}

///Config check
impl Default for ParkpalConfig {
    fn default() -> Self {
        ParkpalConfig {
            print_log: true,
            log_file: "parkpal.log".to_string(),
            log_level: "info".to_string(),
            database: "parkpal".to_string(),
            database_uri: "mongodb://localhost:27017/parkpal".to_string(),
            timeout: 5,
            address: "0.0.0.0".to_string(),
            port: 5000,
            jwt_secret: None,
            token_ttl_days: 7,
            cors_origin: "*".to_string(),
        }
    }
}

impl ParkpalConfig {
    /// Overrides the file values with whatever the environment provides.
    ///
    /// `lookup` is `std::env::var` in production; tests hand in a map.
    pub fn apply_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(uri) = lookup("MONGODB_URI") {
            self.database_uri = uri;
        }
        if let Some(secret) = lookup("JWT_SECRET") {
            // an empty secret is as good as none
            self.jwt_secret = Some(secret).filter(|value| !value.trim().is_empty());
        }
        if let Some(port) = lookup("PORT") {
            match port.trim().parse::<u16>() {
                Ok(value) => self.port = value,
                Err(_) => log::warn!("Ignoring unparseable PORT value {:?}", port),
            }
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(origin) = lookup("CORS_ORIGIN") {
            self.cors_origin = origin;
        }
        self
    }

    /// The configured log level, falling back to `Info` on garbage
    pub fn level_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

/// Initialize config and load
pub async fn init() -> anyhow::Result<ParkpalConfig> {
    let cfg: ParkpalConfig = match confy::load_path(CONFIG_FILE) {
        Ok(value) => value,
        Err(e) => {
            // confy creates the file when missing, so this is a broken file
            eprintln!("Could not read {}, using defaults: {}", CONFIG_FILE, e);
            ParkpalConfig::default()
        }
    };
    Ok(cfg.apply_env(|key| std::env::var(key).ok()))
}

/// Sets up logger
pub async fn setup_logger(file: &ParkpalConfig) -> anyhow::Result<()> {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(file.level_filter())
        // the driver is chatty at debug level
        .level_for("mongodb", log::LevelFilter::Warn)
        .chain(fern::log_file(&file.log_file)
            .with_context(|| format!("could not open log file {}", file.log_file))?);

    if file.print_log {
        dispatch = dispatch.chain(std::io::stdout());
    }

    dispatch.apply().context("logger already initialised")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn environment_overrides_file_values() {
        let cfg = ParkpalConfig::default().apply_env(env(&[
            ("MONGODB_URI", "mongodb://db:27017/parking"),
            ("JWT_SECRET", "s3cret"),
            ("PORT", "8080"),
        ]));
        assert_eq!(cfg.database_uri, "mongodb://db:27017/parking");
        assert_eq!(cfg.jwt_secret.as_deref(), Some("s3cret"));
        assert_eq!(cfg.port, 8080);
    }

    #[test]
    fn bad_port_and_blank_secret_are_ignored() {
        let cfg = ParkpalConfig::default().apply_env(env(&[("PORT", "eighty"), ("JWT_SECRET", "  ")]));
        assert_eq!(cfg.port, 5000);
        assert!(cfg.jwt_secret.is_none());
    }

    #[test]
    fn unknown_log_level_falls_back_to_info() {
        let cfg = ParkpalConfig { log_level: "loud".into(), ..ParkpalConfig::default() };
        assert_eq!(cfg.level_filter(), log::LevelFilter::Info);
        let cfg = ParkpalConfig { log_level: "debug".into(), ..ParkpalConfig::default() };
        assert_eq!(cfg.level_filter(), log::LevelFilter::Debug);
    }
}
