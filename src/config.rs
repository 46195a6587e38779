use std::fs;

use directories::ProjectDirs;
use figment::{
    providers::{Format, Serialized, Toml},
    Figment,
};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

pub static CONFIG: OnceCell<Config> = OnceCell::new();

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoggingConfig {
    pub clubpulse: String,
}

impl LoggingConfig {
    const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
    const CLUBPULSE_LEVEL: &str = "info";

    fn default() -> Self {
        LoggingConfig {
            clubpulse: Self::CLUBPULSE_LEVEL.to_string(),
        }
    }

    fn ensure_valid(&mut self) {
        let str_original = self.clubpulse.clone();
        self.clubpulse = self.clubpulse.trim().to_ascii_lowercase();
        if !Self::LOG_LEVELS.contains(&self.clubpulse.as_str()) {
            eprintln!(
                "Config error: clubpulse log level of '{}' is invalid - using default of '{}'",
                str_original,
                Self::CLUBPULSE_LEVEL
            );
            self.clubpulse = Self::CLUBPULSE_LEVEL.to_owned();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceBackend {
    Api,
    Fixture,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SourceConfig {
    backend: String,
    pub api_base_url: String,
    pub fixture_dir: String,
}

impl SourceConfig {
    const BACKENDS: [&str; 2] = ["api", "fixture"];
    const BACKEND_API: &str = "api";

    pub fn backend(&self) -> SourceBackend {
        // "backend" is normalized in ensure_valid, so anything that isn't
        // "fixture" is the API backend - never panic on a config string
        match self.backend.as_str() {
            "fixture" => SourceBackend::Fixture,
            _ => SourceBackend::Api,
        }
    }

    fn default() -> Self {
        SourceConfig {
            backend: Self::BACKEND_API.to_owned(),
            api_base_url: "https://uma.moe/api/v4/circles".to_owned(),
            fixture_dir: ".".to_owned(),
        }
    }

    fn ensure_valid(&mut self) {
        let str_original = self.backend.clone();
        self.backend = self.backend.trim().to_ascii_lowercase();
        if !Self::BACKENDS.contains(&self.backend.as_str()) {
            eprintln!(
                "Config error: source backend of '{}' is invalid - using default of '{}'",
                str_original,
                Self::BACKEND_API
            );
            self.backend = Self::BACKEND_API.to_owned();
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_secs: u64,
    pub multiplier: u32,
}

impl RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 3,
            base_delay_secs: 10,
            multiplier: 2,
        }
    }

    fn ensure_valid(&mut self) {
        if self.max_attempts == 0 {
            eprintln!("Config error: retry max_attempts must be at least 1 - using 1");
            self.max_attempts = 1;
        }
        if self.multiplier == 0 {
            eprintln!("Config error: retry multiplier must be at least 1 - using 1");
            self.multiplier = 1;
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_secs: u64,
    pub workers: usize,
}

impl SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            tick_secs: 300,
            workers: 4,
        }
    }

    fn ensure_valid(&mut self) {
        if self.tick_secs == 0 {
            eprintln!("Config error: scheduler tick_secs must be at least 1 - using 60");
            self.tick_secs = 60;
        }
        if self.workers == 0 {
            eprintln!("Config error: scheduler workers must be at least 1 - using 1");
            self.workers = 1;
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    pub logging: LoggingConfig,
    pub source: SourceConfig,
    pub retry: RetryConfig,
    pub scheduler: SchedulerConfig,
}

impl Config {
    /// Loads the configuration from a TOML file located in the app's data
    /// directory. If the file is missing or fails to parse, defaults are used.
    /// Additionally, writes the default config to disk if no file exists.
    pub fn load_config(project_dirs: &ProjectDirs) -> Self {
        let config_path = project_dirs.data_local_dir().join("config.toml");

        let default_config = Config {
            logging: LoggingConfig::default(),
            source: SourceConfig::default(),
            retry: RetryConfig::default(),
            scheduler: SchedulerConfig::default(),
        };

        // If the config file doesn't exist, write the default configuration to disk.
        if !config_path.exists() {
            if let Some(parent) = config_path.parent() {
                if let Err(e) = fs::create_dir_all(parent) {
                    eprintln!(
                        "Failed to create configuration directory {}: {}",
                        parent.display(),
                        e
                    );
                }
            }
            if let Ok(toml_string) = toml::to_string_pretty(&default_config) {
                if let Err(e) = fs::write(&config_path, toml_string) {
                    eprintln!(
                        "Failed to write default config to {}: {}",
                        config_path.display(),
                        e
                    );
                }
            } else {
                eprintln!("Failed to serialize default config.");
            }
        }

        let figment = Figment::from(Serialized::defaults(default_config.clone()))
            .merge(Toml::file(&config_path));

        let mut config = figment.extract().unwrap_or_else(|err| {
            eprintln!(
                "Could not load config file {}: {}. Using default configuration.",
                config_path.display(),
                err
            );
            default_config
        });

        config.ensure_valid();

        config
    }

    fn ensure_valid(&mut self) {
        self.logging.ensure_valid();
        self.source.ensure_valid();
        self.retry.ensure_valid();
        self.scheduler.ensure_valid();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_values_fall_back_to_defaults() {
        let mut config = Config {
            logging: LoggingConfig {
                clubpulse: " DEBUG ".to_string(),
            },
            source: SourceConfig {
                backend: "carrier-pigeon".to_string(),
                api_base_url: "https://example.test".to_string(),
                fixture_dir: ".".to_string(),
            },
            retry: RetryConfig {
                max_attempts: 0,
                base_delay_secs: 1,
                multiplier: 0,
            },
            scheduler: SchedulerConfig {
                tick_secs: 0,
                workers: 0,
            },
        };

        config.ensure_valid();

        assert_eq!(config.logging.clubpulse, "debug");
        assert_eq!(config.source.backend(), SourceBackend::Api);
        assert_eq!(config.retry.max_attempts, 1);
        assert_eq!(config.retry.multiplier, 1);
        assert_eq!(config.scheduler.tick_secs, 60);
        assert_eq!(config.scheduler.workers, 1);
    }
}
