use std::path::Path;

use chanbus_error::ConfigError;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::{logging::LoggingConfig, pubsub::Channel, pubsub::RestartPolicy};

/// Префикс переменных окружения: `CHANBUS_BROKER__PORT=6380`.
pub const ENV_PREFIX: &str = "CHANBUS";
/// Путь к файлу настроек вместо `chanbus.{toml,json,yaml}` в рабочем каталоге.
pub const CONFIG_PATH_ENV: &str = "CHANBUS_CONFIG";

const DEFAULT_FILE: &str = "chanbus";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Имя канала брокера, общего для всех сообщений шины.
    pub channel: String,
    pub broker: BrokerSettings,
    pub subscription: SubscriptionSettings,
    pub logging: LoggingConfig,
}

/// Адрес брокера, размер пула и таймауты в миллисекундах.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub pool_size: usize,
    pub connect_timeout_ms: u64,
    /// Ожидание ответа на команду. Подписчик ждёт сообщений без таймаута.
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub acquire_timeout_ms: u64,
}

/// Политика перезапуска цикла подписки.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionSettings {
    /// `false`: перезапуск сразу после сбоя.
    pub backoff_enabled: bool,
    pub backoff_first_ms: u64,
    pub backoff_max_ms: u64,
    pub backoff_factor: f64,
    pub backoff_jitter: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            channel: "chanbus".to_string(),
            broker: BrokerSettings::default(),
            subscription: SubscriptionSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            pool_size: 8,
            connect_timeout_ms: 5_000,
            read_timeout_ms: 10_000,
            write_timeout_ms: 10_000,
            acquire_timeout_ms: 5_000,
        }
    }
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            backoff_enabled: false,
            backoff_first_ms: 100,
            backoff_max_ms: 30_000,
            backoff_factor: 2.0,
            backoff_jitter: 0.2,
        }
    }
}

impl Settings {
    /// Загружает настройки: значения по умолчанию, затем необязательный
    /// файл (`CHANBUS_CONFIG` или `chanbus.*`), затем окружение.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => File::with_name(&path).required(true),
            Err(_) => File::with_name(DEFAULT_FILE).required(false),
        };
        Self::build(file)
    }

    /// Как [`Settings::load`], но файл задан явно и обязателен.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::build(File::from(path.as_ref()).required(true))
    }

    fn build<S>(file: S) -> Result<Self, ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let cfg = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(load_error)?;

        let settings: Self = cfg.try_deserialize().map_err(load_error)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        Channel::new(self.channel.as_str())?;
        self.broker.validate()?;
        RestartPolicy::from_settings(&self.subscription)?;
        self.logging.validate()
    }
}

impl BrokerSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::invalid("broker.host", "must not be empty"));
        }
        if self.port == 0 {
            return Err(ConfigError::invalid("broker.port", "must not be 0"));
        }
        // Одно соединение держит подписчик, хотя бы одно нужно публикации.
        if self.pool_size < 2 {
            return Err(ConfigError::invalid(
                "broker.pool_size",
                format!("must be at least 2, got {}", self.pool_size),
            ));
        }
        for (field, value) in [
            ("broker.connect_timeout_ms", self.connect_timeout_ms),
            ("broker.read_timeout_ms", self.read_timeout_ms),
            ("broker.write_timeout_ms", self.write_timeout_ms),
            ("broker.acquire_timeout_ms", self.acquire_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid(field, "must be positive"));
            }
        }
        Ok(())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn load_error(e: config::ConfigError) -> ConfigError {
    ConfigError::Load {
        reason: e.to_string(),
    }
}
