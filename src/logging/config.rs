use std::{env, fmt, str::FromStr};

use chanbus_error::ConfigError;
use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::Directive;

/// Переменная окружения, перекрывающая уровень логирования.
pub const LOG_LEVEL_ENV: &str = "CHANBUS_LOG_LEVEL";
/// Переменная окружения, перекрывающая формат вывода.
pub const LOG_FORMAT_ENV: &str = "CHANBUS_LOG_FORMAT";

const LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

/// Формат консольного вывода.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::invalid(
                "logging.format",
                format!("unknown format '{other}', expected pretty|compact|json"),
            )),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(match self {
            Self::Pretty => "pretty",
            Self::Compact => "compact",
            Self::Json => "json",
        })
    }
}

/// Настройки логирования.
///
/// `level` задаёт базовый уровень, `directives` добавляют точечные
/// правила вида `chanbus::broker=trace`. `RUST_LOG`, если задана,
/// перекрывает и то и другое.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub directives: Vec<String>,
    pub format: LogFormat,
    pub with_ansi: bool,
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directives: Vec::new(),
            format: LogFormat::default(),
            with_ansi: true,
            with_target: true,
        }
    }
}

impl LoggingConfig {
    /// Применяет `CHANBUS_LOG_LEVEL` и `CHANBUS_LOG_FORMAT`.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(level) = env::var(LOG_LEVEL_ENV) {
            self.level = level.trim().to_ascii_lowercase();
        }
        if let Ok(format) = env::var(LOG_FORMAT_ENV) {
            self.format = format.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.level.to_ascii_lowercase();
        if !LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::invalid(
                "logging.level",
                format!("unknown level '{}'", self.level),
            ));
        }
        for directive in &self.directives {
            directive.parse::<Directive>().map_err(|e| {
                ConfigError::invalid("logging.directives", format!("'{directive}': {e}"))
            })?;
        }
        Ok(())
    }

    /// Собирает строку фильтра: базовый уровень, затем точечные правила.
    pub fn build_filter_directive(&self) -> String {
        let mut parts = Vec::with_capacity(self.directives.len() + 1);
        parts.push(self.level.to_ascii_lowercase());
        parts.extend(self.directives.iter().cloned());
        parts.join(",")
    }
}
