use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки конфигурации.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
    #[error("Failed to load configuration: {reason}")]
    Load { reason: String },
}

impl ConfigError {
    pub fn invalid(
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl ErrorExt for ConfigError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidValue { .. } => StatusCode::InvalidConfig,
            Self::Load { .. } => StatusCode::ConfigLoad,
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
