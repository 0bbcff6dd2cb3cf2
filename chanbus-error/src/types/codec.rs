use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки декодирования конверта.
///
/// Обе ошибки восстановимы: вызывающая сторона пишет их в лог и отбрасывает
/// одно сообщение, сессия подписки при этом не затрагивается.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Текст не является корректным конвертом (невалидный JSON, нет тега,
    /// данные не соответствуют схеме варианта).
    #[error("Malformed envelope: {reason}")]
    MalformedEnvelope { reason: String },
    /// Конверт корректен, но тег не зарегистрирован.
    #[error("Unknown message variant '{tag}'")]
    UnknownVariant { tag: String },
}

/// Ошибки кодирования сообщения в конверт.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("Failed to serialize '{tag}': {reason}")]
    Serialization { tag: String, reason: String },
}

impl DecodeError {
    pub fn malformed(reason: impl ToString) -> Self {
        Self::MalformedEnvelope {
            reason: reason.to_string(),
        }
    }

    pub fn unknown(tag: impl Into<String>) -> Self {
        Self::UnknownVariant { tag: tag.into() }
    }
}

impl ErrorExt for DecodeError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::MalformedEnvelope { .. } => StatusCode::MalformedEnvelope,
            Self::UnknownVariant { .. } => StatusCode::UnknownVariant,
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl ErrorExt for EncodeError {
    fn status_code(&self) -> StatusCode {
        StatusCode::SerializationFailed
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_display() {
        assert_eq!(
            DecodeError::unknown("OrderFilled").to_string(),
            "Unknown message variant 'OrderFilled'"
        );
        assert_eq!(
            DecodeError::malformed("expected value").to_string(),
            "Malformed envelope: expected value"
        );
    }

    #[test]
    fn test_decode_error_status_codes() {
        assert_eq!(
            DecodeError::unknown("x").status_code(),
            StatusCode::UnknownVariant
        );
        assert_eq!(
            DecodeError::malformed("x").status_code(),
            StatusCode::MalformedEnvelope
        );
    }
}
