use thiserror::Error;

use crate::{BrokerError, EncodeError, ErrorExt, StatusCode};

/// Ошибки публикации.
///
/// Возвращаются вызывающей стороне синхронно и внутри не повторяются.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    /// Сообщение не удалось закодировать
    #[error("Failed to encode message '{tag}': {reason}")]
    Encode { tag: String, reason: String },
    /// Не удалось получить соединение с брокером
    #[error("No broker connection for channel '{channel}': {reason}")]
    Connection { channel: String, reason: String },
    /// Брокер вернул ошибку или соединение оборвалось во время отправки
    #[error("Broker rejected publish to '{channel}': {reason}")]
    Broker { channel: String, reason: String },
}

impl PublishError {
    pub fn encode(err: &EncodeError) -> Self {
        match err {
            EncodeError::Serialization { tag, reason } => Self::Encode {
                tag: tag.clone(),
                reason: reason.clone(),
            },
        }
    }

    pub fn connection(
        channel: &str,
        err: &BrokerError,
    ) -> Self {
        Self::Connection {
            channel: channel.to_string(),
            reason: err.to_string(),
        }
    }

    pub fn broker(
        channel: &str,
        err: &BrokerError,
    ) -> Self {
        Self::Broker {
            channel: channel.to_string(),
            reason: err.to_string(),
        }
    }
}

impl ErrorExt for PublishError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Encode { .. } => StatusCode::SerializationFailed,
            Self::Connection { .. } | Self::Broker { .. } => StatusCode::PublishFailed,
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
