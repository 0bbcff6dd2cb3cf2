use std::io;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки брокера и транспорта.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// Не удалось установить соединение
    #[error("Failed to connect to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },
    /// Таймаут подключения
    #[error("Connection timeout")]
    ConnectionTimeout,
    /// Соединение потеряно (закрыто брокером или сетью)
    #[error("Connection lost: {reason}")]
    ConnectionLost { reason: String },
    /// Не удалось получить соединение из пула за отведённое время
    #[error("Timed out waiting for a pooled connection")]
    PoolTimeout,
    /// Брокер недоступен
    #[error("Broker unavailable")]
    Unavailable,
    #[error("Read timeout")]
    ReadTimeout,
    #[error("Write timeout")]
    WriteTimeout,
    /// Нарушение протокола (неожиданный фрейм, битые данные)
    #[error("Protocol error: {reason}")]
    Protocol { reason: String },
    /// Ошибка, которую вернул сам брокер (`-ERR ...`)
    #[error("Broker error: {message}")]
    Server { message: String },
    #[error("I/O error ({kind:?}): {message}")]
    Io { kind: io::ErrorKind, message: String },
}

impl BrokerError {
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }

    pub fn lost(reason: impl Into<String>) -> Self {
        Self::ConnectionLost {
            reason: reason.into(),
        }
    }

    /// Ошибка означает, что соединение больше нельзя использовать.
    pub fn is_fatal_for_connection(&self) -> bool {
        !matches!(self, Self::Server { .. } | Self::PoolTimeout | Self::Unavailable)
    }
}

impl From<io::Error> for BrokerError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Self::ConnectionLost {
                reason: err.to_string(),
            },
            kind => Self::Io {
                kind,
                message: err.to_string(),
            },
        }
    }
}

impl ErrorExt for BrokerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::ConnectionFailed { .. } => StatusCode::ConnectionFailed,
            Self::ConnectionTimeout => StatusCode::Timeout,
            Self::ConnectionLost { .. } => StatusCode::ConnectionClosed,
            Self::PoolTimeout => StatusCode::PoolExhausted,
            Self::Unavailable => StatusCode::BrokerUnavailable,
            Self::ReadTimeout => StatusCode::ReadTimeout,
            Self::WriteTimeout => StatusCode::WriteTimeout,
            Self::Protocol { .. } => StatusCode::ProtocolError,
            Self::Server { .. } => StatusCode::BrokerError,
            Self::Io { .. } => StatusCode::Io,
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
