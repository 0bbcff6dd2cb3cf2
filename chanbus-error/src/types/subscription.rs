use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Сбой живой сессии подписки.
///
/// Никогда не фатален для процесса: цикл подписки пишет ошибку в лог и
/// перезапускает сессию.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    #[error("Failed to acquire connection for '{channel}': {reason}")]
    Acquire { channel: String, reason: String },
    #[error("Failed to subscribe to '{channel}': {reason}")]
    Subscribe { channel: String, reason: String },
    #[error("Session on '{channel}' failed: {reason}")]
    Session { channel: String, reason: String },
    #[error("Session on '{channel}' closed by broker")]
    SessionClosed { channel: String },
}

impl SubscriptionError {
    pub fn channel(&self) -> &str {
        match self {
            Self::Acquire { channel, .. }
            | Self::Subscribe { channel, .. }
            | Self::Session { channel, .. }
            | Self::SessionClosed { channel } => channel,
        }
    }
}

impl ErrorExt for SubscriptionError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Acquire { .. } | Self::Subscribe { .. } => StatusCode::SubscriptionFailed,
            Self::Session { .. } | Self::SessionClosed { .. } => StatusCode::SessionLost,
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
