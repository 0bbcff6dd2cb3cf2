use std::fmt;

/// Коды статуса для категоризации ошибок.
///
/// # Диапазоны:
/// - 1xxx: Общие ошибки
/// - 2xxx: Ошибки конверта (кодек)
/// - 4xxx: Ограничения (пул соединений)
/// - 6xxx: Сеть / IO / брокер
/// - 7xxx: Публикация и подписка
/// - 9xxx: Конфигурация
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
#[non_exhaustive]
pub enum StatusCode {
    // === 1xxx: Общие ошибки ===
    Internal = 1003,
    InvalidArgs = 1004,

    // === 2xxx: Кодек ===
    MalformedEnvelope = 2000,
    UnknownVariant = 2001,
    SerializationFailed = 2002,

    // === 4xxx: Ограничения ===
    PoolExhausted = 4000,

    // === 6xxx: Сеть/IO/брокер ===
    Io = 6000,
    ConnectionClosed = 6001,
    Timeout = 6002,
    ProtocolError = 6003,
    ConnectionFailed = 6004,
    ReadTimeout = 6005,
    WriteTimeout = 6006,
    BrokerUnavailable = 6008,
    BrokerError = 6009,

    // === 7xxx: Pub/Sub ===
    PublishFailed = 7000,
    SubscriptionFailed = 7001,
    SessionLost = 7002,

    // === 9xxx: Конфигурация ===
    InvalidConfig = 9000,
    ConfigLoad = 9001,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl StatusCode {
    /// Числовое представление кода статуса.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Возвращает `true`, если операцию с этим кодом имеет смысл повторить.
    ///
    /// Цикл подписки перезапускается всегда, независимо от кода; флаг нужен
    /// вызывающему коду на стороне публикации.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::ReadTimeout
                | Self::WriteTimeout
                | Self::ConnectionFailed
                | Self::ConnectionClosed
                | Self::PoolExhausted
                | Self::BrokerUnavailable
                | Self::SessionLost
        )
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для StatusCode
////////////////////////////////////////////////////////////////////////////////

impl From<StatusCode> for u32 {
    fn from(c: StatusCode) -> Self {
        c.code()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.code())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет, что retryable-коды помечаются корректно.
    #[test]
    fn test_retryable() {
        assert!(StatusCode::Timeout.is_retryable());
        assert!(StatusCode::SessionLost.is_retryable());
        assert!(!StatusCode::MalformedEnvelope.is_retryable());
        assert!(!StatusCode::InvalidConfig.is_retryable());
    }

    #[test]
    fn test_code_and_into() {
        let c = StatusCode::PublishFailed;
        assert_eq!(c.code(), 7000);
        let n: u32 = c.into();
        assert_eq!(n, 7000);
    }

    /// Тест проверяет формат `Display`: имя варианта и числовой код.
    #[test]
    fn test_display_contains_name_and_code() {
        let s = format!("{}", StatusCode::UnknownVariant);
        assert!(s.contains("2001"), "Display must contain code, got: {s}");
        assert!(s.contains("UnknownVariant"), "got: {s}");
    }
}
