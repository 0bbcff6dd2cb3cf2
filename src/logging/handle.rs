use super::config::LogFormat;

/// Итог инициализации логирования.
///
/// Глобальный подписчик ставится один раз на процесс. Повторный вызов
/// `init_logging` ничего не меняет и возвращает handle с
/// `installed() == false`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingHandle {
    installed: bool,
    format: LogFormat,
    filter: String,
}

impl LoggingHandle {
    pub(crate) fn new(
        installed: bool,
        format: LogFormat,
        filter: String,
    ) -> Self {
        Self {
            installed,
            format,
            filter,
        }
    }

    /// `true`, если именно этот вызов установил глобальный подписчик.
    pub fn installed(&self) -> bool {
        self.installed
    }

    /// Формат активного подписчика.
    pub fn format(&self) -> LogFormat {
        self.format
    }

    /// Директива фильтра из конфигурации. `RUST_LOG` здесь не отражена.
    pub fn filter(&self) -> &str {
        &self.filter
    }
}
