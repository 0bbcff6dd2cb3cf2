pub mod config;
mod filters;
mod formatter;
pub mod handle;

use chanbus_error::{BusResult, GenericError, StackError, StatusCode};
use once_cell::sync::OnceCell;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use self::config::{LogFormat, LoggingConfig};
pub use handle::LoggingHandle;

/// Конфигурация, с которой был установлен глобальный подписчик.
static INSTALLED: OnceCell<LoggingHandle> = OnceCell::new();

/// Инициализирует логирование процесса.
///
/// Порядок: переменные окружения поверх `config`, проверка, фильтр
/// (`RUST_LOG` важнее конфигурации), консольный слой выбранного формата.
/// Повторный вызов безопасен: подписчик уже стоит, возвращается handle с
/// `installed() == false` и форматом первой установки.
pub fn init_logging(mut config: LoggingConfig) -> BusResult<LoggingHandle> {
    config.apply_env_overrides()?;
    config.validate()?;

    if let Some(active) = INSTALLED.get() {
        return Ok(LoggingHandle::new(
            false,
            active.format(),
            active.filter().to_string(),
        ));
    }

    let handle = INSTALLED.get_or_try_init(|| {
        let directive = config.build_filter_directive();
        let env_filter = filters::build_filter_from_config(&config);
        let console = formatter::build_formatter_from_config(&config);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console)
            .try_init()
            .map_err(|e| {
                StackError::new(GenericError::new(StatusCode::Internal, e.to_string()))
                    .context("install global tracing subscriber")
            })?;

        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            log_level = %config.level,
            format = %config.format,
            "logging initialized"
        );
        Ok::<_, StackError>(LoggingHandle::new(true, config.format, directive))
    });

    handle.cloned()
}
