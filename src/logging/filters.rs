use tracing_subscriber::EnvFilter;

use super::config::LoggingConfig;

/// Строит фильтр событий.
///
/// Если задана `RUST_LOG`, используется она. Иначе фильтр собирается из
/// конфигурации; некорректная директива откатывает фильтр к `info`.
pub fn build_filter_from_config(config: &LoggingConfig) -> EnvFilter {
    if let Ok(env_filter) = EnvFilter::try_from_default_env() {
        return env_filter;
    }

    let directive = config.build_filter_directive();
    match EnvFilter::try_new(&directive) {
        Ok(filter) => filter,
        Err(e) => {
            // Подписчик ещё не установлен, tracing здесь некуда писать.
            eprintln!("invalid log filter '{directive}': {e}; falling back to 'info'");
            EnvFilter::new("info")
        }
    }
}
