//! Настройки шины: значения по умолчанию, файл и переменные окружения.

mod settings;

pub use settings::{BrokerSettings, Settings, SubscriptionSettings, CONFIG_PATH_ENV, ENV_PREFIX};
