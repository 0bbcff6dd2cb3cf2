//! chanbus: типизированный publish/subscribe поверх одного канала брокера.
//!
//! Разнородные сообщения делят один канал: каждое кодируется в
//! JSON-конверт с тегом варианта, а на принимающей стороне декодируется
//! обратно в конкретный тип и раздаётся слушателям этого типа. Подписка
//! живёт в фоновой задаче и перезапускается после любого сбоя.

/// Соединения с брокером: трейты, RESP2 поверх TCP, брокер в памяти.
pub mod broker;
/// Фасад шины.
pub mod bus;
/// Кодек конвертов и реестр вариантов.
pub mod codec;
/// Загрузка настроек.
pub mod config;
/// Инициализация логирования (фильтры, форматы).
pub mod logging;
/// Публикатор, цикл подписки, маршрутизация и слушатели.
pub mod pubsub;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Адаптеры брокера.
pub use broker::{
    BrokerConnection, ChannelMessage, ConnectionPool, MemoryBroker, MemoryPool, TcpOptions,
    TcpPool,
};
/// Шина.
pub use bus::{BusBuilder, ChannelBus};
/// Кодек.
pub use codec::{complex_keys, Decoded, EnvelopeCodec, Message};
/// Настройки.
pub use crate::config::{BrokerSettings, Settings, SubscriptionSettings};
/// Ошибки.
pub use chanbus_error::{
    BrokerError, BusResult, ConfigError, DecodeError, EncodeError, ErrorExt, PublishError,
    StackError, StatusCode, SubscriptionError,
};
/// Логирование.
pub use logging::{init_logging, LogFormat, LoggingConfig, LoggingHandle};
/// Pub/Sub.
pub use pubsub::{
    Channel, ListenerId, LoopState, LoopStatusSnapshot, RestartBackoff, RestartPolicy,
};
