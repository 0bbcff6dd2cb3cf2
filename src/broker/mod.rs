//! Соединения с брокером pub/sub.
//!
//! Шина работает с брокером только через два трейта: [`ConnectionPool`]
//! (выдаёт соединения в аренду) и [`BrokerConnection`] (одно соединение).
//! Адаптеры:
//! - [`tcp`]: Redis-совместимый брокер по RESP2 поверх TCP;
//! - [`memory`]: внутрипроцессный брокер с инъекцией сбоев.

pub mod memory;
pub mod resp;
pub mod tcp;

use async_trait::async_trait;
use bytes::Bytes;
use chanbus_error::BrokerError;

pub use memory::{MemoryBroker, MemoryConnection, MemoryPool};
pub use tcp::{PooledConnection, RespConnection, TcpOptions, TcpPool};

pub type BrokerResult<T> = Result<T, BrokerError>;

/// Входящее сообщение подписки.
///
/// `payload` хранится как есть: брокер может доставить и не-UTF-8 байты,
/// такой конверт отбрасывает маршрутизатор, а не соединение.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    pub channel: String,
    pub payload: Bytes,
}

impl ChannelMessage {
    pub fn new(
        channel: impl Into<String>,
        payload: impl AsRef<[u8]>,
    ) -> Self {
        Self {
            channel: channel.into(),
            payload: Bytes::copy_from_slice(payload.as_ref()),
        }
    }
}

/// Одно соединение с брокером.
///
/// После `subscribe` соединение переходит в режим подписчика: дальше
/// допустимы только `next_message` и `unsubscribe`.
#[async_trait]
pub trait BrokerConnection: Send {
    /// Публикует `payload` в канал. Возвращает число получателей,
    /// о котором сообщил брокер.
    async fn publish(
        &mut self,
        channel: &str,
        payload: &str,
    ) -> BrokerResult<u64>;

    /// Подписывается на канал и ждёт подтверждения от брокера.
    async fn subscribe(
        &mut self,
        channel: &str,
    ) -> BrokerResult<()>;

    /// Ждёт следующее сообщение подписки.
    ///
    /// `Ok(None)` означает, что брокер закрыл сессию.
    async fn next_message(&mut self) -> BrokerResult<Option<ChannelMessage>>;

    async fn unsubscribe(
        &mut self,
        channel: &str,
    ) -> BrokerResult<()>;
}

/// Пул соединений, общий для публикатора и цикла подписки.
///
/// `acquire` возвращает аренду: соединение принадлежит вызывающему до
/// drop, после чего возвращается в пул (или закрывается, если больше не
/// пригодно). Пул безопасен для конкурентного использования.
#[async_trait]
pub trait ConnectionPool: Send + Sync + 'static {
    type Connection: BrokerConnection + 'static;

    async fn acquire(&self) -> BrokerResult<Self::Connection>;
}
