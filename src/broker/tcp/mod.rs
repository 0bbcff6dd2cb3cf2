//! RESP2-брокер поверх TCP.

mod connection;
mod pool;

use std::time::Duration;

pub use connection::RespConnection;
pub use pool::{PooledConnection, TcpPool};

use crate::config::BrokerSettings;

/// Параметры подключения и пула.
#[derive(Debug, Clone)]
pub struct TcpOptions {
    pub host: String,
    pub port: u16,
    /// Верхняя граница одновременно выданных соединений.
    pub max_size: usize,
    pub connect_timeout: Duration,
    /// Ожидание ответа на запрос. На ожидание сообщений подписки не
    /// распространяется.
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    /// Ожидание свободного места в пуле.
    pub acquire_timeout: Duration,
}

impl TcpOptions {
    pub fn new(
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::from(&BrokerSettings::default())
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl From<&BrokerSettings> for TcpOptions {
    fn from(settings: &BrokerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            max_size: settings.pool_size,
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            read_timeout: Duration::from_millis(settings.read_timeout_ms),
            write_timeout: Duration::from_millis(settings.write_timeout_ms),
            acquire_timeout: Duration::from_millis(settings.acquire_timeout_ms),
        }
    }
}
