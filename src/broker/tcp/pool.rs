use std::sync::Arc;

use async_trait::async_trait;
use chanbus_error::BrokerError;
use parking_lot::Mutex;
use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore},
    time::timeout,
};
use tracing::{debug, trace};

use super::{RespConnection, TcpOptions};
use crate::broker::{BrokerConnection, BrokerResult, ChannelMessage, ConnectionPool};

/// Пул TCP-соединений с брокером.
///
/// Число одновременно выданных соединений ограничено `max_size`.
/// Возвращённые пригодные соединения складываются в список простаивающих
/// и переиспользуются; устаревшие отбрасываются при выдаче.
#[derive(Clone)]
pub struct TcpPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    options: TcpOptions,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<RespConnection>>,
}

impl TcpPool {
    pub fn new(options: TcpOptions) -> Self {
        let permits = Arc::new(Semaphore::new(options.max_size.max(1)));
        Self {
            inner: Arc::new(PoolInner {
                options,
                permits,
                idle: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn options(&self) -> &TcpOptions {
        &self.inner.options
    }

    /// Число простаивающих соединений.
    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().len()
    }

    /// Сколько соединений ещё можно выдать без ожидания.
    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }

    /// Закрывает пул: новые `acquire` завершаются `Unavailable`,
    /// простаивающие соединения закрываются.
    pub fn close(&self) {
        self.inner.permits.close();
        self.inner.idle.lock().clear();
    }

    fn take_idle(&self) -> Option<RespConnection> {
        let mut idle = self.inner.idle.lock();
        while let Some(conn) = idle.pop() {
            if conn.is_stale() {
                debug!(addr = %conn.address(), "dropping stale idle connection");
                continue;
            }
            return Some(conn);
        }
        None
    }
}

#[async_trait]
impl ConnectionPool for TcpPool {
    type Connection = PooledConnection;

    async fn acquire(&self) -> BrokerResult<PooledConnection> {
        let permit = timeout(
            self.inner.options.acquire_timeout,
            self.inner.permits.clone().acquire_owned(),
        )
        .await
        .map_err(|_| BrokerError::PoolTimeout)?
        .map_err(|_| BrokerError::Unavailable)?;

        let conn = match self.take_idle() {
            Some(conn) => {
                trace!(addr = %conn.address(), "reusing idle connection");
                conn
            }
            None => RespConnection::connect(&self.inner.options).await?,
        };

        Ok(PooledConnection {
            conn: Some(conn),
            pool: self.inner.clone(),
            _permit: permit,
        })
    }
}

impl std::fmt::Debug for TcpPool {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("TcpPool")
            .field("address", &self.inner.options.address())
            .field("max_size", &self.inner.options.max_size)
            .field("idle", &self.idle_count())
            .finish()
    }
}

/// Аренда соединения из [`TcpPool`].
///
/// При drop соединение возвращается в пул, если оно пригодно, иначе
/// закрывается. Место в пуле освобождается в любом случае.
pub struct PooledConnection {
    conn: Option<RespConnection>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("open", &self.conn.is_some())
            .finish_non_exhaustive()
    }
}

impl PooledConnection {
    fn conn(&mut self) -> BrokerResult<&mut RespConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| BrokerError::lost("connection already released"))
    }
}

#[async_trait]
impl BrokerConnection for PooledConnection {
    async fn publish(
        &mut self,
        channel: &str,
        payload: &str,
    ) -> BrokerResult<u64> {
        self.conn()?.publish(channel, payload).await
    }

    async fn subscribe(
        &mut self,
        channel: &str,
    ) -> BrokerResult<()> {
        self.conn()?.subscribe(channel).await
    }

    async fn next_message(&mut self) -> BrokerResult<Option<ChannelMessage>> {
        self.conn()?.next_message().await
    }

    async fn unsubscribe(
        &mut self,
        channel: &str,
    ) -> BrokerResult<()> {
        self.conn()?.unsubscribe(channel).await
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if conn.is_reusable() && !self.pool.permits.is_closed() {
            trace!(addr = %conn.address(), "returning connection to pool");
            self.pool.idle.lock().push(conn);
        } else {
            debug!(
                addr = %conn.address(),
                subscribed = conn.is_subscribed(),
                "closing released connection"
            );
        }
    }
}
