//! Внутрипроцессный брокер.
//!
//! Рассылка через `tokio::sync::broadcast`, по одному `Sender` на канал.
//! Подходит для развёртывания в одном процессе и для тестов: умеет
//! обрывать живые сессии и имитировать недоступность брокера.

use std::{
    pin::pin,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use chanbus_error::BrokerError;
use dashmap::DashMap;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, warn};

use super::{BrokerConnection, BrokerResult, ChannelMessage, ConnectionPool};

type ChannelKey = Arc<str>;

/// Ёмкость буфера каждого канала по умолчанию.
pub const DEFAULT_CAPACITY: usize = 1024;

pub struct MemoryBroker {
    /// Канал → `Sender`
    channels: DashMap<ChannelKey, broadcast::Sender<Arc<str>>>,
    capacity: usize,
    available: AtomicBool,
    fail_unsubscribe: AtomicBool,
    /// Номер «поколения» сессий; растёт при каждом обрыве.
    epoch: AtomicU64,
    severed: Notify,
    /// Общее количество публикаций
    publish_count: AtomicU64,
    /// Публикации, которые никто не получил
    send_error_count: AtomicU64,
    leases: AtomicUsize,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl MemoryBroker {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
            available: AtomicBool::new(true),
            fail_unsubscribe: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            severed: Notify::new(),
            publish_count: AtomicU64::new(0),
            send_error_count: AtomicU64::new(0),
            leases: AtomicUsize::new(0),
        }
    }

    /// Пул соединений поверх этого брокера.
    pub fn pool(self: &Arc<Self>) -> MemoryPool {
        MemoryPool::new(self.clone())
    }

    /// Публикует сообщение и возвращает число получателей.
    ///
    /// Если у канала не осталось подписчиков, он удаляется.
    pub fn publish(
        &self,
        channel: &str,
        payload: &str,
    ) -> u64 {
        self.publish_count.fetch_add(1, Ordering::Relaxed);

        let Some(entry) = self.channels.get(channel) else {
            self.send_error_count.fetch_add(1, Ordering::Relaxed);
            return 0;
        };
        let tx = entry.value().clone();
        drop(entry);

        match tx.send(Arc::from(payload)) {
            Ok(receivers) => receivers as u64,
            Err(_) => {
                self.send_error_count.fetch_add(1, Ordering::Relaxed);
                self.channels
                    .remove_if(channel, |_, tx| tx.receiver_count() == 0);
                0
            }
        }
    }

    fn subscribe(
        &self,
        channel: &str,
    ) -> broadcast::Receiver<Arc<str>> {
        self.channels
            .entry(Arc::from(channel))
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Обрывает все живые сессии подписки: каждая получит
    /// `ConnectionLost` из `next_message`.
    pub fn sever_sessions(&self) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.severed.notify_waiters();
        debug!(epoch, "memory broker severed all sessions");
    }

    /// Закрывает канал: сессии на нём увидят штатное закрытие (`Ok(None)`).
    pub fn close_channel(
        &self,
        channel: &str,
    ) {
        self.channels.remove(channel);
    }

    /// Включает или выключает брокер. Выключение обрывает живые сессии, а
    /// новые `acquire`, `publish` и `subscribe` завершаются ошибкой.
    pub fn set_available(
        &self,
        available: bool,
    ) {
        let was = self.available.swap(available, Ordering::SeqCst);
        if was && !available {
            warn!("memory broker is now unavailable");
            self.sever_sessions();
        } else if !was && available {
            debug!("memory broker is available again");
        }
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Заставляет `unsubscribe` завершаться ошибкой.
    pub fn set_fail_unsubscribe(
        &self,
        fail: bool,
    ) {
        self.fail_unsubscribe.store(fail, Ordering::SeqCst);
    }

    pub fn subscriber_count(
        &self,
        channel: &str,
    ) -> usize {
        self.channels
            .get(channel)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    pub fn publish_count(&self) -> u64 {
        self.publish_count.load(Ordering::Relaxed)
    }

    pub fn send_error_count(&self) -> u64 {
        self.send_error_count.load(Ordering::Relaxed)
    }

    /// Число соединений, выданных и ещё не возвращённых.
    pub fn leased(&self) -> usize {
        self.leases.load(Ordering::SeqCst)
    }

    fn ensure_available(&self) -> BrokerResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(BrokerError::Unavailable)
        }
    }
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("MemoryBroker")
            .field("channels", &self.channels.len())
            .field("available", &self.is_available())
            .field("leased", &self.leased())
            .finish()
    }
}

/// Пул соединений [`MemoryBroker`].
#[derive(Debug, Clone)]
pub struct MemoryPool {
    broker: Arc<MemoryBroker>,
}

impl MemoryPool {
    pub fn new(broker: Arc<MemoryBroker>) -> Self {
        Self { broker }
    }

    pub fn broker(&self) -> &Arc<MemoryBroker> {
        &self.broker
    }
}

#[async_trait]
impl ConnectionPool for MemoryPool {
    type Connection = MemoryConnection;

    async fn acquire(&self) -> BrokerResult<MemoryConnection> {
        self.broker.ensure_available()?;
        self.broker.leases.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryConnection {
            broker: self.broker.clone(),
            session: None,
        })
    }
}

struct Session {
    channel: ChannelKey,
    rx: broadcast::Receiver<Arc<str>>,
    epoch: u64,
}

/// Соединение с [`MemoryBroker`]; освобождает аренду при drop.
pub struct MemoryConnection {
    broker: Arc<MemoryBroker>,
    session: Option<Session>,
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    async fn publish(
        &mut self,
        channel: &str,
        payload: &str,
    ) -> BrokerResult<u64> {
        if !self.broker.is_available() {
            return Err(BrokerError::lost("broker went away"));
        }
        if self.session.is_some() {
            return Err(BrokerError::protocol("PUBLISH on a connection in subscriber mode"));
        }
        Ok(self.broker.publish(channel, payload))
    }

    async fn subscribe(
        &mut self,
        channel: &str,
    ) -> BrokerResult<()> {
        self.broker.ensure_available()?;
        self.session = Some(Session {
            channel: Arc::from(channel),
            rx: self.broker.subscribe(channel),
            epoch: self.broker.epoch.load(Ordering::SeqCst),
        });
        Ok(())
    }

    async fn next_message(&mut self) -> BrokerResult<Option<ChannelMessage>> {
        let broker = self.broker.clone();
        let Some(session) = self.session.as_mut() else {
            return Err(BrokerError::protocol("connection is not subscribed"));
        };

        loop {
            // Подписываемся на уведомление до проверки эпохи, чтобы не
            // пропустить обрыв между проверкой и ожиданием.
            let mut severed = pin!(broker.severed.notified());
            severed.as_mut().enable();
            if broker.epoch.load(Ordering::SeqCst) != session.epoch {
                return Err(BrokerError::lost("session severed by broker"));
            }

            tokio::select! {
                _ = severed => continue,
                received = session.rx.recv() => match received {
                    Ok(payload) => {
                        return Ok(Some(ChannelMessage::new(&*session.channel, &*payload)));
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(channel = %session.channel, skipped, "subscriber lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(None),
                },
            }
        }
    }

    async fn unsubscribe(
        &mut self,
        channel: &str,
    ) -> BrokerResult<()> {
        if self.broker.fail_unsubscribe.load(Ordering::SeqCst) {
            return Err(BrokerError::Server {
                message: "ERR unsubscribe refused".to_string(),
            });
        }
        if self
            .session
            .as_ref()
            .is_some_and(|session| &*session.channel == channel)
        {
            self.session = None;
        }
        Ok(())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.broker.leases.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    async fn subscribed(
        pool: &MemoryPool,
        channel: &str,
    ) -> MemoryConnection {
        let mut conn = pool.acquire().await.unwrap();
        conn.subscribe(channel).await.unwrap();
        conn
    }

    #[tokio::test]
    async fn test_publish_fan_out() {
        let broker = Arc::new(MemoryBroker::default());
        let pool = broker.pool();
        let mut a = subscribed(&pool, "ticks").await;
        let mut b = subscribed(&pool, "ticks").await;

        let mut publisher = pool.acquire().await.unwrap();
        assert_eq!(publisher.publish("ticks", "hello").await.unwrap(), 2);

        for conn in [&mut a, &mut b] {
            let msg = timeout(Duration::from_millis(100), conn.next_message())
                .await
                .expect("timed out")
                .unwrap()
                .unwrap();
            assert_eq!(msg, ChannelMessage::new("ticks", "hello"));
        }
        assert_eq!(broker.publish_count(), 1);
        assert_eq!(broker.send_error_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let broker = Arc::new(MemoryBroker::default());
        assert_eq!(broker.publish("nobody", "x"), 0);
        assert_eq!(broker.send_error_count(), 1);

        {
            let _gone = subscribed(&broker.pool(), "temp").await;
        }
        assert_eq!(broker.publish("temp", "x"), 0);
        assert_eq!(broker.subscriber_count("temp"), 0);
        assert!(!broker.channels.contains_key("temp"));
    }

    /// Тест проверяет, что обрыв будит ожидающего подписчика.
    #[tokio::test]
    async fn test_sever_wakes_blocked_session() {
        let broker = Arc::new(MemoryBroker::default());
        let mut conn = subscribed(&broker.pool(), "ticks").await;

        let waiter = tokio::spawn(async move { conn.next_message().await });
        tokio::task::yield_now().await;
        broker.sever_sessions();

        let result = timeout(Duration::from_millis(200), waiter)
            .await
            .expect("session was not woken")
            .unwrap();
        assert!(matches!(result, Err(BrokerError::ConnectionLost { .. })));
    }

    /// Тест проверяет обрыв сессии, которая в момент обрыва не ждала.
    #[tokio::test]
    async fn test_sever_before_wait() {
        let broker = Arc::new(MemoryBroker::default());
        let mut conn = subscribed(&broker.pool(), "ticks").await;
        broker.sever_sessions();
        assert!(conn.next_message().await.is_err());

        // Новая сессия после обрыва работает.
        let mut fresh = subscribed(&broker.pool(), "ticks").await;
        broker.publish("ticks", "after");
        let msg = fresh.next_message().await.unwrap().unwrap();
        assert_eq!(msg.payload, "after");
    }

    #[tokio::test]
    async fn test_outage() {
        let broker = Arc::new(MemoryBroker::default());
        let pool = broker.pool();
        broker.set_available(false);
        assert!(matches!(pool.acquire().await, Err(BrokerError::Unavailable)));

        broker.set_available(true);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_close_channel_ends_session() {
        let broker = Arc::new(MemoryBroker::default());
        let mut conn = subscribed(&broker.pool(), "ticks").await;
        broker.close_channel("ticks");
        assert_eq!(conn.next_message().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_leases_are_counted() {
        let broker = Arc::new(MemoryBroker::default());
        let pool = broker.pool();
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        assert_eq!(broker.leased(), 2);
        drop(a);
        drop(b);
        assert_eq!(broker.leased(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_failure_injection() {
        let broker = Arc::new(MemoryBroker::default());
        let mut conn = subscribed(&broker.pool(), "ticks").await;
        broker.set_fail_unsubscribe(true);
        assert!(matches!(
            conn.unsubscribe("ticks").await,
            Err(BrokerError::Server { .. })
        ));
        broker.set_fail_unsubscribe(false);
        conn.unsubscribe("ticks").await.unwrap();
        assert!(conn.next_message().await.is_err());
    }
}
