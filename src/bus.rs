//! Шина: публикация и подписка на один канал брокера.
//!
//! `ChannelBus` связывает публикатора, цикл подписки и реестр слушателей
//! вокруг одного пула соединений. Пул передаётся снаружи и делится между
//! публикацией и подпиской.

use std::{fmt, sync::Arc};

use chanbus_error::{BusResult, ConfigError, GenericError, StackError, StatusCode};
use parking_lot::Mutex;
use tokio::{runtime::Handle, task::JoinHandle};
use tracing::{debug, error, info};

use crate::{
    broker::{ConnectionPool, TcpOptions, TcpPool},
    codec::{EnvelopeCodec, Message},
    config::Settings,
    pubsub::{
        Channel, ChannelPublisher, DispatchRouter, ListenerId, ListenerRegistry, LoopStatus,
        LoopStatusSnapshot, RestartBackoff, RestartPolicy, ShutdownSignal, SubscriptionLoop,
    },
};

/// Типизированная шина поверх канала брокера.
///
/// Создаётся через [`BusBuilder`] или [`ChannelBus::connect`].
/// Сразу после создания в фоне работает цикл подписки; входящие сообщения
/// раздаются слушателям, зарегистрированным через [`ChannelBus::on`].
///
/// Остановка односторонняя: после [`ChannelBus::shutdown`] цикл подписки
/// завершается и больше не запускается. Drop шины тоже останавливает цикл.
pub struct ChannelBus<P: ConnectionPool> {
    channel: Channel,
    codec: Arc<EnvelopeCodec>,
    listeners: Arc<ListenerRegistry>,
    publisher: ChannelPublisher<P>,
    shutdown: ShutdownSignal,
    status: Arc<LoopStatus>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Построитель шины. Тип пула выбирается в [`BusBuilder::build`].
pub struct BusBuilder {
    channel: String,
    codec: EnvelopeCodec,
    policy: RestartPolicy,
    // Первая ошибка регистрации варианта, отдаётся из `build`.
    error: Option<StackError>,
}

impl BusBuilder {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            codec: EnvelopeCodec::new(),
            policy: RestartPolicy::default(),
            error: None,
        }
    }

    /// Канал и политика перезапуска из настроек.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let policy = RestartPolicy::from_settings(&settings.subscription)?;
        Ok(Self::new(settings.channel.as_str()).restart_policy(policy))
    }

    /// Заранее регистрирует вариант сообщения, чтобы входящие конверты
    /// этого типа декодировались ещё до появления слушателей.
    pub fn variant<M: Message>(mut self) -> Self {
        if self.error.is_none() {
            if let Err(e) = self.codec.register::<M>() {
                self.error = Some(e);
            }
        }
        self
    }

    pub fn restart_policy(
        mut self,
        policy: RestartPolicy,
    ) -> Self {
        self.policy = policy;
        self
    }

    pub fn restart_backoff(
        self,
        backoff: RestartBackoff,
    ) -> Self {
        self.restart_policy(RestartPolicy::Backoff(backoff))
    }

    /// Собирает шину и запускает цикл подписки.
    ///
    /// Вызывать нужно внутри runtime tokio.
    pub fn build<P: ConnectionPool>(
        self,
        pool: Arc<P>,
    ) -> BusResult<ChannelBus<P>> {
        if let Some(e) = self.error {
            return Err(e.context("register message variants"));
        }
        let channel = Channel::new(&self.channel)?;
        if let RestartPolicy::Backoff(backoff) = &self.policy {
            backoff.validate()?;
        }
        if Handle::try_current().is_err() {
            return Err(StackError::new(GenericError::new(
                StatusCode::Internal,
                "ChannelBus must be built inside a tokio runtime",
            )));
        }

        let codec = Arc::new(self.codec);
        let listeners = Arc::new(ListenerRegistry::new());
        let shutdown = ShutdownSignal::new();
        let status = Arc::new(LoopStatus::new());

        let publisher = ChannelPublisher::new(pool.clone(), channel.clone(), codec.clone());
        let router = DispatchRouter::new(codec.clone(), listeners.clone());
        let task = SubscriptionLoop::new(
            pool,
            channel.clone(),
            router,
            shutdown.clone(),
            status.clone(),
            self.policy,
        )
        .spawn();

        info!(channel = %channel, variants = ?codec.tags(), "bus started");

        Ok(ChannelBus {
            channel,
            codec,
            listeners,
            publisher,
            shutdown,
            status,
            task: Mutex::new(Some(task)),
        })
    }
}

impl ChannelBus<TcpPool> {
    /// Подключает шину к брокеру по настройкам.
    ///
    /// Пул TCP-соединений создаётся один раз и делится между публикацией
    /// и подпиской.
    pub fn connect(settings: &Settings) -> BusResult<Self> {
        settings.validate()?;
        let pool = TcpPool::new(TcpOptions::from(&settings.broker));
        BusBuilder::from_settings(settings)?.build(Arc::new(pool))
    }
}

impl<P: ConnectionPool> ChannelBus<P> {
    /// Публикует сообщение в канал шины. Возвращает число получателей,
    /// о котором сообщил брокер.
    ///
    /// Ошибка не повторяется внутри, её получает вызывающий.
    pub async fn publish<M: Message>(
        &self,
        message: &M,
    ) -> BusResult<u64> {
        self.publisher.publish(message).await
    }

    /// Регистрирует слушателя сообщений типа `M`.
    ///
    /// Вариант `M` заодно регистрируется в кодеке. Ошибка, если тег `M`
    /// уже занят другим типом.
    pub fn on<M, F>(
        &self,
        listener: F,
    ) -> BusResult<ListenerId>
    where
        M: Message,
        F: Fn(&M) + Send + Sync + 'static,
    {
        self.codec.register::<M>()?;
        let id = self.listeners.register::<M, F>(listener);
        debug!(channel = %self.channel, tag = M::TAG, %id, "listener added");
        Ok(id)
    }

    pub fn remove_listener(
        &self,
        id: ListenerId,
    ) -> bool {
        self.listeners.unregister(id)
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn status(&self) -> LoopStatusSnapshot {
        self.status.snapshot()
    }

    /// Общий объект состояния цикла, на нём можно ждать переходов.
    pub fn status_handle(&self) -> Arc<LoopStatus> {
        self.status.clone()
    }

    /// Ждёт активной сессии подписки. `false`, если шина уже остановлена.
    pub async fn wait_for_active(&self) -> bool {
        self.status.wait_for_active().await
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_triggered()
    }

    /// Сигнализирует остановку и сразу возвращается. Повторные вызовы
    /// ничего не делают.
    pub fn shutdown(&self) {
        if self.shutdown.trigger() {
            info!(channel = %self.channel, "bus shutdown requested");
        }
    }

    /// Останавливает шину и ждёт завершения цикла подписки.
    pub async fn shutdown_and_wait(&self) {
        self.shutdown();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(channel = %self.channel, error = %e, "subscription task failed");
            }
        }
    }
}

impl<P: ConnectionPool> Drop for ChannelBus<P> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<P: ConnectionPool> fmt::Debug for ChannelBus<P> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ChannelBus")
            .field("channel", &self.channel)
            .field("status", &self.status.snapshot())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use serde::{Deserialize, Serialize};
    use tokio::time::timeout;

    use super::*;
    use crate::{
        broker::{MemoryBroker, MemoryPool},
        pubsub::LoopState,
    };

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct PriceUpdate {
        symbol: String,
        price: i64,
    }

    impl Message for PriceUpdate {
        const TAG: &'static str = "PriceUpdate";
    }

    // Тот же тег, другой тип.
    #[derive(Debug, Serialize, Deserialize)]
    struct Impostor {
        value: u8,
    }

    impl Message for Impostor {
        const TAG: &'static str = "PriceUpdate";
    }

    fn bus(broker: &Arc<MemoryBroker>) -> ChannelBus<MemoryPool> {
        BusBuilder::new("ticks")
            .variant::<PriceUpdate>()
            .build(Arc::new(broker.pool()))
            .unwrap()
    }

    #[test]
    fn test_build_outside_runtime_fails() {
        let broker = Arc::new(MemoryBroker::default());
        let err = BusBuilder::new("ticks")
            .build(Arc::new(broker.pool()))
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::Internal);
    }

    #[tokio::test]
    async fn test_build_rejects_bad_input() {
        let broker = Arc::new(MemoryBroker::default());

        let err = BusBuilder::new("")
            .build(Arc::new(broker.pool()))
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::InvalidConfig);

        let err = BusBuilder::new("ticks")
            .variant::<PriceUpdate>()
            .variant::<Impostor>()
            .build(Arc::new(broker.pool()))
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::InvalidArgs);

        let err = BusBuilder::new("ticks")
            .restart_backoff(RestartBackoff {
                factor: 0.0,
                ..Default::default()
            })
            .build(Arc::new(broker.pool()))
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::InvalidConfig);
    }

    #[tokio::test]
    async fn test_on_registers_variant_and_listener() {
        let broker = Arc::new(MemoryBroker::default());
        let bus = BusBuilder::new("ticks")
            .build(Arc::new(broker.pool()))
            .unwrap();

        let id = bus.on::<PriceUpdate, _>(|_| {}).unwrap();
        assert_eq!(bus.listeners().count_for::<PriceUpdate>(), 1);
        assert!(bus.on::<Impostor, _>(|_| {}).is_err());

        assert!(bus.remove_listener(id));
        assert!(!bus.remove_listener(id));
        assert!(bus.listeners().is_empty());
        bus.shutdown_and_wait().await;
    }

    #[tokio::test]
    async fn test_publish_and_receive() {
        let broker = Arc::new(MemoryBroker::default());
        let bus = bus(&broker);
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        bus.on::<PriceUpdate, _>(move |m| {
            assert_eq!(m.symbol, "X");
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        assert!(timeout(Duration::from_secs(5), bus.wait_for_active())
            .await
            .unwrap());
        let receivers = bus
            .publish(&PriceUpdate {
                symbol: "X".into(),
                price: 10,
            })
            .await
            .unwrap();
        assert_eq!(receivers, 1);

        let status = bus.status_handle();
        timeout(
            Duration::from_secs(5),
            status.wait_until(|s| s.messages_routed == 1),
        )
        .await
        .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        bus.shutdown_and_wait().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let broker = Arc::new(MemoryBroker::default());
        let bus = bus(&broker);
        assert!(!bus.is_shutdown());

        bus.shutdown();
        bus.shutdown();
        assert!(bus.is_shutdown());

        timeout(Duration::from_secs(5), bus.shutdown_and_wait())
            .await
            .unwrap();
        timeout(Duration::from_secs(5), bus.shutdown_and_wait())
            .await
            .unwrap();
        assert_eq!(bus.status().state, LoopState::Terminated);
        assert_eq!(broker.leased(), 0);
    }

    #[tokio::test]
    async fn test_drop_stops_loop() {
        let broker = Arc::new(MemoryBroker::default());
        let bus = bus(&broker);
        let status = bus.status_handle();
        assert!(timeout(Duration::from_secs(5), status.wait_for_active())
            .await
            .unwrap());

        drop(bus);
        timeout(
            Duration::from_secs(5),
            status.wait_until(|s| s.state == LoopState::Terminated),
        )
        .await
        .unwrap();
    }

    /// Тест проверяет, что после остановки публикация по-прежнему
    /// доходит до брокера: остановка касается только подписки.
    #[tokio::test]
    async fn test_publish_after_shutdown() {
        let broker = Arc::new(MemoryBroker::default());
        let bus = bus(&broker);
        bus.shutdown_and_wait().await;

        let receivers = bus
            .publish(&PriceUpdate {
                symbol: "X".into(),
                price: 1,
            })
            .await
            .unwrap();
        assert_eq!(receivers, 0);
        assert_eq!(broker.publish_count(), 1);
    }
}
