//! Цикл подписки.
//!
//! Держит ровно одну живую сессию подписки на канал шины и перезапускает
//! её после любого сбоя, без ограничения числа попыток:
//!
//! ```text
//! Starting ──▶ Active ──▶ Failing ──▶ (Backoff) ──▶ Starting ...
//!     └──────────┴───────────┴────────────┴──▶ Terminated (остановка)
//! ```
//!
//! Сообщения, пришедшие между сбоем и следующей активной сессией,
//! теряются: буферизации и повторной доставки нет.

use std::{sync::Arc, time::Duration};

use chanbus_error::SubscriptionError;
use tokio::{select, task::JoinHandle, time};
use tracing::{debug, info, info_span, trace, warn, Instrument};

use super::{
    backoff::RestartPolicy,
    router::DispatchRouter,
    shutdown::ShutdownSignal,
    status::{LoopState, LoopStatus},
    Channel,
};
use crate::broker::{BrokerConnection, ChannelMessage, ConnectionPool};

/// Сколько ждать `UNSUBSCRIBE` при разборе сессии.
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Чем закончилась одна сессия.
enum SessionEnd<C> {
    Shutdown(Option<C>),
    Failed {
        error: SubscriptionError,
        conn: Option<C>,
        was_active: bool,
    },
}

pub struct SubscriptionLoop<P: ConnectionPool> {
    pool: Arc<P>,
    channel: Channel,
    router: DispatchRouter,
    shutdown: ShutdownSignal,
    status: Arc<LoopStatus>,
    policy: RestartPolicy,
}

impl<P: ConnectionPool> SubscriptionLoop<P> {
    pub fn new(
        pool: Arc<P>,
        channel: Channel,
        router: DispatchRouter,
        shutdown: ShutdownSignal,
        status: Arc<LoopStatus>,
        policy: RestartPolicy,
    ) -> Self {
        Self {
            pool,
            channel,
            router,
            shutdown,
            status,
            policy,
        }
    }

    /// Запускает цикл в отдельной задаче tokio.
    pub fn spawn(self) -> JoinHandle<()> {
        let span = info_span!("subscription", channel = %self.channel);
        tokio::spawn(self.run().instrument(span))
    }

    /// Крутит сессии до сигнала остановки.
    pub async fn run(self) {
        info!(policy = ?self.policy, "subscription loop started");
        let mut attempt: u32 = 0;

        loop {
            if self.shutdown.is_triggered() {
                break;
            }
            self.status.set_state(LoopState::Starting);

            match self.run_session().await {
                SessionEnd::Shutdown(conn) => {
                    self.teardown(conn).await;
                    break;
                }
                SessionEnd::Failed {
                    error,
                    conn,
                    was_active,
                } => {
                    if was_active {
                        attempt = 0;
                    }
                    self.status.set_state(LoopState::Failing);
                    warn!(attempt, error = %error, "subscription session failed, restarting");
                    self.teardown(conn).await;
                    self.status.record_restart();

                    if !self.pause(attempt).await {
                        break;
                    }
                    attempt = attempt.saturating_add(1);
                }
            }
        }

        self.status.set_state(LoopState::Terminated);
        info!("subscription loop terminated");
    }

    /// Одна сессия: соединение, подписка, приём сообщений.
    async fn run_session(&self) -> SessionEnd<P::Connection> {
        let channel = self.channel.as_str();

        let acquired = select! {
            biased;
            _ = self.shutdown.wait() => return SessionEnd::Shutdown(None),
            acquired = self.pool.acquire() => acquired,
        };
        let mut conn = match acquired {
            Ok(conn) => conn,
            Err(e) => {
                return SessionEnd::Failed {
                    error: SubscriptionError::Acquire {
                        channel: channel.to_string(),
                        reason: e.to_string(),
                    },
                    conn: None,
                    was_active: false,
                }
            }
        };

        let subscribed = select! {
            biased;
            _ = self.shutdown.wait() => None,
            subscribed = conn.subscribe(channel) => Some(subscribed),
        };
        let Some(subscribed) = subscribed else {
            return SessionEnd::Shutdown(Some(conn));
        };
        if let Err(e) = subscribed {
            return SessionEnd::Failed {
                error: SubscriptionError::Subscribe {
                    channel: channel.to_string(),
                    reason: e.to_string(),
                },
                conn: Some(conn),
                was_active: false,
            };
        }

        self.status.set_state(LoopState::Active);
        info!("subscription active");

        loop {
            let next = select! {
                biased;
                _ = self.shutdown.wait() => None,
                next = conn.next_message() => Some(next),
            };
            let Some(next) = next else {
                return SessionEnd::Shutdown(Some(conn));
            };

            let error = match next {
                Ok(Some(message)) => {
                    self.deliver(message);
                    continue;
                }
                Ok(None) => SubscriptionError::SessionClosed {
                    channel: channel.to_string(),
                },
                Err(e) => SubscriptionError::Session {
                    channel: channel.to_string(),
                    reason: e.to_string(),
                },
            };
            return SessionEnd::Failed {
                error,
                conn: Some(conn),
                was_active: true,
            };
        }
    }

    fn deliver(
        &self,
        message: ChannelMessage,
    ) {
        if message.channel != self.channel.as_str() {
            trace!(from = %message.channel, "ignoring message from another channel");
            return;
        }
        // После сигнала остановки новые сообщения не маршрутизируются.
        if self.shutdown.is_triggered() {
            return;
        }

        match self.router.route(&message.payload) {
            Ok(_) => self.status.record_routed(),
            Err(_) => self.status.record_decode_failure(),
        }
    }

    /// Отписка и освобождение соединения. Ошибки только пишутся в лог.
    async fn teardown(
        &self,
        conn: Option<P::Connection>,
    ) {
        let Some(mut conn) = conn else {
            return;
        };
        let channel = self.channel.as_str();

        match time::timeout(TEARDOWN_TIMEOUT, conn.unsubscribe(channel)).await {
            Ok(Ok(())) => debug!("unsubscribed"),
            Ok(Err(e)) => warn!(error = %e, "unsubscribe failed during teardown"),
            Err(_) => warn!("unsubscribe timed out during teardown"),
        }
    }

    /// Пауза перед следующей попыткой. `false`, если за это время пришёл
    /// сигнал остановки.
    async fn pause(
        &self,
        attempt: u32,
    ) -> bool {
        match self.policy.delay(attempt) {
            None => {
                tokio::task::yield_now().await;
                !self.shutdown.is_triggered()
            }
            Some(delay) => {
                self.status.set_state(LoopState::Backoff);
                debug!(attempt, ?delay, "waiting before restart");
                select! {
                    biased;
                    _ = self.shutdown.wait() => false,
                    _ = time::sleep(delay) => true,
                }
            }
        }
    }
}
