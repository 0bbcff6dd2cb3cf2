//! Типизированный pub/sub поверх одного канала брокера.
//!
//! - `channel`: имя канала, к которому привязана шина.
//! - `publisher`: отправка сообщений в канал.
//! - `subscription`: фоновый цикл подписки с перезапуском после сбоев.
//! - `router`: декодирование входящих конвертов и раздача слушателям.
//! - `listeners`: реестр колбэков по вариантам сообщений.
//! - `backoff`, `shutdown`, `status`: политика перезапуска, сигнал
//!   остановки и наблюдаемое состояние цикла.

pub mod backoff;
mod channel;
pub mod listeners;
pub mod publisher;
pub mod router;
pub mod shutdown;
pub mod status;
pub mod subscription;

pub use backoff::{RestartBackoff, RestartPolicy};
pub use channel::Channel;
pub use listeners::{ListenerId, ListenerRegistry, PostOutcome};
pub use publisher::ChannelPublisher;
pub use router::DispatchRouter;
pub use shutdown::ShutdownSignal;
pub use status::{LoopState, LoopStatus, LoopStatusSnapshot};
pub use subscription::SubscriptionLoop;
