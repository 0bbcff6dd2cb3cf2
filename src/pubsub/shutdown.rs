use std::{
    pin::pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use tokio::sync::Notify;

/// Однонаправленный сигнал остановки.
///
/// Защёлкивается при первом `trigger` и больше не сбрасывается. `wait`
/// завершается сразу, если сигнал уже подан.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    fired: AtomicBool,
    notify: Notify,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Подаёт сигнал. Возвращает `true`, если это первый вызов.
    pub fn trigger(&self) -> bool {
        let first = !self.inner.fired.swap(true, Ordering::SeqCst);
        if first {
            self.inner.notify.notify_waiters();
        }
        first
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.fired.load(Ordering::SeqCst)
    }

    /// Ждёт сигнала.
    pub async fn wait(&self) {
        let mut notified = pin!(self.inner.notify.notified());
        // Регистрируемся до проверки флага, иначе `trigger` между проверкой
        // и ожиданием будет потерян.
        notified.as_mut().enable();
        if self.is_triggered() {
            return;
        }
        notified.await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    #[test]
    fn test_trigger_is_latched_and_idempotent() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_triggered());
        assert!(signal.trigger());
        assert!(!signal.trigger());
        assert!(signal.is_triggered());
        assert!(signal.clone().is_triggered());
    }

    #[tokio::test]
    async fn test_wait_after_trigger_returns_immediately() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        timeout(Duration::from_millis(50), signal.wait())
            .await
            .expect("wait must not block after trigger");
    }

    #[tokio::test]
    async fn test_wait_wakes_all_waiters() {
        let signal = ShutdownSignal::new();
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let signal = signal.clone();
                tokio::spawn(async move { signal.wait().await })
            })
            .collect();

        tokio::task::yield_now().await;
        signal.trigger();

        for waiter in waiters {
            timeout(Duration::from_millis(200), waiter)
                .await
                .expect("waiter not woken")
                .unwrap();
        }
    }
}
