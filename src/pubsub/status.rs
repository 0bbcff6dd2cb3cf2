use std::{
    fmt,
    pin::pin,
    sync::atomic::{AtomicU64, AtomicU8, Ordering},
};

use tokio::sync::Notify;

/// Состояние цикла подписки.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LoopState {
    /// Получение соединения и подписка.
    Starting = 0,
    /// Сессия жива, сообщения маршрутизируются.
    Active = 1,
    /// Сессия сломалась, идёт очистка.
    Failing = 2,
    /// Ожидание перед перезапуском.
    Backoff = 3,
    /// Цикл остановлен и больше не перезапустится.
    Terminated = 4,
}

impl LoopState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Starting,
            1 => Self::Active,
            2 => Self::Failing,
            3 => Self::Backoff,
            _ => Self::Terminated,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Failing => "failing",
            Self::Backoff => "backoff",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for LoopState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Общее, безблокировочное состояние цикла подписки.
#[derive(Debug)]
pub struct LoopStatus {
    state: AtomicU8,
    sessions_started: AtomicU64,
    restarts: AtomicU64,
    messages_routed: AtomicU64,
    decode_failures: AtomicU64,
    changed: Notify,
}

/// Снимок [`LoopStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopStatusSnapshot {
    pub state: LoopState,
    /// Сколько раз сессия доходила до Active.
    pub sessions_started: u64,
    /// Сколько раз цикл уходил на перезапуск после сбоя.
    pub restarts: u64,
    pub messages_routed: u64,
    pub decode_failures: u64,
}

impl Default for LoopStatus {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(LoopState::Starting as u8),
            sessions_started: AtomicU64::new(0),
            restarts: AtomicU64::new(0),
            messages_routed: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            changed: Notify::new(),
        }
    }
}

impl LoopStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LoopState {
        LoopState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Меняет состояние. Из `Terminated` выхода нет.
    pub(crate) fn set_state(
        &self,
        next: LoopState,
    ) {
        let result = self
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current != LoopState::Terminated as u8).then_some(next as u8)
            });
        if result.is_ok() {
            if next == LoopState::Active {
                self.sessions_started.fetch_add(1, Ordering::SeqCst);
            }
            self.changed.notify_waiters();
        }
    }

    pub(crate) fn record_restart(&self) {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        self.changed.notify_waiters();
    }

    pub(crate) fn record_routed(&self) {
        self.messages_routed.fetch_add(1, Ordering::Relaxed);
        self.changed.notify_waiters();
    }

    pub(crate) fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
        self.changed.notify_waiters();
    }

    pub fn snapshot(&self) -> LoopStatusSnapshot {
        LoopStatusSnapshot {
            state: self.state(),
            sessions_started: self.sessions_started.load(Ordering::SeqCst),
            restarts: self.restarts.load(Ordering::SeqCst),
            messages_routed: self.messages_routed.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
        }
    }

    /// Ждёт, пока снимок не удовлетворит условию.
    pub async fn wait_until<F>(
        &self,
        mut predicate: F,
    ) -> LoopStatusSnapshot
    where
        F: FnMut(&LoopStatusSnapshot) -> bool,
    {
        loop {
            let mut changed = pin!(self.changed.notified());
            changed.as_mut().enable();
            let snapshot = self.snapshot();
            if predicate(&snapshot) {
                return snapshot;
            }
            changed.await;
        }
    }

    /// Ждёт, пока сессия не станет активной. Возвращает `false`, если цикл
    /// завершился раньше.
    pub async fn wait_for_active(&self) -> bool {
        let snapshot = self
            .wait_until(|s| matches!(s.state, LoopState::Active | LoopState::Terminated))
            .await;
        snapshot.state == LoopState::Active
    }
}
