//! Реестр слушателей: тег варианта → упорядоченный список колбэков.
//!
//! Регистрация и удаление допустимы в любой момент из любого потока,
//! в том числе из самого колбэка: доставка идёт по снимку списка.

use std::{
    any::Any,
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use dashmap::DashMap;
use tracing::{error, trace};

use crate::codec::{Decoded, Message};

/// Идентификатор регистрации, нужен для удаления слушателя.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// Возвращает `true`, если значение подошло по типу и колбэк вызван.
type Callback = Arc<dyn Fn(&Decoded) -> bool + Send + Sync>;

#[derive(Clone)]
struct ListenerEntry {
    id: ListenerId,
    callback: Callback,
}

/// Итог доставки одного сообщения.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostOutcome {
    /// Слушатели, отработавшие без паники.
    pub delivered: usize,
    pub panicked: usize,
}

#[derive(Default)]
pub struct ListenerRegistry {
    by_tag: DashMap<&'static str, Vec<ListenerEntry>>,
    index: DashMap<ListenerId, &'static str>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Регистрирует колбэк для варианта `M`.
    pub fn register<M, F>(
        &self,
        listener: F,
    ) -> ListenerId
    where
        M: Message,
        F: Fn(&M) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let callback: Callback = Arc::new(move |decoded: &Decoded| {
            match decoded.downcast_ref::<M>() {
                Some(message) => {
                    listener(message);
                    true
                }
                None => false,
            }
        });

        self.by_tag
            .entry(M::TAG)
            .or_default()
            .push(ListenerEntry { id, callback });
        self.index.insert(id, M::TAG);
        trace!(tag = M::TAG, %id, "listener registered");
        id
    }

    /// Удаляет слушателя. `false`, если такого нет.
    pub fn unregister(
        &self,
        id: ListenerId,
    ) -> bool {
        let Some((_, tag)) = self.index.remove(&id) else {
            return false;
        };
        if let Some(mut listeners) = self.by_tag.get_mut(tag) {
            listeners.retain(|entry| entry.id != id);
        }
        self.by_tag.remove_if(tag, |_, listeners| listeners.is_empty());
        trace!(tag, %id, "listener removed");
        true
    }

    pub fn count_for<M: Message>(&self) -> usize {
        self.by_tag.get(M::TAG).map(|l| l.len()).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn clear(&self) {
        self.by_tag.clear();
        self.index.clear();
    }

    /// Доставляет значение всем слушателям его варианта в порядке
    /// регистрации.
    ///
    /// Паника слушателя перехватывается и пишется в лог; остальные
    /// слушатели всё равно получают значение.
    pub fn post(
        &self,
        decoded: &Decoded,
    ) -> PostOutcome {
        let snapshot = match self.by_tag.get(decoded.tag()) {
            Some(listeners) => listeners.value().clone(),
            None => return PostOutcome::default(),
        };

        let mut outcome = PostOutcome::default();
        for entry in snapshot {
            match catch_unwind(AssertUnwindSafe(|| (entry.callback)(decoded))) {
                Ok(true) => outcome.delivered += 1,
                Ok(false) => {}
                Err(panic) => {
                    outcome.panicked += 1;
                    error!(
                        tag = decoded.tag(),
                        listener = %entry.id,
                        panic = panic_message(&*panic),
                        "listener panicked"
                    );
                }
            }
        }
        outcome
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic payload>"
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .field("tags", &self.by_tag.len())
            .finish()
    }
}
