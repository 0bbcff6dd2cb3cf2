use std::{
    any::{Any, TypeId},
    fmt,
};

use chanbus_error::{bail, BusResult, StatusCode};
use dashmap::DashMap;
use tracing::debug;

use super::{envelope::Incoming, Message};

/// Функция второго этапа декодирования для одного варианта.
pub type DecodeFn = fn(&str) -> Result<Decoded, serde_json::Error>;

/// Декодированное сообщение со стёртым типом.
///
/// Конкретный вариант восстанавливается через [`Decoded::downcast_ref`] или
/// [`Decoded::downcast`].
pub struct Decoded {
    tag: &'static str,
    value: Box<dyn ErasedMessage>,
}

trait ErasedMessage: Any + fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync>;
}

impl<M: Message> ErasedMessage for M {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync> {
        self
    }
}

impl Decoded {
    pub fn new<M: Message>(message: M) -> Self {
        Self {
            tag: M::TAG,
            value: Box::new(message),
        }
    }

    pub fn tag(&self) -> &'static str {
        self.tag
    }

    pub fn is<M: Message>(&self) -> bool {
        self.value.as_any().is::<M>()
    }

    pub fn downcast_ref<M: Message>(&self) -> Option<&M> {
        self.value.as_any().downcast_ref::<M>()
    }

    /// Забирает значение конкретного типа; при несовпадении возвращает
    /// исходный `Decoded`.
    pub fn downcast<M: Message>(self) -> Result<M, Self> {
        if !self.is::<M>() {
            return Err(self);
        }
        match self.value.into_any().downcast::<M>() {
            Ok(boxed) => Ok(*boxed),
            Err(_) => unreachable!("variant checked by is::<M>()"),
        }
    }
}

impl fmt::Debug for Decoded {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Decoded")
            .field("tag", &self.tag)
            .field("value", &self.value)
            .finish()
    }
}

#[derive(Clone, Copy)]
struct VariantEntry {
    type_id: TypeId,
    type_name: &'static str,
    decode: DecodeFn,
}

/// Реестр вариантов: тег → функция декодирования.
///
/// Заполняется при старте для всех известных вариантов и может
/// дополняться позже (например, при регистрации слушателя нового типа).
#[derive(Default)]
pub struct VariantRegistry {
    entries: DashMap<&'static str, VariantEntry>,
}

fn decode_variant<M: Message>(text: &str) -> Result<Decoded, serde_json::Error> {
    let envelope: Incoming<M> = serde_json::from_str(text)?;
    Ok(Decoded::new(envelope.data))
}

impl VariantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Регистрирует вариант `M`.
    ///
    /// Повторная регистрация того же типа: no-op (`Ok(false)`). Попытка
    /// занять уже существующий тег другим типом: ошибка.
    pub fn register<M: Message>(&self) -> BusResult<bool> {
        let entry = VariantEntry {
            type_id: TypeId::of::<M>(),
            type_name: std::any::type_name::<M>(),
            decode: decode_variant::<M>,
        };

        match self.entries.entry(M::TAG) {
            dashmap::Entry::Occupied(existing) => {
                let existing = *existing.get();
                if existing.type_id != entry.type_id {
                    bail!(
                        StatusCode::InvalidArgs,
                        "tag '{}' is already registered for {}, cannot reuse it for {}",
                        M::TAG,
                        existing.type_name,
                        entry.type_name
                    );
                }
                Ok(false)
            }
            dashmap::Entry::Vacant(slot) => {
                slot.insert(entry);
                debug!(tag = M::TAG, type_name = entry.type_name, "variant registered");
                Ok(true)
            }
        }
    }

    pub fn resolve(
        &self,
        tag: &str,
    ) -> Option<DecodeFn> {
        self.entries.get(tag).map(|entry| entry.decode)
    }

    pub fn contains(
        &self,
        tag: &str,
    ) -> bool {
        self.entries.contains_key(tag)
    }

    pub fn tags(&self) -> Vec<&'static str> {
        let mut tags: Vec<_> = self.entries.iter().map(|e| *e.key()).collect();
        tags.sort_unstable();
        tags
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for VariantRegistry {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("VariantRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}
