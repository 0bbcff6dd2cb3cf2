//! Кодек конвертов.
//!
//! Превращает типизированное сообщение в самоописывающий JSON-конверт и
//! обратно. Конверт несёт тег конкретного варианта, поэтому разнородные
//! сообщения могут делить один канал:
//!
//! ```text
//! {"type":"PriceUpdate","data":{"symbol":"X","price":10}}
//! ```
//!
//! - `envelope` (приватный): формат конверта и двухэтапное декодирование.
//! - `registry`: таблица тег → функция декодирования и `Decoded`.
//! - `complex_keys`: serde-хелпер для словарей с нетекстовыми ключами.

pub mod complex_keys;
mod envelope;
pub mod registry;

use std::fmt;

use chanbus_error::{BusResult, DecodeError, EncodeError};
use serde::{de::DeserializeOwned, Serialize};

pub use registry::{Decoded, VariantRegistry};

/// Сообщение, которое можно передать через общий канал.
///
/// `TAG`: идентичность конкретного варианта. Он задаётся на уровне типа,
/// поэтому неизменен для любого значения и одинаково разрешается на
/// принимающей стороне. Теги должны быть уникальны в пределах одного канала.
///
/// Поля `Option` кодируются как `null` и не опускаются; для словарей с
/// нетекстовыми ключами используйте [`complex_keys`].
///
/// ```
/// use chanbus::Message;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// struct PriceUpdate {
///     symbol: String,
///     price: i64,
/// }
///
/// impl Message for PriceUpdate {
///     const TAG: &'static str = "PriceUpdate";
/// }
/// ```
pub trait Message: Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static {
    const TAG: &'static str;
}

/// Кодек конвертов с реестром известных вариантов.
#[derive(Debug, Default)]
pub struct EnvelopeCodec {
    registry: VariantRegistry,
}

impl EnvelopeCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Регистрирует вариант `M`. Возвращает `true`, если тег добавлен
    /// впервые.
    pub fn register<M: Message>(&self) -> BusResult<bool> {
        self.registry.register::<M>()
    }

    pub fn contains(
        &self,
        tag: &str,
    ) -> bool {
        self.registry.contains(tag)
    }

    /// Отсортированный список зарегистрированных тегов.
    pub fn tags(&self) -> Vec<&'static str> {
        self.registry.tags()
    }

    /// Кодирует сообщение в текст конверта.
    pub fn encode<M: Message>(
        &self,
        message: &M,
    ) -> Result<String, EncodeError> {
        envelope::encode(message)
    }

    /// Декодирует конверт в значение его конкретного варианта.
    ///
    /// Сначала читается только тег; затем тег разрешается через реестр и
    /// текст декодируется целиком по схеме варианта.
    pub fn decode(
        &self,
        text: &str,
    ) -> Result<Decoded, DecodeError> {
        let tag = envelope::read_tag(text)?;
        let decode = self
            .registry
            .resolve(&tag)
            .ok_or_else(|| DecodeError::unknown(tag.as_ref()))?;

        decode(text).map_err(|e| DecodeError::malformed(format!("{tag}: {e}")))
    }
}
