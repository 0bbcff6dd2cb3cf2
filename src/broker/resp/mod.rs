//! RESP2: протокол Redis-совместимых брокеров.
//!
//! Достаточное для pub/sub подмножество: простые строки, ошибки, целые,
//! bulk-строки и массивы (включая null-варианты).

mod decoder;
mod encoder;

use bytes::Bytes;

pub use decoder::decode;
pub use encoder::{encode, encode_to_vec};

/// Максимальная длина строки заголовка (1 МБ).
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;
/// Максимальный размер bulk-строки (512 МБ).
pub const MAX_BULK_LENGTH: usize = 512 * 1024 * 1024;
/// Максимальная вложенность массивов.
pub const MAX_ARRAY_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Bytes>),
    Array(Option<Vec<Frame>>),
}

impl Frame {
    /// Команда: массив bulk-строк.
    pub fn command<I, A>(args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        Frame::Array(Some(
            args.into_iter()
                .map(|arg| Frame::bulk(arg.as_ref()))
                .collect(),
        ))
    }

    pub fn bulk(data: impl AsRef<[u8]>) -> Self {
        Frame::Bulk(Some(Bytes::copy_from_slice(data.as_ref())))
    }

    /// Текстовое содержимое простой или bulk-строки.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Frame::Simple(s) => Some(s),
            Frame::Bulk(Some(data)) => std::str::from_utf8(data).ok(),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Frame::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<Vec<Frame>> {
        match self {
            Frame::Array(Some(items)) => Some(items),
            _ => None,
        }
    }

    /// Байты простой или bulk-строки без проверки кодировки.
    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            Frame::Simple(s) => Some(Bytes::from(s)),
            Frame::Bulk(Some(data)) => Some(data),
            _ => None,
        }
    }
}

/// Сообщение, которое брокер присылает соединению в режиме подписчика.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushKind {
    /// `["message", channel, payload]`. Полезная нагрузка не проверяется:
    /// это делает декодер конвертов.
    Message { channel: String, payload: Bytes },
    /// `["subscribe", channel, count]`
    Subscribed { channel: String, count: i64 },
    /// `["unsubscribe", channel, count]`
    Unsubscribed { channel: String, count: i64 },
    /// `["pong", ...]` и прочие служебные ответы.
    Other(String),
}

impl PushKind {
    /// Разбирает push-фрейм. `None`, если фрейм не похож на push.
    pub fn parse(frame: Frame) -> Option<Self> {
        let mut items = frame.into_array()?.into_iter();
        let kind = items.next()?.as_text()?.to_ascii_lowercase();

        match kind.as_str() {
            "message" => {
                let channel = items.next()?.as_text()?.to_string();
                let payload = items.next()?.into_bytes()?;
                Some(PushKind::Message { channel, payload })
            }
            "subscribe" | "unsubscribe" => {
                let channel = items.next()?.as_text()?.to_string();
                let count = items.next()?.as_integer()?;
                if kind == "subscribe" {
                    Some(PushKind::Subscribed { channel, count })
                } else {
                    Some(PushKind::Unsubscribed { channel, count })
                }
            }
            _ => Some(PushKind::Other(kind)),
        }
    }
}
