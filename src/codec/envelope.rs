use std::borrow::Cow;

use chanbus_error::{DecodeError, EncodeError};
use serde::{de::IgnoredAny, Deserialize, Serialize};

use super::Message;

/// Исходящий конверт: тег + поля варианта.
#[derive(Serialize)]
struct Outgoing<'a, M> {
    #[serde(rename = "type")]
    tag: &'a str,
    data: &'a M,
}

/// Первый этап декодирования: только тег. `data` обязателен, но не
/// разбирается.
#[derive(Deserialize)]
struct Head<'a> {
    #[serde(rename = "type", borrow)]
    tag: Cow<'a, str>,
    #[allow(dead_code)]
    data: IgnoredAny,
}

/// Второй этап: поля по схеме конкретного варианта.
#[derive(Deserialize)]
pub(super) struct Incoming<M> {
    pub(super) data: M,
}

pub(super) fn encode<M: Message>(message: &M) -> Result<String, EncodeError> {
    serde_json::to_string(&Outgoing {
        tag: M::TAG,
        data: message,
    })
    .map_err(|e| EncodeError::Serialization {
        tag: M::TAG.to_string(),
        reason: e.to_string(),
    })
}

pub(super) fn read_tag(text: &str) -> Result<Cow<'_, str>, DecodeError> {
    let head: Head<'_> = serde_json::from_str(text).map_err(DecodeError::malformed)?;
    Ok(head.tag)
}
