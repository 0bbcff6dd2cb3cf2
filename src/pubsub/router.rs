use std::sync::Arc;

use chanbus_error::DecodeError;
use tracing::{debug, warn};

use super::listeners::{ListenerRegistry, PostOutcome};
use crate::codec::EnvelopeCodec;

/// Декодирует входящие конверты и раздаёт их слушателям.
///
/// Слушатели вызываются синхронно в контексте цикла подписки: медленный
/// слушатель задерживает доставку следующих сообщений этой сессии, поэтому
/// долгую работу колбэк должен выносить в отдельную задачу сам.
#[derive(Debug, Clone)]
pub struct DispatchRouter {
    codec: Arc<EnvelopeCodec>,
    listeners: Arc<ListenerRegistry>,
}

impl DispatchRouter {
    pub fn new(
        codec: Arc<EnvelopeCodec>,
        listeners: Arc<ListenerRegistry>,
    ) -> Self {
        Self { codec, listeners }
    }

    pub fn codec(&self) -> &Arc<EnvelopeCodec> {
        &self.codec
    }

    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.listeners
    }

    /// Маршрутизирует один конверт. Возвращает число слушателей, которые
    /// его получили.
    ///
    /// Ошибка декодирования (включая не-UTF-8 байты) пишется в лог;
    /// сообщение отбрасывается, и никто ничего не получает.
    pub fn route(
        &self,
        payload: impl AsRef<[u8]>,
    ) -> Result<usize, DecodeError> {
        let payload = payload.as_ref();
        let decoded = match std::str::from_utf8(payload)
            .map_err(DecodeError::malformed)
            .and_then(|text| self.codec.decode(text))
        {
            Ok(decoded) => decoded,
            Err(e) => {
                match &e {
                    DecodeError::UnknownVariant { tag } => {
                        warn!(tag = %tag, "dropping message of unknown variant")
                    }
                    DecodeError::MalformedEnvelope { reason } => {
                        warn!(reason = %reason, len = payload.len(), "dropping malformed envelope")
                    }
                }
                return Err(e);
            }
        };

        let PostOutcome {
            delivered,
            panicked,
        } = self.listeners.post(&decoded);
        debug!(tag = decoded.tag(), delivered, panicked, "message routed");
        Ok(delivered)
    }
}
