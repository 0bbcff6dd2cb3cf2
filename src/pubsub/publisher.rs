use std::sync::Arc;

use chanbus_error::{BusResult, ErrorExt, PublishError, StackError};
use tracing::{debug, warn};

use super::Channel;
use crate::{
    broker::{BrokerConnection, ConnectionPool},
    codec::{EnvelopeCodec, Message},
};

/// Публикует сообщения в канал шины.
///
/// Каждая публикация берёт соединение из общего пула на время одной
/// команды. Аренда освобождается на любом пути выхода, в том числе при
/// ошибке. Ошибки возвращаются вызывающему и внутри не повторяются.
pub struct ChannelPublisher<P> {
    pool: Arc<P>,
    channel: Channel,
    codec: Arc<EnvelopeCodec>,
}

impl<P: ConnectionPool> ChannelPublisher<P> {
    pub fn new(
        pool: Arc<P>,
        channel: Channel,
        codec: Arc<EnvelopeCodec>,
    ) -> Self {
        Self {
            pool,
            channel,
            codec,
        }
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Публикует сообщение. Возвращает число получателей, о котором
    /// сообщил брокер.
    pub async fn publish<M: Message>(
        &self,
        message: &M,
    ) -> BusResult<u64> {
        let channel = self.channel.as_str();

        let payload = self.codec.encode(message).map_err(|e| {
            StackError::new(PublishError::encode(&e)).context(format!("publish to '{channel}'"))
        })?;

        let mut conn = self.pool.acquire().await.map_err(|e| {
            warn!(
                channel,
                tag = M::TAG,
                error = %e,
                retryable = e.status_code().is_retryable(),
                "no broker connection for publish"
            );
            StackError::new(PublishError::connection(channel, &e))
                .context(format!("acquire connection for '{channel}'"))
        })?;

        let receivers = conn.publish(channel, &payload).await.map_err(|e| {
            warn!(
                channel,
                tag = M::TAG,
                error = %e,
                retryable = e.status_code().is_retryable(),
                "publish failed"
            );
            StackError::new(PublishError::broker(channel, &e))
                .context(format!("PUBLISH {} to '{channel}'", M::TAG))
        })?;

        debug!(channel, tag = M::TAG, receivers, "message published");
        Ok(receivers)
    }
}

impl<P> Clone for ChannelPublisher<P> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            channel: self.channel.clone(),
            codec: self.codec.clone(),
        }
    }
}

impl<P> std::fmt::Debug for ChannelPublisher<P> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ChannelPublisher")
            .field("channel", &self.channel)
            .finish()
    }
}
