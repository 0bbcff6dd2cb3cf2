use std::{io, time::Duration};

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use chanbus_error::BrokerError;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, BufWriter},
    net::TcpStream,
    time::timeout,
};
use tracing::{debug, trace};

use super::TcpOptions;
use crate::broker::{
    resp::{self, Frame, PushKind},
    BrokerConnection, BrokerResult, ChannelMessage,
};

/// Защитный предел на размер непрочитанного буфера.
const MAX_BUFFERED: usize = resp::MAX_BULK_LENGTH + 64 * 1024;

/// Соединение с RESP2-брокером.
///
/// Отслеживает, пригодно ли оно для повторного использования: соединение
/// в режиме подписчика, после ошибки ввода-вывода или с недочитанным
/// ответом (запрос отменён посреди обмена) в пул не возвращается.
pub struct RespConnection {
    addr: String,
    stream: BufWriter<TcpStream>,
    buffer: BytesMut,
    read_timeout: Duration,
    write_timeout: Duration,
    subscribed: bool,
    broken: bool,
    /// Запрос отправлен (или отправляется), ответ ещё не прочитан.
    in_flight: bool,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl RespConnection {
    /// Устанавливает соединение с брокером.
    pub async fn connect(options: &TcpOptions) -> BrokerResult<Self> {
        let addr = options.address();
        debug!(%addr, "connecting to broker");

        let stream = timeout(options.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| BrokerError::ConnectionTimeout)?
            .map_err(|e| BrokerError::ConnectionFailed {
                address: addr.clone(),
                reason: e.to_string(),
            })?;
        stream.set_nodelay(true)?;
        debug!(%addr, "broker connection established");

        Ok(Self {
            addr,
            stream: BufWriter::new(stream),
            buffer: BytesMut::with_capacity(8 * 1024),
            read_timeout: options.read_timeout,
            write_timeout: options.write_timeout,
            subscribed: false,
            broken: false,
            in_flight: false,
        })
    }

    pub fn address(&self) -> &str {
        &self.addr
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    /// Соединение можно вернуть в пул.
    pub fn is_reusable(&self) -> bool {
        !self.subscribed && !self.broken && !self.in_flight && self.buffer.is_empty()
    }

    /// Неблокирующая проверка простаивающего соединения: брокер закрыл
    /// сокет или прислал что-то без запроса.
    pub(super) fn is_stale(&self) -> bool {
        let mut peek = [0u8; 1];
        match self.stream.get_ref().try_read(&mut peek) {
            Err(e) => e.kind() != io::ErrorKind::WouldBlock,
            Ok(_) => true,
        }
    }

    async fn write_frame(
        &mut self,
        frame: &Frame,
    ) -> BrokerResult<()> {
        let bytes = resp::encode_to_vec(frame)?;
        trace!(addr = %self.addr, len = bytes.len(), "writing frame");

        let write_timeout = self.write_timeout;
        let stream = &mut self.stream;
        let write = async {
            stream.write_all(&bytes).await?;
            stream.flush().await
        };
        timeout(write_timeout, write)
            .await
            .map_err(|_| BrokerError::WriteTimeout)?
            .map_err(BrokerError::from)
    }

    /// Читает следующий фрейм. `Ok(None)`: брокер закрыл соединение между
    /// фреймами.
    ///
    /// Отмена безопасна: частично прочитанные байты остаются в буфере.
    async fn read_frame(&mut self) -> BrokerResult<Option<Frame>> {
        loop {
            if let Some((frame, consumed)) = resp::decode(&self.buffer)? {
                self.buffer.advance(consumed);
                return Ok(Some(frame));
            }
            if self.buffer.len() > MAX_BUFFERED {
                return Err(BrokerError::protocol("frame exceeds buffer limit"));
            }

            if self.stream.read_buf(&mut self.buffer).await? == 0 {
                return if self.buffer.is_empty() {
                    Ok(None)
                } else {
                    Err(BrokerError::lost("connection closed mid-frame"))
                };
            }
        }
    }

    /// Ответ на запрос: ограничен `read_timeout`, закрытие соединения здесь
    /// всегда ошибка.
    async fn read_reply(&mut self) -> BrokerResult<Frame> {
        match timeout(self.read_timeout, self.read_frame()).await {
            Err(_) => Err(BrokerError::ReadTimeout),
            Ok(Ok(Some(Frame::Error(message)))) => {
                // Ошибка сервера: обмен завершён, соединение пригодно.
                self.in_flight = false;
                Err(BrokerError::Server { message })
            }
            Ok(Ok(Some(frame))) => Ok(frame),
            Ok(Ok(None)) => Err(BrokerError::lost("connection closed by broker")),
            Ok(Err(e)) => Err(e),
        }
    }

    /// Фиксирует ошибку: после неё соединение в пул не вернётся.
    fn track<T>(
        &mut self,
        result: BrokerResult<T>,
    ) -> BrokerResult<T> {
        if let Err(e) = &result {
            if e.is_fatal_for_connection() {
                self.broken = true;
            }
        }
        result
    }

    async fn do_publish(
        &mut self,
        channel: &str,
        payload: &str,
    ) -> BrokerResult<u64> {
        if self.subscribed {
            return Err(BrokerError::protocol("PUBLISH on a connection in subscriber mode"));
        }
        self.in_flight = true;
        self.write_frame(&Frame::command(["PUBLISH", channel, payload]))
            .await?;
        let reply = self.read_reply().await?;
        self.in_flight = false;

        match reply {
            Frame::Integer(n) if n >= 0 => Ok(n as u64),
            other => Err(BrokerError::protocol(format!(
                "unexpected PUBLISH reply: {other:?}"
            ))),
        }
    }

    async fn do_subscribe(
        &mut self,
        channel: &str,
    ) -> BrokerResult<()> {
        self.in_flight = true;
        self.write_frame(&Frame::command(["SUBSCRIBE", channel]))
            .await?;
        // С этого момента брокер считает соединение подписчиком, даже если
        // подтверждение не дойдёт.
        self.subscribed = true;

        loop {
            let reply = self.read_reply().await?;
            match PushKind::parse(reply) {
                Some(PushKind::Subscribed { channel: ack, .. }) if ack == channel => {
                    self.in_flight = false;
                    debug!(addr = %self.addr, channel, "subscribed");
                    return Ok(());
                }
                Some(other) => trace!(?other, "skipping push while subscribing"),
                None => {
                    return Err(BrokerError::protocol("unexpected reply to SUBSCRIBE"));
                }
            }
        }
    }

    async fn do_next_message(&mut self) -> BrokerResult<Option<ChannelMessage>> {
        if !self.subscribed {
            return Err(BrokerError::protocol("connection is not subscribed"));
        }

        loop {
            let frame = match self.read_frame().await? {
                Some(Frame::Error(message)) => return Err(BrokerError::Server { message }),
                Some(frame) => frame,
                None => return Ok(None),
            };

            match PushKind::parse(frame) {
                Some(PushKind::Message { channel, payload }) => {
                    return Ok(Some(ChannelMessage { channel, payload }));
                }
                Some(other) => trace!(?other, "skipping non-message push"),
                None => return Err(BrokerError::protocol("unexpected frame in subscriber mode")),
            }
        }
    }

    async fn do_unsubscribe(
        &mut self,
        channel: &str,
    ) -> BrokerResult<()> {
        self.in_flight = true;
        self.write_frame(&Frame::command(["UNSUBSCRIBE", channel]))
            .await?;

        // До подтверждения ещё могут прийти сообщения: пропускаем их.
        loop {
            let reply = self.read_reply().await?;
            match PushKind::parse(reply) {
                Some(PushKind::Unsubscribed { count, .. }) => {
                    self.in_flight = false;
                    if count == 0 {
                        self.subscribed = false;
                    }
                    debug!(addr = %self.addr, channel, "unsubscribed");
                    return Ok(());
                }
                Some(_) => continue,
                None => return Err(BrokerError::protocol("unexpected reply to UNSUBSCRIBE")),
            }
        }
    }
}

#[async_trait]
impl BrokerConnection for RespConnection {
    async fn publish(
        &mut self,
        channel: &str,
        payload: &str,
    ) -> BrokerResult<u64> {
        let result = self.do_publish(channel, payload).await;
        self.track(result)
    }

    async fn subscribe(
        &mut self,
        channel: &str,
    ) -> BrokerResult<()> {
        let result = self.do_subscribe(channel).await;
        self.track(result)
    }

    async fn next_message(&mut self) -> BrokerResult<Option<ChannelMessage>> {
        let result = self.do_next_message().await;
        if matches!(result, Ok(None)) {
            self.broken = true;
        }
        self.track(result)
    }

    async fn unsubscribe(
        &mut self,
        channel: &str,
    ) -> BrokerResult<()> {
        let result = self.do_unsubscribe(channel).await;
        self.track(result)
    }
}

impl std::fmt::Debug for RespConnection {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("RespConnection")
            .field("addr", &self.addr)
            .field("subscribed", &self.subscribed)
            .field("broken", &self.broken)
            .field("in_flight", &self.in_flight)
            .finish()
    }
}
