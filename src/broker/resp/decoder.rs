use std::io::Cursor;

use bytes::{Buf, Bytes};
use chanbus_error::BrokerError;
use tracing::trace;

use super::{Frame, MAX_ARRAY_DEPTH, MAX_BULK_LENGTH, MAX_LINE_LENGTH};

/// Пытается разобрать один фрейм из начала `buf`.
///
/// Возвращает фрейм и число потреблённых байт, `Ok(None)`, если данных
/// пока недостаточно, или ошибку протокола. Неполный ввод ничего не
/// потребляет: вызывающая сторона дочитывает сокет и повторяет вызов.
pub fn decode(buf: &[u8]) -> Result<Option<(Frame, usize)>, BrokerError> {
    let mut cursor = Cursor::new(buf);
    match parse_frame(&mut cursor, 0)? {
        Some(frame) => {
            let consumed = cursor.position() as usize;
            trace!(consumed, "decoded RESP frame");
            Ok(Some((frame, consumed)))
        }
        None => Ok(None),
    }
}

fn parse_frame(
    buf: &mut Cursor<&[u8]>,
    depth: usize,
) -> Result<Option<Frame>, BrokerError> {
    if !buf.has_remaining() {
        return Ok(None);
    }

    let prefix = buf.get_u8();
    let Some(line) = read_line(buf)? else {
        return Ok(None);
    };

    match prefix {
        b'+' => Ok(Some(Frame::Simple(utf8(line)?))),
        b'-' => Ok(Some(Frame::Error(utf8(line)?))),
        b':' => Ok(Some(Frame::Integer(parse_int(line)?))),
        b'$' => parse_bulk(buf, line),
        b'*' => parse_array(buf, line, depth),
        other => Err(BrokerError::protocol(format!(
            "unknown frame type byte 0x{other:02x}"
        ))),
    }
}

fn parse_bulk(
    buf: &mut Cursor<&[u8]>,
    header: &[u8],
) -> Result<Option<Frame>, BrokerError> {
    let Some(len) = parse_len(header)? else {
        return Ok(Some(Frame::Bulk(None)));
    };
    if len > MAX_BULK_LENGTH {
        return Err(BrokerError::protocol(format!(
            "bulk string too long ({len} > {MAX_BULK_LENGTH})"
        )));
    }
    if buf.remaining() < len + 2 {
        return Ok(None);
    }

    let data = Bytes::copy_from_slice(&buf.chunk()[..len]);
    buf.advance(len);
    if buf.get_u8() != b'\r' || buf.get_u8() != b'\n' {
        return Err(BrokerError::protocol("bulk string is not terminated by CRLF"));
    }
    Ok(Some(Frame::Bulk(Some(data))))
}

fn parse_array(
    buf: &mut Cursor<&[u8]>,
    header: &[u8],
    depth: usize,
) -> Result<Option<Frame>, BrokerError> {
    if depth > MAX_ARRAY_DEPTH {
        return Err(BrokerError::protocol(format!(
            "max array depth exceeded ({MAX_ARRAY_DEPTH})"
        )));
    }
    let Some(len) = parse_len(header)? else {
        return Ok(Some(Frame::Array(None)));
    };

    // Каждый элемент занимает минимум 3 байта; заведомо недостижимая длина
    // не должна приводить к огромной аллокации.
    let mut items = Vec::with_capacity(len.min(buf.remaining() / 3 + 1));
    for _ in 0..len {
        match parse_frame(buf, depth + 1)? {
            Some(item) => items.push(item),
            None => return Ok(None),
        }
    }
    Ok(Some(Frame::Array(Some(items))))
}

/// Читает строку до CRLF и сдвигает курсор за него.
fn read_line<'a>(buf: &mut Cursor<&'a [u8]>) -> Result<Option<&'a [u8]>, BrokerError> {
    let start = buf.position() as usize;
    let data: &'a [u8] = *buf.get_ref();
    let rest = &data[start..];

    match rest.windows(2).position(|w| w == b"\r\n") {
        Some(end) if end > MAX_LINE_LENGTH => Err(BrokerError::protocol("line too long")),
        Some(end) => {
            buf.set_position((start + end + 2) as u64);
            Ok(Some(&rest[..end]))
        }
        None if rest.len() > MAX_LINE_LENGTH + 1 => Err(BrokerError::protocol("line too long")),
        None => Ok(None),
    }
}

fn utf8(line: &[u8]) -> Result<String, BrokerError> {
    String::from_utf8(line.to_vec()).map_err(|e| BrokerError::protocol(e.to_string()))
}

fn parse_int(line: &[u8]) -> Result<i64, BrokerError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            BrokerError::protocol(format!("invalid integer {:?}", String::from_utf8_lossy(line)))
        })
}

/// Длина bulk-строки или массива; `None` для null (`-1`).
fn parse_len(line: &[u8]) -> Result<Option<usize>, BrokerError> {
    match parse_int(line)? {
        -1 => Ok(None),
        n if n >= 0 => Ok(Some(n as usize)),
        n => Err(BrokerError::protocol(format!("negative length {n}"))),
    }
}
