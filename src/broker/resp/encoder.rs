use bytes::{BufMut, BytesMut};
use chanbus_error::BrokerError;

use super::{Frame, MAX_ARRAY_DEPTH, MAX_BULK_LENGTH};

/// Кодирует фрейм в конец `out`.
pub fn encode(
    frame: &Frame,
    out: &mut BytesMut,
) -> Result<(), BrokerError> {
    encode_frame(frame, out, 0)
}

pub fn encode_to_vec(frame: &Frame) -> Result<Vec<u8>, BrokerError> {
    let mut out = BytesMut::new();
    encode(frame, &mut out)?;
    Ok(out.to_vec())
}

fn encode_frame(
    frame: &Frame,
    out: &mut BytesMut,
    depth: usize,
) -> Result<(), BrokerError> {
    if depth > MAX_ARRAY_DEPTH {
        return Err(BrokerError::protocol(format!(
            "max array depth exceeded ({MAX_ARRAY_DEPTH})"
        )));
    }

    match frame {
        Frame::Simple(s) => {
            validate_line(s)?;
            put_line(out, b'+', s.as_bytes());
        }
        Frame::Error(s) => {
            validate_line(s)?;
            put_line(out, b'-', s.as_bytes());
        }
        Frame::Integer(n) => put_line(out, b':', n.to_string().as_bytes()),
        Frame::Bulk(None) => out.put_slice(b"$-1\r\n"),
        Frame::Bulk(Some(data)) => {
            if data.len() > MAX_BULK_LENGTH {
                return Err(BrokerError::protocol(format!(
                    "bulk string too long ({} > {MAX_BULK_LENGTH})",
                    data.len()
                )));
            }
            put_line(out, b'$', data.len().to_string().as_bytes());
            out.put_slice(data);
            out.put_slice(b"\r\n");
        }
        Frame::Array(None) => out.put_slice(b"*-1\r\n"),
        Frame::Array(Some(items)) => {
            put_line(out, b'*', items.len().to_string().as_bytes());
            for item in items {
                encode_frame(item, out, depth + 1)?;
            }
        }
    }

    Ok(())
}

fn put_line(
    out: &mut BytesMut,
    prefix: u8,
    body: &[u8],
) {
    out.reserve(body.len() + 3);
    out.put_u8(prefix);
    out.put_slice(body);
    out.put_slice(b"\r\n");
}

fn validate_line(s: &str) -> Result<(), BrokerError> {
    if s.contains(['\r', '\n']) {
        return Err(BrokerError::protocol("simple string contains CR or LF"));
    }
    Ok(())
}
