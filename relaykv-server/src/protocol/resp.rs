//! RESP encoder and incremental decoder.
//!
//! Decoders work on a byte slice and return `Ok(None)` when the slice does
//! not yet hold a complete frame, so callers can read more bytes and retry.
//! On success they also return how many bytes the frame occupied.

use super::command::Command;
use crate::core::{KvError, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// Largest accepted bulk string (512MB)
pub const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;
/// Largest accepted array
pub const MAX_ARRAY_LEN: i64 = 1024 * 1024;
/// Longest accepted length/status header line
const MAX_LINE_LEN: usize = 64 * 1024;

/// A reply value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Null,
    Array(Vec<Frame>),
}

impl Frame {
    pub fn ok() -> Self {
        Frame::Simple("OK".to_string())
    }

    pub fn bulk(value: impl Into<Bytes>) -> Self {
        Frame::Bulk(value.into())
    }

    /// Array of bulk strings
    pub fn bulk_array<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        Frame::Array(values.into_iter().map(|v| Frame::Bulk(v.into())).collect())
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Frame::Simple(text) => encode_line(b'+', text.as_bytes(), dst),
            Frame::Error(text) => encode_line(b'-', text.as_bytes(), dst),
            Frame::Integer(n) => encode_line(b':', n.to_string().as_bytes(), dst),
            Frame::Bulk(data) => encode_bulk(data, dst),
            Frame::Null => dst.put_slice(b"$-1\r\n"),
            Frame::Array(items) => {
                encode_line(b'*', items.len().to_string().as_bytes(), dst);
                for item in items {
                    item.encode(dst);
                }
            }
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }
}

fn encode_line(prefix: u8, body: &[u8], dst: &mut BytesMut) {
    dst.reserve(body.len() + 3);
    dst.put_u8(prefix);
    dst.put_slice(body);
    dst.put_slice(b"\r\n");
}

/// `$<len>\r\n<bytes>\r\n`
pub fn encode_bulk(data: &[u8], dst: &mut BytesMut) {
    encode_line(b'$', data.len().to_string().as_bytes(), dst);
    dst.reserve(data.len() + 2);
    dst.put_slice(data);
    dst.put_slice(b"\r\n");
}

/// Snapshot transfer framing: `$<len>\r\n<bytes>` with no trailing CRLF
pub fn encode_snapshot_transfer(payload: &[u8], dst: &mut BytesMut) {
    encode_line(b'$', payload.len().to_string().as_bytes(), dst);
    dst.put_slice(payload);
}

/// Decode one array-of-bulk-strings command.
pub fn parse_command(buf: &[u8]) -> Result<Option<(Command, usize)>> {
    let Some(&first) = buf.first() else {
        return Ok(None);
    };
    if first != b'*' {
        return Err(KvError::Protocol("expected array".to_string()));
    }

    let Some((count, mut pos)) = parse_length(buf, 1, "malformed length")? else {
        return Ok(None);
    };
    if !(0..=MAX_ARRAY_LEN).contains(&count) {
        return Err(KvError::Protocol("malformed length".to_string()));
    }

    let mut parts = Vec::with_capacity(count.min(64) as usize);
    for _ in 0..count {
        let Some((part, next)) = parse_bulk(buf, pos)? else {
            return Ok(None);
        };
        parts.push(part);
        pos = next;
    }

    Ok(Some((Command::new(parts), pos)))
}

/// Decode any reply frame: status, error, integer, bulk (or null) and
/// nested arrays.
pub fn parse_frame(buf: &[u8]) -> Result<Option<(Frame, usize)>> {
    parse_frame_at(buf, 0)
}

fn parse_frame_at(buf: &[u8], pos: usize) -> Result<Option<(Frame, usize)>> {
    let Some(&prefix) = buf.get(pos) else {
        return Ok(None);
    };

    match prefix {
        b'+' | b'-' => {
            let Some((line, next)) = read_line(buf, pos + 1)? else {
                return Ok(None);
            };
            let text = String::from_utf8_lossy(line).into_owned();
            let frame = if prefix == b'+' {
                Frame::Simple(text)
            } else {
                Frame::Error(text)
            };
            Ok(Some((frame, next)))
        }
        b':' => {
            let Some((n, next)) = parse_length(buf, pos + 1, "invalid integer")? else {
                return Ok(None);
            };
            Ok(Some((Frame::Integer(n), next)))
        }
        b'$' => {
            if buf[pos..].starts_with(b"$-1\r\n") {
                return Ok(Some((Frame::Null, pos + 5)));
            }
            Ok(parse_bulk(buf, pos)?.map(|(data, next)| (Frame::Bulk(data), next)))
        }
        b'*' => {
            let Some((count, mut next)) = parse_length(buf, pos + 1, "malformed length")? else {
                return Ok(None);
            };
            if count == -1 {
                return Ok(Some((Frame::Null, next)));
            }
            if !(0..=MAX_ARRAY_LEN).contains(&count) {
                return Err(KvError::Protocol("malformed length".to_string()));
            }
            let mut items = Vec::with_capacity(count.min(64) as usize);
            for _ in 0..count {
                let Some((item, after)) = parse_frame_at(buf, next)? else {
                    return Ok(None);
                };
                items.push(item);
                next = after;
            }
            Ok(Some((Frame::Array(items), next)))
        }
        other => Err(KvError::Protocol(format!(
            "unexpected frame type byte 0x{:02x}",
            other
        ))),
    }
}

/// Decode the header of a snapshot transfer, returning the payload length and
/// the offset where the payload starts.
pub fn parse_snapshot_header(buf: &[u8]) -> Result<Option<(usize, usize)>> {
    let Some(&first) = buf.first() else {
        return Ok(None);
    };
    if first != b'$' {
        return Err(KvError::Protocol("expected snapshot bulk header".to_string()));
    }
    let Some((len, start)) = parse_length(buf, 1, "invalid snapshot length")? else {
        return Ok(None);
    };
    if !(0..=MAX_BULK_LEN).contains(&len) {
        return Err(KvError::Protocol("invalid snapshot length".to_string()));
    }
    Ok(Some((len as usize, start)))
}

/// Parse `$<len>\r\n<bytes>\r\n` starting at `pos`.
fn parse_bulk(buf: &[u8], pos: usize) -> Result<Option<(Bytes, usize)>> {
    let Some(&prefix) = buf.get(pos) else {
        return Ok(None);
    };
    if prefix != b'$' {
        return Err(KvError::Protocol("expected bulk string".to_string()));
    }

    let Some((len, start)) = parse_length(buf, pos + 1, "invalid bulk length")? else {
        return Ok(None);
    };
    if !(0..=MAX_BULK_LEN).contains(&len) {
        return Err(KvError::Protocol("invalid bulk length".to_string()));
    }

    let end = start + len as usize;
    if buf.len() < end + 2 {
        return Ok(None);
    }
    if &buf[end..end + 2] != b"\r\n" {
        return Err(KvError::Protocol("malformed bulk terminator".to_string()));
    }

    Ok(Some((Bytes::copy_from_slice(&buf[start..end]), end + 2)))
}

/// Parse a decimal integer terminated by CRLF starting at `pos`.
fn parse_length(buf: &[u8], pos: usize, what: &str) -> Result<Option<(i64, usize)>> {
    let Some((line, next)) = read_line(buf, pos)? else {
        // Reject garbage early instead of waiting for a CRLF that may never come
        let partial = buf.get(pos..).unwrap_or(&[]);
        let plausible = partial
            .iter()
            .enumerate()
            .all(|(i, &b)| b.is_ascii_digit() || (i == 0 && b == b'-') || b == b'\r');
        if !plausible {
            return Err(KvError::Protocol(what.to_string()));
        }
        return Ok(None);
    };

    let digits = line.strip_prefix(b"-").unwrap_or(line);
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(KvError::Protocol(what.to_string()));
    }

    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .map(|n| Some((n, next)))
        .ok_or_else(|| KvError::Protocol(what.to_string()))
}

/// Return the bytes up to the next CRLF and the offset after it.
fn read_line(buf: &[u8], pos: usize) -> Result<Option<(&[u8], usize)>> {
    let rest = buf.get(pos..).unwrap_or(&[]);
    match rest.iter().position(|&b| b == b'\n') {
        Some(0) => Err(KvError::Protocol("malformed line terminator".to_string())),
        Some(idx) if rest[idx - 1] != b'\r' => {
            Err(KvError::Protocol("malformed line terminator".to_string()))
        }
        Some(idx) => Ok(Some((&rest[..idx - 1], pos + idx + 1))),
        None if rest.len() > MAX_LINE_LEN => {
            Err(KvError::Protocol("header line too long".to_string()))
        }
        None => Ok(None),
    }
}
