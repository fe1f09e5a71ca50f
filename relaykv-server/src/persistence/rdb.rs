//! RDB snapshot decoding and encoding.
//!
//! Only string values are supported. The decoder inserts every record into a
//! [`Keyspace`] as it goes; a structural error aborts the load but does not
//! undo records already inserted.

use super::crc64;
use crate::core::{Entry, Keyspace, KvError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::path::Path;
use tracing::{debug, info};

const MAGIC: &[u8; 9] = b"REDIS0011";
const CHECKSUM_LEN: usize = 8;

const OPCODE_AUX: u8 = 0xFA;
const OPCODE_RESIZEDB: u8 = 0xFB;
const OPCODE_EXPIRETIME_MS: u8 = 0xFC;
const OPCODE_EXPIRETIME: u8 = 0xFD;
const OPCODE_SELECTDB: u8 = 0xFE;
const OPCODE_EOF: u8 = 0xFF;

const TYPE_STRING: u8 = 0x00;

const ENC_INT8: u8 = 0;
const ENC_INT16: u8 = 1;
const ENC_INT32: u8 = 2;
const ENC_LZF: u8 = 3;

/// A decoded size-encoding field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Length {
    /// Plain length
    Len(u64),
    /// Special encoding: an integer literal stored in binary
    Int(i64),
}

/// Cursor over snapshot bytes. Running out of input is a format error.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn peek_u8(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    fn read_u8(&mut self) -> Result<u8> {
        let byte = self.peek_u8().ok_or_else(truncated)?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_exact(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(truncated());
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_exact(N)?);
        Ok(out)
    }

    fn read_length(&mut self) -> Result<Length> {
        let first = self.read_u8()?;
        match first >> 6 {
            0b00 => Ok(Length::Len((first & 0x3F) as u64)),
            0b01 => {
                let next = self.read_u8()?;
                Ok(Length::Len((((first & 0x3F) as u64) << 8) | next as u64))
            }
            0b10 => Ok(Length::Len(u32::from_be_bytes(self.read_array()?) as u64)),
            _ => match first & 0x3F {
                ENC_INT8 => Ok(Length::Int(i8::from_le_bytes(self.read_array()?) as i64)),
                ENC_INT16 => Ok(Length::Int(i16::from_le_bytes(self.read_array()?) as i64)),
                ENC_INT32 => Ok(Length::Int(i32::from_le_bytes(self.read_array()?) as i64)),
                ENC_LZF => Err(KvError::UnsupportedFeature(
                    "compression not supported".to_string(),
                )),
                other => Err(KvError::Format(format!(
                    "unsupported special encoding 0x{:02x}",
                    other
                ))),
            },
        }
    }

    /// A size field; integer literals are accepted as sizes too.
    fn read_size(&mut self) -> Result<u64> {
        match self.read_length()? {
            Length::Len(n) => Ok(n),
            Length::Int(n) => u64::try_from(n)
                .map_err(|_| KvError::Format(format!("negative size {}", n))),
        }
    }

    fn read_string(&mut self) -> Result<Bytes> {
        match self.read_length()? {
            Length::Len(len) => {
                let len = usize::try_from(len).map_err(|_| truncated())?;
                Ok(Bytes::copy_from_slice(self.read_exact(len)?))
            }
            Length::Int(n) => Ok(Bytes::from(n.to_string())),
        }
    }
}

fn truncated() -> KvError {
    KvError::Format("unexpected end of snapshot".to_string())
}

fn check_magic(reader: &mut Reader<'_>) -> Result<()> {
    match reader.read_exact(MAGIC.len()) {
        Ok(magic) if magic == MAGIC => Ok(()),
        _ => Err(KvError::Format("bad magic".to_string())),
    }
}

/// Decode a snapshot into `keyspace`, returning the keys it contained in
/// file order.
pub fn load(data: &[u8], keyspace: &Keyspace) -> Result<Vec<Bytes>> {
    let mut reader = Reader::new(data);
    check_magic(&mut reader)?;
    debug!(bytes = data.len(), "decoding snapshot");

    let mut keys = Vec::new();
    loop {
        match reader.read_u8()? {
            OPCODE_AUX => {
                let name = reader.read_string()?;
                let value = reader.read_string()?;
                debug!(
                    name = %String::from_utf8_lossy(&name),
                    value = %String::from_utf8_lossy(&value),
                    "snapshot aux field"
                );
            }
            OPCODE_SELECTDB => {
                let db = reader.read_size()?;
                debug!(db, "snapshot database section");
                load_database(&mut reader, keyspace, &mut keys)?;
            }
            OPCODE_EOF => {
                // Checksum is consumed but not verified
                reader.read_exact(CHECKSUM_LEN)?;
                break;
            }
            other => {
                return Err(KvError::Format(format!("unexpected opcode 0x{:02x}", other)));
            }
        }
    }

    Ok(keys)
}

fn load_database(reader: &mut Reader<'_>, keyspace: &Keyspace, keys: &mut Vec<Bytes>) -> Result<()> {
    let marker = reader.read_u8()?;
    if marker != OPCODE_RESIZEDB {
        return Err(KvError::Format(format!(
            "expected resizedb marker 0xfb, got 0x{:02x}",
            marker
        )));
    }
    let table_size = reader.read_size()?;
    let expires_size = reader.read_size()?;
    debug!(table_size, expires_size, "snapshot resizedb hints");

    loop {
        match reader.peek_u8() {
            None => return Err(truncated()),
            Some(OPCODE_SELECTDB) | Some(OPCODE_EOF) => return Ok(()),
            Some(_) => {}
        }

        let mut value_type = reader.read_u8()?;
        let expiry_ms = match value_type {
            OPCODE_EXPIRETIME_MS => {
                let ms = i64::from_le_bytes(reader.read_array()?);
                value_type = reader.read_u8()?;
                Some(ms)
            }
            OPCODE_EXPIRETIME => {
                let secs = u32::from_le_bytes(reader.read_array()?);
                value_type = reader.read_u8()?;
                Some(secs as i64 * 1000)
            }
            _ => None,
        };

        if value_type != TYPE_STRING {
            return Err(KvError::UnsupportedFeature(format!(
                "unsupported value type 0x{:02x}",
                value_type
            )));
        }

        let key = reader.read_string()?;
        let value = reader.read_string()?;
        keyspace.set(key.clone(), value, expiry_ms);
        keys.push(key);
    }
}

/// Read and decode a snapshot file into `keyspace`
pub async fn load_file(path: impl AsRef<Path>, keyspace: &Keyspace) -> Result<Vec<Bytes>> {
    let path = path.as_ref();
    let data = tokio::fs::read(path).await?;
    let keys = load(&data, keyspace)?;
    info!(path = %path.display(), keys = keys.len(), "snapshot loaded");
    Ok(keys)
}

/// Encode entries as a version 11 snapshot with a single database
pub fn encode(entries: &[(Bytes, Entry)]) -> Bytes {
    let mut buf = BytesMut::with_capacity(128);
    buf.put_slice(MAGIC);

    let used_mem: usize = entries.iter().map(|(k, e)| k.len() + e.value.len()).sum();
    let used_mem = used_mem.to_string();
    let ctime = chrono::Utc::now().timestamp().to_string();
    for (name, value) in [
        ("redis-ver", "7.2.0"),
        ("redis-bits", "64"),
        ("ctime", ctime.as_str()),
        ("used-mem", used_mem.as_str()),
    ] {
        buf.put_u8(OPCODE_AUX);
        write_string(&mut buf, name.as_bytes());
        write_string(&mut buf, value.as_bytes());
    }

    if !entries.is_empty() {
        let expires = entries.iter().filter(|(_, e)| e.expiry_ms.is_some()).count();
        buf.put_u8(OPCODE_SELECTDB);
        write_length(&mut buf, 0);
        buf.put_u8(OPCODE_RESIZEDB);
        write_length(&mut buf, entries.len() as u64);
        write_length(&mut buf, expires as u64);

        for (key, entry) in entries {
            if let Some(at) = entry.expiry_ms {
                buf.put_u8(OPCODE_EXPIRETIME_MS);
                buf.put_i64_le(at);
            }
            buf.put_u8(TYPE_STRING);
            write_string(&mut buf, key);
            write_string(&mut buf, &entry.value);
        }
    }

    buf.put_u8(OPCODE_EOF);
    let checksum = crc64::checksum(&buf);
    buf.put_u64_le(checksum);
    buf.freeze()
}

fn write_length(buf: &mut BytesMut, len: u64) {
    if len < 1 << 6 {
        buf.put_u8(len as u8);
    } else if len < 1 << 14 {
        buf.put_u8(0x40 | (len >> 8) as u8);
        buf.put_u8(len as u8);
    } else {
        // The 32-bit form is the widest size encoding
        debug_assert!(len <= u32::MAX as u64);
        buf.put_u8(0x80);
        buf.put_u32(len as u32);
    }
}

fn write_string(buf: &mut BytesMut, data: &[u8]) {
    write_length(buf, data.len() as u64);
    buf.put_slice(data);
}
