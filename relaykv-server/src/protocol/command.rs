use super::resp::encode_bulk;
use bytes::{BufMut, Bytes, BytesMut};

/// A request or replicated record: an ordered list of byte-strings whose
/// first element is the verb.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Command {
    parts: Vec<Bytes>,
}

impl Command {
    pub fn new(parts: Vec<Bytes>) -> Self {
        Self { parts }
    }

    /// Build a command from anything convertible to bytes
    pub fn from_parts<I, T>(parts: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        Self {
            parts: parts.into_iter().map(Into::into).collect(),
        }
    }

    /// Upper-cased verb, or an empty string for an empty command
    pub fn verb(&self) -> String {
        self.parts
            .first()
            .map(|verb| String::from_utf8_lossy(verb).to_ascii_uppercase())
            .unwrap_or_default()
    }

    /// Arguments after the verb
    pub fn args(&self) -> &[Bytes] {
        self.parts.get(1..).unwrap_or(&[])
    }

    /// Case-insensitive check of the argument at `index`
    pub fn arg_eq(&self, index: usize, expected: &str) -> bool {
        self.args()
            .get(index)
            .is_some_and(|arg| arg.eq_ignore_ascii_case(expected.as_bytes()))
    }

    pub fn parts(&self) -> &[Bytes] {
        &self.parts
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Encode as an array of bulk strings
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(b'*');
        dst.put_slice(self.parts.len().to_string().as_bytes());
        dst.put_slice(b"\r\n");
        for part in &self.parts {
            encode_bulk(part, dst);
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Exact number of bytes `encode` produces
    pub fn encoded_len(&self) -> usize {
        let header = 1 + digits(self.parts.len()) + 2;
        self.parts
            .iter()
            .map(|part| 1 + digits(part.len()) + 2 + part.len() + 2)
            .sum::<usize>()
            + header
    }
}

fn digits(mut n: usize) -> usize {
    let mut count = 1;
    while n >= 10 {
        n /= 10;
        count += 1;
    }
    count
}
