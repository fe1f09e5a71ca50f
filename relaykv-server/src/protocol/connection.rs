//! Buffered RESP connection.
//!
//! Bytes read from the socket accumulate in a `BytesMut`. Each `read_*` call
//! first tries to decode from what is already buffered and only waits on the
//! socket when the buffered frame is incomplete, so pipelined commands and
//! frames split across reads are both handled.

use super::command::Command;
use super::resp::{self, Frame};
use crate::core::{KvError, Result};
use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const READ_BUFFER_CAPACITY: usize = 4 * 1024;

pub struct Connection<S> {
    stream: S,
    buffer: BytesMut,
}

impl<S> Connection<S> {
    pub fn new(stream: S) -> Self {
        Self::with_buffer(stream, BytesMut::with_capacity(READ_BUFFER_CAPACITY))
    }

    /// Resume on a stream with bytes already read from it
    pub fn with_buffer(stream: S, buffer: BytesMut) -> Self {
        Self { stream, buffer }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Release the stream together with any undecoded bytes
    pub fn into_parts(self) -> (S, BytesMut) {
        (self.stream, self.buffer)
    }
}

impl<S: AsyncRead + Unpin> Connection<S> {
    /// Read one command. Returns its exact wire length, or `None` when the
    /// peer closed the connection cleanly between commands.
    pub async fn read_command(&mut self) -> Result<Option<(Command, usize)>> {
        loop {
            if let Some((command, used)) = resp::parse_command(&self.buffer)? {
                self.buffer.advance(used);
                return Ok(Some((command, used)));
            }

            if !self.fill().await? {
                return if self.buffer.is_empty() {
                    Ok(None)
                } else {
                    Err(KvError::Protocol("connection closed mid-frame".to_string()))
                };
            }
        }
    }

    /// Read one reply frame. EOF is an error here since a reply was expected.
    pub async fn read_reply(&mut self) -> Result<Frame> {
        loop {
            if let Some((frame, used)) = resp::parse_frame(&self.buffer)? {
                self.buffer.advance(used);
                return Ok(frame);
            }

            if !self.fill().await? {
                return Err(KvError::Io(std::io::ErrorKind::UnexpectedEof.into()));
            }
        }
    }

    /// Read a `$<len>\r\n<bytes>` snapshot transfer, leaving any bytes that
    /// follow it in the buffer.
    pub async fn read_snapshot_payload(&mut self) -> Result<Bytes> {
        loop {
            if let Some((len, start)) = resp::parse_snapshot_header(&self.buffer)? {
                if self.buffer.len() >= start + len {
                    let mut payload = self.buffer.split_to(start + len);
                    payload.advance(start);
                    return Ok(payload.freeze());
                }
                self.buffer.reserve(start + len - self.buffer.len());
            }

            if !self.fill().await? {
                return Err(KvError::Io(std::io::ErrorKind::UnexpectedEof.into()));
            }
        }
    }

    /// Read more bytes into the buffer. Returns `false` on EOF.
    async fn fill(&mut self) -> Result<bool> {
        let n = self.stream.read_buf(&mut self.buffer).await?;
        Ok(n > 0)
    }
}

impl<S: AsyncWrite + Unpin> Connection<S> {
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let mut out = BytesMut::new();
        frame.encode(&mut out);
        self.write_raw(&out).await
    }

    pub async fn write_command(&mut self, command: &Command) -> Result<()> {
        let mut out = BytesMut::with_capacity(command.encoded_len());
        command.encode(&mut out);
        self.write_raw(&out).await
    }

    pub async fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_frame_split_across_reads() {
        let mock = Builder::new()
            .read(b"*3\r\n$3\r\nSE")
            .read(b"T\r\n$3\r\nfoo\r")
            .read(b"\n$3\r\nbar\r\n")
            .build();
        let mut conn = Connection::new(mock);

        let (cmd, used) = conn.read_command().await.unwrap().unwrap();
        assert_eq!(cmd, Command::from_parts(["SET", "foo", "bar"]));
        assert_eq!(used, 31);
        assert!(conn.read_command().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pipelined_in_one_read() {
        let mock = Builder::new()
            .read(b"*1\r\n$4\r\nPING\r\n*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n")
            .build();
        let mut conn = Connection::new(mock);

        let (first, _) = conn.read_command().await.unwrap().unwrap();
        let (second, _) = conn.read_command().await.unwrap().unwrap();
        assert_eq!(first.verb(), "PING");
        assert_eq!(second, Command::from_parts(["ECHO", "hi"]));
        assert!(conn.read_command().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_mid_frame_is_protocol_error() {
        let mock = Builder::new().read(b"*2\r\n$3\r\nGET\r\n").build();
        let mut conn = Connection::new(mock);

        let err = conn.read_command().await.unwrap_err();
        assert!(matches!(err, KvError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_malformed_frame_is_protocol_error() {
        let mock = Builder::new().read(b"*2\r\n$x\r\nab\r\n").build();
        let mut conn = Connection::new(mock);

        assert!(matches!(
            conn.read_command().await,
            Err(KvError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_snapshot_payload_then_command() {
        let mock = Builder::new()
            .read(b"+FULLRESYNC abc 0\r\n$5\r\nRED")
            .read(b"IS*1\r\n$4\r\nPING\r\n")
            .build();
        let mut conn = Connection::new(mock);

        assert_eq!(
            conn.read_reply().await.unwrap(),
            Frame::Simple("FULLRESYNC abc 0".into())
        );
        assert_eq!(
            conn.read_snapshot_payload().await.unwrap(),
            Bytes::from_static(b"REDIS")
        );
        let (cmd, used) = conn.read_command().await.unwrap().unwrap();
        assert_eq!(cmd.verb(), "PING");
        assert_eq!(used, 14);
    }

    #[tokio::test]
    async fn test_write_frame_and_command() {
        let mock = Builder::new()
            .write(b"+PONG\r\n")
            .write(b"*1\r\n$4\r\nPING\r\n")
            .build();
        let mut conn = Connection::new(mock);

        conn.write_frame(&Frame::Simple("PONG".into())).await.unwrap();
        conn.write_command(&Command::from_parts(["PING"]))
            .await
            .unwrap();
    }
}
