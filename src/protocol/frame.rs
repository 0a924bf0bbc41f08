//! Framing for the text protocol.
//!
//! A frame is every field followed by [`SEPARATOR`], then [`TERMINATOR`]:
//! `file|3|0|2|primes.json|end*`. There is no length prefix, so the reader
//! accumulates bytes until the full terminator string shows up.

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{ClusterError, Result};
use crate::protocol::message::Message;

pub const SEPARATOR: char = '|';
pub const TERMINATOR: &str = "end*";
/// Longest frame body a reader buffers before giving up on the peer.
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Returns true if `field` can be framed without corrupting the stream.
pub fn is_valid_field(field: &str) -> bool {
    !field.contains(SEPARATOR) && !field.contains(TERMINATOR)
}

/// Splits the text in front of a terminator back into fields.
pub fn parse_fields(body: &str) -> Vec<String> {
    if body.is_empty() {
        return Vec::new();
    }
    let body = body.strip_suffix(SEPARATOR).unwrap_or(body);
    body.split(SEPARATOR).map(str::to_string).collect()
}

#[derive(Debug)]
pub struct FrameCodec {
    // Bytes of the current buffer already searched without a match.
    scanned: usize,
    max_length: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::with_max_length(MAX_FRAME_LENGTH)
    }
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            scanned: 0,
            max_length,
        }
    }

    fn find_terminator(&mut self, src: &[u8]) -> Option<usize> {
        let needle = TERMINATOR.as_bytes();
        // Back up so a terminator split across two reads is still found.
        let start = self.scanned.saturating_sub(needle.len() - 1);
        let found = src
            .get(start..)
            .and_then(|tail| tail.windows(needle.len()).position(|w| w == needle))
            .map(|pos| start + pos);
        self.scanned = if found.is_some() { 0 } else { src.len() };
        found
    }
}

impl Decoder for FrameCodec {
    type Item = Message;
    type Error = ClusterError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        let Some(end) = self.find_terminator(&src[..]) else {
            if src.len() > self.max_length + TERMINATOR.len() {
                return Err(ClusterError::malformed(
                    "frame",
                    format!("no terminator within {} bytes", self.max_length),
                ));
            }
            return Ok(None);
        };
        let body = src.split_to(end);
        src.advance(TERMINATOR.len());
        let text = String::from_utf8_lossy(&body);
        Ok(Some(Message::new(parse_fields(&text))))
    }
}

impl Encoder<&Message> for FrameCodec {
    type Error = ClusterError;

    fn encode(&mut self, msg: &Message, dst: &mut BytesMut) -> Result<()> {
        if let Some(bad) = msg.fields().iter().find(|f| !is_valid_field(f)) {
            return Err(ClusterError::InvalidField(bad.clone()));
        }
        for field in msg.fields() {
            dst.put_slice(field.as_bytes());
            dst.put_u8(SEPARATOR as u8);
        }
        dst.put_slice(TERMINATOR.as_bytes());
        Ok(())
    }
}

/// Encodes a message into its wire bytes.
pub fn encode(msg: &Message) -> Result<Vec<u8>> {
    let mut buf = BytesMut::new();
    FrameCodec::new().encode(msg, &mut buf)?;
    Ok(buf.to_vec())
}

/// Reads framed messages from a byte stream in fixed-size chunks.
pub struct FrameReader<R> {
    inner: R,
    codec: FrameCodec,
    buffer: BytesMut,
    chunk: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, chunk_size: usize) -> Self {
        Self {
            inner,
            codec: FrameCodec::new(),
            buffer: BytesMut::with_capacity(chunk_size),
            chunk: vec![0; chunk_size.max(1)],
        }
    }

    /// Fails frames longer than `max_length` instead of buffering them.
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.codec.max_length = max_length;
        self
    }

    /// Next complete message, or `None` once the peer has closed the stream.
    ///
    /// Cancel safe: bytes are only moved into the frame buffer after a read completes.
    pub async fn next_message(&mut self) -> Result<Option<Message>> {
        loop {
            if let Some(msg) = self.codec.decode(&mut self.buffer)? {
                return Ok(Some(msg));
            }
            let n = self.inner.read(&mut self.chunk).await?;
            if n == 0 {
                if !self.buffer.is_empty() {
                    tracing::debug!(bytes = self.buffer.len(), "Dropping partial frame at end of stream");
                }
                return Ok(None);
            }
            self.buffer.extend_from_slice(&self.chunk[..n]);
        }
    }

    /// Hands out bytes that were read past the last frame, e.g. the start of a payload transfer.
    pub fn take_buffered(&mut self) -> BytesMut {
        self.codec.scanned = 0;
        self.buffer.split()
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }
}

/// Writes whole frames; a message is either written completely or not at all.
pub struct FrameWriter<W> {
    inner: W,
    codec: FrameCodec,
    buffer: BytesMut,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            codec: FrameCodec::new(),
            buffer: BytesMut::new(),
        }
    }

    pub async fn write_message(&mut self, msg: &Message) -> Result<()> {
        self.buffer.clear();
        self.codec.encode(msg, &mut self.buffer)?;
        self.inner.write_all(&self.buffer).await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.inner.flush().await?;
        Ok(())
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }
}
