//! Payload framing over HTTP messages.
//!
//! # Wire Format
//! ```text
//! x-seq: <decimal sequence, > 0>
//! content-length: <n>
//!
//! <n raw bytes>
//! ```
//! A message with an empty body carries no payload, whatever its headers say.

use std::io;
use std::time::Duration;

use axum::http::{header, HeaderMap, HeaderValue, Request, Response};
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::payload::error::PayloadError;

/// Header carrying the payload sequence number.
pub const SEQ_HEADER: &str = "x-seq";

/// Maximum number of bytes taken from a socket per payload.
pub const BUFFER_SIZE: usize = 100 * 1024;

/// Largest sequence that survives the signed decimal `x-seq` header.
pub const MAX_SEQUENCE: u64 = i64::MAX as u64;

/// A sequence-numbered chunk of tunnel data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelPayload {
    sequence: u64,
    data: Bytes,
}

/// Result of parsing an inbound HTTP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Payload(TunnelPayload),
    /// The message had an empty body.
    NoPayload,
}

impl Received {
    pub fn into_payload(self) -> Option<TunnelPayload> {
        match self {
            Received::Payload(payload) => Some(payload),
            Received::NoPayload => None,
        }
    }
}

/// Result of a bounded read from a byte source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Data(Bytes),
    /// Nothing arrived within the wait. Callers poll again.
    TimedOut,
}

/// An HTTP message a payload can be written into.
pub trait OutboundMessage {
    fn headers_mut(&mut self) -> &mut HeaderMap;
    fn set_body(&mut self, body: Bytes);
}

/// A fully buffered HTTP message a payload can be read from.
pub trait InboundMessage {
    fn headers(&self) -> &HeaderMap;
    fn body(&self) -> &Bytes;
}

impl<B: From<Bytes>> OutboundMessage for Request<B> {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        Request::headers_mut(self)
    }

    fn set_body(&mut self, body: Bytes) {
        *self.body_mut() = B::from(body);
    }
}

impl<B: From<Bytes>> OutboundMessage for Response<B> {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        Response::headers_mut(self)
    }

    fn set_body(&mut self, body: Bytes) {
        *self.body_mut() = B::from(body);
    }
}

impl InboundMessage for Request<Bytes> {
    fn headers(&self) -> &HeaderMap {
        Request::headers(self)
    }

    fn body(&self) -> &Bytes {
        Request::body(self)
    }
}

impl InboundMessage for Response<Bytes> {
    fn headers(&self) -> &HeaderMap {
        Response::headers(self)
    }

    fn body(&self) -> &Bytes {
        Response::body(self)
    }
}

impl TunnelPayload {
    /// Create a payload. The sequence must lie in `1..=MAX_SEQUENCE`.
    pub fn new(sequence: u64, data: Bytes) -> Result<Self, PayloadError> {
        if sequence == 0 || sequence > MAX_SEQUENCE {
            return Err(PayloadError::InvalidSequence);
        }
        Ok(Self { sequence, data })
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Write this payload into an outbound message.
    pub fn assign_to<M: OutboundMessage + ?Sized>(&self, message: &mut M) {
        let headers = message.headers_mut();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(self.data.len()));
        headers.insert(SEQ_HEADER, HeaderValue::from(self.sequence));
        message.set_body(self.data.clone());
    }

    /// Parse the payload carried by an inbound message.
    pub fn get<M: InboundMessage + ?Sized>(message: &M) -> Result<Received, PayloadError> {
        let body = message.body();
        if body.is_empty() {
            return Ok(Received::NoPayload);
        }
        let value = message
            .headers()
            .get(SEQ_HEADER)
            .ok_or(PayloadError::MissingSequenceHeader)?;
        let sequence = parse_sequence(value)?;
        Ok(Received::Payload(Self::new(sequence, body.clone())?))
    }

    /// Copy the payload bytes into `writer`.
    pub async fn write_to<W>(&self, writer: &mut W) -> io::Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        writer.write_all(&self.data).await?;
        writer.flush().await
    }

    /// Lowercase hex dump of the payload bytes.
    pub fn to_hex_string(&self) -> String {
        hex::encode(&self.data)
    }

    /// Trace a payload received over HTTP.
    pub fn log_incoming(&self) {
        self.log('<');
    }

    /// Trace a payload sent over HTTP.
    pub fn log_outgoing(&self) {
        self.log('>');
    }

    fn log(&self, direction: char) {
        if tracing::enabled!(tracing::Level::TRACE) {
            tracing::trace!(
                direction = %direction,
                sequence = self.sequence,
                len = self.data.len(),
                data = %self.to_hex_string(),
                "Tunnel payload"
            );
        }
    }
}

fn parse_sequence(value: &HeaderValue) -> Result<u64, PayloadError> {
    let text = value.to_str().map_err(|_| {
        PayloadError::MalformedSequenceHeader(String::from_utf8_lossy(value.as_bytes()).into_owned())
    })?;
    let sequence: i64 = text
        .trim()
        .parse()
        .map_err(|_| PayloadError::MalformedSequenceHeader(text.to_string()))?;
    u64::try_from(sequence)
        .ok()
        .filter(|s| *s > 0)
        .ok_or(PayloadError::InvalidSequence)
}

/// Read up to [`BUFFER_SIZE`] bytes, waiting at most `wait`.
///
/// A wait that elapses, or a source reporting `TimedOut`/`WouldBlock`, yields
/// [`ReadOutcome::TimedOut`]. End of stream is [`PayloadError::TargetClosed`].
pub async fn read_payload_data<R>(reader: &mut R, wait: Duration) -> Result<ReadOutcome, PayloadError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);
    match tokio::time::timeout(wait, reader.read_buf(&mut buffer)).await {
        Err(_) => Ok(ReadOutcome::TimedOut),
        Ok(Err(e)) if is_timeout(&e) => Ok(ReadOutcome::TimedOut),
        Ok(Err(e)) => Err(PayloadError::Io(e)),
        Ok(Ok(0)) => Err(PayloadError::TargetClosed),
        Ok(Ok(_)) => Ok(ReadOutcome::Data(buffer.freeze())),
    }
}

fn is_timeout(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}
