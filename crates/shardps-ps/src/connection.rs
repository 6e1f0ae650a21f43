//! Framed blocking TCP connections.
//!
//! Every message travels as `{u64 length}{payload}`, where `length` counts
//! the payload bytes only and the payload is an encoded [`DistMessage`].
//! Decoded messages borrow their bodies from the connection's receive
//! buffer, so a message must be dropped before the next read.
//!
//! Any I/O failure closes the socket and surfaces as
//! [`PsError::ConnectionFailed`]; a complete frame that does not decode
//! closes it with [`PsError::ProtocolDecode`].

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread;

use bytes::{Buf, BytesMut};
use shardps_core::codec::{Encode, Writer};

use crate::config::{ConnectionConfig, INITIAL_BUF_BYTES, MAX_IDLE_BUF_BYTES};
use crate::error::{PsError, Result};
use crate::message::DistMessage;

/// Size of the length prefix ahead of every payload.
pub const FRAME_HEADER_BYTES: usize = std::mem::size_of::<u64>();

/// Outcome of [`TcpConnection::try_read`].
#[derive(Debug, PartialEq)]
pub enum ReadStatus<'a> {
    /// No complete frame is buffered yet.
    NeedMore,
    /// A complete message.
    Ready(DistMessage<'a>),
}

/// One framed connection to a peer.
#[derive(Debug)]
pub struct TcpConnection {
    endpoint: SocketAddr,
    stream: Option<TcpStream>,
    config: ConnectionConfig,
    in_buf: BytesMut,
    pending_consume: usize,
    out: Writer,
}

fn connection_failed(endpoint: SocketAddr, message: impl Into<String>) -> PsError {
    PsError::ConnectionFailed {
        endpoint: endpoint.to_string(),
        message: message.into(),
    }
}

impl TcpConnection {
    /// Connects to `endpoint` with a single attempt.
    pub fn connect(endpoint: SocketAddr, config: ConnectionConfig) -> Result<Self> {
        match TcpStream::connect(endpoint) {
            Ok(stream) => Self::with_stream(endpoint, stream, config),
            Err(e) => {
                tracing::warn!("Failed to connect to {}: {}", endpoint, e);
                Err(connection_failed(endpoint, e.to_string()))
            }
        }
    }

    /// Connects to `endpoint`, making exactly `config.retries` attempts and
    /// sleeping `config.retry_backoff()` between two of them.
    pub fn connect_retry(endpoint: SocketAddr, config: ConnectionConfig) -> Result<Self> {
        let retries = config.retries.max(1);
        let mut last_error = String::new();
        for attempt in 1..=retries {
            match Self::connect(endpoint, config.clone()) {
                Ok(conn) => return Ok(conn),
                Err(e) => last_error = e.to_string(),
            }
            if attempt < retries {
                thread::sleep(config.retry_backoff());
            }
        }
        tracing::error!("Failed to connect to {} after {} retries", endpoint, retries);
        Err(connection_failed(
            endpoint,
            format!("gave up after {} attempts: {}", retries, last_error),
        ))
    }

    /// Wraps an accepted stream.
    pub fn from_stream(stream: TcpStream, config: ConnectionConfig) -> Result<Self> {
        let endpoint = stream.peer_addr().map_err(|e| PsError::ConnectionFailed {
            endpoint: "<unknown>".to_string(),
            message: e.to_string(),
        })?;
        Self::with_stream(endpoint, stream, config)
    }

    fn with_stream(endpoint: SocketAddr, stream: TcpStream, config: ConnectionConfig) -> Result<Self> {
        let configure = || -> std::io::Result<()> {
            stream.set_nodelay(config.nodelay)?;
            stream.set_read_timeout(config.read_timeout())?;
            stream.set_write_timeout(config.write_timeout())
        };
        configure().map_err(|e| connection_failed(endpoint, e.to_string()))?;
        tracing::debug!(endpoint = %endpoint, "Connected");
        Ok(Self {
            endpoint,
            stream: Some(stream),
            config,
            in_buf: BytesMut::with_capacity(INITIAL_BUF_BYTES),
            pending_consume: 0,
            out: Writer::new(),
        })
    }

    /// Returns the peer address.
    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// Returns `true` until the connection has been closed.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Returns the receive buffer's current capacity in bytes.
    pub fn buffer_capacity(&self) -> usize {
        self.in_buf.capacity()
    }

    /// Closes the socket. Later operations fail with
    /// [`PsError::ConnectionFailed`].
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!(endpoint = %self.endpoint, "Closed connection");
        }
    }

    /// Frames and sends `message`, looping until every byte is written.
    pub fn write_message(&mut self, message: &DistMessage<'_>) -> Result<()> {
        self.out.clear();
        self.out.put_u64(0);
        message.encode(&mut self.out);
        let len = (self.out.len() - FRAME_HEADER_BYTES) as u64;
        self.out.patch_u64(0, len)?;

        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| connection_failed(self.endpoint, "not connected"))?;
        if let Err(e) = stream.write_all(self.out.as_slice()) {
            tracing::error!("Failed to write to {}: {}", self.endpoint, e);
            self.stream = None;
            return Err(connection_failed(self.endpoint, e.to_string()));
        }
        Ok(())
    }

    /// Returns the next message if a complete frame is already buffered.
    ///
    /// Never touches the socket.
    pub fn try_read(&mut self) -> Result<ReadStatus<'_>> {
        self.consume_pending();
        match self.ready_frame_len()? {
            Some(len) => self.decode_ready(len).map(ReadStatus::Ready),
            None => Ok(ReadStatus::NeedMore),
        }
    }

    /// Blocks until a complete message has arrived and returns it.
    pub fn read_message(&mut self) -> Result<DistMessage<'_>> {
        self.consume_pending();
        loop {
            if let Some(len) = self.ready_frame_len()? {
                return self.decode_ready(len);
            }
            self.fill_once()?;
        }
    }

    /// Sends `message` and, if its type expects one, waits for the reply.
    pub fn rpc(&mut self, message: &DistMessage<'_>) -> Result<Option<DistMessage<'_>>> {
        self.write_message(message)?;
        if message.has_response() {
            self.read_message().map(Some)
        } else {
            Ok(None)
        }
    }

    fn consume_pending(&mut self) {
        if self.pending_consume > 0 {
            self.in_buf.advance(self.pending_consume);
            self.pending_consume = 0;
        }
        if self.in_buf.is_empty() && self.in_buf.capacity() > MAX_IDLE_BUF_BYTES {
            self.in_buf = BytesMut::with_capacity(INITIAL_BUF_BYTES);
        }
    }

    fn ready_frame_len(&mut self) -> Result<Option<usize>> {
        if self.in_buf.len() < FRAME_HEADER_BYTES {
            return Ok(None);
        }
        let mut header = [0u8; FRAME_HEADER_BYTES];
        header.copy_from_slice(&self.in_buf[..FRAME_HEADER_BYTES]);
        let len = u64::from_ne_bytes(header);
        if len > self.config.max_frame_size {
            tracing::error!(
                "Failed to read from {}: frame of {} bytes exceeds the limit of {}",
                self.endpoint,
                len,
                self.config.max_frame_size
            );
            self.close();
            return Err(connection_failed(
                self.endpoint,
                format!("frame of {} bytes exceeds the limit", len),
            ));
        }
        let len = len as usize;
        Ok((self.in_buf.len() - FRAME_HEADER_BYTES >= len).then_some(len))
    }

    fn decode_ready(&mut self, len: usize) -> Result<DistMessage<'_>> {
        let Self {
            endpoint,
            stream,
            in_buf,
            pending_consume,
            ..
        } = self;
        *pending_consume = FRAME_HEADER_BYTES + len;
        let payload = &in_buf[FRAME_HEADER_BYTES..FRAME_HEADER_BYTES + len];
        match DistMessage::decode_payload(payload) {
            Ok(message) => Ok(message),
            Err(source) => {
                tracing::error!("Failed to decode message from {}: {}", endpoint, source);
                *stream = None;
                Err(PsError::ProtocolDecode {
                    endpoint: endpoint.to_string(),
                    source,
                })
            }
        }
    }

    fn fill_once(&mut self) -> Result<usize> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(connection_failed(self.endpoint, "not connected"));
        };
        if self.in_buf.len() == self.in_buf.capacity() {
            let grow = self.in_buf.capacity().max(INITIAL_BUF_BYTES);
            self.in_buf.reserve(grow);
        }
        let start = self.in_buf.len();
        let end = self.in_buf.capacity().min(start + INITIAL_BUF_BYTES);
        self.in_buf.resize(end, 0);
        let result = loop {
            match stream.read(&mut self.in_buf[start..]) {
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                other => break other,
            }
        };
        match result {
            Ok(0) => {
                self.in_buf.truncate(start);
                tracing::debug!(endpoint = %self.endpoint, "Peer closed the connection");
                self.stream = None;
                Err(connection_failed(self.endpoint, "connection closed by peer"))
            }
            Ok(n) => {
                self.in_buf.truncate(start + n);
                Ok(n)
            }
            Err(e) => {
                self.in_buf.truncate(start);
                tracing::error!("Failed to read from {}: {}", self.endpoint, e);
                self.stream = None;
                Err(connection_failed(self.endpoint, e.to_string()))
            }
        }
    }
}

/// Connections to a fixed list of peers.
#[derive(Debug, Default)]
pub struct TcpConnections {
    conns: Vec<TcpConnection>,
}

impl TcpConnections {
    /// Connects to every endpoint with a single attempt each.
    pub fn connect(endpoints: &[SocketAddr], config: &ConnectionConfig) -> Result<Self> {
        let conns = endpoints
            .iter()
            .map(|&endpoint| TcpConnection::connect(endpoint, config.clone()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { conns })
    }

    /// Connects to every endpoint with [`TcpConnection::connect_retry`].
    pub fn connect_retry(endpoints: &[SocketAddr], config: &ConnectionConfig) -> Result<Self> {
        let conns = endpoints
            .iter()
            .map(|&endpoint| TcpConnection::connect_retry(endpoint, config.clone()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { conns })
    }

    /// Returns the number of connections.
    pub fn len(&self) -> usize {
        self.conns.len()
    }

    /// Returns `true` if there are no connections.
    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    /// Returns connection `index`.
    pub fn get(&self, index: usize) -> Option<&TcpConnection> {
        self.conns.get(index)
    }

    /// Returns connection `index` mutably.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut TcpConnection> {
        self.conns.get_mut(index)
    }

    /// Sends `requests[i]` to peer `i` for every `Some`, then collects the
    /// replies.
    ///
    /// All messages are written before any reply is read. Slot `i` of the
    /// result holds peer `i`'s reply, or `None` if nothing was sent or the
    /// message type has no response.
    ///
    /// # Errors
    ///
    /// Returns [`PsError::ConfigValidation`] if `requests` does not have one
    /// slot per connection, and the first connection error otherwise.
    pub fn rpc(&mut self, requests: &[Option<DistMessage<'_>>]) -> Result<Vec<Option<DistMessage<'_>>>> {
        if requests.len() != self.conns.len() {
            return Err(PsError::config(format!(
                "{} requests for {} connections",
                requests.len(),
                self.conns.len()
            )));
        }
        for (conn, request) in self.conns.iter_mut().zip(requests) {
            if let Some(message) = request {
                conn.write_message(message)?;
            }
        }
        self.conns
            .iter_mut()
            .zip(requests)
            .map(|(conn, request)| match request {
                Some(message) if message.has_response() => TcpConnection::read_message(conn).map(Some),
                _ => Ok(None),
            })
            .collect()
    }
}
