//! A blocking parameter server.
//!
//! [`ParamServer`] accepts workers on a TCP listener and runs one session
//! thread per connection. A session reads a message, answers it, and loops
//! until the peer disconnects or sends something it cannot serve.
//!
//! Without lock mode every message takes the table's outer write lock, so
//! requests are served one at a time and pulls encode straight from views
//! into the table. In lock mode sessions share the outer read lock and
//! synchronize on the per-tensor locks inside the table.

use std::borrow::Cow;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use shardps_core::codec::{decode_exact, decode_view_exact, encode_to_vec, Writer};

use crate::checkpoint;
use crate::config::{ConnectionConfig, ServerConfig};
use crate::connection::TcpConnection;
use crate::error::{PsError, Result};
use crate::message::DistMessage;
use crate::pull::{encode_row_entries, PullRequest, RowLookupRequest};
use crate::table::ParameterTable;
use crate::tensor_map::TensorMap;

/// Handles application-defined messages.
pub trait UserHandler: Send + Sync {
    /// Handles the body of a user request or notification.
    ///
    /// The returned bytes become the body of the user response; they are
    /// discarded for notifications.
    fn handle(&self, table: &ParameterTable, body: &[u8]) -> Result<Vec<u8>>;
}

/// Answers a [`RowLookupRequest`] with the encoded
/// [`RowEntry`](crate::RowEntry) list.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowLookupHandler;

impl UserHandler for RowLookupHandler {
    fn handle(&self, table: &ParameterTable, body: &[u8]) -> Result<Vec<u8>> {
        let request: RowLookupRequest = decode_exact(body)?;
        let rows = table.lookup_rows(&request);
        let mut w = Writer::new();
        encode_row_entries(&mut w, &rows);
        Ok(w.as_slice().to_vec())
    }
}

/// A parameter server bound to its listen address.
pub struct ParamServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    shared: Arc<Shared>,
}

struct Shared {
    table: Arc<RwLock<ParameterTable>>,
    user_handler: Option<Arc<dyn UserHandler>>,
    lock_mode: bool,
    model_dir: Option<PathBuf>,
    connection: ConnectionConfig,
    seed: Option<u64>,
    sessions: AtomicU64,
    stop: AtomicBool,
    wake_addr: SocketAddr,
}

enum Action {
    Reply(DistMessage<'static>),
    Continue,
    Close,
    Stop,
}

/// A server running on its own thread.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    thread: JoinHandle<Result<()>>,
}

impl ServerHandle {
    /// Returns the address the server accepts on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the served table.
    pub fn table(&self) -> Arc<RwLock<ParameterTable>> {
        Arc::clone(&self.shared.table)
    }

    /// Stops accepting and waits for the accept loop to exit.
    pub fn shutdown(self) -> Result<()> {
        self.shared.request_stop();
        self.join()
    }

    /// Waits for the accept loop to exit.
    pub fn join(self) -> Result<()> {
        self.thread.join().unwrap_or_else(|_| {
            Err(PsError::ConnectionFailed {
                endpoint: self.local_addr.to_string(),
                message: "server thread panicked".to_string(),
            })
        })
    }
}

impl ParamServer {
    /// Validates `config` and binds its listen address.
    pub fn bind(config: ServerConfig, table: ParameterTable) -> Result<Self> {
        config.validate()?;
        let bind_error = |e: std::io::Error| PsError::ConnectionFailed {
            endpoint: config.listen.to_string(),
            message: e.to_string(),
        };
        let listener = TcpListener::bind(config.listen).map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;
        let wake_ip = match local_addr.ip() {
            IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
            ip => ip,
        };
        let shared = Shared {
            table: Arc::new(RwLock::new(table)),
            user_handler: None,
            lock_mode: config.lock_mode,
            model_dir: config.model_dir,
            connection: config.connection,
            seed: config.seed,
            sessions: AtomicU64::new(0),
            stop: AtomicBool::new(false),
            wake_addr: SocketAddr::new(wake_ip, local_addr.port()),
        };
        Ok(Self {
            listener,
            local_addr,
            shared: Arc::new(shared),
        })
    }

    /// Installs the handler for user messages.
    pub fn with_user_handler(mut self, handler: Arc<dyn UserHandler>) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.user_handler = Some(handler);
        }
        self
    }

    /// Returns the address the server accepts on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the served table.
    pub fn table(&self) -> Arc<RwLock<ParameterTable>> {
        Arc::clone(&self.shared.table)
    }

    /// Runs the accept loop on a new thread.
    pub fn spawn(self) -> ServerHandle {
        let local_addr = self.local_addr;
        let shared = Arc::clone(&self.shared);
        let thread = thread::spawn(move || self.serve());
        ServerHandle {
            local_addr,
            shared,
            thread,
        }
    }

    /// Accepts connections until a session receives a termination notice.
    ///
    /// Sessions still running when the loop exits keep serving until their
    /// peers disconnect.
    pub fn serve(&self) -> Result<()> {
        tracing::info!(
            addr = %self.local_addr,
            lock_mode = self.shared.lock_mode,
            "Parameter server listening"
        );
        for stream in self.listener.incoming() {
            if self.shared.stop.load(Ordering::Acquire) {
                break;
            }
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!("Failed to accept on {}: {}", self.local_addr, e);
                    continue;
                }
            };
            let conn = match TcpConnection::from_stream(stream, self.shared.connection.clone()) {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping connection");
                    continue;
                }
            };
            let session = self.shared.sessions.fetch_add(1, Ordering::Relaxed);
            let shared = Arc::clone(&self.shared);
            thread::spawn(move || shared.run_session(conn, session));
        }
        tracing::info!(addr = %self.local_addr, "Parameter server stopped");
        Ok(())
    }
}

impl Shared {
    fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
        // Unblocks the accept loop.
        let _ = TcpStream::connect(self.wake_addr);
    }

    fn session_rng(&self, session: u64) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(session)),
            None => StdRng::from_entropy(),
        }
    }

    fn run_session(&self, mut conn: TcpConnection, session: u64) {
        let endpoint = conn.endpoint();
        tracing::debug!(endpoint = %endpoint, session, "Session started");
        let mut rng = self.session_rng(session);
        loop {
            let action = match conn.read_message() {
                Ok(message) => self.handle(&mut rng, &message).unwrap_or_else(|e| {
                    tracing::error!(endpoint = %endpoint, error = %e, "Failed to handle message");
                    Action::Close
                }),
                Err(e) => {
                    tracing::debug!(endpoint = %endpoint, error = %e, "Session ended");
                    return;
                }
            };
            match action {
                Action::Reply(reply) => {
                    if conn.write_message(&reply).is_err() {
                        return;
                    }
                }
                Action::Continue => {}
                Action::Close => {
                    conn.close();
                    return;
                }
                Action::Stop => {
                    tracing::info!(endpoint = %endpoint, "Received termination notice");
                    self.request_stop();
                    return;
                }
            }
        }
    }

    fn handle(&self, rng: &mut dyn RngCore, message: &DistMessage<'_>) -> Result<Action> {
        Ok(match message {
            DistMessage::EchoRequest { buf } => Action::Reply(DistMessage::EchoResponse {
                buf: Cow::Owned(buf.to_vec()),
            }),
            DistMessage::HeartBeatNotify => Action::Continue,
            DistMessage::PullRequest { buf } => {
                let request: PullRequest = decode_exact(buf)?;
                Action::Reply(DistMessage::PullResponse {
                    buf: Cow::Owned(self.pull(rng, &request)?),
                })
            }
            DistMessage::PushNotify { buf } => {
                let delta: TensorMap<'_> = decode_view_exact(buf)?;
                if self.lock_mode {
                    self.table.read().update_locked(&delta)?;
                } else {
                    self.table.write().update(&delta)?;
                }
                Action::Continue
            }
            DistMessage::ModelSaveRequest { epoch, timestamp, .. } => {
                match &self.model_dir {
                    Some(dir) => {
                        let dir = dir.join(timestamp);
                        checkpoint::save(&self.table.read(), &dir)?;
                        tracing::info!(epoch, path = %dir.display(), "Model saved");
                    }
                    None => tracing::warn!(epoch, "Ignoring model save request without a model dir"),
                }
                Action::Reply(DistMessage::ModelSaveResponse)
            }
            DistMessage::TerminationNotify => Action::Stop,
            DistMessage::UserRequest { buf } => {
                let body = match &self.user_handler {
                    Some(handler) => handler.handle(&self.table.read(), buf)?,
                    None => {
                        tracing::warn!("Answering user request without a handler");
                        Vec::new()
                    }
                };
                Action::Reply(DistMessage::UserResponse {
                    buf: Cow::Owned(body),
                })
            }
            DistMessage::UserNotify { buf } => {
                if let Some(handler) = &self.user_handler {
                    handler.handle(&self.table.read(), buf)?;
                }
                Action::Continue
            }
            other => {
                tracing::warn!(kind = ?other.message_type(), "Unexpected message, closing");
                Action::Close
            }
        })
    }

    fn pull(&self, rng: &mut dyn RngCore, request: &PullRequest) -> Result<Vec<u8>> {
        if self.lock_mode {
            let table = self.table.read();
            Ok(encode_to_vec(&table.pull_locked(rng, request)?))
        } else {
            let mut table = self.table.write();
            let encoded = encode_to_vec(&table.pull(rng, request)?);
            Ok(encoded)
        }
    }
}
