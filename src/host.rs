//! Benchmark host.
//!
//! The host serves one connection at a time. Each connection carries exactly
//! one request envelope:
//! - init (cycle 0): discard any previous pool, run the memory self-test,
//!   generate the payload pool and reply with a status envelope
//! - fetch (cycle >= 1): send the addressed payload block whole
//!
//! ```text
//! Idle -> AwaitingInit -> PoolReady -> Serving -> Idle
//! Idle -> AwaitingInit -> Rejected
//! ```
//!
//! `Rejected` holds no pool and behaves like `Idle`: it lasts until the next
//! init, and any fetch in the meantime is a `NoActiveSession` violation.
//!
//! Session state lives in [`HostSession`], owned by the [`Host`] listener loop
//! and lent to each connection handler. Serial accept is what keeps a single
//! session consistent, so there is no locking.

use crate::config::HostConfig;
use crate::envelope::{EnvelopeError, Request, Status, ENVELOPE_WIDTH};
use crate::memory::{probe_for_platform, FixedProbe, MemoryGate, MemoryProbe, SelfTest};
use crate::pool::{PayloadPool, PoolError};
use crate::size::{format_bytes, payload_size, SizeUnit};
use bytes::Bytes;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Host session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No active pool
    Idle,
    /// Init received, self-test in progress
    AwaitingInit,
    /// Pool generated, no block served yet
    PoolReady,
    /// At least one block served, more remaining
    Serving,
    /// Self-test failed for the last init; no pool
    Rejected,
}

/// What to send back on the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Status(Status),
    Payload(Bytes),
}

/// Errors while serving a connection. The connection is closed without a reply.
#[derive(Debug)]
pub enum SessionError {
    /// Request envelope could not be decoded
    MalformedEnvelope(EnvelopeError),
    /// Fetch with no accepted init
    NoActiveSession(u32),
    /// Fetch for a block that does not exist or was already served
    BlockUnavailable(PoolError),
    /// Transport failure
    Io(io::Error),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::MalformedEnvelope(e) => write!(f, "{}", e),
            SessionError::NoActiveSession(index) => {
                write!(f, "Fetch for block {} with no active session", index)
            }
            SessionError::BlockUnavailable(e) => write!(f, "{}", e),
            SessionError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<EnvelopeError> for SessionError {
    fn from(e: EnvelopeError) -> Self {
        SessionError::MalformedEnvelope(e)
    }
}

impl From<PoolError> for SessionError {
    fn from(e: PoolError) -> Self {
        SessionError::BlockUnavailable(e)
    }
}

impl From<io::Error> for SessionError {
    fn from(e: io::Error) -> Self {
        SessionError::Io(e)
    }
}

/// Per-host benchmark session: the payload pool and its state machine.
pub struct HostSession {
    state: SessionState,
    pool: Option<PayloadPool>,
    gate: MemoryGate,
    /// Runs whose pool was fully drained
    completed_runs: u64,
}

impl HostSession {
    pub fn new(gate: MemoryGate) -> Self {
        Self {
            state: SessionState::Idle,
            pool: None,
            gate,
            completed_runs: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn pool(&self) -> Option<&PayloadPool> {
        self.pool.as_ref()
    }

    pub fn completed_runs(&self) -> u64 {
        self.completed_runs
    }

    /// Apply one decoded request to the session.
    pub fn handle_request(&mut self, request: Request) -> Result<Reply, SessionError> {
        match request {
            Request::Init {
                cycles,
                multiplier,
                unit,
            } => Ok(Reply::Status(self.init(cycles, multiplier, unit))),
            Request::Fetch { index } => self.fetch(index).map(Reply::Payload),
        }
    }

    fn init(&mut self, cycles: u32, multiplier: u64, unit: SizeUnit) -> Status {
        self.state = SessionState::AwaitingInit;
        if let Some(old) = self.pool.take() {
            info!(
                remaining = old.remaining(),
                "Discarding pool from interrupted run"
            );
        }

        let block_size = payload_size(unit, multiplier)
            .and_then(|size| usize::try_from(size).ok());
        let required = block_size.and_then(|size| PayloadPool::footprint(cycles, size as u64));

        match (self.gate.self_test(required), block_size) {
            (SelfTest::Pass, Some(size)) => {
                info!(
                    cycles,
                    block = %format_bytes(size as f64),
                    "Memory self-test passed, generating payload pool"
                );
                self.pool = Some(PayloadPool::generate(cycles as usize, size));
                self.state = SessionState::PoolReady;
                Status::SelfTestPass
            }
            (outcome, _) => {
                match outcome {
                    SelfTest::ProbeUnavailable(reason) => {
                        warn!(%reason, "Memory self-test failed, probe unavailable")
                    }
                    _ => warn!(
                        ?required,
                        headroom_percent = self.gate.headroom_percent(),
                        "Memory self-test failed"
                    ),
                }
                self.state = SessionState::Rejected;
                Status::SelfTestFail
            }
        }
    }

    fn fetch(&mut self, index: u32) -> Result<Bytes, SessionError> {
        let pool = self
            .pool
            .as_mut()
            .ok_or(SessionError::NoActiveSession(index))?;

        let block = pool.take(index)?;
        debug!(
            index,
            total = pool.len(),
            remaining = pool.remaining(),
            "Serving payload block"
        );

        if pool.is_exhausted() {
            info!(blocks = pool.len(), "Payload pool drained");
            self.pool = None;
            self.state = SessionState::Idle;
            self.completed_runs += 1;
        } else {
            self.state = SessionState::Serving;
        }
        Ok(block)
    }

    /// Read one envelope from `stream`, apply it and write the reply.
    pub fn serve_connection<S: Read + Write>(&mut self, stream: &mut S) -> Result<(), SessionError> {
        let mut buf = [0u8; ENVELOPE_WIDTH];
        stream.read_exact(&mut buf)?;
        trace!(envelope = %String::from_utf8_lossy(&buf), "Received envelope");

        let request = Request::decode(&buf)?;
        match self.handle_request(request)? {
            Reply::Status(status) => stream.write_all(&status.encode()?)?,
            Reply::Payload(block) => stream.write_all(&block)?,
        }
        stream.flush()?;
        Ok(())
    }
}

/// TCP listener driving a [`HostSession`].
pub struct Host {
    listener: TcpListener,
    session: HostSession,
    continuous: bool,
}

impl Host {
    /// Bind the listener and select the memory probe.
    pub fn bind(config: &HostConfig) -> io::Result<Self> {
        let addr = resolve(&config.host, config.port)?;
        let listener = create_listener(addr)?;

        let probe: Arc<dyn MemoryProbe> = match config.available_memory {
            Some(bytes) => Arc::new(FixedProbe(bytes)),
            None => probe_for_platform(),
        };
        info!(
            addr = %listener.local_addr()?,
            probe = probe.name(),
            headroom_percent = config.headroom_percent,
            continuous = config.continuous,
            "Host listening"
        );

        Ok(Self {
            listener,
            session: HostSession::new(MemoryGate::new(probe, config.headroom_percent)),
            continuous: config.continuous,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept and serve connections one at a time.
    ///
    /// Returns after the first fully drained run unless in continuous mode.
    pub fn run(&mut self) -> io::Result<()> {
        loop {
            let (mut stream, peer) = match self.listener.accept() {
                Ok(conn) => conn,
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    continue;
                }
            };
            debug!(peer = %peer, "New connection");

            let runs_before = self.session.completed_runs();
            if let Err(e) = self.session.serve_connection(&mut stream) {
                warn!(peer = %peer, error = %e, "Closing connection without reply");
            }
            drop(stream);

            if !self.continuous && self.session.completed_runs() > runs_before {
                info!("Run complete, host stopping");
                return Ok(());
            }
        }
    }
}

fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    (host, port).to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("could not resolve {}:{}", host, port),
        )
    })
}

/// Blocking listener with `SO_REUSEADDR` and a backlog of one.
fn create_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1)?;

    Ok(socket.into())
}
