//! Benchmark client.
//!
//! A run is an init handshake followed by `cycles` fetch round-trips, each on
//! its own connection. A failing handshake aborts the run; a failing fetch
//! only marks that cycle as failed.

use crate::config::ClientConfig;
use crate::envelope::{EnvelopeError, Request, Status, ENVELOPE_WIDTH};
use crate::stats::{CycleSample, RunStatistics, RunStatus};
use bytes::BytesMut;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Scratch buffer size for draining payloads.
const RECV_CHUNK: usize = 64 * 1024;

/// Transport or protocol failure on the client side.
#[derive(Debug)]
pub enum ClientError {
    /// Could not resolve or connect to the host
    Connect(String, io::Error),
    /// Send or receive failed
    Io(io::Error),
    /// Host reply or local request could not be framed
    Envelope(EnvelopeError),
    /// Connection closed before the whole payload arrived
    PartialPayload { received: u64, expected: u64 },
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Connect(addr, e) => write!(f, "Failed to connect to {}: {}", addr, e),
            ClientError::Io(e) => write!(f, "Connection error: {}", e),
            ClientError::Envelope(e) => write!(f, "{}", e),
            ClientError::PartialPayload { received, expected } => write!(
                f,
                "Connection closed after {} of {} payload bytes",
                received, expected
            ),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<io::Error> for ClientError {
    fn from(e: io::Error) -> Self {
        ClientError::Io(e)
    }
}

impl From<EnvelopeError> for ClientError {
    fn from(e: EnvelopeError) -> Self {
        ClientError::Envelope(e)
    }
}

/// Everything a renderer needs about a finished run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub status: RunStatus,
    /// One sample per attempted cycle, in cycle order
    pub samples: Vec<CycleSample>,
    pub stats: RunStatistics,
}

/// Drives one benchmark run against a host.
pub struct ClientRunner {
    config: ClientConfig,
}

impl ClientRunner {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Run the handshake and every fetch cycle.
    ///
    /// `on_cycle` sees each sample as soon as it is recorded.
    pub fn run<F: FnMut(&CycleSample)>(&self, mut on_cycle: F) -> Result<RunReport, ClientError> {
        let cycles = self.config.cycles;
        let expected = self.config.payload_size();

        let init = Request::Init {
            cycles,
            multiplier: self.config.multiplier,
            unit: self.config.unit,
        };
        match self.handshake(init)? {
            Status::SelfTestFail => {
                info!("Host rejected the run: insufficient memory");
                return Ok(RunReport {
                    status: RunStatus::Rejected,
                    samples: Vec::new(),
                    stats: RunStatistics::rejected(cycles),
                });
            }
            Status::SelfTestPass => debug!("Host self-test passed"),
        }

        let mut samples = Vec::with_capacity(cycles as usize);
        for index in 1..=cycles {
            let sample = self.cycle(index, expected);
            on_cycle(&sample);
            samples.push(sample);
        }

        let stats =
            RunStatistics::aggregate(&samples, expected, cycles, self.config.failed_cycle_policy);
        Ok(RunReport {
            status: RunStatus::Completed,
            samples,
            stats,
        })
    }

    /// Send the init envelope and read the host's status.
    pub fn handshake(&self, init: Request) -> Result<Status, ClientError> {
        let envelope = init.encode()?;
        let mut stream = self.connect()?;
        stream.write_all(&envelope)?;

        let mut reply = [0u8; ENVELOPE_WIDTH];
        stream.read_exact(&mut reply)?;
        Ok(Status::decode(&reply)?)
    }

    /// One timed fetch; failures become a zero-byte sample.
    fn cycle(&self, index: u32, expected: u64) -> CycleSample {
        let started = Instant::now();
        match self.fetch(index, expected) {
            Ok(sample) => {
                debug!(index, bytes = sample.bytes_received, elapsed = ?sample.elapsed, "Cycle complete");
                sample
            }
            Err(e) => {
                warn!(index, error = %e, "Cycle failed");
                CycleSample::failure(index, started.elapsed(), e.to_string())
            }
        }
    }

    fn fetch(&self, index: u32, expected: u64) -> Result<CycleSample, ClientError> {
        let envelope = Request::Fetch { index }.encode()?;
        let mut stream = self.connect()?;
        stream.write_all(&envelope)?;

        let timer = Instant::now();
        let received = receive_payload(&mut stream, expected)?;
        let elapsed = timer.elapsed();

        if received < expected {
            return Err(ClientError::PartialPayload { received, expected });
        }
        Ok(CycleSample::success(index, elapsed, received))
    }

    fn connect(&self) -> Result<TcpStream, ClientError> {
        let target = format!("{}:{}", self.config.host, self.config.port);
        let connect_err = |e: io::Error| ClientError::Connect(target.clone(), e);

        let stream = match self.config.connect_timeout {
            None => TcpStream::connect((self.config.host.as_str(), self.config.port))
                .map_err(connect_err)?,
            Some(timeout) => {
                let mut last = io::Error::new(io::ErrorKind::NotFound, "no addresses resolved");
                let mut connected = None;
                let addrs = (self.config.host.as_str(), self.config.port)
                    .to_socket_addrs()
                    .map_err(connect_err)?;
                for addr in addrs {
                    match TcpStream::connect_timeout(&addr, timeout) {
                        Ok(stream) => {
                            connected = Some(stream);
                            break;
                        }
                        Err(e) => last = e,
                    }
                }
                connected.ok_or_else(|| connect_err(last))?
            }
        };

        stream.set_read_timeout(self.config.read_timeout)?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Read until `expected` bytes have arrived or the peer closes.
///
/// Returns the number of bytes received, which is less than `expected` only
/// on early close.
fn receive_payload<R: Read>(stream: &mut R, expected: u64) -> Result<u64, ClientError> {
    let mut buf = BytesMut::zeroed(RECV_CHUNK);
    let mut received = 0u64;

    while received < expected {
        let want = (expected - received).min(RECV_CHUNK as u64) as usize;
        match stream.read(&mut buf[..want]) {
            Ok(0) => break,
            Ok(n) => received += n as u64,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(received)
}
