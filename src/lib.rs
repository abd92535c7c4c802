//! netrate: point-to-point TCP transfer rate benchmark.
//!
//! A host pre-generates a pool of random payloads after checking it has the
//! memory to hold them; a client fetches them one per connection, timing each
//! transfer, and reduces the samples to min/max/average throughput and loss.
//!
//! Both sides speak a fixed-width 32-byte envelope protocol (see [`envelope`]).

pub mod client;
pub mod config;
pub mod envelope;
pub mod host;
pub mod memory;
pub mod pool;
pub mod report;
pub mod size;
pub mod stats;

pub use client::{ClientError, ClientRunner, RunReport};
pub use config::{ClientConfig, Config, ConfigError, HostConfig, Mode};
pub use host::{Host, HostSession, SessionError, SessionState};
pub use memory::{MemoryGate, MemoryProbe, ProbeError, SelfTest};
pub use stats::{CycleSample, FailedCyclePolicy, RunStatistics, RunStatus};
