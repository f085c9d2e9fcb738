//! scatter-gather-core: a client-side virtual block-file driver
//!
//! Files are presented to callers as seekable byte streams, but their bytes
//! live in fixed-size 1024-byte blocks scattered over remote storage nodes.
//! The driver turns open/read/write/seek/close calls into exchanges of a
//! small binary block protocol with a remote service.
//!
//! # Architecture
//!
//! - `packet`: protocol constants and the wire codec
//! - `sequence`: last sequence number seen per remote node
//! - `cache`: fixed-capacity LRU cache of remote blocks
//! - `file_table`: per-path block lists, sizes and positions
//! - `transport`: the synchronous post primitive the driver talks through
//! - `driver`: the block-file driver itself
//! - `service`: an in-process block service for tests and simulation
//! - `metrics`: counters describing what a driver did
//!
//! # Design Principles
//!
//! - **No panics**: All errors are structured and recoverable
//! - **No globals**: All state hangs off one `Driver` value
//! - **Deterministic**: The simulated service uses seeded randomness
//! - **Observable**: Counters and `tracing` events for every exchange

pub mod cache;
pub mod driver;
pub mod error;
pub mod file_table;
pub mod metrics;
pub mod packet;
pub mod sequence;
pub mod service;
pub mod transport;

// Re-export commonly used types
pub use driver::{Driver, DriverConfig, ShutdownReport};
pub use error::{Error, Result};
pub use file_table::{FileHandle, FileStat};
pub use packet::BLOCK_SIZE;
pub use service::{BlockService, ServiceConfig};
pub use transport::Transport;
