//! grepmux - a multiplexing front end over one shared codesearch backend.
//!
//! Many remote callers share a single already-indexed backend search process.
//! Each transport connection gets a lightweight per-caller actor that owns
//! one backend sub-connection, defers or fail-fasts requests until that
//! sub-connection is ready, and batches the raw match stream into bounded
//! groups before replying.
//!
//! # Architecture
//!
//! ```text
//! Daemon (supervisor)
//!   └── Server (TCP listener, one task per connection)
//!         └── ClientActor (per connection: pending queue + relays)
//!               └── SubConnection (per caller, from the shared backend)
//! ```
//!
//! State is owned, not shared: all per-caller state lives in the actor's
//! event loop, and components communicate over `mpsc` channels.

pub mod backend;
pub mod batch;
pub mod client;
pub mod config;
pub mod server;

mod daemon;
pub use daemon::{Daemon, DaemonError, RuntimeConfig};
