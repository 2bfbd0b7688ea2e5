//! IPC between the supervisor and the daemon process.
//!
//! Two anonymous pipes are inherited by the daemon:
//!
//! - **Receive pipe**: the daemon writes framed events (bound listener
//!   addresses, lifetime progress); the supervisor decodes them.
//! - **Transmit pipe**: carries no payload. The daemon watches it for EOF,
//!   so closing the supervisor's end is the graceful shutdown request.

pub mod pipe;
pub mod protocol;

pub use pipe::{IpcPipePair, PipeRole};
pub use protocol::{next_message, write_message, IpcError, IpcEvent, LifetimePhase};
