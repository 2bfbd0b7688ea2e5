//! Platform abstraction layer.
//!
//! All `#[cfg]` blocks for OS-specific behavior live in this module rather
//! than in the supervisor. The supervisor talks to the OS only through the
//! `ProcessShim` returned by `process_shim()`.
//!
//! # Supported Platforms
//!
//! - **Linux**: Full support
//! - **macOS**: Full support
//! - **Windows**: Not supported (IPC pipes are passed as descriptor numbers)

pub mod process;

pub use process::{process_shim, ChildPipes, ProcessShim};
