//! Injected logging for node supervision.
//!
//! The harness never logs through global state. Each `Node` receives a
//! `HarnessLogger` at construction; by default it is `DisabledLogger`, so the
//! harness is silent until the caller asks otherwise.

use std::fmt;
use std::sync::Arc;

/// Sink for harness log lines.
pub trait HarnessLogger: Send + Sync + 'static {
    /// Log a debug-level line.
    fn debug(&self, args: fmt::Arguments<'_>);

    /// Log a trace-level line.
    fn trace(&self, args: fmt::Arguments<'_>);
}

/// Logger that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledLogger;

impl HarnessLogger for DisabledLogger {
    fn debug(&self, _args: fmt::Arguments<'_>) {}

    fn trace(&self, _args: fmt::Arguments<'_>) {}
}

/// Logger that forwards to `tracing` under the `nodeharness` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl HarnessLogger for TracingLogger {
    fn debug(&self, args: fmt::Arguments<'_>) {
        tracing::debug!(target: "nodeharness", "{}", args);
    }

    fn trace(&self, args: fmt::Arguments<'_>) {
        tracing::trace!(target: "nodeharness", "{}", args);
    }
}

/// The default logger handed to nodes built without one.
pub fn disabled() -> Arc<dyn HarnessLogger> {
    Arc::new(DisabledLogger)
}

/// Logger bound to a single node, prefixing each line with its number.
#[derive(Clone)]
pub(crate) struct NodeLog {
    node_num: u32,
    inner: Arc<dyn HarnessLogger>,
}

impl NodeLog {
    pub(crate) fn new(node_num: u32, inner: Arc<dyn HarnessLogger>) -> Self {
        Self { node_num, inner }
    }

    /// Debug line prefixed with the node number.
    pub(crate) fn logf(&self, args: fmt::Arguments<'_>) {
        self.inner
            .debug(format_args!("{:03} {}", self.node_num, args));
    }

    /// Unprefixed debug line.
    pub(crate) fn debug(&self, args: fmt::Arguments<'_>) {
        self.inner.debug(args);
    }

    /// Unprefixed trace line.
    pub(crate) fn trace(&self, args: fmt::Arguments<'_>) {
        self.inner.trace(args);
    }
}
