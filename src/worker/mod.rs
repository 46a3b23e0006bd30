//! External worker execution.
//!
//! [`protocol`] parses the status lines a worker writes to stderr;
//! [`runner`] spawns the worker and feeds those lines into a [`ProgressSink`].

pub mod protocol;
pub mod runner;

pub use protocol::{LineBuffer, StatusBatch, StatusLine, StatusUpdate};
pub use runner::{ProcessRunner, ProgressSink, WorkerRunner};
