//! Error types for buddy-core

use thiserror::Error;

/// Errors raised by device capability providers
#[derive(Error, Debug)]
pub enum DeviceError {
    /// Another selection is in progress, or the device is already open
    #[error("device busy: {0}")]
    Busy(String),

    /// The descriptor does not name a known device
    #[error("unknown device: {0}")]
    Unknown(String),

    /// Enumeration or open failed at the OS level
    #[error("device I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while assembling an execution context
#[derive(Error, Debug)]
pub enum ContextError {
    #[error("GitHub client error: {0}")]
    Github(#[from] buddy_github::GithubError),

    #[error("failed to build mock fixtures: {0}")]
    Fixture(#[from] std::io::Error),
}

/// Errors surfaced by the execution bus
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The channel is closed; no further operations can be carried
    #[error("bus channel closed")]
    Closed,

    /// Writing a frame to the transport failed
    #[error("bus transport error: {0}")]
    Transport(String),

    /// A message for this operation could not be decoded
    #[error("malformed bus message: {0}")]
    Malformed(String),

    /// The executor reported a failure for this operation
    #[error("executor failure: {0}")]
    Remote(String),
}

impl From<std::io::Error> for BusError {
    fn from(err: std::io::Error) -> Self {
        BusError::Transport(err.to_string())
    }
}
