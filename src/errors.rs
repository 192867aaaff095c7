//! Change Tracking Error Hierarchy
//!
//! Separates failures by where they originate: watch bookkeeping in the
//! registry, framing on the control channel, configuration, and raw I/O.
//! Query condition codes (`truncated`, `overflowed`) are not errors and live
//! in [`crate::DrainStatus`].

use std::path::PathBuf;

use config::ConfigError;

use crate::ErrorCode;
use crate::WatchHandle;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Monitor/forget/query failures
    #[error(transparent)]
    Watch(#[from] WatchError),

    /// Malformed or unexpected frames on the control channel
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Configuration loading or validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Socket and file I/O failures
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The remote side answered a request with an error code
    #[error("Request rejected by server: {0:?}")]
    Rejected(ErrorCode),
}

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// Handle is unknown or owned by a different observer
    #[error("Unknown watch handle {handle}")]
    BadHandle { handle: WatchHandle },

    /// Target file does not exist or is not a regular file
    #[error("File not found: {path}")]
    NotFound {
        path: PathBuf,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Caller may not read the target file
    #[error("Permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    /// Block size must be strictly positive
    #[error("Invalid block size {0}")]
    InvalidBlockSize(i64),

    #[error("Path length {len} exceeds limit {max}")]
    PathTooLong { len: usize, max: usize },

    /// Observer already holds the maximum number of watches
    #[error("Observer reached the watch limit ({limit})")]
    TooManyWatches { limit: usize },

    #[error("Out of memory while {0}")]
    NoMemory(&'static str),

    /// The write-interception layer refused to install a hook
    #[error("Failed to install write hook: {reason}")]
    HookInstallFailed { reason: String },

    /// The observer session ended while a monitor request was in flight
    #[error("Observer session already released")]
    ObserverReleased,
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Unknown opcode {0}")]
    UnknownOpcode(i32),

    #[error("Unknown error code {0}")]
    UnknownErrorCode(i32),

    #[error("Unknown drain status {0}")]
    UnknownStatus(i32),

    /// Declared frame size is below the header size or otherwise impossible
    #[error("Invalid frame size {0}")]
    InvalidFrameSize(i32),

    #[error("Frame of {size} bytes exceeds limit {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// Frame carried bytes past its last field
    #[error("{0} unexpected trailing bytes in frame")]
    TrailingBytes(usize),

    /// Payload ended before a required field
    #[error("Truncated payload for {field}")]
    Truncated { field: &'static str },

    /// A block index or length does not fit the 32-bit wire encoding
    #[error("Value {value} of {field} does not fit the wire encoding")]
    ValueOutOfRange { field: &'static str, value: u64 },

    /// A range record whose length is not positive
    #[error("Invalid range record (start {start}, length {length})")]
    InvalidRange { start: i32, length: i32 },

    #[error("Expected {expected} response but received {actual}")]
    UnexpectedResponse {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Connection closed by peer")]
    ConnectionClosed,
}
