use thiserror::Error;

/// Error kinds surfaced by the stubbing runtime.
///
/// Each variant is a distinct cause family so callers can switch on it:
/// bad user input, transport trouble (including timeouts), wire-format
/// trouble, on-disk trouble, or a lookup miss.
#[derive(Error, Debug)]
pub enum StubError {
    /// Caller passed something unusable (command name is a path,
    /// data directory missing, malformed stub key, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// FIFO create/open/read/write failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// An operation did not complete within its configured timeout.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Malformed wire record, bad base64, wrong arity.
    #[error("codec error: {0}")]
    Codec(String),

    /// Sidecar configuration could not be loaded or is inconsistent.
    #[error("config error: {0}")]
    Config(String),

    /// Lookup by stub key found no registration.
    #[error("no such stub: {0}")]
    NoSuchStub(String),

    /// I/O error on an on-disk artifact.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for cmdstub operations.
pub type Result<T> = std::result::Result<T, StubError>;
