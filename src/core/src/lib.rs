//! cmdstub core - foundational types and plumbing for command stubbing.
//!
//! This crate holds everything the harness, the stand-in binary and
//! helper-process children share: the protocol DTOs, the wire codec, the
//! named-pipe transport, the request repository, the sidecar configuration
//! and the outcome-function adapters.

pub mod codec;
pub mod error;
pub mod fifo;
pub mod helper;
pub mod outcome;
pub mod protocol;
pub mod repo;
pub mod settings;
pub mod sidecar;
pub mod util;

// Re-export commonly used types
pub use error::{Result, StubError};
pub use outcome::{RequestLog, StubFunc};
pub use protocol::{ExecOutcome, StubRequest, INTERNAL_FAILURE_EXIT_CODE};
pub use repo::RequestDirRepo;
pub use settings::{Discovery, ExecKind, Settings, StubbingMode, DEFAULT_TIMEOUT};
pub use sidecar::CmdConfig;

/// cmdstub version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
