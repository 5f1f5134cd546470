//! Protocol types for harness-to-stand-in communication.
//!
//! Shared request/outcome types used by the harness responder, the stand-in
//! binary and the helper-process entry points.

use serde::{Deserialize, Serialize};

/// Exit code reported when the stub machinery itself fails.
pub const INTERNAL_FAILURE_EXIT_CODE: u8 = u8::MAX;

/// Command name carried by the shutdown sentinel. Never delivered to user
/// outcome functions.
const STOP_SENTINEL_CMD_NAME: &str = "__cmdstub_stop_responding__";

/// One invocation of a stubbed command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StubRequest {
    /// Identifies the registration this invocation belongs to.
    pub key: String,
    /// Logical command name as registered (never a path).
    pub cmd_name: String,
    /// Arguments the command was invoked with, in order.
    pub args: Vec<String>,
}

impl StubRequest {
    pub fn new(
        key: impl Into<String>,
        cmd_name: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        Self {
            key: key.into(),
            cmd_name: cmd_name.into(),
            args,
        }
    }

    /// The reserved request that asks a responder to stop servicing its
    /// request channel.
    pub fn stop_sentinel() -> Self {
        Self {
            key: String::new(),
            cmd_name: STOP_SENTINEL_CMD_NAME.to_string(),
            args: Vec::new(),
        }
    }

    pub fn is_stop_sentinel(&self) -> bool {
        self.key.is_empty() && self.cmd_name == STOP_SENTINEL_CMD_NAME
    }
}

/// What the caller of a stubbed command observes.
///
/// `stdout`/`stderr` are forwarded byte-exact; a non-empty
/// `internal_err_txt` means the stub itself failed, forces the exit code to
/// 255 and is appended to the caller-visible stderr.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutcome {
    /// Registration the outcome refers to. Informational, may be empty.
    pub key: String,
    /// Bytes to forward on standard output.
    pub stdout: Vec<u8>,
    /// Bytes to forward on standard error.
    pub stderr: Vec<u8>,
    /// Exit code in 0..=255.
    pub exit_code: u8,
    /// Non-empty when the stub machinery failed.
    pub internal_err_txt: String,
}

impl ExecOutcome {
    /// An outcome reporting a failure of the stub machinery itself.
    pub fn internal_failure(key: impl Into<String>, err_txt: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            exit_code: INTERNAL_FAILURE_EXIT_CODE,
            internal_err_txt: err_txt.into(),
            ..Self::default()
        }
    }

    pub fn has_internal_err(&self) -> bool {
        !self.internal_err_txt.is_empty()
    }
}
