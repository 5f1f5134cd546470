//! cmdstub harness - stub external command executions from inside tests.
//!
//! The program under test keeps invoking commands through ordinary
//! process-spawn APIs; this crate arranges for executable discovery to find
//! a stand-in whose exit code and output streams the test controls, either
//! pre-computed at registration (static) or computed per invocation over an
//! inter-process channel (dynamic).

pub mod assets;
pub mod envpath;
pub mod install;
pub mod ipc;
pub mod stubber;

// Re-export the surface a test usually needs
pub use cmdstub_core::outcome;
pub use cmdstub_core::{
    Discovery, ExecKind, ExecOutcome, Result, Settings, StubError, StubFunc, StubRequest,
    StubbingMode,
};
pub use stubber::ExecStubber;
