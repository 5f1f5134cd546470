//! Per-registration stubbing settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default timeout for FIFO opens and reads: 10 seconds.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// How the program under test is expected to discover the stubbed command.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Discovery {
    /// Through the process-wide search-path variable (PATH).
    #[default]
    SearchPath,

    /// Through a home-style environment variable plus a bin sub-directory
    /// chain, e.g. `JAVA_HOME` with `bin_dirs = ["bin"]` so the command is
    /// found at `${JAVA_HOME}/bin/<cmd>`.
    HomeBinDir {
        env_home_key: String,
        /// Sub-directory path segments, kept separate to avoid guessing the
        /// platform path separator.
        bin_dirs: Vec<String>,
    },
}

/// Packaging of the stand-in the harness installs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecKind {
    /// The compiled stand-in executable.
    #[default]
    Native,
    /// The embedded shell-script stand-in. Unavailable on platforms without
    /// a POSIX shell.
    Shell,
}

/// Whether the outcome is fixed at registration time or computed per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StubbingMode {
    /// The outcome function is evaluated once at registration with a
    /// zero-valued request; the stand-in reproduces the result on its own.
    Static,
    /// The outcome function is consulted for every invocation over the FIFO
    /// pair, so the outcome can depend on the actual arguments.
    #[default]
    Dynamic,
}

/// Settings for one registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub discovery: Discovery,
    pub exec_kind: ExecKind,
    pub mode: StubbingMode,
    /// Non-empty: the stand-in delegates to this test entry in the harness
    /// executable instead of effectuating the outcome itself.
    pub helper_method: Option<String>,
    pub timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            discovery: Discovery::default(),
            exec_kind: ExecKind::default(),
            mode: StubbingMode::default(),
            helper_method: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl Settings {
    /// Dynamic stubbing of a command discovered via the search path, using
    /// the native stand-in. Same as `Settings::default()`, named for
    /// readability at call sites.
    pub fn dynamic_discovered_by_path() -> Self {
        Self::default()
    }

    pub fn static_mode(mut self) -> Self {
        self.mode = StubbingMode::Static;
        self
    }

    pub fn dynamic_mode(mut self) -> Self {
        self.mode = StubbingMode::Dynamic;
        self
    }

    pub fn shell_exec(mut self) -> Self {
        self.exec_kind = ExecKind::Shell;
        self
    }

    pub fn native_exec(mut self) -> Self {
        self.exec_kind = ExecKind::Native;
        self
    }

    pub fn discovered_by_home_bin(
        mut self,
        env_home_key: impl Into<String>,
        bin_dirs: &[&str],
    ) -> Self {
        self.discovery = Discovery::HomeBinDir {
            env_home_key: env_home_key.into(),
            bin_dirs: bin_dirs.iter().map(|s| s.to_string()).collect(),
        };
        self
    }

    pub fn with_helper_method(mut self, method: impl Into<String>) -> Self {
        self.helper_method = Some(method.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_static(&self) -> bool {
        self.mode == StubbingMode::Static
    }

    pub fn is_dynamic(&self) -> bool {
        self.mode == StubbingMode::Dynamic
    }

    pub fn is_discovered_by_home_bin(&self) -> bool {
        matches!(self.discovery, Discovery::HomeBinDir { .. })
    }

    pub fn uses_helper_process(&self) -> bool {
        self.helper_method.as_deref().is_some_and(|m| !m.is_empty())
    }
}
