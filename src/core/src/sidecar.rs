//! Sidecar configuration: the on-disk record telling a stand-in how to
//! behave.
//!
//! The sidecar lives next to the stand-in as `<command>.config`, one
//! `KEY=value` per line, `#` starting a comment. Values that can carry
//! arbitrary bytes (static stdout/stderr) are stored base64-encoded so the
//! record stays readable from a shell script. Unknown keys are tolerated,
//! missing keys assume their documented defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::{Result, StubError};
use crate::protocol::StubRequest;
use crate::settings::DEFAULT_TIMEOUT;
use crate::util::newest_file_with_prefix;

pub const KEY_STUB_KEY: &str = "__CMDSTUB_STUB_KEY";
pub const KEY_CMD_TO_STUB: &str = "__CMDSTUB_CMD_TO_STUB";
pub const KEY_UNIT_TEST_EXEC: &str = "__CMDSTUB_UNIT_TEST_EXEC";
pub const KEY_HELPER_METHOD: &str = "__CMDSTUB_HELPER_METHOD";
pub const KEY_DATA_DIR: &str = "__CMDSTUB_DATA_DIR";
pub const KEY_TIMEOUT_NANOS: &str = "__CMDSTUB_TIMEOUT_NANOS";
pub const KEY_STUBBER_PIPE: &str = "__CMDSTUB_STUBBER_PIPE";
pub const KEY_HELPER_PIPE: &str = "__CMDSTUB_HELPER_PIPE";
pub const KEY_STD_ERR: &str = "__CMDSTUB_STD_ERR";
pub const KEY_STD_OUT: &str = "__CMDSTUB_STD_OUT";
pub const KEY_EXIT_CODE: &str = "__CMDSTUB_EXIT_CODE";

/// File-name suffix of the sidecar, appended to the stand-in path.
pub const SIDECAR_SUFFIX: &str = ".config";

/// Name infix of the stand-in-to-harness FIFO.
pub const STUBBER_PIPE_INFIX: &str = "_stubber_pipe_";

/// Name infix of the harness-to-stand-in FIFO.
pub const HELPER_PIPE_INFIX: &str = "_testprocesshelper_pipe_";

/// On-disk projection of what one stand-in must know.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CmdConfig {
    pub stub_key: String,
    pub cmd_to_stub: String,
    /// Absolute path of the harness executable, used when a helper-process
    /// indirection is configured.
    pub unit_test_exec: String,
    /// Non-empty means: delegate via helper process.
    pub helper_method: String,
    pub data_dir: String,
    pub static_stdout: Vec<u8>,
    pub static_stderr: Vec<u8>,
    /// `None` means "no static exit code".
    pub exit_code: Option<u8>,
    /// Absolute FIFO paths; empty in static mode. Resolved by a glob at load
    /// time when absent, so the harness may write the FIFOs after the
    /// sidecar.
    pub stubber_pipe: String,
    pub helper_pipe: String,
    /// `None` means: use the 10 s default.
    pub timeout: Option<Duration>,
}

impl CmdConfig {
    /// Load the sidecar belonging to the stand-in at `cmd_path`.
    pub fn for_command(cmd_path: &Path) -> Result<Self> {
        let mut sidecar_path = cmd_path.as_os_str().to_os_string();
        sidecar_path.push(SIDECAR_SUFFIX);
        Self::load(Path::new(&sidecar_path))
    }

    /// Load a sidecar from an explicit file path.
    pub fn load(sidecar_path: &Path) -> Result<Self> {
        if !sidecar_path.is_file() {
            return Err(StubError::Config(format!(
                "config file not found at: {}",
                sidecar_path.display()
            )));
        }
        let text = fs::read_to_string(sidecar_path)?;

        let mut cfg = Self::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match key {
                KEY_STUB_KEY => cfg.stub_key = value.to_string(),
                KEY_CMD_TO_STUB => cfg.cmd_to_stub = value.to_string(),
                KEY_UNIT_TEST_EXEC => cfg.unit_test_exec = value.to_string(),
                KEY_HELPER_METHOD => cfg.helper_method = value.to_string(),
                KEY_DATA_DIR => cfg.data_dir = value.to_string(),
                KEY_STD_OUT => cfg.static_stdout = decode_b64_value(KEY_STD_OUT, value)?,
                KEY_STD_ERR => cfg.static_stderr = decode_b64_value(KEY_STD_ERR, value)?,
                KEY_EXIT_CODE => cfg.exit_code = parse_exit_code(value)?,
                KEY_TIMEOUT_NANOS => cfg.timeout = parse_timeout(value)?,
                KEY_STUBBER_PIPE => cfg.stubber_pipe = value.to_string(),
                KEY_HELPER_PIPE => cfg.helper_pipe = value.to_string(),
                _ => {}
            }
        }

        cfg.resolve_pipes(sidecar_path)?;
        Ok(cfg)
    }

    /// The harness creates the FIFOs after writing the sidecar, so absent
    /// pipe entries are resolved here by picking the newest file matching
    /// the pipe prefix next to the stand-in.
    fn resolve_pipes(&mut self, sidecar_path: &Path) -> Result<()> {
        if !self.stubber_pipe.is_empty() && !self.helper_pipe.is_empty() {
            return Ok(());
        }
        let dir = sidecar_path.parent().unwrap_or_else(|| Path::new("."));
        let cmd = sidecar_path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.trim_end_matches(SIDECAR_SUFFIX))
            .unwrap_or_default();
        if self.stubber_pipe.is_empty() {
            let prefix = format!("{cmd}{STUBBER_PIPE_INFIX}");
            if let Some(found) = newest_file_with_prefix(dir, &prefix)? {
                self.stubber_pipe = found.display().to_string();
            }
        }
        if self.helper_pipe.is_empty() {
            let prefix = format!("{cmd}{HELPER_PIPE_INFIX}");
            if let Some(found) = newest_file_with_prefix(dir, &prefix)? {
                self.helper_pipe = found.display().to_string();
            }
        }
        Ok(())
    }

    /// Write the sidecar into `cmd_dir`, named after the stubbed command.
    /// The rendered text round-trips byte-exact with `load`.
    pub fn save(&self, cmd_dir: &Path) -> Result<PathBuf> {
        let path = cmd_dir.join(format!("{}{}", self.cmd_to_stub, SIDECAR_SUFFIX));
        fs::write(&path, self.render())?;
        Ok(path)
    }

    /// Render the sidecar text. Kept as a single template so the record a
    /// shell stand-in greps stays in one visible piece.
    pub fn render(&self) -> String {
        format!(
            "# cmdstub stand-in sidecar. KEY=value, one per line.\n\
             # {KEY_STD_OUT} and {KEY_STD_ERR} values are base64 encoded.\n\
             {KEY_STUB_KEY}={stub_key}\n\
             {KEY_CMD_TO_STUB}={cmd_to_stub}\n\
             {KEY_UNIT_TEST_EXEC}={unit_test_exec}\n\
             {KEY_HELPER_METHOD}={helper_method}\n\
             {KEY_DATA_DIR}={data_dir}\n\
             {KEY_TIMEOUT_NANOS}={timeout_nanos}\n\
             {KEY_STUBBER_PIPE}={stubber_pipe}\n\
             {KEY_HELPER_PIPE}={helper_pipe}\n\
             {KEY_STD_ERR}={std_err}\n\
             {KEY_STD_OUT}={std_out}\n\
             {KEY_EXIT_CODE}={exit_code}\n",
            stub_key = self.stub_key,
            cmd_to_stub = self.cmd_to_stub,
            unit_test_exec = self.unit_test_exec,
            helper_method = self.helper_method,
            data_dir = self.data_dir,
            timeout_nanos = self.timeout_nanos_txt(),
            stubber_pipe = self.stubber_pipe,
            helper_pipe = self.helper_pipe,
            std_err = encode_b64_value(&self.static_stderr),
            std_out = encode_b64_value(&self.static_stdout),
            exit_code = self.exit_code_txt(),
        )
    }

    /// True iff any static field is set; the stand-in can then reproduce the
    /// outcome without talking to the harness.
    pub fn use_static_outcome(&self) -> bool {
        !self.static_stdout.is_empty()
            || !self.static_stderr.is_empty()
            || self.exit_code.is_some()
    }

    pub fn use_dynamic_outcome(&self) -> bool {
        !self.use_static_outcome()
    }

    pub fn use_helper_process(&self) -> bool {
        !self.helper_method.is_empty()
    }

    pub fn timeout_or_default(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_TIMEOUT)
    }

    fn timeout_nanos_txt(&self) -> String {
        match self.timeout {
            None => String::new(),
            Some(d) => (d.as_nanos() as u64).to_string(),
        }
    }

    /// The configured static exit code, or a config error when absent.
    pub fn exit_code_or_err(&self) -> Result<u8> {
        self.exit_code
            .ok_or_else(|| StubError::Config("exit code not configured".to_string()))
    }

    fn exit_code_txt(&self) -> String {
        match self.exit_code {
            None => String::new(),
            Some(code) => code.to_string(),
        }
    }

    /// A request for executing the configured command with `args`.
    pub fn request_with(&self, args: Vec<String>) -> StubRequest {
        StubRequest::new(&self.stub_key, &self.cmd_to_stub, args)
    }
}

fn encode_b64_value(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return String::new();
    }
    BASE64.encode(bytes)
}

fn decode_b64_value(key: &str, value: &str) -> Result<Vec<u8>> {
    if value.is_empty() {
        return Ok(Vec::new());
    }
    BASE64.decode(value).map_err(|e| {
        StubError::Config(format!("fail to base64 decode {key}='{value}': {e}"))
    })
}

fn parse_exit_code(value: &str) -> Result<Option<u8>> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    let code: u32 = value.parse().map_err(|e| {
        StubError::Config(format!("malformed exit code '{value}': {e}"))
    })?;
    if code > u8::MAX as u32 {
        return Err(StubError::Config(format!(
            "exit code out of range: {code} > {}",
            u8::MAX
        )));
    }
    Ok(Some(code as u8))
}

/// Empty means "use the default"; anything else must parse as positive
/// integer nanoseconds.
fn parse_timeout(value: &str) -> Result<Option<Duration>> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    let nanos: i64 = value.parse().map_err(|e| {
        StubError::Config(format!("malformed timeout '{value}': {e}"))
    })?;
    if nanos <= 0 {
        return Err(StubError::Config(format!(
            "timeout must be greater than 0 but was {nanos}"
        )));
    }
    Ok(Some(Duration::from_nanos(nanos as u64)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_config() -> CmdConfig {
        CmdConfig {
            stub_key: "SuperExe_42".to_string(),
            cmd_to_stub: "SuperExe".to_string(),
            unit_test_exec: "/tmp/tests/harness".to_string(),
            helper_method: String::new(),
            data_dir: "/tmp/tests/data".to_string(),
            static_stdout: b"sout1".to_vec(),
            static_stderr: b"err\nwith=delims".to_vec(),
            exit_code: Some(3),
            stubber_pipe: String::new(),
            helper_pipe: String::new(),
            timeout: Some(Duration::from_secs(2)),
        }
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let cfg = sample_config();
        cfg.save(dir.path()).unwrap();
        let loaded = CmdConfig::for_command(&dir.path().join("SuperExe")).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn test_load_missing_file() {
        let err = CmdConfig::load(Path::new("/nowhere/x.config")).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn test_load_tolerates_comments_and_unknown_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tool.config");
        fs::write(
            &path,
            "# a comment\n\n__CMDSTUB_SOMETHING_NEW=whatever\n__CMDSTUB_CMD_TO_STUB=tool\n",
        )
        .unwrap();
        let cfg = CmdConfig::load(&path).unwrap();
        assert_eq!(cfg.cmd_to_stub, "tool");
        assert!(cfg.use_dynamic_outcome());
    }

    #[test]
    fn test_empty_timeout_means_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tool.config");
        fs::write(&path, "__CMDSTUB_CMD_TO_STUB=tool\n__CMDSTUB_TIMEOUT_NANOS=\n").unwrap();
        let cfg = CmdConfig::load(&path).unwrap();
        assert_eq!(cfg.timeout, None);
        assert_eq!(cfg.timeout_or_default(), DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_nonempty_timeout_is_parsed_as_nanos() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tool.config");
        fs::write(
            &path,
            "__CMDSTUB_CMD_TO_STUB=tool\n__CMDSTUB_TIMEOUT_NANOS=1500000000\n",
        )
        .unwrap();
        let cfg = CmdConfig::load(&path).unwrap();
        assert_eq!(cfg.timeout, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_malformed_timeout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tool.config");
        fs::write(&path, "__CMDSTUB_TIMEOUT_NANOS=soon\n").unwrap();
        let err = CmdConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("malformed timeout"));
    }

    #[test]
    fn test_non_positive_timeout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tool.config");
        fs::write(&path, "__CMDSTUB_TIMEOUT_NANOS=0\n").unwrap();
        let err = CmdConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("greater than 0"));
    }

    #[test]
    fn test_malformed_exit_code() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tool.config");
        fs::write(&path, "__CMDSTUB_EXIT_CODE=yes\n").unwrap();
        let err = CmdConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("malformed exit code"));
    }

    #[test]
    fn test_exit_code_out_of_range() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tool.config");
        fs::write(&path, "__CMDSTUB_EXIT_CODE=256\n").unwrap();
        let err = CmdConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_static_outcome_detection() {
        let mut cfg = CmdConfig::default();
        assert!(cfg.use_dynamic_outcome());
        cfg.exit_code = Some(0);
        assert!(cfg.use_static_outcome());
        cfg.exit_code = None;
        cfg.static_stderr = b"e".to_vec();
        assert!(cfg.use_static_outcome());
    }

    #[test]
    fn test_absent_pipes_resolved_by_glob() {
        let dir = TempDir::new().unwrap();
        let cfg = CmdConfig {
            cmd_to_stub: "tool".to_string(),
            ..CmdConfig::default()
        };
        cfg.save(dir.path()).unwrap();
        fs::write(dir.path().join("tool_stubber_pipe_abc"), b"").unwrap();
        fs::write(dir.path().join("tool_testprocesshelper_pipe_abc"), b"").unwrap();

        let loaded = CmdConfig::for_command(&dir.path().join("tool")).unwrap();
        assert!(loaded.stubber_pipe.ends_with("tool_stubber_pipe_abc"));
        assert!(loaded.helper_pipe.ends_with("tool_testprocesshelper_pipe_abc"));
    }

    #[test]
    fn test_explicit_pipes_not_overridden_by_glob() {
        let dir = TempDir::new().unwrap();
        let cfg = CmdConfig {
            cmd_to_stub: "tool".to_string(),
            stubber_pipe: "/explicit/stubber".to_string(),
            helper_pipe: "/explicit/helper".to_string(),
            ..CmdConfig::default()
        };
        cfg.save(dir.path()).unwrap();
        let loaded = CmdConfig::for_command(&dir.path().join("tool")).unwrap();
        assert_eq!(loaded.stubber_pipe, "/explicit/stubber");
        assert_eq!(loaded.helper_pipe, "/explicit/helper");
    }

    #[test]
    fn test_request_with() {
        let cfg = sample_config();
        let req = cfg.request_with(vec!["-v".to_string()]);
        assert_eq!(req.key, "SuperExe_42");
        assert_eq!(req.cmd_name, "SuperExe");
        assert_eq!(req.args, vec!["-v"]);
    }
}
