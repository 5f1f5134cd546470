//! The native stand-in: what discovery finds in place of the real command.
//!
//! Single decision ladder per invocation: load the sidecar next to the own
//! executable, then either delegate to a helper process, replay the static
//! outcome, or request a dynamic outcome from the harness over the FIFO
//! pair. Every internal failure surfaces the way a real command would fail:
//! a diagnostic on stderr and exit code 255. The observable stdout/stderr
//! payloads pass through byte-exact, which is why this binary never logs.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use cmdstub_core::codec;
use cmdstub_core::helper::{
    self, ENV_HELPER_ACTIVE, ENV_HELPER_ARGS, ENV_HELPER_OUT_DIR, ENV_SIDECAR_PATH,
    HELPER_STDERR_FILE, HELPER_STDOUT_FILE,
};
use cmdstub_core::protocol::{StubRequest, INTERNAL_FAILURE_EXIT_CODE};
use cmdstub_core::repo::RequestDirRepo;
use cmdstub_core::sidecar::{CmdConfig, SIDECAR_SUFFIX};
use cmdstub_core::util::next_rand_hex;

/// Effectuate the configured outcome for the invocation `args` (argv,
/// including the command itself) of the stand-in at `exec_path`. Returns
/// the exit code to report.
pub fn run(
    exec_path: &Path,
    args: &[String],
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> u8 {
    let cfg = match CmdConfig::for_command(exec_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            return fatal(
                stderr,
                &format!(
                    "error reading stand-in configuration: cmd-path={} err={e}",
                    exec_path.display()
                ),
            )
        }
    };

    let req = cfg.request_with(args.iter().skip(1).cloned().collect());

    if cfg.use_helper_process() {
        return outcome_from_helper_process(exec_path, &cfg, &req, stdout, stderr);
    }
    if cfg.use_static_outcome() {
        return outcome_from_static_config(&cfg, &req, stdout, stderr);
    }
    helper::effectuate_dynamic_outcome(
        cfg.timeout_or_default(),
        Path::new(&cfg.stubber_pipe),
        Path::new(&cfg.helper_pipe),
        &req,
        stderr,
        stdout,
    )
}

/// Replay the sidecar's pre-recorded outcome, persisting the request first
/// so the harness can inspect the invocation later.
fn outcome_from_static_config(
    cfg: &CmdConfig,
    req: &StubRequest,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> u8 {
    if let Err(e) = RequestDirRepo::new(&cfg.data_dir).save(req) {
        return fatal(
            stderr,
            &format!("will not effectuate static outcome because saving the request failed: {e}"),
        );
    }
    let exit_code = match cfg.exit_code_or_err() {
        Ok(code) => code,
        Err(e) => return fatal(stderr, &e.to_string()),
    };
    let _ = stderr.write_all(&cfg.static_stderr);
    let _ = stdout.write_all(&cfg.static_stdout);
    exit_code
}

/// Re-invoke the harness executable on the configured test entry. The
/// entry runs `effectuate_*` from the core crate, which relays its payload
/// streams through files in the out directory; the exit code travels
/// through the child's exit status.
fn outcome_from_helper_process(
    exec_path: &Path,
    cfg: &CmdConfig,
    req: &StubRequest,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> u8 {
    let sidecar_path = format!("{}{}", exec_path.display(), SIDECAR_SUFFIX);
    let out_dir = PathBuf::from(format!(
        "{}_helper_out_{}",
        exec_path.display(),
        next_rand_hex()
    ));
    if let Err(e) = fs::create_dir_all(&out_dir) {
        return fatal(
            stderr,
            &format!("fail to create helper out dir {}: {e}", out_dir.display()),
        );
    }

    let spawned = Command::new(&cfg.unit_test_exec)
        .arg(&cfg.helper_method)
        .arg("--exact")
        .arg("--nocapture")
        .env(ENV_HELPER_ACTIVE, "1")
        .env(ENV_SIDECAR_PATH, &sidecar_path)
        .env(ENV_HELPER_ARGS, codec::encode_request(req))
        .env(ENV_HELPER_OUT_DIR, &out_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output();

    let output = match spawned {
        Ok(output) => output,
        Err(e) => {
            // spawn failure, distinct from a non-zero child exit
            let _ = fs::remove_dir_all(&out_dir);
            return fatal(
                stderr,
                &format!(
                    "error executing helper process {} {}: {e}",
                    cfg.unit_test_exec, cfg.helper_method
                ),
            );
        }
    };

    let payload_stdout = fs::read(out_dir.join(HELPER_STDOUT_FILE));
    let payload_stderr = fs::read(out_dir.join(HELPER_STDERR_FILE));
    match (payload_stdout, payload_stderr) {
        (Ok(out_bytes), Ok(err_bytes)) => {
            let _ = stderr.write_all(&err_bytes);
            let _ = stdout.write_all(&out_bytes);
        }
        _ => {
            // the helper never produced its payload; its raw streams are
            // only good as a diagnostic
            let _ = stderr.write_all(&output.stdout);
            let _ = stderr.write_all(&output.stderr);
        }
    }
    let _ = fs::remove_dir_all(&out_dir);
    exit_code_of(output.status)
}

fn exit_code_of(status: ExitStatus) -> u8 {
    match status.code() {
        Some(code) if (0..=i32::from(u8::MAX)).contains(&code) => code as u8,
        // signal-terminated or out-of-range
        _ => INTERNAL_FAILURE_EXIT_CODE,
    }
}

fn fatal(stderr: &mut dyn Write, msg: &str) -> u8 {
    let _ = writeln!(stderr, "{msg}");
    INTERNAL_FAILURE_EXIT_CODE
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmdstub_core::sidecar::CmdConfig;
    use tempfile::TempDir;

    fn run_collecting(exec_path: &Path, args: &[&str]) -> (u8, Vec<u8>, Vec<u8>) {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let code = run(exec_path, &args, &mut stdout, &mut stderr);
        (code, stdout, stderr)
    }

    #[test]
    fn test_missing_sidecar_is_fatal() {
        let dir = TempDir::new().unwrap();
        let (code, stdout, stderr) = run_collecting(&dir.path().join("ghost"), &["ghost"]);
        assert_eq!(code, INTERNAL_FAILURE_EXIT_CODE);
        assert!(stdout.is_empty());
        assert!(String::from_utf8_lossy(&stderr).contains("config file not found"));
    }

    #[test]
    fn test_static_outcome_replayed_and_request_persisted() {
        let dir = TempDir::new().unwrap();
        let data_dir = dir.path().join("data");
        fs::create_dir_all(&data_dir).unwrap();
        let cfg = CmdConfig {
            stub_key: "tool_1".to_string(),
            cmd_to_stub: "tool".to_string(),
            data_dir: data_dir.display().to_string(),
            static_stdout: b"sout1".to_vec(),
            static_stderr: b"err1".to_vec(),
            exit_code: Some(3),
            ..CmdConfig::default()
        };
        cfg.save(dir.path()).unwrap();

        let (code, stdout, stderr) =
            run_collecting(&dir.path().join("tool"), &["tool", "arg1", "argb"]);
        assert_eq!(code, 3);
        assert_eq!(stdout, b"sout1");
        assert_eq!(stderr, b"err1");

        let persisted = RequestDirRepo::new(&data_dir).find_all().unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].key, "tool_1");
        assert_eq!(persisted[0].cmd_name, "tool");
        assert_eq!(persisted[0].args, vec!["arg1", "argb"]);
    }

    #[test]
    fn test_static_outcome_without_exit_code_is_fatal() {
        let dir = TempDir::new().unwrap();
        let data_dir = dir.path().join("data");
        fs::create_dir_all(&data_dir).unwrap();
        let cfg = CmdConfig {
            stub_key: "tool_1".to_string(),
            cmd_to_stub: "tool".to_string(),
            data_dir: data_dir.display().to_string(),
            static_stdout: b"sout1".to_vec(),
            ..CmdConfig::default()
        };
        cfg.save(dir.path()).unwrap();

        let (code, _stdout, stderr) = run_collecting(&dir.path().join("tool"), &["tool"]);
        assert_eq!(code, INTERNAL_FAILURE_EXIT_CODE);
        assert!(String::from_utf8_lossy(&stderr).contains("exit code not configured"));
    }

    #[test]
    fn test_dynamic_without_pipes_is_fatal() {
        let dir = TempDir::new().unwrap();
        let cfg = CmdConfig {
            stub_key: "tool_1".to_string(),
            cmd_to_stub: "tool".to_string(),
            ..CmdConfig::default()
        };
        cfg.save(dir.path()).unwrap();

        let (code, _stdout, stderr) = run_collecting(&dir.path().join("tool"), &["tool"]);
        assert_eq!(code, INTERNAL_FAILURE_EXIT_CODE);
        assert!(String::from_utf8_lossy(&stderr).contains("fifo pair is not configured"));
    }

    #[test]
    fn test_helper_spawn_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        let cfg = CmdConfig {
            stub_key: "tool_1".to_string(),
            cmd_to_stub: "tool".to_string(),
            unit_test_exec: dir.path().join("no_such_exec").display().to_string(),
            helper_method: "some_helper".to_string(),
            ..CmdConfig::default()
        };
        cfg.save(dir.path()).unwrap();

        let (code, stdout, stderr) = run_collecting(&dir.path().join("tool"), &["tool"]);
        assert_eq!(code, INTERNAL_FAILURE_EXIT_CODE);
        assert!(stdout.is_empty());
        assert!(String::from_utf8_lossy(&stderr).contains("error executing helper process"));
    }
}
