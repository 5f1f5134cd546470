//! Helper-process support.
//!
//! Some behaviour is only observable when outcome code runs inside the test
//! process image. For that, the stand-in re-invokes the harness executable
//! with a named test entry; the entry calls one of the `effectuate_*`
//! functions below, which are no-ops unless the helper environment marker
//! is present and otherwise realize the configured outcome and exit the
//! process.
//!
//! The Rust test harness owns a test binary's argv and prints a run header
//! to stdout, so the original arguments travel in an environment variable
//! and the payload streams are relayed through files in
//! `__CMDSTUB_HELPER_OUT_DIR`; the exit code travels through the process
//! exit status as usual.

use std::env;
use std::fs::File;
use std::io::{self, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use crate::codec;
use crate::error::{Result, StubError};
use crate::fifo;
use crate::outcome::StubFunc;
use crate::protocol::{ExecOutcome, StubRequest, INTERNAL_FAILURE_EXIT_CODE};
use crate::repo::RequestDirRepo;
use crate::sidecar::CmdConfig;

/// Set to `"1"` on a process running as a helper-process child.
pub const ENV_HELPER_ACTIVE: &str = "__CMDSTUB_HELPER_ACTIVE";
/// Absolute path of the sidecar the helper must load.
pub const ENV_SIDECAR_PATH: &str = "__CMDSTUB_SIDECAR_PATH";
/// The stubbed invocation's arguments, as one codec-encoded request line.
pub const ENV_HELPER_ARGS: &str = "__CMDSTUB_HELPER_ARGS";
/// Directory receiving the helper's payload stream files.
pub const ENV_HELPER_OUT_DIR: &str = "__CMDSTUB_HELPER_OUT_DIR";

/// Payload file names under [`ENV_HELPER_OUT_DIR`].
pub const HELPER_STDOUT_FILE: &str = "helper_stdout";
pub const HELPER_STDERR_FILE: &str = "helper_stderr";

/// Whether the current process runs as a stub instead of an actual
/// execution, based off the process environment.
pub fn stubbing_ongoing() -> bool {
    env::var(ENV_HELPER_ACTIVE).as_deref() == Ok("1")
}

/// Extra work a static-mode helper performs before the static streams are
/// written. Whatever the job writes to the supplied writer precedes the
/// static stdout payload.
pub type ExtraJob<'a> = &'a mut dyn FnMut(&StubRequest, &mut dyn Write) -> io::Result<()>;

/// Effectuate the sidecar-configured outcome, then exit the process.
///
/// No-op when not running as a helper-process child, so the hosting test
/// entry passes harmlessly during a regular test run.
pub fn effectuate_configured_exec_outcome(extra_job: Option<ExtraJob<'_>>) {
    if !stubbing_ongoing() {
        return;
    }
    let (mut out_sink, mut err_sink) = payload_sinks();
    let (cfg, req) = match config_and_request_from_env() {
        Ok(loaded) => loaded,
        Err(e) => fatal(
            err_sink.as_mut(),
            &format!("could not load stub configuration from environment: {e}"),
        ),
    };

    if cfg.use_static_outcome() {
        effectuate_static_outcome(&cfg, &req, extra_job, out_sink.as_mut(), err_sink.as_mut());
    }

    let code = effectuate_dynamic_outcome(
        cfg.timeout_or_default(),
        Path::new(&cfg.stubber_pipe),
        Path::new(&cfg.helper_pipe),
        &req,
        err_sink.as_mut(),
        out_sink.as_mut(),
    );
    let _ = out_sink.flush();
    let _ = err_sink.flush();
    process::exit(i32::from(code));
}

/// Persist the request, then realize the outcome produced by `stub_func`
/// instead of the sidecar-configured one, then exit the process.
///
/// No-op when not running as a helper-process child.
pub fn effectuate_alternative_exec_outcome(stub_func: StubFunc) {
    if !stubbing_ongoing() {
        return;
    }
    let (mut out_sink, mut err_sink) = payload_sinks();
    let (cfg, req) = match config_and_request_from_env() {
        Ok(loaded) => loaded,
        Err(e) => fatal(
            err_sink.as_mut(),
            &format!("could not load stub configuration from environment: {e}"),
        ),
    };
    if let Err(e) = RequestDirRepo::new(&cfg.data_dir).save(&req) {
        fatal(err_sink.as_mut(), &format!("fail to save request {req:?}: {e}"));
    }

    let outcome = stub_func(&req);
    let _ = err_sink.write_all(&outcome.stderr);
    let _ = out_sink.write_all(&outcome.stdout);
    let code = if outcome.has_internal_err() {
        let _ = write!(err_sink, "{}", outcome.internal_err_txt);
        INTERNAL_FAILURE_EXIT_CODE
    } else {
        outcome.exit_code
    };
    let _ = out_sink.flush();
    let _ = err_sink.flush();
    process::exit(i32::from(code));
}

/// Request an outcome from the running harness over the FIFO pair and
/// forward it to the given writers. Returns the exit code the caller
/// should propagate; transport trouble yields 255 with a diagnostic on
/// `stderr`.
pub fn effectuate_dynamic_outcome(
    timeout: Duration,
    stubber_pipe: &Path,
    helper_pipe: &Path,
    req: &StubRequest,
    stderr: &mut dyn Write,
    stdout: &mut dyn Write,
) -> u8 {
    if stubber_pipe.as_os_str().is_empty() || helper_pipe.as_os_str().is_empty() {
        let _ = write!(
            stderr,
            "dynamic outcome requested but the fifo pair is not configured \
             (stubber={}, helper={})",
            stubber_pipe.display(),
            helper_pipe.display()
        );
        return INTERNAL_FAILURE_EXIT_CODE;
    }

    if let Err(e) = fifo::write_request_to_pipe(stubber_pipe, req, timeout) {
        let _ = write!(
            stderr,
            "error while writing stub request to stubber pipe {}: {e}",
            stubber_pipe.display()
        );
        return INTERNAL_FAILURE_EXIT_CODE;
    }

    let outcome = match fifo::read_outcome_from_pipe(helper_pipe, timeout) {
        Ok(outcome) => outcome,
        Err(e) => {
            let _ = write!(
                stderr,
                "error while reading stub outcome from helper pipe {}: timeout_millis={} err={e}",
                helper_pipe.display(),
                timeout.as_millis()
            );
            return INTERNAL_FAILURE_EXIT_CODE;
        }
    };

    forward_outcome(&outcome, stderr, stdout)
}

/// Write an outcome's streams to the given writers and derive the exit
/// code; a non-empty internal-error text goes to stderr and forces 255.
pub fn forward_outcome(
    outcome: &ExecOutcome,
    stderr: &mut dyn Write,
    stdout: &mut dyn Write,
) -> u8 {
    if !outcome.stdout.is_empty() {
        let _ = stdout.write_all(&outcome.stdout);
    }
    if !outcome.stderr.is_empty() {
        let _ = stderr.write_all(&outcome.stderr);
    }
    if outcome.has_internal_err() {
        let _ = write!(stderr, "{}", outcome.internal_err_txt);
        return INTERNAL_FAILURE_EXIT_CODE;
    }
    outcome.exit_code
}

fn effectuate_static_outcome(
    cfg: &CmdConfig,
    req: &StubRequest,
    extra_job: Option<ExtraJob<'_>>,
    out_sink: &mut dyn Write,
    err_sink: &mut dyn Write,
) -> ! {
    if let Err(e) = RequestDirRepo::new(&cfg.data_dir).save(req) {
        fatal(
            err_sink,
            &format!("will not effectuate static outcome because saving the request failed: {e}"),
        );
    }

    if let Some(job) = extra_job {
        match catch_unwind(AssertUnwindSafe(|| job(req, out_sink))) {
            Err(_) => fatal(err_sink, &format!("panic while doing extra job on stub request {req:?}")),
            Ok(Err(e)) => fatal(err_sink, &format!("fail to do extra job on stub request {req:?}: {e}")),
            Ok(Ok(())) => {}
        }
    }

    let _ = err_sink.write_all(&cfg.static_stderr);
    let _ = out_sink.write_all(&cfg.static_stdout);
    let code = match cfg.exit_code_or_err() {
        Ok(code) => code,
        Err(e) => fatal(err_sink, &e.to_string()),
    };
    let _ = out_sink.flush();
    let _ = err_sink.flush();
    process::exit(i32::from(code));
}

/// The writers the helper's payload goes to: relay files when an out
/// directory is configured, the real process streams otherwise.
fn payload_sinks() -> (Box<dyn Write>, Box<dyn Write>) {
    if let Ok(dir) = env::var(ENV_HELPER_OUT_DIR) {
        if !dir.is_empty() {
            let dir = PathBuf::from(dir);
            let stdout_file = File::create(dir.join(HELPER_STDOUT_FILE));
            let stderr_file = File::create(dir.join(HELPER_STDERR_FILE));
            if let (Ok(out), Ok(err)) = (stdout_file, stderr_file) {
                return (Box::new(out), Box::new(err));
            }
        }
    }
    (Box::new(io::stdout()), Box::new(io::stderr()))
}

fn config_and_request_from_env() -> Result<(CmdConfig, StubRequest)> {
    let sidecar_path = env::var(ENV_SIDECAR_PATH).map_err(|_| {
        StubError::Config(format!("helper mode is active but {ENV_SIDECAR_PATH} is not set"))
    })?;
    let cfg = CmdConfig::load(Path::new(&sidecar_path))?;
    let req = match env::var(ENV_HELPER_ARGS) {
        Ok(line) if !line.is_empty() => {
            let relayed = codec::decode_request(&line)?;
            cfg.request_with(relayed.args)
        }
        _ => cfg.request_with(Vec::new()),
    };
    Ok((cfg, req))
}

fn fatal(stderr: &mut dyn Write, msg: &str) -> ! {
    let _ = write!(stderr, "{msg}");
    let _ = stderr.flush();
    process::exit(i32::from(INTERNAL_FAILURE_EXIT_CODE));
}
