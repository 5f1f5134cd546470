//! The stubbing orchestrator.
//!
//! `ExecStubber` installs stand-ins, makes them discoverable by editing the
//! process environment, runs one responder per dynamic registration and
//! tears everything down again. Discovery goes through process-wide state,
//! so registrations are serialised behind a single non-reentrant mutex and
//! a command name can only carry one live setup per process.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::io::ErrorKind;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::process;
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use cmdstub_core::error::{Result, StubError};
use cmdstub_core::outcome::StubFunc;
use cmdstub_core::protocol::{ExecOutcome, StubRequest, INTERNAL_FAILURE_EXIT_CODE};
use cmdstub_core::repo::RequestDirRepo;
use cmdstub_core::settings::{Discovery, Settings};
use cmdstub_core::sidecar::CmdConfig;
use tracing::{debug, warn};

use crate::envpath::{EnvPath, PATH_VAR};
use crate::install::{self, InstallDirs};
use crate::ipc::StubbingComChannel;

/// Everything belonging to one live registration.
struct StubSpec {
    stub_func: StubFunc,
    dirs: InstallDirs,
    channel: Option<StubbingComChannel>,
    reset_discovery: Option<DiscoveryReset>,
}

/// How to undo the discovery-environment edit of one registration.
enum DiscoveryReset {
    SearchPath {
        home_dir: String,
    },
    HomeBin {
        env_key: String,
        installed: String,
        replaced: Option<String>,
    },
}

impl DiscoveryReset {
    fn apply(&self) {
        match self {
            // The home dir carries a random suffix, no other registration
            // uses the same value, so removing exactly it is safe.
            DiscoveryReset::SearchPath { home_dir } => {
                let mut path = EnvPath::from_current();
                path.remove_parts(home_dir);
                env::set_var(PATH_VAR, path.to_string());
            }
            // Only restore while the variable still holds our value; a
            // later registration that reclaimed it must not be clobbered.
            DiscoveryReset::HomeBin {
                env_key,
                installed,
                replaced,
            } => {
                let current = env::var(env_key).unwrap_or_default();
                if current != *installed {
                    return;
                }
                match replaced {
                    None => env::remove_var(env_key),
                    Some(old) => env::set_var(env_key, old),
                }
            }
        }
    }
}

struct StubberInner {
    store: Mutex<HashMap<String, StubSpec>>,
}

impl StubberInner {
    fn lock_store(&self) -> MutexGuard<'_, HashMap<String, StubSpec>> {
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Mechanism to stub command executions for the current test process.
pub struct ExecStubber {
    inner: Arc<StubberInner>,
}

impl Default for ExecStubber {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecStubber {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StubberInner {
                store: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Install a stub so that executing `cmd_to_stub` yields what
    /// `stub_func` produces. Returns the stub key identifying the
    /// registration.
    ///
    /// A command defined by path cannot be hijacked through discovery and
    /// is rejected. Registering a command that already has a live setup
    /// discards the old one first.
    ///
    /// In static mode `stub_func` is evaluated exactly once, here, with a
    /// zero-valued request; the stand-in replays the result on its own.
    pub fn register(
        &self,
        cmd_to_stub: &str,
        stub_func: StubFunc,
        settings: Settings,
    ) -> Result<String> {
        let cmd = cmd_to_stub.trim();
        if cmd.is_empty() || is_path(cmd) {
            return Err(StubError::InvalidArgument(format!(
                "cmd_to_stub must be a bare command name, neither absolute nor relative path: {cmd_to_stub:?}"
            )));
        }

        // Discovery mutates process-wide environment, so one command name
        // supports only one setup per process; command plus pid makes that
        // collision visible and keys stable across re-registration.
        let stub_key = format!("{cmd}_{}", process::id());

        let mut store = self.inner.lock_store();
        if let Some(old) = store.remove(&stub_key) {
            warn!(key = %stub_key, "discarding old stub setting");
            teardown_spec(&stub_key, old);
        }

        let harness_exe = env::current_exe()?;
        let dirs = install::create_install_dirs(&stub_key, cmd, &settings)?;

        let mut cfg = CmdConfig {
            stub_key: stub_key.clone(),
            cmd_to_stub: cmd.to_string(),
            unit_test_exec: harness_exe.display().to_string(),
            helper_method: settings.helper_method.clone().unwrap_or_default(),
            data_dir: dirs.data_dir.display().to_string(),
            timeout: Some(settings.timeout),
            ..CmdConfig::default()
        };
        if settings.is_static() {
            let outcome = stub_func(&StubRequest::default());
            cfg.static_stdout = outcome.stdout;
            cfg.static_stderr = outcome.stderr;
            cfg.exit_code = Some(outcome.exit_code);
            if !outcome.internal_err_txt.is_empty() {
                cfg.static_stderr
                    .extend_from_slice(outcome.internal_err_txt.as_bytes());
                cfg.exit_code = Some(INTERNAL_FAILURE_EXIT_CODE);
            }
        }

        if let Err(e) = cfg.save(&dirs.bin_dir) {
            rollback_dirs(&dirs);
            return Err(e);
        }
        if let Err(e) = install::write_stand_in(&dirs, settings.exec_kind) {
            rollback_dirs(&dirs);
            return Err(e);
        }

        let mut channel = None;
        if settings.is_dynamic() {
            let mut ch = match StubbingComChannel::new(&dirs.exec_path) {
                Ok(ch) => ch,
                Err(e) => {
                    rollback_dirs(&dirs);
                    return Err(e);
                }
            };
            if let Some((request_rx, response_tx)) = ch.take_endpoints() {
                spawn_responder(Arc::clone(&self.inner), request_rx, response_tx);
            }
            channel = Some(ch);
        }

        // Environment edit last: sidecar, stand-in and fifo pair all exist
        // before the command becomes discoverable.
        let reset_discovery = apply_discovery_env(&dirs.home_dir, &settings);
        debug!(
            key = %stub_key,
            exec = %dirs.exec_path.display(),
            "stub installed and discoverable"
        );

        store.insert(
            stub_key.clone(),
            StubSpec {
                stub_func,
                dirs,
                channel,
                reset_discovery: Some(reset_discovery),
            },
        );
        Ok(stub_key)
    }

    /// Remove the registration identified by `key`: stop its responder,
    /// close and remove the fifo pair, restore the discovery environment
    /// and delete the per-stub directory tree. Unknown keys are ignored.
    pub fn unregister(&self, key: &str) {
        let mut store = self.inner.lock_store();
        if let Some(spec) = store.remove(key) {
            teardown_spec(key, spec);
        }
    }

    /// Unregister every known stub. The stubber stays usable afterwards.
    pub fn cleanup(&self) {
        let mut store = self.inner.lock_store();
        for (key, spec) in store.drain() {
            teardown_spec(&key, spec);
        }
    }

    /// All persisted requests of the registration identified by `key`, in
    /// call order. The empty list for an unknown key.
    pub fn find_all_persisted_requests(&self, key: &str) -> Result<Vec<StubRequest>> {
        match self.data_dir_of(key) {
            None => Ok(Vec::new()),
            Some(data_dir) => RequestDirRepo::new(data_dir).find_all(),
        }
    }

    /// Delete all persisted requests of the registration identified by
    /// `key`. A no-op for an unknown key.
    pub fn delete_all_persisted_requests(&self, key: &str) -> Result<()> {
        match self.data_dir_of(key) {
            None => Ok(()),
            Some(data_dir) => RequestDirRepo::new(data_dir).delete_all(),
        }
    }

    fn data_dir_of(&self, key: &str) -> Option<std::path::PathBuf> {
        let store = self.inner.lock_store();
        store.get(key).map(|spec| spec.dirs.data_dir.clone())
    }

    #[cfg(test)]
    fn live_keys(&self) -> Vec<String> {
        self.inner.lock_store().keys().cloned().collect()
    }
}

impl Drop for ExecStubber {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// `true` when the trimmed name would not survive a `file_name` round trip,
/// i.e. it carries directory components.
fn is_path(cmd: &str) -> bool {
    Path::new(cmd)
        .file_name()
        .map_or(true, |name| name != std::ffi::OsStr::new(cmd))
}

fn rollback_dirs(dirs: &InstallDirs) {
    if let Err(e) = fs::remove_dir_all(&dirs.home_dir) {
        if e.kind() != ErrorKind::NotFound {
            warn!(home = %dirs.home_dir.display(), "fail to roll back stub home: {e}");
        }
    }
}

fn teardown_spec(key: &str, mut spec: StubSpec) {
    debug!(key, "unregistering stub");
    if let Some(mut channel) = spec.channel.take() {
        channel.close();
    }
    if let Some(reset) = spec.reset_discovery.take() {
        reset.apply();
    }
    if let Err(e) = fs::remove_dir_all(&spec.dirs.home_dir) {
        if e.kind() != ErrorKind::NotFound {
            warn!(key, home = %spec.dirs.home_dir.display(), "fail to remove stub home: {e}");
        }
    }
}

/// Make the stand-in discoverable instead of the actual executable and
/// return the matching undo edit.
fn apply_discovery_env(home_dir: &Path, settings: &Settings) -> DiscoveryReset {
    let home = home_dir.display().to_string();
    match &settings.discovery {
        Discovery::SearchPath => {
            let mut path = EnvPath::from_current();
            path.position_first(&home);
            env::set_var(PATH_VAR, path.to_string());
            DiscoveryReset::SearchPath { home_dir: home }
        }
        Discovery::HomeBinDir { env_home_key, .. } => {
            let replaced = env::var(env_home_key).ok();
            env::set_var(env_home_key, &home);
            DiscoveryReset::HomeBin {
                env_key: env_home_key.clone(),
                installed: home,
                replaced,
            }
        }
    }
}

/// One responder per dynamic stub: requests in, outcomes out, until its
/// request channel closes. The outcome function runs outside the
/// registration lock; only the lookup takes it.
fn spawn_responder(
    inner: Arc<StubberInner>,
    request_rx: Receiver<StubRequest>,
    response_tx: SyncSender<ExecOutcome>,
) {
    let spawned = thread::Builder::new()
        .name("cmdstub-responder".to_string())
        .spawn(move || {
            while let Ok(req) = request_rx.recv() {
                let mut outcome = do_stub(&inner, &req);
                if outcome.has_internal_err() {
                    outcome.exit_code = INTERNAL_FAILURE_EXIT_CODE;
                }
                if response_tx.send(outcome).is_err() {
                    break;
                }
            }
            debug!("responder loop finished");
        });
    if let Err(e) = spawned {
        warn!("fail to spawn responder thread: {e}");
    }
}

fn do_stub(inner: &StubberInner, req: &StubRequest) -> ExecOutcome {
    let (stub_func, known_keys) = {
        let store = inner.lock_store();
        (
            store.get(&req.key).map(|spec| Arc::clone(&spec.stub_func)),
            store.keys().cloned().collect::<Vec<_>>(),
        )
    };
    let Some(stub_func) = stub_func else {
        return ExecOutcome::internal_failure(
            &req.key,
            format!(
                "cannot stub because the command has not been registered or has been removed: \
                 request={req:?}, known keys={known_keys:?}"
            ),
        );
    };
    // a panicking user function must not kill the responder
    match catch_unwind(AssertUnwindSafe(|| stub_func(req))) {
        Ok(outcome) => outcome,
        Err(_) => ExecOutcome::internal_failure(
            &req.key,
            format!("stub function panicked while handling request {req:?}"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmdstub_core::outcome::{fixed, recording};
    use std::sync::Mutex as StdMutex;

    // the discovery environment is process-global
    static ENV_LOCK: StdMutex<()> = StdMutex::new(());

    fn outcome(stdout: &str) -> ExecOutcome {
        ExecOutcome {
            stdout: stdout.as_bytes().to_vec(),
            ..ExecOutcome::default()
        }
    }

    #[test]
    fn test_register_rejects_paths() {
        let stubber = ExecStubber::new();
        for bad in ["a/b", "/usr/bin/ls", "./tool", ""] {
            let err = stubber
                .register(bad, fixed(outcome("x")), Settings::default())
                .unwrap_err();
            assert!(matches!(err, StubError::InvalidArgument(_)), "{bad}: {err}");
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_register_unregister_search_path_roundtrip() {
        let _guard = ENV_LOCK.lock().unwrap();
        let path_before = env::var(PATH_VAR).unwrap_or_default();

        let stubber = ExecStubber::new();
        let settings = Settings::default().shell_exec();
        let key = stubber
            .register("roundtrip_tool", fixed(outcome("x")), settings)
            .unwrap();

        let home_dir = {
            let store = stubber.inner.lock_store();
            store.get(&key).unwrap().dirs.home_dir.clone()
        };
        assert!(home_dir.join("roundtrip_tool").is_file());
        assert!(home_dir.join("roundtrip_tool.config").is_file());
        let live_path = EnvPath::from_current();
        assert!(live_path.contains(&home_dir.display().to_string()));

        stubber.unregister(&key);
        assert!(!home_dir.exists());
        // editing normalizes the value (trim, dedupe), compare normalized
        assert_eq!(
            env::var(PATH_VAR).unwrap_or_default(),
            EnvPath::new(&path_before).to_string()
        );
        assert!(stubber.live_keys().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_static_mode_evaluates_stub_func_once_at_registration() {
        let _guard = ENV_LOCK.lock().unwrap();
        let stubber = ExecStubber::new();
        let (stub_func, log) = recording(fixed(outcome("static out")));
        let settings = Settings::default().static_mode().shell_exec();
        let key = stubber
            .register("static_once_tool", stub_func, settings)
            .unwrap();

        {
            let seen = log.lock().unwrap();
            assert_eq!(seen.len(), 1);
            assert_eq!(seen[0], StubRequest::default());
        }

        // the static fields landed in the sidecar
        let exec_path = {
            let store = stubber.inner.lock_store();
            store.get(&key).unwrap().dirs.exec_path.clone()
        };
        let cfg = CmdConfig::for_command(&exec_path).unwrap();
        assert!(cfg.use_static_outcome());
        assert_eq!(cfg.static_stdout, b"static out");
        assert_eq!(cfg.exit_code, Some(0));

        stubber.cleanup();
    }

    #[cfg(unix)]
    #[test]
    fn test_home_bin_env_is_captured_and_restored() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("CMDSTUB_TEST_HOME", "/original/home");

        let stubber = ExecStubber::new();
        let settings = Settings::default()
            .static_mode()
            .shell_exec()
            .discovered_by_home_bin("CMDSTUB_TEST_HOME", &["bin"]);
        let key = stubber
            .register("homebin_tool", fixed(outcome("x")), settings)
            .unwrap();

        let installed = env::var("CMDSTUB_TEST_HOME").unwrap();
        assert_ne!(installed, "/original/home");
        assert!(Path::new(&installed).join("bin").join("homebin_tool").is_file());

        stubber.unregister(&key);
        assert_eq!(env::var("CMDSTUB_TEST_HOME").unwrap(), "/original/home");
        env::remove_var("CMDSTUB_TEST_HOME");
    }

    #[cfg(unix)]
    #[test]
    fn test_home_bin_env_unset_when_it_was_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::remove_var("CMDSTUB_TEST_HOME_UNSET");

        let stubber = ExecStubber::new();
        let settings = Settings::default()
            .static_mode()
            .shell_exec()
            .discovered_by_home_bin("CMDSTUB_TEST_HOME_UNSET", &[]);
        let key = stubber
            .register("homebin_unset_tool", fixed(outcome("x")), settings)
            .unwrap();
        assert!(env::var("CMDSTUB_TEST_HOME_UNSET").is_ok());

        stubber.unregister(&key);
        assert!(env::var("CMDSTUB_TEST_HOME_UNSET").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_reregistration_replaces_previous_setup() {
        let _guard = ENV_LOCK.lock().unwrap();
        let stubber = ExecStubber::new();
        let settings = Settings::default().static_mode().shell_exec();

        let key1 = stubber
            .register("replace_tool", fixed(outcome("one")), settings.clone())
            .unwrap();
        let home1 = {
            let store = stubber.inner.lock_store();
            store.get(&key1).unwrap().dirs.home_dir.clone()
        };
        let key2 = stubber
            .register("replace_tool", fixed(outcome("two")), settings)
            .unwrap();

        assert_eq!(key1, key2);
        assert_eq!(stubber.live_keys(), vec![key2.clone()]);
        assert!(!home1.exists(), "old setup must be fully torn down");

        stubber.cleanup();
    }

    #[test]
    fn test_find_all_for_unknown_key_is_empty() {
        let stubber = ExecStubber::new();
        assert!(stubber.find_all_persisted_requests("nope").unwrap().is_empty());
        stubber.delete_all_persisted_requests("nope").unwrap();
    }

    #[test]
    fn test_do_stub_reports_unknown_key() {
        let stubber = ExecStubber::new();
        let req = StubRequest::new("ghost", "tool", vec![]);
        let outcome = do_stub(&stubber.inner, &req);
        assert_eq!(outcome.exit_code, INTERNAL_FAILURE_EXIT_CODE);
        assert!(outcome.internal_err_txt.contains("has not been registered"));
    }
}
