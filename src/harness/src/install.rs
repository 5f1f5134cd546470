//! Per-stub installation: directory layout, stand-in binary, rollback.
//!
//! One registration gets its own home directory next to the harness
//! executable:
//!
//! ```text
//! <harness-exe-dir>/<stub-key>_<random>/     home
//!     [<bin-sub-dirs>/]                      only for home-bin discovery
//!         <command-name>                     the stand-in
//!         <command-name>.config              the sidecar
//!     data/                                  request repository
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use cmdstub_core::error::{Result, StubError};
use cmdstub_core::settings::{Discovery, ExecKind, Settings};
use cmdstub_core::util::next_rand_hex;
use tracing::debug;

use crate::assets::SHELL_STANDIN_SCRIPT;

/// Overrides the native stand-in lookup with an explicit executable path.
pub const STANDIN_EXE_ENV: &str = "CMDSTUB_STANDIN_EXE";

const STANDIN_EXE_NAME: &str = if cfg!(windows) {
    "cmdstub-standin.exe"
} else {
    "cmdstub-standin"
};

/// Paths of one per-stub installation.
#[derive(Debug, Clone)]
pub struct InstallDirs {
    pub home_dir: PathBuf,
    pub bin_dir: PathBuf,
    pub exec_path: PathBuf,
    pub data_dir: PathBuf,
}

/// Create the per-stub directory tree. Concurrent registrations must not
/// share a directory, hence the random home suffix.
pub fn create_install_dirs(
    stub_key: &str,
    cmd_to_stub: &str,
    settings: &Settings,
) -> Result<InstallDirs> {
    let harness_exe = env::current_exe()?;
    let base_dir = harness_exe
        .parent()
        .ok_or_else(|| {
            StubError::InvalidArgument(format!(
                "harness executable {} has no parent directory",
                harness_exe.display()
            ))
        })?
        .to_path_buf();

    let home_dir = base_dir.join(format!("{stub_key}_{}", next_rand_hex()));
    let data_dir = home_dir.join("data");
    let mut bin_dir = home_dir.clone();
    if let Discovery::HomeBinDir { bin_dirs, .. } = &settings.discovery {
        for sub in bin_dirs {
            bin_dir = bin_dir.join(sub);
        }
    }
    let exec_path = bin_dir.join(cmd_to_stub);

    fs::create_dir_all(&bin_dir).map_err(|e| {
        StubError::Io(std::io::Error::new(
            e.kind(),
            format!("fail to create exec dir {}: {e}", bin_dir.display()),
        ))
    })?;
    if let Err(e) = fs::create_dir_all(&data_dir) {
        let _ = fs::remove_dir_all(&home_dir);
        return Err(StubError::Io(std::io::Error::new(
            e.kind(),
            format!("fail to create data dir {}: {e}", data_dir.display()),
        )));
    }

    debug!(home = %home_dir.display(), exec = %exec_path.display(), "stub installation tree created");
    Ok(InstallDirs {
        home_dir,
        bin_dir,
        exec_path,
        data_dir,
    })
}

/// Put the stand-in in place, with execute permission.
pub fn write_stand_in(dirs: &InstallDirs, kind: ExecKind) -> Result<()> {
    match kind {
        ExecKind::Shell => {
            if cfg!(windows) {
                return Err(StubError::InvalidArgument(
                    "shell stand-in is unavailable on platforms without a POSIX shell".to_string(),
                ));
            }
            fs::write(&dirs.exec_path, SHELL_STANDIN_SCRIPT)?;
        }
        ExecKind::Native => {
            let standin = locate_standin_exe()?;
            fs::copy(&standin, &dirs.exec_path).map_err(|e| {
                StubError::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "fail to copy stand-in {} to {}: {e}",
                        standin.display(),
                        dirs.exec_path.display()
                    ),
                ))
            })?;
        }
    }
    make_executable(&dirs.exec_path)
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// Find the compiled stand-in executable.
///
/// Looks at the `CMDSTUB_STANDIN_EXE` override first, then next to the
/// current executable and up to two directories above it; test binaries
/// live in `target/<profile>/deps/` while the stand-in lands in
/// `target/<profile>/`.
pub fn locate_standin_exe() -> Result<PathBuf> {
    if let Ok(explicit) = env::var(STANDIN_EXE_ENV) {
        let explicit = PathBuf::from(explicit);
        if explicit.is_file() {
            return Ok(explicit);
        }
        return Err(StubError::InvalidArgument(format!(
            "{STANDIN_EXE_ENV} points to {} which does not exist",
            explicit.display()
        )));
    }

    let mut searched = Vec::new();
    let current = env::current_exe()?;
    let mut dir = current.parent();
    for _ in 0..3 {
        let Some(d) = dir else { break };
        let candidate = d.join(STANDIN_EXE_NAME);
        if candidate.is_file() {
            return Ok(candidate);
        }
        searched.push(candidate.display().to_string());
        dir = d.parent();
    }

    Err(StubError::InvalidArgument(format!(
        "could not find the {STANDIN_EXE_NAME} executable (searched {searched:?}); \
         build it or set {STANDIN_EXE_ENV}"
    )))
}
