//! Append-only on-disk log of stub requests.
//!
//! Each saved request is one codec-encoded line in its own file under the
//! stub's data directory. File names embed a sortable timestamp plus a
//! random suffix, so a plain name sort reproduces arrival order.

use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use crate::codec;
use crate::error::{Result, StubError};
use crate::protocol::StubRequest;
use crate::util::next_rand_u16;

/// Literal prefix of every request file. Listing and deletion only touch
/// files carrying it, unrelated files in the data directory are preserved.
pub const REQUEST_FILE_PREFIX: &str = "ser_stubrequest_";

/// Repository of stub requests rooted at one data directory.
#[derive(Debug, Clone)]
pub struct RequestDirRepo {
    data_dir: PathBuf,
}

impl RequestDirRepo {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Persist one request into a newly named file.
    pub fn save(&self, req: &StubRequest) -> Result<()> {
        if req.key.trim().is_empty() {
            return Err(StubError::InvalidArgument(format!(
                "invalid key: request to save must carry a stub key, req={req:?}"
            )));
        }
        self.validate_data_dir("save")?;

        let target = self.data_dir.join(next_request_file_name());
        let line = format!("{}\n", codec::encode_request(req));
        if let Err(e) = fs::write(&target, line) {
            let _ = fs::remove_file(&target);
            return Err(StubError::Io(e));
        }
        Ok(())
    }

    /// All persisted requests, in arrival order.
    pub fn find_all(&self) -> Result<Vec<StubRequest>> {
        self.validate_data_dir("find_all")?;
        let mut files = self.request_files()?;
        files.sort();

        let mut requests = Vec::with_capacity(files.len());
        for file in files {
            let text = fs::read_to_string(&file)?;
            let line = text.lines().next().unwrap_or_default();
            let req = codec::decode_request(line).map_err(|e| {
                StubError::Codec(format!(
                    "fail to decode request from file {}: {e}",
                    file.display()
                ))
            })?;
            requests.push(req);
        }
        Ok(requests)
    }

    /// Delete every persisted request; files without the request prefix are
    /// left alone.
    pub fn delete_all(&self) -> Result<()> {
        self.validate_data_dir("delete_all")?;
        let mut bogus_removals = Vec::new();
        for file in self.request_files()? {
            if let Err(e) = fs::remove_file(&file) {
                bogus_removals.push(format!("{}: {e}", file.display()));
            }
        }
        if !bogus_removals.is_empty() {
            return Err(StubError::InvalidArgument(format!(
                "delete_all could not delete all request files: {bogus_removals:?}"
            )));
        }
        Ok(())
    }

    fn validate_data_dir(&self, action: &str) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(StubError::InvalidArgument(format!(
                "data directory not configured, so cannot do <{action}>"
            )));
        }
        Ok(())
    }

    fn request_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            if entry
                .file_name()
                .to_str()
                .is_some_and(|n| n.starts_with(REQUEST_FILE_PREFIX))
            {
                files.push(entry.path());
            }
        }
        Ok(files)
    }
}

/// Next request-file name, chronologically sortable.
///
/// Millisecond resolution alone yields duplicate names on fast hosts, so a
/// 2 ms sleep precedes the naming and random bits are appended.
fn next_request_file_name() -> String {
    thread::sleep(Duration::from_millis(2));
    let now = chrono::Local::now().format("%Y-%m-%d-%H-%M-%S-%f");
    format!("{REQUEST_FILE_PREFIX}{now}_{:06}", next_rand_u16())
}
