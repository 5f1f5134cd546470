//! File-directory FIFO emulation for platforms without kernel FIFOs.
//!
//! Each message is a separate file named `msg_<20-digit-nanosecond-timestamp>`
//! under a per-FIFO directory. The reader polls the directory and consumes
//! the oldest name strictly greater than the last one it processed; the
//! writer sleeps at least 2 ms between writes so timestamps stay distinct.
//! The poll loop re-checks its deadline on every iteration, a reader can
//! never outlive its timeout.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use super::Direction;
use crate::error::{Result, StubError};

const MESSAGE_FILE_PREFIX: &str = "msg_";
const POLL_PAUSE: Duration = Duration::from_millis(100);
const WRITE_SPACING: Duration = Duration::from_millis(2);

pub struct EmulatedFifo {
    dir: PathBuf,
    last_consumed: String,
    pending: Vec<u8>,
}

pub fn create(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

pub fn open(path: &Path, _direction: Direction, _timeout: Duration) -> Result<EmulatedFifo> {
    // a peer may open before create ran on its side
    fs::create_dir_all(path)?;
    Ok(EmulatedFifo {
        dir: path.to_path_buf(),
        last_consumed: String::new(),
        pending: Vec::new(),
    })
}

impl EmulatedFifo {
    /// Read the next newline-terminated record, without the newline. Bytes
    /// past the newline stay buffered for the next call.
    pub fn read_record(&mut self, deadline: Option<Instant>) -> Result<Vec<u8>> {
        loop {
            if let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
                let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
                line.pop();
                return Ok(line);
            }
            match self.take_oldest_unconsumed()? {
                Some(bytes) => self.pending.extend_from_slice(&bytes),
                None => {
                    if let Some(deadline) = deadline {
                        if Instant::now() >= deadline {
                            return Err(StubError::Timeout(format!(
                                "reading record from emulated fifo {}",
                                self.dir.display()
                            )));
                        }
                    }
                    thread::sleep(POLL_PAUSE);
                }
            }
        }
    }

    /// Write `bytes` plus a record-terminating newline as one message file.
    pub fn write_record(&mut self, bytes: &[u8], _deadline: Option<Instant>) -> Result<()> {
        thread::sleep(WRITE_SPACING);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let path = self.dir.join(format!("{MESSAGE_FILE_PREFIX}{nanos:020}"));
        let mut buf = Vec::with_capacity(bytes.len() + 1);
        buf.extend_from_slice(bytes);
        buf.push(b'\n');
        fs::write(path, buf)?;
        Ok(())
    }

    /// Pick, read and delete the oldest message file not yet consumed.
    /// Files that vanish or cannot be read are skipped; the peer may be
    /// racing us.
    fn take_oldest_unconsumed(&mut self) -> Result<Option<Vec<u8>>> {
        let mut names: Vec<String> = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let Ok(entry) = entry else { continue };
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with(MESSAGE_FILE_PREFIX) && name.as_str() > self.last_consumed.as_str()
            {
                names.push(name);
            }
        }
        names.sort();
        for name in names {
            let path = self.dir.join(&name);
            if let Ok(bytes) = fs::read(&path) {
                let _ = fs::remove_file(&path);
                self.last_consumed = name;
                return Ok(Some(bytes));
            }
        }
        Ok(None)
    }
}
