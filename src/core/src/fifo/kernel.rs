//! Kernel-FIFO back-end, Unix only.
//!
//! Opens never block past their deadline: write-only opens retry a
//! non-blocking open until a reader shows up, read-only opens succeed
//! immediately and the subsequent reads poll against the deadline.
//! Read-write opens never block on a FIFO and keep a blocking descriptor,
//! which is what the harness-side responder threads want.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::stat::Mode;

use super::Direction;
use crate::error::{Result, StubError};

const OPEN_RETRY_PAUSE: Duration = Duration::from_millis(10);
const READ_POLL_PAUSE: Duration = Duration::from_millis(5);

pub struct KernelFifo {
    file: File,
    path: PathBuf,
    pending: Vec<u8>,
}

pub fn create(path: &Path) -> Result<()> {
    nix::unistd::mkfifo(path, Mode::S_IRWXU | Mode::S_IRWXG).map_err(|e| {
        StubError::Transport(format!(
            "could not create named pipe at {}: {e}",
            path.display()
        ))
    })
}

pub fn open(path: &Path, direction: Direction, timeout: Duration) -> Result<KernelFifo> {
    let deadline = Instant::now() + timeout;
    let file = match direction {
        Direction::ReadWrite => OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| {
                StubError::Transport(format!(
                    "error opening fifo {} read-write: {e}",
                    path.display()
                ))
            })?,
        Direction::Read => OpenOptions::new()
            .read(true)
            .custom_flags(nix::libc::O_NONBLOCK)
            .open(path)
            .map_err(|e| {
                StubError::Transport(format!(
                    "error opening fifo {} for reading: {e}",
                    path.display()
                ))
            })?,
        Direction::Write => open_writer_until(path, deadline)?,
    };
    Ok(KernelFifo {
        file,
        path: path.to_path_buf(),
        pending: Vec::new(),
    })
}

/// A non-blocking write-only open of a FIFO fails with ENXIO until a reader
/// has the other end; retry until the deadline.
fn open_writer_until(path: &Path, deadline: Instant) -> Result<File> {
    loop {
        match OpenOptions::new()
            .write(true)
            .custom_flags(nix::libc::O_NONBLOCK)
            .open(path)
        {
            Ok(file) => return Ok(file),
            Err(e) if e.raw_os_error() == Some(nix::libc::ENXIO) => {
                if Instant::now() >= deadline {
                    return Err(StubError::Timeout(format!(
                        "no reader showed up on fifo {} before the timeout",
                        path.display()
                    )));
                }
                thread::sleep(OPEN_RETRY_PAUSE);
            }
            Err(e) => {
                return Err(StubError::Transport(format!(
                    "error opening fifo {} for writing: {e}",
                    path.display()
                )))
            }
        }
    }
}

impl KernelFifo {
    /// Read the next newline-terminated record, without the newline. Bytes
    /// past the newline stay buffered for the next call.
    pub fn read_record(&mut self, deadline: Option<Instant>) -> Result<Vec<u8>> {
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
                let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
                line.pop();
                return Ok(line);
            }
            match self.file.read(&mut chunk) {
                // 0 on a non-blocking read end means: no writer yet
                Ok(0) => self.pause_or_timeout(deadline, "reading record")?,
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e)
                    if e.kind() == ErrorKind::WouldBlock
                        || e.kind() == ErrorKind::Interrupted =>
                {
                    self.pause_or_timeout(deadline, "reading record")?
                }
                Err(e) => {
                    return Err(StubError::Transport(format!(
                        "error reading from fifo {}: {e}",
                        self.path.display()
                    )))
                }
            }
        }
    }

    /// Write `bytes` plus a record-terminating newline.
    pub fn write_record(&mut self, bytes: &[u8], deadline: Option<Instant>) -> Result<()> {
        let mut buf = Vec::with_capacity(bytes.len() + 1);
        buf.extend_from_slice(bytes);
        buf.push(b'\n');
        let mut written = 0;
        while written < buf.len() {
            match self.file.write(&buf[written..]) {
                Ok(0) => self.pause_or_timeout(deadline, "writing record")?,
                Ok(n) => written += n,
                Err(e)
                    if e.kind() == ErrorKind::WouldBlock
                        || e.kind() == ErrorKind::Interrupted =>
                {
                    self.pause_or_timeout(deadline, "writing record")?
                }
                Err(e) => {
                    return Err(StubError::Transport(format!(
                        "error writing to fifo {}: {e}",
                        self.path.display()
                    )))
                }
            }
        }
        let _ = self.file.flush();
        Ok(())
    }

    fn pause_or_timeout(&self, deadline: Option<Instant>, what: &str) -> Result<()> {
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return Err(StubError::Timeout(format!(
                    "{what} on fifo {}",
                    self.path.display()
                )));
            }
        }
        thread::sleep(READ_POLL_PAUSE);
        Ok(())
    }
}
