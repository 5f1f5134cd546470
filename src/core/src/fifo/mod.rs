//! Named-pipe transport.
//!
//! Two back-ends share one interface: kernel FIFOs where the OS has them
//! (Unix), and a file-directory emulation everywhere else. Opens and reads
//! honour their timeout; on expiry they fail with [`StubError::Timeout`]
//! instead of hanging the stubbed process.

pub mod emulated;
#[cfg(unix)]
pub mod kernel;

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::codec;
use crate::error::{Result, StubError};
use crate::protocol::{ExecOutcome, StubRequest};

/// How an endpoint intends to use the FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
    ReadWrite,
}

/// One open FIFO endpoint, backed by whatever the platform provides.
pub enum FifoStream {
    #[cfg(unix)]
    Kernel(kernel::KernelFifo),
    Emulated(emulated::EmulatedFifo),
}

/// Create the FIFO at `path`.
#[cfg(unix)]
pub fn create(path: &Path) -> Result<()> {
    tracing::debug!(path = %path.display(), "creating fifo");
    kernel::create(path)
}

/// Create the FIFO at `path`.
#[cfg(not(unix))]
pub fn create(path: &Path) -> Result<()> {
    tracing::debug!(path = %path.display(), "creating emulated fifo");
    emulated::create(path)
}

/// Open the FIFO at `path`. The open itself never blocks past `timeout`.
#[cfg(unix)]
pub fn open(path: &Path, direction: Direction, timeout: Duration) -> Result<FifoStream> {
    Ok(FifoStream::Kernel(kernel::open(path, direction, timeout)?))
}

/// Open the FIFO at `path`. The open itself never blocks past `timeout`.
#[cfg(not(unix))]
pub fn open(path: &Path, direction: Direction, timeout: Duration) -> Result<FifoStream> {
    open_emulated(path, direction, timeout)
}

/// Open the file-directory emulation explicitly, on any platform. The
/// regular [`open`] picks it only where kernel FIFOs are missing.
pub fn open_emulated(path: &Path, direction: Direction, timeout: Duration) -> Result<FifoStream> {
    Ok(FifoStream::Emulated(emulated::open(path, direction, timeout)?))
}

/// Remove the FIFO artifact at `path`: a pipe file for the kernel back-end,
/// a message directory for the emulation. Already-gone is fine.
pub fn remove(path: &Path) -> Result<()> {
    let removed = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match removed {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "fifo removed");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StubError::Io(e)),
    }
}

impl FifoStream {
    /// Read the next newline-terminated record. `None` blocks indefinitely,
    /// which only the harness-side read-write endpoints do.
    pub fn read_record(&mut self, timeout: Option<Duration>) -> Result<Vec<u8>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        match self {
            #[cfg(unix)]
            FifoStream::Kernel(fifo) => fifo.read_record(deadline),
            FifoStream::Emulated(fifo) => fifo.read_record(deadline),
        }
    }

    /// Write one record; a newline terminator is appended.
    pub fn write_record(&mut self, bytes: &[u8], timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.map(|t| Instant::now() + t);
        match self {
            #[cfg(unix)]
            FifoStream::Kernel(fifo) => fifo.write_record(bytes, deadline),
            FifoStream::Emulated(fifo) => fifo.write_record(bytes, deadline),
        }
    }
}

/// Encode `req` and send it over the FIFO at `path`.
pub fn write_request_to_pipe(path: &Path, req: &StubRequest, timeout: Duration) -> Result<()> {
    let mut stream = open(path, Direction::Write, timeout)?;
    stream.write_record(codec::encode_request(req).as_bytes(), Some(timeout))
}

/// Receive and decode one outcome from the FIFO at `path`. The timeout
/// covers both the open and the wait for bytes; a successful open with a
/// silent peer still fails on time.
pub fn read_outcome_from_pipe(path: &Path, timeout: Duration) -> Result<ExecOutcome> {
    let mut stream = open(path, Direction::Read, timeout)?;
    let line = stream.read_record(Some(timeout))?;
    let line = String::from_utf8(line)
        .map_err(|e| StubError::Codec(format!("outcome record is not valid UTF-8: {e}")))?;
    codec::decode_outcome(&line)
}
