//! Inter-process channel between the harness and one stub's stand-ins.
//!
//! Two half-duplex FIFOs per registration: the stand-in writes requests to
//! the stubber pipe, the harness writes outcomes to the helper pipe. The
//! named pipes are bridged onto bounded in-process queues by a reader and a
//! writer thread, so the responder only ever deals with channels.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::thread;
use std::time::Duration;

use cmdstub_core::codec;
use cmdstub_core::error::Result;
use cmdstub_core::fifo::{self, Direction, FifoStream};
use cmdstub_core::protocol::{ExecOutcome, StubRequest};
use cmdstub_core::sidecar::{HELPER_PIPE_INFIX, STUBBER_PIPE_INFIX};
use cmdstub_core::util::next_rand_hex;
use tracing::{debug, warn};

const CHANNEL_CAPACITY: usize = 8;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
const SENTINEL_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// The communication channel of one dynamic registration.
pub struct StubbingComChannel {
    pub stubber_pipe_path: PathBuf,
    pub helper_pipe_path: PathBuf,
    endpoints: Option<(Receiver<StubRequest>, SyncSender<ExecOutcome>)>,
    reader_done: Receiver<()>,
    writer_done: Receiver<()>,
    closed: bool,
}

impl StubbingComChannel {
    /// Create both FIFOs next to the stand-in at `exec_path`, open the
    /// harness-side read-write ends and start the bridging threads.
    pub fn new(exec_path: &Path) -> Result<Self> {
        let rand = next_rand_hex();
        let stubber_pipe_path = pipe_path(exec_path, STUBBER_PIPE_INFIX, &rand);
        let helper_pipe_path = pipe_path(exec_path, HELPER_PIPE_INFIX, &rand);

        fifo::create(&stubber_pipe_path)?;
        if let Err(e) = fifo::create(&helper_pipe_path) {
            let _ = fifo::remove(&stubber_pipe_path);
            return Err(e);
        }

        // A read-write open of a FIFO never blocks; holding it also keeps
        // the pipe connected for short-lived stand-in peers.
        let request_stream = match fifo::open(
            &stubber_pipe_path,
            Direction::ReadWrite,
            SENTINEL_WRITE_TIMEOUT,
        ) {
            Ok(stream) => stream,
            Err(e) => {
                let _ = fifo::remove(&stubber_pipe_path);
                let _ = fifo::remove(&helper_pipe_path);
                return Err(e);
            }
        };
        let response_stream = match fifo::open(
            &helper_pipe_path,
            Direction::ReadWrite,
            SENTINEL_WRITE_TIMEOUT,
        ) {
            Ok(stream) => stream,
            Err(e) => {
                let _ = fifo::remove(&stubber_pipe_path);
                let _ = fifo::remove(&helper_pipe_path);
                return Err(e);
            }
        };

        let (request_tx, request_rx) = sync_channel(CHANNEL_CAPACITY);
        let (response_tx, response_rx) = sync_channel(CHANNEL_CAPACITY);
        let (reader_done_tx, reader_done) = sync_channel(1);
        let (writer_done_tx, writer_done) = sync_channel(1);

        {
            let pipe = stubber_pipe_path.clone();
            thread::spawn(move || run_request_reader(request_stream, request_tx, reader_done_tx, pipe));
        }
        {
            let pipe = helper_pipe_path.clone();
            thread::spawn(move || {
                run_response_writer(response_stream, response_rx, writer_done_tx, pipe)
            });
        }

        Ok(Self {
            stubber_pipe_path,
            helper_pipe_path,
            endpoints: Some((request_rx, response_tx)),
            reader_done,
            writer_done,
            closed: false,
        })
    }

    /// Hand the responder its ends of the in-process queues. Yields once.
    pub fn take_endpoints(&mut self) -> Option<(Receiver<StubRequest>, SyncSender<ExecOutcome>)> {
        self.endpoints.take()
    }

    /// Shut the channel down: wake the reader with the stop sentinel, let
    /// the queue teardown cascade through responder and writer, wait
    /// briefly for both threads, then remove the pipe files. Never blocks
    /// beyond the drain timeout.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        // The reader may be parked in a blocking FIFO read; closing the
        // channel alone would not wake it, an explicit message does.
        let sentinel = StubRequest::stop_sentinel();
        if let Err(e) =
            fifo::write_request_to_pipe(&self.stubber_pipe_path, &sentinel, SENTINEL_WRITE_TIMEOUT)
        {
            warn!(pipe = %self.stubber_pipe_path.display(), "fail to send stop sentinel: {e}");
        }
        self.endpoints = None;

        for (done, name) in [
            (&self.reader_done, "request reader"),
            (&self.writer_done, "response writer"),
        ] {
            if done.recv_timeout(DRAIN_TIMEOUT).is_err() {
                warn!("timeout waiting for {name} to stop");
            }
        }

        for pipe in [&self.stubber_pipe_path, &self.helper_pipe_path] {
            if let Err(e) = fifo::remove(pipe) {
                warn!(pipe = %pipe.display(), "fail to remove pipe: {e}");
            }
        }
    }
}

impl Drop for StubbingComChannel {
    fn drop(&mut self) {
        self.close();
    }
}

fn pipe_path(exec_path: &Path, infix: &str, rand: &str) -> PathBuf {
    let mut name = exec_path.as_os_str().to_os_string();
    name.push(infix);
    name.push(rand);
    PathBuf::from(name)
}

fn run_request_reader(
    mut stream: FifoStream,
    request_tx: SyncSender<StubRequest>,
    done: SyncSender<()>,
    pipe: PathBuf,
) {
    loop {
        let line = match stream.read_record(None) {
            Ok(line) => line,
            Err(e) => {
                warn!(pipe = %pipe.display(), "fail to read from stubber pipe: {e}");
                break;
            }
        };
        let req = match std::str::from_utf8(&line)
            .map_err(|e| e.to_string())
            .and_then(|l| codec::decode_request(l).map_err(|e| e.to_string()))
        {
            Ok(req) => req,
            Err(e) => {
                warn!(pipe = %pipe.display(), "undecodable stub request: {e}");
                break;
            }
        };
        if req.is_stop_sentinel() {
            debug!(pipe = %pipe.display(), "stop reading stub requests on sentinel");
            break;
        }
        debug!(?req, "stub request received");
        if request_tx.send(req).is_err() {
            break;
        }
    }
    let _ = done.send(());
}

fn run_response_writer(
    mut stream: FifoStream,
    response_rx: Receiver<ExecOutcome>,
    done: SyncSender<()>,
    pipe: PathBuf,
) {
    while let Ok(outcome) = response_rx.recv() {
        let line = codec::encode_outcome(&outcome);
        if let Err(e) = stream.write_record(line.as_bytes(), None) {
            warn!(pipe = %pipe.display(), "error sending outcome to stand-in: {e}");
            continue;
        }
        debug!(key = %outcome.key, exit_code = outcome.exit_code, "outcome sent");
    }
    let _ = done.send(());
}

#[cfg(unix)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn channel_in(dir: &Path) -> StubbingComChannel {
        StubbingComChannel::new(&dir.join("tool")).unwrap()
    }

    #[test]
    fn test_request_response_loop() {
        let dir = TempDir::new().unwrap();
        let mut channel = channel_in(dir.path());
        let (request_rx, response_tx) = channel.take_endpoints().unwrap();

        // a trivial responder echoing the key back
        let responder = thread::spawn(move || {
            let req = request_rx.recv().unwrap();
            let outcome = ExecOutcome {
                key: req.key.clone(),
                stdout: b"dynamic".to_vec(),
                exit_code: 0,
                ..ExecOutcome::default()
            };
            response_tx.send(outcome).unwrap();
        });

        let req = StubRequest::new("k9", "tool", vec!["x".to_string()]);
        fifo::write_request_to_pipe(&channel.stubber_pipe_path, &req, Duration::from_secs(5))
            .unwrap();
        let outcome =
            fifo::read_outcome_from_pipe(&channel.helper_pipe_path, Duration::from_secs(5))
                .unwrap();
        assert_eq!(outcome.key, "k9");
        assert_eq!(outcome.stdout, b"dynamic");

        responder.join().unwrap();
        channel.close();
    }

    #[test]
    fn test_sentinel_is_never_delivered() {
        let dir = TempDir::new().unwrap();
        let mut channel = channel_in(dir.path());
        let (request_rx, _response_tx) = channel.take_endpoints().unwrap();

        fifo::write_request_to_pipe(
            &channel.stubber_pipe_path,
            &StubRequest::stop_sentinel(),
            Duration::from_secs(5),
        )
        .unwrap();

        // the reader exits on the sentinel without forwarding it
        let got = request_rx.recv_timeout(Duration::from_secs(2));
        assert!(got.is_err(), "sentinel must not surface: {got:?}");
        drop(request_rx);
        drop(_response_tx);
        channel.close();
    }

    #[test]
    fn test_close_removes_pipes_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut channel = channel_in(dir.path());
        let stubber = channel.stubber_pipe_path.clone();
        let helper = channel.helper_pipe_path.clone();
        assert!(stubber.exists());
        assert!(helper.exists());

        channel.close();
        assert!(!stubber.exists());
        assert!(!helper.exists());
        channel.close();
    }
}
