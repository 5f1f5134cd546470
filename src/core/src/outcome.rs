//! Outcome-function adapters: compose and sequence the functions that
//! produce execution outcomes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::protocol::{ExecOutcome, StubRequest};

/// Produces the outcome for one stubbed invocation.
///
/// Called by the harness responder outside its registration lock, and
/// possibly from several responders at once, hence `Send + Sync`.
pub type StubFunc = Arc<dyn Fn(&StubRequest) -> ExecOutcome + Send + Sync>;

/// Externally visible append-only log used by [`recording`].
pub type RequestLog = Arc<Mutex<Vec<StubRequest>>>;

/// A function that always returns the given outcome.
pub fn fixed(outcome: ExecOutcome) -> StubFunc {
    Arc::new(move |_req| outcome.clone())
}

/// A function yielding the i-th of `outcomes` on the i-th call.
///
/// With `repeat_last` the final entry covers all later calls; without it,
/// later calls produce an internal-error outcome with exit code 255.
pub fn sequence(outcomes: Vec<ExecOutcome>, repeat_last: bool) -> StubFunc {
    let funcs = outcomes.into_iter().map(fixed).collect();
    func_sequence(funcs, repeat_last)
}

/// Like [`sequence`], but over outcome functions.
///
/// The call index is claimed atomically, so concurrent invocations each
/// observe a distinct position.
pub fn func_sequence(funcs: Vec<StubFunc>, repeat_last: bool) -> StubFunc {
    let next = AtomicUsize::new(0);
    Arc::new(move |req| {
        let mut index = next.fetch_add(1, Ordering::SeqCst);
        if index >= funcs.len() {
            if !repeat_last || funcs.is_empty() {
                return ExecOutcome::internal_failure(
                    &req.key,
                    format!(
                        "too many executions while repeat-last not selected: max={}, current={}",
                        funcs.len(),
                        index + 1
                    ),
                );
            }
            index = funcs.len() - 1;
        }
        funcs[index](req)
    })
}

/// Wrap `inner` so every request it receives is appended to the returned
/// log before being forwarded.
pub fn recording(inner: StubFunc) -> (StubFunc, RequestLog) {
    let log: RequestLog = Arc::new(Mutex::new(Vec::new()));
    let log_for_func = Arc::clone(&log);
    let func: StubFunc = Arc::new(move |req| {
        log_for_func
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(req.clone());
        inner(req)
    });
    (func, log)
}
