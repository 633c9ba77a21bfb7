use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::SandboxConfig;
use crate::interpreter::{self, Fault, Guard, RunOutcome};
use crate::policy;
use crate::result::{ErrorKind, ExecutionResult};

/// Message reported for runs that exceed their budget.
pub const TIMEOUT_MESSAGE: &str = "execution timed out";

/// The worker walks deeply nested syntax on its own stack.
const WORKER_STACK_SIZE: usize = 32 * 1024 * 1024;

const MAX_DEADLINE: Duration = Duration::from_secs(24 * 60 * 60);

/// Shared flag a supervisor sets to stop a running snippet.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Runs snippets under a [`SandboxConfig`].
///
/// `execute` never fails: every outcome, including policy rejections,
/// runtime errors and timeouts, is folded into the [`ExecutionResult`].
#[derive(Debug, Clone, Default)]
pub struct Sandbox {
    config: SandboxConfig,
}

impl Sandbox {
    #[must_use]
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Runs `source` with the configured timeout.
    #[must_use]
    pub fn execute(&self, source: &str) -> ExecutionResult {
        self.execute_with_timeout(source, self.config.timeout)
    }

    /// Runs `source` with an explicit wall-clock budget.
    ///
    /// Blocks the calling thread for at most `timeout` plus scheduling slack.
    /// Async callers should go through `spawn_blocking`.
    #[must_use]
    pub fn execute_with_timeout(&self, source: &str, timeout: Duration) -> ExecutionResult {
        let started = Instant::now();

        if let Err(violation) = policy::check(source, &self.config) {
            debug!(reason = violation.reason(), "snippet rejected by policy");
            return ExecutionResult::failed(
                ErrorKind::PolicyViolation,
                violation.to_string(),
                String::new(),
                started.elapsed(),
            );
        }

        let token = CancelToken::new();
        let (tx, rx) = mpsc::sync_channel(1);
        let worker_source = source.to_owned();
        let worker_config = self.config.clone();
        let deadline = started
            .checked_add(timeout)
            .unwrap_or_else(|| started + MAX_DEADLINE);
        let guard = Guard::new(token.clone(), deadline);

        let spawned = thread::Builder::new()
            .name("sandbox-worker".to_string())
            .stack_size(WORKER_STACK_SIZE)
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    interpreter::run(&worker_source, &worker_config, guard)
                }));
                // The supervisor may have given up already.
                let _ = tx.send(outcome.map_err(|payload| panic_message(payload.as_ref())));
            });
        if let Err(err) = spawned {
            warn!(error = %err, "failed to start sandbox worker");
            return ExecutionResult::failed(
                ErrorKind::RuntimeFault,
                format!("RuntimeError: could not start the interpreter: {err}"),
                String::new(),
                started.elapsed(),
            );
        }

        match rx.recv_timeout(timeout) {
            Ok(Ok(outcome)) => finish(outcome, started.elapsed()),
            Ok(Err(message)) => {
                warn!(%message, "sandbox worker panicked");
                ExecutionResult::failed(
                    ErrorKind::RuntimeFault,
                    format!("RuntimeError: internal interpreter error: {message}"),
                    String::new(),
                    started.elapsed(),
                )
            }
            Err(RecvTimeoutError::Timeout) => {
                token.cancel();
                warn!(timeout_ms = timeout.as_millis(), "snippet timed out");
                timed_out(started.elapsed())
            }
            Err(RecvTimeoutError::Disconnected) => ExecutionResult::failed(
                ErrorKind::RuntimeFault,
                "RuntimeError: interpreter stopped without a result",
                String::new(),
                started.elapsed(),
            ),
        }
    }
}

fn finish(outcome: RunOutcome, duration: Duration) -> ExecutionResult {
    let result = match outcome.fault {
        None => ExecutionResult::completed(outcome.output, duration),
        Some(Fault::Raised(exception)) => ExecutionResult::failed(
            ErrorKind::RuntimeFault,
            exception.to_string(),
            outcome.output,
            duration,
        ),
        Some(Fault::Interrupted) => timed_out(duration),
    };
    debug!(
        success = result.success,
        duration_ms = duration.as_millis(),
        output_bytes = result.output.len(),
        "snippet finished"
    );
    result
}

fn timed_out(duration: Duration) -> ExecutionResult {
    ExecutionResult::failed(ErrorKind::Timeout, TIMEOUT_MESSAGE, String::new(), duration)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
