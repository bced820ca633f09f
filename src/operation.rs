//! # Long-Running Operations
//!
//! Every mutation of a Cloud SQL instance returns an `Operation` resource
//! rather than a result. [`OperationCoordinator`] turns that into a blocking
//! call: it submits the mutation, then polls the operation's `selfLink` until
//! its status is `DONE`.
//!
//! A coordinator tracks one operation at a time. [`OperationCoordinator::begin`]
//! takes its lock and the returned [`Exclusive`] keeps it for the whole
//! submit-and-poll lifecycle, so a second mutation on the same instance waits
//! until the first has finished.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};

use crate::credential::Credential;
use crate::error::{Error, Result};
use crate::template::{Method, RenderedRequest};
use crate::transport::{Transport, fetch};

/// The only terminal status.
pub const STATUS_DONE: &str = "DONE";

/// Longest single sleep between cancellation checks.
const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub self_link: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub operation_type: String,
    #[serde(default)]
    pub target_id: String,
    #[serde(default)]
    pub target_project: String,
    #[serde(default)]
    pub target_link: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub insert_time: String,
    #[serde(default)]
    pub start_time: String,
    #[serde(default)]
    pub end_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationErrors>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationErrors {
    #[serde(default)]
    pub errors: Vec<OperationError>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl Operation {
    pub fn is_done(&self) -> bool {
        self.status == STATUS_DONE
    }

    fn failure(&self) -> Option<Error> {
        let errors = &self.error.as_ref()?.errors;
        if errors.is_empty() {
            return None;
        }
        let message = errors
            .iter()
            .map(|e| format!("{}: {}", e.code, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        Some(Error::OperationFailed {
            name: self.name.clone(),
            operation_type: self.operation_type.clone(),
            message,
        })
    }
}

/// How operations are polled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOptions {
    /// Sleep before each status request.
    pub interval: Duration,
    /// Give up after this long. `None` polls until the API says DONE.
    pub timeout: Option<Duration>,
    /// Show a spinner on stderr while waiting.
    pub progress: bool,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: None,
            progress: false,
        }
    }
}

/// Aborts a poll loop from another thread.
///
/// A cancel is consumed by the wait that observes it. One made while nothing
/// is waiting aborts the next wait.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct OperationCoordinator {
    transport: Arc<dyn Transport>,
    options: PollOptions,
    cancel: CancelToken,
    lock: Mutex<()>,
    last: RwLock<Option<Operation>>,
}

impl OperationCoordinator {
    pub fn new(transport: Arc<dyn Transport>, options: PollOptions) -> Self {
        Self {
            transport,
            options,
            cancel: CancelToken::new(),
            lock: Mutex::new(()),
            last: RwLock::new(None),
        }
    }

    pub fn options(&self) -> &PollOptions {
        &self.options
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// The most recently observed state of the tracked operation.
    pub fn last_operation(&self) -> Option<Operation> {
        self.last
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Blocks until no other mutation is in flight, then holds exclusive access.
    /// Waits observe the coordinator's shared [`CancelToken`].
    pub fn begin(&self) -> Exclusive<'_> {
        self.begin_with(self.cancel.clone())
    }

    /// Like [`begin`](Self::begin), but waits observe `cancel` only.
    pub fn begin_with(&self, cancel: CancelToken) -> Exclusive<'_> {
        let guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Exclusive {
            coordinator: self,
            cancel,
            _guard: guard,
        }
    }

    fn store(&self, operation: &Operation) {
        *self.last.write().unwrap_or_else(PoisonError::into_inner) = Some(operation.clone());
    }
}

/// Exclusive access to an [`OperationCoordinator`]; released on drop.
pub struct Exclusive<'a> {
    coordinator: &'a OperationCoordinator,
    cancel: CancelToken,
    _guard: MutexGuard<'a, ()>,
}

impl Exclusive<'_> {
    /// Sends a mutating request and waits for the operation it starts.
    pub fn submit_and_wait(&self, request: &RenderedRequest, credential: &Credential) -> Result<Operation> {
        self.submit(request)?;
        self.wait(credential)
    }

    /// Sends a mutating request and records the operation it returns.
    pub fn submit(&self, request: &RenderedRequest) -> Result<Operation> {
        tracing::debug!(method = %request.method, url = %request.url, "submitting");
        let operation: Operation = fetch(self.coordinator.transport.as_ref(), request)?;
        tracing::info!(
            name = %operation.name,
            operation_type = %operation.operation_type,
            status = %operation.status,
            "operation submitted"
        );
        self.coordinator.store(&operation);
        Ok(operation)
    }

    /// Polls the tracked operation until it is DONE.
    pub fn wait(&self, credential: &Credential) -> Result<Operation> {
        let mut operation = self
            .coordinator
            .last_operation()
            .ok_or(Error::EmptyOperation)?;
        if !operation.is_done() && operation.self_link.is_empty() {
            return Err(Error::EmptyOperation);
        }

        let options = &self.coordinator.options;
        let cancel = &self.cancel;
        let spinner = Spinner::start(&operation, options.progress);
        let request = RenderedRequest::new(Method::Get, operation.self_link.clone(), Some(credential));
        let started = Instant::now();
        let mut polls = 0u32;

        while !operation.is_done() {
            if cancel.is_cancelled() {
                return Err(cancelled(cancel, operation));
            }
            let remaining = options.timeout.map(|t| t.saturating_sub(started.elapsed()));
            if remaining == Some(Duration::ZERO) {
                return Err(timed_out(operation, started));
            }
            sleep(remaining.map_or(options.interval, |r| r.min(options.interval)), cancel);
            if cancel.is_cancelled() {
                return Err(cancelled(cancel, operation));
            }
            if options.timeout.is_some_and(|t| started.elapsed() >= t) {
                return Err(timed_out(operation, started));
            }

            operation = fetch(self.coordinator.transport.as_ref(), &request)?;
            polls += 1;
            self.coordinator.store(&operation);
            tracing::debug!(name = %operation.name, status = %operation.status, polls, "polled");
            spinner.status(&operation.status);
        }

        if let Some(err) = operation.failure() {
            return Err(err);
        }
        spinner.finish();
        tracing::debug!(name = %operation.name, polls, "operation finished");
        Ok(operation)
    }
}

fn cancelled(cancel: &CancelToken, operation: Operation) -> Error {
    cancel.reset();
    Error::Cancelled {
        name: operation.name,
        status: operation.status,
    }
}

fn timed_out(operation: Operation, started: Instant) -> Error {
    Error::PollTimeout {
        name: operation.name,
        status: operation.status,
        elapsed: started.elapsed(),
    }
}

/// Sleeps for `interval`, waking early if `cancel` is tripped.
fn sleep(interval: Duration, cancel: &CancelToken) {
    let deadline = Instant::now() + interval;
    loop {
        let now = Instant::now();
        if now >= deadline || cancel.is_cancelled() {
            return;
        }
        thread::sleep((deadline - now).min(CANCEL_CHECK_INTERVAL));
    }
}

/// Progress spinner for one wait. Cleared on drop unless finished.
struct Spinner {
    bar: ProgressBar,
}

impl Spinner {
    fn start(operation: &Operation, visible: bool) -> Self {
        let prefix = format!("Waiting for {} operation to complete", operation.operation_type);
        let bar = if visible {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::with_template("{spinner:.green} {prefix} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        } else {
            ProgressBar::hidden()
        };
        bar.set_prefix(prefix);
        bar.set_message(format!("({})", operation.status));
        Self { bar }
    }

    fn status(&self, status: &str) {
        self.bar.set_message(format!("({})", status));
    }

    fn finish(&self) {
        self.bar.finish_with_message("✓");
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::TokenInfo;
    use crate::transport::RawResponse;
    use chrono::Utc;
    use std::collections::VecDeque;

    /// Answers requests in order from a fixed script and records what was asked.
    struct Script {
        responses: Mutex<VecDeque<(u16, String)>>,
        requests: Mutex<Vec<(Method, String)>>,
    }

    impl Script {
        fn new(responses: Vec<(u16, String)>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn gets(&self) -> usize {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|(m, _)| *m == Method::Get)
                .count()
        }
    }

    impl Transport for Script {
        fn send(&self, request: &RenderedRequest) -> Result<RawResponse> {
            self.requests
                .lock()
                .unwrap()
                .push((request.method, request.url.clone()));
            let (status, body) = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("script exhausted");
            Ok(RawResponse {
                status,
                body: body.into_bytes(),
            })
        }
    }

    fn pending() -> String {
        r#"{"kind":"sql#operation","name":"op-1","status":"PENDING","operationType":"UPDATE","selfLink":"https://sqladmin.test/operations/op-1"}"#.to_string()
    }

    fn status(s: &str) -> String {
        format!(r#"{{"name":"op-1","status":"{}","operationType":"UPDATE","selfLink":"https://sqladmin.test/operations/op-1"}}"#, s)
    }

    fn credential() -> Credential {
        Credential::new(
            "ya29.test",
            TokenInfo {
                expires_in: 3600,
                ..TokenInfo::default()
            },
            Utc::now(),
        )
        .unwrap()
    }

    fn fast() -> PollOptions {
        PollOptions {
            interval: Duration::ZERO,
            ..PollOptions::default()
        }
    }

    fn patch() -> RenderedRequest {
        RenderedRequest::new(Method::Patch, "https://sqladmin.test/instances/i1", None)
    }

    #[test]
    fn done_on_first_poll() -> Result<()> {
        let script = Script::new(vec![(200, pending()), (200, r#"{"status":"DONE"}"#.to_string())]);
        let coordinator = OperationCoordinator::new(script.clone(), fast());
        let operation = coordinator.begin().submit_and_wait(&patch(), &credential())?;
        assert!(operation.is_done());
        assert_eq!(script.gets(), 1);
        let requests = script.requests.lock().unwrap();
        assert_eq!(requests[1].1, "https://sqladmin.test/operations/op-1");
        Ok(())
    }

    #[test]
    fn one_poll_per_pending_observation() -> Result<()> {
        let script = Script::new(vec![
            (200, pending()),
            (200, status("PENDING")),
            (200, status("DONE")),
        ]);
        let coordinator = OperationCoordinator::new(script.clone(), fast());
        coordinator.begin().submit_and_wait(&patch(), &credential())?;
        assert_eq!(script.gets(), 2);
        assert_eq!(coordinator.last_operation().map(|o| o.status), Some("DONE".to_string()));
        Ok(())
    }

    #[test]
    fn already_done_needs_no_poll() -> Result<()> {
        let script = Script::new(vec![(200, status("DONE"))]);
        let coordinator = OperationCoordinator::new(script.clone(), fast());
        coordinator.begin().submit_and_wait(&patch(), &credential())?;
        assert_eq!(script.gets(), 0);
        Ok(())
    }

    #[test]
    fn poll_error_aborts() {
        let script = Script::new(vec![(200, pending()), (500, "backend error".to_string())]);
        let coordinator = OperationCoordinator::new(script.clone(), fast());
        let err = coordinator
            .begin()
            .submit_and_wait(&patch(), &credential())
            .unwrap_err();
        assert_eq!(err.status_code(), Some(500));
        assert_eq!(coordinator.last_operation().map(|o| o.status), Some("PENDING".to_string()));
    }

    #[test]
    fn submit_error_leaves_no_operation() {
        let script = Script::new(vec![(409, "operation in progress".to_string())]);
        let coordinator = OperationCoordinator::new(script.clone(), fast());
        let err = coordinator
            .begin()
            .submit_and_wait(&patch(), &credential())
            .unwrap_err();
        assert_eq!(err.status_code(), Some(409));
        assert!(coordinator.last_operation().is_none());
    }

    #[test]
    fn wait_without_operation_is_empty() {
        let script = Script::new(Vec::new());
        let coordinator = OperationCoordinator::new(script, fast());
        let err = coordinator.begin().wait(&credential()).unwrap_err();
        assert!(matches!(err, Error::EmptyOperation));
    }

    #[test]
    fn pending_without_self_link_is_empty() {
        let script = Script::new(vec![(200, "{}".to_string())]);
        let coordinator = OperationCoordinator::new(script.clone(), fast());
        let err = coordinator
            .begin()
            .submit_and_wait(&patch(), &credential())
            .unwrap_err();
        assert!(matches!(err, Error::EmptyOperation));
        assert_eq!(script.gets(), 0);
    }

    #[test]
    fn done_with_errors_fails() {
        let failed = r#"{"name":"op-1","status":"DONE","operationType":"UPDATE","error":{"kind":"sql#operationErrors","errors":[{"kind":"sql#operationError","code":"INVALID_REQUEST","message":"Invalid CIDR"}]}}"#;
        let script = Script::new(vec![(200, pending()), (200, failed.to_string())]);
        let coordinator = OperationCoordinator::new(script, fast());
        let err = coordinator
            .begin()
            .submit_and_wait(&patch(), &credential())
            .unwrap_err();
        match err {
            Error::OperationFailed { message, .. } => assert_eq!(message, "INVALID_REQUEST: Invalid CIDR"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn timeout_stops_polling() {
        let responses: Vec<(u16, String)> = (0..100).map(|_| (200, status("RUNNING"))).collect();
        let script = Script::new(std::iter::once((200, pending())).chain(responses).collect());
        let options = PollOptions {
            interval: Duration::from_millis(5),
            timeout: Some(Duration::from_millis(30)),
            progress: false,
        };
        let coordinator = OperationCoordinator::new(script.clone(), options);
        let err = coordinator
            .begin()
            .submit_and_wait(&patch(), &credential())
            .unwrap_err();
        assert!(matches!(err, Error::PollTimeout { ref status, .. } if status == "RUNNING"));
        assert!(script.gets() < 100);
    }

    #[test]
    fn cancel_stops_polling() {
        let script = Script::new(vec![(200, pending())]);
        let coordinator = OperationCoordinator::new(
            script.clone(),
            PollOptions {
                interval: Duration::from_secs(30),
                ..PollOptions::default()
            },
        );
        let token = coordinator.cancel_token();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            token.cancel();
        });
        let started = Instant::now();
        let err = coordinator
            .begin()
            .submit_and_wait(&patch(), &credential())
            .unwrap_err();
        canceller.join().unwrap();
        assert!(matches!(err, Error::Cancelled { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(script.gets(), 0);
        assert!(!coordinator.cancel_token().is_cancelled());
    }

    #[test]
    fn cancel_before_begin_aborts_next_wait() {
        let script = Script::new(vec![(200, pending())]);
        let coordinator = OperationCoordinator::new(
            script.clone(),
            PollOptions {
                interval: Duration::from_secs(30),
                ..PollOptions::default()
            },
        );
        let token = coordinator.cancel_token();
        token.cancel();
        let started = Instant::now();
        let err = coordinator
            .begin()
            .submit_and_wait(&patch(), &credential())
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled { ref status, .. } if status == "PENDING"));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(script.gets(), 0);
        assert!(!token.is_cancelled());
    }

    #[test]
    fn own_token_ignores_shared_cancel() -> Result<()> {
        let script = Script::new(vec![(200, pending()), (200, status("DONE"))]);
        let coordinator = OperationCoordinator::new(script.clone(), fast());
        coordinator.cancel_token().cancel();
        let operation = coordinator
            .begin_with(CancelToken::new())
            .submit_and_wait(&patch(), &credential())?;
        assert!(operation.is_done());
        assert_eq!(script.gets(), 1);
        assert!(coordinator.cancel_token().is_cancelled());
        Ok(())
    }

    #[test]
    fn timeout_caps_the_last_sleep() {
        let script = Script::new(vec![(200, pending())]);
        let coordinator = OperationCoordinator::new(
            script.clone(),
            PollOptions {
                interval: Duration::from_secs(30),
                timeout: Some(Duration::from_millis(150)),
                progress: false,
            },
        );
        let started = Instant::now();
        let err = coordinator
            .begin()
            .submit_and_wait(&patch(), &credential())
            .unwrap_err();
        assert!(matches!(err, Error::PollTimeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(script.gets(), 0);
    }
}
