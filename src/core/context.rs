//! Run context - the mutable state of one run flowing between stages

use crate::core::error::{ErrorList, ErrorType, FlowError, StructuredError};
use crate::execution::Line;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

/// Stage index of an aborted run; lines must stay strictly below it
pub const ABORT_INDEX: usize = (i32::MAX / 2) as usize;

/// Run parameters
pub type Params = HashMap<String, Value>;

/// Execution context for one run of a line
///
/// Cloning a `Context` yields another handle to the same run. Use
/// [`Context::copy`] for a detached snapshot.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    state: Mutex<RunState>,
    params: Mutex<Params>,
    errors: Mutex<ErrorList>,
    stopped: watch::Sender<bool>,
}

struct RunState {
    index: usize,
    /// A control call has enqueued a delivery the dispatcher has not read yet
    pending: bool,
    line: Option<Arc<Line>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Context {
    /// Create a context bound to `line`, positioned on the first stage
    pub(crate) fn new(params: Params, line: Arc<Line>) -> Self {
        let (stopped, _) = watch::channel(false);
        Self {
            inner: Arc::new(ContextInner {
                run_id: Uuid::new_v4(),
                started_at: Utc::now(),
                state: Mutex::new(RunState {
                    index: 0,
                    pending: false,
                    line: Some(line),
                }),
                params: Mutex::new(params),
                errors: Mutex::new(ErrorList::new()),
                stopped,
            }),
        }
    }

    /// Deliver the context to the first stage of its line
    ///
    /// A run that cannot reach its first stage is aborted with a
    /// [`FlowError::DeliveryFailed`] error instead of staying active.
    pub(crate) fn begin(&self) -> bool {
        if self.deliver(|_, _| Some(0)) {
            return true;
        }
        warn!("Run {} could not reach its first stage", self.inner.run_id);
        self.abort_with_error(FlowError::DeliveryFailed { stage: 0 });
        false
    }

    /// Called by the dispatcher when it reads a delivery for `stage`.
    /// Returns false if the run was aborted in the meantime.
    pub(crate) fn enter_stage(&self, stage: usize) -> bool {
        let mut state = lock(&self.inner.state);
        if state.index >= ABORT_INDEX {
            return false;
        }
        state.index = stage;
        state.pending = false;
        true
    }

    /// Unique id of the run
    pub fn run_id(&self) -> Uuid {
        self.inner.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    /// Index of the stage currently owning the run, or [`ABORT_INDEX`]
    pub fn index(&self) -> usize {
        lock(&self.inner.state).index
    }

    /// Returns true if the run was aborted
    pub fn is_aborted(&self) -> bool {
        self.index() >= ABORT_INDEX
    }

    /// Name of the handler of the current stage, if the run is still bound to a line
    pub fn handler_name(&self) -> Option<String> {
        let state = lock(&self.inner.state);
        state
            .line
            .as_ref()
            .and_then(|line| line.handler_name(state.index))
    }

    /// Resolves once the run is aborted
    pub async fn stopped(&self) {
        let mut rx = self.inner.stopped.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Detached snapshot of the run, safe to hand to other tasks
    ///
    /// The copy owns its parameters and errors, is not bound to any line
    /// and is already aborted, so control calls on it do nothing.
    pub fn copy(&self) -> Context {
        let (stopped, _) = watch::channel(true);
        Context {
            inner: Arc::new(ContextInner {
                run_id: self.inner.run_id,
                started_at: self.inner.started_at,
                state: Mutex::new(RunState {
                    index: ABORT_INDEX,
                    pending: false,
                    line: None,
                }),
                params: Mutex::new(self.params()),
                errors: Mutex::new(self.errors()),
                stopped,
            }),
        }
    }

    // ----- flow control -----

    /// Hand the run to the next stage, or end it after the last one
    pub fn next(&self) {
        let mut end_of_line = false;
        self.deliver(|index, line| match line.successor(index) {
            Some(next) => Some(next),
            None => {
                end_of_line = true;
                None
            }
        });
        if end_of_line {
            debug!("Run {} reached the end of its line", self.inner.run_id);
            self.abort();
        }
    }

    /// Restart the run from the first stage, keeping parameters and errors
    pub fn repeat(&self) {
        self.deliver(|_, _| Some(0));
    }

    /// Continue the run at `stage`, keeping parameters and errors
    ///
    /// A stage outside the line aborts the run with a
    /// [`FlowError::StageOutOfRange`] error.
    pub fn jump(&self, stage: usize) {
        let mut out_of_range = None;
        self.deliver(|_, line| {
            if stage < line.len() {
                Some(stage)
            } else {
                out_of_range = Some(line.len());
                None
            }
        });
        if let Some(len) = out_of_range {
            warn!("Run {} jumped to stage {} of a {}-stage line", self.inner.run_id, stage, len);
            self.abort_with_error(FlowError::StageOutOfRange { stage, len });
        }
    }

    /// Stop the run. The current handler keeps running, no further stage is
    /// scheduled.
    pub fn abort(&self) {
        let line = {
            let mut state = lock(&self.inner.state);
            state.index = ABORT_INDEX;
            state.pending = false;
            state.line.take()
        };
        if let Some(line) = line {
            debug!("Aborting run {}", self.inner.run_id);
            line.stop();
        }
        self.inner.stopped.send_replace(true);
    }

    /// `abort` followed by `error`
    pub fn abort_with_error(&self, err: impl Into<anyhow::Error>) -> AttachedError<'_> {
        self.abort();
        self.error(err)
    }

    /// Shared path of the control calls: pick the target stage under the
    /// run-state lock and enqueue it in the same critical section.
    fn deliver<F>(&self, target: F) -> bool
    where
        F: FnOnce(usize, &Line) -> Option<usize>,
    {
        let mut state = lock(&self.inner.state);
        if state.index >= ABORT_INDEX {
            return false;
        }
        if state.pending {
            warn!(
                "Run {} already has a pending delivery, ignoring control call",
                self.inner.run_id
            );
            return false;
        }
        let Some(line) = state.line.clone() else {
            return false;
        };
        let Some(stage) = target(state.index, &line) else {
            return false;
        };
        let delivered = line.dispatch_to(stage, self.clone());
        state.pending = delivered;
        delivered
    }

    // ----- errors -----

    /// Attach an error to the run
    ///
    /// Errors that are not already a [`StructuredError`] are wrapped with
    /// the private classification. The returned handle can adjust the
    /// stored entry.
    pub fn error(&self, err: impl Into<anyhow::Error>) -> AttachedError<'_> {
        let structured = StructuredError::from_any(err);
        let position = lock(&self.inner.errors).push(structured);
        AttachedError {
            ctx: self,
            position,
        }
    }

    /// Snapshot of the errors attached so far
    pub fn errors(&self) -> ErrorList {
        lock(&self.inner.errors).clone()
    }

    // ----- parameters -----

    /// Store a parameter for this run
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        lock(&self.inner.params).insert(key.into(), value.into());
    }

    /// Get a parameter
    pub fn get(&self, key: &str) -> Option<Value> {
        lock(&self.inner.params).get(key).cloned()
    }

    /// Get a parameter that is known to be present
    ///
    /// # Panics
    ///
    /// Panics if `key` is not set.
    pub fn must_get(&self, key: &str) -> Value {
        match self.get(key) {
            Some(value) => value,
            None => panic!("Key \"{}\" does not exist", key),
        }
    }

    /// Snapshot of all parameters
    pub fn params(&self) -> Params {
        lock(&self.inner.params).clone()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("run_id", &self.inner.run_id)
            .field("index", &self.index())
            .field("params", &self.params())
            .field("errors", &self.errors().len())
            .finish()
    }
}

/// Handle to an error that was just attached to a context
pub struct AttachedError<'a> {
    ctx: &'a Context,
    position: usize,
}

impl AttachedError<'_> {
    /// Change the classification of the stored error
    pub fn set_type(self, kind: ErrorType) -> Self {
        if let Some(err) = lock(&self.ctx.inner.errors).get_mut(self.position) {
            err.set_type(kind);
        }
        self
    }

    /// Attach metadata to the stored error
    pub fn set_meta(self, meta: impl Into<Value>) -> Self {
        if let Some(err) = lock(&self.ctx.inner.errors).get_mut(self.position) {
            err.set_meta(meta.into());
        }
        self
    }

    /// Current value of the stored error
    pub fn get(&self) -> Option<StructuredError> {
        lock(&self.ctx.inner.errors).get(self.position).cloned()
    }
}
