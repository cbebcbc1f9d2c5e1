//! Factory - registry of lines and the runs started from them

use crate::core::{error::Result, Context, FlowError, Params, SharedHandler};
use crate::execution::Line;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Handle of a registered line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineId(usize);

/// Handle of a started run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(usize);

impl From<usize> for LineId {
    fn from(value: usize) -> Self {
        LineId(value)
    }
}

impl From<usize> for RunId {
    fn from(value: usize) -> Self {
        RunId(value)
    }
}

impl fmt::Display for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Registry of line templates and their runs
///
/// Every run gets its own copy of the line it was started from, so
/// aborting one run never affects the others. Dropping the factory
/// aborts every run.
#[derive(Default)]
pub struct Factory {
    lines: RwLock<Vec<Option<Arc<Line>>>>,
    runs: RwLock<Vec<Context>>,
}

impl Factory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a line and return its handle
    pub fn new_line<I>(&self, handlers: I) -> Result<LineId>
    where
        I: IntoIterator<Item = SharedHandler>,
        I::IntoIter: ExactSizeIterator,
    {
        let line = Line::new(handlers)?;
        let stages = line.len();
        let mut lines = write(&self.lines);
        lines.push(Some(Arc::new(line)));
        let id = LineId(lines.len() - 1);
        debug!("Registered line {} with {} stages", id, stages);
        Ok(id)
    }

    /// Start a run of `line` with the given initial parameters
    ///
    /// Must be called from within a tokio runtime: the run's dispatcher is
    /// spawned onto it.
    pub fn start(&self, line: LineId, params: Params) -> Result<RunId> {
        let runtime = Handle::try_current().map_err(|_| FlowError::NoRuntime)?;
        let template = read(&self.lines)
            .get(line.0)
            .cloned()
            .flatten()
            .ok_or(FlowError::LineNotFound(line))?;

        let instance = Arc::new(template.duplicate()?);
        let context = Context::new(params, instance.clone());
        runtime.spawn(instance.run());
        if !context.begin() {
            warn!("Run of line {} aborted before its first stage", line);
        }

        let mut runs = write(&self.runs);
        runs.push(context.clone());
        let id = RunId(runs.len() - 1);
        info!("Started run {} ({}) of line {}", id, context.run_id(), line);
        Ok(id)
    }

    /// Live context of a run
    pub fn context(&self, run: RunId) -> Result<Context> {
        read(&self.runs)
            .get(run.0)
            .cloned()
            .ok_or(FlowError::RunNotFound(run))
    }

    /// Abort a run
    pub fn stop(&self, run: RunId) -> Result<()> {
        let context = self.context(run)?;
        info!("Stopping run {} ({})", run, context.run_id());
        context.abort();
        Ok(())
    }

    pub fn is_stopped(&self, run: RunId) -> Result<bool> {
        Ok(self.context(run)?.is_aborted())
    }

    /// True if every run started so far has stopped
    pub fn are_all_stopped(&self) -> bool {
        read(&self.runs).iter().all(Context::is_aborted)
    }

    /// Number of runs started so far
    pub fn run_count(&self) -> usize {
        read(&self.runs).len()
    }

    /// Wait until a run stops and return its context
    pub async fn wait(&self, run: RunId) -> Result<Context> {
        let context = self.context(run)?;
        context.stopped().await;
        Ok(context)
    }

    /// Wait until every run started so far has stopped
    pub async fn wait_all(&self) -> Vec<Context> {
        let contexts = read(&self.runs).clone();
        for context in &contexts {
            context.stopped().await;
        }
        contexts
    }

    /// Abort every run and release all registered lines
    pub fn destroy(&self) {
        let contexts = read(&self.runs).clone();
        for context in &contexts {
            context.abort();
        }
        for line in write(&self.lines).iter_mut() {
            *line = None;
        }
        debug!("Factory destroyed, {} runs aborted", contexts.len());
    }
}

impl Drop for Factory {
    fn drop(&mut self) {
        self.destroy();
    }
}
