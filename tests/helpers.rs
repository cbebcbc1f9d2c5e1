//! Test utility functions for flowline
#![allow(dead_code)]

use flowline::{handler, Context, Factory, Params, RunId, SharedHandler};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Upper bound for any run in the test suite
pub const RUN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared log of the stages a run went through
pub type Trace = Arc<Mutex<Vec<usize>>>;

pub fn trace() -> Trace {
    Arc::new(Mutex::new(Vec::new()))
}

/// Stages recorded so far
pub fn visited(trace: &Trace) -> Vec<usize> {
    trace.lock().unwrap().clone()
}

/// Handler that records its stage and then applies `control`
pub fn recording<F>(trace: &Trace, control: F) -> SharedHandler
where
    F: Fn(&Context) + Send + Sync + 'static,
{
    let trace = trace.clone();
    let control = Arc::new(control);
    handler(move |ctx: Context| {
        let trace = trace.clone();
        let control = control.clone();
        async move {
            trace.lock().unwrap().push(ctx.index());
            control(&ctx);
        }
    })
}

/// Handler that records its stage and advances
pub fn recording_next(trace: &Trace) -> SharedHandler {
    recording(trace, |ctx| ctx.next())
}

/// Handler that records its stage and aborts the run
pub fn recording_abort(trace: &Trace) -> SharedHandler {
    recording(trace, |ctx| ctx.abort())
}

/// Handler that never makes a control call
pub fn stall() -> SharedHandler {
    handler(|_ctx: Context| async {})
}

/// Build run parameters from pairs
pub fn params(pairs: &[(&str, Value)]) -> Params {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

/// Wait for a run to stop, failing the test after [`RUN_TIMEOUT`]
pub async fn wait_stopped(factory: &Factory, run: RunId) -> Context {
    tokio::time::timeout(RUN_TIMEOUT, factory.wait(run))
        .await
        .unwrap_or_else(|_| panic!("run {} did not stop in time", run))
        .expect("run should exist")
}

/// Wait for every run of the factory to stop
pub async fn wait_all_stopped(factory: &Factory) -> Vec<Context> {
    tokio::time::timeout(RUN_TIMEOUT, factory.wait_all())
        .await
        .expect("runs did not stop in time")
}

/// Poll until the run sits on `stage`
pub async fn wait_for_stage(ctx: &Context, stage: usize) {
    tokio::time::timeout(RUN_TIMEOUT, async {
        while ctx.index() != stage {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("run never reached stage {}", stage));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_params_helper() {
        let p = params(&[("a", json!(1)), ("b", json!("two"))]);
        assert_eq!(p.len(), 2);
        assert_eq!(p.get("b"), Some(&json!("two")));
    }

    #[tokio::test]
    async fn test_recording_handlers_drive_a_run() {
        let trace = trace();
        let factory = Factory::default();
        let line = factory
            .new_line(vec![recording_next(&trace), recording_abort(&trace)])
            .unwrap();
        let run = factory.start(line, Params::new()).unwrap();

        wait_stopped(&factory, run).await;
        assert_eq!(visited(&trace), vec![0, 1]);
    }
}
