//! Test: Concurrent runs - many independent runs of the same line

use crate::helpers::*;
use flowline::{handler, Context, Factory, Params, ABORT_INDEX};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_runs_are_independent() {
    let factory = Factory::default();
    let line = factory
        .new_line(vec![
            handler(|ctx: Context| async move {
                ctx.set("a", ctx.must_get("id"));
                ctx.next();
            }),
            handler(|ctx: Context| async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                let id = ctx.must_get("id").as_i64().unwrap();
                ctx.set("b", id * 2);
                ctx.next();
            }),
            handler(|ctx: Context| async move {
                ctx.set("c", true);
                ctx.abort();
            }),
        ])
        .unwrap();

    const RUNS: i64 = 32;
    let mut runs = Vec::new();
    for id in 0..RUNS {
        runs.push(factory.start(line, params(&[("id", json!(id))])).unwrap());
    }

    let contexts = wait_all_stopped(&factory).await;
    assert_eq!(contexts.len(), RUNS as usize);
    assert!(factory.are_all_stopped());

    let mut run_ids = HashSet::new();
    for (id, run) in runs.iter().enumerate() {
        let ctx = factory.context(*run).unwrap();
        let id = id as i64;
        assert_eq!(ctx.get("a"), Some(json!(id)));
        assert_eq!(ctx.get("b"), Some(json!(id * 2)));
        assert_eq!(ctx.get("c"), Some(json!(true)));
        assert!(run_ids.insert(ctx.run_id()));
    }
}

#[tokio::test]
async fn test_aborting_one_run_leaves_the_others_running() {
    let factory = Factory::default();
    let line = factory
        .new_line(vec![
            handler(|ctx: Context| async move { ctx.next() }),
            stall(),
        ])
        .unwrap();

    let first = factory.start(line, Params::new()).unwrap();
    let second = factory.start(line, Params::new()).unwrap();
    let first_ctx = factory.context(first).unwrap();
    let second_ctx = factory.context(second).unwrap();
    wait_for_stage(&first_ctx, 1).await;
    wait_for_stage(&second_ctx, 1).await;

    factory.stop(first).unwrap();

    assert!(factory.is_stopped(first).unwrap());
    assert!(!factory.is_stopped(second).unwrap());
    assert_eq!(second_ctx.index(), 1);
    assert!(!factory.are_all_stopped());

    factory.destroy();
    assert!(factory.are_all_stopped());
}

#[tokio::test]
async fn test_copy_taken_mid_run_is_detached() {
    let (tx, mut rx) = mpsc::unbounded_channel::<Context>();
    let factory = Factory::default();
    let line = factory
        .new_line(vec![
            handler(move |ctx: Context| {
                let tx = tx.clone();
                async move {
                    tx.send(ctx.copy()).unwrap();
                    ctx.set("after_copy", true);
                    ctx.next();
                }
            }),
            handler(|ctx: Context| async move { ctx.abort() }),
        ])
        .unwrap();

    let run = factory
        .start(line, params(&[("x", json!(1))]))
        .unwrap();
    let snapshot = rx.recv().await.unwrap();
    let ctx = wait_stopped(&factory, run).await;

    assert_eq!(snapshot.run_id(), ctx.run_id());
    assert_eq!(snapshot.get("x"), Some(json!(1)));
    assert_eq!(snapshot.get("after_copy"), None);

    snapshot.set("x", 99);
    assert_eq!(ctx.get("x"), Some(json!(1)));
    assert_eq!(ctx.get("after_copy"), Some(json!(true)));

    snapshot.next();
    snapshot.jump(0);
    snapshot.repeat();
    assert_eq!(snapshot.index(), ABORT_INDEX);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_get_unique_run_ids() {
    let factory = Arc::new(Factory::default());
    let line = factory
        .new_line(vec![handler(|ctx: Context| async move { ctx.next() })])
        .unwrap();

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let factory = factory.clone();
        tasks.push(tokio::spawn(async move {
            factory.start(line, Params::new()).unwrap()
        }));
    }

    let mut ids = HashSet::new();
    for task in tasks {
        assert!(ids.insert(task.await.unwrap()));
    }
    assert_eq!(factory.run_count(), 16);

    wait_all_stopped(&factory).await;
    assert!(factory.are_all_stopped());
}

#[tokio::test]
async fn test_stacked_control_calls_keep_one_delivery() {
    let factory = Factory::default();
    let trace = trace();
    let handlers = (0..4)
        .map(|_| {
            recording(&trace, |ctx| {
                ctx.next();
                ctx.repeat();
                ctx.jump(3);
            })
        })
        .collect::<Vec<_>>();
    let line = factory.new_line(handlers).unwrap();

    for _ in 0..50 {
        factory.start(line, Params::new()).unwrap();
    }
    let contexts = wait_all_stopped(&factory).await;

    // Only the first call of each stage counts: every run walks the line once
    let stages = visited(&trace);
    assert_eq!(stages.len(), 200);
    for stage in 0..4 {
        assert_eq!(stages.iter().filter(|s| **s == stage).count(), 50);
    }
    assert!(contexts.iter().all(|ctx| ctx.errors().is_empty()));
}
