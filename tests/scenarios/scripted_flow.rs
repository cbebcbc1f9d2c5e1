//! Test: Scripted flows - lines built from YAML stage definitions

use crate::helpers::*;
use flowline::{ErrorType, Factory, FlowConfig};
use serde_json::json;

#[tokio::test]
async fn test_scripted_counter_loop() {
    let yaml = r#"
name: "Counter"
params:
  count: 0
stages:
  - name: "init"
    set:
      label: "counter"
  - name: "bump"
    increment: "count"
    then: jump
    jump_to: "bump"
    until:
      key: "count"
      at_least: 3
  - name: "done"
    then: abort
"#;

    let config = FlowConfig::from_yaml(yaml).unwrap();
    let factory = Factory::new();
    let line = factory.new_line(config.to_handlers()).unwrap();

    let run = factory.start(line, config.initial_params()).unwrap();
    let ctx = wait_stopped(&factory, run).await;

    assert_eq!(ctx.get("count"), Some(json!(3)));
    assert_eq!(ctx.get("label"), Some(json!("counter")));
    assert!(ctx.errors().is_empty());
}

#[tokio::test]
async fn test_scripted_errors_and_repeat() {
    let yaml = r#"
name: "Flaky"
runs: 4
stages:
  - name: "attempt"
    increment: "attempts"
    error: "attempt failed"
    public: true
  - name: "retry"
    then: repeat
    until:
      key: "attempts"
      at_least: 2
  - name: "give-up"
    error: "giving up"
    then: abort
"#;

    let config = FlowConfig::from_yaml(yaml).unwrap();
    let factory = Factory::new();
    let line = factory.new_line(config.to_handlers()).unwrap();

    for _ in 0..config.runs {
        factory.start(line, config.initial_params()).unwrap();
    }
    let contexts = wait_all_stopped(&factory).await;
    assert_eq!(contexts.len(), 4);

    for ctx in contexts {
        let errors = ctx.errors();
        assert_eq!(ctx.get("attempts"), Some(json!(2)));
        assert_eq!(
            errors.messages(),
            vec!["attempt failed", "attempt failed", "giving up"]
        );
        assert_eq!(errors.by_type(ErrorType::PUBLIC).len(), 2);
        assert_eq!(errors.get(0).unwrap().meta(), Some(&json!({"stage": "attempt"})));
    }
}
