//! Integration coverage for `DocumentExecutor`: flow `call` isolation,
//! `set_global` escape, and cond branch selection.

mod common;

use abml::{Document, DocumentExecutor, HandlerOutcome, Value, WaitKind, WaitSpec};

#[test]
fn call_isolates_locals_but_set_global_escapes_to_root() {
    let yaml = r#"
flows:
  inc:
    actions:
      - action: set
        variable: local_var
        value: "1"
        mode: local
      - action: set
        variable: shared
        value: "99"
        mode: global
channels:
  main:
    actions:
      - action: call
        flow: inc
      - action: probe
        var: shared
      - action: probe
        var: local_var
"#;
    let document = Document::from_yaml(yaml).unwrap();
    let (config, recorder) = common::config_with_probe();
    let report = DocumentExecutor::new(document, config).run();

    assert!(report.is_success(), "{:?}", report.channel_errors);
    let values = recorder.borrow();
    assert!(matches!(values[0], Value::Int(99)), "set_global must be visible outside the call");
    assert!(matches!(values[1], Value::Null), "a call's set_local must not leak into the caller's scope");
}

#[test]
fn cond_runs_the_first_true_branch_and_no_other() {
    let yaml = r#"
channels:
  main:
    actions:
      - action: set
        variable: score
        value: "7"
      - action: cond
        branches:
          - when: "score > 10"
            then:
              - action: probe
                var: score
          - when: "score > 5"
            then:
              - action: probe
                var: score
        else:
          - action: probe
            var: score
"#;
    let document = Document::from_yaml(yaml).unwrap();
    let (config, recorder) = common::config_with_probe();
    let report = DocumentExecutor::new(document, config).run();

    assert!(report.is_success(), "{:?}", report.channel_errors);
    let values = recorder.borrow();
    assert_eq!(values.len(), 1, "exactly one branch body should have run");
    assert!(matches!(values[0], Value::Int(7)));
}

#[test]
fn an_unhandled_action_error_escalates_through_each_handler_exactly_once() {
    // The channel handler logs but never sets `_error_handled`, so the
    // error remains unhandled and the channel ends up `Errored` — but the
    // handler itself must still only have run once, not once per
    // escalation attempt.
    let yaml = r#"
channels:
  main:
    on_error:
      - action: log
        message: "caught"
    actions:
      - action: set
        variable: result
        value: "missing.prop"
"#;
    let document = Document::from_yaml(yaml).unwrap();
    let (config, lines) = common::config_with_log();
    let report = DocumentExecutor::new(document, config).run();

    assert!(!report.is_success());
    assert_eq!(report.channel_errors.len(), 1);
    assert_eq!(lines.borrow().iter().filter(|l| l.as_str() == "caught").count(), 1, "handler must run exactly once");
}

#[test]
fn a_domain_handler_can_yield_wait_like_the_builtin_wait_for() {
    let yaml = r#"
channels:
  worker:
    actions:
      - action: park
      - action: probe
        var: anything
  sender:
    actions:
      - action: emit
        signal: go
"#;
    let document = Document::from_yaml(yaml).unwrap();
    let (mut config, recorder) = common::config_with_probe();
    config
        .handlers
        .register("park", |_: &serde_yaml::Mapping, _: &abml::Scope| {
            Ok(HandlerOutcome::YieldWait(WaitSpec { kind: WaitKind::AllOf(vec!["@sender.go".to_owned()]), timeout: None }))
        })
        .unwrap();
    let report = DocumentExecutor::new(document, config).run();

    assert!(report.is_success(), "{:?}", report.channel_errors);
    assert_eq!(recorder.borrow().len(), 1, "worker must resume once 'go' is emitted");
}

#[test]
fn a_document_with_no_channels_runs_its_main_flow_directly() {
    let yaml = r#"
flows:
  main:
    actions:
      - action: probe
        var: anything
      - action: probe
        var: anything
"#;
    let document = Document::from_yaml(yaml).unwrap();
    let (config, recorder) = common::config_with_probe();
    let report = DocumentExecutor::new(document, config).run();

    assert!(report.is_success(), "{:?}", report.channel_errors);
    assert_eq!(recorder.borrow().len(), 2, "a flows-only document must still run sequentially to completion");
}

#[test]
fn repeat_runs_body_exactly_count_times() {
    let yaml = r#"
channels:
  main:
    actions:
      - action: repeat
        count: "3"
        body:
          - action: probe
            var: score
"#;
    let document = Document::from_yaml(yaml).unwrap();
    let (config, recorder) = common::config_with_probe();
    let report = DocumentExecutor::new(document, config).run();

    assert!(report.is_success(), "{:?}", report.channel_errors);
    assert_eq!(recorder.borrow().len(), 3);
}
