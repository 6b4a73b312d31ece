//! Integration coverage for the cooperative channel scheduler: signal-based
//! `emit`/`wait_for` synchronization (cross-channel references use the
//! `@channel.signal` form), and deadlock detection.

mod common;

use abml::{Document, DocumentExecutor, ErrorKind};

#[test]
fn wait_for_resumes_once_the_awaited_signal_is_emitted() {
    let yaml = r#"
channels:
  sender:
    actions:
      - action: emit
        signal: ready
  receiver:
    actions:
      - action: wait_for
        all_of: ["@sender.ready"]
      - action: probe
        var: anything
"#;
    let document = Document::from_yaml(yaml).unwrap();
    let (config, recorder) = common::config_with_probe();
    let report = DocumentExecutor::new(document, config).run();

    assert!(report.is_success(), "{:?}", report.channel_errors);
    assert_eq!(recorder.borrow().len(), 1, "receiver must resume past wait_for");
}

#[test]
fn a_signal_emitted_before_the_wait_began_still_satisfies_it() {
    // sender emits before receiver even reaches its wait_for (the scheduler
    // steps channels in document order within a tick), exercising the
    // durable (non-edge-triggered) signal log.
    let yaml = r#"
channels:
  sender:
    actions:
      - action: emit
        signal: ready
  receiver:
    actions:
      - action: log
        message: waiting
      - action: wait_for
        any_of: ["@sender.ready"]
      - action: probe
        var: anything
"#;
    let document = Document::from_yaml(yaml).unwrap();
    let (config, recorder) = common::config_with_probe();
    let report = DocumentExecutor::new(document, config).run();

    assert!(report.is_success(), "{:?}", report.channel_errors);
    assert_eq!(recorder.borrow().len(), 1);
}

#[test]
fn bare_signal_names_are_namespaced_per_channel() {
    // Both channels emit/wait on a signal named "ready", but a bare
    // `wait_for` name only ever refers to the waiting channel's own
    // namespace (spec.md §6): channel "b" emitting "ready" must not satisfy
    // channel "a"'s bare-name wait for its *own* "ready", which nothing ever
    // emits, so "a" deadlocks instead of resuming.
    let yaml = r#"
channels:
  a:
    actions:
      - action: wait_for
        all_of: ["ready"]
      - action: probe
        var: anything
  b:
    actions:
      - action: emit
        signal: ready
"#;
    let document = Document::from_yaml(yaml).unwrap();
    let (config, recorder) = common::config_with_probe();
    let report = DocumentExecutor::new(document, config).run();

    assert!(report.deadlocked, "b's differently-namespaced emit must not satisfy a's own bare-name wait");
    assert_eq!(report.channel_errors.len(), 1);
    assert_eq!(report.channel_errors[0].0, "a");
    assert_eq!(report.channel_errors[0].1.kind, ErrorKind::SchedulerDeadlock);
    assert!(recorder.borrow().is_empty(), "a must never resume past its wait_for");
}

#[test]
fn mutual_wait_with_no_emitter_deadlocks() {
    let yaml = r#"
channels:
  a:
    actions:
      - action: wait_for
        all_of: ["@b.ready"]
  b:
    actions:
      - action: wait_for
        all_of: ["@a.ready"]
"#;
    let document = Document::from_yaml(yaml).unwrap();
    let (config, _recorder) = common::config_with_probe();
    let report = DocumentExecutor::new(document, config).run();

    assert!(report.deadlocked);
    assert_eq!(report.channel_errors.len(), 2);
    for (_, error) in &report.channel_errors {
        assert_eq!(error.kind, ErrorKind::SchedulerDeadlock);
    }
}
