//! Integration coverage for the expression compiler/VM as observed through
//! documents, since the compiler and VM themselves are crate-private.

mod common;

use abml::{Document, DocumentExecutor, Value};

#[test]
fn null_safe_chain_coalesces_to_default() {
    let yaml = r#"
channels:
  main:
    actions:
      - action: set
        variable: result
        value: "a?.b?.c ?? 'fallback'"
      - action: probe
        var: result
"#;
    let document = Document::from_yaml(yaml).unwrap();
    let (config, recorder) = common::config_with_probe();
    let report = DocumentExecutor::new(document, config).run();

    assert!(report.is_success(), "{:?}", report.channel_errors);
    let values = recorder.borrow();
    assert!(matches!(&values[0], Value::Str(s) if s.as_ref() == "fallback"));
}

#[test]
fn unsafe_access_on_null_is_caught_by_channel_error_handler() {
    let yaml = r#"
channels:
  main:
    on_error:
      - action: set
        variable: _error_handled
        value: "true"
    actions:
      - action: set
        variable: result
        value: "missing.prop"
      - action: probe
        var: result
"#;
    let document = Document::from_yaml(yaml).unwrap();
    let (config, recorder) = common::config_with_probe();
    let report = DocumentExecutor::new(document, config).run();

    assert!(report.is_success(), "{:?}", report.channel_errors);
    let values = recorder.borrow();
    assert!(matches!(values[0], Value::Null));
}

#[test]
fn for_each_gives_each_iteration_an_isolated_loop_variable() {
    let yaml = r#"
channels:
  main:
    actions:
      - action: seed
        var: items
        values: [1, 2, 3]
      - action: for_each
        variable: item
        collection: items
        body:
          - action: probe
            var: item
      - action: probe
        var: item
"#;
    let document = Document::from_yaml(yaml).unwrap();
    let (config, recorder) = common::config_with_probe();
    let report = DocumentExecutor::new(document, config).run();

    assert!(report.is_success(), "{:?}", report.channel_errors);
    let values = recorder.borrow();
    assert!(matches!(values[0], Value::Int(1)));
    assert!(matches!(values[1], Value::Int(2)));
    assert!(matches!(values[2], Value::Int(3)));
    // the loop body's binding never leaks into the channel's own scope.
    assert!(matches!(values[3], Value::Null));
}
