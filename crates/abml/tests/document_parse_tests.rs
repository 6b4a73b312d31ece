//! Integration coverage for `Document::from_yaml`'s structural validation,
//! beyond the single-action-shape cases already covered inline in
//! `document.rs`.

use abml::{ActionKind, Document, DocumentError};

#[test]
fn unknown_flow_reference_nested_inside_for_each_and_cond_is_rejected() {
    let yaml = r#"
flows:
  main:
    actions:
      - action: for_each
        variable: item
        collection: items
        body:
          - action: cond
            branches:
              - when: "true"
                then:
                  - action: call
                    flow: missing
"#;
    let result = Document::from_yaml(yaml);
    assert!(matches!(result, Err(DocumentError::UnknownFlow(name)) if name == "missing"));
}

#[test]
fn unknown_flow_reference_inside_an_inline_error_handler_is_rejected() {
    let yaml = r#"
flows:
  main:
    actions:
      - action: log
        message: hi
        on_error:
          - action: goto
            flow: nowhere
"#;
    let result = Document::from_yaml(yaml);
    assert!(matches!(result, Err(DocumentError::UnknownFlow(name)) if name == "nowhere"));
}

#[test]
fn reserved_action_name_cannot_be_registered_as_a_domain_handler() {
    let mut registry = abml::HandlerRegistry::new();
    let result = registry.register("emit", |_: &serde_yaml::Mapping, _: &abml::Scope| {
        Ok(abml::HandlerOutcome::Continue)
    });
    assert!(matches!(result, Err(DocumentError::ReservedActionName(name)) if name == "emit"));
}

#[test]
fn a_channel_less_document_without_a_main_flow_is_rejected() {
    let yaml = r#"
flows:
  greet:
    actions:
      - action: log
        message: hi
"#;
    let result = Document::from_yaml(yaml);
    assert!(matches!(result, Err(DocumentError::MissingEntryFlow)));
}

#[test]
fn a_channel_less_document_with_a_main_flow_parses() {
    let yaml = r#"
flows:
  main:
    actions:
      - action: log
        message: hi
"#;
    let document = Document::from_yaml(yaml).unwrap();
    assert_eq!(document.flows.len(), 1);
    assert!(document.channels.is_empty());
}

#[test]
fn parses_a_document_with_flows_channels_and_document_level_error_handler() {
    let yaml = r#"
metadata:
  id: demo
  name: Demo Document
version: "1"
on_error:
  flow: recover
flows:
  recover:
    actions:
      - action: log
        message: "recovering"
  greet:
    actions:
      - action: log
        message: "hello"
channels:
  main:
    actions:
      - action: call
        flow: greet
      - action: wait_for
        any_of: ["done"]
        timeout: 2.5
"#;
    let document = Document::from_yaml(yaml).unwrap();
    assert_eq!(document.metadata.id.as_deref(), Some("demo"));
    assert_eq!(document.flows.len(), 2);
    assert_eq!(document.channels.len(), 1);
    assert!(matches!(&document.flows["greet"].actions[0].kind, ActionKind::Log { message, .. } if message == "hello"));
    assert!(matches!(&document.channels["main"].actions[1].kind, ActionKind::WaitFor(spec) if spec.timeout == Some(2.5)));
}
