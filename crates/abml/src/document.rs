//! The document data model (spec.md §2/§4.5): flows, channels, and the nine
//! reserved built-in actions, loaded from YAML.
//!
//! Deserialization is two-stage. [`RawAction`] is a catch-all: it captures
//! the `action:` discriminant plus every other field via `#[serde(flatten)]`
//! into a generic [`serde_yaml::Mapping`], so the schema never has to
//! enumerate every domain action a host might define. [`convert_action`]
//! then matches the discriminant against the nine reserved names and
//! deserializes each one's own typed parameter shape out of that mapping;
//! anything else falls through to [`ActionKind::Domain`] for external
//! dispatch.

use std::rc::Rc;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::error::DocumentError;

pub const RESERVED_ACTION_NAMES: &[&str] =
    &["set", "call", "goto", "cond", "for_each", "repeat", "log", "emit", "wait_for"];

/// A document with no `channels` runs its `main` flow directly, as a single
/// implicit sequential track (spec.md §6: "flows (required when no
/// channels)"; §8 scenario 6 names its direct-run flow `main`).
pub const DEFAULT_ENTRY_FLOW: &str = "main";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ErrorHandler {
    FlowRef(String),
    Inline(Rc<Vec<Action>>),
}

#[derive(Debug, Clone)]
pub struct Flow {
    pub actions: Rc<Vec<Action>>,
    pub on_error: Option<ErrorHandler>,
}

#[derive(Debug, Clone)]
pub struct Channel {
    pub actions: Rc<Vec<Action>>,
    pub on_error: Option<ErrorHandler>,
}

#[derive(Debug, Clone)]
pub struct Action {
    pub kind: ActionKind,
    pub on_error: Option<ErrorHandler>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Set,
    SetLocal,
    SetGlobal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone)]
pub enum WaitKind {
    AllOf(Vec<String>),
    AnyOf(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct WaitSpec {
    pub kind: WaitKind,
    pub timeout: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct CondBranch {
    pub when: String,
    pub then: Rc<Vec<Action>>,
}

#[derive(Debug, Clone)]
pub enum ActionKind {
    Set { variable: String, value: String, mode: WriteMode },
    Call { flow: String },
    Goto { flow: String },
    Cond { branches: Vec<CondBranch>, else_branch: Option<Rc<Vec<Action>>> },
    ForEach { variable: String, collection: String, body: Rc<Vec<Action>> },
    Repeat { count: String, body: Rc<Vec<Action>> },
    Log { message: String, level: LogLevel },
    Emit { signal: String },
    WaitFor(WaitSpec),
    Domain { name: String, payload: serde_yaml::Mapping },
}

impl ActionKind {
    /// The action's YAML `action:` discriminator, used to populate
    /// `_error.action` (spec.md §4.6).
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Set { .. } => "set",
            Self::Call { .. } => "call",
            Self::Goto { .. } => "goto",
            Self::Cond { .. } => "cond",
            Self::ForEach { .. } => "for_each",
            Self::Repeat { .. } => "repeat",
            Self::Log { .. } => "log",
            Self::Emit { .. } => "emit",
            Self::WaitFor(_) => "wait_for",
            Self::Domain { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    pub metadata: Metadata,
    pub version: Option<String>,
    pub on_error: Option<ErrorHandler>,
    pub flows: IndexMap<String, Flow>,
    pub channels: IndexMap<String, Channel>,
}

impl Document {
    pub fn from_yaml(source: &str) -> Result<Self, DocumentError> {
        let raw: RawDocument = serde_yaml::from_str(source)?;
        let document = Self {
            metadata: raw.metadata.unwrap_or_default(),
            version: raw.version,
            on_error: convert_error_handler(raw.on_error)?,
            flows: raw
                .flows
                .into_iter()
                .map(|(name, flow)| Ok((name, convert_flow(flow)?)))
                .collect::<Result<_, DocumentError>>()?,
            channels: raw
                .channels
                .into_iter()
                .map(|(name, channel)| Ok((name, convert_channel(channel)?)))
                .collect::<Result<_, DocumentError>>()?,
        };
        document.validate_flow_refs()?;
        if document.channels.is_empty() && !document.flows.contains_key(DEFAULT_ENTRY_FLOW) {
            return Err(DocumentError::MissingEntryFlow);
        }
        Ok(document)
    }

    fn validate_flow_refs(&self) -> Result<(), DocumentError> {
        validate_error_handler(&self.on_error, &self.flows)?;
        for flow in self.flows.values() {
            validate_actions(&flow.actions, &self.flows)?;
            validate_error_handler(&flow.on_error, &self.flows)?;
        }
        for channel in self.channels.values() {
            validate_actions(&channel.actions, &self.flows)?;
            validate_error_handler(&channel.on_error, &self.flows)?;
        }
        Ok(())
    }
}

fn validate_error_handler(handler: &Option<ErrorHandler>, flows: &IndexMap<String, Flow>) -> Result<(), DocumentError> {
    match handler {
        Some(ErrorHandler::FlowRef(name)) if !flows.contains_key(name) => Err(DocumentError::UnknownFlow(name.clone())),
        Some(ErrorHandler::Inline(actions)) => validate_actions(actions, flows),
        _ => Ok(()),
    }
}

fn validate_actions(actions: &[Action], flows: &IndexMap<String, Flow>) -> Result<(), DocumentError> {
    for action in actions {
        validate_error_handler(&action.on_error, flows)?;
        match &action.kind {
            ActionKind::Call { flow } | ActionKind::Goto { flow } if !flows.contains_key(flow) => {
                return Err(DocumentError::UnknownFlow(flow.clone()));
            }
            ActionKind::Cond { branches, else_branch } => {
                for branch in branches {
                    validate_actions(&branch.then, flows)?;
                }
                if let Some(else_branch) = else_branch {
                    validate_actions(else_branch, flows)?;
                }
            }
            ActionKind::ForEach { body, .. } | ActionKind::Repeat { body, .. } => validate_actions(body, flows)?,
            _ => {}
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
struct RawDocument {
    #[serde(default)]
    metadata: Option<Metadata>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    on_error: Option<RawErrorHandler>,
    #[serde(default)]
    flows: IndexMap<String, RawFlow>,
    #[serde(default)]
    channels: IndexMap<String, RawChannel>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawFlow {
    #[serde(default)]
    actions: Vec<RawAction>,
    #[serde(default)]
    on_error: Option<RawErrorHandler>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawChannel {
    #[serde(default)]
    actions: Vec<RawAction>,
    #[serde(default)]
    on_error: Option<RawErrorHandler>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawAction {
    action: String,
    #[serde(flatten)]
    params: serde_yaml::Mapping,
    #[serde(default)]
    on_error: Option<RawErrorHandler>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawErrorHandler {
    FlowRef(String),
    Inline(Vec<RawAction>),
}

fn convert_flow(raw: RawFlow) -> Result<Flow, DocumentError> {
    Ok(Flow { actions: convert_actions(raw.actions)?, on_error: convert_error_handler(raw.on_error)? })
}

fn convert_channel(raw: RawChannel) -> Result<Channel, DocumentError> {
    Ok(Channel { actions: convert_actions(raw.actions)?, on_error: convert_error_handler(raw.on_error)? })
}

fn convert_error_handler(raw: Option<RawErrorHandler>) -> Result<Option<ErrorHandler>, DocumentError> {
    match raw {
        None => Ok(None),
        Some(RawErrorHandler::FlowRef(name)) => Ok(Some(ErrorHandler::FlowRef(name))),
        Some(RawErrorHandler::Inline(actions)) => Ok(Some(ErrorHandler::Inline(convert_actions(actions)?))),
    }
}

fn convert_actions(raws: Vec<RawAction>) -> Result<Rc<Vec<Action>>, DocumentError> {
    raws.into_iter().map(convert_action).collect::<Result<Vec<_>, _>>().map(Rc::new)
}

fn convert_action(raw: RawAction) -> Result<Action, DocumentError> {
    let params = serde_yaml::Value::Mapping(raw.params);
    let kind = match raw.action.as_str() {
        "set" => {
            let p: SetParams = from_params(params)?;
            let mode = match p.mode.as_deref() {
                None => WriteMode::Set,
                Some("local") => WriteMode::SetLocal,
                Some("global") => WriteMode::SetGlobal,
                Some(other) => return Err(DocumentError::Schema(format!("unknown set mode '{other}'"))),
            };
            ActionKind::Set { variable: p.variable, value: p.value, mode }
        }
        "call" => {
            let p: FlowRefParams = from_params(params)?;
            ActionKind::Call { flow: p.flow }
        }
        "goto" => {
            let p: FlowRefParams = from_params(params)?;
            ActionKind::Goto { flow: p.flow }
        }
        "cond" => {
            let p: CondParams = from_params(params)?;
            ActionKind::Cond {
                branches: p
                    .branches
                    .into_iter()
                    .map(|b| Ok(CondBranch { when: b.when, then: convert_actions(b.then)? }))
                    .collect::<Result<_, DocumentError>>()?,
                else_branch: p.else_branch.map(convert_actions).transpose()?,
            }
        }
        "for_each" => {
            let p: ForEachParams = from_params(params)?;
            ActionKind::ForEach { variable: p.variable, collection: p.collection, body: convert_actions(p.body)? }
        }
        "repeat" => {
            let p: RepeatParams = from_params(params)?;
            ActionKind::Repeat { count: p.count, body: convert_actions(p.body)? }
        }
        "log" => {
            let p: LogParams = from_params(params)?;
            let level = match p.level {
                None => LogLevel::default(),
                Some(text) => text.parse().map_err(|_| DocumentError::Schema(format!("unknown log level '{text}'")))?,
            };
            ActionKind::Log { message: p.message, level }
        }
        "emit" => {
            let p: EmitParams = from_params(params)?;
            ActionKind::Emit { signal: p.signal }
        }
        "wait_for" => {
            let p: WaitForParams = from_params(params)?;
            let kind = match (p.all_of, p.any_of) {
                (Some(names), None) => WaitKind::AllOf(names),
                (None, Some(names)) => WaitKind::AnyOf(names),
                _ => {
                    return Err(DocumentError::Schema("wait_for requires exactly one of 'all_of' or 'any_of'".to_owned()));
                }
            };
            ActionKind::WaitFor(WaitSpec { kind, timeout: p.timeout })
        }
        other => {
            let serde_yaml::Value::Mapping(payload) = params else { unreachable!("params is always constructed as a Mapping") };
            ActionKind::Domain { name: other.to_owned(), payload }
        }
    };
    Ok(Action { kind, on_error: convert_error_handler(raw.on_error)? })
}

fn from_params<T: for<'de> Deserialize<'de>>(value: serde_yaml::Value) -> Result<T, DocumentError> {
    serde_yaml::from_value(value).map_err(|e| DocumentError::Schema(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct SetParams {
    variable: String,
    value: String,
    #[serde(default)]
    mode: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FlowRefParams {
    flow: String,
}

#[derive(Debug, Deserialize)]
struct CondParams {
    branches: Vec<RawCondBranch>,
    #[serde(default, rename = "else")]
    else_branch: Option<Vec<RawAction>>,
}

#[derive(Debug, Deserialize)]
struct RawCondBranch {
    when: String,
    then: Vec<RawAction>,
}

#[derive(Debug, Deserialize)]
struct ForEachParams {
    variable: String,
    collection: String,
    body: Vec<RawAction>,
}

#[derive(Debug, Deserialize)]
struct RepeatParams {
    count: String,
    body: Vec<RawAction>,
}

#[derive(Debug, Deserialize)]
struct LogParams {
    message: String,
    #[serde(default)]
    level: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmitParams {
    signal: String,
}

#[derive(Debug, Deserialize)]
struct WaitForParams {
    #[serde(default)]
    all_of: Option<Vec<String>>,
    #[serde(default)]
    any_of: Option<Vec<String>>,
    #[serde(default)]
    timeout: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_document() {
        let yaml = "
flows:
  main:
    actions:
      - action: set
        variable: x
        value: '1'
      - action: log
        message: hi
";
        let doc = Document::from_yaml(yaml).unwrap();
        assert_eq!(doc.flows.len(), 1);
        assert_eq!(doc.flows["main"].actions.len(), 2);
    }

    #[test]
    fn unknown_action_name_becomes_domain_action() {
        let yaml = r"
flows:
  main:
    actions:
      - action: play_sound
        clip: boom.wav
";
        let doc = Document::from_yaml(yaml).unwrap();
        assert!(matches!(&doc.flows["main"].actions[0].kind, ActionKind::Domain { name, .. } if name == "play_sound"));
    }

    #[test]
    fn goto_to_unknown_flow_is_rejected() {
        let yaml = r"
flows:
  main:
    actions:
      - action: goto
        flow: nowhere
";
        assert!(matches!(Document::from_yaml(yaml), Err(DocumentError::UnknownFlow(name)) if name == "nowhere"));
    }
}
