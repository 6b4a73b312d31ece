//! Dispatch for domain actions: the `action:` names a document uses beyond
//! the nine reserved built-ins (spec.md §4.5's "dispatched externally").
//!
//! A host registers one closure per domain action name. The executor looks
//! the name up when it reaches an [`crate::document::ActionKind::Domain`]
//! and calls it with that action's raw YAML payload and the live scope, the
//! same shape as the teacher's builtin-function dispatch table.

use std::collections::HashMap;

use crate::document::{RESERVED_ACTION_NAMES, WaitSpec};
use crate::error::{DocumentError, RuntimeError};
use crate::scope::Scope;

/// What a domain action tells the executor to do next (spec.md §4.5's
/// Action Handler Contract).
#[derive(Debug, Clone)]
pub enum HandlerOutcome {
    /// Proceed to the next action in the current flow/channel.
    Continue,
    /// Stop running the current flow/channel body without an error.
    Stop,
    /// Jump to another flow, replacing the current continuation.
    Goto(String),
    /// Cede scheduling until `spec` is satisfied, the same suspension
    /// `wait_for` itself uses. Only meaningful inside a channel; a domain
    /// handler that yields from a directly-run flow (no channels) suspends
    /// that flow's lone implicit channel exactly the same way.
    YieldWait(WaitSpec),
}

pub trait ActionHandler {
    fn execute(&mut self, payload: &serde_yaml::Mapping, scope: &Scope) -> Result<HandlerOutcome, RuntimeError>;
}

impl<F> ActionHandler for F
where
    F: FnMut(&serde_yaml::Mapping, &Scope) -> Result<HandlerOutcome, RuntimeError>,
{
    fn execute(&mut self, payload: &serde_yaml::Mapping, scope: &Scope) -> Result<HandlerOutcome, RuntimeError> {
        self(payload, scope)
    }
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Box<dyn ActionHandler>>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a domain action handler. Rejects any of the nine reserved
    /// built-in names (spec.md §4.5) so a document author can never shadow
    /// `set`/`call`/`goto`/etc. with a host-defined handler.
    pub fn register(&mut self, name: impl Into<String>, handler: impl ActionHandler + 'static) -> Result<(), DocumentError> {
        let name = name.into();
        if RESERVED_ACTION_NAMES.contains(&name.as_str()) {
            return Err(DocumentError::ReservedActionName(name));
        }
        self.handlers.insert(name, Box::new(handler));
        Ok(())
    }

    pub(crate) fn dispatch(&mut self, name: &str, payload: &serde_yaml::Mapping, scope: &Scope) -> Result<HandlerOutcome, RuntimeError> {
        match self.handlers.get_mut(name) {
            Some(handler) => handler.execute(payload, scope),
            None => Err(RuntimeError::new(
                crate::error::ErrorKind::UnknownAction,
                format!("no handler registered for domain action '{name}'"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_reserved_name() {
        let mut registry = HandlerRegistry::new();
        let result = registry.register("set", |_: &serde_yaml::Mapping, _: &Scope| Ok(HandlerOutcome::Continue));
        assert!(matches!(result, Err(DocumentError::ReservedActionName(name)) if name == "set"));
    }

    #[test]
    fn dispatches_registered_domain_action() {
        let mut registry = HandlerRegistry::new();
        registry
            .register("play_sound", |_: &serde_yaml::Mapping, _: &Scope| Ok(HandlerOutcome::Continue))
            .unwrap();
        let scope = Scope::root();
        let outcome = registry.dispatch("play_sound", &serde_yaml::Mapping::new(), &scope).unwrap();
        assert!(matches!(outcome, HandlerOutcome::Continue));
    }
}
