//! The document executor (spec.md §4.5–§4.6): drives every channel's frame
//! stack to completion, dispatches the nine built-in actions plus domain
//! actions, and runs the three-level `on_error` escalation chain.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::clock::{Clock, SystemClock};
use crate::document::{Action, ActionKind, DEFAULT_ENTRY_FLOW, Document, ErrorHandler, LogLevel, WaitSpec, WriteMode};
use crate::error::{ErrorKind, RuntimeError, StackFrame};
use crate::expr::ExpressionCache;
use crate::functions::FunctionRegistry;
use crate::handler::{HandlerOutcome, HandlerRegistry};
use crate::log::{LogSink, StdLog};
use crate::scheduler::{ChannelState, ChannelStatus, Frame, Scheduler};
use crate::scope::Scope;
use crate::template;
use crate::value::Value;
use crate::vm::{self, Vm};

/// Everything about a run that an embedder can configure: which functions
/// and domain handlers are available, where logs go, and what clock drives
/// `wait_for` timeouts. Analogous to the teacher's `ResourceTracker`-style
/// config object threaded through an interpreter run.
pub struct ExecutorConfig {
    pub functions: FunctionRegistry,
    pub handlers: HandlerRegistry,
    pub log: Box<dyn LogSink>,
    pub clock: Box<dyn Clock>,
    /// Upper bound on scheduler ticks, a backstop against a document whose
    /// channels can never reach `Done` (spec.md's deadlock detection covers
    /// the case where nothing can progress; this covers the case where
    /// something progresses forever).
    pub max_ticks: usize,
    /// When set, every expression is evaluated through the VM's tracing
    /// mode (spec.md §4.3) instead of the plain fast path, and each retired
    /// instruction is written to `log` at [`LogLevel::Debug`].
    pub trace: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            functions: FunctionRegistry::new(),
            handlers: HandlerRegistry::new(),
            log: Box::new(StdLog),
            clock: Box::new(SystemClock),
            max_ticks: 100_000,
            trace: false,
        }
    }
}

/// Outcome of a full document run.
#[derive(Debug, Default)]
pub struct RunReport {
    pub channel_errors: Vec<(String, RuntimeError)>,
    pub deadlocked: bool,
    pub ticks: usize,
}

impl RunReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.deadlocked && self.channel_errors.is_empty()
    }
}

enum ActionEffect {
    None,
    PushFrame(Frame),
    PopFrame,
    Goto(String),
    Wait(WaitSpec),
}

pub struct DocumentExecutor {
    document: Rc<Document>,
    cache: ExpressionCache,
    root: Scope,
    config: ExecutorConfig,
    scheduler: Scheduler,
}

impl DocumentExecutor {
    #[must_use]
    pub fn new(document: Document, config: ExecutorConfig) -> Self {
        let document = Rc::new(document);
        let root = Scope::root();
        let mut scheduler = Scheduler::new();
        if document.channels.is_empty() {
            // No channels: `Document::from_yaml` already guarantees a `main`
            // flow exists, so the whole run is just that flow driven
            // sequentially through a single implicit channel (spec.md §6).
            let main = &document.flows[DEFAULT_ENTRY_FLOW];
            let scope = root.create_child();
            scheduler.channels.push(ChannelState::new(
                DEFAULT_ENTRY_FLOW.to_owned(),
                Rc::clone(&main.actions),
                main.on_error.clone(),
                scope,
            ));
        } else {
            for (name, channel) in &document.channels {
                let scope = root.create_child();
                scheduler.channels.push(ChannelState::new(
                    name.clone(),
                    Rc::clone(&channel.actions),
                    channel.on_error.clone(),
                    scope,
                ));
            }
        }
        Self { document, cache: ExpressionCache::new(), root, config, scheduler }
    }

    /// Drives every channel to completion, deadlock, or the tick ceiling.
    pub fn run(&mut self) -> RunReport {
        let mut report = RunReport::default();
        for tick in 0..self.config.max_ticks {
            report.ticks = tick + 1;
            if self.scheduler.all_finished() {
                break;
            }
            let mut progressed = false;
            for i in 0..self.scheduler.channels.len() {
                let mut channel = std::mem::replace(&mut self.scheduler.channels[i], ChannelState::placeholder());
                let made_progress = self.step_one(&mut channel);
                progressed |= made_progress;
                self.scheduler.channels[i] = channel;
            }
            if !progressed && !self.scheduler.all_finished() {
                report.deadlocked = true;
                self.fail_deadlocked_channels();
                break;
            }
        }
        for channel in &self.scheduler.channels {
            if let ChannelStatus::Errored(err) = &channel.status {
                report.channel_errors.push((channel.name.clone(), err.clone()));
            }
        }
        report
    }

    /// Marks every still-waiting channel as failed with a
    /// `SchedulerDeadlock` error, running each through its own escalation
    /// chain (a document-level `on_error` can still observe and log a
    /// deadlock even though nothing can satisfy the original wait).
    fn fail_deadlocked_channels(&mut self) {
        for i in 0..self.scheduler.channels.len() {
            let mut channel = std::mem::replace(&mut self.scheduler.channels[i], ChannelState::placeholder());
            if matches!(channel.status, ChannelStatus::Waiting { .. }) {
                let err = RuntimeError::new(ErrorKind::SchedulerDeadlock, "no channel can make progress; deadlock detected")
                    .with_flow(channel.name.clone())
                    .with_action("wait_for");
                self.fail_channel(&mut channel, err, None);
            }
            self.scheduler.channels[i] = channel;
        }
    }

    /// Drains as much progress as possible from one channel this tick.
    /// Returns whether anything actually changed (an action ran, a wait was
    /// newly satisfied, a timeout fired) so the scheduler can detect when a
    /// full pass makes zero progress.
    fn step_one(&mut self, channel: &mut ChannelState) -> bool {
        let mut progressed = false;
        loop {
            let wake = match &channel.status {
                ChannelStatus::Done | ChannelStatus::Errored(_) => return progressed,
                ChannelStatus::Running => Wake::Run,
                ChannelStatus::Waiting { spec, started } => {
                    if self.scheduler.wait_satisfied(spec, &channel.name) {
                        Wake::Run
                    } else if self.scheduler.timed_out(*started, spec.timeout, self.config.clock.now()) {
                        Wake::TimedOut
                    } else {
                        Wake::StillWaiting
                    }
                }
            };
            match wake {
                Wake::StillWaiting => return progressed,
                Wake::TimedOut => {
                    let err = RuntimeError::new(ErrorKind::Timeout, "wait_for timed out").with_action("wait_for");
                    // A handled timeout resumes the channel (the cursor is
                    // already past the `wait_for` action); an unhandled one
                    // leaves it `Errored`, set by `fail_channel` itself.
                    if self.fail_channel(channel, err, None) {
                        channel.status = ChannelStatus::Running;
                    }
                    return true;
                }
                Wake::Run => {
                    channel.status = ChannelStatus::Running;
                    if self.advance(channel) {
                        progressed = true;
                        continue;
                    }
                    return true;
                }
            }
        }
    }

    /// Executes exactly one action (or one loop-frame transition). Returns
    /// whether the caller should keep draining this tick; `false` once the
    /// channel has entered a waiting, finished, or errored state. An action
    /// error is resolved (escalated, exactly once) before returning, never
    /// propagated to the caller.
    fn advance(&mut self, channel: &mut ChannelState) -> bool {
        let (action, scope) = match channel.cursor.last_mut() {
            None => {
                channel.status = ChannelStatus::Done;
                return false;
            }
            Some(Frame::Actions { actions, index, scope, .. }) => {
                if *index >= actions.len() {
                    channel.cursor.pop();
                    if channel.cursor.is_empty() {
                        channel.status = ChannelStatus::Done;
                    }
                    return true;
                }
                let action = actions[*index].clone();
                *index += 1;
                (action, scope.clone())
            }
            Some(Frame::ForEach { items, variable, index, body, scope }) => {
                if *index >= items.len() {
                    channel.cursor.pop();
                    return true;
                }
                let item = items[*index].clone();
                *index += 1;
                let child = scope.create_child();
                child.set_local(variable, item);
                // Materialize everything the new frame needs as owned
                // values before touching `channel.cursor` again: `body` and
                // `scope` above still borrow through this frame, and that
                // borrow must end before `cursor.push` re-borrows the
                // vector (which may reallocate and invalidate it).
                let body = Rc::clone(body);
                channel.cursor.push(Frame::Actions { actions: body, index: 0, scope: child, on_error: None, flow: None });
                return true;
            }
            Some(Frame::Repeat { remaining, body, scope }) => {
                if *remaining == 0 {
                    channel.cursor.pop();
                    return true;
                }
                *remaining -= 1;
                let child = scope.create_child();
                let body = Rc::clone(body);
                channel.cursor.push(Frame::Actions { actions: body, index: 0, scope: child, on_error: None, flow: None });
                return true;
            }
        };

        match self.execute_action(&action, &scope, channel.name.clone()) {
            Ok(effect) => {
                let keep_going = !matches!(effect, ActionEffect::Wait(_));
                self.apply_effect(effect, channel);
                keep_going
            }
            Err(err) => self.fail_channel(channel, err.with_action(action.kind.name()), action.on_error.as_ref()),
        }
    }

    /// Evaluates an expression, routing through [`Vm::execute_traced`]
    /// instead of the plain [`vm::eval`] fast path when `config.trace` is
    /// set (spec.md §4.3's tracing mode).
    fn eval(&mut self, scope: &Scope, source: &str) -> Result<Value, RuntimeError> {
        if self.config.trace {
            Vm::execute_traced(&self.cache, &self.config.functions, scope, source, self.config.log.as_mut())
        } else {
            vm::eval(&self.cache, &self.config.functions, scope, source)
        }
    }

    fn apply_effect(&mut self, effect: ActionEffect, channel: &mut ChannelState) {
        match effect {
            ActionEffect::None => {}
            ActionEffect::PushFrame(frame) => channel.cursor.push(frame),
            ActionEffect::PopFrame => {
                channel.cursor.pop();
            }
            ActionEffect::Goto(flow) => {
                let scope = channel.cursor.last().map_or_else(|| self.root.clone(), |f| f.scope().clone());
                let target = &self.document.flows[&flow];
                channel.cursor.clear();
                channel.cursor.push(Frame::Actions {
                    actions: Rc::clone(&target.actions),
                    index: 0,
                    scope,
                    on_error: target.on_error.clone(),
                    flow: Some(flow),
                });
            }
            ActionEffect::Wait(spec) => {
                channel.status = ChannelStatus::Waiting { spec, started: self.config.clock.now() };
            }
        }
    }

    fn execute_action(&mut self, action: &Action, scope: &Scope, channel_name: String) -> Result<ActionEffect, RuntimeError> {
        match &action.kind {
            ActionKind::Set { variable, value, mode } => {
                let v = self.eval(scope, value)?;
                match mode {
                    WriteMode::Set => scope.set(variable, v),
                    WriteMode::SetLocal => scope.set_local(variable, v),
                    WriteMode::SetGlobal => scope.set_global(variable, v),
                }
                Ok(ActionEffect::None)
            }
            ActionKind::Call { flow } => {
                let target = &self.document.flows[flow];
                let child = scope.create_child();
                Ok(ActionEffect::PushFrame(Frame::Actions {
                    actions: Rc::clone(&target.actions),
                    index: 0,
                    scope: child,
                    on_error: target.on_error.clone(),
                    flow: Some(flow.clone()),
                }))
            }
            ActionKind::Goto { flow } => Ok(ActionEffect::Goto(flow.clone())),
            ActionKind::Cond { branches, else_branch } => {
                for branch in branches {
                    let cond = self.eval(scope, &branch.when)?;
                    if cond.is_truthy() {
                        return Ok(ActionEffect::PushFrame(Frame::Actions {
                            actions: Rc::clone(&branch.then),
                            index: 0,
                            scope: scope.create_child(),
                            on_error: None,
                            flow: None,
                        }));
                    }
                }
                if let Some(else_branch) = else_branch {
                    return Ok(ActionEffect::PushFrame(Frame::Actions {
                        actions: Rc::clone(else_branch),
                        index: 0,
                        scope: scope.create_child(),
                        on_error: None,
                        flow: None,
                    }));
                }
                Ok(ActionEffect::None)
            }
            ActionKind::ForEach { variable, collection, body } => {
                let collection = self.eval(scope, collection)?;
                let items = match collection {
                    Value::Seq(items) => items.as_ref().clone(),
                    Value::Null => Vec::new(),
                    other => {
                        return Err(RuntimeError::new(
                            ErrorKind::Expression,
                            format!("for_each requires a sequence, found {}", other.type_name()),
                        ));
                    }
                };
                Ok(ActionEffect::PushFrame(Frame::ForEach {
                    items: Rc::new(items),
                    variable: variable.clone(),
                    index: 0,
                    body: Rc::clone(body),
                    scope: scope.clone(),
                }))
            }
            ActionKind::Repeat { count, body } => {
                let count = self.eval(scope, count)?;
                let count = match count {
                    Value::Int(i) => i,
                    Value::Float(f) => f as i64,
                    other => {
                        return Err(RuntimeError::new(
                            ErrorKind::Expression,
                            format!("repeat count must be numeric, found {}", other.type_name()),
                        ));
                    }
                };
                let remaining = if count < 0 {
                    self.config.log.log(LogLevel::Warn, &format!("repeat count {count} is negative; truncated to 0"));
                    0
                } else {
                    count as u64
                };
                Ok(ActionEffect::PushFrame(Frame::Repeat { remaining, body: Rc::clone(body), scope: scope.clone() }))
            }
            ActionKind::Log { message, level } => {
                let rendered = template::render(&self.cache, &self.config.functions, scope, message)?;
                self.config.log.log(*level, &rendered.display_string());
                Ok(ActionEffect::None)
            }
            ActionKind::Emit { signal } => {
                let rendered = template::render(&self.cache, &self.config.functions, scope, signal)?;
                self.scheduler.record_signal(&channel_name, &rendered.display_string());
                Ok(ActionEffect::None)
            }
            ActionKind::WaitFor(spec) => Ok(ActionEffect::Wait(spec.clone())),
            ActionKind::Domain { name, payload } => match self.config.handlers.dispatch(name, payload, scope)? {
                HandlerOutcome::Continue => Ok(ActionEffect::None),
                HandlerOutcome::Stop => Ok(ActionEffect::PopFrame),
                HandlerOutcome::Goto(flow) => Ok(ActionEffect::Goto(flow)),
                HandlerOutcome::YieldWait(spec) => Ok(ActionEffect::Wait(spec)),
            },
        }
    }

    /// Walks the three-level `on_error` chain (spec.md §4.6): the action's
    /// own handler, then the nearest enclosing flow/channel handler found on
    /// the frame stack, then the document's. Each handler opts into
    /// swallowing the error by setting `_error_handled` to a strict boolean
    /// `true`; anything else (unset, falsy, non-boolean) escalates further.
    fn escalate(&mut self, mut error: RuntimeError, action_handler: Option<&ErrorHandler>, channel: &ChannelState) -> Result<(), RuntimeError> {
        let scope = channel.cursor.last().map_or_else(|| self.root.clone(), |f| f.scope().clone());
        if error.stack.is_empty() {
            error.stack = build_stack(channel);
        }
        if error.flow.is_none() {
            error.flow = error.stack.last().map(|frame| frame.flow.clone());
        }
        let mut candidates: Vec<ErrorHandler> = Vec::new();
        if let Some(handler) = action_handler {
            candidates.push(handler.clone());
        }
        for frame in channel.cursor.iter().rev() {
            if let Frame::Actions { on_error: Some(handler), .. } = frame {
                candidates.push(handler.clone());
            }
        }
        if let Some(handler) = &self.document.on_error {
            candidates.push(handler.clone());
        }
        for handler in candidates {
            if self.try_handler(&handler, &error, &scope)? {
                return Ok(());
            }
        }
        Err(error)
    }

    /// Runs one `on_error` handler to completion in a child scope seeded
    /// with `_error` and `_error_handled`. Returns whether the handler
    /// opted into continuation.
    fn try_handler(&mut self, handler: &ErrorHandler, error: &RuntimeError, scope: &Scope) -> Result<bool, RuntimeError> {
        let actions = match handler {
            ErrorHandler::Inline(actions) => Rc::clone(actions),
            ErrorHandler::FlowRef(name) => Rc::clone(&self.document.flows[name].actions),
        };
        let handler_scope = scope.create_child();
        handler_scope.set_local("_error", error_to_value(error));
        handler_scope.set_local("_error_handled", Value::Bool(false));
        self.run_to_completion(&actions, &handler_scope)?;
        Ok(matches!(handler_scope.get("_error_handled"), Value::Bool(true)))
    }

    /// A plain recursive interpreter used only for `on_error` bodies, which
    /// the spec does not require to be suspendable: an error handler runs
    /// to completion within the tick that raised the error.
    fn run_to_completion(&mut self, actions: &[Action], scope: &Scope) -> Result<(), RuntimeError> {
        for action in actions {
            let result = self.run_action_synchronously(action, scope);
            if let Err(err) = result {
                if let Some(handler) = &action.on_error {
                    let handler = handler.clone();
                    if self.try_handler(&handler, &err, scope)? {
                        continue;
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }

    fn run_action_synchronously(&mut self, action: &Action, scope: &Scope) -> Result<(), RuntimeError> {
        match &action.kind {
            ActionKind::Set { variable, value, mode } => {
                let v = self.eval(scope, value)?;
                match mode {
                    WriteMode::Set => scope.set(variable, v),
                    WriteMode::SetLocal => scope.set_local(variable, v),
                    WriteMode::SetGlobal => scope.set_global(variable, v),
                }
                Ok(())
            }
            ActionKind::Call { flow } => {
                let actions = Rc::clone(&self.document.flows[flow].actions);
                self.run_to_completion(&actions, &scope.create_child())
            }
            ActionKind::Goto { flow } => {
                let actions = Rc::clone(&self.document.flows[flow].actions);
                self.run_to_completion(&actions, scope)
            }
            ActionKind::Cond { branches, else_branch } => {
                for branch in branches {
                    let cond = self.eval(scope, &branch.when)?;
                    if cond.is_truthy() {
                        return self.run_to_completion(&branch.then.clone(), &scope.create_child());
                    }
                }
                if let Some(else_branch) = else_branch {
                    self.run_to_completion(&else_branch.clone(), &scope.create_child())
                } else {
                    Ok(())
                }
            }
            ActionKind::ForEach { variable, collection, body } => {
                let collection = self.eval(scope, collection)?;
                let items = match collection {
                    Value::Seq(items) => items.as_ref().clone(),
                    Value::Null => Vec::new(),
                    other => {
                        return Err(RuntimeError::new(
                            ErrorKind::Expression,
                            format!("for_each requires a sequence, found {}", other.type_name()),
                        ));
                    }
                };
                for item in items {
                    let child = scope.create_child();
                    child.set_local(variable, item);
                    self.run_to_completion(&body.clone(), &child)?;
                }
                Ok(())
            }
            ActionKind::Repeat { count, body } => {
                let count = self.eval(scope, count)?;
                let count = match count {
                    Value::Int(i) => i.max(0),
                    Value::Float(f) => (f as i64).max(0),
                    other => {
                        return Err(RuntimeError::new(
                            ErrorKind::Expression,
                            format!("repeat count must be numeric, found {}", other.type_name()),
                        ));
                    }
                };
                for _ in 0..count {
                    self.run_to_completion(&body.clone(), &scope.create_child())?;
                }
                Ok(())
            }
            ActionKind::Log { message, level } => {
                let rendered = template::render(&self.cache, &self.config.functions, scope, message)?;
                self.config.log.log(*level, &rendered.display_string());
                Ok(())
            }
            ActionKind::Emit { signal } => {
                let rendered = template::render(&self.cache, &self.config.functions, scope, signal)?;
                self.scheduler.record_signal("<error-handler>", &rendered.display_string());
                Ok(())
            }
            ActionKind::WaitFor(_) => {
                self.config.log.log(LogLevel::Warn, "wait_for inside an on_error handler is not suspendable; skipping");
                Ok(())
            }
            ActionKind::Domain { name, payload } => {
                if let HandlerOutcome::YieldWait(_) = self.config.handlers.dispatch(name, payload, scope)? {
                    self.config.log.log(LogLevel::Warn, "a handler's YieldWait inside an on_error handler is not suspendable; skipping");
                }
                Ok(())
            }
        }
    }

    /// Runs the escalation chain exactly once for a channel-level failure
    /// (a timeout, a deadlock, or a propagated action error, whose own
    /// inline handler is `action_handler` if any); if no handler opts into
    /// continuation the channel itself is marked `Errored`. Returns whether
    /// some handler in the chain handled it.
    fn fail_channel(&mut self, channel: &mut ChannelState, error: RuntimeError, action_handler: Option<&ErrorHandler>) -> bool {
        match self.escalate(error, action_handler, channel) {
            Ok(()) => true,
            Err(err) => {
                channel.status = ChannelStatus::Errored(err);
                false
            }
        }
    }
}

enum Wake {
    Run,
    TimedOut,
    StillWaiting,
}

/// Walks a channel's frame stack from outermost to innermost, recording one
/// `StackFrame` per named flow (a `cond` branch or loop-iteration body isn't
/// itself a flow, so it contributes none). Each frame's `action_index`
/// points at the action currently suspended mid-dispatch — the cursor's
/// `index` has already advanced past it, hence the `- 1`.
fn build_stack(channel: &ChannelState) -> Vec<StackFrame> {
    channel
        .cursor
        .iter()
        .filter_map(|frame| match frame {
            Frame::Actions { flow: Some(name), index, .. } => {
                Some(StackFrame { flow: name.clone(), action_index: index.saturating_sub(1) })
            }
            _ => None,
        })
        .collect()
}

fn error_to_value(error: &RuntimeError) -> Value {
    let mut map = IndexMap::new();
    map.insert("kind".to_owned(), Value::str(error.kind.to_string()));
    map.insert("message".to_owned(), Value::str(error.message.clone()));
    map.insert("flow".to_owned(), error.flow.clone().map_or(Value::Null, Value::str));
    map.insert("action".to_owned(), error.action.clone().map_or(Value::Null, Value::str));
    map.insert(
        "stack".to_owned(),
        Value::seq(error.stack.iter().map(|frame| Value::str(frame.to_string())).collect()),
    );
    Value::map(map)
}
