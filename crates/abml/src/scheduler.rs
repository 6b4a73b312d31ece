//! Cooperative multi-channel scheduler (spec.md §5).
//!
//! Each document channel runs as an independent resumable frame stack
//! rather than a native thread — the runtime stays single-threaded, and
//! "concurrency" means interleaving progress across channels tick by tick.
//! A channel suspends at a `wait_for` action; the scheduler wakes it once
//! the signals it's waiting on have all been durably emitted (the signal
//! log is never edge-triggered: a signal emitted before the `wait_for` was
//! even reached still satisfies it). If a full tick produces no progress at
//! all while channels remain suspended, that's a deadlock.

use std::collections::HashSet;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::document::{Action, ErrorHandler, WaitKind, WaitSpec};
use crate::error::RuntimeError;
use crate::scope::Scope;

/// One entry in the durable signal log (spec.md §5's "signal log").
#[derive(Debug, Clone)]
pub struct Signal {
    pub channel: String,
    pub name: String,
    pub sequence: usize,
}

/// A body of actions currently executing, plus the scope it executes them
/// in. The frame stack (not Rust's call stack) is what makes a channel
/// resumable across scheduler ticks: suspending at a `wait_for` just means
/// stopping mid-loop with the stack intact, no generator or thread needed.
pub(crate) enum Frame {
    /// `on_error` is the handler belonging to the flow/channel this body is
    /// the top of (`None` for a `cond` branch body, which has no handler of
    /// its own and simply inherits escalation from its enclosing frame).
    /// `flow` names the flow this body belongs to for `_error.stack`
    /// purposes (spec.md §4.6); `None` for an anonymous body (a `cond`
    /// branch, a `for_each`/`repeat` iteration) that isn't itself a flow.
    Actions { actions: Rc<Vec<Action>>, index: usize, scope: Scope, on_error: Option<ErrorHandler>, flow: Option<String> },
    ForEach { items: Rc<Vec<crate::value::Value>>, variable: String, index: usize, body: Rc<Vec<Action>>, scope: Scope },
    Repeat { remaining: u64, body: Rc<Vec<Action>>, scope: Scope },
}

impl Frame {
    pub(crate) fn scope(&self) -> &Scope {
        match self {
            Self::Actions { scope, .. } | Self::ForEach { scope, .. } | Self::Repeat { scope, .. } => scope,
        }
    }
}

#[derive(Debug)]
pub(crate) enum ChannelStatus {
    Running,
    Waiting { spec: WaitSpec, started: Instant },
    Done,
    Errored(RuntimeError),
}

pub(crate) struct ChannelState {
    pub name: String,
    pub cursor: Vec<Frame>,
    pub status: ChannelStatus,
}

impl ChannelState {
    pub(crate) fn new(name: String, actions: Rc<Vec<Action>>, on_error: Option<ErrorHandler>, scope: Scope) -> Self {
        let flow = Some(name.clone());
        Self { name, cursor: vec![Frame::Actions { actions, index: 0, scope, on_error, flow }], status: ChannelStatus::Running }
    }

    /// An inert placeholder used only to swap a real channel out of the
    /// scheduler's vector while it's being stepped (see
    /// `DocumentExecutor::step_one`), and back in afterward.
    pub(crate) fn placeholder() -> Self {
        Self { name: String::new(), cursor: Vec::new(), status: ChannelStatus::Done }
    }

    pub(crate) fn is_finished(&self) -> bool {
        matches!(self.status, ChannelStatus::Done | ChannelStatus::Errored(_))
    }
}

/// Owns every channel's state and the durable signal log; has no knowledge
/// of how a channel's actions actually execute (that's
/// [`crate::executor::DocumentExecutor`]'s job) beyond bookkeeping.
///
/// Signals are namespaced per channel (spec.md §5: a `Signal` is the pair
/// `(channel-name, signal-name)`), so the same bare signal name emitted by
/// two different channels are two distinct signals.
#[derive(Default)]
pub(crate) struct Scheduler {
    pub channels: Vec<ChannelState>,
    emitted: HashSet<(String, String)>,
    pub log: Vec<Signal>,
}

impl Scheduler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_signal(&mut self, channel: &str, name: &str) {
        self.emitted.insert((channel.to_owned(), name.to_owned()));
        self.log.push(Signal { channel: channel.to_owned(), name: name.to_owned(), sequence: self.log.len() });
    }

    /// `current_channel` resolves bare signal names (spec.md §6: "a bare
    /// signal name refers to the current channel's namespace"); a name of
    /// the form `@channel.signal` names another channel's namespace
    /// explicitly and ignores `current_channel` entirely.
    pub(crate) fn wait_satisfied(&self, spec: &WaitSpec, current_channel: &str) -> bool {
        let satisfied = |raw: &str| {
            let (channel, name) = resolve_signal_ref(raw, current_channel);
            self.emitted.contains(&(channel.to_owned(), name.to_owned()))
        };
        match &spec.kind {
            WaitKind::AllOf(names) => names.iter().all(|n| satisfied(n)),
            WaitKind::AnyOf(names) => names.iter().any(|n| satisfied(n)),
        }
    }

    pub(crate) fn all_finished(&self) -> bool {
        self.channels.iter().all(ChannelState::is_finished)
    }

    pub(crate) fn timed_out(&self, started: Instant, timeout: Option<f64>, now: Instant) -> bool {
        match timeout {
            Some(seconds) => now.duration_since(started) >= Duration::from_secs_f64(seconds.max(0.0)),
            None => false,
        }
    }
}

/// Splits a signal reference into its `(channel, signal)` pair: `@channel.signal`
/// names another channel explicitly, anything else is a bare name scoped to
/// `current_channel`.
fn resolve_signal_ref<'a>(raw: &'a str, current_channel: &'a str) -> (&'a str, &'a str) {
    if let Some(rest) = raw.strip_prefix('@') {
        if let Some((channel, name)) = rest.split_once('.') {
            return (channel, name);
        }
    }
    (current_channel, raw)
}
