//! Error types shared across the compiler, VM, and document executor.
//!
//! Like the teacher's `repl_error.rs`/`resource.rs`, errors here are plain
//! enums with hand-written `Display` and `std::error::Error` impls — no
//! `thiserror`/`anyhow`. Each pipeline stage gets its own error type and a
//! `From` conversion into the next stage's.

use std::fmt;

/// Classification of a runtime error, per spec.md §7. `Compile` is
/// deliberately not a variant here: a failed compilation always surfaces to
/// the `on_error` chain as `Expression` (spec.md §7: "propagates as
/// expression"); `CompileError` carries its own identity for diagnostics
/// before that translation happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Expression,
    MissingVariable,
    UnknownAction,
    GotoTarget,
    SchedulerDeadlock,
    Timeout,
    Cancelled,
}

/// One frame of the active call stack at the time a `RuntimeError` was
/// raised, used to populate `_error.stack` (spec.md §4.6).
#[derive(Debug, Clone)]
pub struct StackFrame {
    pub flow: String,
    pub action_index: usize,
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.flow, self.action_index)
    }
}

/// An error raised while evaluating an expression or dispatching an action.
///
/// Carries enough context (`flow`, `action`, `stack`) to populate the
/// `_error` binding the executor writes into scope before running the
/// `on_error` chain (spec.md §4.6).
#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub message: String,
    pub flow: Option<String>,
    pub action: Option<String>,
    pub stack: Vec<StackFrame>,
}

impl RuntimeError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            flow: None,
            action: None,
            stack: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_flow(mut self, flow: impl Into<String>) -> Self {
        self.flow = Some(flow.into());
        self
    }

    #[must_use]
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    #[must_use]
    pub fn with_stack(mut self, stack: Vec<StackFrame>) -> Self {
        self.stack = stack;
        self
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(flow) = &self.flow {
            write!(f, " (flow: {flow}")?;
            if let Some(action) = &self.action {
                write!(f, ", action: {action}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

/// Position in expression source text, used by [`CompileError`] for
/// diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourcePos {
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for SourcePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Failure during lexing, parsing, or register allocation (spec.md §4.1).
/// Fatal to the single expression being compiled; the surrounding document
/// is unaffected.
#[derive(Debug, Clone)]
pub enum CompileError {
    Lex { message: String, pos: SourcePos },
    Parse { message: String, pos: SourcePos },
    TooManyRegisters { pos: SourcePos },
    TooManyConstants { pos: SourcePos },
}

impl CompileError {
    #[must_use]
    pub fn pos(&self) -> SourcePos {
        match self {
            Self::Lex { pos, .. } | Self::Parse { pos, .. } | Self::TooManyRegisters { pos } | Self::TooManyConstants { pos } => {
                *pos
            }
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lex { message, pos } => write!(f, "lex error at {pos}: {message}"),
            Self::Parse { message, pos } => write!(f, "parse error at {pos}: {message}"),
            Self::TooManyRegisters { pos } => write!(f, "expression too complex at {pos}: exceeds 256 live registers"),
            Self::TooManyConstants { pos } => write!(f, "expression too complex at {pos}: exceeds 256 constants"),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<CompileError> for RuntimeError {
    /// A failed compilation always surfaces as an `Expression` kind error
    /// (spec.md §7: "compile ... propagates as expression").
    fn from(error: CompileError) -> Self {
        RuntimeError::new(ErrorKind::Expression, error.to_string())
    }
}

/// Failure while loading a document: malformed YAML, or a structural
/// reference (a `goto`/`call`/error-handler flow name) that does not
/// resolve. Detected before any execution begins, so it carries no
/// flow/action/stack context.
#[derive(Debug, Clone)]
pub enum DocumentError {
    Yaml(String),
    Schema(String),
    UnknownFlow(String),
    ReservedActionName(String),
    MissingEntryFlow,
}

impl fmt::Display for DocumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Yaml(message) => write!(f, "invalid YAML: {message}"),
            Self::Schema(message) => write!(f, "invalid document: {message}"),
            Self::UnknownFlow(name) => write!(f, "reference to unknown flow '{name}'"),
            Self::ReservedActionName(name) => {
                write!(f, "'{name}' is a reserved built-in action name and cannot be used as a domain action")
            }
            Self::MissingEntryFlow => {
                write!(f, "a document with no channels must declare a flow named 'main' to run directly")
            }
        }
    }
}

impl std::error::Error for DocumentError {}

impl From<serde_yaml::Error> for DocumentError {
    fn from(error: serde_yaml::Error) -> Self {
        Self::Yaml(error.to_string())
    }
}
