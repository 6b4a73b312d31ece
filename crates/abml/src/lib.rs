#![doc = include_str!("../../../README.md")]

mod clock;
mod document;
mod error;
mod executor;
mod expr;
mod functions;
mod handler;
mod log;
mod scheduler;
mod scope;
mod template;
mod value;
mod vm;

pub use clock::{Clock, ManualClock, SystemClock};
pub use document::{
    Action, ActionKind, Channel, CondBranch, Document, ErrorHandler, Flow, LogLevel, Metadata, WaitKind, WaitSpec,
    WriteMode, RESERVED_ACTION_NAMES,
};
pub use error::{CompileError, DocumentError, ErrorKind, RuntimeError, SourcePos, StackFrame};
pub use executor::{DocumentExecutor, ExecutorConfig, RunReport};
pub use functions::FunctionRegistry;
pub use handler::{ActionHandler, HandlerOutcome, HandlerRegistry};
pub use log::{CollectLog, LogSink, StdLog};
pub use scope::Scope;
pub use value::{HostObject, Value};
pub use vm::{TraceEvent, Vm};

/// Parses `source` as an ABML document and runs it to completion (or
/// deadlock, or the configured tick ceiling) using `config`.
///
/// A convenience facade over [`Document::from_yaml`] and
/// [`DocumentExecutor::new`]/[`DocumentExecutor::run`] for callers that have
/// no need to hold on to the parsed [`Document`] afterward.
pub fn run_document(source: &str, config: ExecutorConfig) -> Result<RunReport, DocumentError> {
    let document = Document::from_yaml(source)?;
    let mut executor = DocumentExecutor::new(document, config);
    Ok(executor.run())
}
