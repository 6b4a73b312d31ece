//! Shared test scaffolding: a `probe` domain action that records a named
//! variable's value at the point it runs, so integration tests can observe
//! scope state without the VM/compiler internals being public.

use std::cell::RefCell;
use std::rc::Rc;

use abml::{ExecutorConfig, HandlerOutcome, LogLevel, LogSink, Scope, Value};
use serde::Deserialize;

/// A `LogSink` that appends into a shared buffer instead of stdout, so a
/// test can assert on emitted log lines after the run (`CollectLog` is
/// owned outright by the executor, with no way to read it back afterward).
struct SharedLog(Rc<RefCell<Vec<String>>>);

impl LogSink for SharedLog {
    fn log(&mut self, _level: LogLevel, message: &str) {
        self.0.borrow_mut().push(message.to_owned());
    }
}

#[derive(Deserialize)]
struct ProbeParams {
    var: String,
}

#[derive(Deserialize)]
struct SeedParams {
    var: String,
    values: Vec<i64>,
}

/// An `ExecutorConfig` with a `probe` domain action registered: each
/// `{action: probe, var: <name>}` appends `scope.get(<name>)` to the
/// returned recorder, in execution order.
///
/// Also registers `seed`, `{action: seed, var: <name>, values: [...]}`,
/// which binds `<name>` to an integer sequence — the expression grammar has
/// no array-literal syntax, so tests that need a `Value::Seq` to iterate
/// over inject one the way a host action would.
pub fn config_with_probe() -> (ExecutorConfig, Rc<RefCell<Vec<Value>>>) {
    let recorder: Rc<RefCell<Vec<Value>>> = Rc::new(RefCell::new(Vec::new()));
    let capture = Rc::clone(&recorder);
    let mut config = ExecutorConfig::default();
    config
        .handlers
        .register("probe", move |payload: &serde_yaml::Mapping, scope: &Scope| {
            let params: ProbeParams = serde_yaml::from_value(serde_yaml::Value::Mapping(payload.clone()))
                .expect("probe action requires a 'var' field");
            capture.borrow_mut().push(scope.get(&params.var));
            Ok(HandlerOutcome::Continue)
        })
        .expect("'probe' is not a reserved action name");
    config
        .handlers
        .register("seed", |payload: &serde_yaml::Mapping, scope: &Scope| {
            let params: SeedParams = serde_yaml::from_value(serde_yaml::Value::Mapping(payload.clone()))
                .expect("seed action requires 'var' and 'values' fields");
            let items = params.values.into_iter().map(Value::Int).collect();
            scope.set(&params.var, Value::seq(items));
            Ok(HandlerOutcome::Continue)
        })
        .expect("'seed' is not a reserved action name");
    (config, recorder)
}

/// An `ExecutorConfig` whose log output is captured into a shared buffer
/// instead of going to stdout, for tests that assert on how many times (and
/// what) a handler logs.
pub fn config_with_log() -> (ExecutorConfig, Rc<RefCell<Vec<String>>>) {
    let lines: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let mut config = ExecutorConfig::default();
    config.log = Box::new(SharedLog(Rc::clone(&lines)));
    (config, lines)
}
