//! The default expression function registry (spec.md §4.1's `name(args...)`
//! call form names no built-in functions; this is the runtime's supplied
//! default set, analogous to the small pure-function builtin modules the
//! teacher's interpreter ships alongside its bytecode VM).
//!
//! Hosts embedding the runtime can install additional functions or shadow
//! these via [`FunctionRegistry::register`]; nothing here is reserved.

use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{ErrorKind, RuntimeError};
use crate::value::{Value, compare_values, value_contains};

pub(crate) type ExprFn = Rc<dyn Fn(&[Value]) -> Result<Value, RuntimeError>>;

pub struct FunctionRegistry {
    functions: HashMap<String, ExprFn>,
}

impl FunctionRegistry {
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self { functions: HashMap::new() };
        registry.install_defaults();
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, f: impl Fn(&[Value]) -> Result<Value, RuntimeError> + 'static) {
        self.functions.insert(name.into(), Rc::new(f));
    }

    pub(crate) fn call(&self, name: &str, args: &[Value]) -> Result<Value, RuntimeError> {
        match self.functions.get(name) {
            Some(f) => f(args),
            None => Err(RuntimeError::new(ErrorKind::Expression, format!("unknown function '{name}'"))),
        }
    }

    fn install_defaults(&mut self) {
        self.register("len", |args| {
            let v = one_arg("len", args)?;
            match v {
                Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
                Value::Seq(items) => Ok(Value::Int(items.len() as i64)),
                Value::Map(entries) => Ok(Value::Int(entries.len() as i64)),
                other => Err(wrong_type("len", other)),
            }
        });
        self.register("upper", |args| Ok(Value::str(one_str("upper", args)?.to_uppercase())));
        self.register("lower", |args| Ok(Value::str(one_str("lower", args)?.to_lowercase())));
        self.register("abs", |args| match one_arg("abs", args)? {
            Value::Int(i) => Ok(Value::Int(i.abs())),
            Value::Float(f) => Ok(Value::Float(f.abs())),
            other => Err(wrong_type("abs", other)),
        });
        self.register("round", |args| match one_arg("round", args)? {
            Value::Int(i) => Ok(Value::Int(*i)),
            Value::Float(f) => Ok(Value::Int(f.round() as i64)),
            other => Err(wrong_type("round", other)),
        });
        self.register("min", |args| fold_comparable("min", args, std::cmp::Ordering::Less));
        self.register("max", |args| fold_comparable("max", args, std::cmp::Ordering::Greater));
        self.register("str", |args| Ok(Value::str(one_arg("str", args)?.display_string())));
        self.register("int", |args| match one_arg("int", args)? {
            Value::Int(i) => Ok(Value::Int(*i)),
            Value::Float(f) => Ok(Value::Int(*f as i64)),
            Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
            Value::Str(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| RuntimeError::new(ErrorKind::Expression, format!("cannot convert '{s}' to int"))),
            other => Err(wrong_type("int", other)),
        });
        self.register("float", |args| match one_arg("float", args)? {
            Value::Int(i) => Ok(Value::Float(*i as f64)),
            Value::Float(f) => Ok(Value::Float(*f)),
            Value::Str(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| RuntimeError::new(ErrorKind::Expression, format!("cannot convert '{s}' to float"))),
            other => Err(wrong_type("float", other)),
        });
        self.register("bool", |args| Ok(Value::Bool(one_arg("bool", args)?.is_truthy())));
        self.register("type", |args| Ok(Value::str(one_arg("type", args)?.type_name())));
        self.register("contains", |args| {
            let (haystack, needle) = two_args("contains", args)?;
            value_contains(needle, haystack).map(Value::Bool)
        });
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn one_arg<'a>(name: &str, args: &'a [Value]) -> Result<&'a Value, RuntimeError> {
    args.first().ok_or_else(|| RuntimeError::new(ErrorKind::Expression, format!("{name}() takes exactly one argument")))
}

fn two_args(name: &str, args: &[Value]) -> Result<(&Value, &Value), RuntimeError> {
    if args.len() != 2 {
        return Err(RuntimeError::new(ErrorKind::Expression, format!("{name}() takes exactly two arguments")));
    }
    Ok((&args[0], &args[1]))
}

fn one_str<'a>(name: &str, args: &'a [Value]) -> Result<&'a str, RuntimeError> {
    match one_arg(name, args)? {
        Value::Str(s) => Ok(s.as_ref()),
        other => Err(wrong_type(name, other)),
    }
}

fn wrong_type(name: &str, value: &Value) -> RuntimeError {
    RuntimeError::new(ErrorKind::Expression, format!("{name}() does not accept {}", value.type_name()))
}

fn fold_comparable(name: &str, args: &[Value], keep_if: std::cmp::Ordering) -> Result<Value, RuntimeError> {
    if args.is_empty() {
        return Err(RuntimeError::new(ErrorKind::Expression, format!("{name}() takes at least one argument")));
    }
    let mut best = args[0].clone();
    for candidate in &args[1..] {
        if compare_values(candidate, &best)? == keep_if {
            best = candidate.clone();
        }
    }
    Ok(best)
}
