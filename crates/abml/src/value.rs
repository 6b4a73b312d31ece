//! The runtime's dynamic value type.
//!
//! A [`Value`] is the scalar/composite union that flows through the
//! expression VM, the variable scope chain, and the document executor. Small
//! scalars are stored inline; sequences, mappings, and strings are
//! reference-counted so that cloning a [`Value`] (which happens constantly —
//! every scope read clones) is cheap and copy-on-write is unnecessary, since
//! nothing in this language mutates a sequence or mapping in place. Host
//! objects are an opaque extension point (`§4.5`-adjacent): the runtime never
//! matches on their concrete type, only through the [`HostObject`] protocol.

use std::{cmp::Ordering, fmt, rc::Rc};

use indexmap::IndexMap;

use crate::error::{ErrorKind, RuntimeError};

/// Protocol a host-defined opaque object exposes to expressions.
///
/// Implementations are never introspected beyond these two methods: the
/// runtime treats every host object as a black box with a property and index
/// namespace, matching spec.md §3's "opaque host object (carries an optional
/// property/index protocol)".
pub trait HostObject: fmt::Debug {
    /// A short name used in error messages and tracing output.
    fn type_name(&self) -> &str;

    /// Resolves `a.name`. Returns `None` if the host object has no such
    /// property (which the caller treats the same as a missing-key mapping
    /// lookup: null, not an error).
    fn get_prop(&self, name: &str) -> Option<Value> {
        let _ = name;
        None
    }

    /// Resolves `a[index]`.
    fn get_index(&self, index: &Value) -> Option<Value> {
        let _ = index;
        None
    }
}

/// The runtime's dynamic scalar/composite value.
///
/// `Clone` is cheap: scalars are `Copy`-sized, and `Str`/`Seq`/`Map`/`Host`
/// share their backing allocation via `Rc`. There is no interior mutability
/// anywhere in `Value` itself — mutation always happens by replacing a
/// binding in a [`crate::scope::Scope`], never by mutating a `Value` in
/// place, so there is no aliasing hazard from the shared `Rc`s.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Seq(Rc<Vec<Value>>),
    Map(Rc<IndexMap<String, Value>>),
    Host(Rc<dyn HostObject>),
}

impl Value {
    #[must_use]
    pub fn str(s: impl Into<Rc<str>>) -> Self {
        Self::Str(s.into())
    }

    #[must_use]
    pub fn seq(items: Vec<Value>) -> Self {
        Self::Seq(Rc::new(items))
    }

    #[must_use]
    pub fn map(entries: IndexMap<String, Value>) -> Self {
        Self::Map(Rc::new(entries))
    }

    /// Truthiness rule from spec.md §3: null, false, numeric zero, empty
    /// string, and empty sequence/mapping are falsy; everything else
    /// (including host objects) is truthy.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::Seq(s) => !s.is_empty(),
            Self::Map(m) => !m.is_empty(),
            Self::Host(_) => true,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::Seq(_) => "sequence",
            Self::Map(_) => "mapping",
            Self::Host(h) => {
                // type_name() borrows from the Rc; leak-free because the
                // caller only needs it for the duration of this match arm in
                // practice, but we can't return a borrowed str here, so host
                // objects report through their own Debug form at call sites
                // that need the live name.
                let _ = h;
                "object"
            }
        }
    }

    /// The unquoted string form used for `+`-concatenation and `${...}`
    /// interpolation (spec.md §6). Not the same as [`Value::trace_repr`],
    /// which is used only by the VM's tracing mode.
    #[must_use]
    pub fn display_string(&self) -> String {
        match self {
            Self::Null => "null".to_owned(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => format_float(*f),
            Self::Str(s) => s.to_string(),
            Self::Seq(items) => {
                let parts: Vec<String> = items.iter().map(Value::display_string).collect();
                format!("[{}]", parts.join(", "))
            }
            Self::Map(entries) => {
                let parts: Vec<String> =
                    entries.iter().map(|(k, v)| format!("{k}: {}", v.display_string())).collect();
                format!("{{{}}}", parts.join(", "))
            }
            Self::Host(h) => format!("<{}>", h.type_name()),
        }
    }

    /// Quoted/typed form used by the VM's tracing mode (spec.md §4.3): strings
    /// are quoted, booleans lowercased, null rendered as `null`, everything
    /// else via its default string form.
    #[must_use]
    pub fn trace_repr(&self) -> String {
        match self {
            Self::Str(s) => format!("{s:?}"),
            Self::Bool(b) => b.to_string(),
            _ => self.display_string(),
        }
    }

    /// Looks up a property by name (`a.b` / `a?.b`). Mapping keys and
    /// sequence/host properties are all resolved here; the VM decides whether
    /// a null receiver is a hard error (`GetProp`) or yields null
    /// (`GetPropSafe`).
    pub fn get_prop(&self, name: &str) -> Result<Value, RuntimeError> {
        match self {
            Self::Map(entries) => Ok(entries.get(name).cloned().unwrap_or(Value::Null)),
            Self::Host(h) => Ok(h.get_prop(name).unwrap_or(Value::Null)),
            other => Err(RuntimeError::new(
                ErrorKind::Expression,
                format!("cannot access property '{name}' on {}", other.type_name()),
            )),
        }
    }

    /// Looks up an index (`a[b]` / `a?[b]`). Sequences accept integer
    /// indices (out-of-range yields null, per spec.md §4.1); mappings accept
    /// string indices (missing key yields null).
    pub fn get_index(&self, index: &Value) -> Result<Value, RuntimeError> {
        match (self, index) {
            (Self::Seq(items), Self::Int(i)) => {
                let idx = if *i < 0 { items.len() as i64 + i } else { *i };
                if idx < 0 {
                    return Ok(Value::Null);
                }
                Ok(items.get(idx as usize).cloned().unwrap_or(Value::Null))
            }
            (Self::Map(entries), Self::Str(key)) => Ok(entries.get(key.as_ref()).cloned().unwrap_or(Value::Null)),
            (Self::Str(s), Self::Int(i)) => {
                let idx = if *i < 0 { s.chars().count() as i64 + i } else { *i };
                if idx < 0 {
                    return Ok(Value::Null);
                }
                Ok(s.chars().nth(idx as usize).map(|c| Value::str(c.to_string())).unwrap_or(Value::Null))
            }
            (Self::Host(h), idx) => Ok(h.get_index(idx).unwrap_or(Value::Null)),
            (other, idx) => Err(RuntimeError::new(
                ErrorKind::Expression,
                format!("cannot index {} with {}", other.type_name(), idx.type_name()),
            )),
        }
    }
}

fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.is_finite() && f.abs() < 1e15 {
        format!("{f:.1}")
    } else {
        f.to_string()
    }
}

/// Strict equality (`==`/`!=`). Never errors (spec.md §4.3: "Eq/Ne tolerate
/// any two values"). Null equals only null. Numeric types widen across
/// int/float. Sequences and mappings compare structurally. Any other
/// cross-type pairing (e.g. string vs. int) is simply unequal.
#[must_use]
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => (*x as f64) == *y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Seq(x), Value::Seq(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(l, r)| values_equal(l, r))
        }
        (Value::Map(x), Value::Map(y)) => {
            x.len() == y.len() && x.iter().all(|(k, v)| y.get(k).is_some_and(|rv| values_equal(v, rv)))
        }
        _ => false,
    }
}

/// Ordered comparison for `<`/`<=`/`>`/`>=`. Null sorts below every non-null
/// value to keep a total order available (spec.md §4.3 / Design Notes open
/// question); comparing two non-null values of incomparable types is a
/// runtime error.
pub fn compare_values(a: &Value, b: &Value) -> Result<Ordering, RuntimeError> {
    match (a, b) {
        (Value::Null, Value::Null) => Ok(Ordering::Equal),
        (Value::Null, _) => Ok(Ordering::Less),
        (_, Value::Null) => Ok(Ordering::Greater),
        (Value::Int(x), Value::Int(y)) => Ok(x.cmp(y)),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y).ok_or_else(nan_error),
        (Value::Int(x), Value::Float(y)) => (*x as f64).partial_cmp(y).ok_or_else(nan_error),
        (Value::Float(x), Value::Int(y)) => x.partial_cmp(&(*y as f64)).ok_or_else(nan_error),
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        (other_a, other_b) => Err(RuntimeError::new(
            ErrorKind::Expression,
            format!("cannot compare {} and {}", other_a.type_name(), other_b.type_name()),
        )),
    }
}

fn nan_error() -> RuntimeError {
    RuntimeError::new(ErrorKind::Expression, "cannot compare NaN".to_owned())
}

/// Membership test for `in` (spec.md §4.3's `In` opcode): substring for
/// strings, element for sequences, key presence for mappings.
pub fn value_contains(needle: &Value, haystack: &Value) -> Result<bool, RuntimeError> {
    match haystack {
        Value::Str(s) => match needle {
            Value::Str(n) => Ok(s.contains(n.as_ref())),
            _ => Err(RuntimeError::new(
                ErrorKind::Expression,
                "'in' on a string requires a string operand".to_owned(),
            )),
        },
        Value::Seq(items) => Ok(items.iter().any(|item| values_equal(item, needle))),
        Value::Map(entries) => match needle {
            Value::Str(key) => Ok(entries.contains_key(key.as_ref())),
            _ => Err(RuntimeError::new(
                ErrorKind::Expression,
                "'in' on a mapping requires a string key".to_owned(),
            )),
        },
        other => Err(RuntimeError::new(
            ErrorKind::Expression,
            format!("'in' is not supported on {}", other.type_name()),
        )),
    }
}

/// Widens a pair of numeric operands per spec.md §4.3: int/int stays int,
/// any float involvement promotes both to float.
pub(crate) fn widen_numeric(a: &Value, b: &Value) -> Result<NumericPair, RuntimeError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(NumericPair::Int(*x, *y)),
        (Value::Int(x), Value::Float(y)) => Ok(NumericPair::Float(*x as f64, *y)),
        (Value::Float(x), Value::Int(y)) => Ok(NumericPair::Float(*x, *y as f64)),
        (Value::Float(x), Value::Float(y)) => Ok(NumericPair::Float(*x, *y)),
        (other_a, other_b) => Err(RuntimeError::new(
            ErrorKind::Expression,
            format!("unsupported operand types: {} and {}", other_a.type_name(), other_b.type_name()),
        )),
    }
}

pub(crate) enum NumericPair {
    Int(i64, i64),
    Float(f64, f64),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_string())
    }
}
