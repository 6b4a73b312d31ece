//! Register-based bytecode VM (spec.md §4.2–§4.3).
//!
//! Executes a [`CompiledExpression`] against a fixed register file and a
//! [`Scope`]. There is no call stack inside the VM itself — function calls
//! (`name(args...)`) dispatch straight into a [`FunctionRegistry`] entry and
//! return a value in one step, they never re-enter the instruction loop.

use std::fmt;
use std::rc::Rc;

use crate::document::LogLevel;
use crate::error::{ErrorKind, RuntimeError};
use crate::expr::{CompiledExpression, ExpressionCache, Instruction, Opcode};
use crate::functions::FunctionRegistry;
use crate::log::LogSink;
use crate::scope::Scope;
use crate::value::{Value, compare_values, value_contains, values_equal, widen_numeric};
use crate::value::NumericPair;

/// Evaluates a source expression against `scope`, compiling (and caching)
/// it first. The entry point everything outside the VM goes through.
pub(crate) fn eval(cache: &ExpressionCache, functions: &FunctionRegistry, scope: &Scope, source: &str) -> Result<Value, RuntimeError> {
    let compiled = cache.get_or_compile(source)?;
    run(&compiled, functions, scope, None)
}

/// One retired instruction, as emitted by [`Vm::execute_traced`].
#[derive(Debug, Clone)]
pub struct TraceEvent {
    pub opcode: String,
    pub register: u8,
    pub value: String,
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} r{} = {}", self.opcode, self.register, self.value)
    }
}

/// The VM's tracing entry point (spec.md §4.3's "Tracing mode"): evaluates
/// `source` exactly like [`eval`], but every retired instruction is written
/// through `log` as a [`TraceEvent`] — a trace is log output, not a value a
/// caller collects and inspects separately.
pub struct Vm;

impl Vm {
    pub fn execute_traced(
        cache: &ExpressionCache,
        functions: &FunctionRegistry,
        scope: &Scope,
        source: &str,
        log: &mut dyn LogSink,
    ) -> Result<Value, RuntimeError> {
        let compiled = cache.get_or_compile(source)?;
        let mut events = Vec::new();
        let result = run(&compiled, functions, scope, Some(&mut events));
        for event in &events {
            log.log(LogLevel::Debug, &event.to_string());
        }
        result
    }
}

fn run(compiled: &CompiledExpression, functions: &FunctionRegistry, scope: &Scope, mut trace: Option<&mut Vec<TraceEvent>>) -> Result<Value, RuntimeError> {
    let mut registers = vec![Value::Null; compiled.register_count as usize];
    let instructions = &compiled.instructions;
    let constants = &compiled.constants;
    let mut pc: usize = 0;

    loop {
        let instr = instructions[pc];
        match instr.opcode {
            Opcode::LoadConst => {
                registers[instr.a as usize] = constants[instr.b as usize].clone();
                pc += 1;
            }
            Opcode::LoadVar => {
                let name = expect_str(&constants[instr.b as usize]);
                registers[instr.a as usize] = scope.get(name);
                pc += 1;
            }
            Opcode::LoadNull => {
                registers[instr.a as usize] = Value::Null;
                pc += 1;
            }
            Opcode::LoadTrue => {
                registers[instr.a as usize] = Value::Bool(true);
                pc += 1;
            }
            Opcode::LoadFalse => {
                registers[instr.a as usize] = Value::Bool(false);
                pc += 1;
            }
            Opcode::GetProp => {
                let receiver = registers[instr.b as usize].clone();
                let name = expect_str(&constants[instr.c as usize]);
                if receiver.is_null() {
                    return Err(null_access_error(instructions, pc, constants, instr.b, name, false));
                }
                registers[instr.a as usize] = receiver.get_prop(name)?;
                pc += 1;
            }
            Opcode::GetPropSafe => {
                let receiver = registers[instr.b as usize].clone();
                let name = expect_str(&constants[instr.c as usize]);
                registers[instr.a as usize] = if receiver.is_null() { Value::Null } else { receiver.get_prop(name)? };
                pc += 1;
            }
            Opcode::GetIndex => {
                let receiver = registers[instr.b as usize].clone();
                let index = registers[instr.c as usize].clone();
                if receiver.is_null() {
                    return Err(null_access_error(instructions, pc, constants, instr.b, "<index>", true));
                }
                registers[instr.a as usize] = receiver.get_index(&index)?;
                pc += 1;
            }
            Opcode::GetIndexSafe => {
                let receiver = registers[instr.b as usize].clone();
                let index = registers[instr.c as usize].clone();
                registers[instr.a as usize] = if receiver.is_null() { Value::Null } else { receiver.get_index(&index)? };
                pc += 1;
            }
            Opcode::Add => {
                let (lhs, rhs) = (&registers[instr.b as usize], &registers[instr.c as usize]);
                registers[instr.a as usize] = if matches!(lhs, Value::Str(_)) || matches!(rhs, Value::Str(_)) {
                    Value::str(format!("{}{}", lhs.display_string(), rhs.display_string()))
                } else {
                    arith(lhs, rhs, |x, y| x.checked_add(y), |x, y| x + y)?
                };
                pc += 1;
            }
            Opcode::Sub => {
                let (lhs, rhs) = (&registers[instr.b as usize], &registers[instr.c as usize]);
                registers[instr.a as usize] = arith(lhs, rhs, |x, y| x.checked_sub(y), |x, y| x - y)?;
                pc += 1;
            }
            Opcode::Mul => {
                let (lhs, rhs) = (&registers[instr.b as usize], &registers[instr.c as usize]);
                registers[instr.a as usize] = arith(lhs, rhs, |x, y| x.checked_mul(y), |x, y| x * y)?;
                pc += 1;
            }
            Opcode::Div => {
                let (lhs, rhs) = (&registers[instr.b as usize], &registers[instr.c as usize]);
                registers[instr.a as usize] = match widen_numeric(lhs, rhs)? {
                    NumericPair::Int(x, y) => {
                        if y == 0 {
                            return Err(RuntimeError::new(ErrorKind::Expression, "division by zero"));
                        }
                        Value::Int(x / y)
                    }
                    NumericPair::Float(x, y) => Value::Float(x / y),
                };
                pc += 1;
            }
            Opcode::Mod => {
                let (lhs, rhs) = (&registers[instr.b as usize], &registers[instr.c as usize]);
                registers[instr.a as usize] = match widen_numeric(lhs, rhs)? {
                    NumericPair::Int(x, y) => {
                        if y == 0 {
                            return Err(RuntimeError::new(ErrorKind::Expression, "division by zero"));
                        }
                        Value::Int(x % y)
                    }
                    NumericPair::Float(x, y) => Value::Float(x % y),
                };
                pc += 1;
            }
            Opcode::Neg => {
                registers[instr.a as usize] = match &registers[instr.b as usize] {
                    Value::Int(i) => Value::Int(-i),
                    Value::Float(f) => Value::Float(-f),
                    other => {
                        return Err(RuntimeError::new(ErrorKind::Expression, format!("cannot negate {}", other.type_name())));
                    }
                };
                pc += 1;
            }
            Opcode::Eq => {
                registers[instr.a as usize] = Value::Bool(values_equal(&registers[instr.b as usize], &registers[instr.c as usize]));
                pc += 1;
            }
            Opcode::Ne => {
                registers[instr.a as usize] = Value::Bool(!values_equal(&registers[instr.b as usize], &registers[instr.c as usize]));
                pc += 1;
            }
            Opcode::Lt => {
                registers[instr.a as usize] =
                    Value::Bool(compare_values(&registers[instr.b as usize], &registers[instr.c as usize])?.is_lt());
                pc += 1;
            }
            Opcode::Le => {
                registers[instr.a as usize] =
                    Value::Bool(compare_values(&registers[instr.b as usize], &registers[instr.c as usize])?.is_le());
                pc += 1;
            }
            Opcode::Gt => {
                registers[instr.a as usize] =
                    Value::Bool(compare_values(&registers[instr.b as usize], &registers[instr.c as usize])?.is_gt());
                pc += 1;
            }
            Opcode::Ge => {
                registers[instr.a as usize] =
                    Value::Bool(compare_values(&registers[instr.b as usize], &registers[instr.c as usize])?.is_ge());
                pc += 1;
            }
            Opcode::Not => {
                registers[instr.a as usize] = Value::Bool(!registers[instr.b as usize].is_truthy());
                pc += 1;
            }
            Opcode::And => {
                registers[instr.a as usize] =
                    Value::Bool(registers[instr.b as usize].is_truthy() && registers[instr.c as usize].is_truthy());
                pc += 1;
            }
            Opcode::Or => {
                registers[instr.a as usize] =
                    Value::Bool(registers[instr.b as usize].is_truthy() || registers[instr.c as usize].is_truthy());
                pc += 1;
            }
            Opcode::ToBool => {
                registers[instr.a as usize] = Value::Bool(registers[instr.b as usize].is_truthy());
                pc += 1;
            }
            Opcode::Coalesce => {
                registers[instr.a as usize] = if registers[instr.b as usize].is_null() {
                    registers[instr.c as usize].clone()
                } else {
                    registers[instr.b as usize].clone()
                };
                pc += 1;
            }
            Opcode::In => {
                let ok = value_contains(&registers[instr.b as usize], &registers[instr.c as usize])?;
                registers[instr.a as usize] = Value::Bool(ok);
                pc += 1;
            }
            Opcode::Move => {
                registers[instr.a as usize] = registers[instr.b as usize].clone();
                pc += 1;
            }
            Opcode::Jump => {
                pc = instr.jump_target() as usize;
            }
            Opcode::JumpIfTrue => {
                pc = if registers[instr.a as usize].is_truthy() { instr.jump_target() as usize } else { pc + 1 };
            }
            Opcode::JumpIfFalse => {
                pc = if registers[instr.a as usize].is_truthy() { pc + 1 } else { instr.jump_target() as usize };
            }
            Opcode::JumpIfNull => {
                pc = if registers[instr.a as usize].is_null() { instr.jump_target() as usize } else { pc + 1 };
            }
            Opcode::JumpIfNotNull => {
                pc = if registers[instr.a as usize].is_null() { pc + 1 } else { instr.jump_target() as usize };
            }
            Opcode::Call => {
                let name = expect_str(&constants[instr.b as usize]).to_owned();
                let arg_start = instr.c as usize;
                let count_instr = instructions[pc + 1];
                debug_assert_eq!(count_instr.opcode, Opcode::CallArgs);
                let count = count_instr.a as usize;
                let args = registers[arg_start..arg_start + count].to_vec();
                let result = functions.call(&name, &args)?;
                registers[instr.a as usize] = result;
                pc += 2;
            }
            Opcode::CallArgs => {
                unreachable!("CallArgs is only ever consumed as the instruction following Call");
            }
            Opcode::Return => {
                let value = registers[instr.a as usize].clone();
                if let Some(trace) = trace.as_deref_mut() {
                    trace.push(TraceEvent { opcode: "Return".to_owned(), register: instr.a, value: value.trace_repr() });
                }
                return Ok(value);
            }
        }
        if let Some(trace) = trace.as_deref_mut() {
            trace.push(TraceEvent {
                opcode: format!("{:?}", instr.opcode),
                register: instr.a,
                value: registers[instr.a as usize].trace_repr(),
            });
        }
    }
}

fn expect_str(value: &Value) -> &str {
    match value {
        Value::Str(s) => s.as_ref(),
        _ => unreachable!("constant pool slot used as a name must be a string"),
    }
}

fn arith(lhs: &Value, rhs: &Value, int_op: impl Fn(i64, i64) -> Option<i64>, float_op: impl Fn(f64, f64) -> f64) -> Result<Value, RuntimeError> {
    match widen_numeric(lhs, rhs)? {
        NumericPair::Int(x, y) => match int_op(x, y) {
            Some(result) => Ok(Value::Int(result)),
            None => Err(RuntimeError::new(ErrorKind::Expression, "integer overflow")),
        },
        NumericPair::Float(x, y) => Ok(Value::Float(float_op(x, y))),
    }
}

/// Classifies a null-receiver access error as `MissingVariable` when the
/// register was loaded directly from an unbound name one instruction ago
/// (`a.b` where `a` itself is unbound), and as a plain `Expression` error
/// otherwise (e.g. `(a + 1).b`, where the null came from evaluating a
/// larger subexpression). See spec.md §7.
fn null_access_error(instructions: &[Instruction], pc: usize, constants: &[Value], receiver_reg: u8, accessor_name: &str, is_index: bool) -> RuntimeError {
    let verb = if is_index { "index" } else { "access property" };
    if pc > 0 {
        let previous = instructions[pc - 1];
        if previous.opcode == Opcode::LoadVar && previous.a == receiver_reg {
            let var_name = expect_str(&constants[previous.b as usize]);
            return RuntimeError::new(
                ErrorKind::MissingVariable,
                format!("variable '{var_name}' is not defined (cannot {verb} '{accessor_name}' on it)"),
            );
        }
    }
    RuntimeError::new(ErrorKind::Expression, format!("cannot {verb} '{accessor_name}' on null"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval_str(source: &str, scope: &Scope) -> Value {
        let cache = ExpressionCache::new();
        let functions = FunctionRegistry::new();
        eval(&cache, &functions, scope, source).expect("expression should evaluate")
    }

    #[test]
    fn arithmetic_widens_to_float() {
        let scope = Scope::root();
        assert!(matches!(eval_str("1 + 2.5", &scope), Value::Float(f) if (f - 3.5).abs() < f64::EPSILON));
    }

    #[test]
    fn string_concatenation_via_plus() {
        let scope = Scope::root();
        let value = eval_str("'a' + 1", &scope);
        assert!(matches!(value, Value::Str(s) if s.as_ref() == "a1"));
    }

    #[test]
    fn null_safe_chain_short_circuits_to_coalesce_default() {
        let scope = Scope::root();
        scope.set_local("a", Value::Null);
        let value = eval_str("a?.b?.c ?? 'fallback'", &scope);
        assert!(matches!(value, Value::Str(s) if s.as_ref() == "fallback"));
    }

    #[test]
    fn unsafe_access_on_null_raises_missing_variable() {
        let scope = Scope::root();
        let cache = ExpressionCache::new();
        let functions = FunctionRegistry::new();
        let err = eval(&cache, &functions, &scope, "a.b").unwrap_err();
        assert_eq!(err.kind, ErrorKind::MissingVariable);
    }

    #[test]
    fn logical_and_yields_genuine_boolean() {
        let scope = Scope::root();
        assert!(matches!(eval_str("1 && 2", &scope), Value::Bool(true)));
    }

    #[test]
    fn ternary_selects_branch() {
        let scope = Scope::root();
        assert!(matches!(eval_str("1 < 2 ? 'yes' : 'no'", &scope), Value::Str(s) if s.as_ref() == "yes"));
    }

    #[test]
    fn function_call_dispatches_to_registry() {
        let scope = Scope::root();
        assert!(matches!(eval_str("len('hello')", &scope), Value::Int(5)));
    }
}
