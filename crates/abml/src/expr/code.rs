//! The output of compilation: a flat instruction stream plus its constant
//! pool, ready for the VM to execute.

use super::op::Instruction;
use crate::value::Value;

/// A compiled expression, ready for repeated execution against different
/// scopes. Cheap to clone-share via [`std::rc::Rc`] from the cache.
#[derive(Debug)]
pub(crate) struct CompiledExpression {
    pub(crate) instructions: Vec<Instruction>,
    pub(crate) constants: Vec<Value>,
    pub(crate) register_count: u8,
    pub(crate) source: String,
}

impl CompiledExpression {
    pub(crate) fn new(instructions: Vec<Instruction>, constants: Vec<Value>, register_count: u8, source: String) -> Self {
        Self { instructions, constants, register_count, source }
    }
}
