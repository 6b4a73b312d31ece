//! Lowers an [`Expr`] AST into a flat register-machine instruction stream.
//!
//! The central lowering rule (spec.md §9) is chain fusion: a whole postfix
//! access chain (`a?.b?.c.d ?? e`) compiles so every safe step shares one
//! failure jump target, instead of nesting a branch per `?.`/`?[`. Every
//! node compiles with a uniform `compile_expr(expr, dst)` signature — it
//! writes its result into a caller-chosen register rather than pushing onto
//! an implicit stack, the way a stack-based compiler would.

use super::ast::{Accessor, BinaryOp, Expr, LogicalOp, UnaryOp};
use super::builder::{CodeBuilder, JumpLabel};
use super::code::CompiledExpression;
use super::op::{Instruction, Opcode};
use super::parser::parse;
use crate::error::{CompileError, SourcePos};
use crate::value::Value;

pub(crate) fn compile(source: &str) -> Result<CompiledExpression, CompileError> {
    let ast = parse(source)?;
    let mut builder = CodeBuilder::new(SourcePos::default());
    let mut compiler = Compiler { builder: &mut builder };
    let dst = compiler.builder.alloc()?;
    compiler.compile_expr(&ast, dst)?;
    compiler.builder.emit(Instruction::new(Opcode::Return, dst, 0, 0));
    let (instructions, constants, register_count) = builder.finish();
    Ok(CompiledExpression::new(instructions, constants, register_count, source.to_owned()))
}

struct Compiler<'b> {
    builder: &'b mut CodeBuilder,
}

impl Compiler<'_> {
    fn compile_expr(&mut self, expr: &Expr, dst: u8) -> Result<(), CompileError> {
        match expr {
            Expr::Null => {
                self.builder.emit(Instruction::new(Opcode::LoadNull, dst, 0, 0));
            }
            Expr::Bool(true) => {
                self.builder.emit(Instruction::new(Opcode::LoadTrue, dst, 0, 0));
            }
            Expr::Bool(false) => {
                self.builder.emit(Instruction::new(Opcode::LoadFalse, dst, 0, 0));
            }
            Expr::Int(value) => {
                let c = self.builder.constant(Value::Int(*value))?;
                self.builder.emit(Instruction::new(Opcode::LoadConst, dst, c, 0));
            }
            Expr::Float(value) => {
                let c = self.builder.constant(Value::Float(*value))?;
                self.builder.emit(Instruction::new(Opcode::LoadConst, dst, c, 0));
            }
            Expr::Str(value) => {
                let c = self.builder.constant(Value::str(value.clone()))?;
                self.builder.emit(Instruction::new(Opcode::LoadConst, dst, c, 0));
            }
            Expr::Ident(name) => {
                let c = self.builder.constant(Value::str(name.clone()))?;
                self.builder.emit(Instruction::new(Opcode::LoadVar, dst, c, 0));
            }
            Expr::Chain { base, steps } => {
                let mut fail_labels = Vec::new();
                self.compile_chain(base, steps, dst, &mut fail_labels)?;
                self.finish_chain(dst, fail_labels, None)?;
            }
            Expr::Unary { op, expr } => {
                self.compile_expr(expr, dst)?;
                let opcode = match op {
                    UnaryOp::Not => Opcode::Not,
                    UnaryOp::Neg => Opcode::Neg,
                };
                self.builder.emit(Instruction::new(opcode, dst, dst, 0));
            }
            Expr::Binary { op, lhs, rhs } => {
                self.compile_expr(lhs, dst)?;
                let rhs_reg = self.builder.alloc()?;
                self.compile_expr(rhs, rhs_reg)?;
                let opcode = binary_opcode(*op);
                self.builder.emit(Instruction::new(opcode, dst, dst, rhs_reg));
                self.builder.free(rhs_reg);
            }
            Expr::Logical { op, lhs, rhs } => {
                self.compile_expr(lhs, dst)?;
                let short_circuit_opcode = match op {
                    LogicalOp::And => Opcode::JumpIfFalse,
                    LogicalOp::Or => Opcode::JumpIfTrue,
                };
                let label = self.builder.emit_jump(short_circuit_opcode, dst);
                self.compile_expr(rhs, dst)?;
                self.builder.patch_jump_here(label);
                // Normalize to a genuine boolean rather than passing either
                // operand's raw value through, per spec.md §4.3.
                self.builder.emit(Instruction::new(Opcode::ToBool, dst, dst, 0));
            }
            Expr::Ternary { cond, then_branch, else_branch } => {
                let cond_reg = self.builder.alloc()?;
                self.compile_expr(cond, cond_reg)?;
                let else_label = self.builder.emit_jump(Opcode::JumpIfFalse, cond_reg);
                self.builder.free(cond_reg);
                self.compile_expr(then_branch, dst)?;
                let end_label = self.builder.emit_jump(Opcode::Jump, 0);
                self.builder.patch_jump_here(else_label);
                self.compile_expr(else_branch, dst)?;
                self.builder.patch_jump_here(end_label);
            }
            Expr::Coalesce { lhs, rhs } => {
                if let Expr::Chain { base, steps } = lhs.as_ref() {
                    let mut fail_labels = Vec::new();
                    self.compile_chain(base, steps, dst, &mut fail_labels)?;
                    self.finish_chain(dst, fail_labels, Some(rhs))?;
                } else {
                    self.compile_expr(lhs, dst)?;
                    let label = self.builder.emit_jump(Opcode::JumpIfNotNull, dst);
                    self.compile_expr(rhs, dst)?;
                    self.builder.patch_jump_here(label);
                }
            }
            Expr::In { lhs, rhs } => {
                self.compile_expr(lhs, dst)?;
                let rhs_reg = self.builder.alloc()?;
                self.compile_expr(rhs, rhs_reg)?;
                self.builder.emit(Instruction::new(Opcode::In, dst, dst, rhs_reg));
                self.builder.free(rhs_reg);
            }
            Expr::Call { name, args } => {
                let arg_start = if args.is_empty() {
                    0
                } else {
                    let start = self.builder.alloc_range(
                        u8::try_from(args.len()).map_err(|_| CompileError::TooManyRegisters { pos: SourcePos::default() })?,
                    )?;
                    for (i, arg) in args.iter().enumerate() {
                        self.compile_expr(arg, start + i as u8)?;
                    }
                    start
                };
                let name_const = self.builder.constant(Value::str(name.clone()))?;
                self.builder.emit(Instruction::new(Opcode::Call, dst, name_const, arg_start));
                let count = u8::try_from(args.len()).map_err(|_| CompileError::TooManyRegisters { pos: SourcePos::default() })?;
                self.builder.emit(Instruction::new(Opcode::CallArgs, count, 0, 0));
            }
        }
        Ok(())
    }

    /// Compiles `base` into `dst`, then applies each accessor in sequence.
    /// Safe steps (`?.`/`?[`) append a `JumpIfNull` label to `fail_labels`
    /// instead of branching individually; the caller patches all of them to
    /// one shared target.
    fn compile_chain(&mut self, base: &Expr, steps: &[Accessor], dst: u8, fail_labels: &mut Vec<JumpLabel>) -> Result<(), CompileError> {
        self.compile_expr(base, dst)?;
        for step in steps {
            match step {
                Accessor::Member { name, safe } => {
                    if *safe {
                        fail_labels.push(self.builder.emit_jump(Opcode::JumpIfNull, dst));
                        let name_const = self.builder.constant(Value::str(name.clone()))?;
                        self.builder.emit(Instruction::new(Opcode::GetPropSafe, dst, dst, name_const));
                    } else {
                        let name_const = self.builder.constant(Value::str(name.clone()))?;
                        self.builder.emit(Instruction::new(Opcode::GetProp, dst, dst, name_const));
                    }
                }
                Accessor::Index { index, safe } => {
                    if *safe {
                        fail_labels.push(self.builder.emit_jump(Opcode::JumpIfNull, dst));
                    }
                    let idx_reg = self.builder.alloc()?;
                    self.compile_expr(index, idx_reg)?;
                    let opcode = if *safe { Opcode::GetIndexSafe } else { Opcode::GetIndex };
                    self.builder.emit(Instruction::new(opcode, dst, dst, idx_reg));
                    self.builder.free(idx_reg);
                }
            }
        }
        Ok(())
    }

    /// Closes out a chain compiled by [`Self::compile_chain`]: jumps past
    /// the failure path on success, then lands every collected failure
    /// label on either `coalesce_rhs` (when present) or a plain `LoadNull`.
    fn finish_chain(&mut self, dst: u8, fail_labels: Vec<JumpLabel>, coalesce_rhs: Option<&Expr>) -> Result<(), CompileError> {
        if fail_labels.is_empty() {
            return Ok(());
        }
        let end_label = self.builder.emit_jump(Opcode::Jump, 0);
        self.builder.patch_jumps_here(&fail_labels);
        match coalesce_rhs {
            Some(rhs) => self.compile_expr(rhs, dst)?,
            None => {
                self.builder.emit(Instruction::new(Opcode::LoadNull, dst, 0, 0));
            }
        }
        self.builder.patch_jump_here(end_label);
        Ok(())
    }
}

fn binary_opcode(op: BinaryOp) -> Opcode {
    match op {
        BinaryOp::Add => Opcode::Add,
        BinaryOp::Sub => Opcode::Sub,
        BinaryOp::Mul => Opcode::Mul,
        BinaryOp::Div => Opcode::Div,
        BinaryOp::Mod => Opcode::Mod,
        BinaryOp::Eq => Opcode::Eq,
        BinaryOp::Ne => Opcode::Ne,
        BinaryOp::Lt => Opcode::Lt,
        BinaryOp::Le => Opcode::Le,
        BinaryOp::Gt => Opcode::Gt,
        BinaryOp::Ge => Opcode::Ge,
    }
}
