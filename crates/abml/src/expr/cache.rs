//! Memoizes compiled expressions by source text.
//!
//! The runtime is single-threaded by design (spec.md's Non-goals rule out
//! OS-thread parallelism), so this is a plain `RefCell`-guarded map rather
//! than a lock-striped concurrent cache — the same simplification the rest
//! of the crate makes by using `Rc` instead of `Arc` throughout.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::CompileError;

use super::code::CompiledExpression;
use super::compiler::compile;

#[derive(Default)]
pub(crate) struct ExpressionCache {
    entries: RefCell<HashMap<String, Rc<CompiledExpression>>>,
}

impl ExpressionCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns the cached compiled form of `source`, compiling and
    /// inserting it on first use.
    pub(crate) fn get_or_compile(&self, source: &str) -> Result<Rc<CompiledExpression>, CompileError> {
        if let Some(existing) = self.entries.borrow().get(source) {
            return Ok(Rc::clone(existing));
        }
        let compiled = Rc::new(compile(source)?);
        self.entries.borrow_mut().insert(source.to_owned(), Rc::clone(&compiled));
        Ok(compiled)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.borrow().len()
    }
}
