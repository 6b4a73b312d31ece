//! `${...}` string interpolation (spec.md §6).
//!
//! A template string mixing literal text and `${expr}` fragments evaluates
//! each fragment and joins the results via [`Value::display_string`]. The
//! special case of a string that is *only* one `${expr}` fragment (no
//! surrounding literal text) returns the expression's raw [`Value`] instead
//! of forcing it through string conversion, so `"${count}"` stays an `Int`
//! rather than becoming `"3"`.

use crate::error::RuntimeError;
use crate::expr::ExpressionCache;
use crate::functions::FunctionRegistry;
use crate::scope::Scope;
use crate::value::Value;
use crate::vm;

enum Fragment<'a> {
    Literal(&'a str),
    Expr(&'a str),
}

/// Parses `template` into literal/expression fragments without evaluating
/// them. Unmatched `${` (no closing `}`) is treated as literal text, the
/// permissive behavior a template engine like this one favors over erroring
/// on a stray `$`.
fn fragments(template: &str) -> Vec<Fragment<'_>> {
    let mut out = Vec::new();
    let mut rest = template;
    loop {
        match rest.find("${") {
            None => {
                if !rest.is_empty() {
                    out.push(Fragment::Literal(rest));
                }
                break;
            }
            Some(start) => {
                if start > 0 {
                    out.push(Fragment::Literal(&rest[..start]));
                }
                let after = &rest[start + 2..];
                match find_expr_end(after) {
                    Some(end) => {
                        out.push(Fragment::Expr(&after[..end]));
                        rest = &after[end + 1..];
                    }
                    None => {
                        out.push(Fragment::Literal(&rest[start..]));
                        break;
                    }
                }
            }
        }
    }
    out
}

/// Finds the byte offset of the `}` that closes a `${` fragment, skipping
/// any `}` that falls inside a `'`/`"` string literal (including one
/// escaped with a backslash) — the same quoting rules as the expression
/// lexer, so `${greet('}')}` doesn't truncate at the quoted brace.
fn find_expr_end(source: &str) -> Option<usize> {
    let bytes = source.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' && i + 1 < bytes.len() {
                    i += 2;
                    continue;
                }
                if b == q {
                    quote = None;
                }
                i += 1;
            }
            None => match b {
                b'\'' | b'"' => {
                    quote = Some(b);
                    i += 1;
                }
                b'}' => return Some(i),
                _ => i += 1,
            },
        }
    }
    None
}

pub(crate) fn render(cache: &ExpressionCache, functions: &FunctionRegistry, scope: &Scope, template: &str) -> Result<Value, RuntimeError> {
    let parts = fragments(template);
    if let [Fragment::Expr(source)] = parts.as_slice() {
        return vm::eval(cache, functions, scope, source);
    }
    let mut out = String::new();
    for part in parts {
        match part {
            Fragment::Literal(text) => out.push_str(text),
            Fragment::Expr(source) => {
                let value = vm::eval(cache, functions, scope, source)?;
                out.push_str(&value.display_string());
            }
        }
    }
    Ok(Value::str(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_expression_preserves_type() {
        let cache = ExpressionCache::new();
        let functions = FunctionRegistry::new();
        let scope = Scope::root();
        scope.set_local("count", Value::Int(3));
        let value = render(&cache, &functions, &scope, "${count}").unwrap();
        assert!(matches!(value, Value::Int(3)));
    }

    #[test]
    fn mixed_template_concatenates_as_strings() {
        let cache = ExpressionCache::new();
        let functions = FunctionRegistry::new();
        let scope = Scope::root();
        scope.set_local("name", Value::str("world"));
        let value = render(&cache, &functions, &scope, "hello ${name}!").unwrap();
        assert!(matches!(value, Value::Str(s) if s.as_ref() == "hello world!"));
    }

    #[test]
    fn a_brace_inside_a_quoted_string_literal_does_not_close_the_fragment() {
        let cache = ExpressionCache::new();
        let functions = FunctionRegistry::new();
        let scope = Scope::root();
        let value = render(&cache, &functions, &scope, "${'a}b' + '}'} tail").unwrap();
        assert!(matches!(value, Value::Str(s) if s.as_ref() == "a}b} tail"));
    }
}
