//! Substitutions and term/value conversions shared by unification and the
//! saturation engine. Facts live in the [`Environment`](crate::env::Environment)
//! as ordered string tuples (`env.add_fact`/`env.facts`); Datalog here
//! works directly against [`DatalogAtom`]/[`DatalogTerm`] from the AST
//! rather than a parallel type hierarchy.
//!
//! Datalog's own expression evaluation (rule-head arithmetic, query
//! conditions) is self-contained: a binding is a variable name mapped to
//! a string, coerced to a number on demand. It does not touch the tensor
//! backend or the environment's tensor namespace.

use crate::ast::{BinaryOp, CompareOp, DatalogTerm, Expr, UnaryOp};
use crate::error::TLError;
use crate::value::Value;
use crate::Result;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

/// Variable name → bound string value. Facts and rule evaluation both work
/// in terms of strings (a relation's ground constants, whatever their
/// original literal type, are stored and compared as their display text).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Substitution {
    bindings: HashMap<String, String>,
}

impl Substitution {
    /// An empty substitution.
    pub fn new() -> Self {
        Substitution::default()
    }

    /// Bind a variable, overwriting any previous binding.
    pub fn bind(&mut self, variable: impl Into<String>, value: impl Into<String>) {
        self.bindings.insert(variable.into(), value.into());
    }

    /// Look up a variable's bound value.
    pub fn get(&self, variable: &str) -> Option<&str> {
        self.bindings.get(variable).map(|s| s.as_str())
    }

    /// True if `variable` is bound.
    pub fn contains(&self, variable: &str) -> bool {
        self.bindings.contains_key(variable)
    }

    /// All bindings.
    pub fn bindings(&self) -> &HashMap<String, String> {
        &self.bindings
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// True if there are no bindings.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Bindings as f64, for variables feeding arithmetic terms/conditions.
    /// Entries that don't parse as numbers are omitted.
    pub fn as_arith_bindings(&self) -> HashMap<String, f64> {
        self.bindings
            .iter()
            .filter_map(|(k, v)| v.parse::<f64>().ok().map(|n| (k.clone(), n)))
            .collect()
    }
}

impl fmt::Display for Substitution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (var, val)) in self.bindings.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{var} = {val}")?;
        }
        write!(f, "}}")
    }
}

/// Render a ground [`Value`] the way facts are stored: its `Display` text.
pub fn value_to_fact_string(value: &Value) -> String {
    value.to_string()
}

/// Resolve one rule-head term to a ground string, given a substitution
/// built from the rule's satisfied body.
pub fn resolve_term(term: &DatalogTerm, subst: &Substitution) -> Result<String> {
    match term {
        DatalogTerm::Constant(v) => Ok(value_to_fact_string(v)),
        DatalogTerm::Variable(name) => subst
            .get(name.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| TLError::Shape(format!("unbound variable '{name}' in rule head"))),
        DatalogTerm::Arithmetic(expr) => {
            let bindings = subst.as_arith_bindings();
            let n = eval_arith(expr, &bindings)?;
            Ok(format_number(n))
        }
    }
}

/// Resolve a condition operand (plain variable, literal, or arithmetic
/// expression) to its string form.
pub fn resolve_condition_operand(expr: &Expr, subst: &Substitution) -> Result<String> {
    match expr {
        Expr::Number(n) => {
            let v = n
                .as_f64()
                .ok_or_else(|| TLError::Shape(format!("invalid numeric literal '{}'", n.text)))?;
            Ok(format_number(v))
        }
        Expr::Str(s) => Ok(s.text.clone()),
        Expr::TensorRef(tref) if tref.indices.is_empty() && tref.name.is_uppercase() => {
            Ok(tref.name.as_str().to_string())
        }
        Expr::TensorRef(tref) if tref.indices.is_empty() => subst
            .get(tref.name.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| TLError::Shape(format!("unbound variable '{}' in condition", tref.name))),
        Expr::TensorRef(tref) => Err(TLError::Shape(format!(
            "'{}' is an indexed reference, not a valid Datalog term",
            tref.name
        ))),
        other => {
            let bindings = subst.as_arith_bindings();
            Ok(format_number(eval_arith(other, &bindings)?))
        }
    }
}

/// Compare two condition operands per spec: numeric if both coerce to a
/// number, lexicographic string comparison otherwise.
pub fn compare_operands(lhs: &str, rhs: &str, op: CompareOp) -> bool {
    let ordering = match (lhs.parse::<f64>(), rhs.parse::<f64>()) {
        (Ok(a), Ok(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        _ => lhs.cmp(rhs),
    };
    match op {
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Le => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Ge => ordering != Ordering::Less,
        CompareOp::Eq => ordering == Ordering::Equal,
        CompareOp::Ne => ordering != Ordering::Equal,
    }
}

fn eval_arith(expr: &Expr, bindings: &HashMap<String, f64>) -> Result<f64> {
    match expr {
        Expr::Number(n) => n
            .as_f64()
            .ok_or_else(|| TLError::Shape(format!("invalid numeric literal '{}'", n.text))),
        Expr::TensorRef(tref) if tref.indices.is_empty() => bindings
            .get(tref.name.as_str())
            .copied()
            .ok_or_else(|| TLError::Shape(format!("unbound variable '{}' in arithmetic term", tref.name))),
        Expr::TensorRef(tref) => Err(TLError::Shape(format!(
            "'{}' is an indexed reference, not valid in Datalog arithmetic",
            tref.name
        ))),
        Expr::Binary { op, lhs, rhs, .. } => {
            let a = eval_arith(lhs, bindings)?;
            let b = eval_arith(rhs, bindings)?;
            Ok(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                BinaryOp::Mod => a % b,
                BinaryOp::Pow => a.powf(b),
                BinaryOp::Lt => (a < b) as i32 as f64,
                BinaryOp::Le => (a <= b) as i32 as f64,
                BinaryOp::Gt => (a > b) as i32 as f64,
                BinaryOp::Ge => (a >= b) as i32 as f64,
                BinaryOp::Eq => (a == b) as i32 as f64,
                BinaryOp::Ne => (a != b) as i32 as f64,
                BinaryOp::And => ((a != 0.0) && (b != 0.0)) as i32 as f64,
                BinaryOp::Or => ((a != 0.0) || (b != 0.0)) as i32 as f64,
            })
        }
        Expr::Unary { op, expr, .. } => {
            let v = eval_arith(expr, bindings)?;
            Ok(match op {
                UnaryOp::Neg => -v,
                UnaryOp::Not => (v == 0.0) as i32 as f64,
            })
        }
        Expr::Str(s) => Err(TLError::Shape(format!(
            "string literal \"{}\" used in a Datalog arithmetic term",
            s.text
        ))),
        Expr::List(..) | Expr::Call { .. } => Err(TLError::Shape(
            "list literals and function calls are not valid Datalog arithmetic terms".to_string(),
        )),
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Identifier, NumberLiteral, SourceLocation, TensorRef};

    #[test]
    fn substitution_round_trips() {
        let mut s = Substitution::new();
        s.bind("X", "Alice");
        assert_eq!(s.get("X"), Some("Alice"));
        assert_eq!(s.get("Y"), None);
    }

    #[test]
    fn arith_bindings_skip_non_integers() {
        let mut s = Substitution::new();
        s.bind("X", "3");
        s.bind("Name", "Alice");
        let b = s.as_arith_bindings();
        assert_eq!(b.get("X"), Some(&3.0));
        assert_eq!(b.get("Name"), None);
    }

    #[test]
    fn resolve_term_evaluates_arithmetic_head() {
        let mut s = Substitution::new();
        s.bind("X", "4");
        let term = DatalogTerm::Arithmetic(Box::new(Expr::Binary {
            op: BinaryOp::Add,
            lhs: Box::new(Expr::TensorRef(TensorRef::scalar(
                Identifier::from("X"),
                SourceLocation::default(),
            ))),
            rhs: Box::new(Expr::Number(NumberLiteral::new("1"))),
            loc: SourceLocation::default(),
        }));
        assert_eq!(resolve_term(&term, &s).unwrap(), "5");
    }

    #[test]
    fn compare_operands_falls_back_to_lexicographic() {
        assert!(compare_operands("Alice", "Bob", CompareOp::Lt));
        assert!(!compare_operands("Alice", "Alice", CompareOp::Ne));
        assert!(compare_operands("10", "9", CompareOp::Gt));
    }

    #[test]
    fn uppercase_bare_operand_resolves_as_literal_constant() {
        let subst = Substitution::new();
        let operand = Expr::TensorRef(TensorRef::scalar(Identifier::from("Active"), SourceLocation::default()));
        assert_eq!(resolve_condition_operand(&operand, &subst).unwrap(), "Active");
    }
}
