//! FILTER evaluation over a binding.
//!
//! Errors (unbound variables, incomparable terms) make a filter fail rather
//! than abort matching.

use std::cmp::Ordering;

use crate::model::{Binding, Term};
use super::ast::{CompareOp, Expr};

/// The value of an expression, when it has one.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Term(Term),
    Bool(bool),
}

impl Value {
    /// Effective boolean value.
    fn truth(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Term(term) => match term {
                Term::Literal { lexical, .. } => term
                    .as_bool()
                    .or_else(|| term.as_f64().map(|n| n != 0.0 && !n.is_nan()))
                    .or(Some(!lexical.is_empty())),
                _ => None,
            },
        }
    }

    fn as_term(&self) -> Term {
        match self {
            Value::Term(term) => term.clone(),
            Value::Bool(b) => Term::typed_literal(b.to_string(), crate::model::term::XSD_BOOLEAN),
        }
    }
}

/// Evaluate `expr`. `None` is an evaluation error.
pub fn evaluate(expr: &Expr, binding: &Binding) -> Option<Value> {
    match expr {
        Expr::Var(v) => binding.get(v).cloned().map(Value::Term),
        Expr::Constant(term) => Some(Value::Term(term.clone())),
        Expr::Bound(v) => Some(Value::Bool(binding.contains(v))),
        Expr::Not(e) => evaluate(e, binding)?.truth().map(|b| Value::Bool(!b)),
        Expr::And(l, r) => {
            let left = evaluate(l, binding).and_then(|v| v.truth());
            let right = evaluate(r, binding).and_then(|v| v.truth());
            match (left, right) {
                (Some(false), _) | (_, Some(false)) => Some(Value::Bool(false)),
                (Some(true), Some(true)) => Some(Value::Bool(true)),
                _ => None,
            }
        }
        Expr::Or(l, r) => {
            let left = evaluate(l, binding).and_then(|v| v.truth());
            let right = evaluate(r, binding).and_then(|v| v.truth());
            match (left, right) {
                (Some(true), _) | (_, Some(true)) => Some(Value::Bool(true)),
                (Some(false), Some(false)) => Some(Value::Bool(false)),
                _ => None,
            }
        }
        Expr::Compare { op, left, right } => {
            let left = evaluate(left, binding)?.as_term();
            let right = evaluate(right, binding)?.as_term();
            compare(*op, &left, &right).map(Value::Bool)
        }
    }
}

/// Whether `binding` passes the filter.
pub fn is_satisfied(expr: &Expr, binding: &Binding) -> bool {
    evaluate(expr, binding).and_then(|v| v.truth()).unwrap_or(false)
}

fn compare(op: CompareOp, left: &Term, right: &Term) -> Option<bool> {
    let equal = || match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => left == right,
    };
    match op {
        CompareOp::Eq => Some(equal()),
        CompareOp::Neq => Some(!equal()),
        CompareOp::Lt => order(left, right).map(|o| o == Ordering::Less),
        CompareOp::Lte => order(left, right).map(|o| o != Ordering::Greater),
        CompareOp::Gt => order(left, right).map(|o| o == Ordering::Greater),
        CompareOp::Gte => order(left, right).map(|o| o != Ordering::Less),
    }
}

/// Numeric order when both sides are numbers, lexical order between
/// literals or between IRIs, nothing otherwise.
pub(crate) fn order(left: &Term, right: &Term) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) {
        return a.partial_cmp(&b);
    }
    match (left, right) {
        (Term::Literal { lexical: a, .. }, Term::Literal { lexical: b, .. }) => Some(a.cmp(b)),
        (Term::Iri(a), Term::Iri(b)) => Some(a.cmp(b)),
        _ => None,
    }
}
