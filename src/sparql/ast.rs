//! SPARQL AST types.

use serde::{Deserialize, Serialize};

use crate::model::Term;

/// A parsed query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub form: QueryForm,
    pub pattern: GroupPattern,
    pub order_by: Vec<OrderCondition>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryForm {
    Select { modifier: Option<Modifier>, projection: Projection },
    Ask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Modifier {
    Distinct,
    Reduced,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Projection {
    /// `SELECT *`
    All,
    Vars(Vec<String>),
}

/// A `{ ... }` block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupPattern {
    pub elements: Vec<PatternElement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PatternElement {
    Triples(Vec<TriplePattern>),
    Graph { name: TermPattern, pattern: GroupPattern },
    Union(Vec<GroupPattern>),
    Group(GroupPattern),
    Filter(Expr),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TriplePattern {
    pub subject: TermPattern,
    pub predicate: TermPattern,
    pub object: TermPattern,
}

/// A pattern position: a variable or a concrete term.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TermPattern {
    Var(String),
    Term(Term),
}

impl TermPattern {
    pub fn as_var(&self) -> Option<&str> {
        match self {
            TermPattern::Var(v) => Some(v),
            TermPattern::Term(_) => None,
        }
    }

    pub fn as_term(&self) -> Option<&Term> {
        match self {
            TermPattern::Term(t) => Some(t),
            TermPattern::Var(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCondition {
    pub var: String,
    pub descending: bool,
}

/// FILTER expressions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Var(String),
    Constant(Term),
    Bound(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare { op: CompareOp, left: Box<Expr>, right: Box<Expr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq, Neq, Lt, Lte, Gt, Gte,
}

impl Query {
    pub fn is_ask(&self) -> bool {
        matches!(self.form, QueryForm::Ask)
    }

    pub fn modifier(&self) -> Option<Modifier> {
        match &self.form {
            QueryForm::Select { modifier, .. } => *modifier,
            QueryForm::Ask => None,
        }
    }

    /// Variables a solution carries: the projection, every named variable
    /// for `SELECT *`, nothing for `ASK`.
    pub fn result_vars(&self) -> Vec<String> {
        match &self.form {
            QueryForm::Select { projection: Projection::Vars(vars), .. } => vars.clone(),
            QueryForm::Select { projection: Projection::All, .. } => self
                .pattern
                .vars()
                .into_iter()
                .filter(|v| !v.starts_with("_:"))
                .collect(),
            QueryForm::Ask => Vec::new(),
        }
    }
}

impl GroupPattern {
    /// Variables in order of first appearance.
    pub fn vars(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars(&self, out: &mut Vec<String>) {
        for element in &self.elements {
            match element {
                PatternElement::Triples(triples) => {
                    for t in triples {
                        for v in t.positions().iter().filter_map(|p| p.as_var()) {
                            push_var(out, v);
                        }
                    }
                }
                PatternElement::Graph { name, pattern } => {
                    if let Some(v) = name.as_var() {
                        push_var(out, v);
                    }
                    pattern.collect_vars(out);
                }
                PatternElement::Union(branches) => {
                    for branch in branches {
                        branch.collect_vars(out);
                    }
                }
                PatternElement::Group(group) => group.collect_vars(out),
                PatternElement::Filter(_) => {}
            }
        }
    }
}

impl GroupPattern {
    /// Every FILTER expression, at any depth.
    pub fn filters(&self) -> Vec<&Expr> {
        let mut out = Vec::new();
        for element in &self.elements {
            match element {
                PatternElement::Filter(expr) => out.push(expr),
                PatternElement::Graph { pattern, .. } | PatternElement::Group(pattern) => {
                    out.extend(pattern.filters())
                }
                PatternElement::Union(branches) => {
                    out.extend(branches.iter().flat_map(GroupPattern::filters))
                }
                PatternElement::Triples(_) => {}
            }
        }
        out
    }
}

fn push_var(out: &mut Vec<String>, var: &str) {
    if !out.iter().any(|o| o == var) {
        out.push(var.to_string());
    }
}

impl TriplePattern {
    pub fn positions(&self) -> [&TermPattern; 3] {
        [&self.subject, &self.predicate, &self.object]
    }
}

impl Expr {
    /// Variables the expression mentions.
    pub fn vars(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Var(v) | Expr::Bound(v) => {
                if !out.contains(&v.as_str()) {
                    out.push(v);
                }
            }
            Expr::Constant(_) => {}
            Expr::Not(e) => e.collect_vars(out),
            Expr::And(l, r) | Expr::Or(l, r) | Expr::Compare { left: l, right: r, .. } => {
                l.collect_vars(out);
                r.collect_vars(out);
            }
        }
    }
}
