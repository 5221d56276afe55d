//! Variable bindings produced by pattern matching.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::Term;

/// An ordered `variable name → term` map. Variable names carry no `?`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Binding(BTreeMap<String, Term>);

impl Binding {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn get(&self, var: &str) -> Option<&Term> {
        self.0.get(var)
    }

    pub fn insert(&mut self, var: impl Into<String>, term: Term) -> Option<Term> {
        self.0.insert(var.into(), term)
    }

    pub fn contains(&self, var: &str) -> bool {
        self.0.contains_key(var)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Term)> {
        self.0.iter()
    }

    pub fn vars(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// True when every shared variable is bound to the same term.
    pub fn is_compatible(&self, other: &Binding) -> bool {
        let (small, large) = if self.len() <= other.len() { (self, other) } else { (other, self) };
        small
            .iter()
            .all(|(var, term)| large.get(var).is_none_or(|t| t == term))
    }

    /// Union of two compatible bindings, `None` if they disagree.
    pub fn join(&self, other: &Binding) -> Option<Binding> {
        if !self.is_compatible(other) {
            return None;
        }
        let mut out = self.clone();
        for (var, term) in other.iter() {
            out.0.entry(var.clone()).or_insert_with(|| term.clone());
        }
        Some(out)
    }

    /// Keeps only the given variables. An empty projection keeps nothing.
    pub fn project(&self, vars: &[String]) -> Binding {
        Binding(
            self.0
                .iter()
                .filter(|(k, _)| vars.iter().any(|v| v == *k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

impl FromIterator<(String, Term)> for Binding {
    fn from_iter<I: IntoIterator<Item = (String, Term)>>(iter: I) -> Self {
        Binding(iter.into_iter().collect())
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (var, term)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "?{var}={term}")?;
        }
        write!(f, "}}")
    }
}
