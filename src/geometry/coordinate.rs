//! Points and constraint regions in the coordinate space.

use std::fmt;
use std::ops::Index;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::element::{Element, ElementKind};

/// A fixed-arity tuple of elements, one per dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coordinate(SmallVec<[Element; 4]>);

impl Coordinate {
    pub fn new(elements: impl IntoIterator<Item = Element>) -> Self {
        Self(elements.into_iter().collect())
    }

    pub fn dimensions(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, dim: usize) -> Option<&Element> {
        self.0.get(dim)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Element> {
        self.0.iter()
    }

    pub(crate) fn set(&mut self, dim: usize, element: Element) {
        self.0[dim] = element;
    }

    /// The space corner with every component at its kind's minimum.
    pub fn min(kinds: &[ElementKind]) -> Self {
        Self::new(kinds.iter().map(|k| k.min()))
    }

    /// The space corner with every component at its kind's maximum.
    pub fn max(kinds: &[ElementKind]) -> Self {
        Self::new(kinds.iter().map(|k| k.max()))
    }
}

impl Index<usize> for Coordinate {
    type Output = Element;

    fn index(&self, dim: usize) -> &Element {
        &self.0[dim]
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{e}")?;
        }
        write!(f, ")")
    }
}

/// Constraint on one dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bound {
    /// Wildcard: every element satisfies it.
    Any,
    Exact(Element),
    /// Half-open `[lower, upper)`.
    Range { lower: Element, upper: Element },
}

impl Bound {
    pub fn accepts(&self, element: &Element) -> bool {
        match self {
            Bound::Any => true,
            Bound::Exact(e) => e == element,
            Bound::Range { lower, upper } => lower <= element && element < upper,
        }
    }
}

/// A region constraint: the unit anycast and broadcast deliver to.
///
/// A region with only `Exact` bounds is a single point, one with only `Any`
/// bounds is the whole space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    bounds: SmallVec<[Bound; 4]>,
}

impl Region {
    pub fn new(bounds: impl IntoIterator<Item = Bound>) -> Self {
        Self { bounds: bounds.into_iter().collect() }
    }

    pub fn all(dimensions: usize) -> Self {
        Self::new((0..dimensions).map(|_| Bound::Any))
    }

    pub fn point(coordinate: &Coordinate) -> Self {
        Self::new(coordinate.iter().cloned().map(Bound::Exact))
    }

    pub fn dimensions(&self) -> usize {
        self.bounds.len()
    }

    pub fn bound(&self, dim: usize) -> &Bound {
        &self.bounds[dim]
    }

    pub fn bounds(&self) -> &[Bound] {
        &self.bounds
    }

    pub fn is_all(&self) -> bool {
        self.bounds.iter().all(|b| matches!(b, Bound::Any))
    }

    /// The coordinate when every bound is exact.
    pub fn as_point(&self) -> Option<Coordinate> {
        self.bounds
            .iter()
            .map(|b| match b {
                Bound::Exact(e) => Some(e.clone()),
                _ => None,
            })
            .collect::<Option<SmallVec<[Element; 4]>>>()
            .map(Coordinate)
    }

    pub fn contains(&self, coordinate: &Coordinate) -> bool {
        self.bounds.iter().zip(coordinate.iter()).all(|(b, e)| b.accepts(e))
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, b) in self.bounds.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match b {
                Bound::Any => write!(f, "*")?,
                Bound::Exact(e) => write!(f, "{e}")?,
                Bound::Range { lower, upper } => write!(f, "{lower}..{upper}")?,
            }
        }
        write!(f, "]")
    }
}
