//! Zones: the axis-aligned hyper-rectangles peers own.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::coordinate::{Bound, Coordinate, Region};
use super::element::{Element, ElementKind};

/// Side of a zone along one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    Lower,
    Upper,
}

impl Direction {
    pub const BOTH: [Direction; 2] = [Direction::Lower, Direction::Upper];

    pub fn opposite(self) -> Direction {
        match self {
            Direction::Lower => Direction::Upper,
            Direction::Upper => Direction::Lower,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Direction::Lower => 0,
            Direction::Upper => 1,
        }
    }
}

/// Where an element lies relative to a zone's interval on one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Containment {
    Below,
    Inside,
    Above,
}

/// Half-open region `[lower, upper)` on every dimension.
///
/// An interval with `lower > upper` wraps around the space boundary and is
/// read as `[lower, max) ∪ [min, upper)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Zone {
    lower: Coordinate,
    upper: Coordinate,
}

impl Zone {
    /// # Panics
    ///
    /// If the bounds differ in arity.
    pub fn new(lower: Coordinate, upper: Coordinate) -> Self {
        assert_eq!(
            lower.dimensions(),
            upper.dimensions(),
            "zone bounds must have the same number of dimensions"
        );
        Self { lower, upper }
    }

    /// The zone covering the whole space.
    pub fn full(kinds: &[ElementKind]) -> Self {
        Self::new(Coordinate::min(kinds), Coordinate::max(kinds))
    }

    pub fn lower(&self) -> &Coordinate {
        &self.lower
    }

    pub fn upper(&self) -> &Coordinate {
        &self.upper
    }

    pub fn lower_bound(&self, dim: usize) -> &Element {
        &self.lower[dim]
    }

    pub fn upper_bound(&self, dim: usize) -> &Element {
        &self.upper[dim]
    }

    pub fn dimensions(&self) -> usize {
        self.lower.dimensions()
    }

    fn wraps(&self, dim: usize) -> bool {
        self.lower[dim] > self.upper[dim]
    }

    pub fn containment(&self, dim: usize, element: &Element) -> Containment {
        let (lower, upper) = (&self.lower[dim], &self.upper[dim]);
        if self.wraps(dim) {
            if element >= lower || element < upper {
                Containment::Inside
            } else {
                // In the gap between the two arcs.
                Containment::Below
            }
        } else if element < lower {
            Containment::Below
        } else if element >= upper {
            Containment::Above
        } else {
            Containment::Inside
        }
    }

    pub fn contains_element(&self, dim: usize, element: &Element) -> bool {
        self.containment(dim, element) == Containment::Inside
    }

    pub fn contains(&self, coordinate: &Coordinate) -> bool {
        (0..self.dimensions()).all(|d| self.contains_element(d, &coordinate[d]))
    }

    /// Intervals on `dim` share at least one element.
    pub fn overlaps(&self, other: &Zone, dim: usize) -> bool {
        if self.wraps(dim) || other.wraps(dim) {
            return self.contains_element(dim, &other.lower[dim])
                || other.contains_element(dim, &self.lower[dim]);
        }
        self.lower[dim] < other.upper[dim] && other.lower[dim] < self.upper[dim]
    }

    /// `other` touches this zone's `direction` face on `dim`.
    pub fn abuts(&self, other: &Zone, dim: usize, direction: Direction) -> bool {
        match direction {
            Direction::Upper => self.upper[dim] == other.lower[dim],
            Direction::Lower => self.lower[dim] == other.upper[dim],
        }
    }

    /// The dimension along which the two zones are adjacent: abutting on
    /// exactly that dimension and overlapping on every other.
    pub fn neighbors(&self, other: &Zone) -> Option<usize> {
        let mut abutting = None;
        for dim in 0..self.dimensions() {
            if self.abuts(other, dim, Direction::Lower) || self.abuts(other, dim, Direction::Upper) {
                if abutting.is_some() {
                    return None;
                }
                abutting = Some(dim);
            } else if !self.overlaps(other, dim) {
                return None;
            }
        }
        abutting
    }

    /// Side of this zone on which `other` lies, given they neighbor on `dim`.
    pub fn direction_of(&self, other: &Zone, dim: usize) -> Direction {
        if self.abuts(other, dim, Direction::Upper) {
            Direction::Upper
        } else {
            Direction::Lower
        }
    }

    pub fn intersects_bound(&self, dim: usize, bound: &Bound) -> bool {
        match bound {
            Bound::Any => true,
            Bound::Exact(e) => self.contains_element(dim, e),
            Bound::Range { lower, upper } => {
                if self.wraps(dim) {
                    self.contains_element(dim, lower)
                        || (lower <= &self.lower[dim] && &self.lower[dim] < upper)
                } else {
                    lower < &self.upper[dim] && &self.lower[dim] < upper
                }
            }
        }
    }

    pub fn intersects(&self, region: &Region) -> bool {
        (0..self.dimensions()).all(|d| self.intersects_bound(d, region.bound(d)))
    }

    /// Splits on `dim` at `at`: `[lower, at)` and `[at, upper)`. On a
    /// wrapped interval one of the halves keeps wrapping.
    ///
    /// # Panics
    ///
    /// If `at` is not strictly inside the zone's bound on `dim`.
    pub fn split_at(&self, dim: usize, at: Element) -> (Zone, Zone) {
        assert!(
            self.strictly_inside(dim, &at),
            "split element {at} is outside ({}, {}) on dimension {dim}",
            self.lower[dim],
            self.upper[dim],
        );
        let mut first_upper = self.upper.clone();
        first_upper.set(dim, at.clone());
        let mut second_lower = self.lower.clone();
        second_lower.set(dim, at);
        (
            Zone::new(self.lower.clone(), first_upper),
            Zone::new(second_lower, self.upper.clone()),
        )
    }

    /// Splits on `dim` at the middle of the bound.
    ///
    /// # Panics
    ///
    /// If the bound on `dim` is too narrow to hold a middle strictly inside it.
    pub fn split(&self, dim: usize) -> (Zone, Zone) {
        let mid = self.lower[dim].middle(&self.upper[dim]);
        self.split_at(dim, mid)
    }

    /// True if `at` can be used with [`Zone::split_at`].
    pub fn can_split_at(&self, dim: usize, at: &Element) -> bool {
        at.kind() == self.lower[dim].kind() && self.strictly_inside(dim, at)
    }

    fn strictly_inside(&self, dim: usize, at: &Element) -> bool {
        if self.wraps(dim) {
            at != &self.lower[dim] && self.contains_element(dim, at)
        } else {
            &self.lower[dim] < at && at < &self.upper[dim]
        }
    }

    /// Inverse of a split: the union when the zones neighbor on one
    /// dimension and have identical bounds on every other.
    pub fn merge(&self, other: &Zone) -> Option<Zone> {
        let dim = self.neighbors(other)?;
        let same_elsewhere = (0..self.dimensions())
            .filter(|&d| d != dim)
            .all(|d| self.lower[d] == other.lower[d] && self.upper[d] == other.upper[d]);
        if !same_elsewhere {
            return None;
        }
        let (first, second) = if self.abuts(other, dim, Direction::Upper) { (self, other) } else { (other, self) };
        let mut upper = first.upper.clone();
        upper.set(dim, second.upper[dim].clone());
        Some(Zone::new(first.lower.clone(), upper))
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.lower, self.upper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const KINDS: [ElementKind; 4] = [ElementKind::String; 4];

    fn coord(parts: [&str; 4]) -> Coordinate {
        Coordinate::new(parts.map(Element::string))
    }

    #[test]
    fn test_full_zone_contains_everything() {
        let z = Zone::full(&KINDS);
        assert!(z.contains(&coord(["", "a", "\u{10FFFF}", "zzz"])));
    }

    #[test]
    fn test_split_bounds() {
        let z = Zone::full(&KINDS);
        let m = Element::string("m");
        let (a, b) = z.split_at(1, m.clone());
        assert_eq!(a.upper_bound(1), &m);
        assert_eq!(b.lower_bound(1), &m);
        assert_eq!(a.neighbors(&b), Some(1));
        assert_eq!(a.merge(&b), Some(z));
    }

    #[test]
    #[should_panic(expected = "outside")]
    fn test_split_outside_panics() {
        let (a, _) = Zone::full(&KINDS).split_at(0, Element::string("m"));
        a.split_at(0, Element::string("q"));
    }

    #[test]
    fn test_non_adjacent_zones() {
        let z = Zone::full(&KINDS);
        let (a, b) = z.split_at(0, Element::string("m"));
        let (a1, a2) = a.split_at(1, Element::string("m"));
        let (b1, b2) = b.split_at(1, Element::string("m"));
        assert_eq!(a1.neighbors(&b1), Some(0));
        assert_eq!(a1.neighbors(&a2), Some(1));
        // Diagonal: abuts on two dimensions.
        assert_eq!(a1.neighbors(&b2), None);
        assert_eq!(a1.merge(&b2), None);
    }

    #[test]
    fn test_wrapped_interval() {
        let lower = coord(["x", "", "", ""]);
        let upper = coord(["c", "\u{10FFFF}", "\u{10FFFF}", "\u{10FFFF}"]);
        let z = Zone::new(lower, upper);
        assert!(z.contains_element(0, &Element::string("y")));
        assert!(z.contains_element(0, &Element::string("a")));
        assert!(!z.contains_element(0, &Element::string("m")));
    }

    #[test]
    fn test_split_wrapped_interval() {
        let lower = coord(["x", "", "", ""]);
        let upper = coord(["c", "\u{10FFFF}", "\u{10FFFF}", "\u{10FFFF}"]);
        let z = Zone::new(lower, upper);
        assert!(!z.can_split_at(0, &Element::string("m")));
        assert!(!z.can_split_at(0, &Element::string("x")));

        let (high, low) = z.split_at(0, Element::string("y"));
        assert!(high.contains_element(0, &Element::string("x")));
        assert!(!high.contains_element(0, &Element::string("a")));
        assert!(low.contains_element(0, &Element::string("z")));
        assert!(low.contains_element(0, &Element::string("a")));

        let (wrapped, tail) = z.split_at(0, Element::string("b"));
        assert!(wrapped.contains_element(0, &Element::string("y")));
        assert!(wrapped.contains_element(0, &Element::string("a")));
        assert!(tail.contains_element(0, &Element::string("bb")));
        assert!(!tail.contains_element(0, &Element::string("y")));
    }

    #[test]
    fn test_split_at_middle() {
        let z = Zone::full(&KINDS);
        let (a, b) = z.split(3);
        assert_eq!(a.upper_bound(3), b.lower_bound(3));
        assert!(z.lower_bound(3) < a.upper_bound(3) && a.upper_bound(3) < z.upper_bound(3));
        assert_eq!(a.merge(&b), Some(z));
    }

    #[test]
    fn test_region_intersection() {
        let (a, b) = Zone::full(&KINDS).split_at(2, Element::string("m"));
        let region = Region::new([
            Bound::Any,
            Bound::Any,
            Bound::Exact(Element::string("urn:p")),
            Bound::Any,
        ]);
        assert!(!a.intersects(&region));
        assert!(b.intersects(&region));
        let range = Region::new([
            Bound::Any,
            Bound::Any,
            Bound::Range { lower: Element::string("a"), upper: Element::string("n") },
            Bound::Any,
        ]);
        assert!(a.intersects(&range) && b.intersects(&range));
    }

    fn word() -> impl Strategy<Value = String> {
        "[a-z]{0,4}"
    }

    proptest! {
        #[test]
        fn prop_split_partitions(dim in 0usize..4, m in "[b-y][a-z]{0,3}", c in proptest::array::uniform4(word())) {
            let z = Zone::full(&KINDS);
            let at = Element::string(&m);
            let (z1, z2) = z.split_at(dim, at.clone());
            prop_assert_eq!(z1.upper_bound(dim), &at);
            prop_assert_eq!(z2.lower_bound(dim), &at);
            prop_assert_eq!(z1.merge(&z2), Some(z.clone()));

            let point = Coordinate::new(c.iter().map(|s| Element::string(s)));
            prop_assert!(z.contains(&point));
            prop_assert!(z1.contains(&point) ^ z2.contains(&point));

            let (h1, h2) = z1.split(dim);
            prop_assert_eq!(h1.upper_bound(dim), h2.lower_bound(dim));
            prop_assert_eq!(h1.merge(&h2), Some(z1.clone()));
            if z1.contains(&point) {
                prop_assert!(h1.contains(&point) ^ h2.contains(&point));
            }
        }
    }
}
