//! Ordered, splittable coordinate elements.
//!
//! | Kind | Representation | `middle` |
//! |------|----------------|----------|
//! | `String` | base-0x110000 fraction `d0.d1d2…` of code points | exact add-with-carry then halve |
//! | `Numeric` | fixed-point decimal, 6 fractional digits | floor average |
//!
//! Both kinds live in a half-open space `[min, max)`. Comparing or averaging
//! elements of different kinds is a programming error and panics.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Radix of a string element digit: one past the last Unicode code point.
pub const RADIX: u32 = 0x11_0000;

/// Number of digits used when projecting a string element to `f64`.
const F64_DIGITS: usize = 3;

// ============================================================================
// ElementKind
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    String,
    Numeric,
}

impl ElementKind {
    /// Inclusive lower bound of the space for this kind.
    pub fn min(self) -> Element {
        match self {
            ElementKind::String => Element::String(StringElement::MIN),
            ElementKind::Numeric => Element::Numeric(Decimal::MIN),
        }
    }

    /// Exclusive upper bound of the space for this kind.
    pub fn max(self) -> Element {
        match self {
            ElementKind::String => Element::String(StringElement::max()),
            ElementKind::Numeric => Element::Numeric(Decimal::MAX),
        }
    }

    /// Maps a value in `[0, 1)` onto this kind's space.
    pub fn from_unit(self, unit: f64) -> Element {
        let unit = if unit.is_finite() { unit.clamp(0.0, 1.0) } else { 0.0 };
        match self {
            ElementKind::String => Element::String(StringElement::from_f64(unit)),
            ElementKind::Numeric => {
                let span = (Decimal::MAX.units - Decimal::MIN.units) as f64;
                let units = Decimal::MIN.units + (unit * span) as i128;
                Element::Numeric(Decimal { units: units.min(Decimal::MAX.units - 1) })
            }
        }
    }
}

// ============================================================================
// StringElement
// ============================================================================

/// A string as a fraction of code points.
///
/// `digits[0]` is the integer part (0 for every real string, 1 only for the
/// space upper bound), the remaining digits are code points. Trailing zero
/// digits are always stripped, which makes the derived lexicographic `Vec`
/// order identical to numeric order and to code-point string order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StringElement {
    digits: Vec<u32>,
}

impl StringElement {
    /// The empty string, lower bound of the space.
    pub const MIN: StringElement = StringElement { digits: Vec::new() };

    /// `1.0`, exclusive upper bound of the space.
    pub fn max() -> Self {
        Self { digits: vec![1] }
    }

    pub fn new(s: &str) -> Self {
        let mut digits = Vec::with_capacity(s.chars().count() + 1);
        digits.push(0);
        digits.extend(s.chars().map(|c| c as u32));
        Self::canonical(digits)
    }

    fn canonical(mut digits: Vec<u32>) -> Self {
        while digits.last() == Some(&0) {
            digits.pop();
        }
        Self { digits }
    }

    fn digit(&self, i: usize) -> u32 {
        self.digits.get(i).copied().unwrap_or(0)
    }

    /// Code points after the integer digit.
    pub fn code_points(&self) -> &[u32] {
        self.digits.get(1..).unwrap_or(&[])
    }

    /// Exact sum. The integer digit may reach 2 or 3.
    fn add(&self, other: &Self) -> Vec<u32> {
        let len = self.digits.len().max(other.digits.len()).max(1);
        let mut out = vec![0u32; len];
        let mut carry = 0u64;
        for i in (0..len).rev() {
            let sum = self.digit(i) as u64 + other.digit(i) as u64 + carry;
            if i == 0 {
                out[0] = sum as u32;
            } else {
                out[i] = (sum % RADIX as u64) as u32;
                carry = sum / RADIX as u64;
            }
        }
        out
    }

    /// Exact halving. `RADIX` is even so at most one extra digit appears.
    fn halve(digits: &[u32]) -> Vec<u32> {
        let mut out = Vec::with_capacity(digits.len() + 1);
        let mut rem = 0u64;
        for &d in digits {
            let cur = rem * RADIX as u64 + d as u64;
            out.push((cur / 2) as u32);
            rem = cur % 2;
        }
        if rem == 1 {
            out.push(RADIX / 2);
        }
        out
    }

    /// `a ≤ m < b` for `a < b`; the circular midpoint when `a > b`.
    pub fn middle(&self, other: &Self) -> Self {
        match self.cmp(other) {
            Ordering::Equal => self.clone(),
            Ordering::Less => Self::canonical(Self::halve(&self.add(other))),
            Ordering::Greater => {
                // Walk from `self` up through the wrap point to `other`.
                let mut sum = self.add(other);
                sum[0] += 1;
                let mut half = Self::halve(&sum);
                if half[0] >= 1 {
                    half[0] -= 1;
                }
                Self::canonical(half)
            }
        }
    }

    pub fn to_f64(&self) -> f64 {
        let mut value = self.digit(0) as f64;
        let mut scale = 1.0;
        for i in 1..=F64_DIGITS {
            scale /= RADIX as f64;
            value += self.digit(i) as f64 * scale;
        }
        value
    }

    pub fn from_f64(value: f64) -> Self {
        if value >= 1.0 {
            return Self::max();
        }
        let mut rest = value.max(0.0);
        let mut digits = vec![0u32];
        for _ in 0..F64_DIGITS {
            rest *= RADIX as f64;
            let d = rest.floor().min((RADIX - 1) as f64);
            digits.push(d as u32);
            rest -= d;
        }
        Self::canonical(digits)
    }
}

impl fmt::Display for StringElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.digit(0) != 0 {
            return write!(f, "\\u{{{:x}}}", RADIX);
        }
        for &cp in self.code_points() {
            match char::from_u32(cp) {
                Some(c) if !c.is_control() => write!(f, "{c}")?,
                _ => write!(f, "\\u{{{cp:x}}}")?,
            }
        }
        Ok(())
    }
}

// ============================================================================
// Decimal
// ============================================================================

const DECIMAL_SCALE: i128 = 1_000_000;

/// Fixed-point decimal with six fractional digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Decimal {
    units: i128,
}

impl Decimal {
    pub const MIN: Decimal = Decimal { units: -1_000_000_000_000_000 * DECIMAL_SCALE };
    pub const MAX: Decimal = Decimal { units: 1_000_000_000_000_000 * DECIMAL_SCALE };

    pub fn from_units(units: i128) -> Self {
        Self { units }
    }

    pub fn units(self) -> i128 {
        self.units
    }

    /// Parses `[-+]digits[.digits]`, truncating beyond six fractional digits
    /// and clamping into `[MIN, MAX)`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let (negative, body) = match s.as_bytes().first()? {
            b'-' => (true, &s[1..]),
            b'+' => (false, &s[1..]),
            _ => (false, s),
        };
        let (int_part, frac_part) = body.split_once('.').unwrap_or((body, ""));
        if int_part.is_empty() && frac_part.is_empty() {
            return None;
        }
        if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
            return None;
        }
        let mut units: i128 = 0;
        for b in int_part.bytes() {
            units = units.saturating_mul(10).saturating_add((b - b'0') as i128);
        }
        units = units.saturating_mul(DECIMAL_SCALE);
        let mut scale = DECIMAL_SCALE / 10;
        for b in frac_part.bytes().take(6) {
            units += (b - b'0') as i128 * scale;
            scale /= 10;
        }
        if negative {
            units = -units;
        }
        Some(Self { units: units.clamp(Self::MIN.units, Self::MAX.units - 1) })
    }

    pub fn from_f64(value: f64) -> Self {
        let units = (value * DECIMAL_SCALE as f64) as i128;
        Self { units: units.clamp(Self::MIN.units, Self::MAX.units - 1) }
    }

    pub fn to_f64(self) -> f64 {
        self.units as f64 / DECIMAL_SCALE as f64
    }

    pub fn middle(self, other: Self) -> Self {
        match self.cmp(&other) {
            Ordering::Equal => self,
            Ordering::Less => Self { units: (self.units + other.units).div_euclid(2) },
            Ordering::Greater => {
                let span = Self::MAX.units - Self::MIN.units;
                let mut mid = (self.units + other.units + span).div_euclid(2);
                if mid >= Self::MAX.units {
                    mid -= span;
                }
                Self { units: mid }
            }
        }
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.units < 0 { "-" } else { "" };
        let abs = self.units.unsigned_abs();
        let int = abs / DECIMAL_SCALE as u128;
        let frac = abs % DECIMAL_SCALE as u128;
        if frac == 0 {
            write!(f, "{sign}{int}")
        } else {
            let frac = format!("{frac:06}");
            write!(f, "{sign}{int}.{}", frac.trim_end_matches('0'))
        }
    }
}

// ============================================================================
// Element
// ============================================================================

/// A coordinate component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Element {
    String(StringElement),
    Numeric(Decimal),
}

impl Element {
    pub fn string(s: &str) -> Self {
        Element::String(StringElement::new(s))
    }

    pub fn numeric(value: f64) -> Self {
        Element::Numeric(Decimal::from_f64(value))
    }

    pub fn kind(&self) -> ElementKind {
        match self {
            Element::String(_) => ElementKind::String,
            Element::Numeric(_) => ElementKind::Numeric,
        }
    }

    /// Value lying between `self` and `other`, see [`StringElement::middle`].
    ///
    /// # Panics
    ///
    /// If the two elements are of different kinds.
    pub fn middle(&self, other: &Element) -> Element {
        match (self, other) {
            (Element::String(a), Element::String(b)) => Element::String(a.middle(b)),
            (Element::Numeric(a), Element::Numeric(b)) => Element::Numeric(a.middle(*b)),
            (a, b) => panic!("cannot compute middle of {:?} and {:?} elements", a.kind(), b.kind()),
        }
    }

    /// Position of the element in its space, mapped to `[0, 1)`.
    pub fn to_unit(&self) -> f64 {
        match self {
            Element::String(s) => s.to_f64(),
            Element::Numeric(d) => {
                let span = (Decimal::MAX.units - Decimal::MIN.units) as f64;
                (d.units - Decimal::MIN.units) as f64 / span
            }
        }
    }

    /// Raw numeric value used by the split estimator.
    pub fn to_f64(&self) -> f64 {
        match self {
            Element::String(s) => s.to_f64(),
            Element::Numeric(d) => d.to_f64(),
        }
    }

    pub fn from_f64(kind: ElementKind, value: f64) -> Element {
        match kind {
            ElementKind::String => Element::String(StringElement::from_f64(value)),
            ElementKind::Numeric => Element::Numeric(Decimal::from_f64(value)),
        }
    }
}

impl PartialOrd for Element {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Element {
    /// # Panics
    ///
    /// If the two elements are of different kinds.
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Element::String(a), Element::String(b)) => a.cmp(b),
            (Element::Numeric(a), Element::Numeric(b)) => a.cmp(b),
            (a, b) => panic!("cannot compare {:?} and {:?} elements", a.kind(), b.kind()),
        }
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Element::String(s) => write!(f, "{s}"),
            Element::Numeric(d) => write!(f, "{d}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_string_order_is_code_point_order() {
        // U+FF21 sorts before U+1F600 although its UTF-16 form would not.
        let a = Element::string("\u{FF21}");
        let b = Element::string("\u{1F600}");
        assert!(a < b);
        assert!(Element::string("ab") < Element::string("abc"));
        assert!(Element::string("abc") < Element::string("abd"));
        assert!(Element::string("") < Element::string("a"));
    }

    #[test]
    fn test_string_middle_simple() {
        let a = StringElement::new("a");
        let c = StringElement::new("c");
        assert_eq!(a.middle(&c), StringElement::new("b"));
    }

    #[test]
    fn test_string_middle_adjacent_extends() {
        let a = StringElement::new("a");
        let b = StringElement::new("b");
        let m = a.middle(&b);
        assert!(a < m && m < b);
        assert_eq!(m.code_points(), &['a' as u32, RADIX / 2]);
    }

    #[test]
    fn test_string_middle_of_space() {
        let m = StringElement::MIN.middle(&StringElement::max());
        assert_eq!(m.code_points(), &[RADIX / 2]);
    }

    #[test]
    fn test_string_middle_circular() {
        let a = StringElement::new("y");
        let b = StringElement::new("b");
        let m = a.middle(&b);
        assert!(m >= a || m < b);
    }

    #[test]
    fn test_decimal_parse_and_display() {
        assert_eq!(Decimal::parse("12.5").unwrap().to_string(), "12.5");
        assert_eq!(Decimal::parse("-3").unwrap().to_string(), "-3");
        assert_eq!(Decimal::parse("0.1234567").unwrap().to_string(), "0.123456");
        assert!(Decimal::parse("abc").is_none());
        assert!(Decimal::parse(".").is_none());
    }

    #[test]
    fn test_decimal_middle() {
        let a = Decimal::parse("1").unwrap();
        let b = Decimal::parse("2").unwrap();
        assert_eq!(a.middle(b).to_string(), "1.5");
    }

    #[test]
    #[should_panic(expected = "cannot compare")]
    fn test_mixed_kinds_panic() {
        let _ = Element::string("a") < Element::numeric(1.0);
    }

    #[test]
    fn test_f64_projection_round_trip_order() {
        let low = StringElement::from_f64(0.25);
        let high = StringElement::from_f64(0.75);
        assert!(low < high);
        assert!((low.to_f64() - 0.25).abs() < 1e-9);
    }

    fn string_strategy() -> impl Strategy<Value = String> {
        proptest::collection::vec(proptest::char::any(), 0..6).prop_map(|v| v.into_iter().collect())
    }

    proptest! {
        #[test]
        fn prop_string_middle_in_half_open_interval(a in string_strategy(), b in string_strategy()) {
            let (a, b) = (StringElement::new(&a), StringElement::new(&b));
            prop_assume!(a != b);
            let (lo, hi) = if a < b { (a, b) } else { (b, a) };
            let m = lo.middle(&hi);
            prop_assert!(lo <= m);
            prop_assert!(m < hi);
        }

        #[test]
        fn prop_decimal_middle_in_half_open_interval(a in -1_000_000i64..1_000_000, b in -1_000_000i64..1_000_000) {
            prop_assume!(a != b);
            let (lo, hi) = (Decimal::from_units(a.min(b) as i128), Decimal::from_units(a.max(b) as i128));
            let m = lo.middle(hi);
            prop_assert!(lo <= m && m < hi);
        }
    }
}
