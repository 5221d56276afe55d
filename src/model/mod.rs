//! # RDF Model
//!
//! Clean DTOs for the facts and solutions that cross every boundary:
//! client ↔ overlay ↔ peer ↔ subscriber.
//!
//! Design rule: no geometry, no routing, no async here.
//! This module is pure data.

pub mod term;
pub mod quadruple;
pub mod binding;

pub use term::Term;
pub use quadruple::{Quadruple, QuadruplePattern, CompoundEvent};
pub use binding::Binding;
