//! # Coordinate Geometry
//!
//! Elements, coordinates, regions and zones of the CAN space, plus the
//! mapping from RDF content onto that space. Pure values, no I/O.

pub mod element;
pub mod coordinate;
pub mod zone;
pub mod semantic;

pub use element::{Decimal, Element, ElementKind, StringElement};
pub use coordinate::{Bound, Coordinate, Region};
pub use zone::{Containment, Direction, Zone};
pub use semantic::{DopingFunction, SemanticMapper, SEMANTIC_DIMENSIONS};
