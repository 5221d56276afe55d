//! Neighbor table: per dimension and direction, the peers bordering the
//! local zone together with their last known zone.

use hashbrown::HashMap;

use crate::geometry::{Direction, Zone};
use super::PeerId;

/// A neighbor and the zone it was last seen owning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborEntry {
    pub peer: PeerId,
    pub zone: Zone,
}

/// Neighbors indexed by `[dimension][direction]`.
///
/// Entries are best effort: a concurrent split elsewhere can leave a stale
/// zone here until the owner sends an update.
#[derive(Debug, Clone)]
pub struct NeighborTable {
    entries: Vec<[HashMap<PeerId, Zone>; 2]>,
}

impl NeighborTable {
    pub fn new(dimensions: usize) -> Self {
        Self {
            entries: (0..dimensions).map(|_| [HashMap::new(), HashMap::new()]).collect(),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.entries.len()
    }

    pub fn add(&mut self, dim: usize, direction: Direction, peer: PeerId, zone: Zone) {
        self.entries[dim][direction.index()].insert(peer, zone);
    }

    pub fn get(&self, peer: PeerId) -> Option<NeighborEntry> {
        self.iter().find(|e| e.peer == peer)
    }

    /// Removes the peer from every slot. Returns whether it was present.
    pub fn remove(&mut self, peer: PeerId) -> bool {
        let mut removed = false;
        for slots in &mut self.entries {
            for slot in slots.iter_mut() {
                removed |= slot.remove(&peer).is_some();
            }
        }
        removed
    }

    pub fn contains(&self, peer: PeerId) -> bool {
        self.entries
            .iter()
            .any(|slots| slots.iter().any(|slot| slot.contains_key(&peer)))
    }

    pub fn find_dimension_and_direction(&self, peer: PeerId) -> Option<(usize, Direction)> {
        for (dim, slots) in self.entries.iter().enumerate() {
            for direction in Direction::BOTH {
                if slots[direction.index()].contains_key(&peer) {
                    return Some((dim, direction));
                }
            }
        }
        None
    }

    /// Neighbors on one side of the local zone, sorted by peer id.
    pub fn in_direction(&self, dim: usize, direction: Direction) -> Vec<NeighborEntry> {
        let mut out: Vec<NeighborEntry> = self.entries[dim][direction.index()]
            .iter()
            .map(|(peer, zone)| NeighborEntry { peer: *peer, zone: zone.clone() })
            .collect();
        out.sort_by_key(|e| e.peer);
        out
    }

    /// Every entry, sorted by dimension, direction then peer id.
    pub fn iter(&self) -> impl Iterator<Item = NeighborEntry> + '_ {
        (0..self.dimensions()).flat_map(move |dim| {
            Direction::BOTH
                .into_iter()
                .flat_map(move |direction| self.in_direction(dim, direction))
        })
    }

    /// Entries with their slot, sorted like [`NeighborTable::iter`].
    pub fn slots(&self) -> Vec<(usize, Direction, NeighborEntry)> {
        let mut out = Vec::new();
        for dim in 0..self.dimensions() {
            for direction in Direction::BOTH {
                for entry in self.in_direction(dim, direction) {
                    out.push((dim, direction, entry));
                }
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .map(|slots| slots[0].len() + slots[1].len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Re-files `peer` after either side's zone changed: it is placed in the
    /// slot where it now borders `local`, or dropped if it no longer does.
    /// Returns whether the peer is still a neighbor.
    pub fn update(&mut self, local: &Zone, peer: PeerId, zone: Zone) -> bool {
        self.remove(peer);
        match local.neighbors(&zone) {
            Some(dim) => {
                let direction = local.direction_of(&zone, dim);
                self.add(dim, direction, peer, zone);
                true
            }
            None => false,
        }
    }

    /// Re-validates every entry against a new local zone, dropping those
    /// that no longer border it.
    pub fn refresh(&mut self, local: &Zone) -> Vec<PeerId> {
        let mut dropped = Vec::new();
        for entry in self.iter().collect::<Vec<_>>() {
            if !self.update(local, entry.peer, entry.zone) {
                dropped.push(entry.peer);
            }
        }
        dropped
    }

    /// A neighbor whose zone merges with `local` into one zone.
    pub fn mergeable_neighbor(&self, local: &Zone) -> Option<NeighborEntry> {
        self.iter().find(|e| local.merge(&e.zone).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Element, ElementKind};

    const KINDS: [ElementKind; 2] = [ElementKind::String; 2];

    #[test]
    fn test_add_get_remove() {
        let (a, b) = Zone::full(&KINDS).split_at(0, Element::string("m"));
        let mut table = NeighborTable::new(2);
        table.add(0, Direction::Upper, PeerId(2), b.clone());
        assert_eq!(table.len(), 1);
        assert!(table.contains(PeerId(2)));
        assert_eq!(table.find_dimension_and_direction(PeerId(2)), Some((0, Direction::Upper)));
        assert_eq!(table.get(PeerId(2)).unwrap().zone, b);
        assert_eq!(table.mergeable_neighbor(&a).map(|e| e.peer), Some(PeerId(2)));
        assert!(table.remove(PeerId(2)));
        assert!(table.is_empty());
    }

    #[test]
    fn test_update_refiles_or_drops() {
        let (a, b) = Zone::full(&KINDS).split_at(0, Element::string("m"));
        let (b1, b2) = b.split_at(1, Element::string("m"));
        let mut table = NeighborTable::new(2);
        assert!(table.update(&a, PeerId(2), b.clone()));
        assert!(table.update(&a, PeerId(2), b1.clone()));
        assert_eq!(table.find_dimension_and_direction(PeerId(2)), Some((0, Direction::Upper)));

        let (a1, _) = a.split_at(1, Element::string("m"));
        table.add(0, Direction::Upper, PeerId(3), b2);
        let dropped = table.refresh(&a1);
        assert_eq!(dropped, vec![PeerId(3)]);
        assert!(table.contains(PeerId(2)));
    }
}
