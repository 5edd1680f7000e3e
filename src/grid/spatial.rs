//! Variable-size spatial grid for interest queries
//!
//! Cells are identified by an allocated key. Each cell is anchored at the
//! corner of one default-lattice slot and keeps that origin when resized,
//! so every lookup checks a cell's *own* bounds.
//! - Quick lookup through the slot owner (oldest live cell anchored there)
//! - Linear scan of all cells when the quick lookup misses
//! - A default-sized cell is created only when no existing cell contains
//!   the position; it covers the whole slot, so sizes never leave
//!   `[min, max]`
//!
//! Neighbor and radius queries scan every cell (O(cells)). This is the
//! dominant cost once sizes diverge.

use hashbrown::{HashMap, HashSet};
use smallvec::SmallVec;
use tracing::debug;

use crate::entity::EntityId;
use crate::util::Vec2;

// ============================================================================
// Constants
// ============================================================================

/// Initial capacity for the cell map
const GRID_INITIAL_CAPACITY: usize = 256;

/// Allocated cell identifier, never reused
pub type CellKey = u64;

/// (x, y) coordinates of a default-size lattice slot
pub type LatticeSlot = (i32, i32);

/// Inline storage for neighbor lists (8 on a uniform lattice)
pub type NeighborList = SmallVec<[CellKey; 16]>;

// ============================================================================
// Cells
// ============================================================================

/// Axis-aligned cell bounds, `[min, max)` for containment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellBounds {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

impl CellBounds {
    #[inline]
    pub fn contains(&self, p: Vec2) -> bool {
        p.x >= self.min_x && p.x < self.max_x && p.y >= self.min_y && p.y < self.max_y
    }

    /// Closed-interval overlap in both axes (sharing an edge counts)
    #[inline]
    pub fn touches(&self, other: &CellBounds) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    #[inline]
    fn intersects_square(&self, center: Vec2, half: f32) -> bool {
        self.min_x <= center.x + half
            && center.x - half <= self.max_x
            && self.min_y <= center.y + half
            && center.y - half <= self.max_y
    }
}

#[derive(Debug, Clone)]
pub struct GridCell {
    key: CellKey,
    slot: LatticeSlot,
    /// Minimum corner, fixed for the cell's lifetime
    origin: Vec2,
    width: f32,
    height: f32,
    entities: HashSet<EntityId>,
}

impl GridCell {
    fn new(key: CellKey, slot: LatticeSlot, origin: Vec2, size: f32) -> Self {
        Self {
            key,
            slot,
            origin,
            width: size,
            height: size,
            entities: HashSet::new(),
        }
    }

    pub fn key(&self) -> CellKey {
        self.key
    }

    /// Default-lattice slot this cell is anchored at
    pub fn slot(&self) -> LatticeSlot {
        self.slot
    }

    pub fn origin(&self) -> Vec2 {
        self.origin
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn bounds(&self) -> CellBounds {
        CellBounds {
            min_x: self.origin.x,
            min_y: self.origin.y,
            max_x: self.origin.x + self.width,
            max_y: self.origin.y + self.height,
        }
    }

    #[inline]
    pub fn contains(&self, p: Vec2) -> bool {
        self.bounds().contains(p)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityId> {
        self.entities.iter()
    }
}

/// Slot of the `size` lattice containing `p`.
/// Corrects for float rounding at cell edges.
fn lattice_slot(p: Vec2, size: f32) -> LatticeSlot {
    fn axis(v: f32, size: f32) -> i32 {
        let mut k = (v / size).floor() as i32;
        if (k as f32) * size > v {
            k -= 1;
        } else if ((k + 1) as f32) * size <= v {
            k += 1;
        }
        k
    }
    (axis(p.x, size), axis(p.y, size))
}

#[derive(Debug, Clone, Copy)]
struct Membership {
    cell: CellKey,
    position: Vec2,
}

// ============================================================================
// Spatial Index
// ============================================================================

/// Adaptive spatial grid with single-cell ownership per entity
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    default_cell_size: f32,
    cells: HashMap<CellKey, GridCell>,
    /// Slot -> lowest-keyed live cell anchored there
    lattice: HashMap<LatticeSlot, CellKey>,
    next_key: CellKey,
    /// Reverse index: entity -> owning cell and last known position
    members: HashMap<EntityId, Membership>,
}

impl SpatialIndex {
    pub fn new(default_cell_size: f32) -> Self {
        Self {
            default_cell_size,
            cells: HashMap::with_capacity(GRID_INITIAL_CAPACITY),
            lattice: HashMap::with_capacity(GRID_INITIAL_CAPACITY),
            next_key: 0,
            members: HashMap::new(),
        }
    }

    pub fn default_cell_size(&self) -> f32 {
        self.default_cell_size
    }

    /// Existing cell containing `position`, without creating one.
    ///
    /// The slot owner wins when it contains the position; otherwise the
    /// lowest key among overlapping cells.
    pub fn find_cell(&self, position: Vec2) -> Option<CellKey> {
        let slot = lattice_slot(position, self.default_cell_size);
        if let Some(cell) = self.lattice.get(&slot).and_then(|key| self.cells.get(key)) {
            if cell.contains(position) {
                return Some(cell.key);
            }
        }
        self.cells
            .values()
            .filter(|cell| cell.contains(position))
            .map(|cell| cell.key)
            .min()
    }

    /// Cell containing `position`, creating a default-sized one if none
    /// exists. For finite positions the returned cell contains the position.
    pub fn cell_for(&mut self, position: Vec2) -> CellKey {
        if let Some(key) = self.find_cell(position) {
            return key;
        }
        let slot = lattice_slot(position, self.default_cell_size);
        self.create_cell(slot)
    }

    /// Default-sized cell covering `slot`, overlapping any resized cells
    /// already anchored or reaching there
    fn create_cell(&mut self, slot: LatticeSlot) -> CellKey {
        let d = self.default_cell_size;
        let key = self.next_key;
        self.next_key += 1;

        let origin = Vec2::new(slot.0 as f32 * d, slot.1 as f32 * d);
        self.cells.insert(key, GridCell::new(key, slot, origin, d));
        if let Some(owner) = self.lattice.get(&slot) {
            debug!(
                "Cell #{} fills the gap left by resized cell #{} at ({},{})",
                key, owner, slot.0, slot.1
            );
        } else {
            self.lattice.insert(slot, key);
        }
        key
    }

    /// Move an entity to the cell for its current position
    pub fn assign(&mut self, id: EntityId, position: Vec2) -> CellKey {
        let key = self.cell_for(position);
        if let Some(previous) = self.members.insert(id, Membership { cell: key, position }) {
            if previous.cell == key {
                return key;
            }
            if let Some(cell) = self.cells.get_mut(&previous.cell) {
                cell.entities.remove(&id);
            }
        }
        if let Some(cell) = self.cells.get_mut(&key) {
            cell.entities.insert(id);
        }
        key
    }

    /// Returns false if the entity was not indexed
    pub fn remove(&mut self, id: EntityId) -> bool {
        match self.members.remove(&id) {
            Some(membership) => {
                if let Some(cell) = self.cells.get_mut(&membership.cell) {
                    cell.entities.remove(&id);
                }
                true
            }
            None => false,
        }
    }

    pub fn cell_of(&self, id: EntityId) -> Option<CellKey> {
        self.members.get(&id).map(|m| m.cell)
    }

    pub fn contains_entity(&self, id: EntityId) -> bool {
        self.members.contains_key(&id)
    }

    pub fn entity_ids(&self) -> impl Iterator<Item = &EntityId> {
        self.members.keys()
    }

    /// Cells whose bounds overlap or touch `key`'s bounds in both axes
    pub fn neighbors_of(&self, key: CellKey) -> NeighborList {
        let mut neighbors = NeighborList::new();
        let Some(cell) = self.cells.get(&key) else {
            return neighbors;
        };
        let bounds = cell.bounds();
        for other in self.cells.values() {
            if other.key != key && bounds.touches(&other.bounds()) {
                neighbors.push(other.key);
            }
        }
        neighbors.sort_unstable();
        neighbors
    }

    /// Entities in the cell containing `position` and its neighbors
    pub fn entities_near(&self, position: Vec2) -> Vec<EntityId> {
        let Some(key) = self.find_cell(position) else {
            return Vec::new();
        };
        let mut result = Vec::new();
        for k in std::iter::once(key).chain(self.neighbors_of(key)) {
            if let Some(cell) = self.cells.get(&k) {
                result.extend(cell.entities.iter().copied());
            }
        }
        result
    }

    /// Entities in every cell intersecting the square of half-width `radius`
    /// around `position`. Candidates only; callers filter by exact distance.
    pub fn query_radius(&self, position: Vec2, radius: f32) -> Vec<EntityId> {
        let mut result = Vec::new();
        for cell in self.cells.values() {
            if !cell.entities.is_empty() && cell.bounds().intersects_square(position, radius) {
                result.extend(cell.entities.iter().copied());
            }
        }
        result
    }

    pub fn cell(&self, key: CellKey) -> Option<&GridCell> {
        self.cells.get(&key)
    }

    pub fn cells(&self) -> impl Iterator<Item = &GridCell> {
        self.cells.values()
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn entity_count(&self) -> usize {
        self.members.len()
    }

    /// Change a cell's size; membership is stale until `redistribute`
    pub fn resize_cell(&mut self, key: CellKey, width: f32, height: f32) -> bool {
        match self.cells.get_mut(&key) {
            Some(cell) if width > 0.0 && height > 0.0 => {
                cell.width = width;
                cell.height = height;
                true
            }
            _ => false,
        }
    }

    /// Clear every cell and reinsert all entities against current bounds.
    /// Cells left empty afterwards are dropped. Returns the dropped count.
    pub fn redistribute(&mut self) -> usize {
        let mut entities: Vec<(EntityId, Vec2)> = self
            .members
            .iter()
            .map(|(id, m)| (*id, m.position))
            .collect();
        // Stable key allocation for cells created while reinserting
        entities.sort_unstable_by_key(|(id, _)| *id);

        for cell in self.cells.values_mut() {
            cell.entities.clear();
        }
        self.members.clear();

        for (id, position) in entities {
            self.assign(id, position);
        }

        let before = self.cells.len();
        self.cells.retain(|_, cell| !cell.entities.is_empty());
        self.rebuild_lattice();
        before - self.cells.len()
    }

    fn rebuild_lattice(&mut self) {
        let mut anchored: Vec<(CellKey, LatticeSlot)> = self.cells.values().map(|c| (c.key, c.slot)).collect();
        anchored.sort_unstable();
        self.lattice.clear();
        for (key, slot) in anchored {
            self.lattice.entry(slot).or_insert(key);
        }
    }

    /// Get statistics about the grid
    pub fn stats(&self) -> SpatialIndexStats {
        let d = self.default_cell_size;
        SpatialIndexStats {
            cell_count: self.cells.len(),
            non_empty_cells: self.cells.values().filter(|c| !c.is_empty()).count(),
            total_entities: self.members.len(),
            max_per_cell: self.cells.values().map(|c| c.len()).max().unwrap_or(0),
            resized_cells: self
                .cells
                .values()
                .filter(|c| c.width != d || c.height != d)
                .count(),
        }
    }
}

/// Statistics about the spatial index
#[derive(Debug, Clone, Default)]
pub struct SpatialIndexStats {
    pub cell_count: usize,
    pub non_empty_cells: usize,
    pub total_entities: usize,
    pub max_per_cell: usize,
    pub resized_cells: usize,
}
