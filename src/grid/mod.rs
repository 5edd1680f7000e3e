//! Adaptive spatial partitioning
//!
//! - `spatial`: variable-size cells with single ownership per entity
//! - `density`: hotspot/coldspot classification against mean occupancy
//! - `sizing`: smoothed target sizes fed back into the index

pub mod density;
pub mod sizing;
pub mod spatial;

pub use density::{DensityAnalyzer, DensitySample};
pub use sizing::{GridConfiguration, GridSizeController, ResizeOutcome};
pub use spatial::{CellBounds, CellKey, GridCell, LatticeSlot, SpatialIndex, SpatialIndexStats};
