//! Per-observer replication
//!
//! - `aoi`: the interest pipeline (grid, visibility, encoding)
//! - `delta`: JSON delta codec
//! - `snapshot`: world state as seen by one observer

pub mod aoi;
pub mod delta;
pub mod snapshot;

pub use aoi::{InterestError, InterestManager};
pub use delta::{apply_delta, CompressionLevel, CompressionOptions, CompressionStats, DeltaCodec, DeltaUpdate};
