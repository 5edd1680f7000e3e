//! Orbit Interest Library
//!
//! Server-side interest management: decides, per observer and per tick,
//! which entities are replicated and encodes them as JSON deltas.
//!
//! # Features
//!
//! - `metrics_extended` - Per-cell density distribution in the metrics export (enabled by default)

pub mod config;
pub mod entity;
pub mod grid;
pub mod metrics;
pub mod net;
pub mod performance;
pub mod sim;
pub mod util;
pub mod visibility;
