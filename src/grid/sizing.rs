//! Self-tuning cell sizes
//!
//! Hotspot cells shrink and coldspot cells grow toward a smoothed target,
//! then every entity is reinserted against the new bounds.

use tracing::{debug, info};

use super::density::DensityAnalyzer;
use super::spatial::SpatialIndex;
use crate::config::{ConfigError, GridSettings};

/// Floor for a single shrink step, as a fraction of the current size
const MAX_SHRINK_FACTOR: f32 = 0.5;

/// Size bounds, density thresholds and smoothing for adaptive cells
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridConfiguration {
    min_size: f32,
    max_size: f32,
    low_threshold: f32,
    high_threshold: f32,
    adaptation_rate: f32,
}

impl GridConfiguration {
    pub fn new(
        min_size: f32,
        max_size: f32,
        low_threshold: f32,
        high_threshold: f32,
        adaptation_rate: f32,
    ) -> Result<Self, ConfigError> {
        if min_size <= 0.0 || min_size > max_size {
            return Err(ConfigError::InvalidCellSizeBounds {
                min: min_size,
                max: max_size,
            });
        }
        if low_threshold <= 0.0 || low_threshold >= high_threshold {
            return Err(ConfigError::InvalidDensityThresholds {
                low: low_threshold,
                high: high_threshold,
            });
        }
        if !(adaptation_rate > 0.0 && adaptation_rate <= 1.0) {
            return Err(ConfigError::InvalidAdaptationRate(adaptation_rate));
        }
        Ok(Self {
            min_size,
            max_size,
            low_threshold,
            high_threshold,
            adaptation_rate,
        })
    }

    pub fn from_settings(settings: &GridSettings) -> Result<Self, ConfigError> {
        Self::new(
            settings.min_cell_size,
            settings.max_cell_size,
            settings.low_density_threshold,
            settings.high_density_threshold,
            settings.adaptation_rate,
        )
    }

    pub fn min_size(&self) -> f32 {
        self.min_size
    }

    pub fn max_size(&self) -> f32 {
        self.max_size
    }

    /// Next size for a cell of `current` size holding `density` entities.
    ///
    /// Sparse cells scale up in proportion to the shortfall, dense cells
    /// scale down in proportion to the excess (never below half the current
    /// size), the step is blended by the adaptation rate and clamped.
    pub fn target_size(&self, density: f32, current: f32) -> f32 {
        let target = if density < self.low_threshold {
            current * (1.0 + (self.low_threshold - density) / self.low_threshold)
        } else if density > self.high_threshold {
            let factor = 1.0 - (density - self.high_threshold) / (density * 2.0);
            current * factor.max(MAX_SHRINK_FACTOR)
        } else {
            current
        };
        let blended = current + (target - current) * self.adaptation_rate;
        blended.clamp(self.min_size, self.max_size)
    }
}

/// Outcome of one resize pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResizeOutcome {
    pub shrunk: usize,
    pub grown: usize,
    /// Cells dropped because they were empty after redistribution
    pub pruned: usize,
}

impl ResizeOutcome {
    pub fn resized(&self) -> usize {
        self.shrunk + self.grown
    }
}

/// Applies density-driven resizes to a spatial index on an interval
#[derive(Debug, Clone)]
pub struct GridSizeController {
    config: GridConfiguration,
    resize_interval_ms: u64,
    last_resize_ms: Option<u64>,
    /// Analysis generation most recently acted on
    applied_generation: Option<u64>,
}

impl GridSizeController {
    pub fn new(config: GridConfiguration, resize_interval_ms: u64) -> Self {
        Self {
            config,
            resize_interval_ms,
            last_resize_ms: None,
            applied_generation: None,
        }
    }

    pub fn config(&self) -> &GridConfiguration {
        &self.config
    }

    /// Resize hotspots and coldspots from the latest full analysis, then
    /// redistribute. A given analysis is applied at most once.
    pub fn update_cell_sizes(
        &mut self,
        index: &mut SpatialIndex,
        analyzer: &DensityAnalyzer,
    ) -> ResizeOutcome {
        let mut outcome = ResizeOutcome::default();
        if analyzer.generation() == 0 || self.applied_generation == Some(analyzer.generation()) {
            return outcome;
        }
        self.applied_generation = Some(analyzer.generation());

        // Hotspots first, then coldspots. Counted by the direction actually
        // taken, since a hotspot under the low threshold still grows.
        let samples = analyzer.all_hotspots().iter().chain(analyzer.all_coldspots());
        for sample in samples {
            let Some(cell) = index.cell(sample.cell) else {
                continue;
            };
            let (w, h) = (cell.width(), cell.height());
            let density = sample.density as f32;
            let new_w = self.config.target_size(density, w);
            let new_h = self.config.target_size(density, h);
            if (new_w - w).abs() <= f32::EPSILON && (new_h - h).abs() <= f32::EPSILON {
                continue;
            }
            debug!(
                "Resizing cell #{} with density {}: {:.1}x{:.1} -> {:.1}x{:.1}",
                sample.cell, sample.density, w, h, new_w, new_h
            );
            if !index.resize_cell(sample.cell, new_w, new_h) {
                continue;
            }
            if new_w * new_h < w * h {
                outcome.shrunk += 1;
            } else {
                outcome.grown += 1;
            }
        }

        if outcome.resized() > 0 {
            outcome.pruned = index.redistribute();
            info!(
                "Grid resized: {} shrunk, {} grown, {} empty cells pruned, {} cells total",
                outcome.shrunk,
                outcome.grown,
                outcome.pruned,
                index.cell_count()
            );
        }
        outcome
    }

    /// Run `update_cell_sizes` if the resize interval has elapsed
    pub fn maybe_update(
        &mut self,
        index: &mut SpatialIndex,
        analyzer: &DensityAnalyzer,
        now_ms: u64,
    ) -> Option<ResizeOutcome> {
        let due = match self.last_resize_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.resize_interval_ms,
        };
        if !due {
            return None;
        }
        self.last_resize_ms = Some(now_ms);
        Some(self.update_cell_sizes(index, analyzer))
    }
}
