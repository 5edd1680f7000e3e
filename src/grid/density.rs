//! Per-cell density tracking and hotspot/coldspot classification

use hashbrown::HashMap;
use serde::Serialize;
use tracing::debug;

use super::spatial::{CellKey, GridCell};

/// Entity count of one cell at analysis time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DensitySample {
    pub cell: CellKey,
    pub density: usize,
}

/// Tracks cell occupancy and periodically classifies cells against the mean
#[derive(Debug, Clone)]
pub struct DensityAnalyzer {
    interval_ms: u64,
    last_full_analysis_ms: Option<u64>,
    /// Bumped on every full analysis
    generation: u64,
    densities: HashMap<CellKey, usize>,
    average: f32,
    /// Sorted by density, highest first
    hotspots: Vec<DensitySample>,
    /// Sorted by density, lowest first; never contains empty cells
    coldspots: Vec<DensitySample>,
}

impl DensityAnalyzer {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            last_full_analysis_ms: None,
            generation: 0,
            densities: HashMap::new(),
            average: 0.0,
            hotspots: Vec::new(),
            coldspots: Vec::new(),
        }
    }

    /// Refresh per-cell densities. Runs the full classification only when
    /// forced or when the analysis interval has elapsed; returns whether it did.
    pub fn analyze<'a>(
        &mut self,
        cells: impl IntoIterator<Item = &'a GridCell>,
        force: bool,
        now_ms: u64,
    ) -> bool {
        self.densities.clear();
        let mut total = 0usize;
        for cell in cells {
            self.densities.insert(cell.key(), cell.len());
            total += cell.len();
        }
        self.average = if self.densities.is_empty() {
            0.0
        } else {
            total as f32 / self.densities.len() as f32
        };

        let due = match self.last_full_analysis_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.interval_ms,
        };
        if !force && !due {
            return false;
        }

        self.classify();
        self.last_full_analysis_ms = Some(now_ms);
        self.generation += 1;

        debug!(
            "Density analysis: {} entities in {} cells (avg: {:.2})",
            total,
            self.densities.len(),
            self.average
        );
        if !self.hotspots.is_empty() {
            debug!("Top hotspots: {}", format_samples(&self.hotspots));
        }
        if !self.coldspots.is_empty() {
            debug!("Top coldspots: {}", format_samples(&self.coldspots));
        }
        true
    }

    fn classify(&mut self) {
        let average = self.average;
        let samples = || {
            self.densities
                .iter()
                .map(|(&cell, &density)| DensitySample { cell, density })
        };

        let mut hotspots: Vec<DensitySample> =
            samples().filter(|s| s.density as f32 > average).collect();
        hotspots.sort_unstable_by(|a, b| b.density.cmp(&a.density).then(a.cell.cmp(&b.cell)));

        let mut coldspots: Vec<DensitySample> = samples()
            .filter(|s| s.density > 0 && (s.density as f32) < average)
            .collect();
        coldspots.sort_unstable_by(|a, b| a.density.cmp(&b.density).then(a.cell.cmp(&b.cell)));

        self.hotspots = hotspots;
        self.coldspots = coldspots;
    }

    pub fn hotspots(&self, limit: usize) -> &[DensitySample] {
        &self.hotspots[..limit.min(self.hotspots.len())]
    }

    pub fn coldspots(&self, limit: usize) -> &[DensitySample] {
        &self.coldspots[..limit.min(self.coldspots.len())]
    }

    pub fn all_hotspots(&self) -> &[DensitySample] {
        &self.hotspots
    }

    pub fn all_coldspots(&self) -> &[DensitySample] {
        &self.coldspots
    }

    pub fn average_density(&self) -> f32 {
        self.average
    }

    pub fn cell_density(&self, cell: CellKey) -> usize {
        self.densities.get(&cell).copied().unwrap_or(0)
    }

    /// Current densities of every tracked cell
    pub fn densities(&self) -> impl Iterator<Item = usize> + '_ {
        self.densities.values().copied()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn set_interval(&mut self, interval_ms: u64) {
        self.interval_ms = interval_ms;
    }
}

fn format_samples(samples: &[DensitySample]) -> String {
    samples
        .iter()
        .take(3)
        .map(|s| format!("#{}: {}", s.cell, s.density))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::spatial::SpatialIndex;
    use crate::util::Vec2;
    use uuid::Uuid;

    fn populated_index() -> SpatialIndex {
        let mut index = SpatialIndex::new(100.0);
        // (0,0): 6, (1,0): 3, (2,0): 1, (3,0): 0 after moving out
        for _ in 0..6 {
            index.assign(Uuid::new_v4(), Vec2::new(50.0, 50.0));
        }
        for _ in 0..3 {
            index.assign(Uuid::new_v4(), Vec2::new(150.0, 50.0));
        }
        index.assign(Uuid::new_v4(), Vec2::new(250.0, 50.0));
        let mover = Uuid::new_v4();
        index.assign(mover, Vec2::new(350.0, 50.0));
        index.assign(mover, Vec2::new(250.0, 60.0));
        index
    }

    #[test]
    fn test_classification() {
        let index = populated_index();
        let mut analyzer = DensityAnalyzer::new(30_000);
        assert!(analyzer.analyze(index.cells(), false, 0));

        // 11 entities over 4 cells
        assert!((analyzer.average_density() - 2.75).abs() < 1e-6);

        let slot = |key: CellKey| index.cell(key).unwrap().slot();
        let hot = analyzer.hotspots(10);
        assert_eq!(hot.len(), 2);
        assert_eq!(slot(hot[0].cell), (0, 0));
        assert_eq!(slot(hot[1].cell), (1, 0));

        let cold = analyzer.coldspots(10);
        assert_eq!(cold.len(), 1, "Empty cells are unused, not cold");
        assert_eq!(slot(cold[0].cell), (2, 0));
        assert_eq!(cold[0].density, 2);
    }

    #[test]
    fn test_interval_gating() {
        let index = populated_index();
        let mut analyzer = DensityAnalyzer::new(30_000);

        assert!(analyzer.analyze(index.cells(), false, 1_000));
        assert!(!analyzer.analyze(index.cells(), false, 10_000));
        assert_eq!(analyzer.generation(), 1);
        assert!(analyzer.analyze(index.cells(), true, 10_000), "Force bypasses interval");
        assert!(analyzer.analyze(index.cells(), false, 40_000));
        assert_eq!(analyzer.generation(), 3);
    }

    #[test]
    fn test_densities_refresh_every_call() {
        let mut index = SpatialIndex::new(100.0);
        let mut analyzer = DensityAnalyzer::new(30_000);
        analyzer.analyze(index.cells(), false, 0);

        let key = index.assign(Uuid::new_v4(), Vec2::new(10.0, 10.0));
        assert!(!analyzer.analyze(index.cells(), false, 5));
        assert_eq!(analyzer.cell_density(key), 1);
    }

    #[test]
    fn test_limit() {
        let index = populated_index();
        let mut analyzer = DensityAnalyzer::new(30_000);
        analyzer.analyze(index.cells(), true, 0);
        assert_eq!(analyzer.hotspots(1).len(), 1);
        assert_eq!(analyzer.hotspots(0).len(), 0);
    }
}
