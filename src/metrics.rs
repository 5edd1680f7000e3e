//! Prometheus-compatible metrics endpoint
//!
//! Exposes interest management metrics in Prometheus text and JSON.
//! Default endpoint: http://localhost:9090/metrics

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::net::delta::CompressionStats;
use crate::performance::PerformanceMonitor;
use crate::visibility::cache::CacheStats;

/// Samples kept by each rolling histogram
pub const HISTOGRAM_WINDOW: usize = 1000;

// ============================================================================
// Histogram
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct HistogramSummary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
}

/// Rolling window of the most recent samples
#[derive(Debug)]
pub struct Histogram {
    samples: RwLock<VecDeque<f64>>,
    capacity: usize,
}

impl Histogram {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, value: f64) {
        let mut samples = self.samples.write();
        samples.push_back(value);
        while samples.len() > self.capacity {
            samples.pop_front();
        }
    }

    /// Replace every sample at once
    pub fn replace(&self, values: impl IntoIterator<Item = f64>) {
        let mut samples = self.samples.write();
        samples.clear();
        samples.extend(values);
        while samples.len() > self.capacity {
            samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.read().is_empty()
    }

    pub fn summary(&self) -> HistogramSummary {
        let mut sorted: Vec<f64> = self.samples.read().iter().copied().collect();
        if sorted.is_empty() {
            return HistogramSummary::default();
        }
        sorted.sort_unstable_by(f64::total_cmp);

        let percentile = |p: f64| {
            let idx = (sorted.len() as f64 * p) as usize;
            sorted[idx.min(sorted.len() - 1)]
        };
        HistogramSummary {
            count: sorted.len(),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            avg: sorted.iter().sum::<f64>() / sorted.len() as f64,
            p50: percentile(0.50),
            p90: percentile(0.90),
            p99: percentile(0.99),
        }
    }
}

// ============================================================================
// Interest Metrics
// ============================================================================

/// Metrics registry for the interest pipeline, shared as `Arc`
#[derive(Debug)]
pub struct InterestMetrics {
    // Filtering (last tick, summed over observers)
    pub entities_before: AtomicU64,
    pub entities_after: AtomicU64,
    /// (before - after) / before of the last tick, x1000
    pub filtering_ratio_permille: AtomicU64,
    pub observers: AtomicU64,

    // Grid
    pub cell_count: AtomicU64,
    pub indexed_entities: AtomicU64,
    pub density_analyses: AtomicU64,
    pub resize_passes: AtomicU64,
    pub cells_resized: AtomicU64,

    // View distance cache (cumulative, mirrored from the resolver)
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub cache_size: AtomicU64,
    pub cone_hits: AtomicU64,
    pub cone_misses: AtomicU64,

    // Encoding
    pub original_bytes: AtomicU64,
    pub compressed_bytes: AtomicU64,
    pub full_updates: AtomicU64,
    pub delta_updates: AtomicU64,

    // Faults
    pub failed_observers: AtomicU64,

    pub tick_count: AtomicU64,

    // Performance status (0=Excellent, 1=Good, 2=Warning, 3=Critical, 4=Catastrophic)
    pub performance_status: AtomicU64,
    pub budget_usage_percent: AtomicU64,

    start_time: Instant,

    /// Per-tick pipeline time (microseconds)
    pub tick_time: Histogram,
    /// Per-observer visibility + encoding time (microseconds)
    pub observer_time: Histogram,
    /// Visible entities per observer update
    pub visible_entities: Histogram,
    /// Serialized update size (bytes)
    pub update_bytes: Histogram,
    pub compression_ratio: Histogram,
    /// Entity count per cell at the last full analysis
    #[cfg(feature = "metrics_extended")]
    pub cell_density: Histogram,
}

impl InterestMetrics {
    pub fn new() -> Self {
        Self {
            entities_before: AtomicU64::new(0),
            entities_after: AtomicU64::new(0),
            filtering_ratio_permille: AtomicU64::new(0),
            observers: AtomicU64::new(0),
            cell_count: AtomicU64::new(0),
            indexed_entities: AtomicU64::new(0),
            density_analyses: AtomicU64::new(0),
            resize_passes: AtomicU64::new(0),
            cells_resized: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            cache_size: AtomicU64::new(0),
            cone_hits: AtomicU64::new(0),
            cone_misses: AtomicU64::new(0),
            original_bytes: AtomicU64::new(0),
            compressed_bytes: AtomicU64::new(0),
            full_updates: AtomicU64::new(0),
            delta_updates: AtomicU64::new(0),
            failed_observers: AtomicU64::new(0),
            tick_count: AtomicU64::new(0),
            performance_status: AtomicU64::new(0),
            budget_usage_percent: AtomicU64::new(0),
            start_time: Instant::now(),
            tick_time: Histogram::new(HISTOGRAM_WINDOW),
            observer_time: Histogram::new(HISTOGRAM_WINDOW),
            visible_entities: Histogram::new(HISTOGRAM_WINDOW),
            update_bytes: Histogram::new(HISTOGRAM_WINDOW),
            compression_ratio: Histogram::new(HISTOGRAM_WINDOW),
            #[cfg(feature = "metrics_extended")]
            cell_density: Histogram::new(HISTOGRAM_WINDOW),
        }
    }

    /// Record one tick's entity counts, summed over observers
    pub fn record_filtering(&self, before: u64, after: u64, observers: u64) {
        self.entities_before.store(before, Ordering::Relaxed);
        self.entities_after.store(after, Ordering::Relaxed);
        self.observers.store(observers, Ordering::Relaxed);
        let ratio = if before > 0 {
            before.saturating_sub(after) * 1000 / before
        } else {
            0
        };
        self.filtering_ratio_permille.store(ratio, Ordering::Relaxed);
    }

    pub fn filtering_ratio(&self) -> f64 {
        self.filtering_ratio_permille.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn record_update(&self, stats: &CompressionStats, full: bool, visible: usize) {
        self.original_bytes.fetch_add(stats.original_size as u64, Ordering::Relaxed);
        self.compressed_bytes.fetch_add(stats.compressed_size as u64, Ordering::Relaxed);
        if full {
            self.full_updates.fetch_add(1, Ordering::Relaxed);
        } else {
            self.delta_updates.fetch_add(1, Ordering::Relaxed);
        }
        self.update_bytes.record(stats.compressed_size as f64);
        self.compression_ratio.record(stats.compression_ratio as f64);
        self.visible_entities.record(visible as f64);
    }

    pub fn bytes_saved(&self) -> u64 {
        self.original_bytes
            .load(Ordering::Relaxed)
            .saturating_sub(self.compressed_bytes.load(Ordering::Relaxed))
    }

    pub fn record_observer_time(&self, duration: Duration) {
        self.observer_time.record(duration.as_micros() as f64);
    }

    pub fn record_tick_time(&self, duration: Duration) {
        self.tick_count.fetch_add(1, Ordering::Relaxed);
        self.tick_time.record(duration.as_micros() as f64);
    }

    pub fn record_performance(&self, monitor: &PerformanceMonitor) {
        self.performance_status.store(monitor.status().code(), Ordering::Relaxed);
        self.budget_usage_percent
            .store(monitor.budget_usage_percent().round() as u64, Ordering::Relaxed);
    }

    pub fn record_failed_observer(&self) {
        self.failed_observers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_grid(&self, cell_count: usize, entities: usize) {
        self.cell_count.store(cell_count as u64, Ordering::Relaxed);
        self.indexed_entities.store(entities as u64, Ordering::Relaxed);
    }

    /// Record a full density analysis and its per-cell distribution
    pub fn record_analysis(&self, densities: impl Iterator<Item = usize>) {
        self.density_analyses.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "metrics_extended")]
        self.cell_density.replace(densities.map(|d| d as f64));
        #[cfg(not(feature = "metrics_extended"))]
        let _ = densities;
    }

    pub fn record_resize(&self, cells_resized: usize) {
        self.resize_passes.fetch_add(1, Ordering::Relaxed);
        self.cells_resized.fetch_add(cells_resized as u64, Ordering::Relaxed);
    }

    pub fn record_cache(&self, stats: &CacheStats) {
        self.cache_hits.store(stats.hits, Ordering::Relaxed);
        self.cache_misses.store(stats.misses, Ordering::Relaxed);
        self.cache_size.store(stats.size as u64, Ordering::Relaxed);
        self.cone_hits.store(stats.cone_hits, Ordering::Relaxed);
        self.cone_misses.store(stats.cone_misses, Ordering::Relaxed);
    }

    pub fn cache_hit_rate(&self) -> f64 {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let total = hits + self.cache_misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(4096);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        macro_rules! summary {
            ($name:expr, $help:expr, $hist:expr) => {
                let s = $hist.summary();
                output.push_str(&format!(
                    "# HELP {name} {help}\n# TYPE {name} summary\n\
                     {name}{{quantile=\"0.5\"}} {}\n{name}{{quantile=\"0.9\"}} {}\n{name}{{quantile=\"0.99\"}} {}\n\
                     {name}_count {}\n",
                    s.p50,
                    s.p90,
                    s.p99,
                    s.count,
                    name = $name,
                    help = $help
                ));
            };
        }

        // Filtering
        metric!("orbit_interest_entities_before", "Entities considered before filtering (last tick)", "gauge",
            self.entities_before.load(Ordering::Relaxed));
        metric!("orbit_interest_entities_after", "Entities sent after filtering (last tick)", "gauge",
            self.entities_after.load(Ordering::Relaxed));
        metric!("orbit_interest_filtering_ratio", "Fraction of entities filtered out", "gauge",
            self.filtering_ratio());
        metric!("orbit_interest_observers", "Observers processed last tick", "gauge",
            self.observers.load(Ordering::Relaxed));

        // Grid
        metric!("orbit_interest_grid_cells", "Cells in the spatial index", "gauge",
            self.cell_count.load(Ordering::Relaxed));
        metric!("orbit_interest_grid_entities", "Entities in the spatial index", "gauge",
            self.indexed_entities.load(Ordering::Relaxed));
        metric!("orbit_interest_density_analyses_total", "Full density analyses", "counter",
            self.density_analyses.load(Ordering::Relaxed));
        metric!("orbit_interest_resize_passes_total", "Resize and redistribute passes", "counter",
            self.resize_passes.load(Ordering::Relaxed));
        metric!("orbit_interest_cells_resized_total", "Cells resized", "counter",
            self.cells_resized.load(Ordering::Relaxed));

        // Cache
        metric!("orbit_interest_cache_hits_total", "View distance cache hits", "counter",
            self.cache_hits.load(Ordering::Relaxed));
        metric!("orbit_interest_cache_misses_total", "View distance cache misses", "counter",
            self.cache_misses.load(Ordering::Relaxed));
        metric!("orbit_interest_cache_hit_rate", "View distance cache hit rate", "gauge",
            self.cache_hit_rate());
        metric!("orbit_interest_cache_size", "View distance cache entries", "gauge",
            self.cache_size.load(Ordering::Relaxed));

        // Encoding
        metric!("orbit_interest_original_bytes_total", "Serialized size of full snapshots", "counter",
            self.original_bytes.load(Ordering::Relaxed));
        metric!("orbit_interest_compressed_bytes_total", "Serialized size of sent updates", "counter",
            self.compressed_bytes.load(Ordering::Relaxed));
        metric!("orbit_interest_bytes_saved_total", "Bytes saved by delta compression", "counter",
            self.bytes_saved());
        metric!("orbit_interest_full_updates_total", "Full snapshot resends", "counter",
            self.full_updates.load(Ordering::Relaxed));
        metric!("orbit_interest_delta_updates_total", "Delta updates", "counter",
            self.delta_updates.load(Ordering::Relaxed));

        // Faults and timing
        metric!("orbit_interest_failed_observers_total", "Observers skipped after an error", "counter",
            self.failed_observers.load(Ordering::Relaxed));
        metric!("orbit_interest_tick_count", "Total ticks processed", "counter",
            self.tick_count.load(Ordering::Relaxed));
        metric!("orbit_interest_performance_status", "Performance status (0=Excellent, 4=Catastrophic)", "gauge",
            self.performance_status.load(Ordering::Relaxed));
        metric!("orbit_interest_budget_usage_percent", "Tick budget usage percentage", "gauge",
            self.budget_usage_percent.load(Ordering::Relaxed));
        metric!("orbit_interest_uptime_seconds", "Uptime in seconds", "counter",
            self.uptime_seconds());

        summary!("orbit_interest_tick_time_microseconds", "Pipeline time per tick", self.tick_time);
        summary!("orbit_interest_observer_time_microseconds", "Processing time per observer", self.observer_time);
        summary!("orbit_interest_visible_entities", "Visible entities per update", self.visible_entities);
        summary!("orbit_interest_update_bytes", "Serialized bytes per update", self.update_bytes);

        #[cfg(feature = "metrics_extended")]
        {
            metric!("orbit_interest_cone_hits_total", "View cone cache hits", "counter",
                self.cone_hits.load(Ordering::Relaxed));
            metric!("orbit_interest_cone_misses_total", "View cone rebuilds", "counter",
                self.cone_misses.load(Ordering::Relaxed));
            summary!("orbit_interest_cell_density", "Entities per cell at the last analysis", self.cell_density);
        }

        output
    }

    /// Generate JSON format metrics (alternative for direct API access)
    pub fn to_json(&self) -> String {
        #[allow(unused_mut)]
        let mut value = json!({
            "filtering": {
                "entities_before": self.entities_before.load(Ordering::Relaxed),
                "entities_after": self.entities_after.load(Ordering::Relaxed),
                "ratio": self.filtering_ratio(),
                "observers": self.observers.load(Ordering::Relaxed),
                "visible_entities": self.visible_entities.summary(),
            },
            "grid": {
                "cells": self.cell_count.load(Ordering::Relaxed),
                "entities": self.indexed_entities.load(Ordering::Relaxed),
                "analyses": self.density_analyses.load(Ordering::Relaxed),
                "resize_passes": self.resize_passes.load(Ordering::Relaxed),
                "cells_resized": self.cells_resized.load(Ordering::Relaxed),
            },
            "cache": {
                "hits": self.cache_hits.load(Ordering::Relaxed),
                "misses": self.cache_misses.load(Ordering::Relaxed),
                "hit_rate": self.cache_hit_rate(),
                "size": self.cache_size.load(Ordering::Relaxed),
            },
            "network": {
                "original_bytes": self.original_bytes.load(Ordering::Relaxed),
                "compressed_bytes": self.compressed_bytes.load(Ordering::Relaxed),
                "bytes_saved": self.bytes_saved(),
                "full_updates": self.full_updates.load(Ordering::Relaxed),
                "delta_updates": self.delta_updates.load(Ordering::Relaxed),
                "update_bytes": self.update_bytes.summary(),
                "compression_ratio": self.compression_ratio.summary(),
            },
            "performance": {
                "tick_count": self.tick_count.load(Ordering::Relaxed),
                "failed_observers": self.failed_observers.load(Ordering::Relaxed),
                "status": self.performance_status.load(Ordering::Relaxed),
                "budget_percent": self.budget_usage_percent.load(Ordering::Relaxed),
                "tick_time_us": self.tick_time.summary(),
                "observer_time_us": self.observer_time.summary(),
                "uptime_seconds": self.uptime_seconds(),
            },
        });

        #[cfg(feature = "metrics_extended")]
        {
            value["grid"]["cell_density"] = json!(self.cell_density.summary());
            value["cache"]["cone_hits"] = json!(self.cone_hits.load(Ordering::Relaxed));
            value["cache"]["cone_misses"] = json!(self.cone_misses.load(Ordering::Relaxed));
        }

        value.to_string()
    }
}

impl Default for InterestMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn http_response(content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        content_type,
        body.len(),
        body
    )
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(metrics: Arc<InterestMetrics>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];

            match socket.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buffer[..n]);

                    // Longest prefix first: /metrics/json also starts with /metrics
                    let response = if request.starts_with("GET /metrics/json") {
                        http_response("application/json", &metrics.to_json())
                    } else if request.starts_with("GET /metrics") {
                        http_response("text/plain; version=0.0.4", &metrics.to_prometheus())
                    } else if request.starts_with("GET /health") {
                        http_response("text/plain", "OK")
                    } else {
                        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
                    };

                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write metrics response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read from metrics socket {}: {}", peer, e);
                }
            }
        });
    }
}
