use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use orbit_interest::config::InterestConfig;
use orbit_interest::metrics::{self, InterestMetrics};
use orbit_interest::net::{DeltaCodec, InterestManager};
use orbit_interest::performance::PerformanceMonitor;
use orbit_interest::sim::SimWorld;

/// Seconds between summary log lines
const SUMMARY_INTERVAL_SECS: u64 = 10;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize logging (RUST_LOG overrides the default level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Orbit Interest v{}", env!("CARGO_PKG_VERSION"));

    let config = InterestConfig::load_or_default();
    info!(
        "Configuration loaded: {} Hz, {} entities, metrics on :{}",
        config.tick_rate_hz, config.sim_entities, config.metrics_port
    );

    // Initialize metrics
    let metrics = Arc::new(InterestMetrics::new());
    let metrics_clone = metrics.clone();
    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = metrics::start_metrics_server(metrics_clone, metrics_port).await {
            error!("Metrics server error: {}", e);
        }
    });

    // Demo world and pipeline
    let mut world = SimWorld::new(config.sim_entities, config.visibility.detection_seed, &config.stealth);
    let codec = Arc::new(DeltaCodec::new(config.compression.clone()));
    let mut manager = InterestManager::new(config.clone(), codec, metrics.clone(), world.capabilities())?;
    for entity in world.entities() {
        manager.on_entity_added(entity);
    }
    info!(
        "Simulating {} entities ({} observers) in a {:.0}-unit arena",
        world.entities().len(),
        manager.observer_count(),
        world.arena_radius()
    );

    let tick_ms = config.tick_interval_ms();
    let summary_every = (SUMMARY_INTERVAL_SECS * 1000 / tick_ms).max(1);
    let mut monitor = PerformanceMonitor::new(config.tick_rate_hz);
    let mut last_status = monitor.status();

    let mut interval = tokio::time::interval(Duration::from_millis(tick_ms));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // Shutdown signal handler
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                monitor.tick_start();
                world.step(tick_ms, manager.resolver_mut().environment_mut());
                let updates = manager.tick(world.entities(), tick_ms);
                monitor.tick_end(updates.len());
                metrics.record_performance(&monitor);

                let status = monitor.status();
                if status != last_status {
                    if status.can_admit_observers() {
                        info!("Performance recovered: {}", monitor.status_message());
                    } else {
                        warn!("Performance degraded: {}", monitor.status_message());
                        if let Some(capacity) = monitor.observer_capacity(manager.observer_count()) {
                            warn!("Sustainable observer count: {}", capacity);
                        }
                    }
                    last_status = status;
                }

                if manager.tick_count() % summary_every == 0 {
                    info!(
                        "Tick {}: {} observers, {} cells, {:.1}% filtered, {} bytes saved, cache hit rate {:.1}%",
                        manager.tick_count(),
                        updates.len(),
                        manager.index().cell_count(),
                        metrics.filtering_ratio() * 100.0,
                        metrics.bytes_saved(),
                        metrics.cache_hit_rate() * 100.0
                    );
                }
            }
            _ = &mut shutdown => {
                info!("Shutting down...");
                break;
            }
        }
    }

    info!("{}", monitor.status_message());
    info!("Stopped after {} ticks", manager.tick_count());
    Ok(())
}
