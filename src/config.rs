use std::f32::consts::PI;
use std::str::FromStr;

use crate::net::delta::{CompressionLevel, CompressionOptions};

// ============================================================================
// Grid Settings
// ============================================================================

/// Adaptive grid sizing parameters
#[derive(Debug, Clone)]
pub struct GridSettings {
    /// Size of a freshly created cell (world units)
    pub default_cell_size: f32,
    /// Smallest size a cell may shrink to
    pub min_cell_size: f32,
    /// Largest size a cell may grow to
    pub max_cell_size: f32,
    /// Cells below this entity count grow
    pub low_density_threshold: f32,
    /// Cells above this entity count shrink
    pub high_density_threshold: f32,
    /// Fraction of the distance to the target size covered per resize (0, 1]
    pub adaptation_rate: f32,
    /// Minimum time between full hotspot/coldspot classifications
    pub analysis_interval_ms: u64,
    /// Minimum time between resize + redistribute passes
    pub resize_interval_ms: u64,
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            default_cell_size: 100.0,
            min_cell_size: 50.0,
            max_cell_size: 200.0,
            low_density_threshold: 3.0,
            high_density_threshold: 10.0,
            adaptation_rate: 0.2,
            analysis_interval_ms: 30_000,
            resize_interval_ms: 30_000,
        }
    }
}

impl GridSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_cell_size <= 0.0 || self.min_cell_size > self.max_cell_size {
            return Err(ConfigError::InvalidCellSizeBounds {
                min: self.min_cell_size,
                max: self.max_cell_size,
            });
        }
        if self.default_cell_size < self.min_cell_size || self.default_cell_size > self.max_cell_size {
            return Err(ConfigError::InvalidValue {
                field: "default_cell_size",
                reason: format!(
                    "{} is outside [{}, {}]",
                    self.default_cell_size, self.min_cell_size, self.max_cell_size
                ),
            });
        }
        if self.low_density_threshold <= 0.0 || self.low_density_threshold >= self.high_density_threshold {
            return Err(ConfigError::InvalidDensityThresholds {
                low: self.low_density_threshold,
                high: self.high_density_threshold,
            });
        }
        if !(self.adaptation_rate > 0.0 && self.adaptation_rate <= 1.0) {
            return Err(ConfigError::InvalidAdaptationRate(self.adaptation_rate));
        }
        Ok(())
    }
}

// ============================================================================
// Visibility Settings
// ============================================================================

/// View distance penalties from the environment (negative = shorter sight)
#[derive(Debug, Clone)]
pub struct EnvironmentModifiers {
    pub night: f32,
    pub fog: f32,
    pub rain: f32,
    pub storm: f32,
    pub toxic_gas: f32,
    pub meteor_strike: f32,
    pub electrical_storm: f32,
    /// Full day + night period; the second half of each cycle is night
    pub day_night_cycle_ms: u64,
}

impl Default for EnvironmentModifiers {
    fn default() -> Self {
        Self {
            night: -15.0,
            fog: -20.0,
            rain: -10.0,
            storm: -25.0,
            toxic_gas: -30.0,
            meteor_strike: -20.0,
            electrical_storm: -25.0,
            day_night_cycle_ms: 3_600_000,
        }
    }
}

/// View distance bonuses and stealth detection ranges from gear and abilities
#[derive(Debug, Clone)]
pub struct EquipmentModifiers {
    pub sniper_scope: f32,
    pub thermal_goggles: f32,
    pub scout_drone: f32,
    pub reconnaissance: f32,
    pub eagle_eye: f32,
    pub thermal_goggles_detection: f32,
    pub stealth_detector_detection: f32,
    pub enhanced_perception_detection: f32,
    pub scanner_detection: f32,
}

impl Default for EquipmentModifiers {
    fn default() -> Self {
        Self {
            sniper_scope: 30.0,
            thermal_goggles: 15.0,
            scout_drone: 20.0,
            reconnaissance: 25.0,
            eagle_eye: 15.0,
            thermal_goggles_detection: 40.0,
            stealth_detector_detection: 30.0,
            enhanced_perception_detection: 50.0,
            scanner_detection: 35.0,
        }
    }
}

/// Visibility resolution parameters
#[derive(Debug, Clone)]
pub struct VisibilityConfig {
    pub default_view_distance: f32,
    pub min_view_distance: f32,
    pub max_view_distance: f32,
    /// Full cone angle in radians (half on each side of the facing direction)
    pub view_cone_angle: f32,
    /// Cone reach as a multiple of the resolved view distance
    pub view_cone_distance_multiplier: f32,
    /// Allies closer than this share part of their view distance
    pub allied_share_distance: f32,
    /// Share of an ally's view distance granted at zero separation
    pub allied_share_percentage: f32,
    /// Fully stealthed targets are always seen inside this distance
    pub close_proximity_override: f32,
    pub cache_ttl_ms: u64,
    /// Cache size above which priority eviction kicks in
    pub cache_eviction_threshold: usize,
    pub cache_maintenance_interval_ms: u64,
    /// Staleness bound of the per-faction allied graphs
    pub allied_graph_ttl_ms: u64,
    /// Seed for partial-stealth detection draws; entropy when unset
    pub detection_seed: Option<u64>,
    pub environment: EnvironmentModifiers,
    pub equipment: EquipmentModifiers,
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        Self {
            default_view_distance: 50.0,
            min_view_distance: 20.0,
            max_view_distance: 100.0,
            view_cone_angle: PI / 3.0,
            view_cone_distance_multiplier: 1.5,
            allied_share_distance: 30.0,
            allied_share_percentage: 0.5,
            close_proximity_override: 10.0,
            cache_ttl_ms: 1_000,
            cache_eviction_threshold: 5_000,
            cache_maintenance_interval_ms: 5_000,
            allied_graph_ttl_ms: 1_000,
            detection_seed: None,
            environment: EnvironmentModifiers::default(),
            equipment: EquipmentModifiers::default(),
        }
    }
}

impl VisibilityConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_view_distance <= 0.0
            || self.min_view_distance > self.default_view_distance
            || self.default_view_distance > self.max_view_distance
        {
            return Err(ConfigError::InvalidViewDistanceBounds {
                min: self.min_view_distance,
                default: self.default_view_distance,
                max: self.max_view_distance,
            });
        }
        if !(self.view_cone_angle > 0.0 && self.view_cone_angle <= 2.0 * PI) {
            return Err(ConfigError::InvalidValue {
                field: "view_cone_angle",
                reason: format!("{} must be in (0, 2*PI]", self.view_cone_angle),
            });
        }
        if self.view_cone_distance_multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "view_cone_distance_multiplier",
                reason: format!("{} must be >= 1", self.view_cone_distance_multiplier),
            });
        }
        if self.allied_share_distance <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "allied_share_distance",
                reason: "must be > 0".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.allied_share_percentage) {
            return Err(ConfigError::InvalidValue {
                field: "allied_share_percentage",
                reason: format!("{} must be in [0, 1]", self.allied_share_percentage),
            });
        }
        if self.environment.day_night_cycle_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "day_night_cycle_ms",
                reason: "must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Stealth Settings
// ============================================================================

#[derive(Debug, Clone)]
pub struct StealthSettings {
    pub duration_ms: f32,
    /// Fixed cooldown started by every deactivation
    pub cooldown_ms: f32,
    /// Effectiveness while active, in [0, 1]
    pub level: f32,
}

impl Default for StealthSettings {
    fn default() -> Self {
        Self {
            duration_ms: 10_000.0,
            cooldown_ms: 30_000.0,
            level: 1.0,
        }
    }
}

// ============================================================================
// Interest Configuration
// ============================================================================

/// Top-level configuration for the interest management pipeline
#[derive(Debug, Clone)]
pub struct InterestConfig {
    pub grid: GridSettings,
    pub visibility: VisibilityConfig,
    pub stealth: StealthSettings,
    pub compression: CompressionOptions,
    /// Pipeline ticks per second
    pub tick_rate_hz: u32,
    /// Port of the HTTP metrics endpoint
    pub metrics_port: u16,
    /// Entity count of the demo world
    pub sim_entities: usize,
}

impl Default for InterestConfig {
    fn default() -> Self {
        Self {
            grid: GridSettings::default(),
            visibility: VisibilityConfig::default(),
            stealth: StealthSettings::default(),
            compression: CompressionOptions::default(),
            tick_rate_hz: 20,
            metrics_port: 9090,
            sim_entities: 200,
        }
    }
}

/// Read and parse an environment variable, warning on unparsable values
fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Invalid {} '{}', using default", key, raw);
            None
        }
    }
}

impl InterestConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Some(rate) = env_parse::<u32>("INTEREST_TICK_RATE") {
            if (1..=240).contains(&rate) {
                config.tick_rate_hz = rate;
            } else {
                tracing::warn!("INTEREST_TICK_RATE must be 1-240, using default");
            }
        }

        if let Some(size) = env_parse::<f32>("INTEREST_CELL_SIZE") {
            config.grid.default_cell_size = size;
        }
        if let Some(size) = env_parse::<f32>("INTEREST_MIN_CELL_SIZE") {
            config.grid.min_cell_size = size;
        }
        if let Some(size) = env_parse::<f32>("INTEREST_MAX_CELL_SIZE") {
            config.grid.max_cell_size = size;
        }

        if let Some(distance) = env_parse::<f32>("INTEREST_VIEW_DISTANCE") {
            config.visibility.default_view_distance = distance;
        }

        if let Ok(level) = std::env::var("INTEREST_COMPRESSION") {
            match CompressionLevel::parse(&level) {
                Some(parsed) => config.compression.level = parsed,
                None => tracing::warn!("Invalid INTEREST_COMPRESSION '{}', using default", level),
            }
        }

        if let Some(seed) = env_parse::<u64>("INTEREST_DETECTION_SEED") {
            config.visibility.detection_seed = Some(seed);
        }

        if let Some(port) = env_parse::<u16>("METRICS_PORT") {
            if port > 0 {
                config.metrics_port = port;
            } else {
                tracing::warn!("METRICS_PORT must be > 0, using default");
            }
        }

        if let Some(count) = env_parse::<usize>("SIM_ENTITIES") {
            config.sim_entities = count;
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.grid.validate()?;
        self.visibility.validate()?;
        if self.tick_rate_hz == 0 {
            return Err(ConfigError::InvalidValue {
                field: "tick_rate_hz",
                reason: "must be > 0".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.stealth.level) {
            return Err(ConfigError::InvalidValue {
                field: "stealth.level",
                reason: format!("{} must be in [0, 1]", self.stealth.level),
            });
        }
        if self.stealth.duration_ms <= 0.0 || self.stealth.cooldown_ms < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "stealth",
                reason: "duration must be > 0 and cooldown >= 0".to_string(),
            });
        }
        Ok(())
    }

    /// Tick period in milliseconds
    pub fn tick_interval_ms(&self) -> u64 {
        (1000 / self.tick_rate_hz.max(1)) as u64
    }
}

/// Invalid configuration, reported at construction
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid cell size bounds: min {min} > max {max} (or non-positive)")]
    InvalidCellSizeBounds { min: f32, max: f32 },
    #[error("Invalid density thresholds: low {low} must be positive and below high {high}")]
    InvalidDensityThresholds { low: f32, high: f32 },
    #[error("Adaptation rate {0} must be in (0, 1]")]
    InvalidAdaptationRate(f32),
    #[error("Invalid view distance bounds: need 0 < min {min} <= default {default} <= max {max}")]
    InvalidViewDistanceBounds { min: f32, default: f32, max: f32 },
    #[error("Invalid {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = InterestConfig::default();
        assert_eq!(config.tick_rate_hz, 20);
        assert_eq!(config.grid.default_cell_size, 100.0);
        assert_eq!(config.visibility.default_view_distance, 50.0);
        assert_eq!(config.compression.level, CompressionLevel::Advanced);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_or_default() {
        let config = InterestConfig::load_or_default();
        assert!(config.tick_rate_hz > 0);
    }

    #[test]
    fn test_min_above_max_rejected() {
        let mut config = InterestConfig::default();
        config.grid.min_cell_size = 300.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidCellSizeBounds { .. })
        ));
    }

    #[test]
    fn test_low_not_below_high_rejected() {
        let mut grid = GridSettings::default();
        grid.low_density_threshold = 10.0;
        grid.high_density_threshold = 10.0;
        assert!(matches!(
            grid.validate(),
            Err(ConfigError::InvalidDensityThresholds { .. })
        ));
    }

    #[test]
    fn test_adaptation_rate_bounds() {
        let mut grid = GridSettings::default();
        grid.adaptation_rate = 0.0;
        assert!(matches!(grid.validate(), Err(ConfigError::InvalidAdaptationRate(_))));
        grid.adaptation_rate = 1.0;
        assert!(grid.validate().is_ok());
        grid.adaptation_rate = 1.5;
        assert!(grid.validate().is_err());
    }

    #[test]
    fn test_view_distance_bounds_rejected() {
        let mut visibility = VisibilityConfig::default();
        visibility.min_view_distance = 60.0;
        assert!(matches!(
            visibility.validate(),
            Err(ConfigError::InvalidViewDistanceBounds { .. })
        ));
    }

    #[test]
    fn test_tick_interval() {
        let config = InterestConfig::default();
        assert_eq!(config.tick_interval_ms(), 50);
    }
}
