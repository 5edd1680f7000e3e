//! Tick budget monitoring
//!
//! Tracks how much of the fixed tick period the interest pipeline uses and
//! provides signals for the host loop:
//! - Observer admission (hold new observers while degraded)
//! - Load shedding (skip optional work such as forced analyses)

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Samples kept in the rolling window (5 seconds at 20 Hz)
const MAX_SAMPLES: usize = 100;

/// Samples required before the status moves off `Excellent`
const MIN_SAMPLES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceStatus {
    /// Under 30% of the tick budget
    Excellent,
    Good,
    /// Over 70%; stop admitting observers
    Warning,
    /// Over 90%
    Critical,
    /// Over 150%, sustained overload; shed load
    Catastrophic,
}

impl PerformanceStatus {
    /// Numeric code exported as a gauge (0 = Excellent .. 4 = Catastrophic)
    pub fn code(self) -> u64 {
        match self {
            PerformanceStatus::Excellent => 0,
            PerformanceStatus::Good => 1,
            PerformanceStatus::Warning => 2,
            PerformanceStatus::Critical => 3,
            PerformanceStatus::Catastrophic => 4,
        }
    }

    pub fn can_admit_observers(self) -> bool {
        matches!(self, PerformanceStatus::Excellent | PerformanceStatus::Good)
    }

    pub fn should_shed_load(self) -> bool {
        matches!(self, PerformanceStatus::Critical | PerformanceStatus::Catastrophic)
    }
}

pub struct PerformanceMonitor {
    tick_durations: VecDeque<Duration>,
    budget: Duration,
    excellent_threshold: f32,
    warning_threshold: f32,
    critical_threshold: f32,
    catastrophic_threshold: f32,
    status: PerformanceStatus,
    tick_start: Option<Instant>,
    last_observer_count: usize,
}

impl PerformanceMonitor {
    pub fn new(tick_rate_hz: u32) -> Self {
        Self {
            tick_durations: VecDeque::with_capacity(MAX_SAMPLES),
            budget: Duration::from_micros(1_000_000 / tick_rate_hz.max(1) as u64),
            excellent_threshold: 0.3,
            warning_threshold: 0.7,
            critical_threshold: 0.9,
            catastrophic_threshold: 1.5,
            status: PerformanceStatus::Excellent,
            tick_start: None,
            last_observer_count: 0,
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn tick_start(&mut self) {
        self.tick_start = Some(Instant::now());
    }

    /// Record the tick started by `tick_start` and return its duration
    pub fn tick_end(&mut self, observer_count: usize) -> Option<Duration> {
        let duration = self.tick_start.take()?.elapsed();
        self.record_tick(duration);
        self.last_observer_count = observer_count;
        Some(duration)
    }

    pub fn record_tick(&mut self, duration: Duration) {
        self.tick_durations.push_back(duration);
        while self.tick_durations.len() > MAX_SAMPLES {
            self.tick_durations.pop_front();
        }
        self.update_status();
    }

    fn update_status(&mut self) {
        if self.tick_durations.len() < MIN_SAMPLES {
            return;
        }

        let ratio = self.budget_usage_percent() / 100.0;
        self.status = if ratio < self.excellent_threshold {
            PerformanceStatus::Excellent
        } else if ratio < self.warning_threshold {
            PerformanceStatus::Good
        } else if ratio < self.critical_threshold {
            PerformanceStatus::Warning
        } else if ratio < self.catastrophic_threshold {
            PerformanceStatus::Critical
        } else {
            PerformanceStatus::Catastrophic
        };
    }

    pub fn average_tick_duration(&self) -> Duration {
        if self.tick_durations.is_empty() {
            return Duration::ZERO;
        }
        let sum: Duration = self.tick_durations.iter().sum();
        sum / self.tick_durations.len() as u32
    }

    pub fn p95_tick_duration(&self) -> Duration {
        let mut sorted: Vec<_> = self.tick_durations.iter().copied().collect();
        sorted.sort();
        let idx = (sorted.len() as f32 * 0.95) as usize;
        sorted.get(idx.min(sorted.len().saturating_sub(1))).copied().unwrap_or(Duration::ZERO)
    }

    pub fn status(&self) -> PerformanceStatus {
        self.status
    }

    /// Average tick time as a percentage of the budget (0-100+)
    pub fn budget_usage_percent(&self) -> f32 {
        self.average_tick_duration().as_secs_f32() / self.budget.as_secs_f32() * 100.0
    }

    pub fn can_admit_observers(&self) -> bool {
        self.status.can_admit_observers()
    }

    pub fn should_shed_load(&self) -> bool {
        self.status.should_shed_load()
    }

    pub fn last_observer_count(&self) -> usize {
        self.last_observer_count
    }

    pub fn status_message(&self) -> String {
        format!(
            "{:?} - {:.1}% budget (p95 {:.2}ms), {} observers",
            self.status,
            self.budget_usage_percent(),
            self.p95_tick_duration().as_secs_f64() * 1000.0,
            self.last_observer_count
        )
    }

    /// Observer count the pipeline can sustain at the current per-observer
    /// cost. `None` while there is plenty of headroom or too little data.
    pub fn observer_capacity(&self, current: usize) -> Option<usize> {
        if self.tick_durations.len() < MIN_SAMPLES {
            return None;
        }

        let used = self.budget_usage_percent() / 100.0;
        if used < 0.5 {
            None
        } else if used >= 1.0 {
            Some((current as f32 * 0.75).max(1.0) as usize)
        } else {
            let capacity = (current as f32 / used).ceil() as usize;
            (capacity <= current + 1).then_some(capacity.max(1))
        }
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(20)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor_at(ms: u64) -> PerformanceMonitor {
        // 20 Hz: 50ms budget
        let mut monitor = PerformanceMonitor::new(20);
        for _ in 0..20 {
            monitor.record_tick(Duration::from_millis(ms));
        }
        monitor
    }

    #[test]
    fn test_performance_monitor_new() {
        let monitor = PerformanceMonitor::new(20);
        assert_eq!(monitor.status(), PerformanceStatus::Excellent);
        assert_eq!(monitor.budget(), Duration::from_millis(50));
    }

    #[test]
    fn test_status_levels() {
        assert_eq!(monitor_at(5).status(), PerformanceStatus::Excellent);
        assert_eq!(monitor_at(25).status(), PerformanceStatus::Good);
        assert_eq!(monitor_at(40).status(), PerformanceStatus::Warning);
        assert_eq!(monitor_at(60).status(), PerformanceStatus::Critical);
        assert_eq!(monitor_at(80).status(), PerformanceStatus::Catastrophic);
    }

    #[test]
    fn test_admission_and_shedding() {
        let good = monitor_at(25);
        assert!(good.can_admit_observers());
        assert!(!good.should_shed_load());

        let warning = monitor_at(40);
        assert!(!warning.can_admit_observers());
        assert!(!warning.should_shed_load());

        let critical = monitor_at(60);
        assert!(critical.should_shed_load());
        assert_eq!(critical.status().code(), 3);
    }

    #[test]
    fn test_needs_min_samples() {
        let mut monitor = PerformanceMonitor::new(20);
        for _ in 0..5 {
            monitor.record_tick(Duration::from_millis(80));
        }
        assert_eq!(monitor.status(), PerformanceStatus::Excellent);
        assert_eq!(monitor.observer_capacity(10), None);
    }

    #[test]
    fn test_tick_timing() {
        let mut monitor = PerformanceMonitor::new(20);
        assert!(monitor.tick_end(3).is_none(), "No tick started");
        monitor.tick_start();
        std::thread::sleep(Duration::from_millis(1));
        let duration = monitor.tick_end(10).unwrap();

        assert!(duration >= Duration::from_millis(1));
        assert_eq!(monitor.last_observer_count(), 10);
    }

    #[test]
    fn test_p95() {
        let mut monitor = PerformanceMonitor::new(20);
        assert_eq!(monitor.p95_tick_duration(), Duration::ZERO);
        for ms in 1..=100 {
            monitor.record_tick(Duration::from_millis(ms));
        }
        assert_eq!(monitor.p95_tick_duration(), Duration::from_millis(96));
    }

    #[test]
    fn test_observer_capacity() {
        assert_eq!(monitor_at(10).observer_capacity(10), None);
        // 60ms of 50ms budget: cut by a quarter
        assert_eq!(monitor_at(60).observer_capacity(10), Some(7));
        // 48ms: about 4% headroom
        let capacity = monitor_at(48).observer_capacity(10).unwrap();
        assert!(capacity <= 11);
    }
}
