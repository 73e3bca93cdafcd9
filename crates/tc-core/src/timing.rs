//! Lightweight wall-clock timing.
//!
//! Per-command timings always feed the run report; the printed summary is
//! only emitted when enabled via `TC_TIMING` or [`enable_timing`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

static ENABLED: AtomicBool = AtomicBool::new(false);

/// Enable printed timing output globally.
pub fn enable_timing() {
    ENABLED.store(true, Ordering::Relaxed);
}

/// Disable printed timing output globally.
pub fn disable_timing() {
    ENABLED.store(false, Ordering::Relaxed);
}

/// Check if printed timing output is enabled.
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed) || std::env::var("TC_TIMING").is_ok()
}

/// A simple timer that measures elapsed time.
pub struct Timer {
    label: &'static str,
    start: Instant,
}

impl Timer {
    /// Create and start a new timer with the given label.
    pub fn start(label: &'static str) -> Self {
        Self {
            label,
            start: Instant::now(),
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Seconds since the timer started.
    pub fn elapsed_s(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Stop the timer and return elapsed time in seconds.
    pub fn stop(self) -> f64 {
        self.elapsed_s()
    }
}

/// Accumulating timer for tracking total time across multiple calls.
pub struct AccumulatingTimer {
    total_ns: AtomicU64,
    count: AtomicU64,
}

impl Default for AccumulatingTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl AccumulatingTimer {
    pub const fn new() -> Self {
        Self {
            total_ns: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a timing measurement.
    pub fn record(&self, duration_s: f64) {
        let nanos = (duration_s * 1e9) as u64;
        self.total_ns.fetch_add(nanos, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Total time spent (in seconds).
    pub fn total_seconds(&self) -> f64 {
        self.total_ns.load(Ordering::Relaxed) as f64 / 1e9
    }

    /// Number of calls.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Average time per call (in seconds).
    pub fn average_seconds(&self) -> f64 {
        let count = self.count();
        if count > 0 {
            self.total_seconds() / count as f64
        } else {
            0.0
        }
    }

    pub fn reset(&self) {
        self.total_ns.store(0, Ordering::Relaxed);
        self.count.store(0, Ordering::Relaxed);
    }
}

/// Process-wide accumulators for the expensive pipeline stages.
pub mod stage_timing {
    use super::AccumulatingTimer;

    /// Newton solves (one per continuation point)
    pub static NEWTON_SOLVES: AccumulatingTimer = AccumulatingTimer::new();
    /// Mesh generation and refinement
    pub static MESHING: AccumulatingTimer = AccumulatingTimer::new();
    /// Field interpolation onto rebuilt meshes
    pub static INTERPOLATION: AccumulatingTimer = AccumulatingTimer::new();

    pub fn reset_all() {
        NEWTON_SOLVES.reset();
        MESHING.reset();
        INTERPOLATION.reset();
    }

    /// Print stage timing summary if enabled.
    pub fn print_summary() {
        if !super::is_enabled() {
            return;
        }
        println!("\n=== Stage Breakdown ===");
        for (name, timer) in [
            ("newton solves", &NEWTON_SOLVES),
            ("meshing", &MESHING),
            ("interpolation", &INTERPOLATION),
        ] {
            if timer.count() > 0 {
                println!(
                    "{:<16} {} calls, {:.3}s total, {:.4}ms avg",
                    name,
                    timer.count(),
                    timer.total_seconds(),
                    timer.average_seconds() * 1000.0
                );
            }
        }
        println!("=======================\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulating_timer_averages() {
        let t = AccumulatingTimer::new();
        t.record(0.5);
        t.record(1.5);
        assert_eq!(t.count(), 2);
        assert!((t.average_seconds() - 1.0).abs() < 1e-6);
        t.reset();
        assert_eq!(t.count(), 0);
        assert_eq!(t.average_seconds(), 0.0);
    }

    #[test]
    fn timer_reports_nonnegative() {
        let t = Timer::start("unit");
        assert_eq!(t.label(), "unit");
        assert!(t.stop() >= 0.0);
    }
}
