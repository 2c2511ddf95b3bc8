//! Core environment context trait for the telemetry engine.

use async_trait::async_trait;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// The central interface for time and randomness.
///
/// The telemetry engine never reads the system clock or draws random
/// numbers directly; it asks the context. This lets the same simulator code
/// run in production and under a seeded simulation.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`, `thread_rng`
/// - **Simulation**: `SimContext` (aware_sim) - virtual clock, `ChaCha8Rng(seed)`
#[async_trait]
pub trait TelemetryContext: Send + Sync + 'static {
    /// Returns the monotonic time since context creation.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time used for `last_seen` stamps.
    fn system_time(&self) -> SystemTime;

    /// Wall-clock time in milliseconds since the Unix epoch.
    ///
    /// Clocks set before 1970 report 0.
    fn now_ms(&self) -> u64 {
        self.system_time()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances the virtual clock
    async fn sleep(&self, duration: Duration);

    /// Draws a uniform sample from the closed interval `[low, high]`.
    ///
    /// Returns `low` when the interval is empty or degenerate, so callers
    /// may pass a zero-width jitter band.
    fn uniform(&self, low: f64, high: f64) -> f64;

    /// Returns the context's seed (for logging/debugging).
    ///
    /// In production, returns 0 (not seeded).
    fn seed(&self) -> u64;
}
