//! Engine configuration.
//!
//! Thresholds, jitter magnitudes and baselines carry no documented physical
//! calibration; they are defaults, and deployments with real calibration
//! data override them through a JSON file.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, TelemetryError};

/// Leak-rule thresholds in the sensors' native units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeakThresholds {
    /// Pressure strictly below this counts as low (psi)
    pub low_pressure: f64,
    /// Acoustic strictly above this counts as high (dB)
    pub high_acoustic: f64,
}

impl Default for LeakThresholds {
    fn default() -> Self {
        Self {
            low_pressure: 60.0,
            high_acoustic: 2.5,
        }
    }
}

/// Per-type jitter half-width for `refresh_all`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JitterConfig {
    pub pressure: f64,
    pub flow: f64,
    pub acoustic: f64,
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            pressure: 0.5,
            flow: 1.0,
            acoustic: 0.1,
        }
    }
}

/// Canonical "normal" values restored by a reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    pub pressure: f64,
    pub flow: f64,
    pub acoustic: f64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            pressure: 65.0,
            flow: 90.0,
            acoustic: 2.0,
        }
    }
}

/// Values forced by `simulate_leak`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeakInjection {
    pub pressure: f64,
    pub acoustic: f64,
}

impl Default for LeakInjection {
    fn default() -> Self {
        Self {
            pressure: 45.0,
            acoustic: 3.5,
        }
    }
}

/// Display alert limits (dashboard classification, not the leak rule).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertLimits {
    pub pressure_below: f64,
    pub acoustic_above: f64,
    pub flow_above: f64,
}

impl Default for AlertLimits {
    fn default() -> Self {
        Self {
            pressure_below: 55.0,
            acoustic_above: 5.0,
            flow_above: 110.0,
        }
    }
}

/// Bounded retry budget for store calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first (>= 1)
    pub max_attempts: u32,
    /// Fixed pause between attempts
    pub backoff_ms: u64,
    /// Per-attempt deadline
    pub timeout_ms: u64,
}

impl RetryPolicy {
    /// Single attempt, no pause. Handy for tests asserting failure paths.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
            ..Default::default()
        }
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 50,
            timeout_ms: 2_000,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub thresholds: LeakThresholds,
    pub jitter: JitterConfig,
    pub baseline: BaselineConfig,
    pub leak_injection: LeakInjection,
    pub alerts: AlertLimits,
    pub retry: RetryPolicy,
}

impl TelemetryConfig {
    /// Loads a (possibly partial) JSON config; absent fields keep defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| TelemetryError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| TelemetryError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the cross-field guarantees the simulator relies on.
    ///
    /// - every magnitude and value is finite, and jitter is non-negative
    /// - injected leak values strictly trip the leak rule
    /// - baseline values do not trip it
    /// - the retry budget allows at least one attempt
    pub fn validate(&self) -> Result<()> {
        let named = [
            ("thresholds.low_pressure", self.thresholds.low_pressure),
            ("thresholds.high_acoustic", self.thresholds.high_acoustic),
            ("jitter.pressure", self.jitter.pressure),
            ("jitter.flow", self.jitter.flow),
            ("jitter.acoustic", self.jitter.acoustic),
            ("baseline.pressure", self.baseline.pressure),
            ("baseline.flow", self.baseline.flow),
            ("baseline.acoustic", self.baseline.acoustic),
            ("leak_injection.pressure", self.leak_injection.pressure),
            ("leak_injection.acoustic", self.leak_injection.acoustic),
        ];
        for (name, value) in named {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(format!("{} must be a finite non-negative number, got {}", name, value)));
            }
        }

        let t = &self.thresholds;
        let leak = &self.leak_injection;
        if leak.pressure >= t.low_pressure {
            return Err(invalid(format!(
                "leak_injection.pressure ({}) must be below thresholds.low_pressure ({})",
                leak.pressure, t.low_pressure
            )));
        }
        if leak.acoustic <= t.high_acoustic {
            return Err(invalid(format!(
                "leak_injection.acoustic ({}) must be above thresholds.high_acoustic ({})",
                leak.acoustic, t.high_acoustic
            )));
        }
        if self.baseline.pressure < t.low_pressure && self.baseline.acoustic > t.high_acoustic {
            return Err(invalid("baseline values would themselves trip the leak rule"));
        }

        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts must be at least 1"));
        }
        if self.retry.timeout_ms == 0 {
            return Err(invalid("retry.timeout_ms must be positive"));
        }

        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> TelemetryError {
    TelemetryError::InvalidConfig(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(TelemetryConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = TelemetryConfig::from_json_str(r#"{"thresholds": {"low_pressure": 70.0}}"#).unwrap();
        assert_eq!(config.thresholds.low_pressure, 70.0);
        assert_eq!(config.thresholds.high_acoustic, 2.5);
        assert_eq!(config.jitter, JitterConfig::default());
    }

    #[test]
    fn test_leak_injection_must_trip_rule() {
        let mut config = TelemetryConfig::default();
        config.leak_injection.pressure = 60.0;
        assert!(matches!(config.validate(), Err(TelemetryError::InvalidConfig(_))));

        let mut config = TelemetryConfig::default();
        config.leak_injection.acoustic = 2.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negative_jitter_rejected() {
        let mut config = TelemetryConfig::default();
        config.jitter.flow = -1.0;
        assert!(config.validate().is_err());

        config.jitter.flow = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_retry_budget_rejected() {
        let mut config = TelemetryConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }
}
