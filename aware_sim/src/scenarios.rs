//! Chaos engineering scenarios for the telemetry engine.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// SIM-001: Many jitter passes, bounds and null propagation hold
    Drift,

    /// SIM-002: Leak injection on every pipe, then detection and reset
    LeakInjection,

    /// SIM-003: Concurrent resets racing refresh passes
    ResetStorm,

    /// SIM-004: Failing sensors and transient outages mid-refresh
    StoreOutage,

    /// SIM-005: Refresh cancelled partway through
    CancelledRefresh,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Drift,
            ScenarioId::LeakInjection,
            ScenarioId::ResetStorm,
            ScenarioId::StoreOutage,
            ScenarioId::CancelledRefresh,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Drift => "drift",
            ScenarioId::LeakInjection => "leak_injection",
            ScenarioId::ResetStorm => "reset_storm",
            ScenarioId::StoreOutage => "store_outage",
            ScenarioId::CancelledRefresh => "cancelled_refresh",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Drift => "Repeated refresh passes; values stay >= 0 and move at most one jitter bound",
            ScenarioId::LeakInjection => "simulate_leak on each pipe; detector agrees; reset clears it",
            ScenarioId::ResetStorm => "Resets and refreshes on the same assets at once; no stale or torn writes",
            ScenarioId::StoreOutage => "Per-sensor write failures and transient outages; partial summaries",
            ScenarioId::CancelledRefresh => "Cancel a slow refresh; committed writes match the summary",
        }
    }

    /// Returns true if the scenario needs store fault injection, which only
    /// the in-memory store offers.
    pub fn needs_fault_injection(&self) -> bool {
        matches!(self, ScenarioId::StoreOutage | ScenarioId::CancelledRefresh)
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "drift" | "sim-001" => Ok(ScenarioId::Drift),
            "leak_injection" | "leakinjection" | "sim-002" => Ok(ScenarioId::LeakInjection),
            "reset_storm" | "resetstorm" | "sim-003" => Ok(ScenarioId::ResetStorm),
            "store_outage" | "storeoutage" | "sim-004" => Ok(ScenarioId::StoreOutage),
            "cancelled_refresh" | "cancelledrefresh" | "sim-005" => Ok(ScenarioId::CancelledRefresh),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
