//! Topology mode of the running process.
//!
//! The mode is set once during single-threaded startup and read on every
//! facade binding decision. It never changes while the process serves
//! traffic.

use once_cell::sync::OnceCell;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Which kind of silo this process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TopologyMode {
    /// All-in-one deployment; every service runs locally.
    Monolith,
    /// The global/control-plane silo.
    Control,
    /// A regional/data-plane silo.
    Region,
}

/// Which silo kind hosts a service's authoritative local implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ServiceAffinity {
    Control,
    Region,
}

impl TopologyMode {
    /// True when a contract with the given affinity uses its local
    /// implementation in this mode.
    pub fn is_home_for(self, affinity: ServiceAffinity) -> bool {
        match self {
            TopologyMode::Monolith => true,
            TopologyMode::Control => affinity == ServiceAffinity::Control,
            TopologyMode::Region => affinity == ServiceAffinity::Region,
        }
    }
}

static MODE: OnceCell<TopologyMode> = OnceCell::new();

/// Record the process topology mode. Call exactly once during startup,
/// before any contract is bound. A second call with a different mode is an
/// error and leaves the original in place.
pub fn init_topology(mode: TopologyMode) -> Result<(), TopologyMode> {
    MODE.set(mode)
}

/// Current topology mode. Defaults to [`TopologyMode::Monolith`] when startup
/// never recorded one, which matches the all-in-one development posture.
pub fn current_mode() -> TopologyMode {
    MODE.get().copied().unwrap_or(TopologyMode::Monolith)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn home_matrix() {
        assert!(TopologyMode::Monolith.is_home_for(ServiceAffinity::Control));
        assert!(TopologyMode::Monolith.is_home_for(ServiceAffinity::Region));
        assert!(TopologyMode::Control.is_home_for(ServiceAffinity::Control));
        assert!(!TopologyMode::Control.is_home_for(ServiceAffinity::Region));
        assert!(TopologyMode::Region.is_home_for(ServiceAffinity::Region));
        assert!(!TopologyMode::Region.is_home_for(ServiceAffinity::Control));
    }

    #[test]
    fn mode_names_are_snake_case() {
        let raw = serde_json::to_string(&TopologyMode::Control).unwrap();
        assert_eq!(raw, "\"control\"");
    }
}
