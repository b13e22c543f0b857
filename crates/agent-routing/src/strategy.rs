//! Selection strategies

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use agent_comms::ProtocolError;

/// How the router picks one service among eligible candidates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// Rotate through candidates per capability
    #[default]
    RoundRobin,
    /// Fewest in-flight requests
    LeastBusy,
    /// Lowest latency from the last successful health check
    FastestResponse,
    /// Uniformly random
    Random,
    /// Highest priority weight
    Priority,
}

impl RoutingStrategy {
    pub const ALL: [RoutingStrategy; 5] = [
        RoutingStrategy::RoundRobin,
        RoutingStrategy::LeastBusy,
        RoutingStrategy::FastestResponse,
        RoutingStrategy::Random,
        RoutingStrategy::Priority,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingStrategy::RoundRobin => "round_robin",
            RoutingStrategy::LeastBusy => "least_busy",
            RoutingStrategy::FastestResponse => "fastest_response",
            RoutingStrategy::Random => "random",
            RoutingStrategy::Priority => "priority",
        }
    }
}

impl fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoutingStrategy {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        RoutingStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == normalized)
            .ok_or_else(|| ProtocolError::invalid_params(format!("unknown routing strategy '{}'", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names() {
        assert_eq!("round_robin".parse::<RoutingStrategy>().unwrap(), RoutingStrategy::RoundRobin);
        assert_eq!("Least-Busy".parse::<RoutingStrategy>().unwrap(), RoutingStrategy::LeastBusy);
        for strategy in RoutingStrategy::ALL {
            assert_eq!(strategy.to_string().parse::<RoutingStrategy>().unwrap(), strategy);
        }
        assert!("cheapest".parse::<RoutingStrategy>().is_err());
    }

    #[test]
    fn test_serde_name() {
        let json = serde_json::to_string(&RoutingStrategy::FastestResponse).unwrap();
        assert_eq!(json, "\"fastest_response\"");
    }
}
