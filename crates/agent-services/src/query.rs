//! Discovery queries

use serde::{Deserialize, Serialize};

/// One capability, or several that must all be provided
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DiscoveryQuery {
    Capability(String),
    AllOf(Vec<String>),
}

impl DiscoveryQuery {
    pub fn capabilities(&self) -> Vec<String> {
        match self {
            DiscoveryQuery::Capability(name) => vec![name.clone()],
            DiscoveryQuery::AllOf(names) => names.clone(),
        }
    }
}

impl From<&str> for DiscoveryQuery {
    fn from(capability: &str) -> Self {
        DiscoveryQuery::Capability(capability.to_string())
    }
}

impl From<String> for DiscoveryQuery {
    fn from(capability: String) -> Self {
        DiscoveryQuery::Capability(capability)
    }
}

impl From<Vec<String>> for DiscoveryQuery {
    fn from(capabilities: Vec<String>) -> Self {
        DiscoveryQuery::AllOf(capabilities)
    }
}

impl From<&[&str]> for DiscoveryQuery {
    fn from(capabilities: &[&str]) -> Self {
        DiscoveryQuery::AllOf(capabilities.iter().map(|c| c.to_string()).collect())
    }
}
