//! Configuration loading and management

use crate::plan::PlanLimits;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A federated service and where to reach it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name, as used by `FieldDescriptor::service`
    pub name: String,

    /// GraphQL endpoint (used by the HTTP subgraph when the `remote`
    /// feature is enabled)
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// Engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default request timeout in milliseconds; none means no deadline
    pub timeout_ms: Option<u64>,

    /// Compiled plans kept in memory; 0 disables the cache
    pub plan_cache_capacity: usize,

    /// Reject operations nested deeper than this
    pub max_depth: Option<usize>,

    /// Reject operations whose complexity exceeds this
    pub max_complexity: Option<u64>,

    /// Split batch fetches into calls of at most this many keys
    pub max_batch_size: Option<usize>,

    /// Federation service directory
    pub services: Vec<ServiceConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout_ms: None,
            plan_cache_capacity: 512,
            max_depth: None,
            max_complexity: None,
            max_batch_size: None,
            services: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn plan_limits(&self) -> PlanLimits {
        PlanLimits {
            max_depth: self.max_depth,
            max_complexity: self.max_complexity,
        }
    }

    /// Find a service entry by name
    pub fn find_service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.iter().find(|service| service.name == name)
    }
}
