//! Health reporting for the store-facing components.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Health status for a component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Component is fully operational
    Healthy,
    /// Reachable, but slow or shedding work (e.g. dropped rebuilds)
    Degraded,
    /// Component is not operational
    Unhealthy,
    /// Not yet checked
    Unknown,
}

impl HealthStatus {
    fn severity(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Unknown => 1,
            HealthStatus::Degraded => 2,
            HealthStatus::Unhealthy => 3,
        }
    }
}

/// Health check result for one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    /// Component name, e.g. `kv_store` or `durable_store`.
    pub component: String,
    pub message: Option<String>,
    pub response_time_ms: Option<i64>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl HealthCheck {
    pub fn healthy(component: impl Into<String>) -> Self {
        Self::with_status(HealthStatus::Healthy, component.into(), None)
    }

    pub fn degraded(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(HealthStatus::Degraded, component.into(), Some(message.into()))
    }

    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(HealthStatus::Unhealthy, component.into(), Some(message.into()))
    }

    fn with_status(status: HealthStatus, component: String, message: Option<String>) -> Self {
        Self {
            status,
            component,
            message,
            response_time_ms: None,
            metadata: None,
        }
    }

    pub fn with_response_time(mut self, ms: i64) -> Self {
        self.response_time_ms = Some(ms);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Combined report over several components. The overall status is the
/// worst individual status; an empty report is `Unknown`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checks: Vec<HealthCheck>,
}

impl HealthReport {
    pub fn from_checks(checks: Vec<HealthCheck>) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status.clone())
            .max_by_key(HealthStatus::severity)
            .unwrap_or(HealthStatus::Unknown);
        Self { status, checks }
    }

    pub fn component(&self, name: &str) -> Option<&HealthCheck> {
        self.checks.iter().find(|c| c.component == name)
    }
}
