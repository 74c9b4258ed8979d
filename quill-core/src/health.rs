//! Health reporting for pipeline components
//!
//! Each component (scheduler, cache, breaker) produces a [`HealthCheck`];
//! a [`HealthReport`] folds them into one overall status.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Health status for a pipeline component.
///
/// Variants are ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Serving, but through a fallback path or near a limit
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health of a single component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub component: String,
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, serde_json::Value>,
}

impl HealthCheck {
    fn with_status(status: HealthStatus, component: impl Into<String>, message: Option<String>) -> Self {
        Self {
            status,
            component: component.into(),
            message,
            details: BTreeMap::new(),
        }
    }

    pub fn healthy(component: impl Into<String>) -> Self {
        Self::with_status(HealthStatus::Healthy, component, None)
    }

    pub fn degraded(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(HealthStatus::Degraded, component, Some(message.into()))
    }

    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(HealthStatus::Unhealthy, component, Some(message.into()))
    }

    /// Attach a detail value.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Aggregated health of the whole pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Worst status among `checks` (healthy when empty)
    pub status: HealthStatus,
    pub checks: Vec<HealthCheck>,
}

impl HealthReport {
    pub fn from_checks(checks: Vec<HealthCheck>) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);
        Self { status, checks }
    }

    pub fn component(&self, name: &str) -> Option<&HealthCheck> {
        self.checks.iter().find(|c| c.component == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_takes_worst_status() {
        let report = HealthReport::from_checks(vec![
            HealthCheck::healthy("scheduler"),
            HealthCheck::degraded("breaker", "circuit open"),
        ]);
        assert_eq!(report.status, HealthStatus::Degraded);

        let report = HealthReport::from_checks(vec![
            HealthCheck::degraded("cache", "near capacity"),
            HealthCheck::unhealthy("scheduler", "worker stopped"),
        ]);
        assert_eq!(report.status, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_empty_report_is_healthy() {
        assert_eq!(HealthReport::from_checks(Vec::new()).status, HealthStatus::Healthy);
    }

    #[test]
    fn test_details_serialize() {
        let check = HealthCheck::healthy("cache")
            .with_detail("entry_count", 12)
            .with_detail("usage_percent", 1.2);
        let json = serde_json::to_value(&check).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["details"]["entry_count"], 12);

        let bare = serde_json::to_value(HealthCheck::healthy("x")).unwrap();
        assert!(bare.get("details").is_none());
    }

    #[test]
    fn test_lookup_by_component() {
        let report = HealthReport::from_checks(vec![HealthCheck::healthy("cache")]);
        assert!(report.component("cache").is_some());
        assert!(report.component("breaker").is_none());
    }
}
