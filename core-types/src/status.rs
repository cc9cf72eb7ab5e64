// Copyright (c) James Kassemi, SC, US. All rights reserved.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Discrete health level exposed by each supervised component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OverallStatus {
    Ok,
    #[default]
    Warn,
    Crit,
}

/// Gauge descriptor exported alongside the component status.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusGauge {
    pub label: String,
    pub value: f64,
    pub max: Option<f64>,
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ServiceStatus {
    overall: OverallStatus,
    warnings: Vec<String>,
    errors: Vec<String>,
    gauges: Vec<StatusGauge>,
}

/// Immutable snapshot handed to the metrics exporter and health surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatusSnapshot {
    pub name: String,
    pub overall: OverallStatus,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub gauges: Vec<StatusGauge>,
}

/// Shared handle a component uses to publish its own health.
#[derive(Clone)]
pub struct ServiceStatusHandle {
    name: &'static str,
    inner: Arc<RwLock<ServiceStatus>>,
}

impl ServiceStatusHandle {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Arc::new(RwLock::new(ServiceStatus::default())),
        }
    }

    pub fn service_name(&self) -> &'static str {
        self.name
    }

    pub fn set_overall(&self, status: OverallStatus) {
        self.inner.write().overall = status;
    }

    pub fn overall(&self) -> OverallStatus {
        self.inner.read().overall
    }

    pub fn push_warning(&self, msg: impl Into<String>) {
        self.inner.write().warnings.push(msg.into());
    }

    pub fn push_error(&self, msg: impl Into<String>) {
        self.inner.write().errors.push(msg.into());
    }

    pub fn clear_warnings_matching(&self, predicate: impl Fn(&str) -> bool) {
        self.inner.write().warnings.retain(|w| !predicate(w));
    }

    pub fn clear_errors_matching(&self, predicate: impl Fn(&str) -> bool) {
        self.inner.write().errors.retain(|e| !predicate(e));
    }

    pub fn set_gauges(&self, gauges: Vec<StatusGauge>) {
        self.inner.write().gauges = gauges;
    }

    pub fn snapshot(&self) -> ServiceStatusSnapshot {
        let guard = self.inner.read();
        ServiceStatusSnapshot {
            name: self.name.to_string(),
            overall: guard.overall,
            warnings: guard.warnings.clone(),
            errors: guard.errors.clone(),
            gauges: guard.gauges.clone(),
        }
    }
}
