//! HealthReporter (section 4.10): liveness/readiness/status over the
//! per-service state map, plus the active-DIMSE-association counter (P2).

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServiceState {
    Unknown,
    Stopped,
    Running,
    Cancelled,
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub active_associations: i64,
    pub services: HashMap<String, ServiceState>,
}

/// Shared by every long-running service; each publishes its own state by
/// name, and the DIMSE listener increments/decrements the association
/// counter around each accepted connection (P2).
#[derive(Clone)]
pub struct HealthReporter {
    services: Arc<Mutex<HashMap<String, ServiceState>>>,
    active_associations: Arc<AtomicI64>,
}

impl Default for HealthReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthReporter {
    pub fn new() -> Self {
        Self {
            services: Arc::new(Mutex::new(HashMap::new())),
            active_associations: Arc::new(AtomicI64::new(0)),
        }
    }

    pub fn set(&self, service: &str, state: ServiceState) {
        self.services
            .lock()
            .unwrap()
            .insert(service.to_string(), state);
    }

    pub fn association_opened(&self) {
        self.active_associations.fetch_add(1, Ordering::SeqCst);
    }

    pub fn association_closed(&self) {
        self.active_associations.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn active_association_count(&self) -> i64 {
        self.active_associations.load(Ordering::SeqCst)
    }

    /// Healthy iff every registered service is `Running`.
    pub fn is_ready(&self) -> bool {
        let services = self.services.lock().unwrap();
        !services.is_empty() && services.values().all(|s| *s == ServiceState::Running)
    }

    /// Healthy iff no service is `Cancelled`.
    pub fn is_live(&self) -> bool {
        let services = self.services.lock().unwrap();
        services.values().all(|s| *s != ServiceState::Cancelled)
    }

    pub fn status(&self) -> StatusReport {
        StatusReport {
            active_associations: self.active_association_count(),
            services: self.services.lock().unwrap().clone(),
        }
    }
}
