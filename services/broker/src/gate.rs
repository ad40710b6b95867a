//! Non-blocking per-instance operation gate.
//!
//! The persisted status rejects operations that conflict with an
//! asynchronous provider operation. This gate covers the window inside a
//! single request, between loading a record and persisting its new status,
//! so two concurrent requests on one instance cannot both proceed.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct InFlightGate {
    held: Arc<Mutex<HashSet<String>>>,
}

impl InFlightGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the instance. Returns `None` immediately if another request
    /// holds it.
    pub fn try_acquire(&self, instance_id: &str) -> Option<GateGuard> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if !held.insert(instance_id.to_string()) {
            debug!(instance_id = %instance_id, "Instance busy");
            return None;
        }
        Some(GateGuard {
            held: self.held.clone(),
            instance_id: instance_id.to_string(),
        })
    }

    pub fn is_held(&self, instance_id: &str) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(instance_id)
    }
}

/// Releases the instance on drop.
#[derive(Debug)]
pub struct GateGuard {
    held: Arc<Mutex<HashSet<String>>>,
    instance_id: String,
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.instance_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails_until_release() {
        let gate = InFlightGate::new();
        let guard = gate.try_acquire("inst-1").unwrap();
        assert!(gate.try_acquire("inst-1").is_none());
        assert!(gate.try_acquire("inst-2").is_some());
        assert!(gate.is_held("inst-1"));

        drop(guard);
        assert!(!gate.is_held("inst-1"));
        assert!(gate.try_acquire("inst-1").is_some());
    }
}
