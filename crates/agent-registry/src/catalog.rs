//! Service catalog: descriptor map plus a per-capability index

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

use agent_comms::{ProtocolError, Result};

use crate::{ServiceDescriptor, ServiceStatus};

/// Shared catalog of routable services
///
/// Clones share the same maps. Ids under a capability keep registration order.
#[derive(Clone, Default)]
pub struct ServiceCatalog {
    services: Arc<DashMap<String, ServiceDescriptor>>,
    by_capability: Arc<DashMap<String, Vec<String>>>,
}

impl ServiceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a descriptor, re-indexing its capabilities
    ///
    /// Returns the previous descriptor when one was replaced. The descriptor
    /// entry stays locked until the index matches it, so writes to one id are
    /// serialized.
    pub fn upsert(&self, descriptor: ServiceDescriptor) -> Option<ServiceDescriptor> {
        let service_id = descriptor.service_id.clone();
        let previous = match self.services.entry(service_id.clone()) {
            Entry::Occupied(mut slot) => {
                let old = slot.insert(descriptor.clone());
                for capability in old.capabilities.iter().filter(|c| !descriptor.provides(c)) {
                    self.unindex(capability, &service_id);
                }
                self.index(&descriptor);
                Some(old)
            }
            Entry::Vacant(slot) => {
                let _held = slot.insert(descriptor.clone());
                self.index(&descriptor);
                None
            }
        };

        tracing::debug!(
            "Indexed service {} under {:?}",
            service_id,
            descriptor.capabilities
        );
        previous
    }

    /// Remove a descriptor and every index entry pointing at it
    pub fn remove(&self, service_id: &str) -> Option<ServiceDescriptor> {
        let Entry::Occupied(slot) = self.services.entry(service_id.to_string()) else {
            return None;
        };
        for capability in &slot.get().capabilities {
            self.unindex(capability, service_id);
        }
        let descriptor = slot.remove();
        tracing::debug!("Removed service {} from catalog", service_id);
        Some(descriptor)
    }

    pub fn get(&self, service_id: &str) -> Option<ServiceDescriptor> {
        self.services.get(service_id).map(|d| d.clone())
    }

    pub fn contains(&self, service_id: &str) -> bool {
        self.services.contains_key(service_id)
    }

    pub fn set_status(&self, service_id: &str, status: ServiceStatus) -> Result<ServiceStatus> {
        let mut descriptor = self
            .services
            .get_mut(service_id)
            .ok_or_else(|| ProtocolError::ServiceNotFound(service_id.to_string()))?;
        let previous = descriptor.status;
        descriptor.status = status;
        Ok(previous)
    }

    pub fn set_reputation(&self, service_id: &str, reputation: f64) {
        if let Some(mut descriptor) = self.services.get_mut(service_id) {
            descriptor.reputation = reputation;
        }
    }

    pub fn touch_health_check(&self, service_id: &str, at: DateTime<Utc>) {
        if let Some(mut descriptor) = self.services.get_mut(service_id) {
            descriptor.last_health_check = Some(at);
        }
    }

    /// Service ids indexed under a capability, in registration order
    pub fn ids_for(&self, capability: &str) -> Vec<String> {
        self.by_capability
            .get(capability)
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }

    /// Descriptors indexed under a capability, in registration order
    pub fn for_capability(&self, capability: &str) -> Vec<ServiceDescriptor> {
        self.ids_for(capability)
            .iter()
            .filter_map(|id| self.get(id))
            .filter(|descriptor| descriptor.provides(capability))
            .collect()
    }

    pub fn all(&self) -> Vec<ServiceDescriptor> {
        self.services.iter().map(|e| e.value().clone()).collect()
    }

    pub fn capabilities(&self) -> Vec<String> {
        self.by_capability.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    fn index(&self, descriptor: &ServiceDescriptor) {
        for capability in &descriptor.capabilities {
            let mut ids = self.by_capability.entry(capability.clone()).or_default();
            if !ids.contains(&descriptor.service_id) {
                ids.push(descriptor.service_id.clone());
            }
        }
    }

    fn unindex(&self, capability: &str, service_id: &str) {
        let now_empty = match self.by_capability.get_mut(capability) {
            Some(mut ids) => {
                ids.retain(|id| id != service_id);
                ids.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.by_capability.remove_if(capability, |_, ids| ids.is_empty());
        }
    }
}
