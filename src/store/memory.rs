//! In-process store. Nothing survives a restart; meant for tests and
//! single-node trials.

use super::{Store, StoreError, StoreResult};
use crate::models::instance::{BindInstance, ServiceInstance};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

struct InstanceEntry {
    instance: ServiceInstance,
    bindings: BTreeMap<String, BindInstance>,
}

#[derive(Default)]
pub struct MemoryStore {
    instances: Mutex<HashMap<String, InstanceEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn add_instance(&self, instance_id: &str, instance: &ServiceInstance) -> StoreResult<()> {
        let mut instances = self.instances.lock();
        if instances.contains_key(instance_id) {
            return Err(StoreError::DuplicateInstance(instance_id.to_string()));
        }
        instances.insert(
            instance_id.to_string(),
            InstanceEntry {
                instance: instance.clone(),
                bindings: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn get_instance(&self, instance_id: &str) -> StoreResult<ServiceInstance> {
        self.instances
            .lock()
            .get(instance_id)
            .map(|entry| entry.instance.clone())
            .ok_or_else(|| StoreError::InstanceNotFound(instance_id.to_string()))
    }

    async fn delete_instance(&self, instance_id: &str) -> StoreResult<()> {
        self.instances
            .lock()
            .remove(instance_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::InstanceNotFound(instance_id.to_string()))
    }

    async fn add_binding(
        &self,
        instance_id: &str,
        binding_id: &str,
        binding: &BindInstance,
    ) -> StoreResult<()> {
        let mut instances = self.instances.lock();
        let entry = instances
            .get_mut(instance_id)
            .ok_or_else(|| StoreError::ParentMissing(instance_id.to_string()))?;
        if entry.bindings.contains_key(binding_id) {
            return Err(StoreError::DuplicateBinding {
                instance_id: instance_id.to_string(),
                binding_id: binding_id.to_string(),
            });
        }
        entry
            .bindings
            .insert(binding_id.to_string(), binding.clone());
        Ok(())
    }

    async fn get_binding(&self, instance_id: &str, binding_id: &str) -> StoreResult<BindInstance> {
        self.instances
            .lock()
            .get(instance_id)
            .and_then(|entry| entry.bindings.get(binding_id).cloned())
            .ok_or_else(|| StoreError::BindingNotFound {
                instance_id: instance_id.to_string(),
                binding_id: binding_id.to_string(),
            })
    }

    async fn get_all_bindings(&self, instance_id: &str) -> StoreResult<Vec<BindInstance>> {
        self.instances
            .lock()
            .get(instance_id)
            .map(|entry| entry.bindings.values().cloned().collect())
            .ok_or_else(|| StoreError::ParentMissing(instance_id.to_string()))
    }

    async fn delete_binding(&self, instance_id: &str, binding_id: &str) -> StoreResult<()> {
        self.instances
            .lock()
            .get_mut(instance_id)
            .and_then(|entry| entry.bindings.remove(binding_id))
            .map(|_| ())
            .ok_or_else(|| StoreError::BindingNotFound {
                instance_id: instance_id.to_string(),
                binding_id: binding_id.to_string(),
            })
    }
}
