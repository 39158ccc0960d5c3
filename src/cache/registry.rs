//! Bidirectional resource index.
//!
//! Tracks which cache keys currently hold a record of which resource, so a
//! mutation can find every list and detail entry that shows an item without
//! scanning the whole store.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use super::keys::{QueryKey, ResourceRef};
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::registry";

/// Tracks resource → keys and key → resources mappings.
pub struct ResourceIndex {
    resource_to_keys: RwLock<HashMap<ResourceRef, HashSet<QueryKey>>>,
    key_to_resources: RwLock<HashMap<QueryKey, HashSet<ResourceRef>>>,
}

impl ResourceIndex {
    pub fn new() -> Self {
        Self {
            resource_to_keys: RwLock::new(HashMap::new()),
            key_to_resources: RwLock::new(HashMap::new()),
        }
    }

    /// Record the resources held by `key`, replacing whatever it held before.
    pub fn register(&self, key: &QueryKey, resources: HashSet<ResourceRef>) {
        let mut r2k = rw_write(&self.resource_to_keys, SOURCE, "register.r2k");
        let mut k2r = rw_write(&self.key_to_resources, SOURCE, "register.k2r");

        if let Some(previous) = k2r.remove(key) {
            detach(&mut r2k, key, previous.difference(&resources));
        }
        for resource in &resources {
            r2k.entry(*resource).or_default().insert(key.clone());
        }
        if !resources.is_empty() {
            k2r.insert(key.clone(), resources);
        }
    }

    /// Keys whose payload contains `resource`.
    pub fn keys_for_resource(&self, resource: &ResourceRef) -> HashSet<QueryKey> {
        rw_read(&self.resource_to_keys, SOURCE, "keys_for_resource")
            .get(resource)
            .cloned()
            .unwrap_or_default()
    }

    pub fn resources_for_key(&self, key: &QueryKey) -> HashSet<ResourceRef> {
        rw_read(&self.key_to_resources, SOURCE, "resources_for_key")
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Forget a key, e.g. after removal or eviction.
    pub fn unregister(&self, key: &QueryKey) {
        let mut r2k = rw_write(&self.resource_to_keys, SOURCE, "unregister.r2k");
        let mut k2r = rw_write(&self.key_to_resources, SOURCE, "unregister.k2r");

        if let Some(resources) = k2r.remove(key) {
            detach(&mut r2k, key, resources.iter());
        }
    }

    pub fn clear(&self) {
        rw_write(&self.resource_to_keys, SOURCE, "clear.r2k").clear();
        rw_write(&self.key_to_resources, SOURCE, "clear.k2r").clear();
    }

    pub fn resource_count(&self) -> usize {
        rw_read(&self.resource_to_keys, SOURCE, "resource_count").len()
    }

    pub fn key_count(&self) -> usize {
        rw_read(&self.key_to_resources, SOURCE, "key_count").len()
    }
}

impl Default for ResourceIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn detach<'a>(
    r2k: &mut HashMap<ResourceRef, HashSet<QueryKey>>,
    key: &QueryKey,
    resources: impl Iterator<Item = &'a ResourceRef>,
) {
    for resource in resources {
        if let Some(keys) = r2k.get_mut(resource) {
            keys.remove(key);
            if keys.is_empty() {
                r2k.remove(resource);
            }
        }
    }
}
