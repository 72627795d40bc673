//! Keyed cache of reusable GPU resources.
//!
//! Every resource the provider creates is registered here. The cache keeps a
//! strong handle to each one and sorts them into:
//!
//! - the *non-purgeable* set: at least one usage or command buffer ref is out;
//! - the *purgeable* queue: no refs at all, ordered least recently used first;
//! - the *resource map*: everything that can currently be handed out again,
//!   keyed by [`ResourceKey`].
//!
//! Holders never call into the cache directly. When a ref count reaches zero
//! the resource pushes itself onto the cache's return queue, and the cache
//! drains that queue lazily the next time it is asked for something.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use crate::types::ResourceKey;

use super::resource::{
    AnyResource, AnyResourceRef, Budgeted, ResourceId, ReturnQueue, Shareable,
};

/// Scratch resources that must not be handed out again.
pub type ScratchResourceSet = HashSet<ResourceId>;

/// Default cache budget: 256 MiB.
pub const DEFAULT_MAX_BUDGET: u64 = 256 * 1024 * 1024;

struct PurgeableEntry {
    resource: AnyResource,
    last_access: Instant,
}

pub struct ResourceCache {
    return_queue: Arc<ReturnQueue>,
    nonpurgeable: HashMap<ResourceId, AnyResource>,
    purgeable: VecDeque<PurgeableEntry>,
    resource_map: HashMap<ResourceKey, Vec<AnyResource>>,
    budgeted_bytes: u64,
    purgeable_bytes: u64,
    max_bytes: u64,
    shut_down: bool,
}

impl ResourceCache {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            return_queue: Arc::new(ReturnQueue::default()),
            nonpurgeable: HashMap::new(),
            purgeable: VecDeque::new(),
            resource_map: HashMap::new(),
            budgeted_bytes: 0,
            purgeable_bytes: 0,
            max_bytes,
            shut_down: false,
        }
    }

    /// Register a freshly created resource. The caller holds its first
    /// usage ref.
    pub fn insert_resource(
        &mut self,
        resource: AnyResource,
        budgeted: Budgeted,
        shareable: Shareable,
    ) {
        debug_assert!(shareable == Shareable::No || budgeted == Budgeted::Yes);
        debug_assert!(!self.shut_down, "ResourceCache: insert after shutdown");
        let state = resource.state();

        // Settle returns first so the budget is accurate before purging.
        if state.gpu_memory_size() > 0 {
            self.process_returned_resources();
        }

        state.register_with_cache(&self.return_queue, shareable);
        state.set_budgeted(budgeted);
        if budgeted == Budgeted::Yes {
            self.budgeted_bytes += state.gpu_memory_size();
        }
        if shareable != Shareable::No {
            self.add_to_resource_map(resource.clone());
        }
        log::trace!(
            "ResourceCache: inserted {} {:?} ({:?}, {} bytes)",
            resource.resource_type(),
            state.id(),
            shareable,
            state.gpu_memory_size()
        );
        self.nonpurgeable.insert(state.id(), resource);

        self.purge_as_needed();
    }

    /// Find a reusable resource for `key` and add a usage ref to it.
    ///
    /// A resource in the map with `Shareable::No` has no outstanding uses and
    /// can be converted to any mode. Otherwise the modes must match, and a
    /// scratch request skips everything in `unavailable`.
    pub fn find_and_ref_resource(
        &mut self,
        key: &ResourceKey,
        budgeted: Budgeted,
        shareable: Shareable,
        unavailable: Option<&ScratchResourceSet>,
    ) -> Option<AnyResourceRef> {
        debug_assert!(shareable == Shareable::No || budgeted == Budgeted::Yes);
        debug_assert!(shareable != Shareable::Scratch || unavailable.is_some());

        let mut found = self.find_in_map(key, shareable, unavailable);
        if found.is_none() && self.process_returned_resources() {
            found = self.find_in_map(key, shareable, unavailable);
        }

        let result = found.map(|resource| {
            let state = resource.state();
            if shareable == Shareable::No {
                self.remove_from_resource_map(&resource);
                if budgeted == Budgeted::No && state.budgeted() == Budgeted::Yes {
                    state.set_budgeted(Budgeted::No);
                    self.budgeted_bytes -= state.gpu_memory_size();
                }
            } else {
                state.set_shareable(shareable);
            }
            self.ref_and_make_mru(&resource)
        });

        self.purge_as_needed();
        result
    }

    fn find_in_map(
        &self,
        key: &ResourceKey,
        shareable: Shareable,
        unavailable: Option<&ScratchResourceSet>,
    ) -> Option<AnyResource> {
        self.resource_map.get(key)?.iter().find_map(|candidate| {
            let mode = candidate.state().shareable();
            let mode_ok = mode == Shareable::No || mode == shareable;
            let available = shareable != Shareable::Scratch
                || unavailable.is_none_or(|set| !set.contains(&candidate.id()));
            (mode_ok && available).then(|| candidate.clone())
        })
    }

    fn ref_and_make_mru(&mut self, resource: &AnyResource) -> AnyResourceRef {
        let id = resource.id();
        if let Some(index) = self
            .purgeable
            .iter()
            .position(|entry| entry.resource.id() == id)
            && let Some(entry) = self.purgeable.remove(index)
        {
            self.purgeable_bytes -= entry.resource.state().gpu_memory_size();
            self.nonpurgeable.insert(id, entry.resource);
        }
        resource.initial_ref()
    }

    fn add_to_resource_map(&mut self, resource: AnyResource) {
        let key = resource.state().key();
        self.resource_map.entry(key).or_default().push(resource);
    }

    fn remove_from_resource_map(&mut self, resource: &AnyResource) {
        let key = resource.state().key();
        if let Some(list) = self.resource_map.get_mut(&key) {
            list.retain(|candidate| !candidate.ptr_eq(resource));
            if list.is_empty() {
                self.resource_map.remove(&key);
            }
        }
    }

    fn in_resource_map(&self, resource: &AnyResource) -> bool {
        self.resource_map
            .get(&resource.state().key())
            .is_some_and(|list| list.iter().any(|candidate| candidate.ptr_eq(resource)))
    }

    /// Drain the return queue. Returns true if anything was returned.
    pub fn process_returned_resources(&mut self) -> bool {
        let returned = self.return_queue.drain();
        let count = returned.len();
        for resource in returned {
            self.process_returned_resource(resource);
        }
        if count > 0 {
            log::trace!("ResourceCache: processed {} returned resources", count);
        }
        count > 0
    }

    fn process_returned_resource(&mut self, resource: AnyResource) {
        let id = resource.id();
        // Stale entry: a second return for something already purgeable.
        if !self.nonpurgeable.contains_key(&id) {
            return;
        }
        let state = resource.state();
        let usage = state.usage_ref_count();
        let command_buffer = state.command_buffer_ref_count();
        let purgeable = usage == 0 && command_buffer == 0;
        let reusable =
            usage == 0 && (command_buffer == 0 || !resource.requires_purgeable_for_reuse());

        if state.shareable() != Shareable::No {
            // Still in the map. With no users left it can be handed out in
            // any mode next time.
            if reusable {
                state.set_shareable(Shareable::No);
            }
        } else if reusable && !self.in_resource_map(&resource) {
            self.add_to_resource_map(resource.clone());
            if state.budgeted() == Budgeted::No {
                state.set_budgeted(Budgeted::Yes);
                self.budgeted_bytes += state.gpu_memory_size();
            }
        }

        if purgeable {
            self.nonpurgeable.remove(&id);
            self.purgeable_bytes += state.gpu_memory_size();
            self.purgeable.push_back(PurgeableEntry {
                resource,
                last_access: Instant::now(),
            });
        }
    }

    /// Free least recently used purgeable resources until under budget.
    pub fn purge_as_needed(&mut self) {
        while self.budgeted_bytes > self.max_bytes {
            let Some(entry) = self.purgeable.pop_front() else {
                break;
            };
            self.purge_entry(entry);
        }
    }

    fn purge_entry(&mut self, entry: PurgeableEntry) {
        let resource = entry.resource;
        let state = resource.state();
        debug_assert!(state.is_purgeable());
        self.remove_from_resource_map(&resource);
        self.purgeable_bytes -= state.gpu_memory_size();
        if state.budgeted() == Budgeted::Yes {
            self.budgeted_bytes -= state.gpu_memory_size();
        }
        log::trace!(
            "ResourceCache: purging {} {:?}",
            resource.resource_type(),
            state.id()
        );
        state.detach_from_cache();
        resource.dispose();
    }

    /// Free purgeable resources last used before `time`.
    pub fn purge_resources_not_used_since(&mut self, time: Instant) {
        self.purge_resources(Some(time));
    }

    /// Free every purgeable resource.
    pub fn purge_all_unlocked(&mut self) {
        self.purge_resources(None);
    }

    fn purge_resources(&mut self, time: Option<Instant>) {
        self.process_returned_resources();
        let (purge, keep): (VecDeque<_>, VecDeque<_>) = self
            .purgeable
            .drain(..)
            .partition(|entry| time.is_none_or(|time| entry.last_access < time));
        self.purgeable = keep;
        for entry in purge {
            self.purge_entry(entry);
        }
        self.purge_as_needed();
    }

    /// Release every resource and refuse further returns. Resources still in
    /// use free themselves when their last ref goes away.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        for resource in self.return_queue.shutdown() {
            self.process_returned_resource(resource);
        }
        log::debug!(
            "ResourceCache: shutting down with {} in use, {} purgeable",
            self.nonpurgeable.len(),
            self.purgeable.len()
        );
        for (_, resource) in self.nonpurgeable.drain() {
            resource.state().detach_from_cache();
            if resource.state().is_purgeable() {
                resource.dispose();
            }
        }
        for entry in self.purgeable.drain(..) {
            entry.resource.state().detach_from_cache();
            entry.resource.dispose();
        }
        self.resource_map.clear();
        self.budgeted_bytes = 0;
        self.purgeable_bytes = 0;
    }

    pub fn budgeted_bytes(&self) -> u64 {
        self.budgeted_bytes
    }

    pub fn purgeable_bytes(&self) -> u64 {
        self.purgeable_bytes
    }

    pub fn max_budget(&self) -> u64 {
        self.max_bytes
    }

    pub fn set_max_budget(&mut self, max_bytes: u64) {
        self.max_bytes = max_bytes;
        self.process_returned_resources();
        self.purge_as_needed();
    }

    /// Number of resources the cache tracks.
    pub fn resource_count(&self) -> usize {
        self.nonpurgeable.len() + self.purgeable.len()
    }

    pub fn purgeable_count(&self) -> usize {
        self.purgeable.len()
    }
}

impl Drop for ResourceCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ResourceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCache")
            .field("resources", &self.resource_count())
            .field("purgeable", &self.purgeable.len())
            .field("budgeted_bytes", &self.budgeted_bytes)
            .field("max_bytes", &self.max_bytes)
            .finish()
    }
}
