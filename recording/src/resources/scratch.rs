//! Scratch resource checkout and pending-use scopes.
//!
//! While a Recording prepares its task graph, intermediate textures are
//! fetched as scratch resources. A scratch texture stays unavailable until
//! every task that reads it has been prepared, after which the same physical
//! texture can back a later intermediate in the same graph.
//!
//! The scope stack mirrors the depth-first walk over nested task lists. A
//! resource marked in use registers a [`PendingUseListener`] in the current
//! scope, and [`ScratchResourceManager::notify_resources_consumed`] only
//! visits that scope. Leftover listeners move to the parent scope when a
//! scope is popped, and popping the outermost scope releases whatever is
//! left.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::GraphicsError;
use crate::provider::ResourceProvider;
use crate::task::ProxyId;
use crate::types::TextureDescriptor;

use super::{Resource, ResourceRef, ScratchResourceSet, Texture};

/// Notified when the tasks of a scope have consumed a resource.
pub trait PendingUseListener: Send + Sync {
    /// Returns false to stay registered, e.g. while readers are still
    /// pending.
    fn on_use_completed(&self, scratch: &mut ScratchResourceManager) -> bool;
}

pub struct ScratchResourceManager {
    provider: Arc<ResourceProvider>,
    unavailable: ScratchResourceSet,
    pending_reads: HashMap<ProxyId, u32>,
    scopes: Vec<Vec<Arc<dyn PendingUseListener>>>,
}

impl ScratchResourceManager {
    /// `pending_reads` holds how many tasks sample each proxy.
    pub fn new(provider: Arc<ResourceProvider>, pending_reads: HashMap<ProxyId, u32>) -> Self {
        Self {
            provider,
            unavailable: ScratchResourceSet::new(),
            pending_reads,
            scopes: Vec::new(),
        }
    }

    pub fn provider(&self) -> &Arc<ResourceProvider> {
        &self.provider
    }

    /// Fetch a texture no other live scratch user holds.
    pub fn get_scratch_texture(
        &mut self,
        descriptor: &TextureDescriptor,
    ) -> Result<ResourceRef<Texture>, GraphicsError> {
        let texture = self
            .provider
            .find_or_create_scratch_texture(descriptor, &self.unavailable)?;
        self.unavailable.insert(texture.id());
        Ok(texture)
    }

    /// Make a scratch texture available to later `get_scratch_texture`
    /// calls. Holders keep their refs.
    pub fn return_texture(&mut self, texture: &Texture) {
        self.unavailable.remove(&texture.resource_state().id());
    }

    pub fn is_unavailable(&self, texture: &Texture) -> bool {
        self.unavailable.contains(&texture.resource_state().id())
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Vec::new());
    }

    pub fn pop_scope(&mut self) {
        let Some(leftover) = self.scopes.pop() else {
            debug_assert!(false, "ScratchResourceManager: pop without push");
            return;
        };
        match self.scopes.last_mut() {
            Some(parent) => parent.extend(leftover),
            None => {
                for listener in leftover {
                    listener.on_use_completed(self);
                }
            }
        }
    }

    pub fn scope_depth(&self) -> usize {
        self.scopes.len()
    }

    /// Register `listener` in the current scope.
    pub fn mark_resource_in_use(&mut self, listener: Arc<dyn PendingUseListener>) {
        if self.scopes.is_empty() {
            self.scopes.push(Vec::new());
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.push(listener);
        }
    }

    /// Tell every listener in the current scope that its resource has been
    /// consumed. Listeners in other scopes are untouched.
    pub fn notify_resources_consumed(&mut self) {
        let Some(scope) = self.scopes.last_mut() else {
            return;
        };
        let listeners = std::mem::take(scope);
        let mut retained = Vec::new();
        for listener in listeners {
            if !listener.on_use_completed(self) {
                retained.push(listener);
            }
        }
        if let Some(scope) = self.scopes.last_mut() {
            retained.append(scope);
            *scope = retained;
        }
    }

    /// Record that one pending read of `proxy` has been prepared.
    pub fn notify_read(&mut self, proxy: ProxyId) {
        if let Some(count) = self.pending_reads.get_mut(&proxy) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.pending_reads.remove(&proxy);
            }
        }
    }

    /// Whether some task that samples `proxy` has not been prepared yet.
    pub fn is_pending_read(&self, proxy: ProxyId) -> bool {
        self.pending_reads.get(&proxy).is_some_and(|count| *count > 0)
    }
}

impl std::fmt::Debug for ScratchResourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScratchResourceManager")
            .field("unavailable", &self.unavailable.len())
            .field("pending_reads", &self.pending_reads)
            .field("scope_depth", &self.scopes.len())
            .finish()
    }
}
