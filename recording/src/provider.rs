//! Factory for native resources, backed by the resource cache.
//!
//! `ResourceProvider` is the only place new GPU objects are created. Every
//! lookup first asks the [`ResourceCache`] for something reusable under the
//! same key and only falls back to the backend on a miss. The provider is
//! `Send + Sync`: Recordings that finish on another thread still return their
//! resources to the cache behind it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::{Mutex, MutexGuard};

use crate::backend::GpuBackend;
use crate::caps::Caps;
use crate::command_buffer::CommandBuffer;
use crate::error::GraphicsError;
use crate::resources::resource::ResourcePriv;
use crate::resources::{
    AnyResource, AnyResourceRef, Buffer, Budgeted, ResourceCache, ResourceId, ResourceRef,
    ScratchResourceSet, Shareable, Texture,
};
use crate::types::{AccessPattern, BufferType, ResourceKey, TextureDescriptor};

pub struct ResourceProvider {
    backend: Arc<dyn GpuBackend>,
    caps: Caps,
    cache: Mutex<ResourceCache>,
    next_resource_id: AtomicU64,
}

impl ResourceProvider {
    pub fn new(backend: Arc<dyn GpuBackend>, caps: Caps, max_budget: u64) -> Self {
        log::debug!(
            "ResourceProvider: created on {} with {} byte budget",
            backend.name(),
            max_budget
        );
        Self {
            backend,
            caps,
            cache: Mutex::new(ResourceCache::new(max_budget)),
            next_resource_id: AtomicU64::new(1),
        }
    }

    pub fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }

    pub fn caps(&self) -> &Caps {
        &self.caps
    }

    /// Lock the cache for direct queries and purging.
    pub fn cache(&self) -> MutexGuard<'_, ResourceCache> {
        self.cache.lock()
    }

    fn next_id(&self) -> ResourceId {
        ResourceId(self.next_resource_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Find a reusable buffer or create a new one.
    ///
    /// `unavailable` is only consulted for `Shareable::Scratch` requests.
    pub fn find_or_create_buffer(
        &self,
        size: u32,
        buffer_type: BufferType,
        access: AccessPattern,
        shareable: Shareable,
        unavailable: Option<&ScratchResourceSet>,
    ) -> Result<ResourceRef<Buffer>, GraphicsError> {
        let key = ResourceKey::buffer(size, buffer_type, access);
        let empty = ScratchResourceSet::new();
        let unavailable = match shareable {
            Shareable::Scratch => Some(unavailable.unwrap_or(&empty)),
            _ => None,
        };

        let mut cache = self.cache.lock();
        if let Some(AnyResourceRef::Buffer(buffer)) =
            cache.find_and_ref_resource(&key, Budgeted::Yes, shareable, unavailable)
        {
            log::trace!(
                "ResourceProvider: reusing {:?} buffer {:?}, size={}",
                buffer_type,
                buffer.id(),
                size
            );
            return Ok(buffer);
        }

        let buffer = Arc::new(Buffer::create(
            &self.backend,
            self.next_id(),
            size,
            buffer_type,
            access,
        )?);
        let usage = Buffer::initial_ref(&buffer);
        cache.insert_resource(AnyResource::Buffer(buffer), Budgeted::Yes, shareable);
        Ok(usage)
    }

    /// Find a reusable texture or create a new one.
    pub fn find_or_create_texture(
        &self,
        descriptor: &TextureDescriptor,
        shareable: Shareable,
    ) -> Result<ResourceRef<Texture>, GraphicsError> {
        debug_assert!(shareable != Shareable::Scratch);
        self.find_or_create_texture_impl(descriptor, shareable, None)
    }

    /// Find a scratch texture not in `unavailable`, or create a new one.
    pub fn find_or_create_scratch_texture(
        &self,
        descriptor: &TextureDescriptor,
        unavailable: &ScratchResourceSet,
    ) -> Result<ResourceRef<Texture>, GraphicsError> {
        self.find_or_create_texture_impl(descriptor, Shareable::Scratch, Some(unavailable))
    }

    fn find_or_create_texture_impl(
        &self,
        descriptor: &TextureDescriptor,
        shareable: Shareable,
        unavailable: Option<&ScratchResourceSet>,
    ) -> Result<ResourceRef<Texture>, GraphicsError> {
        let max = self.caps.max_texture_size;
        if descriptor.width > max || descriptor.height > max {
            return Err(GraphicsError::InvalidParameter(format!(
                "texture {}x{} exceeds max size {}",
                descriptor.width, descriptor.height, max
            )));
        }

        let key = ResourceKey::texture(descriptor);
        let mut cache = self.cache.lock();
        if let Some(AnyResourceRef::Texture(texture)) =
            cache.find_and_ref_resource(&key, Budgeted::Yes, shareable, unavailable)
        {
            return Ok(texture);
        }

        let texture = Arc::new(Texture::create(&self.backend, self.next_id(), descriptor)?);
        let usage = Texture::initial_ref(&texture);
        cache.insert_resource(AnyResource::Texture(texture), Budgeted::Yes, shareable);
        Ok(usage)
    }

    pub fn create_command_buffer(&self) -> Result<CommandBuffer, GraphicsError> {
        let native = self.backend.create_command_buffer()?;
        Ok(CommandBuffer::new(Arc::clone(&self.backend), native))
    }

    pub fn budgeted_bytes(&self) -> u64 {
        let mut cache = self.cache.lock();
        cache.process_returned_resources();
        cache.budgeted_bytes()
    }

    pub fn purge_resources_not_used_since(&self, time: Instant) {
        self.cache.lock().purge_resources_not_used_since(time);
    }

    pub fn purge_all_unlocked(&self) {
        self.cache.lock().purge_all_unlocked();
    }
}

impl std::fmt::Debug for ResourceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceProvider")
            .field("backend", &self.backend.name())
            .field("cache", &*self.cache.lock())
            .finish()
    }
}

static_assertions::assert_impl_all!(ResourceProvider: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::resources::{DEFAULT_MAX_BUDGET, Resource};
    use crate::types::{TextureFormat, TextureUsage};

    fn provider() -> ResourceProvider {
        ResourceProvider::new(
            Arc::new(DummyBackend::new()),
            Caps::default(),
            DEFAULT_MAX_BUDGET,
        )
    }

    #[test]
    fn test_buffer_reused_after_release() {
        let provider = provider();
        let first = provider
            .find_or_create_buffer(
                512,
                BufferType::Index,
                AccessPattern::GpuOnly,
                Shareable::No,
                None,
            )
            .unwrap();
        let first_id = first.id();
        drop(first);

        let second = provider
            .find_or_create_buffer(
                512,
                BufferType::Index,
                AccessPattern::GpuOnly,
                Shareable::No,
                None,
            )
            .unwrap();
        assert_eq!(second.id(), first_id);
        assert_eq!(second.resource_state().usage_ref_count(), 1);
    }

    #[test]
    fn test_distinct_keys_create_new_buffers() {
        let provider = provider();
        let vertex = provider
            .find_or_create_buffer(
                64,
                BufferType::Vertex,
                AccessPattern::GpuOnly,
                Shareable::No,
                None,
            )
            .unwrap();
        let id = vertex.id();
        drop(vertex);
        let index = provider
            .find_or_create_buffer(
                64,
                BufferType::Index,
                AccessPattern::GpuOnly,
                Shareable::No,
                None,
            )
            .unwrap();
        assert_ne!(index.id(), id);
    }

    #[test]
    fn test_shareable_texture_has_many_users() {
        let provider = provider();
        let desc = TextureDescriptor::new(4, 4, TextureFormat::R8Unorm, TextureUsage::TEXTURE_BINDING);
        let a = provider.find_or_create_texture(&desc, Shareable::Yes).unwrap();
        let b = provider.find_or_create_texture(&desc, Shareable::Yes).unwrap();
        assert!(a.ptr_eq(&b));
        assert_eq!(a.resource_state().usage_ref_count(), 2);
    }

    #[test]
    fn test_oversized_texture_rejected() {
        let provider = provider();
        let desc = TextureDescriptor::new(
            100_000,
            4,
            TextureFormat::R8Unorm,
            TextureUsage::TEXTURE_BINDING,
        );
        assert!(matches!(
            provider.find_or_create_texture(&desc, Shareable::No),
            Err(GraphicsError::InvalidParameter(_))
        ));
    }
}
