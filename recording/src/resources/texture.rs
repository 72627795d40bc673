//! GPU texture resource.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{GpuBackend, GpuTexture};
use crate::error::GraphicsError;
use crate::types::{ResourceKey, TextureDescriptor};

use super::resource::{AnyResource, Resource, ResourceId, ResourceState};

/// A GPU texture resource.
pub struct Texture {
    state: ResourceState,
    descriptor: TextureDescriptor,
    native: Mutex<Option<GpuTexture>>,
}

impl Texture {
    pub(crate) fn create(
        backend: &Arc<dyn GpuBackend>,
        id: ResourceId,
        descriptor: &TextureDescriptor,
    ) -> Result<Self, GraphicsError> {
        if descriptor.width == 0 || descriptor.height == 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "texture dimensions {}x{} must be non-zero",
                descriptor.width, descriptor.height
            )));
        }
        let native = backend.create_texture(descriptor)?;
        Ok(Self {
            state: ResourceState::new(
                id,
                ResourceKey::texture(descriptor),
                descriptor.byte_size(),
            ),
            descriptor: descriptor.clone(),
            native: Mutex::new(Some(native)),
        })
    }

    /// Get the texture descriptor.
    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.descriptor
    }

    pub fn width(&self) -> u32 {
        self.descriptor.width
    }

    pub fn height(&self) -> u32 {
        self.descriptor.height
    }

    /// The native handle, or `None` once GPU data has been freed.
    pub fn native(&self) -> Option<GpuTexture> {
        self.native.lock().clone()
    }
}

impl Resource for Texture {
    fn resource_state(&self) -> &ResourceState {
        &self.state
    }

    fn resource_type(&self) -> &'static str {
        "Texture"
    }

    fn free_gpu_data(&self) {
        self.native.lock().take();
    }

    fn into_any(self: Arc<Self>) -> AnyResource {
        AnyResource::Texture(self)
    }
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("id", &self.state.id())
            .field("width", &self.descriptor.width)
            .field("height", &self.descriptor.height)
            .field("format", &self.descriptor.format)
            .field("label", &self.descriptor.label)
            .finish()
    }
}

static_assertions::assert_impl_all!(Texture: Send, Sync);
