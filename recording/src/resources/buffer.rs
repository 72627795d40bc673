//! GPU buffer resource.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::backend::{GpuBackend, GpuBuffer};
use crate::error::GraphicsError;
use crate::types::{AccessPattern, BufferType, ResourceKey};

use super::resource::{AnyResource, Resource, ResourceId, ResourceState};

/// A GPU buffer resource.
///
/// Buffers are created through the `ResourceProvider` and are shared through
/// [`ResourceRef`](super::ResourceRef) handles. Host-visible buffers can be
/// mapped, and while mapped the CPU writes into them with [`Buffer::write`].
pub struct Buffer {
    state: ResourceState,
    size: u32,
    buffer_type: BufferType,
    access: AccessPattern,
    backend: Arc<dyn GpuBackend>,
    native: Mutex<Option<GpuBuffer>>,
    mapped: AtomicBool,
}

impl Buffer {
    pub(crate) fn create(
        backend: &Arc<dyn GpuBackend>,
        id: ResourceId,
        size: u32,
        buffer_type: BufferType,
        access: AccessPattern,
    ) -> Result<Self, GraphicsError> {
        if size == 0 {
            return Err(GraphicsError::InvalidParameter(
                "buffer size must be non-zero".to_string(),
            ));
        }
        let native = backend.create_buffer(size, buffer_type, access)?;
        log::trace!(
            "Buffer: created {:?} {:?} buffer, size={}",
            buffer_type,
            access,
            size
        );
        Ok(Self {
            state: ResourceState::new(
                id,
                ResourceKey::buffer(size, buffer_type, access),
                u64::from(size),
            ),
            size,
            buffer_type,
            access,
            backend: Arc::clone(backend),
            native: Mutex::new(Some(native)),
            mapped: AtomicBool::new(false),
        })
    }

    /// Get the buffer size in bytes.
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn buffer_type(&self) -> BufferType {
        self.buffer_type
    }

    pub fn access_pattern(&self) -> AccessPattern {
        self.access
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped.load(Ordering::Acquire)
    }

    /// The native handle, or `None` once GPU data has been freed.
    pub fn native(&self) -> Option<GpuBuffer> {
        self.native.lock().clone()
    }

    /// Map the buffer for CPU writes. Mapping an already mapped buffer is a
    /// no-op.
    pub fn map(&self) -> Result<(), GraphicsError> {
        if self.access != AccessPattern::HostVisible {
            return Err(GraphicsError::MappingFailed(format!(
                "{:?} buffer {} is not host visible",
                self.buffer_type,
                self.state.id().raw()
            )));
        }
        if self.is_mapped() {
            return Ok(());
        }
        let native = self.native.lock();
        let Some(native) = native.as_ref() else {
            return Err(GraphicsError::MappingFailed(format!(
                "buffer {} was freed",
                self.state.id().raw()
            )));
        };
        self.backend.map_buffer(native)?;
        self.mapped.store(true, Ordering::Release);
        Ok(())
    }

    pub fn unmap(&self) {
        if !self.mapped.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(native) = self.native.lock().as_ref() {
            self.backend.unmap_buffer(native);
        }
    }

    /// Write bytes into the mapped buffer.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is not mapped or the write runs past the end.
    pub fn write(&self, offset: u32, data: &[u8]) {
        assert!(self.is_mapped(), "Buffer: write to unmapped buffer");
        assert!(
            u64::from(offset) + data.len() as u64 <= u64::from(self.size),
            "Buffer: write of {} bytes at {} exceeds size {}",
            data.len(),
            offset,
            self.size
        );
        if let Some(native) = self.native.lock().as_ref() {
            self.backend.write_buffer(native, offset, data);
        }
    }

    /// Read back the current contents. Used for readback buffers and tests.
    pub fn read(&self, offset: u32, size: u32) -> Vec<u8> {
        match self.native.lock().as_ref() {
            Some(native) => self.backend.read_buffer(native, offset, size),
            None => Vec::new(),
        }
    }
}

impl Resource for Buffer {
    fn resource_state(&self) -> &ResourceState {
        &self.state
    }

    fn resource_type(&self) -> &'static str {
        "Buffer"
    }

    fn free_gpu_data(&self) {
        self.unmap();
        self.native.lock().take();
    }

    fn requires_purgeable_for_reuse(&self) -> bool {
        self.access == AccessPattern::HostVisible
    }

    fn into_any(self: Arc<Self>) -> AnyResource {
        AnyResource::Buffer(self)
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.state.id())
            .field("size", &self.size)
            .field("type", &self.buffer_type)
            .field("access", &self.access)
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

// Ensure Buffer is Send + Sync
static_assertions::assert_impl_all!(Buffer: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;

    fn backend() -> Arc<dyn GpuBackend> {
        Arc::new(DummyBackend::new())
    }

    #[test]
    fn test_buffer_debug() {
        let buffer = Buffer::create(
            &backend(),
            ResourceId(9),
            1024,
            BufferType::Vertex,
            AccessPattern::HostVisible,
        )
        .unwrap();
        let debug = format!("{:?}", buffer);
        assert!(debug.contains("Buffer"));
        assert!(debug.contains("1024"));
    }

    #[test]
    fn test_map_write_read() {
        let buffer = Buffer::create(
            &backend(),
            ResourceId(1),
            16,
            BufferType::Uniform,
            AccessPattern::HostVisible,
        )
        .unwrap();
        buffer.map().unwrap();
        buffer.write(4, &[9, 8, 7]);
        buffer.unmap();
        assert!(!buffer.is_mapped());
        assert_eq!(buffer.read(3, 5), vec![0, 9, 8, 7, 0]);
    }

    #[test]
    fn test_gpu_only_cannot_map() {
        let buffer = Buffer::create(
            &backend(),
            ResourceId(2),
            16,
            BufferType::Storage,
            AccessPattern::GpuOnly,
        )
        .unwrap();
        assert!(matches!(buffer.map(), Err(GraphicsError::MappingFailed(_))));
        assert!(!buffer.requires_purgeable_for_reuse());
    }

    #[test]
    fn test_zero_size_rejected() {
        let result = Buffer::create(
            &backend(),
            ResourceId(3),
            0,
            BufferType::Vertex,
            AccessPattern::GpuOnly,
        );
        assert!(result.is_err());
    }

    #[test]
    #[should_panic(expected = "exceeds size")]
    fn test_write_out_of_bounds_panics() {
        let buffer = Buffer::create(
            &backend(),
            ResourceId(4),
            8,
            BufferType::Upload,
            AccessPattern::HostVisible,
        )
        .unwrap();
        buffer.map().unwrap();
        buffer.write(6, &[1, 2, 3]);
    }
}
