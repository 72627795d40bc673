//! GPU backend abstraction layer.
//!
//! The recording core never talks to a graphics API directly. Everything
//! native goes through the [`GpuBackend`] trait: resource creation, mapping,
//! command encoding, submission and fences.
//!
//! # Available Backends
//!
//! - `dummy`: CPU emulation used for tests and headless development. Buffers
//!   and textures are byte vectors and command buffers execute their copies
//!   and clears at submit time.

pub mod dummy;

use std::sync::Arc;

use crate::error::GraphicsError;
use crate::types::{AccessPattern, BufferType, TextureDescriptor, TextureRegion};

pub use dummy::{CompletionMode, DummyBackend, DummyConfig};

/// Handle to a native buffer.
#[derive(Debug, Clone)]
pub enum GpuBuffer {
    /// Dummy backend buffer backed by host memory.
    Dummy(dummy::DummyBuffer),
}

/// Handle to a native texture.
#[derive(Debug, Clone)]
pub enum GpuTexture {
    /// Dummy backend texture backed by host memory.
    Dummy(dummy::DummyTexture),
}

/// Handle to a native command buffer.
#[derive(Debug)]
pub enum GpuCommandBuffer {
    /// Dummy backend command list, executed on submit.
    Dummy(dummy::DummyCommandBuffer),
}

/// Completion fence for one submission.
#[derive(Debug, Clone)]
pub enum GpuFence {
    Dummy(dummy::DummyFence),
}

/// How a render pass treats the previous target contents.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadOp {
    Load,
    Clear([f32; 4]),
}

/// A single native command.
///
/// Backends translate these into their API's encoder calls. The handles are
/// cheap clones; lifetime is guaranteed by the owning `CommandBuffer`
/// tracking the resources they belong to.
#[derive(Debug, Clone)]
pub enum Command {
    BindBuffer {
        slot: u32,
        buffer: GpuBuffer,
        offset: u32,
        size: u32,
    },
    CopyBufferToBuffer {
        src: GpuBuffer,
        src_offset: u32,
        dst: GpuBuffer,
        dst_offset: u32,
        size: u32,
    },
    CopyBufferToTexture {
        src: GpuBuffer,
        src_offset: u32,
        bytes_per_row: u32,
        dst: GpuTexture,
        region: TextureRegion,
    },
    CopyTextureToBuffer {
        src: GpuTexture,
        region: TextureRegion,
        dst: GpuBuffer,
        dst_offset: u32,
        bytes_per_row: u32,
    },
    ClearBuffer {
        buffer: GpuBuffer,
        offset: u32,
        size: u32,
    },
    BeginRenderPass {
        target: GpuTexture,
        load: LoadOp,
        translation: [i32; 2],
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    EndRenderPass,
    Dispatch {
        workgroups: [u32; 3],
    },
}

/// GPU backend trait for abstracting different GPU APIs.
pub trait GpuBackend: Send + Sync + 'static {
    /// Get the backend name.
    fn name(&self) -> &'static str;

    /// Create a buffer resource. Buffers are created unmapped.
    fn create_buffer(
        &self,
        size: u32,
        buffer_type: BufferType,
        access: AccessPattern,
    ) -> Result<GpuBuffer, GraphicsError>;

    /// Create a texture resource.
    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<GpuTexture, GraphicsError>;

    /// Map a host-visible buffer for CPU writes.
    fn map_buffer(&self, buffer: &GpuBuffer) -> Result<(), GraphicsError>;

    /// Unmap a previously mapped buffer.
    fn unmap_buffer(&self, buffer: &GpuBuffer);

    /// Write into a mapped buffer.
    fn write_buffer(&self, buffer: &GpuBuffer, offset: u32, data: &[u8]);

    /// Read buffer contents back to the CPU.
    fn read_buffer(&self, buffer: &GpuBuffer, offset: u32, size: u32) -> Vec<u8>;

    /// Read the full contents of a texture back to the CPU.
    fn read_texture(&self, texture: &GpuTexture) -> Vec<u8>;

    /// Create an empty native command buffer.
    fn create_command_buffer(&self) -> Result<GpuCommandBuffer, GraphicsError>;

    /// Append a command to an open command buffer.
    fn encode(&self, command_buffer: &mut GpuCommandBuffer, command: Command);

    /// Drop any recorded commands so the command buffer can be reused.
    fn reset_command_buffer(&self, command_buffer: &mut GpuCommandBuffer);

    /// Submit the recorded commands. The returned fence signals when the GPU
    /// has finished executing them.
    fn submit(&self, command_buffer: &mut GpuCommandBuffer) -> Result<GpuFence, GraphicsError>;

    /// Check if a fence is signaled (non-blocking).
    fn is_fence_signaled(&self, fence: &GpuFence) -> bool;

    /// Block until a fence is signaled.
    fn wait_fence(&self, fence: &GpuFence);
}

/// Creates the default backend.
pub fn create_backend() -> Result<Arc<dyn GpuBackend>, GraphicsError> {
    log::info!("Using dummy backend");
    Ok(Arc::new(DummyBackend::new()))
}
