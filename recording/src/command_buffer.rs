//! Command buffer wrapper that keeps its resources alive until the GPU is
//! done with them.

use std::sync::Arc;

use crate::backend::{
    Command, GpuBackend, GpuBuffer, GpuCommandBuffer, GpuFence, GpuTexture, LoadOp,
};
use crate::buffers::BindBufferInfo;
use crate::error::GraphicsError;
use crate::resources::{AnyResource, Buffer, CommandBufferUsage, Resource, Texture};
use crate::types::TextureRegion;

/// Outcome reported to finish callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackResult {
    Success,
    Failed,
}

/// Invoked exactly once when the work it was registered for completes or is
/// abandoned.
pub type FinishCallback = Box<dyn FnOnce(CallbackResult) + Send>;

/// Lifecycle of a command buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferState {
    Idle,
    Recording,
    Submitted,
    Finished,
}

/// A native command buffer plus everything it must keep alive.
///
/// Every resource a command touches is tracked with a command buffer ref.
/// Those refs are released when the submission finishes or the command
/// buffer is reset.
pub struct CommandBuffer {
    backend: Arc<dyn GpuBackend>,
    native: GpuCommandBuffer,
    tracked: Vec<CommandBufferUsage>,
    finish_callbacks: Vec<FinishCallback>,
    state: CommandBufferState,
    in_render_pass: bool,
}

impl CommandBuffer {
    pub(crate) fn new(backend: Arc<dyn GpuBackend>, native: GpuCommandBuffer) -> Self {
        Self {
            backend,
            native,
            tracked: Vec::new(),
            finish_callbacks: Vec::new(),
            state: CommandBufferState::Idle,
            in_render_pass: false,
        }
    }

    pub fn state(&self) -> CommandBufferState {
        self.state
    }

    /// Whether any command has been recorded since the last reset.
    pub fn has_work(&self) -> bool {
        self.state == CommandBufferState::Recording
    }

    pub fn tracked_resource_count(&self) -> usize {
        self.tracked.len()
    }

    /// Hold a command buffer ref on `resource` until this command buffer
    /// finishes.
    pub fn track_resource(&mut self, resource: AnyResource) {
        self.tracked.push(CommandBufferUsage::new(resource));
    }

    pub fn add_finish_callback(&mut self, callback: FinishCallback) {
        self.finish_callbacks.push(callback);
    }

    fn encode(&mut self, command: Command) {
        debug_assert!(
            matches!(
                self.state,
                CommandBufferState::Idle | CommandBufferState::Recording
            ),
            "CommandBuffer: encode in state {:?}",
            self.state
        );
        self.state = CommandBufferState::Recording;
        self.backend.encode(&mut self.native, command);
    }

    fn native_buffer(buffer: &Buffer) -> Result<GpuBuffer, GraphicsError> {
        buffer.native().ok_or_else(|| {
            GraphicsError::InvalidParameter(format!(
                "buffer {} has no GPU data",
                buffer.resource_state().id().raw()
            ))
        })
    }

    fn native_texture(texture: &Texture) -> Result<GpuTexture, GraphicsError> {
        texture.native().ok_or_else(|| {
            GraphicsError::InvalidParameter(format!(
                "texture {} has no GPU data",
                texture.resource_state().id().raw()
            ))
        })
    }

    fn track_buffer(&mut self, buffer: &Arc<Buffer>) {
        self.track_resource(AnyResource::Buffer(Arc::clone(buffer)));
    }

    fn track_texture(&mut self, texture: &Arc<Texture>) {
        self.track_resource(AnyResource::Texture(Arc::clone(texture)));
    }

    pub fn bind_buffer(&mut self, slot: u32, binding: &BindBufferInfo) -> Result<(), GraphicsError> {
        let buffer = Self::native_buffer(&binding.buffer)?;
        self.track_buffer(&binding.buffer);
        self.encode(Command::BindBuffer {
            slot,
            buffer,
            offset: binding.offset,
            size: binding.size,
        });
        Ok(())
    }

    /// Copy `src` into `dst`. Only `dst.offset` is used for the destination;
    /// the copy size is `src.size`.
    pub fn copy_buffer_to_buffer(
        &mut self,
        src: &BindBufferInfo,
        dst: &BindBufferInfo,
    ) -> Result<(), GraphicsError> {
        if u64::from(dst.offset) + u64::from(src.size) > u64::from(dst.buffer.size()) {
            return Err(GraphicsError::InvalidParameter(format!(
                "copy of {} bytes at {} overruns a {} byte buffer",
                src.size,
                dst.offset,
                dst.buffer.size()
            )));
        }
        let src_native = Self::native_buffer(&src.buffer)?;
        let dst_native = Self::native_buffer(&dst.buffer)?;
        self.track_buffer(&src.buffer);
        self.track_buffer(&dst.buffer);
        self.encode(Command::CopyBufferToBuffer {
            src: src_native,
            src_offset: src.offset,
            dst: dst_native,
            dst_offset: dst.offset,
            size: src.size,
        });
        Ok(())
    }

    pub fn copy_buffer_to_texture(
        &mut self,
        src: &BindBufferInfo,
        bytes_per_row: u32,
        dst: &Arc<Texture>,
        region: TextureRegion,
    ) -> Result<(), GraphicsError> {
        if !region.fits_within(dst.width(), dst.height()) {
            return Err(GraphicsError::InvalidParameter(format!(
                "region {:?} outside {}x{} texture",
                region,
                dst.width(),
                dst.height()
            )));
        }
        let src_native = Self::native_buffer(&src.buffer)?;
        let dst_native = Self::native_texture(dst)?;
        self.track_buffer(&src.buffer);
        self.track_texture(dst);
        self.encode(Command::CopyBufferToTexture {
            src: src_native,
            src_offset: src.offset,
            bytes_per_row,
            dst: dst_native,
            region,
        });
        Ok(())
    }

    pub fn copy_texture_to_buffer(
        &mut self,
        src: &Arc<Texture>,
        region: TextureRegion,
        dst: &BindBufferInfo,
        bytes_per_row: u32,
    ) -> Result<(), GraphicsError> {
        if !region.fits_within(src.width(), src.height()) {
            return Err(GraphicsError::InvalidParameter(format!(
                "region {:?} outside {}x{} texture",
                region,
                src.width(),
                src.height()
            )));
        }
        let src_native = Self::native_texture(src)?;
        let dst_native = Self::native_buffer(&dst.buffer)?;
        self.track_texture(src);
        self.track_buffer(&dst.buffer);
        self.encode(Command::CopyTextureToBuffer {
            src: src_native,
            region,
            dst: dst_native,
            dst_offset: dst.offset,
            bytes_per_row,
        });
        Ok(())
    }

    /// Zero the range.
    pub fn clear_buffer(&mut self, range: &BindBufferInfo) -> Result<(), GraphicsError> {
        let buffer = Self::native_buffer(&range.buffer)?;
        self.track_buffer(&range.buffer);
        self.encode(Command::ClearBuffer {
            buffer,
            offset: range.offset,
            size: range.size,
        });
        Ok(())
    }

    pub fn begin_render_pass(
        &mut self,
        target: &Arc<Texture>,
        load: LoadOp,
        translation: [i32; 2],
    ) -> Result<(), GraphicsError> {
        assert!(!self.in_render_pass, "CommandBuffer: nested render pass");
        let native = Self::native_texture(target)?;
        self.track_texture(target);
        self.in_render_pass = true;
        self.encode(Command::BeginRenderPass {
            target: native,
            load,
            translation,
        });
        Ok(())
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        assert!(self.in_render_pass, "CommandBuffer: draw outside a render pass");
        self.encode(Command::Draw {
            vertex_count,
            instance_count,
        });
    }

    pub fn end_render_pass(&mut self) {
        assert!(self.in_render_pass, "CommandBuffer: no render pass to end");
        self.in_render_pass = false;
        self.encode(Command::EndRenderPass);
    }

    pub fn dispatch(&mut self, workgroups: [u32; 3]) {
        assert!(!self.in_render_pass, "CommandBuffer: dispatch inside a render pass");
        self.encode(Command::Dispatch { workgroups });
    }

    pub(crate) fn submit(&mut self) -> Result<GpuFence, GraphicsError> {
        debug_assert!(!self.in_render_pass);
        let fence = self.backend.submit(&mut self.native)?;
        self.state = CommandBufferState::Submitted;
        Ok(fence)
    }

    /// Fire finish callbacks and drop every tracked ref.
    pub(crate) fn finish(&mut self, result: CallbackResult) {
        for callback in self.finish_callbacks.drain(..) {
            callback(result);
        }
        self.tracked.clear();
        self.state = CommandBufferState::Finished;
    }

    /// Make the command buffer recordable again.
    pub(crate) fn reset(&mut self) {
        if !self.finish_callbacks.is_empty() {
            self.finish(CallbackResult::Failed);
        }
        self.tracked.clear();
        self.backend.reset_command_buffer(&mut self.native);
        self.in_render_pass = false;
        self.state = CommandBufferState::Idle;
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        if !self.finish_callbacks.is_empty() {
            log::debug!(
                "CommandBuffer: dropped with {} pending callbacks",
                self.finish_callbacks.len()
            );
            self.finish(CallbackResult::Failed);
        }
    }
}

impl std::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("state", &self.state)
            .field("tracked", &self.tracked.len())
            .field("callbacks", &self.finish_callbacks.len())
            .finish()
    }
}

static_assertions::assert_impl_all!(CommandBuffer: Send);
