//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't talk to a GPU but emulates one in host memory, so the
//! recording core can be exercised end to end: buffer contents are real bytes,
//! copies and clears run when a command buffer is submitted, and fences either
//! signal immediately or when the test says so.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::GraphicsError;
use crate::types::{AccessPattern, BufferType, TextureDescriptor, TextureRegion};

use super::{Command, GpuBackend, GpuBuffer, GpuCommandBuffer, GpuFence, GpuTexture, LoadOp};

/// When submitted work is reported as finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionMode {
    /// Fences are signaled during submit.
    #[default]
    Immediate,
    /// Fences stay pending until [`DummyBackend::complete_pending`] or a
    /// blocking wait reaches them.
    Manual,
}

/// Behavior switches for the dummy backend.
#[derive(Debug, Clone, Default)]
pub struct DummyConfig {
    pub completion: CompletionMode,
    /// Number of map calls that succeed before every further map fails.
    pub fail_map_after: Option<usize>,
    pub fail_buffer_creation: bool,
    pub fail_submission: bool,
}

impl DummyConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_completion(mut self, completion: CompletionMode) -> Self {
        self.completion = completion;
        self
    }

    pub fn with_fail_map_after(mut self, successful_maps: usize) -> Self {
        self.fail_map_after = Some(successful_maps);
        self
    }

    pub fn with_fail_buffer_creation(mut self, fail: bool) -> Self {
        self.fail_buffer_creation = fail;
        self
    }

    pub fn with_fail_submission(mut self, fail: bool) -> Self {
        self.fail_submission = fail;
        self
    }
}

/// Host memory standing in for a GPU buffer.
#[derive(Debug, Clone)]
pub struct DummyBuffer {
    id: u64,
    size: u32,
    data: Arc<Mutex<Vec<u8>>>,
    mapped: Arc<AtomicBool>,
}

impl DummyBuffer {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn size(&self) -> u32 {
        self.size
    }
}

/// Host memory standing in for a GPU texture. Rows are tightly packed.
#[derive(Debug, Clone)]
pub struct DummyTexture {
    id: u64,
    width: u32,
    height: u32,
    bytes_per_pixel: u32,
    data: Arc<Mutex<Vec<u8>>>,
}

impl DummyTexture {
    pub fn id(&self) -> u64 {
        self.id
    }

    fn row_offset(&self, x: u32, y: u32) -> usize {
        ((y * self.width + x) * self.bytes_per_pixel) as usize
    }
}

/// Commands recorded for later execution.
#[derive(Debug, Default)]
pub struct DummyCommandBuffer {
    commands: Vec<Command>,
}

impl DummyCommandBuffer {
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct DummyFence {
    signaled: Arc<AtomicBool>,
}

/// Dummy GPU backend.
#[derive(Debug)]
pub struct DummyBackend {
    config: Mutex<DummyConfig>,
    next_id: AtomicU64,
    pending: Mutex<VecDeque<DummyFence>>,
    buffers_created: AtomicUsize,
    textures_created: AtomicUsize,
    submissions: AtomicUsize,
    draws: AtomicUsize,
    dispatches: AtomicUsize,
    last_translation: Mutex<[i32; 2]>,
}

impl DummyBackend {
    /// Create a new dummy backend with immediate completion.
    pub fn new() -> Self {
        Self::with_config(DummyConfig::default())
    }

    pub fn with_config(config: DummyConfig) -> Self {
        Self {
            config: Mutex::new(config),
            next_id: AtomicU64::new(1),
            pending: Mutex::new(VecDeque::new()),
            buffers_created: AtomicUsize::new(0),
            textures_created: AtomicUsize::new(0),
            submissions: AtomicUsize::new(0),
            draws: AtomicUsize::new(0),
            dispatches: AtomicUsize::new(0),
            last_translation: Mutex::new([0, 0]),
        }
    }

    /// Let `successful_maps` more map calls succeed, then fail the rest.
    pub fn set_fail_map_after(&self, successful_maps: Option<usize>) {
        self.config.lock().fail_map_after = successful_maps;
    }

    pub fn set_fail_buffer_creation(&self, fail: bool) {
        self.config.lock().fail_buffer_creation = fail;
    }

    pub fn set_fail_submission(&self, fail: bool) {
        self.config.lock().fail_submission = fail;
    }

    /// Signal every pending fence, oldest first.
    pub fn complete_pending(&self) -> usize {
        let mut pending = self.pending.lock();
        let count = pending.len();
        for fence in pending.drain(..) {
            fence.signaled.store(true, Ordering::Release);
        }
        log::trace!("DummyBackend: completed {} pending submissions", count);
        count
    }

    /// Signal only the oldest pending fence.
    pub fn complete_oldest(&self) -> bool {
        match self.pending.lock().pop_front() {
            Some(fence) => {
                fence.signaled.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    pub fn pending_submissions(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn buffers_created(&self) -> usize {
        self.buffers_created.load(Ordering::Relaxed)
    }

    pub fn textures_created(&self) -> usize {
        self.textures_created.load(Ordering::Relaxed)
    }

    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::Relaxed)
    }

    pub fn draw_count(&self) -> usize {
        self.draws.load(Ordering::Relaxed)
    }

    pub fn dispatch_count(&self) -> usize {
        self.dispatches.load(Ordering::Relaxed)
    }

    /// Translation of the most recently executed render pass.
    pub fn last_translation(&self) -> [i32; 2] {
        *self.last_translation.lock()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn execute(&self, command: &Command) {
        match command {
            Command::BindBuffer { .. } => {}
            Command::CopyBufferToBuffer {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } => {
                let bytes = self.read_buffer(src, *src_offset, *size);
                let GpuBuffer::Dummy(dst) = dst;
                let start = *dst_offset as usize;
                dst.data.lock()[start..start + bytes.len()].copy_from_slice(&bytes);
            }
            Command::CopyBufferToTexture {
                src,
                src_offset,
                bytes_per_row,
                dst,
                region,
            } => {
                let GpuBuffer::Dummy(src) = src;
                let GpuTexture::Dummy(dst) = dst;
                let src_data = src.data.lock().clone();
                let mut dst_data = dst.data.lock();
                let row_bytes = (region.width * dst.bytes_per_pixel) as usize;
                for row in 0..region.height {
                    let from = (*src_offset + row * *bytes_per_row) as usize;
                    let to = dst.row_offset(region.x, region.y + row);
                    dst_data[to..to + row_bytes].copy_from_slice(&src_data[from..from + row_bytes]);
                }
            }
            Command::CopyTextureToBuffer {
                src,
                region,
                dst,
                dst_offset,
                bytes_per_row,
            } => {
                let GpuTexture::Dummy(src) = src;
                let GpuBuffer::Dummy(dst) = dst;
                let src_data = src.data.lock().clone();
                let mut dst_data = dst.data.lock();
                let row_bytes = (region.width * src.bytes_per_pixel) as usize;
                for row in 0..region.height {
                    let from = src.row_offset(region.x, region.y + row);
                    let to = (*dst_offset + row * *bytes_per_row) as usize;
                    dst_data[to..to + row_bytes].copy_from_slice(&src_data[from..from + row_bytes]);
                }
            }
            Command::ClearBuffer {
                buffer,
                offset,
                size,
            } => {
                let GpuBuffer::Dummy(buffer) = buffer;
                let start = *offset as usize;
                buffer.data.lock()[start..start + *size as usize].fill(0);
            }
            Command::BeginRenderPass {
                target,
                load,
                translation,
            } => {
                *self.last_translation.lock() = *translation;
                if let LoadOp::Clear(color) = load {
                    let GpuTexture::Dummy(target) = target;
                    let mut data = target.data.lock();
                    if target.bytes_per_pixel == 4 {
                        let texel = color.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8);
                        for chunk in data.chunks_exact_mut(4) {
                            chunk.copy_from_slice(&texel);
                        }
                    } else {
                        data.fill(0);
                    }
                }
            }
            Command::Draw { .. } => {
                self.draws.fetch_add(1, Ordering::Relaxed);
            }
            Command::EndRenderPass => {}
            Command::Dispatch { .. } => {
                self.dispatches.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy Backend"
    }

    fn create_buffer(
        &self,
        size: u32,
        buffer_type: BufferType,
        access: AccessPattern,
    ) -> Result<GpuBuffer, GraphicsError> {
        if self.config.lock().fail_buffer_creation {
            return Err(GraphicsError::ResourceCreationFailed(format!(
                "dummy {buffer_type:?} buffer of {size} bytes"
            )));
        }
        let id = self.next_id();
        log::trace!(
            "DummyBackend: creating buffer {} ({:?}, {:?}, size: {})",
            id,
            buffer_type,
            access,
            size
        );
        self.buffers_created.fetch_add(1, Ordering::Relaxed);
        Ok(GpuBuffer::Dummy(DummyBuffer {
            id,
            size,
            data: Arc::new(Mutex::new(vec![0; size as usize])),
            mapped: Arc::new(AtomicBool::new(false)),
        }))
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<GpuTexture, GraphicsError> {
        let id = self.next_id();
        log::trace!(
            "DummyBackend: creating texture {} {:?} ({}x{})",
            id,
            descriptor.label,
            descriptor.width,
            descriptor.height
        );
        self.textures_created.fetch_add(1, Ordering::Relaxed);
        Ok(GpuTexture::Dummy(DummyTexture {
            id,
            width: descriptor.width,
            height: descriptor.height,
            bytes_per_pixel: descriptor.format.block_size(),
            data: Arc::new(Mutex::new(vec![0; descriptor.byte_size() as usize])),
        }))
    }

    fn map_buffer(&self, buffer: &GpuBuffer) -> Result<(), GraphicsError> {
        let GpuBuffer::Dummy(buffer) = buffer;
        {
            let mut config = self.config.lock();
            if let Some(remaining) = config.fail_map_after.as_mut() {
                if *remaining == 0 {
                    return Err(GraphicsError::MappingFailed(format!(
                        "dummy buffer {}",
                        buffer.id
                    )));
                }
                *remaining -= 1;
            }
        }
        buffer.mapped.store(true, Ordering::Release);
        Ok(())
    }

    fn unmap_buffer(&self, buffer: &GpuBuffer) {
        let GpuBuffer::Dummy(buffer) = buffer;
        buffer.mapped.store(false, Ordering::Release);
    }

    fn write_buffer(&self, buffer: &GpuBuffer, offset: u32, data: &[u8]) {
        let GpuBuffer::Dummy(buffer) = buffer;
        assert!(
            buffer.mapped.load(Ordering::Acquire),
            "DummyBackend: write to unmapped buffer {}",
            buffer.id
        );
        let start = offset as usize;
        buffer.data.lock()[start..start + data.len()].copy_from_slice(data);
    }

    fn read_buffer(&self, buffer: &GpuBuffer, offset: u32, size: u32) -> Vec<u8> {
        let GpuBuffer::Dummy(buffer) = buffer;
        let start = offset as usize;
        buffer.data.lock()[start..start + size as usize].to_vec()
    }

    fn read_texture(&self, texture: &GpuTexture) -> Vec<u8> {
        let GpuTexture::Dummy(texture) = texture;
        texture.data.lock().clone()
    }

    fn create_command_buffer(&self) -> Result<GpuCommandBuffer, GraphicsError> {
        log::trace!("DummyBackend: creating command buffer");
        Ok(GpuCommandBuffer::Dummy(DummyCommandBuffer::default()))
    }

    fn encode(&self, command_buffer: &mut GpuCommandBuffer, command: Command) {
        let GpuCommandBuffer::Dummy(command_buffer) = command_buffer;
        command_buffer.commands.push(command);
    }

    fn reset_command_buffer(&self, command_buffer: &mut GpuCommandBuffer) {
        let GpuCommandBuffer::Dummy(command_buffer) = command_buffer;
        command_buffer.commands.clear();
    }

    fn submit(&self, command_buffer: &mut GpuCommandBuffer) -> Result<GpuFence, GraphicsError> {
        let GpuCommandBuffer::Dummy(command_buffer) = command_buffer;
        let (fail, completion) = {
            let config = self.config.lock();
            (config.fail_submission, config.completion)
        };
        if fail {
            command_buffer.commands.clear();
            return Err(GraphicsError::SubmissionFailed(
                "dummy submission rejected".to_string(),
            ));
        }

        log::trace!(
            "DummyBackend: executing {} commands",
            command_buffer.commands.len()
        );
        for command in command_buffer.commands.drain(..) {
            self.execute(&command);
        }
        self.submissions.fetch_add(1, Ordering::Relaxed);

        let fence = DummyFence {
            signaled: Arc::new(AtomicBool::new(completion == CompletionMode::Immediate)),
        };
        if completion == CompletionMode::Manual {
            self.pending.lock().push_back(fence.clone());
        }
        Ok(GpuFence::Dummy(fence))
    }

    fn is_fence_signaled(&self, fence: &GpuFence) -> bool {
        let GpuFence::Dummy(fence) = fence;
        fence.signaled.load(Ordering::Acquire)
    }

    fn wait_fence(&self, fence: &GpuFence) {
        let GpuFence::Dummy(fence) = fence;
        // Submissions complete in order, so waiting on one finishes every
        // older submission too.
        while !fence.signaled.load(Ordering::Acquire) {
            if !self.complete_oldest() {
                std::thread::yield_now();
            }
        }
    }
}
