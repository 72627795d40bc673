//! One-shot packing of immutable vertex and index data.

use std::sync::Arc;

use crate::provider::ResourceProvider;
use crate::queue_manager::QueueManager;
use crate::resources::{Buffer, ResourceRef, Shareable};
use crate::task::{CopyBufferToBufferTask, Task};
use crate::types::{AccessPattern, BufferType};

use super::{
    BindBufferInfo, BufferWriter, DEFAULT_UPLOAD_BUFFER_SIZE, DeferredBinding,
    UploadBufferManager, align_to, lcm,
};

/// Vertex element counts are padded to a multiple of this.
const VERTEX_ELEMENT_PADDING: u32 = 4;

/// Outcome of [`StaticBufferManager::finalize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishResult {
    Success,
    /// Nothing was staged.
    NoWork,
    Failure,
}

struct CopyRange {
    source: BindBufferInfo,
    target: DeferredBinding,
    required_alignment: u32,
}

/// Collects data that never changes and packs it into one GPU-private buffer
/// per type.
///
/// Writers stage bytes in transfer memory right away. The final location is
/// only known after [`finalize`](Self::finalize), so callers bind through the
/// returned [`DeferredBinding`].
pub struct StaticBufferManager {
    provider: Arc<ResourceProvider>,
    upload: UploadBufferManager,
    vertex: Vec<CopyRange>,
    index: Vec<CopyRange>,
    buffers: Vec<ResourceRef<Buffer>>,
    mapping_failed: bool,
    finalized: bool,
}

impl StaticBufferManager {
    pub fn new(provider: Arc<ResourceProvider>) -> Self {
        let upload = UploadBufferManager::new(Arc::clone(&provider), DEFAULT_UPLOAD_BUFFER_SIZE);
        Self {
            provider,
            upload,
            vertex: Vec::new(),
            index: Vec::new(),
            buffers: Vec::new(),
            mapping_failed: false,
            finalized: false,
        }
    }

    /// Stage `count` vertices of `stride` bytes.
    ///
    /// The element count is padded to a multiple of four and the pad bytes
    /// are zeroed, so hardware that reads past the end of small vertex
    /// buffers sees zeros.
    pub fn get_vertex_writer(&mut self, count: u32, stride: u32) -> Option<(BufferWriter, DeferredBinding)> {
        let padded = align_to(count, VERTEX_ELEMENT_PADDING)?;
        let (Some(bytes), Some(written), Some(alignment)) = (
            padded.checked_mul(stride),
            count.checked_mul(stride),
            lcm(stride, 4),
        ) else {
            self.mapping_failed = true;
            return None;
        };
        self.stage(BufferType::Vertex, bytes, written, alignment)
    }

    /// Stage `count` indices of `stride` bytes.
    pub fn get_index_writer(&mut self, count: u32, stride: u32) -> Option<(BufferWriter, DeferredBinding)> {
        let (Some(bytes), Some(alignment)) = (count.checked_mul(stride), lcm(stride, 4)) else {
            self.mapping_failed = true;
            return None;
        };
        self.stage(BufferType::Index, bytes, bytes, alignment)
    }

    fn stage(
        &mut self,
        buffer_type: BufferType,
        bytes: u32,
        written: u32,
        required_alignment: u32,
    ) -> Option<(BufferWriter, DeferredBinding)> {
        assert!(!self.finalized, "StaticBufferManager: write after finalize");
        if self.mapping_failed || bytes == 0 {
            return None;
        }
        let alignment = self.provider.caps().required_transfer_buffer_alignment();
        let Some(source) = self.upload.get_transfer_range(bytes, alignment) else {
            self.mapping_failed = true;
            return None;
        };

        if written < bytes {
            let pad = BindBufferInfo::new(
                Arc::clone(&source.buffer),
                source.offset + written,
                bytes - written,
            );
            BufferWriter::new(pad.clone(), Some(pad)).fill_zero();
        }

        let staged = BindBufferInfo::new(Arc::clone(&source.buffer), source.offset, written);
        let writer = BufferWriter::new(staged.clone(), Some(staged));
        let target = DeferredBinding::new();
        let range = CopyRange {
            source,
            target: target.clone(),
            required_alignment,
        };
        match buffer_type {
            BufferType::Index => self.index.push(range),
            _ => self.vertex.push(range),
        }
        Some((writer, target))
    }

    /// Allocate the GPU-private buffers and queue one copy per staged range.
    ///
    /// Offsets are assigned in a single linear sweep, each range aligned to
    /// its own requirement. Deferred bindings resolve only when every copy
    /// was queued.
    pub fn finalize(&mut self, queue: &mut QueueManager) -> FinishResult {
        assert!(!self.finalized, "StaticBufferManager: finalized twice");
        self.finalized = true;
        if self.mapping_failed {
            log::warn!("StaticBufferManager: staging failed, nothing uploaded");
            self.upload.take_buffers();
            return FinishResult::Failure;
        }
        if self.vertex.is_empty() && self.index.is_empty() {
            return FinishResult::NoWork;
        }

        // The queued copies hold command buffer refs on the staging buffers.
        let _staging = self.upload.take_buffers();
        let mut resolved = Vec::new();
        let sets = [
            (BufferType::Vertex, std::mem::take(&mut self.vertex)),
            (BufferType::Index, std::mem::take(&mut self.index)),
        ];
        for (buffer_type, ranges) in sets {
            if ranges.is_empty() {
                continue;
            }
            let Some((offsets, total)) = Self::pack(&ranges) else {
                log::warn!("StaticBufferManager: {:?} data overflows a 32-bit size", buffer_type);
                return FinishResult::Failure;
            };
            let buffer = match self.provider.find_or_create_buffer(
                total,
                buffer_type,
                AccessPattern::GpuOnly,
                Shareable::No,
                None,
            ) {
                Ok(buffer) => buffer,
                Err(err) => {
                    log::warn!("StaticBufferManager: failed to create {:?} buffer: {}", buffer_type, err);
                    return FinishResult::Failure;
                }
            };

            for (range, offset) in ranges.into_iter().zip(offsets) {
                let dst = BindBufferInfo::new(Arc::clone(buffer.arc()), offset, range.source.size);
                let mut task =
                    Task::CopyBufferToBuffer(CopyBufferToBufferTask::new(range.source, dst.clone()));
                if let Err(err) = queue.add_task(&mut task) {
                    log::warn!("StaticBufferManager: failed to queue copy: {}", err);
                    return FinishResult::Failure;
                }
                resolved.push((range.target, dst));
            }
            log::debug!(
                "StaticBufferManager: packed {} bytes of {:?} data",
                total,
                buffer_type
            );
            self.buffers.push(buffer);
        }

        for (target, binding) in resolved {
            target.resolve(binding);
        }
        FinishResult::Success
    }

    /// Offsets of each range and the total size after one linear sweep.
    fn pack(ranges: &[CopyRange]) -> Option<(Vec<u32>, u32)> {
        let mut offsets = Vec::with_capacity(ranges.len());
        let mut end = 0u32;
        for range in ranges {
            let offset = align_to(end, range.required_alignment)?;
            offsets.push(offset);
            end = offset.checked_add(range.source.size)?;
        }
        Some((offsets, end))
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// The packed GPU buffers, once finalized.
    pub fn buffers(&self) -> impl Iterator<Item = &Arc<Buffer>> {
        self.buffers.iter().map(ResourceRef::arc)
    }
}

impl std::fmt::Debug for StaticBufferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticBufferManager")
            .field("vertex_ranges", &self.vertex.len())
            .field("index_ranges", &self.index.len())
            .field("finalized", &self.finalized)
            .finish()
    }
}
