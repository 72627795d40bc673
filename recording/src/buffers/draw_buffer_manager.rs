//! Pooled per-Recording buffer allocation.
//!
//! One buffer state per [`DrawBufferKind`] keeps at most one partially
//! used buffer available for the next request. A new request first tries to
//! fit behind what is already in that buffer; only when it doesn't fit is a
//! new buffer created, sized by geometric growth between the kind's minimum
//! and maximum block sizes.
//!
//! CPU writable kinds are either mapped directly or backed by a transfer
//! range from the [`UploadBufferManager`], depending on
//! [`Caps::draw_buffer_can_be_mapped`]. Any creation or mapping failure is
//! sticky until the next [`DrawBufferManager::transfer_to_recording`].

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use crate::caps::Caps;
use crate::provider::ResourceProvider;
use crate::recording::RecordingBuilder;
use crate::resources::{Buffer, ResourceRef, ScratchResourceSet, Shareable};
use crate::task::{ClearBuffersTask, CopyBufferToBufferTask, Task};
use crate::types::{AccessPattern, BufferType, ClearBuffer};

use super::sub_allocator::{SubAllocation, block_alignment};
use super::{BindBufferInfo, BufferSubAllocator, BufferWriter, UploadBufferManager, align_to};

const VERTEX_MIN_BLOCK_SIZE: u32 = 16 << 10;
const MIN_BLOCK_SIZE: u32 = 2 << 10;
const MAX_BLOCK_SIZE: u32 = 1 << 20;

/// The buffer pools a [`DrawBufferManager`] keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrawBufferKind {
    Vertex,
    Index,
    Uniform,
    Storage,
    /// Storage only the GPU writes.
    GpuOnlyStorage,
    VertexStorage,
    IndexStorage,
    IndirectStorage,
}

impl DrawBufferKind {
    pub const ALL: [Self; 8] = [
        Self::Vertex,
        Self::Index,
        Self::Uniform,
        Self::Storage,
        Self::GpuOnlyStorage,
        Self::VertexStorage,
        Self::IndexStorage,
        Self::IndirectStorage,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn buffer_type(self) -> BufferType {
        match self {
            Self::Vertex => BufferType::Vertex,
            Self::Index => BufferType::Index,
            Self::Uniform => BufferType::Uniform,
            Self::Storage | Self::GpuOnlyStorage => BufferType::Storage,
            Self::VertexStorage => BufferType::VertexStorage,
            Self::IndexStorage => BufferType::IndexStorage,
            Self::IndirectStorage => BufferType::Indirect,
        }
    }

    /// Whether the CPU writes the contents.
    pub fn is_cpu_writable(self) -> bool {
        matches!(
            self,
            Self::Vertex | Self::Index | Self::Uniform | Self::Storage
        )
    }

    pub fn min_block_size(self) -> u32 {
        match self {
            Self::Vertex => VERTEX_MIN_BLOCK_SIZE,
            _ => MIN_BLOCK_SIZE,
        }
    }

    pub fn max_block_size(self) -> u32 {
        MAX_BLOCK_SIZE
    }

    fn binding_alignment(self, caps: &Caps) -> u32 {
        match self {
            Self::Vertex | Self::Index => 4,
            Self::Uniform => caps.required_uniform_buffer_alignment(),
            _ => caps.required_storage_buffer_alignment(),
        }
    }
}

struct BufferState {
    binding_alignment: u32,
    min_block_size: u32,
    max_block_size: u32,
    available: Option<SubAllocation>,
    last_size: u32,
}

/// A buffer that is done taking allocations and goes into the Recording.
struct UsedBuffer {
    buffer: ResourceRef<Buffer>,
    transfer: Option<BindBufferInfo>,
}

impl UsedBuffer {
    /// Only the first `written` bytes of the transfer range get copied.
    fn new(buffer: ResourceRef<Buffer>, transfer: Option<BindBufferInfo>, written: u32) -> Self {
        Self {
            transfer: transfer.map(|transfer| BindBufferInfo {
                size: written.min(transfer.size),
                ..transfer
            }),
            buffer,
        }
    }
}

/// The manager's view of an allocator the caller still holds.
struct CheckedOut {
    buffer: ResourceRef<Buffer>,
    transfer: Option<BindBufferInfo>,
    reserved: Rc<Cell<u32>>,
}

impl CheckedOut {
    fn into_used(self) -> UsedBuffer {
        UsedBuffer::new(self.buffer, self.transfer, self.reserved.get())
    }
}

impl SubAllocation {
    fn into_used(self) -> UsedBuffer {
        let written = self.reserved.get();
        UsedBuffer::new(self.buffer, self.transfer, written)
    }
}

pub(super) struct ManagerState {
    provider: Arc<ResourceProvider>,
    caps: Caps,
    upload: Rc<RefCell<UploadBufferManager>>,
    states: Vec<BufferState>,
    used: Vec<UsedBuffer>,
    checked_out: Vec<CheckedOut>,
    reusable_scratch: Vec<ResourceRef<Buffer>>,
    unavailable_scratch: ScratchResourceSet,
    clear_ranges: Vec<BindBufferInfo>,
    mapping_failed: bool,
    generation: u64,
}

impl ManagerState {
    /// Whether allocations handed out in `generation` may still reserve.
    pub(super) fn accepts(&self, generation: u64) -> bool {
        !self.mapping_failed && generation == self.generation
    }

    /// Wrap `allocation` for the caller, remembering its buffer so a snap
    /// taken before the allocator is dropped still carries it.
    fn check_out(
        &mut self,
        allocation: SubAllocation,
        owner: &Rc<RefCell<ManagerState>>,
    ) -> BufferSubAllocator {
        self.checked_out.push(CheckedOut {
            buffer: allocation.buffer.clone(),
            transfer: allocation.transfer.clone(),
            reserved: Rc::clone(&allocation.reserved),
        });
        BufferSubAllocator::new(allocation, Rc::downgrade(owner))
    }

    /// Take back an allocator that went out of scope.
    pub(super) fn return_allocation(&mut self, allocation: SubAllocation) {
        if !self.accepts(allocation.generation) {
            // The buffer was already flushed into a Recording or discarded
            // with the failed pools.
            log::trace!(
                "DrawBufferManager: dropping stale {:?} allocator",
                allocation.kind
            );
            return;
        }
        self.checked_out
            .retain(|checked_out| !Rc::ptr_eq(&checked_out.reserved, &allocation.reserved));

        if allocation.scratch {
            self.unavailable_scratch.remove(&allocation.buffer.id());
            self.reusable_scratch.push(allocation.buffer);
            return;
        }

        // Keep whichever buffer has the most room left.
        let state = &mut self.states[allocation.kind.index()];
        match state.available.take() {
            Some(current) if current.remaining_bytes() >= allocation.remaining_bytes() => {
                state.available = Some(current);
                self.used.push(allocation.into_used());
            }
            previous => {
                state.available = Some(allocation);
                if let Some(previous) = previous {
                    self.used.push(previous.into_used());
                }
            }
        }
    }

    fn create_allocation(&mut self, kind: DrawBufferKind, bytes: u32) -> Option<SubAllocation> {
        let state = &mut self.states[kind.index()];
        let rounded = align_to(bytes, state.min_block_size)?;
        let size = if rounded < state.max_block_size {
            let grown = state
                .last_size
                .saturating_mul(2)
                .clamp(state.min_block_size, state.max_block_size);
            rounded.max(grown)
        } else {
            rounded
        };
        state.last_size = size;
        let binding_alignment = state.binding_alignment;

        let cpu_writable = kind.is_cpu_writable();
        let map_directly = cpu_writable && self.caps.draw_buffer_can_be_mapped();
        let access = if map_directly {
            AccessPattern::HostVisible
        } else {
            AccessPattern::GpuOnly
        };
        let buffer = match self.provider.find_or_create_buffer(
            size,
            kind.buffer_type(),
            access,
            Shareable::No,
            None,
        ) {
            Ok(buffer) => buffer,
            Err(err) => {
                log::warn!("DrawBufferManager: failed to create {:?} buffer: {}", kind, err);
                return None;
            }
        };

        let mut transfer = None;
        if map_directly {
            if let Err(err) = buffer.map() {
                log::warn!("DrawBufferManager: failed to map {:?} buffer: {}", kind, err);
                return None;
            }
        } else if cpu_writable {
            let alignment = self.caps.required_transfer_buffer_alignment();
            transfer = Some(self.upload.borrow_mut().get_transfer_range(size, alignment)?);
        }

        log::debug!(
            "DrawBufferManager: new {:?} buffer of {} bytes for a {} byte request",
            kind,
            size,
            bytes
        );
        Some(SubAllocation {
            buffer,
            transfer,
            kind,
            binding_alignment,
            mapped: map_directly,
            offset: 0,
            stride: 0,
            remaining: 0,
            fresh_binding: true,
            scratch: false,
            generation: self.generation,
            reserved: Rc::new(Cell::new(0)),
        })
    }

    fn on_failed_buffer(&mut self) {
        log::warn!("DrawBufferManager: allocation failed, discarding every pooled buffer");
        self.mapping_failed = true;
        self.clear_pools();
    }

    fn clear_pools(&mut self) {
        for state in &mut self.states {
            if let Some(allocation) = state.available.take() {
                allocation.buffer.unmap();
            }
        }
        for used in self.used.drain(..) {
            used.buffer.unmap();
        }
        for checked_out in self.checked_out.drain(..) {
            checked_out.buffer.unmap();
        }
        self.reusable_scratch.clear();
        self.unavailable_scratch.clear();
        self.clear_ranges.clear();
    }

    fn pooled_buffer_count(&self) -> usize {
        self.states
            .iter()
            .filter(|state| state.available.is_some())
            .count()
            + self.used.len()
            + self.reusable_scratch.len()
    }
}

/// Hands out vertex, index, uniform and storage ranges for one Recorder.
pub struct DrawBufferManager {
    state: Rc<RefCell<ManagerState>>,
}

impl DrawBufferManager {
    pub fn new(provider: Arc<ResourceProvider>, upload: Rc<RefCell<UploadBufferManager>>) -> Self {
        let caps = provider.caps().clone();
        let states = DrawBufferKind::ALL
            .iter()
            .map(|kind| BufferState {
                binding_alignment: kind.binding_alignment(&caps),
                min_block_size: kind.min_block_size(),
                max_block_size: kind.max_block_size(),
                available: None,
                last_size: 0,
            })
            .collect();
        Self {
            state: Rc::new(RefCell::new(ManagerState {
                provider,
                caps,
                upload,
                states,
                used: Vec::new(),
                checked_out: Vec::new(),
                reusable_scratch: Vec::new(),
                unavailable_scratch: ScratchResourceSet::new(),
                clear_ranges: Vec::new(),
                mapping_failed: false,
                generation: 0,
            })),
        }
    }

    /// Whether an allocation failed since the last transfer.
    pub fn has_mapping_failed(&self) -> bool {
        self.state.borrow().mapping_failed
    }

    /// An allocator prepared for `count` blocks of `stride` bytes.
    ///
    /// Reuses the kind's available buffer when the aligned request fits
    /// there, otherwise creates a new one. Returns an invalid allocator after
    /// any failure, including sizes or alignments that don't fit in 32 bits.
    ///
    /// Ranges reserved through the allocator belong to the Recording snapped
    /// next, even if the allocator outlives the snap. It can't reserve
    /// anything after that.
    pub fn get_buffer(
        &self,
        kind: DrawBufferKind,
        count: u32,
        stride: u32,
        extra_alignment: u32,
    ) -> BufferSubAllocator {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        if state.mapping_failed || count == 0 || stride == 0 {
            return BufferSubAllocator::invalid();
        }
        // The alignment of a buffer's first binding is a multiple of every
        // later one, so checking it covers reuse of the available buffer too.
        let binding_alignment = state.states[kind.index()].binding_alignment;
        let (Some(bytes), Some(_)) = (
            count.checked_mul(stride),
            block_alignment(kind, binding_alignment, stride, extra_alignment, true),
        ) else {
            log::warn!(
                "DrawBufferManager: {} x {} bytes with alignment {} doesn't fit in 32 bits",
                count,
                stride,
                extra_alignment
            );
            state.on_failed_buffer();
            return BufferSubAllocator::invalid();
        };

        if let Some(mut available) = state.states[kind.index()].available.take() {
            if available.prep_for_stride(stride, extra_alignment, count) {
                return state.check_out(available, &self.state);
            }
            state.used.push(available.into_used());
        }

        let Some(mut allocation) = state.create_allocation(kind, bytes) else {
            state.on_failed_buffer();
            return BufferSubAllocator::invalid();
        };
        if !allocation.prep_for_stride(stride, extra_alignment, count) {
            log::warn!("DrawBufferManager: new {:?} buffer can't fit its request", kind);
            allocation.buffer.unmap();
            state.on_failed_buffer();
            return BufferSubAllocator::invalid();
        }
        state.check_out(allocation, &self.state)
    }

    fn get_writer(
        &self,
        kind: DrawBufferKind,
        count: u32,
        stride: u32,
        extra_alignment: u32,
    ) -> Option<BufferWriter> {
        let mut allocator = self.get_buffer(kind, count, stride, extra_alignment);
        allocator.reserve(count)
    }

    pub fn get_vertex_writer(&self, count: u32, stride: u32) -> Option<BufferWriter> {
        self.get_writer(DrawBufferKind::Vertex, count, stride, 1)
    }

    pub fn get_index_writer(&self, count: u32, stride: u32) -> Option<BufferWriter> {
        self.get_writer(DrawBufferKind::Index, count, stride, 1)
    }

    pub fn get_uniform_writer(&self, count: u32, stride: u32) -> Option<BufferWriter> {
        self.get_writer(DrawBufferKind::Uniform, count, stride, 1)
    }

    pub fn get_ssbo_writer(&self, count: u32, stride: u32) -> Option<BufferWriter> {
        let alignment = self.storage_alignment();
        self.get_writer(DrawBufferKind::Storage, count, stride, alignment)
    }

    fn storage_alignment(&self) -> u32 {
        self.state.borrow().caps.required_storage_buffer_alignment()
    }

    fn get_gpu_only(&self, kind: DrawBufferKind, bytes: u32) -> Option<BindBufferInfo> {
        let alignment = self.storage_alignment();
        self.get_writer(kind, bytes, 1, alignment)
            .map(BufferWriter::into_binding)
    }

    /// Storage written only by the GPU. With `ClearBuffer::Yes` the range is
    /// zeroed before the Recording's tasks run.
    pub fn get_storage(&self, bytes: u32, clear: ClearBuffer) -> Option<BindBufferInfo> {
        let binding = self.get_gpu_only(DrawBufferKind::GpuOnlyStorage, bytes)?;
        if clear == ClearBuffer::Yes {
            self.state.borrow_mut().clear_ranges.push(binding.clone());
        }
        Some(binding)
    }

    pub fn get_vertex_storage(&self, bytes: u32) -> Option<BindBufferInfo> {
        self.get_gpu_only(DrawBufferKind::VertexStorage, bytes)
    }

    pub fn get_index_storage(&self, bytes: u32) -> Option<BindBufferInfo> {
        self.get_gpu_only(DrawBufferKind::IndexStorage, bytes)
    }

    pub fn get_indirect_storage(&self, bytes: u32, clear: ClearBuffer) -> Option<BindBufferInfo> {
        let binding = self.get_gpu_only(DrawBufferKind::IndirectStorage, bytes)?;
        if clear == ClearBuffer::Yes {
            self.state.borrow_mut().clear_ranges.push(binding.clone());
        }
        Some(binding)
    }

    /// A GPU-only storage buffer checked out for the allocator's lifetime.
    ///
    /// While the allocator is alive no other scratch request gets the same
    /// buffer. Once it is dropped the buffer can back any later scratch
    /// request of equal or smaller size in this Recording.
    pub fn get_scratch_storage(&self, bytes: u32) -> BufferSubAllocator {
        let mut state = self.state.borrow_mut();
        if state.mapping_failed || bytes == 0 {
            return BufferSubAllocator::invalid();
        }
        let kind = DrawBufferKind::GpuOnlyStorage;
        let (min_block_size, binding_alignment) = {
            let buffer_state = &state.states[kind.index()];
            (buffer_state.min_block_size, buffer_state.binding_alignment)
        };
        let Some(size) = align_to(bytes, min_block_size) else {
            state.on_failed_buffer();
            return BufferSubAllocator::invalid();
        };

        let reusable = state
            .reusable_scratch
            .iter()
            .enumerate()
            .filter(|(_, buffer)| buffer.size() >= bytes)
            .min_by_key(|(_, buffer)| buffer.size())
            .map(|(index, _)| index);
        let buffer = match reusable {
            Some(index) => state.reusable_scratch.swap_remove(index),
            None => {
                let mut excluded = state.unavailable_scratch.clone();
                excluded.extend(state.reusable_scratch.iter().map(ResourceRef::id));
                match state.provider.find_or_create_buffer(
                    size,
                    kind.buffer_type(),
                    AccessPattern::GpuOnly,
                    Shareable::Scratch,
                    Some(&excluded),
                ) {
                    Ok(buffer) => buffer,
                    Err(err) => {
                        log::warn!("DrawBufferManager: failed to create scratch buffer: {}", err);
                        state.on_failed_buffer();
                        return BufferSubAllocator::invalid();
                    }
                }
            }
        };
        log::trace!(
            "DrawBufferManager: scratch buffer {:?} checked out for {} bytes",
            buffer.id(),
            bytes
        );
        state.unavailable_scratch.insert(buffer.id());
        let generation = state.generation;
        state.check_out(
            SubAllocation {
                buffer,
                transfer: None,
                kind,
                binding_alignment,
                mapped: false,
                offset: 0,
                stride: 0,
                remaining: 0,
                fresh_binding: true,
                scratch: true,
                generation,
                reserved: Rc::new(Cell::new(0)),
            },
            &self.state,
        )
    }

    /// Move every buffer into the Recording being built and start over.
    ///
    /// Buffers behind allocators the caller still holds are included with
    /// whatever was reserved so far. Mapped buffers are unmapped.
    /// Transfer-backed buffers get a copy task for the written prefix, and
    /// requested clears become one clear task.
    /// Growth history is dropped so one Recording's workload doesn't size
    /// the next one's buffers. Returns false, with every pool emptied, if an
    /// allocation failed since the last transfer.
    pub fn transfer_to_recording(&self, builder: &mut RecordingBuilder) -> bool {
        let mut state = self.state.borrow_mut();
        let succeeded = if state.mapping_failed {
            state.clear_pools();
            false
        } else {
            let state = &mut *state;
            for buffer_state in &mut state.states {
                if let Some(allocation) = buffer_state.available.take() {
                    state.used.push(allocation.into_used());
                }
            }
            for checked_out in state.checked_out.drain(..) {
                state.used.push(checked_out.into_used());
            }
            if !state.clear_ranges.is_empty() {
                let ranges = std::mem::take(&mut state.clear_ranges);
                builder.add_prologue_task(Task::ClearBuffers(ClearBuffersTask::new(ranges)));
            }
            for UsedBuffer { buffer, transfer } in state.used.drain(..) {
                buffer.unmap();
                if let Some(transfer) = transfer
                    && transfer.size > 0
                {
                    let size = transfer.size;
                    let dst = BindBufferInfo::new(Arc::clone(buffer.arc()), 0, size);
                    builder.add_prologue_task(Task::CopyBufferToBuffer(
                        CopyBufferToBufferTask::new(transfer, dst),
                    ));
                }
                builder.keep_alive(buffer.into());
            }
            for buffer in state.reusable_scratch.drain(..) {
                builder.keep_alive(buffer.into());
            }
            state.unavailable_scratch.clear();
            true
        };

        state.mapping_failed = false;
        state.generation += 1;
        for buffer_state in &mut state.states {
            buffer_state.last_size = 0;
        }
        log::debug!(
            "DrawBufferManager: transferred to recording (success: {})",
            succeeded
        );
        succeeded
    }

    /// Buffers currently held in pools, excluding checked-out allocators.
    pub fn pooled_buffer_count(&self) -> usize {
        self.state.borrow().pooled_buffer_count()
    }
}

impl std::fmt::Debug for DrawBufferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("DrawBufferManager")
            .field("pooled", &state.pooled_buffer_count())
            .field("mapping_failed", &state.mapping_failed)
            .finish()
    }
}
