//! Sub-allocation of aligned ranges out of one buffer.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::resources::{Buffer, Resource, ResourceRef};

use super::draw_buffer_manager::{DrawBufferKind, ManagerState};
use super::{align_to, lcm};

/// A byte range of a buffer, as bound by tasks.
///
/// This is a view: it keeps the `Buffer` object alive but holds no usage
/// ref, so the range is only meaningful for the lifetime of the Recording or
/// task that produced it. Equality compares buffer identity and offset.
#[derive(Clone)]
pub struct BindBufferInfo {
    pub buffer: Arc<Buffer>,
    pub offset: u32,
    pub size: u32,
}

impl BindBufferInfo {
    pub fn new(buffer: Arc<Buffer>, offset: u32, size: u32) -> Self {
        debug_assert!(u64::from(offset) + u64::from(size) <= u64::from(buffer.size()));
        Self {
            buffer,
            offset,
            size,
        }
    }

    /// One past the last byte of the range.
    pub fn end(&self) -> u32 {
        self.offset + self.size
    }

    /// Whether both ranges share a byte of the same buffer.
    pub fn overlaps(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.buffer, &other.buffer)
            && self.offset < other.end()
            && other.offset < self.end()
    }

    /// Read the range back. Only meaningful once the GPU is done with it.
    pub fn read(&self) -> Vec<u8> {
        self.buffer.read(self.offset, self.size)
    }
}

impl PartialEq for BindBufferInfo {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.buffer, &other.buffer) && self.offset == other.offset
    }
}

impl Eq for BindBufferInfo {}

impl fmt::Debug for BindBufferInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindBufferInfo")
            .field("buffer", &self.buffer.resource_state().id())
            .field("offset", &self.offset)
            .field("size", &self.size)
            .finish()
    }
}

/// A binding that is only known after a later finalize step.
#[derive(Clone, Default)]
pub struct DeferredBinding(Arc<Mutex<Option<BindBufferInfo>>>);

impl DeferredBinding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<BindBufferInfo> {
        self.0.lock().clone()
    }

    pub fn is_resolved(&self) -> bool {
        self.0.lock().is_some()
    }

    pub(crate) fn resolve(&self, binding: BindBufferInfo) {
        *self.0.lock() = Some(binding);
    }
}

impl fmt::Debug for DeferredBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DeferredBinding").field(&*self.0.lock()).finish()
    }
}

/// CPU write access to a reserved range.
///
/// Bytes land either directly in the mapped destination buffer or in the
/// transfer buffer that will be copied into it when the Recording is
/// replayed. Writers for GPU-only ranges carry only the binding.
pub struct BufferWriter {
    binding: BindBufferInfo,
    target: Option<BindBufferInfo>,
    cursor: u32,
}

impl BufferWriter {
    pub(crate) fn new(binding: BindBufferInfo, target: Option<BindBufferInfo>) -> Self {
        debug_assert!(target.as_ref().is_none_or(|t| t.size >= binding.size));
        Self {
            binding,
            target,
            cursor: 0,
        }
    }

    /// The destination range tasks should bind.
    pub fn binding(&self) -> &BindBufferInfo {
        &self.binding
    }

    pub fn into_binding(self) -> BindBufferInfo {
        self.binding
    }

    /// False for GPU-only ranges.
    pub fn is_writable(&self) -> bool {
        self.target.is_some()
    }

    pub fn bytes_written(&self) -> u32 {
        self.cursor
    }

    pub fn remaining(&self) -> u32 {
        self.binding.size - self.cursor
    }

    pub fn write<T: bytemuck::Pod>(&mut self, value: &T) {
        self.write_bytes(bytemuck::bytes_of(value));
    }

    pub fn write_slice<T: bytemuck::Pod>(&mut self, values: &[T]) {
        self.write_bytes(bytemuck::cast_slice(values));
    }

    /// Append raw bytes.
    ///
    /// # Panics
    ///
    /// Panics if the range is GPU-only or the write runs past its end.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        let Some(target) = self.target.as_ref() else {
            panic!("BufferWriter: range is not CPU writable");
        };
        assert!(
            bytes.len() as u64 <= u64::from(self.remaining()),
            "BufferWriter: write of {} bytes exceeds the {} remaining",
            bytes.len(),
            self.remaining()
        );
        target.buffer.write(target.offset + self.cursor, bytes);
        self.cursor += bytes.len() as u32;
    }

    /// Zero-fill the rest of the range.
    pub fn fill_zero(&mut self) {
        let remaining = self.remaining() as usize;
        if remaining > 0 {
            self.write_bytes(&vec![0u8; remaining]);
        }
    }
}

impl fmt::Debug for BufferWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferWriter")
            .field("binding", &self.binding)
            .field("writable", &self.is_writable())
            .field("cursor", &self.cursor)
            .finish()
    }
}

/// Allocator state without the return-on-drop hook. This is what the
/// manager keeps in its pools.
pub(super) struct SubAllocation {
    pub(super) buffer: ResourceRef<Buffer>,
    pub(super) transfer: Option<BindBufferInfo>,
    pub(super) kind: DrawBufferKind,
    pub(super) binding_alignment: u32,
    pub(super) mapped: bool,
    pub(super) offset: u32,
    pub(super) stride: u32,
    pub(super) remaining: u32,
    pub(super) fresh_binding: bool,
    pub(super) scratch: bool,
    pub(super) generation: u64,
    /// End of the last reserved range. Shared with the manager so a
    /// Recording snapped while this allocation is checked out still copies
    /// what was written.
    pub(super) reserved: Rc<Cell<u32>>,
}

/// Offset alignment for `stride`-sized blocks of `kind`, or `None` if it
/// doesn't fit in 32 bits.
///
/// A uniform request is bound on its own, so it starts on the binding
/// alignment; blocks inside one request are packed at `stride`. Other kinds
/// only pay the binding alignment on a buffer's first binding.
pub(super) fn block_alignment(
    kind: DrawBufferKind,
    binding_alignment: u32,
    stride: u32,
    extra_alignment: u32,
    fresh_binding: bool,
) -> Option<u32> {
    if kind == DrawBufferKind::Uniform {
        let natural = 1u32 << stride.trailing_zeros();
        lcm(lcm(binding_alignment, extra_alignment)?, natural)
    } else if fresh_binding {
        lcm(lcm(stride, extra_alignment)?, binding_alignment)
    } else {
        lcm(stride, extra_alignment)
    }
}

impl SubAllocation {
    pub(super) fn remaining_bytes(&self) -> u32 {
        self.buffer.size() - self.offset
    }

    pub(super) fn prep_for_stride(&mut self, stride: u32, extra_alignment: u32, min_count: u32) -> bool {
        debug_assert!(stride > 0, "SubAllocation: zero stride");
        let alignment = block_alignment(
            self.kind,
            self.binding_alignment,
            stride,
            extra_alignment,
            self.fresh_binding,
        );
        let fits = alignment.and_then(|a| align_to(self.offset, a)).and_then(|aligned| {
            let needed = u64::from(min_count) * u64::from(stride);
            (u64::from(aligned) + needed <= u64::from(self.buffer.size())).then_some(aligned)
        });
        match fits {
            Some(aligned) => {
                self.offset = aligned;
                self.stride = stride;
                self.remaining = (self.buffer.size() - aligned) / stride;
                self.fresh_binding = false;
                true
            }
            None => {
                self.remaining = 0;
                false
            }
        }
    }

    pub(super) fn reserve(&mut self, count: u32) -> Option<BufferWriter> {
        if count == 0 || count > self.remaining {
            return None;
        }
        let size = count * self.stride;
        let binding = BindBufferInfo::new(Arc::clone(self.buffer.arc()), self.offset, size);
        let target = if self.mapped {
            Some(binding.clone())
        } else {
            self.transfer.as_ref().map(|transfer| {
                BindBufferInfo::new(
                    Arc::clone(&transfer.buffer),
                    transfer.offset + self.offset,
                    size,
                )
            })
        };
        self.offset += size;
        self.remaining -= count;
        self.reserved.set(self.offset);
        Some(BufferWriter::new(binding, target))
    }
}

/// Cursor over the unused tail of one buffer.
///
/// Move-only. `prep_for_stride` checks whether `min_count` blocks of a new
/// stride still fit and aligns the cursor for them; `reserve` then commits
/// blocks. Dropping the allocator hands the buffer back to the
/// [`DrawBufferManager`](super::DrawBufferManager) that produced it.
pub struct BufferSubAllocator {
    allocation: Option<SubAllocation>,
    owner: Weak<RefCell<ManagerState>>,
}

impl BufferSubAllocator {
    /// An allocator that fails every request.
    pub fn invalid() -> Self {
        Self {
            allocation: None,
            owner: Weak::new(),
        }
    }

    pub(super) fn new(allocation: SubAllocation, owner: Weak<RefCell<ManagerState>>) -> Self {
        Self {
            allocation: Some(allocation),
            owner,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.allocation.is_some()
    }

    /// Whether the owning manager still accepts reservations from this
    /// allocator. Snapping a Recording or a failed allocation ends that.
    fn is_current(&self) -> bool {
        match (&self.allocation, self.owner.upgrade()) {
            (Some(allocation), Some(owner)) => owner.borrow().accepts(allocation.generation),
            _ => false,
        }
    }

    /// Align the cursor for `stride`-sized blocks. Returns false, and leaves
    /// nothing to reserve, if `min_count` blocks don't fit.
    pub fn prep_for_stride(&mut self, stride: u32, extra_alignment: u32, min_count: u32) -> bool {
        if !self.is_current() {
            return false;
        }
        self.allocation
            .as_mut()
            .is_some_and(|allocation| allocation.prep_for_stride(stride, extra_alignment, min_count))
    }

    /// Commit `count` blocks of the current stride.
    ///
    /// Fails once the Recording these blocks would belong to has been
    /// snapped.
    pub fn reserve(&mut self, count: u32) -> Option<BufferWriter> {
        if !self.is_current() {
            return None;
        }
        self.allocation.as_mut()?.reserve(count)
    }

    /// Current cursor position in bytes.
    pub fn offset(&self) -> u32 {
        self.allocation.as_ref().map_or(0, |a| a.offset)
    }

    /// Number of blocks of the current stride still available.
    pub fn remaining(&self) -> u32 {
        self.allocation.as_ref().map_or(0, |a| a.remaining)
    }

    pub fn remaining_bytes(&self) -> u32 {
        self.allocation
            .as_ref()
            .map_or(0, SubAllocation::remaining_bytes)
    }

    pub fn buffer(&self) -> Option<&Arc<Buffer>> {
        self.allocation.as_ref().map(|a| a.buffer.arc())
    }
}

impl Drop for BufferSubAllocator {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take()
            && let Some(owner) = self.owner.upgrade()
        {
            owner.borrow_mut().return_allocation(allocation);
        }
    }
}

impl fmt::Debug for BufferSubAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.allocation {
            Some(a) => f
                .debug_struct("BufferSubAllocator")
                .field("buffer", &a.buffer.id())
                .field("kind", &a.kind)
                .field("offset", &a.offset)
                .field("stride", &a.stride)
                .field("remaining", &a.remaining)
                .finish(),
            None => f.write_str("BufferSubAllocator(invalid)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyBackend, GpuBackend};
    use crate::resources::resource::ResourcePriv;
    use crate::resources::ResourceId;
    use crate::types::{AccessPattern, BufferType};

    fn allocation(kind: DrawBufferKind, size: u32, binding_alignment: u32) -> SubAllocation {
        let backend: Arc<dyn GpuBackend> = Arc::new(DummyBackend::new());
        let buffer = Arc::new(
            Buffer::create(
                &backend,
                ResourceId(1),
                size,
                BufferType::Vertex,
                AccessPattern::HostVisible,
            )
            .unwrap(),
        );
        buffer.map().unwrap();
        SubAllocation {
            buffer: Buffer::initial_ref(&buffer),
            transfer: None,
            kind,
            binding_alignment,
            mapped: true,
            offset: 0,
            stride: 0,
            remaining: 0,
            fresh_binding: true,
            scratch: false,
            generation: 0,
            reserved: Rc::new(Cell::new(0)),
        }
    }

    #[test]
    fn test_same_stride_continues_in_place() {
        let mut alloc = allocation(DrawBufferKind::Vertex, 16384, 4);
        assert!(alloc.prep_for_stride(12, 1, 10));
        assert_eq!(alloc.reserve(10).unwrap().binding().offset, 0);
        assert!(alloc.prep_for_stride(12, 1, 5));
        assert_eq!(alloc.reserve(5).unwrap().binding().offset, 120);
    }

    #[test]
    fn test_stride_change_realigns() {
        let mut alloc = allocation(DrawBufferKind::Vertex, 1024, 4);
        assert!(alloc.prep_for_stride(12, 1, 1));
        alloc.reserve(1).unwrap();
        assert!(alloc.prep_for_stride(16, 1, 1));
        assert_eq!(alloc.reserve(1).unwrap().binding().offset, 16);
        assert!(alloc.prep_for_stride(12, 8, 1));
        // lcm(12, 8) = 24, next multiple of 24 after 32.
        assert_eq!(alloc.offset, 48);
    }

    #[test]
    fn test_uniform_blocks_start_on_binding_alignment() {
        let mut alloc = allocation(DrawBufferKind::Uniform, 2048, 256);
        assert!(alloc.prep_for_stride(100, 1, 1));
        assert_eq!(alloc.reserve(1).unwrap().binding().offset, 0);
        assert!(alloc.prep_for_stride(100, 1, 1));
        assert_eq!(alloc.reserve(1).unwrap().binding().offset, 256);
    }

    #[test]
    fn test_uniform_request_packs_its_blocks() {
        let mut alloc = allocation(DrawBufferKind::Uniform, 2048, 256);
        assert!(alloc.prep_for_stride(100, 1, 3));
        let writer = alloc.reserve(3).unwrap();
        assert_eq!(writer.binding().offset, 0);
        assert_eq!(writer.binding().size, 300);
        // Only the start of the next request is realigned.
        assert!(alloc.prep_for_stride(100, 1, 1));
        assert_eq!(alloc.offset, 512);
    }

    #[test]
    fn test_unrepresentable_alignment_does_not_fit() {
        let mut alloc = allocation(DrawBufferKind::Storage, 1024, 16);
        let alignment = block_alignment(DrawBufferKind::Storage, 16, 0x1000_0001, 16, true);
        assert_eq!(alignment, None);
        assert!(!alloc.prep_for_stride(0x1000_0001, 16, 1));
        assert_eq!(alloc.remaining, 0);
    }

    #[test]
    fn test_reserve_tracks_written_end() {
        let mut alloc = allocation(DrawBufferKind::Vertex, 256, 4);
        assert!(alloc.prep_for_stride(12, 1, 2));
        alloc.reserve(2).unwrap();
        assert_eq!(alloc.reserved.get(), 24);
        // Realignment alone reserves nothing.
        assert!(alloc.prep_for_stride(16, 1, 1));
        assert_eq!(alloc.reserved.get(), 24);
    }

    #[test]
    fn test_no_fit_zeroes_remaining() {
        let mut alloc = allocation(DrawBufferKind::Vertex, 64, 4);
        assert!(alloc.prep_for_stride(16, 1, 4));
        assert_eq!(alloc.remaining, 4);
        assert!(!alloc.prep_for_stride(16, 1, 5));
        assert_eq!(alloc.remaining, 0);
        assert!(alloc.reserve(1).is_none());
    }

    #[test]
    fn test_reserve_more_than_remaining_fails() {
        let mut alloc = allocation(DrawBufferKind::Vertex, 64, 4);
        assert!(alloc.prep_for_stride(16, 1, 1));
        assert!(alloc.reserve(5).is_none());
        assert_eq!(alloc.offset, 0);
        assert!(alloc.reserve(4).is_some());
    }

    #[test]
    fn test_writer_writes_through_mapping() {
        let mut alloc = allocation(DrawBufferKind::Vertex, 64, 4);
        assert!(alloc.prep_for_stride(4, 1, 2));
        let mut writer = alloc.reserve(2).unwrap();
        writer.write(&1u32);
        writer.write(&2u32);
        assert_eq!(writer.remaining(), 0);
        assert_eq!(
            writer.binding().read(),
            [1u32.to_le_bytes(), 2u32.to_le_bytes()].concat()
        );
    }

    #[test]
    #[should_panic(expected = "exceeds the")]
    fn test_writer_overflow_panics() {
        let mut alloc = allocation(DrawBufferKind::Vertex, 64, 4);
        assert!(alloc.prep_for_stride(4, 1, 1));
        let mut writer = alloc.reserve(1).unwrap();
        writer.write(&1u64);
    }

    #[test]
    fn test_bind_buffer_info_equality_ignores_size() {
        let alloc = allocation(DrawBufferKind::Vertex, 64, 4);
        let buffer = Arc::clone(alloc.buffer.arc());
        let a = BindBufferInfo::new(Arc::clone(&buffer), 16, 8);
        let b = BindBufferInfo::new(Arc::clone(&buffer), 16, 32);
        let c = BindBufferInfo::new(buffer, 24, 8);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn test_invalid_allocator_fails_everything() {
        let mut alloc = BufferSubAllocator::invalid();
        assert!(!alloc.is_valid());
        assert!(!alloc.prep_for_stride(4, 1, 1));
        assert!(alloc.reserve(1).is_none());
        assert_eq!(alloc.remaining_bytes(), 0);
    }
}
