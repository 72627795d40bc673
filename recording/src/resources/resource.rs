//! Dual reference-counted lifecycle shared by every GPU-backed object.
//!
//! A resource carries two independent counters:
//!
//! - the *usage* count, held by CPU-side owners through [`ResourceRef`];
//! - the *command buffer* count, held by submitted work through
//!   [`CommandBufferUsage`].
//!
//! The first usage ref is special. Only the cache and the provider may add it
//! (through the crate-private [`ResourcePriv`] view), so a resource whose usage
//! count dropped to zero can never be revived by an ordinary holder. Cloning a
//! [`ResourceRef`] asserts that the count is already non-zero.
//!
//! When either counter reaches zero the resource is offered back to its
//! cache's return queue. A resource that has no live cache releases its
//! native data as soon as both counters are zero, exactly once.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::types::ResourceKey;

use super::{Buffer, Texture};

/// Process-unique identity of a resource within its provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub(crate) u64);

impl ResourceId {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Which counter just reached zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastRemovedRef {
    Usage,
    CommandBuffer,
}

/// How a cached resource may be shared between users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Shareable {
    /// One user at a time.
    #[default]
    No,
    /// Shared within one recording session, excluding resources the caller
    /// marks unavailable.
    Scratch,
    /// Any number of simultaneous users.
    Yes,
}

impl Shareable {
    fn to_u8(self) -> u8 {
        match self {
            Self::No => 0,
            Self::Scratch => 1,
            Self::Yes => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Scratch,
            2 => Self::Yes,
            _ => Self::No,
        }
    }
}

/// Whether a resource's memory counts against the cache budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Budgeted {
    No,
    #[default]
    Yes,
}

/// Per-resource lifecycle bookkeeping.
pub struct ResourceState {
    id: ResourceId,
    key: ResourceKey,
    gpu_memory_size: u64,
    usage_refs: AtomicU32,
    command_buffer_refs: AtomicU32,
    destroyed: AtomicBool,
    shareable: AtomicU8,
    budgeted: AtomicBool,
    return_queue: Mutex<Weak<ReturnQueue>>,
}

impl ResourceState {
    pub(crate) fn new(id: ResourceId, key: ResourceKey, gpu_memory_size: u64) -> Self {
        Self {
            id,
            key,
            gpu_memory_size,
            usage_refs: AtomicU32::new(0),
            command_buffer_refs: AtomicU32::new(0),
            destroyed: AtomicBool::new(false),
            shareable: AtomicU8::new(Shareable::No.to_u8()),
            budgeted: AtomicBool::new(true),
            return_queue: Mutex::new(Weak::new()),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn key(&self) -> ResourceKey {
        self.key
    }

    pub fn gpu_memory_size(&self) -> u64 {
        self.gpu_memory_size
    }

    pub fn usage_ref_count(&self) -> u32 {
        self.usage_refs.load(Ordering::Acquire)
    }

    pub fn command_buffer_ref_count(&self) -> u32 {
        self.command_buffer_refs.load(Ordering::Acquire)
    }

    /// Both counters are zero.
    pub fn is_purgeable(&self) -> bool {
        self.usage_ref_count() == 0 && self.command_buffer_ref_count() == 0
    }

    pub fn was_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    pub fn shareable(&self) -> Shareable {
        Shareable::from_u8(self.shareable.load(Ordering::Acquire))
    }

    pub fn budgeted(&self) -> Budgeted {
        if self.budgeted.load(Ordering::Acquire) {
            Budgeted::Yes
        } else {
            Budgeted::No
        }
    }

    fn add_usage_ref(&self) {
        let prev = self.usage_refs.fetch_add(1, Ordering::AcqRel);
        assert!(prev > 0, "resource {:?}: usage ref added from zero", self.id);
    }

    fn add_initial_usage_ref(&self) {
        self.usage_refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns true if this removed the last usage ref.
    fn remove_usage_ref(&self) -> bool {
        let prev = self.usage_refs.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "resource {:?}: usage ref underflow", self.id);
        prev == 1
    }

    fn add_command_buffer_ref(&self) {
        self.command_buffer_refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns true if this removed the last command buffer ref.
    fn remove_command_buffer_ref(&self) -> bool {
        let prev = self.command_buffer_refs.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "resource {:?}: command buffer ref underflow", self.id);
        prev == 1
    }
}

impl fmt::Debug for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceState")
            .field("id", &self.id)
            .field("usage_refs", &self.usage_ref_count())
            .field("command_buffer_refs", &self.command_buffer_ref_count())
            .field("shareable", &self.shareable())
            .field("destroyed", &self.was_destroyed())
            .finish_non_exhaustive()
    }
}

/// Anything backed by native GPU state.
pub trait Resource: Send + Sync + 'static {
    fn resource_state(&self) -> &ResourceState;

    /// Human-readable type name for logging.
    fn resource_type(&self) -> &'static str;

    /// Release native GPU state. Called at most once.
    fn free_gpu_data(&self);

    /// Whether the resource must be idle on the GPU before it can be handed
    /// out again. True for memory the CPU writes into.
    fn requires_purgeable_for_reuse(&self) -> bool {
        false
    }

    fn into_any(self: Arc<Self>) -> AnyResource;
}

/// Privileged view of a resource. Only cache-side code imports this.
pub(crate) trait ResourcePriv: Resource + Sized {
    /// Add the first usage ref, which ordinary holders may not do.
    fn initial_ref(this: &Arc<Self>) -> ResourceRef<Self> {
        this.resource_state().add_initial_usage_ref();
        ResourceRef {
            resource: Arc::clone(this),
        }
    }
}

impl<R: Resource> ResourcePriv for R {}

/// Cache-side mutators on the shared state.
impl ResourceState {
    pub(crate) fn register_with_cache(&self, queue: &Arc<ReturnQueue>, shareable: Shareable) {
        *self.return_queue.lock() = Arc::downgrade(queue);
        self.set_shareable(shareable);
    }

    pub(crate) fn set_shareable(&self, shareable: Shareable) {
        self.shareable.store(shareable.to_u8(), Ordering::Release);
    }

    pub(crate) fn set_budgeted(&self, budgeted: Budgeted) {
        self.budgeted
            .store(budgeted == Budgeted::Yes, Ordering::Release);
    }

    pub(crate) fn detach_from_cache(&self) {
        *self.return_queue.lock() = Weak::new();
    }
}

/// Run `free_gpu_data` if it has not run yet.
pub(crate) fn dispose<R: Resource + ?Sized>(resource: &R) {
    let state = resource.resource_state();
    if !state.destroyed.swap(true, Ordering::AcqRel) {
        log::trace!(
            "{}: freeing GPU data (id={})",
            resource.resource_type(),
            state.id.0
        );
        resource.free_gpu_data();
    }
}

fn notify_ref_is_zero<R: Resource>(resource: &Arc<R>, removed: LastRemovedRef) {
    let state = resource.resource_state();
    log::trace!(
        "{}: {:?} refs reached zero (id={})",
        resource.resource_type(),
        removed,
        state.id.0
    );
    let queue = state.return_queue.lock().upgrade();
    if let Some(queue) = queue
        && queue.push(Arc::clone(resource).into_any())
    {
        return;
    }
    if state.is_purgeable() {
        dispose(resource.as_ref());
    }
}

/// A usage ref on a resource. Dropping it releases the ref.
pub struct ResourceRef<R: Resource> {
    resource: Arc<R>,
}

impl<R: Resource> ResourceRef<R> {
    pub fn arc(&self) -> &Arc<R> {
        &self.resource
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.resource, &other.resource)
    }

    pub fn id(&self) -> ResourceId {
        self.resource.resource_state().id()
    }
}

impl<R: Resource> Clone for ResourceRef<R> {
    fn clone(&self) -> Self {
        self.resource.resource_state().add_usage_ref();
        Self {
            resource: Arc::clone(&self.resource),
        }
    }
}

impl<R: Resource> Deref for ResourceRef<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.resource
    }
}

impl<R: Resource> Drop for ResourceRef<R> {
    fn drop(&mut self) {
        if self.resource.resource_state().remove_usage_ref() {
            notify_ref_is_zero(&self.resource, LastRemovedRef::Usage);
        }
    }
}

impl<R: Resource> fmt::Debug for ResourceRef<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRef")
            .field("type", &self.resource.resource_type())
            .field("state", self.resource.resource_state())
            .finish()
    }
}

/// A resource of any concrete kind, without holding a ref.
#[derive(Debug, Clone)]
pub enum AnyResource {
    Buffer(Arc<Buffer>),
    Texture(Arc<Texture>),
}

impl AnyResource {
    pub fn state(&self) -> &ResourceState {
        match self {
            Self::Buffer(buffer) => buffer.resource_state(),
            Self::Texture(texture) => texture.resource_state(),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.state().id()
    }

    pub fn resource_type(&self) -> &'static str {
        match self {
            Self::Buffer(buffer) => buffer.resource_type(),
            Self::Texture(texture) => texture.resource_type(),
        }
    }

    pub fn requires_purgeable_for_reuse(&self) -> bool {
        match self {
            Self::Buffer(buffer) => buffer.requires_purgeable_for_reuse(),
            Self::Texture(texture) => texture.requires_purgeable_for_reuse(),
        }
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Buffer(a), Self::Buffer(b)) => Arc::ptr_eq(a, b),
            (Self::Texture(a), Self::Texture(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub(crate) fn initial_ref(&self) -> AnyResourceRef {
        match self {
            Self::Buffer(buffer) => AnyResourceRef::Buffer(Buffer::initial_ref(buffer)),
            Self::Texture(texture) => AnyResourceRef::Texture(Texture::initial_ref(texture)),
        }
    }

    pub(crate) fn dispose(&self) {
        match self {
            Self::Buffer(buffer) => dispose(buffer.as_ref()),
            Self::Texture(texture) => dispose(texture.as_ref()),
        }
    }

    fn notify_ref_is_zero(&self, removed: LastRemovedRef) {
        match self {
            Self::Buffer(buffer) => notify_ref_is_zero(buffer, removed),
            Self::Texture(texture) => notify_ref_is_zero(texture, removed),
        }
    }
}

/// A usage ref on a resource of any concrete kind.
#[derive(Debug, Clone)]
pub enum AnyResourceRef {
    Buffer(ResourceRef<Buffer>),
    Texture(ResourceRef<Texture>),
}

impl AnyResourceRef {
    pub fn as_any(&self) -> AnyResource {
        match self {
            Self::Buffer(buffer) => AnyResource::Buffer(Arc::clone(buffer.arc())),
            Self::Texture(texture) => AnyResource::Texture(Arc::clone(texture.arc())),
        }
    }
}

impl From<ResourceRef<Buffer>> for AnyResourceRef {
    fn from(buffer: ResourceRef<Buffer>) -> Self {
        Self::Buffer(buffer)
    }
}

impl From<ResourceRef<Texture>> for AnyResourceRef {
    fn from(texture: ResourceRef<Texture>) -> Self {
        Self::Texture(texture)
    }
}

/// A command buffer ref on a resource. Dropping it releases the ref.
#[derive(Debug)]
pub struct CommandBufferUsage {
    resource: AnyResource,
}

impl CommandBufferUsage {
    pub fn new(resource: AnyResource) -> Self {
        resource.state().add_command_buffer_ref();
        Self { resource }
    }

    pub fn resource(&self) -> &AnyResource {
        &self.resource
    }
}

impl Drop for CommandBufferUsage {
    fn drop(&mut self) {
        if self.resource.state().remove_command_buffer_ref() {
            self.resource
                .notify_ref_is_zero(LastRemovedRef::CommandBuffer);
        }
    }
}

/// Resources handed back to a cache, waiting to be processed.
#[derive(Debug, Default)]
pub(crate) struct ReturnQueue {
    inner: Mutex<ReturnQueueState>,
}

#[derive(Debug, Default)]
struct ReturnQueueState {
    returned: Vec<AnyResource>,
    shutdown: bool,
}

impl ReturnQueue {
    /// Returns false once the owning cache has shut down.
    pub(crate) fn push(&self, resource: AnyResource) -> bool {
        let mut inner = self.inner.lock();
        if inner.shutdown {
            return false;
        }
        inner.returned.push(resource);
        true
    }

    pub(crate) fn drain(&self) -> Vec<AnyResource> {
        std::mem::take(&mut self.inner.lock().returned)
    }

    /// Refuse further returns and hand back whatever is still queued.
    pub(crate) fn shutdown(&self) -> Vec<AnyResource> {
        let mut inner = self.inner.lock();
        inner.shutdown = true;
        std::mem::take(&mut inner.returned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyBackend, GpuBackend};
    use crate::types::{AccessPattern, BufferType};

    fn make_buffer(id: u64) -> Arc<Buffer> {
        let backend: Arc<dyn GpuBackend> = Arc::new(DummyBackend::new());
        Arc::new(
            Buffer::create(
                &backend,
                ResourceId(id),
                64,
                BufferType::Storage,
                AccessPattern::GpuOnly,
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_uncached_resource_freed_once_both_counts_zero() {
        let buffer = make_buffer(1);
        let usage = Buffer::initial_ref(&buffer);
        let cb = CommandBufferUsage::new(AnyResource::Buffer(Arc::clone(&buffer)));
        assert_eq!(buffer.resource_state().usage_ref_count(), 1);
        assert_eq!(buffer.resource_state().command_buffer_ref_count(), 1);

        drop(usage);
        assert!(!buffer.resource_state().was_destroyed());
        drop(cb);
        assert!(buffer.resource_state().was_destroyed());
        assert!(buffer.native().is_none());
    }

    #[test]
    fn test_clone_adds_usage_ref() {
        let buffer = make_buffer(2);
        let first = Buffer::initial_ref(&buffer);
        let second = first.clone();
        assert_eq!(buffer.resource_state().usage_ref_count(), 2);
        assert!(first.ptr_eq(&second));
        drop(first);
        assert!(!buffer.resource_state().was_destroyed());
        drop(second);
        assert!(buffer.resource_state().was_destroyed());
    }

    #[test]
    fn test_cached_resource_goes_to_return_queue() {
        let buffer = make_buffer(3);
        let queue = Arc::new(ReturnQueue::default());
        buffer
            .resource_state()
            .register_with_cache(&queue, Shareable::No);

        drop(Buffer::initial_ref(&buffer));
        assert!(!buffer.resource_state().was_destroyed());
        let returned = queue.drain();
        assert_eq!(returned.len(), 1);
        assert_eq!(returned[0].id(), ResourceId(3));
    }

    #[test]
    fn test_shutdown_queue_frees_directly() {
        let buffer = make_buffer(4);
        let queue = Arc::new(ReturnQueue::default());
        buffer
            .resource_state()
            .register_with_cache(&queue, Shareable::No);
        assert!(queue.shutdown().is_empty());

        drop(Buffer::initial_ref(&buffer));
        assert!(buffer.resource_state().was_destroyed());
    }

    #[test]
    #[should_panic(expected = "usage ref added from zero")]
    fn test_cannot_resurrect_from_zero() {
        let buffer = make_buffer(5);
        let usage = Buffer::initial_ref(&buffer);
        // Forge a second handle without the privileged path.
        let forged = ResourceRef {
            resource: Arc::clone(usage.arc()),
        };
        drop(usage);
        std::mem::forget(forged.clone());
    }

    #[test]
    #[should_panic(expected = "command buffer ref underflow")]
    fn test_command_buffer_underflow_asserts() {
        let buffer = make_buffer(6);
        buffer.resource_state().remove_command_buffer_ref();
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let buffer = make_buffer(7);
        dispose(buffer.as_ref());
        dispose(buffer.as_ref());
        assert!(buffer.resource_state().was_destroyed());
    }
}
