//! Top-level owner of the submission side.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backend::GpuBackend;
use crate::buffers::{FinishResult, StaticBufferManager};
use crate::caps::Caps;
use crate::error::GraphicsError;
use crate::provider::ResourceProvider;
use crate::queue_manager::{
    DEFAULT_COMMAND_BUFFER_POOL_SIZE, InsertRecordingInfo, QueueManager, SyncToCpu,
};
use crate::recorder::{Recorder, RecorderOptions};
use crate::resources::{DEFAULT_MAX_BUDGET, ResourceRef, Shareable, Texture};
use crate::types::TextureDescriptor;

/// Configuration for a [`Context`].
#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub caps: Caps,
    /// Budget of the context's resource cache in bytes.
    pub max_budget: u64,
    /// Finished command buffers kept for reuse.
    pub command_buffer_pool_size: usize,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            caps: Caps::default(),
            max_budget: DEFAULT_MAX_BUDGET,
            command_buffer_pool_size: DEFAULT_COMMAND_BUFFER_POOL_SIZE,
        }
    }
}

impl ContextOptions {
    pub fn with_caps(mut self, caps: Caps) -> Self {
        self.caps = caps;
        self
    }

    pub fn with_max_budget(mut self, bytes: u64) -> Self {
        self.max_budget = bytes;
        self
    }

    pub fn with_command_buffer_pool_size(mut self, size: usize) -> Self {
        self.command_buffer_pool_size = size;
        self
    }
}

/// Owns the queue, the shared static data and a resource provider for
/// textures the application creates directly.
///
/// Recorders made by a context have their own resource caches and can live
/// on other threads' stacks; their Recordings come back here through
/// [`insert_recording`](Self::insert_recording).
pub struct Context {
    backend: Arc<dyn GpuBackend>,
    caps: Caps,
    provider: Arc<ResourceProvider>,
    queue: QueueManager,
    static_buffers: StaticBufferManager,
    next_recorder_id: u32,
}

impl Context {
    pub fn new(backend: Arc<dyn GpuBackend>, options: ContextOptions) -> Result<Self, GraphicsError> {
        options.caps.validate()?;
        log::info!("Context: created on {} backend", backend.name());
        let provider = Arc::new(ResourceProvider::new(
            Arc::clone(&backend),
            options.caps.clone(),
            options.max_budget,
        ));
        let queue = QueueManager::new(Arc::clone(&provider))
            .with_command_buffer_pool_size(options.command_buffer_pool_size);
        let static_buffers = StaticBufferManager::new(Arc::clone(&provider));
        Ok(Self {
            backend,
            caps: options.caps,
            provider,
            queue,
            static_buffers,
            next_recorder_id: 0,
        })
    }

    pub fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }

    pub fn caps(&self) -> &Caps {
        &self.caps
    }

    pub fn provider(&self) -> &Arc<ResourceProvider> {
        &self.provider
    }

    pub fn make_recorder(&mut self, options: RecorderOptions) -> Recorder {
        let id = self.next_recorder_id;
        self.next_recorder_id += 1;
        Recorder::new(id, Arc::clone(&self.backend), self.caps.clone(), options)
    }

    /// A texture owned by the application, e.g. a replay target.
    pub fn create_texture(
        &self,
        descriptor: &TextureDescriptor,
    ) -> Result<ResourceRef<Texture>, GraphicsError> {
        self.provider.find_or_create_texture(descriptor, Shareable::No)
    }

    pub fn insert_recording(&mut self, info: InsertRecordingInfo<'_>) -> Result<(), GraphicsError> {
        self.queue.add_recording(info)
    }

    /// Submit pending work, then retire whatever has finished.
    ///
    /// Returns false if the submission failed.
    pub fn submit(&mut self, sync: SyncToCpu) -> bool {
        let submitted = match self.queue.submit_to_gpu() {
            Ok(_) => true,
            Err(err) => {
                log::warn!("Context: submit failed: {}", err);
                false
            }
        };
        self.queue.check_for_finished_work(sync);
        submitted
    }

    pub fn check_async_work_completion(&mut self) {
        self.queue.check_for_finished_work(SyncToCpu::No);
    }

    pub fn has_unfinished_gpu_work(&self) -> bool {
        self.queue.has_unfinished_gpu_work()
    }

    pub fn static_buffers(&self) -> &StaticBufferManager {
        &self.static_buffers
    }

    pub fn static_buffers_mut(&mut self) -> &mut StaticBufferManager {
        &mut self.static_buffers
    }

    /// Pack and upload the static data written so far.
    pub fn finish_initialization(&mut self) -> Result<(), GraphicsError> {
        match self.static_buffers.finalize(&mut self.queue) {
            FinishResult::Success => {
                self.queue.submit_to_gpu()?;
                Ok(())
            }
            FinishResult::NoWork => Ok(()),
            FinishResult::Failure => Err(GraphicsError::ResourceCreationFailed(
                "static buffer upload failed".to_string(),
            )),
        }
    }

    /// Retire finished work and drop every cached resource nobody holds.
    pub fn free_gpu_resources(&mut self) {
        self.queue.check_for_finished_work(SyncToCpu::No);
        self.queue.free_gpu_resources();
    }

    /// Purge cached resources unused for at least `not_used_for`.
    pub fn perform_deferred_cleanup(&mut self, not_used_for: Duration) {
        self.queue.check_for_finished_work(SyncToCpu::No);
        if let Some(cutoff) = Instant::now().checked_sub(not_used_for) {
            self.provider.purge_resources_not_used_since(cutoff);
        }
    }

    pub fn current_budgeted_bytes(&self) -> u64 {
        self.provider.budgeted_bytes()
    }

    pub fn max_budgeted_bytes(&self) -> u64 {
        self.provider.cache().max_budget()
    }

    pub fn set_max_budgeted_bytes(&self, bytes: u64) {
        self.provider.cache().set_max_budget(bytes);
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("backend", &self.backend.name())
            .field("queue", &self.queue)
            .field("static_buffers", &self.static_buffers)
            .finish()
    }
}

static_assertions::assert_impl_all!(Context: Send);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;

    #[test]
    fn test_rejects_invalid_caps() {
        let options = ContextOptions::default().with_caps(Caps::default().with_uniform_alignment(48));
        assert!(Context::new(Arc::new(DummyBackend::new()), options).is_err());
    }

    #[test]
    fn test_finish_initialization_without_static_data() {
        let mut context = Context::new(Arc::new(DummyBackend::new()), ContextOptions::default()).unwrap();
        assert!(context.finish_initialization().is_ok());
        assert!(!context.has_unfinished_gpu_work());
    }

    #[test]
    fn test_recorders_get_distinct_ids() {
        let mut context = Context::new(Arc::new(DummyBackend::new()), ContextOptions::default()).unwrap();
        let a = context.make_recorder(RecorderOptions::default());
        let b = context.make_recorder(RecorderOptions::default());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_budget_round_trip() {
        let context = Context::new(Arc::new(DummyBackend::new()), ContextOptions::default()).unwrap();
        context.set_max_budgeted_bytes(1024);
        assert_eq!(context.max_budgeted_bytes(), 1024);
        assert_eq!(context.current_budgeted_bytes(), 0);
    }
}
