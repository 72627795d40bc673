//! Replays Recordings onto command buffers and tracks in-flight submissions.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::backend::GpuFence;
use crate::command_buffer::{CallbackResult, CommandBuffer, FinishCallback};
use crate::error::GraphicsError;
use crate::provider::ResourceProvider;
use crate::recording::Recording;
use crate::resources::{ResourceRef, ScratchResourceManager, Texture};
use crate::task::{PrepareContext, ReplayTargetData, RuntimeEffectDictionary, Status, Task};

/// Number of finished command buffers kept for reuse.
pub const DEFAULT_COMMAND_BUFFER_POOL_SIZE: usize = 4;

/// Whether `check_for_finished_work` may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncToCpu {
    /// Wait until every outstanding submission has finished.
    Yes,
    /// Only collect submissions that have already finished.
    No,
}

/// Parameters for inserting a Recording.
pub struct InsertRecordingInfo<'a> {
    pub recording: &'a mut Recording,
    /// Bound to the Recording's deferred target for this replay.
    pub target_texture: Option<ResourceRef<Texture>>,
    /// Offset applied to render passes into the deferred target.
    pub translation: [i32; 2],
    /// Fires once the replay finishes on the GPU, or fails.
    pub finished_callback: Option<FinishCallback>,
}

impl<'a> InsertRecordingInfo<'a> {
    pub fn new(recording: &'a mut Recording) -> Self {
        Self {
            recording,
            target_texture: None,
            translation: [0, 0],
            finished_callback: None,
        }
    }

    pub fn with_target(mut self, texture: ResourceRef<Texture>, translation: [i32; 2]) -> Self {
        self.target_texture = Some(texture);
        self.translation = translation;
        self
    }

    pub fn with_finished_callback(mut self, callback: FinishCallback) -> Self {
        self.finished_callback = Some(callback);
        self
    }
}

struct OutstandingSubmission {
    command_buffer: CommandBuffer,
    fence: GpuFence,
}

/// Owns the open command buffer and the FIFO of submitted ones.
///
/// Submissions complete in order, so only the front of the queue is ever
/// polled.
pub struct QueueManager {
    provider: Arc<ResourceProvider>,
    current: Option<CommandBuffer>,
    available: Vec<CommandBuffer>,
    pool_size: usize,
    outstanding: VecDeque<OutstandingSubmission>,
    last_inserted: HashMap<u32, u32>,
    effects: RuntimeEffectDictionary,
}

impl QueueManager {
    pub fn new(provider: Arc<ResourceProvider>) -> Self {
        Self {
            provider,
            current: None,
            available: Vec::new(),
            pool_size: DEFAULT_COMMAND_BUFFER_POOL_SIZE,
            outstanding: VecDeque::new(),
            last_inserted: HashMap::new(),
            effects: RuntimeEffectDictionary::new(),
        }
    }

    pub fn with_command_buffer_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// The open command buffer, taken from the pool or created on demand.
    fn current_command_buffer(&mut self) -> Result<&mut CommandBuffer, GraphicsError> {
        let command_buffer = match self.current.take() {
            Some(command_buffer) => command_buffer,
            None => match self.available.pop() {
                Some(command_buffer) => command_buffer,
                None => {
                    log::trace!("QueueManager: creating command buffer");
                    self.provider.create_command_buffer()?
                }
            },
        };
        Ok(self.current.insert(command_buffer))
    }

    /// Replay a Recording's tasks into the open command buffer.
    ///
    /// On failure every callback attached to the Recording and the insert
    /// info fires with [`CallbackResult::Failed`].
    pub fn add_recording(&mut self, info: InsertRecordingInfo<'_>) -> Result<(), GraphicsError> {
        let InsertRecordingInfo {
            recording,
            target_texture,
            translation,
            mut finished_callback,
        } = info;

        match self.replay(recording, target_texture, translation, &mut finished_callback) {
            Ok(()) => Ok(()),
            Err(err) => {
                log::warn!("QueueManager: failed to add recording: {}", err);
                recording.fail_callbacks();
                if let Some(callback) = finished_callback {
                    callback(CallbackResult::Failed);
                }
                Err(err)
            }
        }
    }

    fn replay(
        &mut self,
        recording: &mut Recording,
        target_texture: Option<ResourceRef<Texture>>,
        translation: [i32; 2],
        finished_callback: &mut Option<FinishCallback>,
    ) -> Result<(), GraphicsError> {
        let recorder_id = recording.recorder_id();
        if !recording.is_replayable() {
            if recording.was_inserted() {
                return Err(GraphicsError::InvalidParameter(
                    "recording was already inserted".to_string(),
                ));
            }
            if let Some(last) = self.last_inserted.get(&recorder_id)
                && recording.unique_id() <= *last
            {
                return Err(GraphicsError::InvalidParameter(format!(
                    "recording {} from recorder {} inserted after recording {}",
                    recording.unique_id(),
                    recorder_id,
                    last
                )));
            }
        }

        let target_proxy = recording.target_proxy().cloned();
        let mut replay = ReplayTargetData {
            target: None,
            translation,
        };
        if let Some(proxy) = &target_proxy {
            let Some(texture) = target_texture else {
                return Err(GraphicsError::InvalidParameter(
                    "replayable recording needs a target texture".to_string(),
                ));
            };
            let wanted = proxy.descriptor();
            if texture.descriptor().format != wanted.format
                || texture.width() < wanted.width
                || texture.height() < wanted.height
            {
                return Err(GraphicsError::InvalidParameter(format!(
                    "target {}x{} {:?} cannot hold a {}x{} {:?} recording",
                    texture.width(),
                    texture.height(),
                    texture.descriptor().format,
                    wanted.width,
                    wanted.height,
                    wanted.format
                )));
            }
            replay.target = Some(Arc::clone(texture.arc()));
            proxy.instantiate_with(texture);
        }

        let provider = Arc::clone(&self.provider);
        let command_buffer = self.current_command_buffer()?;
        let status = recording
            .root
            .add_commands(&provider, command_buffer, &replay);
        if let Some(proxy) = &target_proxy {
            proxy.deinstantiate();
        }
        if status == Status::Fail {
            return Err(GraphicsError::Internal(
                "recording failed to add its commands".to_string(),
            ));
        }

        for resource in recording.resources() {
            command_buffer.track_resource(resource.as_any());
        }
        for callback in recording
            .take_finish_callbacks()
            .into_iter()
            .chain(finished_callback.take())
        {
            command_buffer.add_finish_callback(callback);
        }

        recording.mark_inserted();
        if !recording.is_replayable() {
            self.last_inserted.insert(recorder_id, recording.unique_id());
        }
        log::trace!(
            "QueueManager: added recording {} from recorder {}",
            recording.unique_id(),
            recorder_id
        );
        Ok(())
    }

    /// Effects available to tasks added through [`add_task`](Self::add_task).
    pub fn runtime_effects(&mut self) -> &mut RuntimeEffectDictionary {
        &mut self.effects
    }

    /// Prepare and encode a single task outside any Recording.
    ///
    /// Draws that require a runtime effect see only the ones registered
    /// through [`runtime_effects`](Self::runtime_effects).
    pub fn add_task(&mut self, task: &mut Task) -> Result<(), GraphicsError> {
        let provider = Arc::clone(&self.provider);
        let mut pending_reads = HashMap::new();
        task.visit_reads(&mut |proxy| *pending_reads.entry(proxy).or_insert(0) += 1);
        let mut scratch = ScratchResourceManager::new(Arc::clone(&provider), pending_reads);
        let mut ctx = PrepareContext {
            provider: &provider,
            scratch: &mut scratch,
            effects: &self.effects,
        };
        if task.prepare_resources(&mut ctx) == Status::Fail {
            return Err(GraphicsError::Internal(format!(
                "{} task failed to prepare",
                task.name()
            )));
        }

        let command_buffer = self.current_command_buffer()?;
        if task.add_commands(&provider, command_buffer, &ReplayTargetData::default())
            == Status::Fail
        {
            return Err(GraphicsError::Internal(format!(
                "{} task failed to add commands",
                task.name()
            )));
        }
        Ok(())
    }

    /// Attach `callback` to the open command buffer.
    pub fn add_finish_callback(&mut self, callback: FinishCallback) {
        match self.current_command_buffer() {
            Ok(command_buffer) => command_buffer.add_finish_callback(callback),
            Err(err) => {
                log::warn!("QueueManager: no command buffer for callback: {}", err);
                callback(CallbackResult::Failed);
            }
        }
    }

    /// Submit the open command buffer.
    ///
    /// Returns `Ok(false)` when there was nothing to submit.
    pub fn submit_to_gpu(&mut self) -> Result<bool, GraphicsError> {
        let Some(mut command_buffer) = self.current.take() else {
            return Ok(false);
        };
        match command_buffer.submit() {
            Ok(fence) => {
                log::trace!(
                    "QueueManager: submitted, {} outstanding",
                    self.outstanding.len() + 1
                );
                self.outstanding.push_back(OutstandingSubmission {
                    command_buffer,
                    fence,
                });
                Ok(true)
            }
            Err(err) => {
                log::warn!("QueueManager: submission failed: {}", err);
                command_buffer.finish(CallbackResult::Failed);
                self.return_command_buffer(command_buffer);
                Err(err)
            }
        }
    }

    /// Retire finished submissions from the front of the queue.
    ///
    /// With [`SyncToCpu::Yes`] this blocks on the newest submission first,
    /// which also finishes every older one.
    pub fn check_for_finished_work(&mut self, sync: SyncToCpu) {
        let backend = Arc::clone(self.provider.backend());
        if sync == SyncToCpu::Yes
            && let Some(newest) = self.outstanding.back()
        {
            backend.wait_fence(&newest.fence);
        }

        while self
            .outstanding
            .front()
            .is_some_and(|front| backend.is_fence_signaled(&front.fence))
        {
            let Some(mut done) = self.outstanding.pop_front() else {
                break;
            };
            done.command_buffer.finish(CallbackResult::Success);
            self.return_command_buffer(done.command_buffer);
        }
        self.provider.cache().process_returned_resources();
    }

    pub fn has_unfinished_gpu_work(&self) -> bool {
        !self.outstanding.is_empty()
    }

    pub fn outstanding_submissions(&self) -> usize {
        self.outstanding.len()
    }

    /// Reset `command_buffer` and keep it for reuse if the pool has room.
    pub fn return_command_buffer(&mut self, mut command_buffer: CommandBuffer) {
        command_buffer.reset();
        if self.available.len() < self.pool_size {
            self.available.push(command_buffer);
        }
    }

    pub fn pooled_command_buffers(&self) -> usize {
        self.available.len()
    }

    /// Drop pooled command buffers and every unlocked cached resource.
    pub fn free_gpu_resources(&mut self) {
        self.available.clear();
        self.provider.purge_all_unlocked();
    }
}

impl Drop for QueueManager {
    fn drop(&mut self) {
        if !self.outstanding.is_empty() {
            log::debug!(
                "QueueManager: waiting on {} submissions before shutdown",
                self.outstanding.len()
            );
            self.check_for_finished_work(SyncToCpu::Yes);
        }
    }
}

impl std::fmt::Debug for QueueManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueManager")
            .field("open", &self.current.is_some())
            .field("pooled", &self.available.len())
            .field("outstanding", &self.outstanding.len())
            .finish()
    }
}

static_assertions::assert_impl_all!(QueueManager: Send);
