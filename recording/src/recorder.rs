//! Single-owner front end that builds Recordings.

use std::cell::{RefCell, RefMut};
use std::rc::Rc;
use std::sync::Arc;

use crate::backend::GpuBackend;
use crate::buffers::{
    DEFAULT_UPLOAD_BUFFER_SIZE, DrawBufferManager, FloatStorageManager, UploadBufferManager,
};
use crate::caps::Caps;
use crate::command_buffer::{CallbackResult, FinishCallback};
use crate::provider::ResourceProvider;
use crate::recording::{Recording, RecordingBuilder};
use crate::resources::{DEFAULT_MAX_BUDGET, ScratchResourceManager};
use crate::task::{
    PrepareContext, ProxyId, ProxyKind, RuntimeEffectDictionary, Status, Task, TaskList,
    TextureProxy, UploadTask,
};
use crate::types::{TextureDescriptor, TextureRegion};

/// Configuration for a [`Recorder`].
#[derive(Debug, Clone)]
pub struct RecorderOptions {
    /// Size of the shared staging buffer small uploads are packed into.
    pub upload_buffer_size: u32,
    /// Budget of the Recorder's resource cache in bytes.
    pub max_budget: u64,
}

impl Default for RecorderOptions {
    fn default() -> Self {
        Self {
            upload_buffer_size: DEFAULT_UPLOAD_BUFFER_SIZE,
            max_budget: DEFAULT_MAX_BUDGET,
        }
    }
}

impl RecorderOptions {
    pub fn with_upload_buffer_size(mut self, size: u32) -> Self {
        self.upload_buffer_size = size;
        self
    }

    pub fn with_max_budget(mut self, bytes: u64) -> Self {
        self.max_budget = bytes;
        self
    }
}

/// Accumulates tasks and their buffer data until [`snap`](Self::snap).
///
/// The buffer managers share state through `Rc`, so a Recorder stays on the
/// thread that created it. Recordings it produces are `Send`.
pub struct Recorder {
    id: u32,
    provider: Arc<ResourceProvider>,
    upload: Rc<RefCell<UploadBufferManager>>,
    draw_buffers: DrawBufferManager,
    float_storage: FloatStorageManager,
    effects: RuntimeEffectDictionary,
    root: TaskList,
    finish_callbacks: Vec<FinishCallback>,
    target_proxy: Option<Arc<TextureProxy>>,
    next_proxy_id: u32,
    next_recording_id: u32,
}

impl Recorder {
    pub(crate) fn new(
        id: u32,
        backend: Arc<dyn GpuBackend>,
        caps: Caps,
        options: RecorderOptions,
    ) -> Self {
        let provider = Arc::new(ResourceProvider::new(backend, caps, options.max_budget));
        let upload = Rc::new(RefCell::new(UploadBufferManager::new(
            Arc::clone(&provider),
            options.upload_buffer_size,
        )));
        let draw_buffers = DrawBufferManager::new(Arc::clone(&provider), Rc::clone(&upload));
        log::debug!("Recorder: created recorder {}", id);
        Self {
            id,
            provider,
            upload,
            draw_buffers,
            float_storage: FloatStorageManager::new(),
            effects: RuntimeEffectDictionary::new(),
            root: TaskList::new(),
            finish_callbacks: Vec::new(),
            target_proxy: None,
            next_proxy_id: 0,
            next_recording_id: 0,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn provider(&self) -> &Arc<ResourceProvider> {
        &self.provider
    }

    pub fn draw_buffers(&self) -> &DrawBufferManager {
        &self.draw_buffers
    }

    pub fn upload_buffers(&self) -> RefMut<'_, UploadBufferManager> {
        self.upload.borrow_mut()
    }

    pub fn float_storage(&mut self) -> &mut FloatStorageManager {
        &mut self.float_storage
    }

    pub fn runtime_effects(&mut self) -> &mut RuntimeEffectDictionary {
        &mut self.effects
    }

    pub fn add_task(&mut self, task: Task) {
        self.root.add(task);
    }

    /// Number of tasks waiting for the next snap.
    pub fn task_count(&self) -> usize {
        self.root.len()
    }

    /// Fires once the next Recording finishes on the GPU, or fails.
    pub fn add_finish_callback(&mut self, callback: FinishCallback) {
        self.finish_callbacks.push(callback);
    }

    fn next_proxy_id(&mut self) -> ProxyId {
        let id = ProxyId(self.next_proxy_id);
        self.next_proxy_id += 1;
        id
    }

    /// A texture proxy instantiated when the next Recording is snapped.
    pub fn make_texture_proxy(
        &mut self,
        descriptor: TextureDescriptor,
        kind: ProxyKind,
    ) -> Arc<TextureProxy> {
        assert!(
            kind != ProxyKind::Deferred,
            "Recorder: use make_deferred_target for deferred proxies"
        );
        Arc::new(TextureProxy::new(self.next_proxy_id(), descriptor, kind))
    }

    /// The target the next Recording draws into, bound at insert time.
    /// Recordings with a deferred target are replayable.
    pub fn make_deferred_target(&mut self, descriptor: TextureDescriptor) -> Arc<TextureProxy> {
        assert!(
            self.target_proxy.is_none(),
            "Recorder: deferred target already set for this recording"
        );
        let proxy = Arc::new(TextureProxy::new(
            self.next_proxy_id(),
            descriptor,
            ProxyKind::Deferred,
        ));
        self.target_proxy = Some(Arc::clone(&proxy));
        proxy
    }

    /// Stage `data` for `region` of `proxy` and queue a one-shot upload.
    ///
    /// `data` holds tightly packed rows. Returns false when staging memory
    /// could not be obtained or `data` has the wrong length.
    pub fn upload_texture(
        &mut self,
        proxy: &Arc<TextureProxy>,
        data: &[u8],
        region: TextureRegion,
    ) -> bool {
        let block = proxy.descriptor().format.block_size();
        let sizes = region.width.checked_mul(block).and_then(|bytes_per_row| {
            let bytes = bytes_per_row.checked_mul(region.height)?;
            Some((bytes_per_row, bytes))
        });
        let Some((bytes_per_row, bytes)) = sizes.filter(|&(_, bytes)| bytes > 0) else {
            log::warn!(
                "Recorder: {}x{} upload region has no representable size",
                region.width,
                region.height
            );
            return false;
        };
        if data.len() as u64 != u64::from(bytes) {
            log::warn!(
                "Recorder: upload of {} bytes does not match a {}x{} region",
                data.len(),
                region.width,
                region.height
            );
            return false;
        }

        let Some(mut writer) = self.upload.borrow_mut().get_writer(bytes, block) else {
            return false;
        };
        writer.write_bytes(data);
        self.root.add(Task::Upload(UploadTask::new(
            writer.into_binding(),
            bytes_per_row,
            Arc::clone(proxy),
            region,
        )));
        true
    }

    /// Finish every buffer manager and prepare the accumulated tasks.
    ///
    /// Returns `None` if any allocation failed or a task could not prepare
    /// its resources. Either way the Recorder starts over with empty state,
    /// and the pending finish callbacks travel with the Recording or fire
    /// with `Failed`.
    pub fn snap(&mut self) -> Option<Recording> {
        let mut root = std::mem::take(&mut self.root);
        let callbacks = std::mem::take(&mut self.finish_callbacks);
        let target_proxy = self.target_proxy.take();

        let mut builder = RecordingBuilder::default();
        let floats_ok = self.float_storage.finish(&self.draw_buffers);
        let draws_ok = self.draw_buffers.transfer_to_recording(&mut builder);
        self.upload.borrow_mut().transfer_to_recording(&mut builder);
        if !floats_ok || !draws_ok {
            log::warn!("Recorder: buffer allocation failed, dropping recording");
            Self::fail(callbacks);
            return None;
        }

        let (prologue, resources) = builder.into_parts();
        root.prepend(prologue);

        let mut scratch =
            ScratchResourceManager::new(Arc::clone(&self.provider), root.pending_reads());
        let mut ctx = PrepareContext {
            provider: &self.provider,
            scratch: &mut scratch,
            effects: &self.effects,
        };
        if root.prepare_resources(&mut ctx) == Status::Fail {
            log::warn!("Recorder: task preparation failed, dropping recording");
            Self::fail(callbacks);
            return None;
        }

        let unique_id = self.next_recording_id;
        self.next_recording_id += 1;
        log::debug!(
            "Recorder: snapped recording {} with {} tasks",
            unique_id,
            root.len()
        );
        Some(Recording::new(
            self.id,
            unique_id,
            root,
            resources,
            callbacks,
            target_proxy,
        ))
    }

    fn fail(callbacks: Vec<FinishCallback>) {
        for callback in callbacks {
            callback(CallbackResult::Failed);
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        Self::fail(std::mem::take(&mut self.finish_callbacks));
    }
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("id", &self.id)
            .field("tasks", &self.root.len())
            .field("draw_buffers", &self.draw_buffers)
            .field("next_recording_id", &self.next_recording_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    use crate::backend::{DummyBackend, LoadOp};
    use crate::task::DrawPassTask;
    use crate::types::{TextureFormat, TextureUsage};

    fn recorder() -> Recorder {
        Recorder::new(
            0,
            Arc::new(DummyBackend::new()),
            Caps::default(),
            RecorderOptions::default(),
        )
    }

    fn descriptor() -> TextureDescriptor {
        TextureDescriptor::new(
            4,
            4,
            TextureFormat::Rgba8Unorm,
            TextureUsage::RENDER_ATTACHMENT | TextureUsage::COPY_DST,
        )
    }

    #[test]
    fn test_empty_snap_is_some() {
        let mut recorder = recorder();
        let recording = recorder.snap().unwrap();
        assert!(recording.is_empty());
        assert_eq!(recording.unique_id(), 0);
        assert_eq!(recorder.snap().unwrap().unique_id(), 1);
    }

    #[test]
    fn test_failed_snap_fails_callbacks_and_resets() {
        let mut recorder = recorder();
        let target = recorder.make_texture_proxy(descriptor(), ProxyKind::Exact);
        recorder.add_task(Task::DrawPass(
            DrawPassTask::new(target, LoadOp::Clear([0.0; 4]))
                .require_effect(crate::task::RuntimeEffectId(1))
                .draw(3, 1),
        ));
        let result = Arc::new(Mutex::new(None));
        let seen = Arc::clone(&result);
        recorder.add_finish_callback(Box::new(move |r| *seen.lock() = Some(r)));

        assert!(recorder.snap().is_none());
        assert_eq!(*result.lock(), Some(CallbackResult::Failed));
        assert_eq!(recorder.task_count(), 0);
        assert!(recorder.snap().is_some());
    }

    #[test]
    fn test_upload_rejects_unrepresentable_region() {
        let mut recorder = recorder();
        let proxy = recorder.make_texture_proxy(descriptor(), ProxyKind::Exact);
        let wide = TextureRegion::new(0, 0, 0x4000_0001, 1);
        assert!(!recorder.upload_texture(&proxy, &[0u8; 16], wide));
        let huge = TextureRegion::new(0, 0, 0x1_0000, 0x1_0000);
        assert!(!recorder.upload_texture(&proxy, &[0u8; 16], huge));
        assert_eq!(recorder.task_count(), 0);
    }

    #[test]
    fn test_upload_rejects_wrong_length() {
        let mut recorder = recorder();
        let proxy = recorder.make_texture_proxy(descriptor(), ProxyKind::Exact);
        assert!(!recorder.upload_texture(&proxy, &[0u8; 7], TextureRegion::new(0, 0, 4, 4)));
        assert!(recorder.upload_texture(&proxy, &[0u8; 64], TextureRegion::new(0, 0, 4, 4)));
        assert_eq!(recorder.task_count(), 1);
    }

    #[test]
    fn test_uniform_data_lands_in_prologue_copy() {
        let caps = Caps::default().with_mappable_draw_buffers(false);
        let mut recorder = Recorder::new(
            0,
            Arc::new(DummyBackend::new()),
            caps,
            RecorderOptions::default(),
        );
        let mut writer = recorder.draw_buffers().get_uniform_writer(1, 16).unwrap();
        writer.write(&[1.0f32; 4]);
        drop(writer);

        let recording = recorder.snap().unwrap();
        assert!(recording.tasks().any(|task| matches!(task, Task::CopyBufferToBuffer(_))));
        assert!(recording.resource_count() > 0);
    }
}
