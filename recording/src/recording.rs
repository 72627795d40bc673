//! The immutable result of `Recorder::snap`.

use std::sync::Arc;

use crate::command_buffer::{CallbackResult, FinishCallback};
use crate::resources::AnyResourceRef;
use crate::task::{Task, TaskList, TextureProxy};

/// Collects what the buffer managers hand over while a Recording is snapped.
///
/// Prologue tasks (clears and staging copies) run before every task the
/// Recorder was given.
#[derive(Default)]
pub struct RecordingBuilder {
    prologue: Vec<Task>,
    extra_resources: Vec<AnyResourceRef>,
}

impl RecordingBuilder {
    pub fn add_prologue_task(&mut self, task: Task) {
        self.prologue.push(task);
    }

    /// Keep `resource` alive for as long as the Recording exists.
    pub fn keep_alive(&mut self, resource: AnyResourceRef) {
        self.extra_resources.push(resource);
    }

    pub fn resource_count(&self) -> usize {
        self.extra_resources.len()
    }

    pub fn prologue_len(&self) -> usize {
        self.prologue.len()
    }

    pub fn prologue_tasks(&self) -> &[Task] {
        &self.prologue
    }

    pub(crate) fn into_parts(self) -> (Vec<Task>, Vec<AnyResourceRef>) {
        (self.prologue, self.extra_resources)
    }
}

impl std::fmt::Debug for RecordingBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingBuilder")
            .field("prologue", &self.prologue.len())
            .field("resources", &self.extra_resources.len())
            .finish()
    }
}

/// A snapped task graph plus everything it needs to be replayed.
///
/// A Recording carries no reference back to its Recorder and can be handed
/// to another thread. If it is dropped before its finish callbacks were
/// passed on to a submission, they fire with [`CallbackResult::Failed`].
pub struct Recording {
    recorder_id: u32,
    unique_id: u32,
    pub(crate) root: TaskList,
    extra_resources: Vec<AnyResourceRef>,
    finish_callbacks: Vec<FinishCallback>,
    target_proxy: Option<Arc<TextureProxy>>,
    inserted: bool,
}

impl Recording {
    pub(crate) fn new(
        recorder_id: u32,
        unique_id: u32,
        root: TaskList,
        extra_resources: Vec<AnyResourceRef>,
        finish_callbacks: Vec<FinishCallback>,
        target_proxy: Option<Arc<TextureProxy>>,
    ) -> Self {
        Self {
            recorder_id,
            unique_id,
            root,
            extra_resources,
            finish_callbacks,
            target_proxy,
            inserted: false,
        }
    }

    pub fn recorder_id(&self) -> u32 {
        self.recorder_id
    }

    /// Position of this Recording in its Recorder's snap order.
    pub fn unique_id(&self) -> u32 {
        self.unique_id
    }

    /// Replayable Recordings draw into a deferred target bound at insert
    /// time and may be inserted more than once.
    pub fn is_replayable(&self) -> bool {
        self.target_proxy.is_some()
    }

    pub fn target_proxy(&self) -> Option<&Arc<TextureProxy>> {
        self.target_proxy.as_ref()
    }

    /// Whether there is nothing left to replay.
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    pub fn task_count(&self) -> usize {
        self.root.len()
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.root.iter()
    }

    pub fn resource_count(&self) -> usize {
        self.extra_resources.len()
    }

    pub(crate) fn resources(&self) -> &[AnyResourceRef] {
        &self.extra_resources
    }

    pub(crate) fn was_inserted(&self) -> bool {
        self.inserted
    }

    pub(crate) fn mark_inserted(&mut self) {
        self.inserted = true;
    }

    pub(crate) fn take_finish_callbacks(&mut self) -> Vec<FinishCallback> {
        std::mem::take(&mut self.finish_callbacks)
    }

    /// Fire every pending finish callback with `Failed`.
    pub(crate) fn fail_callbacks(&mut self) {
        for callback in self.finish_callbacks.drain(..) {
            callback(CallbackResult::Failed);
        }
    }
}

impl Drop for Recording {
    fn drop(&mut self) {
        if !self.finish_callbacks.is_empty() {
            log::debug!(
                "Recording: dropped with {} unresolved callbacks",
                self.finish_callbacks.len()
            );
            self.fail_callbacks();
        }
    }
}

impl std::fmt::Debug for Recording {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recording")
            .field("recorder_id", &self.recorder_id)
            .field("unique_id", &self.unique_id)
            .field("tasks", &self.root.len())
            .field("resources", &self.extra_resources.len())
            .field("callbacks", &self.finish_callbacks.len())
            .field("replayable", &self.is_replayable())
            .finish()
    }
}

static_assertions::assert_impl_all!(Recording: Send);

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_drop_fails_callbacks() {
        let result = Arc::new(Mutex::new(None));
        let seen = Arc::clone(&result);
        let recording = Recording::new(
            0,
            0,
            TaskList::new(),
            Vec::new(),
            vec![Box::new(move |r| *seen.lock() = Some(r))],
            None,
        );
        assert!(recording.is_empty());
        drop(recording);
        assert_eq!(*result.lock(), Some(CallbackResult::Failed));
    }

    #[test]
    fn test_taken_callbacks_do_not_fire_on_drop() {
        let fired = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&fired);
        let mut recording = Recording::new(
            0,
            0,
            TaskList::new(),
            Vec::new(),
            vec![Box::new(move |_| *counter.lock() += 1)],
            None,
        );
        let callbacks = recording.take_finish_callbacks();
        drop(recording);
        assert_eq!(*fired.lock(), 0);
        for callback in callbacks {
            callback(CallbackResult::Success);
        }
        assert_eq!(*fired.lock(), 1);
    }
}
