//! The task graph a Recording replays.
//!
//! Every unit of GPU work is a [`Task`]. Tasks run in two phases:
//!
//! 1. `prepare_resources` once, when the Recording is snapped. Proxies are
//!    instantiated and scratch textures are checked out here.
//! 2. `add_commands` on every insertion, encoding into a command buffer.
//!
//! Both phases report a [`Status`]. A task that reports
//! [`Status::Discard`] has done everything it will ever do and is dropped
//! from its [`TaskList`], so later replays skip it.

mod draw_pass;
mod proxy;
mod transfer;

use std::collections::HashMap;
use std::sync::Arc;

use crate::command_buffer::CommandBuffer;
use crate::provider::ResourceProvider;
use crate::resources::{ScratchResourceManager, Texture};

pub use draw_pass::{BufferBinding, ComputeTask, DrawPassTask};
pub use proxy::{ProxyId, ProxyKind, TextureProxy};
pub use transfer::{
    ClearBuffersTask, CopyBufferToBufferTask, CopyBufferToTextureTask, CopyTextureToBufferTask,
    UploadTask,
};

/// Result of one task phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    /// Succeeded, and the task must not run again.
    Discard,
    Fail,
}

/// Identifies a runtime effect a draw depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuntimeEffectId(pub u32);

/// Runtime effects known to a Recorder. Draws that need an unregistered
/// effect fail to prepare.
#[derive(Debug, Default)]
pub struct RuntimeEffectDictionary {
    effects: HashMap<RuntimeEffectId, String>,
}

impl RuntimeEffectDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: RuntimeEffectId, name: impl Into<String>) {
        self.effects.insert(id, name.into());
    }

    pub fn contains(&self, id: RuntimeEffectId) -> bool {
        self.effects.contains_key(&id)
    }

    pub fn name(&self, id: RuntimeEffectId) -> Option<&str> {
        self.effects.get(&id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }
}

/// Everything `prepare_resources` may touch.
pub struct PrepareContext<'a> {
    pub provider: &'a ResourceProvider,
    pub scratch: &'a mut ScratchResourceManager,
    pub effects: &'a RuntimeEffectDictionary,
}

/// Where the current replay draws.
#[derive(Debug, Clone, Default)]
pub struct ReplayTargetData {
    /// Texture bound to the Recording's deferred target, if any.
    pub target: Option<Arc<Texture>>,
    /// Applied to render passes drawing into the deferred target.
    pub translation: [i32; 2],
}

/// A unit of GPU work.
#[derive(Debug)]
pub enum Task {
    DrawPass(DrawPassTask),
    Upload(UploadTask),
    CopyBufferToBuffer(CopyBufferToBufferTask),
    CopyBufferToTexture(CopyBufferToTextureTask),
    CopyTextureToBuffer(CopyTextureToBufferTask),
    Compute(ComputeTask),
    ClearBuffers(ClearBuffersTask),
    List(TaskList),
}

impl Task {
    pub fn name(&self) -> &'static str {
        match self {
            Self::DrawPass(_) => "DrawPass",
            Self::Upload(_) => "Upload",
            Self::CopyBufferToBuffer(_) => "CopyBufferToBuffer",
            Self::CopyBufferToTexture(_) => "CopyBufferToTexture",
            Self::CopyTextureToBuffer(_) => "CopyTextureToBuffer",
            Self::Compute(_) => "Compute",
            Self::ClearBuffers(_) => "ClearBuffers",
            Self::List(_) => "List",
        }
    }

    pub fn prepare_resources(&mut self, ctx: &mut PrepareContext<'_>) -> Status {
        match self {
            Self::DrawPass(task) => task.prepare_resources(ctx),
            Self::Upload(task) => task.prepare_resources(ctx),
            Self::CopyBufferToTexture(task) => task.prepare_resources(ctx),
            Self::CopyTextureToBuffer(task) => task.prepare_resources(ctx),
            Self::Compute(task) => task.prepare_resources(),
            Self::List(list) => list.prepare_resources(ctx),
            Self::CopyBufferToBuffer(_) | Self::ClearBuffers(_) => Status::Success,
        }
    }

    pub fn add_commands(
        &mut self,
        provider: &ResourceProvider,
        command_buffer: &mut CommandBuffer,
        replay: &ReplayTargetData,
    ) -> Status {
        match self {
            Self::DrawPass(task) => task.add_commands(command_buffer, replay),
            Self::Upload(task) => task.add_commands(command_buffer),
            Self::CopyBufferToBuffer(task) => task.add_commands(command_buffer),
            Self::CopyBufferToTexture(task) => task.add_commands(command_buffer),
            Self::CopyTextureToBuffer(task) => task.add_commands(command_buffer),
            Self::Compute(task) => task.add_commands(command_buffer),
            Self::ClearBuffers(task) => task.add_commands(command_buffer),
            Self::List(list) => list.add_commands(provider, command_buffer, replay),
        }
    }

    /// Report every proxy this task samples.
    pub fn visit_reads(&self, visitor: &mut dyn FnMut(ProxyId)) {
        match self {
            Self::DrawPass(task) => task.visit_reads(visitor),
            Self::CopyTextureToBuffer(task) => visitor(task.source().id()),
            Self::List(list) => list.visit_reads(visitor),
            _ => {}
        }
    }
}

/// An ordered list of tasks, itself a task.
///
/// Discarded tasks leave an empty slot so indices stay stable while the list
/// is walked.
#[derive(Debug, Default)]
pub struct TaskList {
    tasks: Vec<Option<Task>>,
}

impl TaskList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, task: Task) {
        self.tasks.push(Some(task));
    }

    pub fn prepend(&mut self, tasks: impl IntoIterator<Item = Task>) {
        let mut merged: Vec<Option<Task>> = tasks.into_iter().map(Some).collect();
        merged.append(&mut self.tasks);
        self.tasks = merged;
    }

    /// Number of tasks that have not been discarded.
    pub fn len(&self) -> usize {
        self.tasks.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().flatten()
    }

    /// Prepare every task inside its own scratch scope.
    pub fn prepare_resources(&mut self, ctx: &mut PrepareContext<'_>) -> Status {
        ctx.scratch.push_scope();
        let status = self.visit(|task| task.prepare_resources(ctx));
        ctx.scratch.pop_scope();
        status
    }

    pub fn add_commands(
        &mut self,
        provider: &ResourceProvider,
        command_buffer: &mut CommandBuffer,
        replay: &ReplayTargetData,
    ) -> Status {
        self.visit(|task| task.add_commands(provider, command_buffer, replay))
    }

    pub fn visit_reads(&self, visitor: &mut dyn FnMut(ProxyId)) {
        for task in self.iter() {
            task.visit_reads(visitor);
        }
    }

    /// How many tasks sample each proxy.
    pub fn pending_reads(&self) -> HashMap<ProxyId, u32> {
        let mut reads = HashMap::new();
        self.visit_reads(&mut |proxy| *reads.entry(proxy).or_insert(0) += 1);
        reads
    }

    /// Run `f` over the live tasks in order.
    ///
    /// Stops at the first failure. The list reports `Discard` only when every
    /// task it holds has been discarded, including when it is empty.
    fn visit(&mut self, mut f: impl FnMut(&mut Task) -> Status) -> Status {
        let mut all_discarded = true;
        for slot in &mut self.tasks {
            let Some(task) = slot else {
                continue;
            };
            match f(task) {
                Status::Success => all_discarded = false,
                Status::Discard => *slot = None,
                Status::Fail => {
                    log::warn!("TaskList: {} task failed", task.name());
                    return Status::Fail;
                }
            }
        }
        if all_discarded {
            Status::Discard
        } else {
            Status::Success
        }
    }
}
