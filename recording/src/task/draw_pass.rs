//! Render pass and compute dispatch tasks.

use std::sync::Arc;

use crate::backend::LoadOp;
use crate::buffers::{BindBufferInfo, DeferredBinding};
use crate::command_buffer::CommandBuffer;
use crate::resources::PendingUseListener;

use super::{
    PrepareContext, ProxyId, ProxyKind, ReplayTargetData, RuntimeEffectId, Status, TextureProxy,
};

/// A buffer bound to a slot, either known now or resolved at snap time.
#[derive(Debug, Clone)]
pub enum BufferBinding {
    Ready(BindBufferInfo),
    Deferred(DeferredBinding),
}

impl BufferBinding {
    fn resolve(&self) -> Option<BindBufferInfo> {
        match self {
            Self::Ready(info) => Some(info.clone()),
            Self::Deferred(binding) => binding.get(),
        }
    }
}

impl From<BindBufferInfo> for BufferBinding {
    fn from(info: BindBufferInfo) -> Self {
        Self::Ready(info)
    }
}

impl From<DeferredBinding> for BufferBinding {
    fn from(binding: DeferredBinding) -> Self {
        Self::Deferred(binding)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DrawCall {
    vertex_count: u32,
    instance_count: u32,
}

fn bind_all(
    command_buffer: &mut CommandBuffer,
    bindings: &[(u32, BufferBinding)],
    task: &str,
) -> Status {
    for (slot, binding) in bindings {
        let Some(info) = binding.resolve() else {
            log::warn!("{}: binding for slot {} never resolved", task, slot);
            return Status::Fail;
        };
        if let Err(err) = command_buffer.bind_buffer(*slot, &info) {
            log::warn!("{}: {}", task, err);
            return Status::Fail;
        }
    }
    Status::Success
}

/// One render pass: bind buffers, draw, and sample other proxies.
///
/// # Example
///
/// ```ignore
/// let task = DrawPassTask::new(target, LoadOp::Clear([0.0; 4]))
///     .bind(0, vertices)
///     .draw(3, 1);
/// ```
#[derive(Debug)]
pub struct DrawPassTask {
    target: Arc<TextureProxy>,
    load: LoadOp,
    bindings: Vec<(u32, BufferBinding)>,
    draws: Vec<DrawCall>,
    sampled: Vec<Arc<TextureProxy>>,
    required_effects: Vec<RuntimeEffectId>,
}

impl DrawPassTask {
    pub fn new(target: Arc<TextureProxy>, load: LoadOp) -> Self {
        Self {
            target,
            load,
            bindings: Vec::new(),
            draws: Vec::new(),
            sampled: Vec::new(),
            required_effects: Vec::new(),
        }
    }

    pub fn bind(mut self, slot: u32, binding: impl Into<BufferBinding>) -> Self {
        self.bindings.push((slot, binding.into()));
        self
    }

    pub fn draw(mut self, vertex_count: u32, instance_count: u32) -> Self {
        self.draws.push(DrawCall {
            vertex_count,
            instance_count,
        });
        self
    }

    /// Read `proxy` in this pass. It must have been written by an earlier
    /// task.
    pub fn sample(mut self, proxy: Arc<TextureProxy>) -> Self {
        self.sampled.push(proxy);
        self
    }

    /// Fail preparation unless `effect` is registered.
    pub fn require_effect(mut self, effect: RuntimeEffectId) -> Self {
        self.required_effects.push(effect);
        self
    }

    pub fn target(&self) -> &Arc<TextureProxy> {
        &self.target
    }

    pub(super) fn visit_reads(&self, visitor: &mut dyn FnMut(ProxyId)) {
        for proxy in &self.sampled {
            visitor(proxy.id());
        }
    }

    pub(super) fn prepare_resources(&mut self, ctx: &mut PrepareContext<'_>) -> Status {
        // A pass that neither draws nor clears leaves the target untouched.
        if self.draws.is_empty() && self.load == LoadOp::Load {
            for proxy in &self.sampled {
                ctx.scratch.notify_read(proxy.id());
            }
            return Status::Discard;
        }
        if let Some(missing) = self
            .required_effects
            .iter()
            .find(|effect| !ctx.effects.contains(**effect))
        {
            log::warn!("DrawPassTask: runtime effect {:?} is not registered", missing);
            return Status::Fail;
        }

        // The deferred target is bound when the Recording is inserted.
        if self.target.kind() != ProxyKind::Deferred
            && !self.target.instantiate(ctx.provider, ctx.scratch)
        {
            return Status::Fail;
        }
        for proxy in &self.sampled {
            if !proxy.is_instantiated() && proxy.kind() == ProxyKind::Scratch {
                log::warn!("DrawPassTask: {:?} sampled before it was written", proxy.id());
                return Status::Fail;
            }
            if !proxy.instantiate(ctx.provider, ctx.scratch) {
                return Status::Fail;
            }
            ctx.scratch.notify_read(proxy.id());
        }

        if self.target.kind() == ProxyKind::Scratch {
            let listener: Arc<dyn PendingUseListener> = self.target.clone();
            ctx.scratch.mark_resource_in_use(listener);
        }
        ctx.scratch.notify_resources_consumed();
        Status::Success
    }

    pub(super) fn add_commands(
        &mut self,
        command_buffer: &mut CommandBuffer,
        replay: &ReplayTargetData,
    ) -> Status {
        let Some(target) = self.target.texture() else {
            log::warn!("DrawPassTask: target {:?} not instantiated", self.target.id());
            return Status::Fail;
        };
        let translation = if self.target.kind() == ProxyKind::Deferred {
            replay.translation
        } else {
            [0, 0]
        };

        if let Err(err) = command_buffer.begin_render_pass(&target, self.load, translation) {
            log::warn!("DrawPassTask: {}", err);
            return Status::Fail;
        }
        let status = bind_all(command_buffer, &self.bindings, "DrawPassTask");
        if status == Status::Success {
            for draw in &self.draws {
                command_buffer.draw(draw.vertex_count, draw.instance_count);
            }
        }
        command_buffer.end_render_pass();
        status
    }
}

/// A compute dispatch over bound storage.
#[derive(Debug)]
pub struct ComputeTask {
    bindings: Vec<(u32, BufferBinding)>,
    workgroups: [u32; 3],
}

impl ComputeTask {
    pub fn new(workgroups: [u32; 3]) -> Self {
        Self {
            bindings: Vec::new(),
            workgroups,
        }
    }

    pub fn bind(mut self, slot: u32, binding: impl Into<BufferBinding>) -> Self {
        self.bindings.push((slot, binding.into()));
        self
    }

    pub(super) fn prepare_resources(&mut self) -> Status {
        if self.workgroups.contains(&0) {
            Status::Discard
        } else {
            Status::Success
        }
    }

    pub(super) fn add_commands(&mut self, command_buffer: &mut CommandBuffer) -> Status {
        let status = bind_all(command_buffer, &self.bindings, "ComputeTask");
        if status == Status::Success {
            command_buffer.dispatch(self.workgroups);
        }
        status
    }
}
