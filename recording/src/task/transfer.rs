//! Copy, upload and clear tasks.

use std::sync::Arc;

use crate::buffers::BindBufferInfo;
use crate::command_buffer::CommandBuffer;
use crate::types::TextureRegion;

use super::{PrepareContext, Status, TextureProxy};

/// Copies staged bytes into a texture once.
///
/// The staging range is only valid for the first replay, so the task
/// discards itself after adding its commands.
#[derive(Debug)]
pub struct UploadTask {
    source: BindBufferInfo,
    bytes_per_row: u32,
    target: Arc<TextureProxy>,
    region: TextureRegion,
}

impl UploadTask {
    pub fn new(
        source: BindBufferInfo,
        bytes_per_row: u32,
        target: Arc<TextureProxy>,
        region: TextureRegion,
    ) -> Self {
        Self {
            source,
            bytes_per_row,
            target,
            region,
        }
    }

    pub fn target(&self) -> &Arc<TextureProxy> {
        &self.target
    }

    pub(super) fn prepare_resources(&mut self, ctx: &mut PrepareContext<'_>) -> Status {
        if self.target.instantiate(ctx.provider, ctx.scratch) {
            Status::Success
        } else {
            Status::Fail
        }
    }

    pub(super) fn add_commands(&mut self, command_buffer: &mut CommandBuffer) -> Status {
        let Some(texture) = self.target.texture() else {
            log::warn!("UploadTask: target {:?} not instantiated", self.target.id());
            return Status::Fail;
        };
        match command_buffer.copy_buffer_to_texture(
            &self.source,
            self.bytes_per_row,
            &texture,
            self.region,
        ) {
            Ok(()) => Status::Discard,
            Err(err) => {
                log::warn!("UploadTask: {}", err);
                Status::Fail
            }
        }
    }
}

/// Copies one buffer range into another.
#[derive(Debug)]
pub struct CopyBufferToBufferTask {
    src: BindBufferInfo,
    dst: BindBufferInfo,
}

impl CopyBufferToBufferTask {
    /// The copy size is `src.size`; only `dst.offset` is used.
    pub fn new(src: BindBufferInfo, dst: BindBufferInfo) -> Self {
        Self { src, dst }
    }

    pub fn size(&self) -> u32 {
        self.src.size
    }

    pub fn src(&self) -> &BindBufferInfo {
        &self.src
    }

    pub fn dst(&self) -> &BindBufferInfo {
        &self.dst
    }

    pub(super) fn add_commands(&mut self, command_buffer: &mut CommandBuffer) -> Status {
        match command_buffer.copy_buffer_to_buffer(&self.src, &self.dst) {
            Ok(()) => Status::Success,
            Err(err) => {
                log::warn!("CopyBufferToBufferTask: {}", err);
                Status::Fail
            }
        }
    }
}

/// Copies a buffer range into a texture on every replay.
#[derive(Debug)]
pub struct CopyBufferToTextureTask {
    src: BindBufferInfo,
    bytes_per_row: u32,
    dst: Arc<TextureProxy>,
    region: TextureRegion,
}

impl CopyBufferToTextureTask {
    pub fn new(
        src: BindBufferInfo,
        bytes_per_row: u32,
        dst: Arc<TextureProxy>,
        region: TextureRegion,
    ) -> Self {
        Self {
            src,
            bytes_per_row,
            dst,
            region,
        }
    }

    pub(super) fn prepare_resources(&mut self, ctx: &mut PrepareContext<'_>) -> Status {
        if self.dst.instantiate(ctx.provider, ctx.scratch) {
            Status::Success
        } else {
            Status::Fail
        }
    }

    pub(super) fn add_commands(&mut self, command_buffer: &mut CommandBuffer) -> Status {
        let Some(texture) = self.dst.texture() else {
            return Status::Fail;
        };
        match command_buffer.copy_buffer_to_texture(&self.src, self.bytes_per_row, &texture, self.region)
        {
            Ok(()) => Status::Success,
            Err(err) => {
                log::warn!("CopyBufferToTextureTask: {}", err);
                Status::Fail
            }
        }
    }
}

/// Reads a texture region back into a buffer.
#[derive(Debug)]
pub struct CopyTextureToBufferTask {
    src: Arc<TextureProxy>,
    region: TextureRegion,
    dst: BindBufferInfo,
    bytes_per_row: u32,
}

impl CopyTextureToBufferTask {
    pub fn new(
        src: Arc<TextureProxy>,
        region: TextureRegion,
        dst: BindBufferInfo,
        bytes_per_row: u32,
    ) -> Self {
        Self {
            src,
            region,
            dst,
            bytes_per_row,
        }
    }

    pub fn source(&self) -> &Arc<TextureProxy> {
        &self.src
    }

    pub(super) fn prepare_resources(&mut self, ctx: &mut PrepareContext<'_>) -> Status {
        if !self.src.instantiate(ctx.provider, ctx.scratch) {
            return Status::Fail;
        }
        ctx.scratch.notify_read(self.src.id());
        Status::Success
    }

    pub(super) fn add_commands(&mut self, command_buffer: &mut CommandBuffer) -> Status {
        let Some(texture) = self.src.texture() else {
            return Status::Fail;
        };
        match command_buffer.copy_texture_to_buffer(&texture, self.region, &self.dst, self.bytes_per_row)
        {
            Ok(()) => Status::Success,
            Err(err) => {
                log::warn!("CopyTextureToBufferTask: {}", err);
                Status::Fail
            }
        }
    }
}

/// Zeroes a set of buffer ranges before anything else in the Recording
/// touches them.
#[derive(Debug)]
pub struct ClearBuffersTask {
    ranges: Vec<BindBufferInfo>,
}

impl ClearBuffersTask {
    pub fn new(ranges: Vec<BindBufferInfo>) -> Self {
        Self { ranges }
    }

    pub fn ranges(&self) -> &[BindBufferInfo] {
        &self.ranges
    }

    pub(super) fn add_commands(&mut self, command_buffer: &mut CommandBuffer) -> Status {
        for range in &self.ranges {
            if let Err(err) = command_buffer.clear_buffer(range) {
                log::warn!("ClearBuffersTask: {}", err);
                return Status::Fail;
            }
        }
        Status::Success
    }
}
