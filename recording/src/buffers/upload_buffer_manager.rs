//! Staging memory for CPU to GPU transfers.

use std::sync::Arc;

use crate::provider::ResourceProvider;
use crate::recording::RecordingBuilder;
use crate::resources::{AnyResourceRef, Buffer, ResourceRef, Shareable};
use crate::types::{AccessPattern, BufferType};

use super::{BindBufferInfo, BufferWriter, align_to, lcm};

/// Size of the shared staging buffer small requests are packed into.
pub const DEFAULT_UPLOAD_BUFFER_SIZE: u32 = 64 * 1024;

/// Hands out mapped transfer ranges.
///
/// Small requests are packed into a shared staging buffer that is replaced
/// when full. Requests larger than that buffer get a dedicated one. Every
/// buffer stays mapped until [`transfer_to_recording`](Self::transfer_to_recording)
/// or [`take_buffers`](Self::take_buffers) unmaps it.
pub struct UploadBufferManager {
    provider: Arc<ResourceProvider>,
    reuse_size: u32,
    current: Option<ResourceRef<Buffer>>,
    offset: u32,
    used: Vec<ResourceRef<Buffer>>,
}

impl UploadBufferManager {
    pub fn new(provider: Arc<ResourceProvider>, reuse_size: u32) -> Self {
        Self {
            provider,
            reuse_size: reuse_size.max(1),
            current: None,
            offset: 0,
            used: Vec::new(),
        }
    }

    /// A mapped range of `bytes` whose offset is a multiple of both
    /// `alignment` and the transfer alignment.
    pub fn get_transfer_range(&mut self, bytes: u32, alignment: u32) -> Option<BindBufferInfo> {
        if bytes == 0 {
            return None;
        }
        let alignment = lcm(
            alignment,
            self.provider.caps().required_transfer_buffer_alignment(),
        )?;

        if bytes > self.reuse_size {
            let buffer = self.create_mapped(bytes)?;
            let range = BindBufferInfo::new(Arc::clone(buffer.arc()), 0, bytes);
            self.used.push(buffer);
            return Some(range);
        }

        let offset = match &self.current {
            Some(current) => align_to(self.offset, alignment)
                .filter(|offset| u64::from(*offset) + u64::from(bytes) <= u64::from(current.size())),
            None => None,
        };
        let offset = match offset {
            Some(offset) => offset,
            None => {
                let buffer = self.create_mapped(self.reuse_size)?;
                if let Some(full) = self.current.replace(buffer) {
                    self.used.push(full);
                }
                0
            }
        };

        let current = self.current.as_ref()?;
        self.offset = offset + bytes;
        Some(BindBufferInfo::new(Arc::clone(current.arc()), offset, bytes))
    }

    /// A writer over a fresh transfer range.
    pub fn get_writer(&mut self, bytes: u32, alignment: u32) -> Option<BufferWriter> {
        let range = self.get_transfer_range(bytes, alignment)?;
        Some(BufferWriter::new(range.clone(), Some(range)))
    }

    fn create_mapped(&self, size: u32) -> Option<ResourceRef<Buffer>> {
        let buffer = match self.provider.find_or_create_buffer(
            size,
            BufferType::Upload,
            AccessPattern::HostVisible,
            Shareable::No,
            None,
        ) {
            Ok(buffer) => buffer,
            Err(err) => {
                log::warn!("UploadBufferManager: failed to create transfer buffer: {}", err);
                return None;
            }
        };
        if let Err(err) = buffer.map() {
            log::warn!("UploadBufferManager: failed to map transfer buffer: {}", err);
            return None;
        }
        Some(buffer)
    }

    /// Unmap every staging buffer and hand over the refs keeping them alive.
    pub fn take_buffers(&mut self) -> Vec<AnyResourceRef> {
        let current = self.current.take();
        self.offset = 0;
        self.used
            .drain(..)
            .chain(current)
            .map(|buffer| {
                buffer.unmap();
                AnyResourceRef::from(buffer)
            })
            .collect()
    }

    /// Move the staging buffers into the Recording being built.
    pub fn transfer_to_recording(&mut self, builder: &mut RecordingBuilder) {
        let buffers = self.take_buffers();
        log::trace!(
            "UploadBufferManager: {} staging buffers into recording",
            buffers.len()
        );
        for buffer in buffers {
            builder.keep_alive(buffer);
        }
    }

    /// Number of staging buffers currently held.
    pub fn buffer_count(&self) -> usize {
        self.used.len() + usize::from(self.current.is_some())
    }
}

impl std::fmt::Debug for UploadBufferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadBufferManager")
            .field("reuse_size", &self.reuse_size)
            .field("buffers", &self.buffer_count())
            .field("offset", &self.offset)
            .finish()
    }
}
