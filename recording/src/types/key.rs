//! Cache keys for reusable resources.

use super::{AccessPattern, BufferType, TextureDescriptor, TextureFormat, TextureUsage};

/// Identifies which cached resources are interchangeable.
///
/// Two resources with equal keys can be handed out for each other. Labels
/// and other debug state never take part in the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKey {
    Buffer {
        size: u32,
        buffer_type: BufferType,
        access: AccessPattern,
    },
    Texture {
        width: u32,
        height: u32,
        format: TextureFormat,
        usage: TextureUsage,
    },
}

impl ResourceKey {
    pub fn buffer(size: u32, buffer_type: BufferType, access: AccessPattern) -> Self {
        Self::Buffer {
            size,
            buffer_type,
            access,
        }
    }

    pub fn texture(descriptor: &TextureDescriptor) -> Self {
        Self::Texture {
            width: descriptor.width,
            height: descriptor.height,
            format: descriptor.format,
            usage: descriptor.usage,
        }
    }
}
