//! Texture formats, usages and descriptors. Descriptors double as cache
//! keys for textures, minus the label.

use bitflags::bitflags;

/// Texel formats the recording layer can allocate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureFormat {
    R8Unorm,
    Rg8Unorm,
    #[default]
    Rgba8Unorm,
    /// Common swapchain format.
    Bgra8Unorm,
    R32Float,
    Rgba16Float,
    /// Depth only. Never the target of buffer uploads.
    Depth32Float,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(self, Self::Depth32Float)
    }

    /// Bytes per texel, which is also the copy alignment for rows.
    pub fn block_size(&self) -> u32 {
        match self {
            Self::R8Unorm => 1,
            Self::Rg8Unorm => 2,
            Self::Rgba8Unorm | Self::Bgra8Unorm | Self::R32Float | Self::Depth32Float => 4,
            Self::Rgba16Float => 8,
        }
    }
}

bitflags! {
    /// What tasks may do with a texture. Part of the cache key, so a
    /// scratch texture is only reused for an identical usage set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        /// Source of texture-to-buffer copies.
        const COPY_SRC = 1 << 0;
        /// Destination of uploads and buffer-to-texture copies.
        const COPY_DST = 1 << 1;
        /// Sampled by a draw pass.
        const TEXTURE_BINDING = 1 << 2;
        const STORAGE_BINDING = 1 << 3;
        /// Target of a draw pass.
        const RENDER_ATTACHMENT = 1 << 4;
    }
}

impl Default for TextureUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Size, format and usage of a 2D texture.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureDescriptor {
    /// Shows up in logs only. Ignored by the cache key.
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
}

impl TextureDescriptor {
    pub fn new(width: u32, height: u32, format: TextureFormat, usage: TextureUsage) -> Self {
        Self {
            label: None,
            width,
            height,
            format,
            usage,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Tightly packed bytes per row.
    pub fn bytes_per_row(&self) -> u32 {
        self.width * self.format.block_size()
    }

    /// Budgeted size of a texture made from this descriptor.
    pub fn byte_size(&self) -> u64 {
        u64::from(self.bytes_per_row()) * u64::from(self.height)
    }

    pub fn full_region(&self) -> TextureRegion {
        TextureRegion::new(0, 0, self.width, self.height)
    }
}

/// A rectangle of texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TextureRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl TextureRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Returns true if the region lies inside a `width` x `height` texture.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.x.checked_add(self.width).is_some_and(|right| right <= width)
            && self.y.checked_add(self.height).is_some_and(|bottom| bottom <= height)
    }
}
