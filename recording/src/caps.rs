//! Device capabilities consumed by the recording core.

use crate::error::GraphicsError;

/// Alignment and limit queries for the active device.
///
/// All alignments are powers of two. [`Caps::validate`] rejects anything else
/// so the allocators can rely on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caps {
    /// Minimum offset alignment when binding a uniform range.
    pub required_uniform_buffer_alignment: u32,
    /// Minimum offset alignment when binding a storage range.
    pub required_storage_buffer_alignment: u32,
    /// Minimum offset alignment for buffer copy sources and destinations.
    pub required_transfer_buffer_alignment: u32,
    /// Whether vertex, index, uniform and storage buffers can be mapped
    /// directly. When false, writes are staged through transfer buffers.
    pub draw_buffer_can_be_mapped: bool,
    /// Largest texture edge the device accepts.
    pub max_texture_size: u32,
}

impl Default for Caps {
    fn default() -> Self {
        Self {
            required_uniform_buffer_alignment: 256,
            required_storage_buffer_alignment: 16,
            required_transfer_buffer_alignment: 4,
            draw_buffer_can_be_mapped: true,
            max_texture_size: 8192,
        }
    }
}

impl Caps {
    pub fn with_uniform_alignment(mut self, alignment: u32) -> Self {
        self.required_uniform_buffer_alignment = alignment;
        self
    }

    pub fn with_storage_alignment(mut self, alignment: u32) -> Self {
        self.required_storage_buffer_alignment = alignment;
        self
    }

    pub fn with_transfer_alignment(mut self, alignment: u32) -> Self {
        self.required_transfer_buffer_alignment = alignment;
        self
    }

    pub fn with_mappable_draw_buffers(mut self, mappable: bool) -> Self {
        self.draw_buffer_can_be_mapped = mappable;
        self
    }

    pub fn with_max_texture_size(mut self, size: u32) -> Self {
        self.max_texture_size = size;
        self
    }

    pub fn required_uniform_buffer_alignment(&self) -> u32 {
        self.required_uniform_buffer_alignment
    }

    pub fn required_storage_buffer_alignment(&self) -> u32 {
        self.required_storage_buffer_alignment
    }

    pub fn required_transfer_buffer_alignment(&self) -> u32 {
        self.required_transfer_buffer_alignment
    }

    pub fn draw_buffer_can_be_mapped(&self) -> bool {
        self.draw_buffer_can_be_mapped
    }

    /// Check that every alignment is a non-zero power of two.
    pub fn validate(&self) -> Result<(), GraphicsError> {
        let alignments = [
            ("uniform", self.required_uniform_buffer_alignment),
            ("storage", self.required_storage_buffer_alignment),
            ("transfer", self.required_transfer_buffer_alignment),
        ];
        for (name, alignment) in alignments {
            if !alignment.is_power_of_two() {
                return Err(GraphicsError::InvalidParameter(format!(
                    "{name} buffer alignment {alignment} is not a power of two"
                )));
            }
        }
        if self.max_texture_size == 0 {
            return Err(GraphicsError::InvalidParameter(
                "max texture size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_caps_are_valid() {
        let caps = Caps::default();
        assert!(caps.validate().is_ok());
        assert_eq!(caps.required_uniform_buffer_alignment(), 256);
        assert!(caps.draw_buffer_can_be_mapped());
    }

    #[test]
    fn test_rejects_non_power_of_two() {
        let caps = Caps::default().with_storage_alignment(24);
        assert_eq!(
            caps.validate(),
            Err(GraphicsError::InvalidParameter(
                "storage buffer alignment 24 is not a power of two".to_string()
            ))
        );

        let caps = Caps::default().with_transfer_alignment(0);
        assert!(caps.validate().is_err());
    }
}
