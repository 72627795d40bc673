//! Buffer classification types.

/// What a buffer is bound as on the GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferType {
    /// Vertex attribute data.
    Vertex,
    /// Index data.
    Index,
    /// Uniform blocks.
    Uniform,
    /// Shader storage.
    Storage,
    /// Indirect draw/dispatch arguments written by the GPU.
    Indirect,
    /// Storage that is later read as vertex data.
    VertexStorage,
    /// Storage that is later read as index data.
    IndexStorage,
    /// CPU-to-GPU staging memory.
    Upload,
    /// GPU-to-CPU readback memory.
    Readback,
}

impl BufferType {
    /// Returns true if buffers of this type are staging memory.
    pub fn is_transfer(&self) -> bool {
        matches!(self, Self::Upload | Self::Readback)
    }
}

/// Where a buffer's memory lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AccessPattern {
    /// Only the GPU touches the memory.
    #[default]
    GpuOnly,
    /// The CPU can map and write the memory.
    HostVisible,
}

/// Whether a GPU-only storage range must be zeroed before first use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClearBuffer {
    #[default]
    No,
    Yes,
}
