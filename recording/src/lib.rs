//! # RedLilium Recording
//!
//! Deferred GPU command recording for RedLilium.
//!
//! ## Overview
//!
//! Work is described against logical targets, accumulated by a [`Recorder`]
//! and snapped into an immutable [`Recording`]. A [`Context`] replays
//! Recordings onto native command buffers through its [`QueueManager`] and
//! tracks them until the GPU is done.
//!
//! This crate provides:
//! - [`buffers`] - Sub-allocation of vertex, index, uniform and storage data
//! - [`resources`] - Ref-counted GPU resources and the resource cache
//! - [`task`] - The task graph and its two-phase prepare/replay protocol
//! - [`GpuBackend`] - Trait for graphics backend implementations, plus a
//!   CPU-emulated [`DummyBackend`]
//!
//! ## Example
//!
//! ```ignore
//! use redlilium_recording::{Context, ContextOptions, InsertRecordingInfo, SyncToCpu};
//!
//! let mut context = Context::new(backend, ContextOptions::default())?;
//! let mut recorder = context.make_recorder(RecorderOptions::default());
//! let mut writer = recorder.draw_buffers().get_vertex_writer(3, 16).unwrap();
//! writer.write_slice(&vertices);
//! // Add tasks binding writer.into_binding()...
//! let mut recording = recorder.snap().unwrap();
//! context.insert_recording(InsertRecordingInfo::new(&mut recording))?;
//! context.submit(SyncToCpu::Yes);
//! ```

pub mod backend;
pub mod buffers;
pub mod caps;
pub mod command_buffer;
pub mod context;
pub mod error;
pub mod provider;
pub mod queue_manager;
pub mod recorder;
pub mod recording;
pub mod resources;
pub mod task;
pub mod types;

// Re-export main types for convenience
pub use backend::{DummyBackend, GpuBackend, LoadOp};
pub use buffers::{
    BindBufferInfo, BufferSubAllocator, BufferWriter, DeferredBinding, DrawBufferManager,
    StaticBufferManager, UploadBufferManager,
};
pub use caps::Caps;
pub use command_buffer::{CallbackResult, CommandBuffer, FinishCallback};
pub use context::{Context, ContextOptions};
pub use error::GraphicsError;
pub use provider::ResourceProvider;
pub use queue_manager::{InsertRecordingInfo, QueueManager, SyncToCpu};
pub use recorder::{Recorder, RecorderOptions};
pub use recording::Recording;
pub use resources::{Buffer, ResourceRef, Texture};
pub use task::{Status, Task, TaskList, TextureProxy};
pub use types::{
    AccessPattern, BufferType, ClearBuffer, TextureDescriptor, TextureFormat, TextureRegion,
    TextureUsage,
};

/// Recording library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the recording subsystem.
pub fn init() {
    log::info!("RedLilium Recording v{} initialized", VERSION);
}
