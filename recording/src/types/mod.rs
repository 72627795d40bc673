//! Common types and descriptors for recorded resources.
//!
//! This module contains the buffer classification enums, texture formats and
//! usage flags, and the keys the resource cache uses to match reusable
//! resources.

mod buffer;
mod key;
mod texture;

pub use buffer::{AccessPattern, BufferType, ClearBuffer};
pub use key::ResourceKey;
pub use texture::{TextureDescriptor, TextureFormat, TextureRegion, TextureUsage};
