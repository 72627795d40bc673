//! GPU-backed resources and their lifecycle.
//!
//! - [`resource`]: the dual ref-count protocol every resource follows.
//! - [`Buffer`] / [`Texture`]: the concrete resources.
//! - [`ResourceCache`]: keyed reuse, budget and purge.
//! - [`ScratchResourceManager`]: scratch checkout and pending-use scopes used
//!   while a task graph prepares its resources.

mod buffer;
mod cache;
pub mod resource;
mod scratch;
mod texture;

pub use buffer::Buffer;
pub use cache::{DEFAULT_MAX_BUDGET, ResourceCache, ScratchResourceSet};
pub use resource::{
    AnyResource, AnyResourceRef, Budgeted, CommandBufferUsage, LastRemovedRef, Resource,
    ResourceId, ResourceRef, ResourceState, Shareable,
};
pub use scratch::{PendingUseListener, ScratchResourceManager};
pub use texture::Texture;
