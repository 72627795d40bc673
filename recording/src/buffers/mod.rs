//! CPU-side management of GPU buffer memory.
//!
//! - [`BufferSubAllocator`]: aligned cursor over one buffer's free tail.
//! - [`DrawBufferManager`]: per-Recording pools for vertex, index, uniform
//!   and storage data.
//! - [`StaticBufferManager`]: one-shot packing of immutable data into a
//!   single GPU-private buffer.
//! - [`UploadBufferManager`]: staging memory for CPU to GPU transfers.
//! - [`FloatStorageManager`]: deduplicated float arrays in a storage buffer.

mod draw_buffer_manager;
mod float_storage;
mod static_buffer_manager;
mod sub_allocator;
mod upload_buffer_manager;

pub use draw_buffer_manager::{DrawBufferKind, DrawBufferManager};
pub use float_storage::FloatStorageManager;
pub use static_buffer_manager::{FinishResult, StaticBufferManager};
pub use sub_allocator::{BindBufferInfo, BufferSubAllocator, BufferWriter, DeferredBinding};
pub use upload_buffer_manager::{DEFAULT_UPLOAD_BUFFER_SIZE, UploadBufferManager};

/// Greatest common divisor.
pub fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Least common multiple, or `None` if it doesn't fit in 32 bits. Zero
/// operands are treated as 1, so an absent alignment requirement never
/// widens the result.
pub fn lcm(a: u32, b: u32) -> Option<u32> {
    let a = a.max(1);
    let b = b.max(1);
    (a / gcd(a, b)).checked_mul(b)
}

/// Round `value` up to a multiple of `alignment`. Returns `None` on overflow.
///
/// `alignment` need not be a power of two: strides and their LCMs usually
/// aren't.
pub fn align_to(value: u32, alignment: u32) -> Option<u32> {
    let alignment = alignment.max(1);
    match value % alignment {
        0 => Some(value),
        rem => value.checked_add(alignment - rem),
    }
}
