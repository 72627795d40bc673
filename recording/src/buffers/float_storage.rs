//! Deduplicated float arrays packed into one storage buffer per Recording.

use std::collections::HashMap;

use super::{DeferredBinding, DrawBufferManager};

/// Gathers float data (gradient stops and the like) while a Recording is
/// built and writes it into a single storage range when the Recording is
/// snapped. Identical arrays are stored once.
#[derive(Debug, Default)]
pub struct FloatStorageManager {
    data: Vec<f32>,
    offsets: HashMap<Vec<u32>, u32>,
    binding: DeferredBinding,
}

impl FloatStorageManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `values` and return the index of their first element.
    pub fn store(&mut self, values: &[f32]) -> u32 {
        let key: Vec<u32> = values.iter().map(|v| v.to_bits()).collect();
        if let Some(offset) = self.offsets.get(&key) {
            return *offset;
        }
        let offset = self.data.len() as u32;
        self.data.extend_from_slice(values);
        self.offsets.insert(key, offset);
        offset
    }

    /// The storage range the current data will land in. Resolves when the
    /// Recording is snapped.
    pub fn binding(&self) -> DeferredBinding {
        self.binding.clone()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Write the gathered data into a storage range and start over.
    ///
    /// Returns false if the range could not be allocated.
    pub fn finish(&mut self, draw_buffers: &DrawBufferManager) -> bool {
        let binding = std::mem::take(&mut self.binding);
        let data = std::mem::take(&mut self.data);
        self.offsets.clear();
        if data.is_empty() {
            return true;
        }

        let Some(mut writer) = draw_buffers.get_ssbo_writer(data.len() as u32, 4) else {
            log::warn!("FloatStorageManager: no storage for {} floats", data.len());
            return false;
        };
        writer.write_slice(&data);
        binding.resolve(writer.into_binding());
        true
    }
}
