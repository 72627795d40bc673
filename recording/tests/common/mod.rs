//! Common utilities for recording integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use redlilium_recording::backend::{CompletionMode, DummyConfig};
use redlilium_recording::{
    CallbackResult, Caps, Context, ContextOptions, DummyBackend, FinishCallback,
    TextureDescriptor, TextureFormat, TextureUsage,
};

/// Route `log` output through the test harness. Safe to call from every test.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Default caps with draw buffers either mapped directly or staged through
/// transfer buffers.
pub fn caps(mappable: bool) -> Caps {
    Caps::default().with_mappable_draw_buffers(mappable)
}

/// A context over a fresh dummy backend. The backend is returned too so
/// tests can inspect its counters.
pub fn create_context(caps: Caps) -> (Arc<DummyBackend>, Context) {
    create_context_with(DummyConfig::new(), caps)
}

pub fn create_context_with(config: DummyConfig, caps: Caps) -> (Arc<DummyBackend>, Context) {
    init_logging();
    let backend = Arc::new(DummyBackend::with_config(config));
    let context = Context::new(backend.clone(), ContextOptions::default().with_caps(caps))
        .expect("Failed to create context");
    (backend, context)
}

/// A context whose fences only signal when the test says so.
pub fn create_manual_context(caps: Caps) -> (Arc<DummyBackend>, Context) {
    create_context_with(
        DummyConfig::new().with_completion(CompletionMode::Manual),
        caps,
    )
}

pub fn target_descriptor(width: u32, height: u32) -> TextureDescriptor {
    TextureDescriptor::new(
        width,
        height,
        TextureFormat::Rgba8Unorm,
        TextureUsage::RENDER_ATTACHMENT | TextureUsage::COPY_DST | TextureUsage::COPY_SRC,
    )
}

/// Results reported to finish callbacks, tagged by the test.
pub type CallbackLog = Arc<Mutex<Vec<(u32, CallbackResult)>>>;

pub fn callback_log() -> CallbackLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn logging_callback(log: &CallbackLog, tag: u32) -> FinishCallback {
    let log = Arc::clone(log);
    Box::new(move |result| log.lock().push((tag, result)))
}
