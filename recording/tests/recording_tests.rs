//! Integration tests for deferred recording and replay.
//!
//! These run end to end on the dummy backend: data is written through a
//! Recorder, snapped into a Recording, inserted into a Context and read back
//! after the submission finishes.
//!
//! Test categories:
//! - Buffer sub-allocation: placement, alignment and growth of draw buffers
//! - Failure handling: mapping failures and failed task preparation
//! - Scratch resources: reuse of scratch buffers and textures
//! - Submission: callback ordering, insertion order and replay targets
//! - Static data: one-shot packing at context initialization

mod common;

use std::sync::Arc;

use redlilium_recording::backend::{DummyConfig, LoadOp};
use redlilium_recording::buffers::DrawBufferKind;
use redlilium_recording::task::{ComputeTask, DrawPassTask, ProxyKind, RuntimeEffectId};
use redlilium_recording::{
    BindBufferInfo, CallbackResult, ClearBuffer, GpuBackend, InsertRecordingInfo,
    RecorderOptions, SyncToCpu, Task, TextureRegion,
};
use rstest::rstest;

use common::{
    callback_log, caps, create_context, create_context_with, create_manual_context,
    logging_callback, target_descriptor,
};

// ============================================================================
// Buffer Sub-allocation
// ============================================================================

/// Bytes written through a draw buffer writer are what the GPU sees once the
/// Recording has executed, whether the buffer was mapped or staged.
#[rstest]
#[case::mapped(true)]
#[case::staged(false)]
fn test_written_vertices_reach_the_gpu(#[case] mappable: bool) {
    let (backend, mut context) = create_context(caps(mappable));
    let mut recorder = context.make_recorder(RecorderOptions::default());
    let target = recorder.make_texture_proxy(target_descriptor(8, 8), ProxyKind::Exact);

    let vertices: [[f32; 3]; 4] = [
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [1.0, 1.0, 0.0],
    ];
    let mut writer = recorder.draw_buffers().get_vertex_writer(4, 12).unwrap();
    writer.write_slice(&vertices);
    let binding = writer.into_binding();
    recorder.add_task(Task::DrawPass(
        DrawPassTask::new(target, LoadOp::Clear([0.0; 4]))
            .bind(0, binding.clone())
            .draw(4, 1),
    ));

    let mut recording = recorder.snap().expect("snap failed");
    context
        .insert_recording(InsertRecordingInfo::new(&mut recording))
        .unwrap();
    assert!(context.submit(SyncToCpu::Yes));

    assert_eq!(binding.read(), bytemuck::cast_slice::<_, u8>(&vertices));
    assert_eq!(backend.draw_count(), 1);
    assert!(!context.has_unfinished_gpu_work());
}

/// An allocator still held when the Recording is snapped contributes the
/// ranges it reserved. Its buffer is neither lost nor handed to the next
/// Recording.
#[rstest]
#[case::mapped(true)]
#[case::staged(false)]
fn test_allocator_held_across_snap_keeps_its_data(#[case] mappable: bool) {
    let (_backend, mut context) = create_context(caps(mappable));
    let mut recorder = context.make_recorder(RecorderOptions::default());
    let target = recorder.make_texture_proxy(target_descriptor(8, 8), ProxyKind::Exact);

    let mut allocator = recorder
        .draw_buffers()
        .get_buffer(DrawBufferKind::Vertex, 4, 4, 1);
    let mut writer = allocator.reserve(4).unwrap();
    writer.write_slice(&[1u32, 2, 3, 4]);
    let binding = writer.into_binding();
    recorder.add_task(Task::DrawPass(
        DrawPassTask::new(target, LoadOp::Clear([0.0; 4]))
            .bind(0, binding.clone())
            .draw(4, 1),
    ));

    let mut recording = recorder.snap().expect("snap failed");
    assert!(allocator.reserve(1).is_none());
    drop(allocator);

    // The next Recording must not be handed the same buffer.
    let mut later = recorder.draw_buffers().get_vertex_writer(4, 4).unwrap();
    assert!(!Arc::ptr_eq(&later.binding().buffer, &binding.buffer));
    later.write_slice(&[9u32; 4]);
    drop(later);

    context
        .insert_recording(InsertRecordingInfo::new(&mut recording))
        .unwrap();
    assert!(context.submit(SyncToCpu::Yes));
    assert_eq!(binding.read(), bytemuck::cast_slice::<u32, u8>(&[1, 2, 3, 4]));
}

/// Ten 12-byte vertices land at the start of a fresh 16 KiB buffer and the
/// next five follow directly behind them.
#[rstest]
#[case::mapped(true)]
#[case::staged(false)]
fn test_vertex_requests_pack_contiguously(#[case] mappable: bool) {
    let (_backend, mut context) = create_context(caps(mappable));
    let recorder = context.make_recorder(RecorderOptions::default());

    let first = recorder.draw_buffers().get_vertex_writer(10, 12).unwrap();
    let second = recorder.draw_buffers().get_vertex_writer(5, 12).unwrap();

    assert_eq!(first.binding().offset, 0);
    assert_eq!(first.binding().size, 120);
    assert_eq!(first.binding().buffer.size(), 16384);
    assert_eq!(second.binding().offset, 120);
    assert!(Arc::ptr_eq(&first.binding().buffer, &second.binding().buffer));
}

/// Each uniform request starts on the uniform binding alignment, even when
/// the block size isn't a multiple of it.
#[rstest]
#[case::mapped(true)]
#[case::staged(false)]
fn test_uniform_blocks_are_binding_aligned(#[case] mappable: bool) {
    let (_backend, mut context) = create_context(caps(mappable));
    assert_eq!(context.caps().required_uniform_buffer_alignment(), 256);
    let recorder = context.make_recorder(RecorderOptions::default());

    let first = recorder.draw_buffers().get_uniform_writer(1, 100).unwrap();
    let second = recorder.draw_buffers().get_uniform_writer(1, 100).unwrap();

    assert_eq!(first.binding().offset, 0);
    assert_eq!(second.binding().offset, 256);
}

/// Ranges handed out between two snaps never share a byte, and each starts
/// on the alignment its kind requires.
#[rstest]
#[case::mapped(true)]
#[case::staged(false)]
fn test_ranges_are_disjoint_and_aligned(#[case] mappable: bool) {
    let (_backend, mut context) = create_context(caps(mappable));
    let storage_alignment = context.caps().required_storage_buffer_alignment();
    let uniform_alignment = context.caps().required_uniform_buffer_alignment();
    let recorder = context.make_recorder(RecorderOptions::default());
    let buffers = recorder.draw_buffers();

    let mut ranges: Vec<BindBufferInfo> = Vec::new();
    for round in 1..=24u32 {
        let stride = [4, 12, 16, 20, 36][(round % 5) as usize];
        let count = round * 7;

        let vertex = buffers.get_vertex_writer(count, stride).unwrap();
        assert_eq!(vertex.binding().offset % stride, 0);
        ranges.push(vertex.into_binding());

        let index = buffers.get_index_writer(count, 2).unwrap();
        assert_eq!(index.binding().offset % 2, 0);
        ranges.push(index.into_binding());

        let uniform = buffers.get_uniform_writer(1, stride * 3).unwrap();
        assert_eq!(uniform.binding().offset % uniform_alignment, 0);
        ranges.push(uniform.into_binding());

        let ssbo = buffers.get_ssbo_writer(count, stride).unwrap();
        let ssbo_alignment = redlilium_recording::buffers::lcm(stride, storage_alignment).unwrap();
        assert_eq!(ssbo.binding().offset % ssbo_alignment, 0);
        ranges.push(ssbo.into_binding());

        let storage = buffers.get_storage(count * 8, ClearBuffer::No).unwrap();
        assert_eq!(storage.offset % storage_alignment, 0);
        ranges.push(storage);
    }

    for (i, a) in ranges.iter().enumerate() {
        assert!(a.end() <= a.buffer.size());
        for b in &ranges[i + 1..] {
            assert!(!a.overlaps(b), "{:?} overlaps {:?}", a, b);
        }
    }
}

/// New buffers grow geometrically within one Recording, never exceed the
/// block limit for small requests, and start small again after a snap.
#[test]
fn test_buffer_growth_is_bounded_and_resets() {
    let (_backend, mut context) = create_context(caps(true));
    let mut recorder = context.make_recorder(RecorderOptions::default());
    let kind = DrawBufferKind::Index;

    let mut sizes: Vec<u32> = Vec::new();
    for _ in 0..64 {
        let writer = recorder.draw_buffers().get_index_writer(375, 4).unwrap();
        let size = writer.binding().buffer.size();
        if sizes.last() != Some(&size) {
            sizes.push(size);
        }
    }
    assert_eq!(sizes[0], kind.min_block_size());
    assert!(sizes.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(sizes.iter().all(|&size| size <= kind.max_block_size()));

    let huge = kind.max_block_size() / 4 + 1;
    let writer = recorder.draw_buffers().get_index_writer(huge, 4).unwrap();
    assert!(writer.binding().buffer.size() >= huge * 4);
    drop(writer);

    assert!(recorder.snap().is_some());
    let writer = recorder.draw_buffers().get_index_writer(375, 4).unwrap();
    assert_eq!(writer.binding().buffer.size(), kind.min_block_size());
}

/// GPU-only storage asked to be cleared gets a clear task ahead of the
/// Recording's own tasks.
#[test]
fn test_cleared_storage_adds_clear_task() {
    let (_backend, mut context) = create_context(caps(true));
    let mut recorder = context.make_recorder(RecorderOptions::default());
    recorder
        .draw_buffers()
        .get_storage(256, ClearBuffer::Yes)
        .unwrap();
    recorder
        .draw_buffers()
        .get_indirect_storage(64, ClearBuffer::No)
        .unwrap();

    let recording = recorder.snap().unwrap();
    let clears: Vec<_> = recording
        .tasks()
        .filter_map(|task| match task {
            Task::ClearBuffers(clear) => Some(clear.ranges().len()),
            _ => None,
        })
        .collect();
    assert_eq!(clears, vec![1]);
}

// ============================================================================
// Failure Handling
// ============================================================================

/// A failed map poisons the Recorder's draw buffers until the next snap,
/// which then reports failure. The snap after that works again.
#[test]
fn test_mapping_failure_drops_recording() {
    let (backend, mut context) =
        create_context_with(DummyConfig::new().with_fail_map_after(0), caps(true));
    let mut recorder = context.make_recorder(RecorderOptions::default());
    let log = callback_log();
    recorder.add_finish_callback(logging_callback(&log, 0));

    assert!(recorder.draw_buffers().get_vertex_writer(10, 12).is_none());
    assert!(recorder.draw_buffers().has_mapping_failed());
    assert_eq!(recorder.draw_buffers().pooled_buffer_count(), 0);
    assert!(recorder.draw_buffers().get_uniform_writer(1, 64).is_none());

    assert!(recorder.snap().is_none());
    assert_eq!(*log.lock(), vec![(0, CallbackResult::Failed)]);
    assert!(!recorder.draw_buffers().has_mapping_failed());

    backend.set_fail_map_after(None);
    assert!(recorder.draw_buffers().get_vertex_writer(10, 12).is_some());
    let recording = recorder.snap().unwrap();
    assert_eq!(recording.unique_id(), 0);
}

/// Failing buffer creation behaves like a failed map when staging is used.
#[test]
fn test_staging_failure_drops_recording() {
    let (backend, mut context) = create_context(caps(false));
    let mut recorder = context.make_recorder(RecorderOptions::default());

    backend.set_fail_buffer_creation(true);
    assert!(recorder.draw_buffers().get_vertex_writer(4, 16).is_none());
    assert!(recorder.snap().is_none());

    backend.set_fail_buffer_creation(false);
    assert!(recorder.draw_buffers().get_vertex_writer(4, 16).is_some());
    assert!(recorder.snap().is_some());
}

/// A task that cannot prepare fails the whole snap, while tasks with nothing
/// to do are dropped from the Recording.
#[test]
fn test_task_preparation_outcomes() {
    let (_backend, mut context) = create_context(caps(true));
    let mut recorder = context.make_recorder(RecorderOptions::default());

    recorder.add_task(Task::Compute(ComputeTask::new([0, 1, 1])));
    let recording = recorder.snap().unwrap();
    assert!(recording.is_empty());

    let effect = RuntimeEffectId(1);
    recorder.runtime_effects().register(effect, "blur");
    let target = recorder.make_texture_proxy(target_descriptor(4, 4), ProxyKind::Exact);
    recorder.add_task(Task::Compute(ComputeTask::new([8, 8, 1])));
    recorder.add_task(Task::DrawPass(
        DrawPassTask::new(target, LoadOp::Clear([0.0; 4]))
            .require_effect(effect)
            .draw(3, 1),
    ));
    assert_eq!(recorder.snap().unwrap().task_count(), 2);

    let target = recorder.make_texture_proxy(target_descriptor(4, 4), ProxyKind::Exact);
    recorder.add_task(Task::DrawPass(
        DrawPassTask::new(target, LoadOp::Clear([0.0; 4]))
            .require_effect(RuntimeEffectId(effect.0 + 100))
            .draw(3, 1),
    ));
    assert!(recorder.snap().is_none());
}

// ============================================================================
// Scratch Resources
// ============================================================================

/// A scratch buffer is exclusive while checked out and reused by a later
/// request of equal or smaller size once released.
#[test]
fn test_scratch_buffer_reuse() {
    let (_backend, mut context) = create_context(caps(true));
    let recorder = context.make_recorder(RecorderOptions::default());
    let buffers = recorder.draw_buffers();

    let first = buffers.get_scratch_storage(1000);
    let held = buffers.get_scratch_storage(1000);
    let first_buffer = Arc::clone(first.buffer().unwrap());
    assert!(!Arc::ptr_eq(&first_buffer, held.buffer().unwrap()));

    drop(first);
    let reused = buffers.get_scratch_storage(800);
    assert!(Arc::ptr_eq(&first_buffer, reused.buffer().unwrap()));
}

/// A scratch render target becomes available again after its last reader
/// has been prepared, and never while it is still going to be read.
#[test]
fn test_scratch_texture_reuse_across_passes() {
    let (_backend, mut context) = create_context(caps(true));
    let mut recorder = context.make_recorder(RecorderOptions::default());
    let a = recorder.make_texture_proxy(target_descriptor(16, 16), ProxyKind::Scratch);
    let b = recorder.make_texture_proxy(target_descriptor(16, 16), ProxyKind::Scratch);
    let c = recorder.make_texture_proxy(target_descriptor(16, 16), ProxyKind::Scratch);

    recorder.add_task(Task::DrawPass(
        DrawPassTask::new(Arc::clone(&a), LoadOp::Clear([1.0; 4])).draw(3, 1),
    ));
    recorder.add_task(Task::DrawPass(
        DrawPassTask::new(Arc::clone(&b), LoadOp::Clear([0.0; 4]))
            .sample(Arc::clone(&a))
            .draw(3, 1),
    ));
    recorder.add_task(Task::DrawPass(
        DrawPassTask::new(Arc::clone(&c), LoadOp::Clear([0.0; 4])).draw(3, 1),
    ));

    let mut recording = recorder.snap().unwrap();
    let (a, b, c) = (a.texture().unwrap(), b.texture().unwrap(), c.texture().unwrap());
    assert!(!Arc::ptr_eq(&a, &b));
    assert!(Arc::ptr_eq(&c, &a) || Arc::ptr_eq(&c, &b));

    context
        .insert_recording(InsertRecordingInfo::new(&mut recording))
        .unwrap();
    assert!(context.submit(SyncToCpu::Yes));
}

// ============================================================================
// Submission
// ============================================================================

/// Finish callbacks fire in submission order, each once, as the GPU retires
/// the work.
#[test]
fn test_callbacks_fire_in_submission_order() {
    let (backend, mut context) = create_manual_context(caps(true));
    let mut recorder = context.make_recorder(RecorderOptions::default());
    let log = callback_log();

    for tag in 0..3 {
        recorder.add_finish_callback(logging_callback(&log, tag));
        let mut recording = recorder.snap().unwrap();
        context
            .insert_recording(InsertRecordingInfo::new(&mut recording))
            .unwrap();
        assert!(context.submit(SyncToCpu::No));
    }
    assert!(log.lock().is_empty());
    assert_eq!(backend.pending_submissions(), 3);

    backend.complete_oldest();
    context.check_async_work_completion();
    assert_eq!(*log.lock(), vec![(0, CallbackResult::Success)]);
    assert!(context.has_unfinished_gpu_work());

    context.submit(SyncToCpu::Yes);
    assert_eq!(
        *log.lock(),
        vec![
            (0, CallbackResult::Success),
            (1, CallbackResult::Success),
            (2, CallbackResult::Success),
        ]
    );
    assert!(!context.has_unfinished_gpu_work());
}

/// The per-insert callback fires along with the Recording's own.
#[test]
fn test_insert_callback_fires_with_recording() {
    let (_backend, mut context) = create_context(caps(true));
    let mut recorder = context.make_recorder(RecorderOptions::default());
    let log = callback_log();

    recorder.add_finish_callback(logging_callback(&log, 0));
    let mut recording = recorder.snap().unwrap();
    context
        .insert_recording(
            InsertRecordingInfo::new(&mut recording)
                .with_finished_callback(logging_callback(&log, 1)),
        )
        .unwrap();
    context.submit(SyncToCpu::Yes);

    assert_eq!(
        *log.lock(),
        vec![(0, CallbackResult::Success), (1, CallbackResult::Success)]
    );
}

/// A failed submission fails the callbacks of everything it carried.
#[test]
fn test_failed_submission_fails_callbacks() {
    let (backend, mut context) = create_context(caps(true));
    let mut recorder = context.make_recorder(RecorderOptions::default());
    let log = callback_log();

    recorder.add_finish_callback(logging_callback(&log, 0));
    let mut recording = recorder.snap().unwrap();
    context
        .insert_recording(InsertRecordingInfo::new(&mut recording))
        .unwrap();
    backend.set_fail_submission(true);

    assert!(!context.submit(SyncToCpu::Yes));
    assert_eq!(*log.lock(), vec![(0, CallbackResult::Failed)]);
}

/// Recordings from one Recorder must be inserted in the order they were
/// snapped, and at most once. Rejected Recordings fail their callbacks.
#[test]
fn test_out_of_order_insertion_is_rejected() {
    let (_backend, mut context) = create_context(caps(true));
    let mut recorder = context.make_recorder(RecorderOptions::default());
    let log = callback_log();

    recorder.add_finish_callback(logging_callback(&log, 0));
    let mut first = recorder.snap().unwrap();
    recorder.add_finish_callback(logging_callback(&log, 1));
    let mut second = recorder.snap().unwrap();

    context
        .insert_recording(InsertRecordingInfo::new(&mut second))
        .unwrap();
    assert!(
        context
            .insert_recording(
                InsertRecordingInfo::new(&mut first)
                    .with_finished_callback(logging_callback(&log, 2)),
            )
            .is_err()
    );
    assert_eq!(
        *log.lock(),
        vec![(0, CallbackResult::Failed), (2, CallbackResult::Failed)]
    );

    assert!(
        context
            .insert_recording(InsertRecordingInfo::new(&mut second))
            .is_err()
    );

    context.submit(SyncToCpu::Yes);
    assert!(log.lock().contains(&(1, CallbackResult::Success)));
}

/// Recordings from different Recorders are ordered independently.
#[test]
fn test_recorders_are_ordered_independently() {
    let (_backend, mut context) = create_context(caps(true));
    let mut a = context.make_recorder(RecorderOptions::default());
    let mut b = context.make_recorder(RecorderOptions::default());

    let mut a0 = a.snap().unwrap();
    let mut a1 = a.snap().unwrap();
    let mut b0 = b.snap().unwrap();

    context.insert_recording(InsertRecordingInfo::new(&mut a1)).unwrap();
    context.insert_recording(InsertRecordingInfo::new(&mut b0)).unwrap();
    assert!(context.insert_recording(InsertRecordingInfo::new(&mut a0)).is_err());
}

/// A Recording dropped without being inserted reports failure.
#[test]
fn test_dropped_recording_fails_callbacks() {
    let (_backend, mut context) = create_context(caps(true));
    let mut recorder = context.make_recorder(RecorderOptions::default());
    let log = callback_log();

    recorder.add_finish_callback(logging_callback(&log, 7));
    drop(recorder.snap().unwrap());
    assert_eq!(*log.lock(), vec![(7, CallbackResult::Failed)]);
}

/// A Recording drawn into a deferred target can be replayed onto different
/// textures at different offsets.
#[test]
fn test_replay_into_deferred_target() {
    let (backend, mut context) = create_context(caps(true));
    let mut recorder = context.make_recorder(RecorderOptions::default());
    let target = recorder.make_deferred_target(target_descriptor(4, 4));
    recorder.add_task(Task::DrawPass(
        DrawPassTask::new(target, LoadOp::Clear([1.0, 0.0, 0.0, 1.0])).draw(6, 1),
    ));
    let mut recording = recorder.snap().unwrap();
    assert!(recording.is_replayable());

    let first = context.create_texture(&target_descriptor(4, 4)).unwrap();
    let second = context.create_texture(&target_descriptor(8, 8)).unwrap();

    context
        .insert_recording(InsertRecordingInfo::new(&mut recording).with_target(first.clone(), [5, 7]))
        .unwrap();
    context.submit(SyncToCpu::Yes);
    assert_eq!(backend.last_translation(), [5, 7]);

    context
        .insert_recording(InsertRecordingInfo::new(&mut recording).with_target(second, [1, 2]))
        .unwrap();
    context.submit(SyncToCpu::Yes);
    assert_eq!(backend.last_translation(), [1, 2]);
    assert_eq!(backend.draw_count(), 2);

    let texels = backend.read_texture(&first.native().unwrap());
    assert!(texels.chunks_exact(4).all(|texel| texel == [255, 0, 0, 255]));
}

/// Replaying needs a target that can hold what was recorded.
#[test]
fn test_replay_rejects_mismatched_target() {
    let (_backend, mut context) = create_context(caps(true));
    let mut recorder = context.make_recorder(RecorderOptions::default());
    let target = recorder.make_deferred_target(target_descriptor(16, 16));
    recorder.add_task(Task::DrawPass(
        DrawPassTask::new(target, LoadOp::Clear([0.0; 4])).draw(3, 1),
    ));
    let mut recording = recorder.snap().unwrap();

    assert!(
        context
            .insert_recording(InsertRecordingInfo::new(&mut recording))
            .is_err()
    );
    let small = context.create_texture(&target_descriptor(8, 8)).unwrap();
    assert!(
        context
            .insert_recording(InsertRecordingInfo::new(&mut recording).with_target(small, [0, 0]))
            .is_err()
    );
}

/// Texel data staged by the Recorder is copied into the texture on submit.
#[rstest]
#[case::small(4)]
#[case::large(64)]
fn test_texture_upload(#[case] size: u32) {
    let (backend, mut context) = create_context(caps(true));
    let mut recorder = context.make_recorder(RecorderOptions::default());
    let proxy = recorder.make_texture_proxy(target_descriptor(size, size), ProxyKind::Exact);

    let data: Vec<u8> = (0..size * size * 4).map(|i| (i % 251) as u8).collect();
    assert!(recorder.upload_texture(&proxy, &data, TextureRegion::new(0, 0, size, size)));
    let mut recording = recorder.snap().unwrap();
    context
        .insert_recording(InsertRecordingInfo::new(&mut recording))
        .unwrap();
    context.submit(SyncToCpu::Yes);

    let texture = proxy.texture().unwrap();
    assert_eq!(backend.read_texture(&texture.native().unwrap()), data);
}

// ============================================================================
// Static Data
// ============================================================================

/// Static vertex and index data is packed into GPU-private buffers when the
/// context finishes initializing, and bindings resolve then.
#[test]
fn test_static_data_is_packed_at_initialization() {
    let (_backend, mut context) = create_context(caps(false));

    let quad: [[f32; 2]; 3] = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]];
    let indices: [u16; 6] = [0, 1, 2, 2, 1, 0];

    let (mut writer, vertex_binding) = context
        .static_buffers_mut()
        .get_vertex_writer(3, 8)
        .unwrap();
    writer.write_slice(&quad);
    let (mut writer, index_binding) = context
        .static_buffers_mut()
        .get_index_writer(6, 2)
        .unwrap();
    writer.write_slice(&indices);
    assert!(!vertex_binding.is_resolved());

    context.finish_initialization().unwrap();
    context.submit(SyncToCpu::Yes);

    let vertex = vertex_binding.get().unwrap();
    let index = index_binding.get().unwrap();
    assert_eq!(&vertex.read()[..24], bytemuck::cast_slice::<_, u8>(&quad));
    assert_eq!(&index.read()[..12], bytemuck::cast_slice::<_, u8>(&indices));
    assert!(context.static_buffers().is_finalized());
}
