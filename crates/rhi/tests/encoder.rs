mod common;

use std::sync::Arc;

use common::{CollectingSink, Event, MockContext, MockDevice};
use rhi::{
    Buffer, BufferDesc, CommandEncoder, CommandQueue, CommandRecorder, Extent3d, Format,
    NativeHandle, Offset3d, ResourceState, RhiConfig, RhiError, SubmitDesc, SubresourceRange,
    Texture, TextureDesc,
};

#[test]
fn exceeding_the_arena_budget_fails_finish() {
    let config = RhiConfig {
        arena_limit_bytes: Some(4096),
        ..RhiConfig::new()
    };
    let buffer = Buffer::new(BufferDesc::new(1 << 20), NativeHandle(1));
    let mut encoder = CommandEncoder::with_config(&config);
    for _ in 0..16 {
        encoder.upload_buffer_data(&buffer, 0, &[0xAB; 512]);
    }
    assert!(matches!(encoder.finish(), Err(RhiError::OutOfMemory(_))));

    encoder.upload_buffer_data(&buffer, 0, &[0xCD; 512]);
    let reused = encoder.finish().unwrap();
    assert_eq!(reused.len(), 1);
}

#[test]
fn texture_uploads_reserve_scratch_memory() {
    let texture = Texture::new(
        TextureDesc::new_2d(Format::Rgba8Unorm, 4, 4).with_default_state(ResourceState::ShaderResource),
        NativeHandle(2),
    );
    let texels = vec![0x7F; 4 * 4 * 4];
    let mut encoder = CommandEncoder::new();
    encoder.upload_texture_data(
        &texture,
        SubresourceRange::ENTIRE,
        Offset3d::default(),
        Extent3d::new(4, 4, 1),
        16,
        &texels,
    );
    let buffer = encoder.finish().unwrap();
    assert_eq!(buffer.scratch().allocated(), texels.len());
    assert!(buffer.list().bytes_used() >= texels.len());

    // The mock has no texture upload path: one warning, no dangling state.
    let sink = CollectingSink::default();
    let recorded = CommandRecorder::new(MockContext::new(), &sink).record(&buffer).unwrap();
    assert_eq!(recorded.stats.unsupported, 1);
    assert_eq!(
        Event::transitions_of(&recorded.output, texture.id()),
        [
            (ResourceState::ShaderResource, ResourceState::CopyDestination),
            (ResourceState::CopyDestination, ResourceState::ShaderResource),
        ]
    );
}

#[test]
fn finished_buffers_can_be_reset_and_resubmitted() {
    let device = Arc::new(MockDevice::default());
    let queue = CommandQueue::new(Arc::clone(&device), RhiConfig::new());
    let mut encoder = CommandEncoder::new();
    encoder.push_debug_group("frame", [0.2, 0.4, 0.8]);
    encoder.global_barrier();
    encoder.pop_debug_group();
    let mut buffer = encoder.finish().unwrap();

    queue.submit(&SubmitDesc::new(core::slice::from_ref(&buffer))).unwrap();
    buffer.reset();
    assert!(buffer.is_empty());
    queue.submit(&SubmitDesc::new(core::slice::from_ref(&buffer))).unwrap();

    let submitted = device.submitted();
    assert_eq!(submitted[0], [Event::Call("global_barrier")]);
    assert!(submitted[1].is_empty());
}
