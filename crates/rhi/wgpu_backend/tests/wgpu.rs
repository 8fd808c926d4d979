//! These tests need an adapter and return early on machines without one.

use std::sync::{Arc, Mutex};

use rhi::command::CopyTextureToBuffer;
use rhi::{
    BufferDesc, BufferRange, ColorAttachment, CommandEncoder, CommandQueue, DebugSink, Device,
    Extent3d, Format, MemoryType, Offset3d, RenderPassDesc, RhiConfig, Severity, SubmitDesc,
    SubresourceRange, TextureDesc,
};
use wgpu_backend::WgpuDevice;

#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Vec<String>>>);

impl SharedSink {
    fn warnings(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl DebugSink for SharedSink {
    fn message(&self, severity: Severity, text: &str) {
        if severity == Severity::Warning {
            self.0.lock().unwrap().push(text.to_owned());
        }
    }
}

fn queue_with_sink() -> Option<(CommandQueue<WgpuDevice>, SharedSink)> {
    let _ = env_logger::builder().is_test(true).try_init();
    let opened = WgpuDevice::request().ok()?;
    let sink = SharedSink::default();
    let device = WgpuDevice::with_sink(
        opened.device().clone(),
        opened.queue().clone(),
        "test",
        sink.clone(),
    );
    Some((CommandQueue::new(Arc::new(device), RhiConfig::new()), sink))
}

fn readback(size: u64) -> BufferDesc {
    BufferDesc {
        memory_type: MemoryType::ReadBack,
        ..BufferDesc::new(size)
    }
}

#[test]
fn device_leaves_barriers_to_wgpu() {
    let Some((queue, _sink)) = queue_with_sink() else {
        return;
    };
    let info = queue.device().info();
    assert_eq!(info.backend, "wgpu");
    assert!(!info.explicit_barriers);
}

#[test]
fn uploaded_buffers_copy_back_through_readback() {
    let Some((queue, sink)) = queue_with_sink() else {
        return;
    };
    let device = queue.device();
    let storage = device.create_buffer(BufferDesc::new(16)).unwrap();
    let target = device.create_buffer(readback(16)).unwrap();

    let mut encoder = CommandEncoder::new();
    encoder.upload_buffer_data(&storage, 0, bytemuck::cast_slice(&[7_u32, 8, 9, 10]));
    encoder.copy_buffer(&target, 0, &storage, 0, 16);
    let buffers = [encoder.finish().unwrap()];

    let stats = queue.submit(&SubmitDesc::new(&buffers)).unwrap();
    assert_eq!(stats[0].barrier_batches, 0);
    assert!(stats[0].buffer_barriers > 0);
    let bytes = device.read_buffer(&target, 0, 16).unwrap();
    assert_eq!(bytemuck::cast_slice::<u8, u32>(&bytes), [7, 8, 9, 10]);
    assert!(sink.warnings().is_empty());
}

#[test]
fn clears_cover_only_their_range() {
    let Some((queue, _sink)) = queue_with_sink() else {
        return;
    };
    let device = queue.device();
    let storage = device.create_buffer(BufferDesc::new(16)).unwrap();
    let target = device.create_buffer(readback(16)).unwrap();
    device
        .write_buffer(&storage, 0, bytemuck::cast_slice(&[1_u32, 2, 3, 4]))
        .unwrap();

    let mut encoder = CommandEncoder::new();
    encoder.clear_buffer(&storage, Some(BufferRange { offset: 4, size: 8 }));
    encoder.copy_buffer(&target, 0, &storage, 0, 16);
    let buffers = [encoder.finish().unwrap()];
    queue.submit(&SubmitDesc::new(&buffers)).unwrap();

    let bytes = device.read_buffer(&target, 0, 16).unwrap();
    assert_eq!(bytemuck::cast_slice::<u8, u32>(&bytes), [1, 0, 0, 4]);
}

#[test]
fn texture_uploads_repack_rows() {
    let Some((queue, _sink)) = queue_with_sink() else {
        return;
    };
    let device = queue.device();
    let texture = device
        .create_texture(TextureDesc::new_2d(Format::R32Uint, 2, 2))
        .unwrap();
    let target = device.create_buffer(readback(512)).unwrap();

    let mut encoder = CommandEncoder::new();
    encoder.upload_texture_data(
        &texture,
        SubresourceRange::mip(0, 0),
        Offset3d::default(),
        Extent3d::new(2, 2, 1),
        0,
        bytemuck::cast_slice(&[1_u32, 2, 3, 4]),
    );
    encoder.copy_texture_to_buffer(CopyTextureToBuffer {
        dst: target.clone(),
        dst_offset: 0,
        dst_size: 512,
        dst_row_pitch: 256,
        src: texture.clone(),
        src_subresource: SubresourceRange::mip(0, 0),
        src_offset: Offset3d::default(),
        extent: Extent3d::new(2, 2, 1),
    });
    let buffers = [encoder.finish().unwrap()];
    queue.submit(&SubmitDesc::new(&buffers)).unwrap();

    let bytes = device.read_buffer(&target, 0, 512).unwrap();
    assert_eq!(bytemuck::cast_slice::<u8, u32>(&bytes[..8]), [1, 2]);
    assert_eq!(bytemuck::cast_slice::<u8, u32>(&bytes[256..264]), [3, 4]);
}

#[test]
fn mesh_tasks_are_reported_and_skipped() {
    let Some((queue, sink)) = queue_with_sink() else {
        return;
    };
    let device = queue.device();
    let target = device
        .create_texture(TextureDesc::new_2d(Format::Rgba8Unorm, 4, 4))
        .unwrap();

    let mut encoder = CommandEncoder::new();
    let mut pass = encoder
        .begin_render_pass(RenderPassDesc::default().with_color(ColorAttachment::new(target.full_view())));
    pass.draw_mesh_tasks(1, 1, 1);
    pass.end();
    let buffers = [encoder.finish().unwrap()];

    let stats = queue.submit(&SubmitDesc::new(&buffers)).unwrap();
    assert_eq!(stats[0].unsupported, 1);
    assert_eq!(
        sink.warnings(),
        ["DrawMeshTasks command is not supported by the wgpu backend"]
    );
}

#[test]
fn property_query_pools_are_rejected() {
    let Some((queue, _sink)) = queue_with_sink() else {
        return;
    };
    assert!(
        queue
            .device()
            .create_query_pool(rhi::QueryKind::AccelerationStructureCompactedSize, 4)
            .is_err()
    );
}
