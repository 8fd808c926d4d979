use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use rhi::command::{CopyBuffer, Draw};
use rhi::{
    BarrierBatch, Buffer, BufferDesc, ColorAttachment, CommandBuffer, CommandEncoder,
    CommandRecorder, Format, LogSink, NativeHandle, RecordingContext, RenderPassDesc,
    RenderPipeline, RenderState, ResourceState, RhiResult, Texture, TextureDesc,
};

/// Counts native calls and nothing else.
#[derive(Default)]
struct CountingContext {
    calls: usize,
}

impl RecordingContext for CountingContext {
    type Output = usize;

    fn backend(&self) -> &'static str {
        "counting"
    }

    fn emit_barriers(&mut self, batch: &BarrierBatch<'_>) -> RhiResult<()> {
        self.calls += batch.len();
        Ok(())
    }

    fn copy_buffer(&mut self, _cmd: &CopyBuffer) -> RhiResult<()> {
        self.calls += 1;
        Ok(())
    }

    fn begin_render_pass(&mut self, _desc: &RenderPassDesc) -> RhiResult<()> {
        Ok(())
    }

    fn end_render_pass(&mut self) -> RhiResult<()> {
        Ok(())
    }

    fn bind_render_pipeline(&mut self, _pipeline: &RenderPipeline) -> RhiResult<()> {
        Ok(())
    }

    fn set_vertex_buffers(&mut self, _buffers: &[rhi::BufferOffsetPair]) -> RhiResult<()> {
        Ok(())
    }

    fn draw(&mut self, _cmd: &Draw) -> RhiResult<()> {
        self.calls += 1;
        Ok(())
    }

    fn finish(self) -> RhiResult<usize> {
        Ok(self.calls)
    }
}

fn build_frame(draws: usize) -> CommandBuffer {
    let pipeline = RenderPipeline::new(NativeHandle(1), Some("bench"));
    let target = Texture::new(
        TextureDesc::new_2d(Format::Bgra8Unorm, 1280, 720).with_default_state(ResourceState::Present),
        NativeHandle(2),
    );
    let meshes: Vec<Buffer> = (0..64)
        .map(|index| {
            Buffer::new(
                BufferDesc::new(64 * 1024).with_default_state(ResourceState::CopyDestination),
                NativeHandle(100 + index),
            )
        })
        .collect();
    let staging = Buffer::new(
        BufferDesc::new(64 * 1024).with_default_state(ResourceState::CopySource),
        NativeHandle(3),
    );

    let mut encoder = CommandEncoder::new();
    for mesh in &meshes {
        encoder.copy_buffer(mesh, 0, &staging, 0, 64 * 1024);
    }
    let mut pass = encoder.begin_render_pass(
        RenderPassDesc::default().with_color(ColorAttachment::new(target.full_view()).cleared([0.0; 4])),
    );
    for draw in 0..draws {
        let mesh = &meshes[draw % meshes.len()];
        pass.set_render_state(RenderState::new(&pipeline).with_vertex_buffer(mesh, 0));
        pass.draw(36, 1, 0, 0);
    }
    pass.end();
    encoder.finish().unwrap_or_default()
}

fn bench_record(c: &mut Criterion) {
    let frame = build_frame(2_000);
    c.bench_function("record_2000_draws", |b| {
        b.iter(|| {
            let recorded = CommandRecorder::new(CountingContext::default(), &LogSink)
                .record(black_box(&frame))
                .ok();
            black_box(recorded.map(|recorded| recorded.output));
        });
    });
    c.bench_function("encode_2000_draws", |b| {
        b.iter(|| black_box(build_frame(2_000).len()));
    });
}

criterion_group!(record_benches, bench_record);
criterion_main!(record_benches);
