use std::ffi::CStr;
use std::sync::{Arc, Mutex};

use ash::vk;
use ash::vk::Handle as _;
use rhi::command::CopyTextureToBuffer;
use rhi::{
    Buffer, BufferDesc, ColorAttachment, CommandEncoder, CommandQueue, DebugSink, Device, Extent3d,
    Format, NativeHandle, Offset3d, RayTracingPipeline, RayTracingState, RenderPassDesc,
    RenderPipeline, RenderState, ResourceState, RhiConfig, RhiError, RhiResult, Severity,
    ShaderTable, SubmitDesc, SubresourceRange, Texture, TextureDesc,
};
use vulkan_backend::{DeviceExtensions, NativeQueue, TraceRegions, VulkanCommands, VulkanDevice};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Barrier {
        src: vk::PipelineStageFlags,
        dst: vk::PipelineStageFlags,
        buffers: Vec<u64>,
        images: Vec<(u64, vk::ImageLayout, vk::ImageLayout)>,
    },
    GlobalBarrier,
    CopyBuffer,
    CopyImageToBuffer,
    FillBuffer(u64),
    UpdateBuffer(u64, usize),
    BeginRendering(usize),
    EndRendering,
    BindPipeline(vk::PipelineBindPoint),
    VertexBuffers(usize),
    Draw(u32),
    BeginLabel(String),
    EndLabel,
    TraceRays { raygen: u64, size: u64 },
    End,
    Other,
}

#[derive(Debug, Default)]
struct MockCommands {
    extensions: DeviceExtensions,
    calls: Vec<Call>,
}

impl MockCommands {
    fn barriers(&self) -> Vec<&Call> {
        self.calls
            .iter()
            .filter(|call| matches!(call, Call::Barrier { .. }))
            .collect()
    }

    fn position(&self, wanted: &Call) -> usize {
        self.calls.iter().position(|call| call == wanted).unwrap()
    }
}

impl VulkanCommands for MockCommands {
    fn extensions(&self) -> DeviceExtensions {
        self.extensions
    }

    fn pipeline_barrier(
        &mut self,
        src_stages: vk::PipelineStageFlags,
        dst_stages: vk::PipelineStageFlags,
        memory: &[vk::MemoryBarrier<'_>],
        buffers: &[vk::BufferMemoryBarrier<'_>],
        images: &[vk::ImageMemoryBarrier<'_>],
    ) {
        if !memory.is_empty() {
            self.calls.push(Call::GlobalBarrier);
            return;
        }
        self.calls.push(Call::Barrier {
            src: src_stages,
            dst: dst_stages,
            buffers: buffers.iter().map(|barrier| barrier.buffer.as_raw()).collect(),
            images: images
                .iter()
                .map(|barrier| (barrier.image.as_raw(), barrier.old_layout, barrier.new_layout))
                .collect(),
        });
    }

    fn copy_buffer(&mut self, _: vk::Buffer, _: vk::Buffer, _: &[vk::BufferCopy]) {
        self.calls.push(Call::CopyBuffer);
    }

    fn copy_image(
        &mut self,
        _: vk::Image,
        _: vk::ImageLayout,
        _: vk::Image,
        _: vk::ImageLayout,
        _: &[vk::ImageCopy],
    ) {
        self.calls.push(Call::Other);
    }

    fn copy_image_to_buffer(
        &mut self,
        _: vk::Image,
        _: vk::ImageLayout,
        _: vk::Buffer,
        _: &[vk::BufferImageCopy],
    ) {
        self.calls.push(Call::CopyImageToBuffer);
    }

    fn fill_buffer(&mut self, _: vk::Buffer, _: vk::DeviceSize, size: vk::DeviceSize, _: u32) {
        self.calls.push(Call::FillBuffer(size));
    }

    fn update_buffer(&mut self, _: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) {
        self.calls.push(Call::UpdateBuffer(offset, data.len()));
    }

    fn clear_color_image(
        &mut self,
        _: vk::Image,
        _: vk::ImageLayout,
        _: &vk::ClearColorValue,
        _: &[vk::ImageSubresourceRange],
    ) {
        self.calls.push(Call::Other);
    }

    fn clear_depth_stencil_image(
        &mut self,
        _: vk::Image,
        _: vk::ImageLayout,
        _: &vk::ClearDepthStencilValue,
        _: &[vk::ImageSubresourceRange],
    ) {
        self.calls.push(Call::Other);
    }

    fn begin_rendering(&mut self, info: &vk::RenderingInfo<'_>) {
        self.calls
            .push(Call::BeginRendering(info.color_attachment_count as usize));
    }

    fn end_rendering(&mut self) {
        self.calls.push(Call::EndRendering);
    }

    fn resolve_image(
        &mut self,
        _: vk::Image,
        _: vk::ImageLayout,
        _: vk::Image,
        _: vk::ImageLayout,
        _: &[vk::ImageResolve],
    ) {
        self.calls.push(Call::Other);
    }

    fn bind_pipeline(&mut self, point: vk::PipelineBindPoint, _: vk::Pipeline) {
        self.calls.push(Call::BindPipeline(point));
    }

    fn bind_descriptor_sets(&mut self, _: vk::PipelineBindPoint, _: vk::PipelineLayout, _: &[vk::DescriptorSet]) {
        self.calls.push(Call::Other);
    }

    fn push_constants(&mut self, _: vk::PipelineLayout, _: vk::ShaderStageFlags, _: &[u8]) {
        self.calls.push(Call::Other);
    }

    fn set_stencil_reference(&mut self, _: vk::StencilFaceFlags, _: u32) {
        self.calls.push(Call::Other);
    }

    fn bind_vertex_buffers(&mut self, buffers: &[vk::Buffer], _: &[vk::DeviceSize]) {
        self.calls.push(Call::VertexBuffers(buffers.len()));
    }

    fn bind_index_buffer(&mut self, _: vk::Buffer, _: vk::DeviceSize, _: vk::IndexType) {
        self.calls.push(Call::Other);
    }

    fn set_viewport(&mut self, _: &[vk::Viewport]) {
        self.calls.push(Call::Other);
    }

    fn set_scissor(&mut self, _: &[vk::Rect2D]) {
        self.calls.push(Call::Other);
    }

    fn draw(&mut self, vertex_count: u32, _: u32, _: u32, _: u32) {
        self.calls.push(Call::Draw(vertex_count));
    }

    fn draw_indexed(&mut self, _: u32, _: u32, _: u32, _: i32, _: u32) {
        self.calls.push(Call::Other);
    }

    fn draw_indirect(
        &mut self,
        _: bool,
        _: vk::Buffer,
        _: vk::DeviceSize,
        _: Option<(vk::Buffer, vk::DeviceSize)>,
        _: u32,
        _: u32,
    ) {
        self.calls.push(Call::Other);
    }

    fn dispatch(&mut self, _: u32, _: u32, _: u32) {
        self.calls.push(Call::Other);
    }

    fn dispatch_indirect(&mut self, _: vk::Buffer, _: vk::DeviceSize) {
        self.calls.push(Call::Other);
    }

    fn write_timestamp(&mut self, _: vk::PipelineStageFlags, _: vk::QueryPool, _: u32) {
        self.calls.push(Call::Other);
    }

    fn copy_query_pool_results(
        &mut self,
        _: vk::QueryPool,
        _: u32,
        _: u32,
        _: vk::Buffer,
        _: vk::DeviceSize,
        _: vk::DeviceSize,
        _: vk::QueryResultFlags,
    ) {
        self.calls.push(Call::Other);
    }

    fn begin_debug_label(&mut self, label: &vk::DebugUtilsLabelEXT<'_>) {
        // SAFETY: the recording keeps the label's name alive for the duration of the call.
        let name = unsafe { CStr::from_ptr(label.p_label_name) };
        self.calls
            .push(Call::BeginLabel(name.to_string_lossy().into_owned()));
    }

    fn end_debug_label(&mut self) {
        self.calls.push(Call::EndLabel);
    }

    fn insert_debug_label(&mut self, _: &vk::DebugUtilsLabelEXT<'_>) {
        self.calls.push(Call::Other);
    }

    fn draw_mesh_tasks(&mut self, _: u32, _: u32, _: u32) {
        self.calls.push(Call::Other);
    }

    fn trace_rays(&mut self, regions: &TraceRegions, _: u32, _: u32, _: u32) {
        self.calls.push(Call::TraceRays {
            raygen: regions.raygen.device_address,
            size: regions.raygen.size,
        });
    }

    fn copy_acceleration_structure(&mut self, _: &vk::CopyAccelerationStructureInfoKHR<'_>) {
        self.calls.push(Call::Other);
    }

    fn write_acceleration_structures_properties(
        &mut self,
        _: &[vk::AccelerationStructureKHR],
        _: vk::QueryType,
        _: vk::QueryPool,
        _: u32,
    ) {
        self.calls.push(Call::Other);
    }

    fn end(&mut self) -> RhiResult<()> {
        self.calls.push(Call::End);
        Ok(())
    }
}

#[derive(Default)]
struct MockQueue {
    extensions: DeviceExtensions,
    submitted: Mutex<Vec<MockCommands>>,
}

impl NativeQueue for MockQueue {
    type Commands = MockCommands;

    fn device_name(&self) -> String {
        "mock gpu".into()
    }

    fn begin_commands(&self) -> RhiResult<MockCommands> {
        Ok(MockCommands {
            extensions: self.extensions,
            calls: Vec::new(),
        })
    }

    fn submit(&self, commands: Vec<MockCommands>) -> RhiResult<()> {
        self.submitted.lock().unwrap().extend(commands);
        Ok(())
    }
}

#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Vec<String>>>);

impl DebugSink for SharedSink {
    fn message(&self, severity: Severity, text: &str) {
        if severity == Severity::Warning {
            self.0.lock().unwrap().push(text.to_owned());
        }
    }
}

struct Harness {
    device: Arc<VulkanDevice<MockQueue>>,
    queue: CommandQueue<VulkanDevice<MockQueue>>,
    sink: SharedSink,
}

impl Harness {
    fn new(extensions: DeviceExtensions) -> Self {
        init_logging();
        let sink = SharedSink::default();
        let native = MockQueue {
            extensions,
            ..MockQueue::default()
        };
        let device = Arc::new(VulkanDevice::with_sink(native, sink.clone()));
        let queue = CommandQueue::new(Arc::clone(&device), RhiConfig::new());
        Self { device, queue, sink }
    }

    fn submit(&self, encoder: &mut CommandEncoder) -> RhiResult<MockCommands> {
        let buffers = [encoder.finish().unwrap()];
        self.queue.submit(&SubmitDesc::new(&buffers))?;
        Ok(self.device.queue().submitted.lock().unwrap().pop().unwrap())
    }

    fn warnings(&self) -> Vec<String> {
        self.sink.0.lock().unwrap().clone()
    }
}

#[test]
fn one_pipeline_barrier_per_stage_signature() {
    let harness = Harness::new(DeviceExtensions::empty());
    let first_target = Texture::new(TextureDesc::new_2d(Format::Rgba8Unorm, 16, 16), NativeHandle(1));
    let second_target = Texture::new(TextureDesc::new_2d(Format::Rgba8Unorm, 16, 16), NativeHandle(2));
    let positions = Buffer::new(BufferDesc::new(256), NativeHandle(3));
    let normals = Buffer::new(BufferDesc::new(256), NativeHandle(4));
    let pipeline = RenderPipeline::new(NativeHandle(5), Some("gbuffer"));

    let mut encoder = CommandEncoder::new();
    let mut pass = encoder.begin_render_pass(
        RenderPassDesc::default()
            .with_color(ColorAttachment::new(first_target.full_view()))
            .with_color(ColorAttachment::new(second_target.full_view())),
    );
    pass.set_render_state(
        RenderState::new(&pipeline)
            .with_vertex_buffer(&positions, 0)
            .with_vertex_buffer(&normals, 0),
    );
    pass.draw(6, 1, 0, 0);
    pass.end();
    let commands = harness.submit(&mut encoder).unwrap();

    assert!(harness.warnings().is_empty());
    let begin = commands.position(&Call::BeginRendering(2));
    assert_eq!(
        commands.calls[..begin],
        [
            Call::Barrier {
                src: vk::PipelineStageFlags::TOP_OF_PIPE,
                dst: vk::PipelineStageFlags::VERTEX_INPUT,
                buffers: vec![3, 4],
                images: vec![],
            },
            Call::Barrier {
                src: vk::PipelineStageFlags::TOP_OF_PIPE,
                dst: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                buffers: vec![],
                images: vec![
                    (1, vk::ImageLayout::UNDEFINED, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
                    (2, vk::ImageLayout::UNDEFINED, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
                ],
            },
        ]
    );
    let end = commands.position(&Call::EndRendering);
    assert!(
        commands.calls[begin..end]
            .iter()
            .all(|call| !matches!(call, Call::Barrier { .. }))
    );
    assert!(commands.calls[begin..end].contains(&Call::VertexBuffers(2)));
    assert!(commands.calls[begin..end].contains(&Call::Draw(6)));
    assert_eq!(commands.calls.last(), Some(&Call::End));
}

#[test]
fn matching_signatures_share_a_batch_across_resource_kinds() {
    let harness = Harness::new(DeviceExtensions::empty());
    let swapchain = Texture::new(
        TextureDesc::new_2d(Format::Bgra8Unorm, 8, 8).with_default_state(ResourceState::Present),
        NativeHandle(10),
    );
    let readback = Buffer::new(BufferDesc::new(256), NativeHandle(11));

    let mut encoder = CommandEncoder::new();
    encoder.copy_texture_to_buffer(CopyTextureToBuffer {
        dst: readback.clone(),
        dst_offset: 0,
        dst_size: 256,
        dst_row_pitch: 32,
        src: swapchain.clone(),
        src_subresource: SubresourceRange::ENTIRE,
        src_offset: Offset3d::default(),
        extent: Extent3d::new(8, 8, 1),
    });
    let commands = harness.submit(&mut encoder).unwrap();

    let barriers = commands.barriers();
    assert_eq!(barriers.len(), 3);
    assert_eq!(
        *barriers[1],
        Call::Barrier {
            src: vk::PipelineStageFlags::ALL_GRAPHICS | vk::PipelineStageFlags::ALL_COMMANDS,
            dst: vk::PipelineStageFlags::TRANSFER,
            buffers: vec![],
            images: vec![(10, vk::ImageLayout::PRESENT_SRC_KHR, vk::ImageLayout::TRANSFER_SRC_OPTIMAL)],
        }
    );
    assert_eq!(
        *barriers[2],
        Call::Barrier {
            src: vk::PipelineStageFlags::TRANSFER,
            dst: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            buffers: vec![11],
            images: vec![(10, vk::ImageLayout::TRANSFER_SRC_OPTIMAL, vk::ImageLayout::PRESENT_SRC_KHR)],
        }
    );
    assert!(commands.position(&Call::CopyImageToBuffer) < commands.position(barriers[2]));
}

#[test]
fn commands_without_a_native_path_are_reported() {
    let harness = Harness::new(DeviceExtensions::empty());
    let texture = Texture::new(TextureDesc::new_2d(Format::Rgba8Unorm, 4, 4), NativeHandle(20));
    let buffer = Buffer::new(BufferDesc::new(64), NativeHandle(21));

    let mut encoder = CommandEncoder::new();
    encoder.upload_texture_data(
        &texture,
        SubresourceRange::ENTIRE,
        Offset3d::default(),
        Extent3d::new(4, 4, 1),
        16,
        &[0; 64],
    );
    encoder.clear_buffer(&buffer, None);
    let commands = harness.submit(&mut encoder).unwrap();

    assert_eq!(
        harness.warnings(),
        ["UploadTextureData command is not supported by the vulkan backend"]
    );
    assert!(commands.calls.contains(&Call::FillBuffer(64)));
    assert!(
        commands
            .barriers()
            .iter()
            .all(|call| !matches!(call, Call::Barrier { images, .. } if !images.is_empty()))
    );
}

#[test]
fn large_uploads_are_split_into_inline_updates() {
    let harness = Harness::new(DeviceExtensions::empty());
    let buffer = Buffer::new(BufferDesc::new(200_000), NativeHandle(30));
    let data = vec![7_u8; 100_000];

    let mut encoder = CommandEncoder::new();
    encoder.upload_buffer_data(&buffer, 4, &data);
    let commands = harness.submit(&mut encoder).unwrap();

    let updates: Vec<_> = commands
        .calls
        .iter()
        .filter(|call| matches!(call, Call::UpdateBuffer(..)))
        .collect();
    assert_eq!(
        updates,
        [&Call::UpdateBuffer(4, 65_536), &Call::UpdateBuffer(65_540, 34_464)]
    );
}

#[test]
fn misaligned_uploads_fail_the_submission() {
    let harness = Harness::new(DeviceExtensions::empty());
    let buffer = Buffer::new(BufferDesc::new(64), NativeHandle(31));

    let mut encoder = CommandEncoder::new();
    encoder.upload_buffer_data(&buffer, 2, &[1, 2, 3]);
    assert!(matches!(
        harness.submit(&mut encoder),
        Err(RhiError::InvalidArgument(_))
    ));
}

#[test]
fn debug_labels_follow_the_extension() {
    for (extensions, expected) in [
        (DeviceExtensions::DEBUG_UTILS, vec![Call::BeginLabel("frame".into()), Call::EndLabel]),
        (DeviceExtensions::empty(), vec![]),
    ] {
        let harness = Harness::new(extensions);
        let mut encoder = CommandEncoder::new();
        encoder.push_debug_group("frame", [0.2, 0.4, 0.6]);
        encoder.pop_debug_group();
        let commands = harness.submit(&mut encoder).unwrap();

        let labels: Vec<_> = commands
            .calls
            .into_iter()
            .filter(|call| matches!(call, Call::BeginLabel(_) | Call::EndLabel))
            .collect();
        assert_eq!(labels, expected);
    }
}

#[test]
fn mesh_tasks_need_the_mesh_shader_extension() {
    let harness = Harness::new(DeviceExtensions::empty());
    let target = Texture::new(TextureDesc::new_2d(Format::Rgba8Unorm, 4, 4), NativeHandle(40));
    let pipeline = RenderPipeline::new(NativeHandle(41), None);

    let mut encoder = CommandEncoder::new();
    let mut pass = encoder.begin_render_pass(RenderPassDesc::default().with_color(ColorAttachment::new(target.full_view())));
    pass.set_render_state(RenderState::new(&pipeline));
    pass.draw_mesh_tasks(1, 1, 1);
    pass.end();
    harness.submit(&mut encoder).unwrap();

    assert_eq!(
        harness.warnings(),
        ["DrawMeshTasks command is not supported by the vulkan backend"]
    );
}

#[test]
fn ray_dispatch_selects_the_raygen_record() {
    let harness = Harness::new(DeviceExtensions::RAY_TRACING_PIPELINE);
    let pipeline = RayTracingPipeline::new(NativeHandle(50), Some("shadows"));
    let table = ShaderTable::new(NativeHandle(51), None);
    let mut regions = TraceRegions::default();
    regions.raygen = vk::StridedDeviceAddressRegionKHR {
        device_address: 0x1000,
        stride: 64,
        size: 256,
    };
    harness.device.register_shader_table(&table, regions);

    let mut encoder = CommandEncoder::new();
    let mut pass = encoder.begin_ray_tracing_pass();
    pass.set_ray_tracing_state(RayTracingState::new(&pipeline, &table));
    pass.dispatch_rays(2, 128, 128, 1);
    pass.end();
    let commands = harness.submit(&mut encoder).unwrap();

    assert!(commands.calls.contains(&Call::BindPipeline(vk::PipelineBindPoint::RAY_TRACING_KHR)));
    assert!(commands.calls.contains(&Call::TraceRays {
        raygen: 0x1000 + 2 * 64,
        size: 64
    }));
}

#[test]
fn unregistered_shader_tables_fail_the_submission() {
    let harness = Harness::new(DeviceExtensions::RAY_TRACING_PIPELINE);
    let pipeline = RayTracingPipeline::new(NativeHandle(60), None);
    let table = ShaderTable::new(NativeHandle(61), None);

    let mut encoder = CommandEncoder::new();
    let mut pass = encoder.begin_ray_tracing_pass();
    pass.set_ray_tracing_state(RayTracingState::new(&pipeline, &table));
    pass.dispatch_rays(0, 1, 1, 1);
    pass.end();
    assert!(matches!(
        harness.submit(&mut encoder),
        Err(RhiError::InvalidArgument(_))
    ));
}

#[test]
fn device_reports_explicit_barriers() {
    let harness = Harness::new(DeviceExtensions::empty());
    let info = harness.device.info();
    assert_eq!(info.backend, "vulkan");
    assert_eq!(info.name, "mock gpu");
    assert!(info.explicit_barriers);

    let mut encoder = CommandEncoder::new();
    encoder.global_barrier();
    let commands = harness.submit(&mut encoder).unwrap();
    assert_eq!(commands.calls, [Call::GlobalBarrier, Call::End]);
}
