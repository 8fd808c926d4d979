use std::sync::{Arc, Mutex};

use d3d12_backend::{
    ALL_SUBRESOURCES, AccelerationStructureCopyMode, ClearFlags, D3d12Device, DispatchRaysDesc,
    GpuVirtualAddress, GraphicsCommandList, IndirectSignature, NativeQueue, ResourceBarrier,
    ResourceStates, TextureCopyLocation,
};
use rhi::{
    BindPoint, BindingData, Buffer, BufferDesc, ColorAttachment, CommandEncoder, CommandQueue,
    ComputePipeline, ComputeState, DebugSink, Device, Extent3d, Format, IndexFormat, NativeHandle,
    Offset3d, QueryKind, QueryPool, RenderPassDesc, RenderPipeline, RenderState, ResourceState, RhiConfig,
    RhiResult, ScissorRect, Severity, SubmitDesc, SubresourceRange, Texture, TextureDesc, Viewport,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Barrier(Vec<ResourceBarrier>),
    CopyBufferRegion,
    CopyTextureRegion,
    SetRenderTargets(usize),
    ClearRenderTarget,
    ClearDepthStencil(ClearFlags),
    Resolve,
    SetPipeline(BindPoint),
    SetTables,
    SetRootConstants,
    StencilRef(u32),
    VertexBuffers(usize),
    IndexBuffer,
    Viewports,
    Scissors,
    Draw(u32),
    DrawIndexed,
    ExecuteIndirect(IndirectSignature),
    Dispatch([u32; 3]),
    DispatchMesh,
    DispatchRays,
    BuildAccelerationStructure,
    Postbuild,
    CopyAccelerationStructure(AccelerationStructureCopyMode),
    BeginEvent(String, u32),
    EndEvent,
    Marker(String),
    EndQuery(u32),
    ResolveQueryData,
}

#[derive(Debug, Default)]
struct MockList {
    calls: Vec<Call>,
    closed: bool,
}

impl MockList {
    fn barrier_calls(&self) -> Vec<&Vec<ResourceBarrier>> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::Barrier(barriers) => Some(barriers),
                _ => None,
            })
            .collect()
    }

    fn position(&self, wanted: &Call) -> usize {
        self.calls.iter().position(|call| call == wanted).unwrap()
    }
}

impl GraphicsCommandList for MockList {
    fn resource_barrier(&mut self, barriers: &[ResourceBarrier]) {
        self.calls.push(Call::Barrier(barriers.to_vec()));
    }

    fn copy_buffer_region(&mut self, _: NativeHandle, _: u64, _: NativeHandle, _: u64, _: u64) {
        self.calls.push(Call::CopyBufferRegion);
    }

    fn copy_texture_region(
        &mut self,
        _: &TextureCopyLocation,
        _: Offset3d,
        _: &TextureCopyLocation,
        _: Offset3d,
        _: Extent3d,
    ) {
        self.calls.push(Call::CopyTextureRegion);
    }

    fn om_set_render_targets(&mut self, render_targets: &[NativeHandle], _: Option<NativeHandle>) {
        self.calls.push(Call::SetRenderTargets(render_targets.len()));
    }

    fn clear_render_target_view(&mut self, _: NativeHandle, _: [f32; 4]) {
        self.calls.push(Call::ClearRenderTarget);
    }

    fn clear_depth_stencil_view(&mut self, _: NativeHandle, flags: ClearFlags, _: f32, _: u8) {
        self.calls.push(Call::ClearDepthStencil(flags));
    }

    fn resolve_subresource(&mut self, _: NativeHandle, _: u32, _: NativeHandle, _: u32, _: Format) {
        self.calls.push(Call::Resolve);
    }

    fn set_pipeline_state(&mut self, point: BindPoint, _: NativeHandle) {
        self.calls.push(Call::SetPipeline(point));
    }

    fn set_descriptor_tables(&mut self, _: BindPoint, _: &[NativeHandle]) {
        self.calls.push(Call::SetTables);
    }

    fn set_root_constants(&mut self, _: BindPoint, _: &[u8]) {
        self.calls.push(Call::SetRootConstants);
    }

    fn om_set_stencil_ref(&mut self, reference: u32) {
        self.calls.push(Call::StencilRef(reference));
    }

    fn ia_set_vertex_buffers(&mut self, views: &[GpuVirtualAddress]) {
        self.calls.push(Call::VertexBuffers(views.len()));
    }

    fn ia_set_index_buffer(&mut self, _: GpuVirtualAddress, _: IndexFormat) {
        self.calls.push(Call::IndexBuffer);
    }

    fn rs_set_viewports(&mut self, _: &[Viewport]) {
        self.calls.push(Call::Viewports);
    }

    fn rs_set_scissor_rects(&mut self, _: &[ScissorRect]) {
        self.calls.push(Call::Scissors);
    }

    fn draw_instanced(&mut self, vertex_count: u32, _: u32, _: u32, _: u32) {
        self.calls.push(Call::Draw(vertex_count));
    }

    fn draw_indexed_instanced(&mut self, _: u32, _: u32, _: u32, _: i32, _: u32) {
        self.calls.push(Call::DrawIndexed);
    }

    fn execute_indirect(
        &mut self,
        signature: IndirectSignature,
        _: u32,
        _: GpuVirtualAddress,
        _: Option<GpuVirtualAddress>,
    ) {
        self.calls.push(Call::ExecuteIndirect(signature));
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.calls.push(Call::Dispatch([x, y, z]));
    }

    fn dispatch_mesh(&mut self, _: u32, _: u32, _: u32) {
        self.calls.push(Call::DispatchMesh);
    }

    fn dispatch_rays(&mut self, _: &DispatchRaysDesc) {
        self.calls.push(Call::DispatchRays);
    }

    fn build_raytracing_acceleration_structure(
        &mut self,
        _: NativeHandle,
        _: Option<NativeHandle>,
        _: GpuVirtualAddress,
        _: &[GpuVirtualAddress],
    ) {
        self.calls.push(Call::BuildAccelerationStructure);
    }

    fn emit_raytracing_acceleration_structure_postbuild_info(
        &mut self,
        _: NativeHandle,
        _: QueryKind,
        _: NativeHandle,
        _: u32,
    ) {
        self.calls.push(Call::Postbuild);
    }

    fn copy_raytracing_acceleration_structure(
        &mut self,
        _: GpuVirtualAddress,
        _: GpuVirtualAddress,
        mode: AccelerationStructureCopyMode,
    ) {
        self.calls.push(Call::CopyAccelerationStructure(mode));
    }

    fn begin_event(&mut self, name: &str, color: u32) {
        self.calls.push(Call::BeginEvent(name.to_owned(), color));
    }

    fn end_event(&mut self) {
        self.calls.push(Call::EndEvent);
    }

    fn set_marker(&mut self, name: &str, _: u32) {
        self.calls.push(Call::Marker(name.to_owned()));
    }

    fn end_query(&mut self, _: NativeHandle, index: u32) {
        self.calls.push(Call::EndQuery(index));
    }

    fn resolve_query_data(&mut self, _: NativeHandle, _: QueryKind, _: u32, _: u32, _: NativeHandle, _: u64) {
        self.calls.push(Call::ResolveQueryData);
    }

    fn close(&mut self) -> RhiResult<()> {
        self.closed = true;
        Ok(())
    }
}

#[derive(Default)]
struct MockQueue {
    executed: Mutex<Vec<MockList>>,
}

impl NativeQueue for MockQueue {
    type List = MockList;

    fn adapter_name(&self) -> String {
        "mock adapter".into()
    }

    fn create_command_list(&self) -> RhiResult<MockList> {
        Ok(MockList::default())
    }

    fn execute_command_lists(&self, lists: Vec<MockList>) -> RhiResult<()> {
        self.executed.lock().unwrap().extend(lists);
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

fn submit_one(encoder: &mut CommandEncoder) -> (MockList, Vec<String>) {
    init_logging();
    let sink = SharedSink::default();
    let device = Arc::new(D3d12Device::with_sink(MockQueue::default(), sink.clone()));
    let queue = CommandQueue::new(Arc::clone(&device), RhiConfig::new());
    let buffers = [encoder.finish().unwrap()];
    queue.submit(&SubmitDesc::new(&buffers)).unwrap();
    let list = device.queue().executed.lock().unwrap().pop().unwrap();
    let warnings = sink.0.lock().unwrap().clone();
    (list, warnings)
}

fn transition(resource: NativeHandle, before: ResourceStates, after: ResourceStates) -> ResourceBarrier {
    ResourceBarrier::Transition {
        resource,
        subresource: ALL_SUBRESOURCES,
        before,
        after,
    }
}

#[test]
fn hoisted_pass_commits_in_one_resource_barrier_call() {
    let target = Texture::new(
        TextureDesc::new_2d(Format::Bgra8Unorm, 64, 64).with_default_state(ResourceState::Present),
        NativeHandle(10),
    );
    let vertices = Buffer::new(BufferDesc::new(1024), NativeHandle(11));
    let pipeline = RenderPipeline::new(NativeHandle(12), Some("triangle"));

    let mut encoder = CommandEncoder::new();
    let mut pass = encoder.begin_render_pass(
        RenderPassDesc::default().with_color(ColorAttachment::new(target.full_view()).cleared([0.0; 4])),
    );
    pass.set_render_state(RenderState::new(&pipeline).with_vertex_buffer(&vertices, 0));
    pass.draw(3, 1, 0, 0);
    pass.end();
    let (list, warnings) = submit_one(&mut encoder);

    assert!(warnings.is_empty());
    assert!(list.closed);
    let barrier_calls = list.barrier_calls();
    assert_eq!(barrier_calls.len(), 2);
    assert_eq!(
        *barrier_calls[0],
        [
            transition(NativeHandle(11), ResourceStates::COMMON, ResourceStates::VERTEX_AND_CONSTANT_BUFFER),
            transition(NativeHandle(10), ResourceStates::PRESENT, ResourceStates::RENDER_TARGET),
        ]
    );
    let begin = list.position(&Call::SetRenderTargets(1));
    let draw = list.position(&Call::Draw(3));
    assert!(begin < draw);
    assert!(matches!(list.calls[0], Call::Barrier(_)));
    assert!(
        list.calls[begin..draw]
            .iter()
            .all(|call| !matches!(call, Call::Barrier(_)))
    );
    assert_eq!(list.calls[begin + 1], Call::ClearRenderTarget);
}

#[test]
fn repeated_unordered_access_emits_a_uav_barrier() {
    let storage = Buffer::new(BufferDesc::new(256), NativeHandle(20));
    let pipeline = ComputePipeline::new(NativeHandle(21), None);

    let mut encoder = CommandEncoder::new();
    let mut pass = encoder.begin_compute_pass();
    let bindings = pass.resolve_bindings(
        BindingData::new()
            .with_native(NativeHandle(22))
            .with_buffer(&storage, ResourceState::UnorderedAccess),
    );
    pass.set_compute_state(ComputeState::new(&pipeline).with_bindings(Arc::clone(&bindings)));
    pass.dispatch(8, 1, 1);
    pass.set_compute_state(ComputeState::new(&pipeline).with_bindings(bindings));
    pass.dispatch(8, 1, 1);
    pass.end();
    let (list, _) = submit_one(&mut encoder);

    assert_eq!(
        list.calls,
        [
            Call::Barrier(vec![transition(
                NativeHandle(20),
                ResourceStates::COMMON,
                ResourceStates::UNORDERED_ACCESS
            )]),
            Call::SetPipeline(BindPoint::Compute),
            Call::SetTables,
            Call::Dispatch([8, 1, 1]),
            Call::Barrier(vec![ResourceBarrier::Uav {
                resource: Some(NativeHandle(20))
            }]),
            Call::Dispatch([8, 1, 1]),
            Call::Barrier(vec![transition(
                NativeHandle(20),
                ResourceStates::UNORDERED_ACCESS,
                ResourceStates::COMMON
            )]),
        ]
    );
}

#[test]
fn resolves_run_after_the_pass_closes() {
    let multisampled = Texture::new(
        TextureDesc::new_2d(Format::Rgba8Unorm, 32, 32).with_samples(4),
        NativeHandle(30),
    );
    let resolved = Texture::new(
        TextureDesc::new_2d(Format::Rgba8Unorm, 32, 32).with_default_state(ResourceState::ShaderResource),
        NativeHandle(31),
    );

    let mut encoder = CommandEncoder::new();
    let pass = encoder.begin_render_pass(RenderPassDesc::default().with_color(
        ColorAttachment::new(multisampled.full_view()).resolving_into(resolved.full_view()),
    ));
    pass.end();
    let (list, _) = submit_one(&mut encoder);

    let resolve = list.position(&Call::Resolve);
    assert!(resolve > list.position(&Call::SetRenderTargets(1)));
    assert_eq!(
        list.calls[resolve - 1],
        Call::Barrier(vec![
            transition(NativeHandle(30), ResourceStates::RENDER_TARGET, ResourceStates::RESOLVE_SOURCE),
            transition(
                NativeHandle(31),
                ResourceStates::from_state(ResourceState::ShaderResource),
                ResourceStates::RESOLVE_DEST
            ),
        ])
    );
}

#[test]
fn clears_are_reported_and_skipped() {
    let texture = Texture::new(TextureDesc::new_2d(Format::Rgba8Unorm, 4, 4), NativeHandle(40));
    let src = Buffer::new(
        BufferDesc::new(64).with_default_state(ResourceState::CopySource),
        NativeHandle(41),
    );
    let dst = Buffer::new(
        BufferDesc::new(64).with_default_state(ResourceState::CopyDestination),
        NativeHandle(42),
    );

    let mut encoder = CommandEncoder::new();
    encoder.push_debug_group("copies", [1.0, 0.0, 0.0]);
    encoder.clear_texture_float(&texture, SubresourceRange::ENTIRE, [1.0; 4]);
    encoder.copy_buffer(&dst, 0, &src, 0, 64);
    encoder.pop_debug_group();
    let (list, warnings) = submit_one(&mut encoder);

    assert_eq!(
        warnings,
        ["ClearTextureFloat command is not supported by the d3d12 backend"]
    );
    assert_eq!(
        list.calls,
        [
            Call::BeginEvent("copies".into(), 0xFFFF_0000),
            Call::CopyBufferRegion,
            Call::EndEvent,
        ]
    );
}

#[test]
fn submissions_execute_lists_in_order() {
    init_logging();
    let device = Arc::new(D3d12Device::new(MockQueue::default()));
    let queue = CommandQueue::new(Arc::clone(&device), RhiConfig::new());
    let pool = QueryPool::new(QueryKind::Timestamp, 4, NativeHandle(50));

    let mut first = CommandEncoder::new();
    first.write_timestamp(&pool, 0);
    let mut second = CommandEncoder::new();
    second.insert_debug_marker("second", [0.0; 3]);
    second.global_barrier();
    let buffers = [first.finish().unwrap(), second.finish().unwrap()];
    queue.submit(&SubmitDesc::new(&buffers)).unwrap();

    let executed = device.queue().executed.lock().unwrap();
    assert_eq!(executed.len(), 2);
    assert_eq!(executed[0].calls, [Call::EndQuery(0)]);
    assert_eq!(
        executed[1].calls,
        [
            Call::Marker("second".into()),
            Call::Barrier(vec![ResourceBarrier::Uav { resource: None }]),
        ]
    );
    assert!(executed.iter().all(|list| list.closed));
    assert_eq!(device.info().name, "mock adapter");
}
