//! Logging backend shared by the rhi integration tests.
#![allow(dead_code, reason = "Each test binary uses a different subset of the mock")]

use std::sync::Mutex;

use rhi::command::{ClearBuffer, CopyBuffer, DispatchCompute, Draw, DrawIndirect, UploadBufferData};
use rhi::{
    BarrierBatch, BindPoint, BindingData, BufferOffsetPair, CommandId, ComputePipeline, DebugSink,
    Device, DeviceInfo, HostCallback, IndexFormat, RecordingContext, RenderPassDesc,
    RenderPipeline, ResourceId, ResourceState, RhiError, RhiResult, Severity, TextureView,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Something the mock context saw, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// One emitted barrier batch as `(resource, before, after)` triples.
    Barriers(Vec<(ResourceId, ResourceState, ResourceState)>),
    Call(&'static str),
}

impl Event {
    pub fn transitions_of(events: &[Self], id: ResourceId) -> Vec<(ResourceState, ResourceState)> {
        events
            .iter()
            .filter_map(|event| match event {
                Self::Barriers(batch) => Some(batch),
                Self::Call(_) => None,
            })
            .flatten()
            .filter(|(resource, _, _)| *resource == id)
            .map(|&(_, before, after)| (before, after))
            .collect()
    }

    pub fn position(events: &[Self], call: &'static str) -> Option<usize> {
        events.iter().position(|event| *event == Self::Call(call))
    }

    pub fn count_calls(events: &[Self], call: &'static str) -> usize {
        events.iter().filter(|event| **event == Self::Call(call)).count()
    }
}

#[derive(Default)]
pub struct CollectingSink {
    messages: Mutex<Vec<(Severity, String)>>,
}

impl CollectingSink {
    pub fn warnings(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(severity, _)| *severity == Severity::Warning)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

impl DebugSink for CollectingSink {
    fn message(&self, severity: Severity, text: &str) {
        self.messages.lock().unwrap().push((severity, text.to_owned()));
    }
}

#[derive(Default)]
pub struct MockContext {
    pub events: Vec<Event>,
    pub unsupported: Vec<CommandId>,
    pub reject_copies: bool,
}

impl MockContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn without(unsupported: &[CommandId]) -> Self {
        Self {
            unsupported: unsupported.to_vec(),
            ..Self::default()
        }
    }

    fn call(&mut self, name: &'static str) -> RhiResult<()> {
        self.events.push(Event::Call(name));
        Ok(())
    }
}

impl RecordingContext for MockContext {
    type Output = Vec<Event>;

    fn backend(&self) -> &'static str {
        "mock"
    }

    fn supports(&self, id: CommandId) -> bool {
        !self.unsupported.contains(&id)
    }

    fn emit_barriers(&mut self, batch: &BarrierBatch<'_>) -> RhiResult<()> {
        let buffers = batch
            .buffers
            .iter()
            .map(|barrier| (barrier.buffer.id(), barrier.before, barrier.after));
        let textures = batch
            .textures
            .iter()
            .map(|barrier| (barrier.texture.id(), barrier.before, barrier.after));
        self.events.push(Event::Barriers(buffers.chain(textures).collect()));
        Ok(())
    }

    fn global_barrier(&mut self) -> RhiResult<()> {
        self.call("global_barrier")
    }

    fn copy_buffer(&mut self, _cmd: &CopyBuffer) -> RhiResult<()> {
        if self.reject_copies {
            return Err(RhiError::Native("copy rejected".into()));
        }
        self.call("copy_buffer")
    }

    fn clear_buffer(&mut self, _cmd: &ClearBuffer) -> RhiResult<()> {
        self.call("clear_buffer")
    }

    fn upload_buffer_data(&mut self, _cmd: &UploadBufferData, _data: &[u8]) -> RhiResult<()> {
        self.call("upload_buffer_data")
    }

    fn begin_render_pass(&mut self, _desc: &RenderPassDesc) -> RhiResult<()> {
        self.call("begin_render_pass")
    }

    fn end_render_pass(&mut self) -> RhiResult<()> {
        self.call("end_render_pass")
    }

    fn resolve_texture(&mut self, _source: &TextureView, _destination: &TextureView) -> RhiResult<()> {
        self.call("resolve_texture")
    }

    fn bind_render_pipeline(&mut self, _pipeline: &RenderPipeline) -> RhiResult<()> {
        self.call("bind_render_pipeline")
    }

    fn bind_bindings(&mut self, _point: BindPoint, _bindings: &BindingData) -> RhiResult<()> {
        self.call("bind_bindings")
    }

    fn set_vertex_buffers(&mut self, _buffers: &[BufferOffsetPair]) -> RhiResult<()> {
        self.call("set_vertex_buffers")
    }

    fn set_index_buffer(&mut self, _buffer: &BufferOffsetPair, _format: IndexFormat) -> RhiResult<()> {
        self.call("set_index_buffer")
    }

    fn draw(&mut self, _cmd: &Draw) -> RhiResult<()> {
        self.call("draw")
    }

    fn draw_indirect(&mut self, _cmd: &DrawIndirect) -> RhiResult<()> {
        self.call("draw_indirect")
    }

    fn bind_compute_pipeline(&mut self, _pipeline: &ComputePipeline) -> RhiResult<()> {
        self.call("bind_compute_pipeline")
    }

    fn dispatch_compute(&mut self, _cmd: &DispatchCompute) -> RhiResult<()> {
        self.call("dispatch_compute")
    }

    fn execute_callback(&mut self, callback: &HostCallback) -> RhiResult<()> {
        callback();
        self.call("execute_callback")
    }

    fn finish(self) -> RhiResult<Self::Output> {
        Ok(self.events)
    }
}

/// Device whose submissions are kept for inspection.
#[derive(Default)]
pub struct MockDevice {
    pub sink: CollectingSink,
    pub submitted: Mutex<Vec<Vec<Event>>>,
    pub reject_copies: bool,
}

impl MockDevice {
    pub fn submitted(&self) -> Vec<Vec<Event>> {
        self.submitted.lock().unwrap().clone()
    }
}

impl Device for MockDevice {
    type Recording = MockContext;

    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            backend: "mock".into(),
            name: "logging mock".into(),
            explicit_barriers: true,
        }
    }

    fn debug_sink(&self) -> &dyn DebugSink {
        &self.sink
    }

    fn create_recording(&self) -> RhiResult<MockContext> {
        Ok(MockContext {
            reject_copies: self.reject_copies,
            ..MockContext::default()
        })
    }

    fn submit(&self, recordings: Vec<Vec<Event>>) -> RhiResult<()> {
        self.submitted.lock().unwrap().extend(recordings);
        Ok(())
    }
}
