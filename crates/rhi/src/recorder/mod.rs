//! Replays a [`CommandBuffer`] against a backend, inserting the barriers each command needs.
//!
//! A [`CommandRecorder`] is created per buffer per submission. It owns a fresh
//! [`StateTracking`], walks the list once in order, and hands native work to a
//! [`RecordingContext`]. Render passes are interpreted twice: [`lookahead`] collects the pass's
//! state requirements and the recorder commits them before the native pass opens, so nothing
//! between pass begin and pass end ever emits a barrier.

pub mod lookahead;
mod pass_state;

use log::{debug, trace};
use serde::{Deserialize, Serialize};
use tracing::info_span;

use crate::binding::BindingData;
use crate::command::{
    BeginRenderPass, BuildAccelerationStructure, ClearBuffer, ClearTextureDepthStencil,
    ClearTextureFloat, ClearTextureUint, Command, CommandId, ConvertCooperativeVectorMatrix,
    CopyAccelerationStructure, CopyBuffer, CopyTexture, CopyTextureToBuffer,
    DeserializeAccelerationStructure, DispatchCompute, DispatchComputeIndirect, DispatchRays, Draw,
    DrawIndexed, DrawIndexedIndirect, DrawIndirect, DrawMeshTasks, HostCallback,
    QueryAccelerationStructureProperties, ResolveQuery, SerializeAccelerationStructure,
    SetComputeState, SetRayTracingState, SetRenderState, UploadBufferData, UploadTextureData,
};
use crate::command_buffer::CommandBuffer;
use crate::command_list::Commands;
use crate::debug::{DebugSink, Severity};
use crate::error::{RhiError, RhiResult};
use crate::pass::{BufferOffsetPair, IndexFormat, RenderPassDesc, ScissorRect, Viewport};
use crate::resource::{
    Buffer, ComputePipeline, QueryPool, RayTracingPipeline, RenderPipeline, ResourceState,
    ShaderTable, SubresourceRange, Texture, TextureView,
};
use crate::state_tracking::{BufferBarrier, StateTracking, TextureBarrier};

pub use pass_state::PassValidity;
use pass_state::{ActivePass, PassState, RenderDelta, compute_delta, ray_tracing_delta};

/// How a backend wants barriers delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarrierModel {
    /// Barriers are batched and handed to [`RecordingContext::emit_barriers`].
    Explicit,
    /// The native API synchronizes on its own; barriers are tracked and counted but not emitted.
    Implicit,
}

/// Pipeline slot a binding bundle is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindPoint {
    Graphics,
    Compute,
    RayTracing,
}

/// A run of consecutive pending barriers that share one source and destination scope.
#[derive(Debug, Clone, Copy)]
pub struct BarrierBatch<'batch> {
    pub src_scope: u64,
    pub dst_scope: u64,
    pub buffers: &'batch [BufferBarrier],
    pub textures: &'batch [TextureBarrier],
}

impl BarrierBatch<'_> {
    #[inline]
    pub fn len(&self) -> usize {
        self.buffers.len() + self.textures.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty() && self.textures.is_empty()
    }
}

/// Native command sink for one recording session.
///
/// Every command method has a default that reports [`RhiError::Unsupported`]; a backend
/// overrides what it can express. The recorder turns `Unsupported` into a warning and moves on,
/// while any other error aborts the recording.
#[allow(unused_variables, reason = "Default bodies ignore the payload they cannot express")]
pub trait RecordingContext {
    /// What [`RecordingContext::finish`] produces, handed to the device at submit.
    type Output;

    /// Short backend name used in warnings.
    fn backend(&self) -> &'static str;

    /// Whether this backend can express `id` at all. Unsupported commands are skipped before
    /// any of their state requirements reach the tracker.
    fn supports(&self, id: CommandId) -> bool {
        true
    }

    fn barrier_model() -> BarrierModel {
        BarrierModel::Explicit
    }

    /// Scope bits a state maps to on either side of a barrier. Barriers whose
    /// `(source, destination)` scopes match are delivered in one batch.
    fn barrier_scope(state: ResourceState, is_source: bool) -> u64 {
        0
    }

    /// Emit one batch of transitions.
    ///
    /// # Errors
    /// Native failures.
    fn emit_barriers(&mut self, batch: &BarrierBatch<'_>) -> RhiResult<()> {
        Ok(())
    }

    fn global_barrier(&mut self) -> RhiResult<()> {
        Err(RhiError::Unsupported(CommandId::GlobalBarrier))
    }

    fn copy_buffer(&mut self, cmd: &CopyBuffer) -> RhiResult<()> {
        Err(RhiError::Unsupported(CommandId::CopyBuffer))
    }

    fn copy_texture(&mut self, cmd: &CopyTexture) -> RhiResult<()> {
        Err(RhiError::Unsupported(CommandId::CopyTexture))
    }

    fn copy_texture_to_buffer(&mut self, cmd: &CopyTextureToBuffer) -> RhiResult<()> {
        Err(RhiError::Unsupported(CommandId::CopyTextureToBuffer))
    }

    fn clear_buffer(&mut self, cmd: &ClearBuffer) -> RhiResult<()> {
        Err(RhiError::Unsupported(CommandId::ClearBuffer))
    }

    fn clear_texture_float(&mut self, cmd: &ClearTextureFloat) -> RhiResult<()> {
        Err(RhiError::Unsupported(CommandId::ClearTextureFloat))
    }

    fn clear_texture_uint(&mut self, cmd: &ClearTextureUint) -> RhiResult<()> {
        Err(RhiError::Unsupported(CommandId::ClearTextureUint))
    }

    fn clear_texture_depth_stencil(&mut self, cmd: &ClearTextureDepthStencil) -> RhiResult<()> {
        Err(RhiError::Unsupported(CommandId::ClearTextureDepthStencil))
    }

    /// `data` is the command's scratch slice, already resolved.
    fn upload_texture_data(&mut self, cmd: &UploadTextureData, data: &[u8]) -> RhiResult<()> {
        Err(RhiError::Unsupported(CommandId::UploadTextureData))
    }

    fn upload_buffer_data(&mut self, cmd: &UploadBufferData, data: &[u8]) -> RhiResult<()> {
        Err(RhiError::Unsupported(CommandId::UploadBufferData))
    }

    fn resolve_query(&mut self, cmd: &ResolveQuery) -> RhiResult<()> {
        Err(RhiError::Unsupported(CommandId::ResolveQuery))
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDesc) -> RhiResult<()> {
        Err(RhiError::Unsupported(CommandId::BeginRenderPass))
    }

    fn end_render_pass(&mut self) -> RhiResult<()> {
        Err(RhiError::Unsupported(CommandId::EndRenderPass))
    }

    /// Multisample resolve, issued after the pass that rendered `source` has closed.
    fn resolve_texture(&mut self, source: &TextureView, destination: &TextureView) -> RhiResult<()> {
        Err(RhiError::Unsupported(CommandId::EndRenderPass))
    }

    fn bind_render_pipeline(&mut self, pipeline: &RenderPipeline) -> RhiResult<()> {
        Err(RhiError::Unsupported(CommandId::SetRenderState))
    }

    fn bind_bindings(&mut self, point: BindPoint, bindings: &BindingData) -> RhiResult<()> {
        Ok(())
    }

    fn set_stencil_reference(&mut self, reference: u32) -> RhiResult<()> {
        Ok(())
    }

    fn set_vertex_buffers(&mut self, buffers: &[BufferOffsetPair]) -> RhiResult<()> {
        Err(RhiError::Unsupported(CommandId::SetRenderState))
    }

    fn set_index_buffer(&mut self, buffer: &BufferOffsetPair, format: IndexFormat) -> RhiResult<()> {
        Err(RhiError::Unsupported(CommandId::SetRenderState))
    }

    fn set_viewports(&mut self, viewports: &[Viewport]) -> RhiResult<()> {
        Ok(())
    }

    fn set_scissor_rects(&mut self, rects: &[ScissorRect]) -> RhiResult<()> {
        Ok(())
    }

    fn draw(&mut self, cmd: &Draw) -> RhiResult<()> {
        Err(RhiError::Unsupported(CommandId::Draw))
    }

    fn draw_indexed(&mut self, cmd: &DrawIndexed) -> RhiResult<()> {
        Err(RhiError::Unsupported(CommandId::DrawIndexed))
    }

    fn draw_indirect(&mut self, cmd: &DrawIndirect) -> RhiResult<()> {
        Err(RhiError::Unsupported(CommandId::DrawIndirect))
    }

    fn draw_indexed_indirect(&mut self, cmd: &DrawIndexedIndirect) -> RhiResult<()> {
        Err(RhiError::Unsupported(CommandId::DrawIndexedIndirect))
    }

    fn draw_mesh_tasks(&mut self, cmd: &DrawMeshTasks) -> RhiResult<()> {
        Err(RhiError::Unsupported(CommandId::DrawMeshTasks))
    }

    fn begin_compute_pass(&mut self) -> RhiResult<()> {
        Ok(())
    }

    fn end_compute_pass(&mut self) -> RhiResult<()> {
        Ok(())
    }

    fn bind_compute_pipeline(&mut self, pipeline: &ComputePipeline) -> RhiResult<()> {
        Err(RhiError::Unsupported(CommandId::SetComputeState))
    }

    fn dispatch_compute(&mut self, cmd: &DispatchCompute) -> RhiResult<()> {
        Err(RhiError::Unsupported(CommandId::DispatchCompute))
    }

    fn dispatch_compute_indirect(&mut self, cmd: &DispatchComputeIndirect) -> RhiResult<()> {
        Err(RhiError::Unsupported(CommandId::DispatchComputeIndirect))
    }

    fn begin_ray_tracing_pass(&mut self) -> RhiResult<()> {
        Ok(())
    }

    fn end_ray_tracing_pass(&mut self) -> RhiResult<()> {
        Ok(())
    }

    fn bind_ray_tracing_pipeline(
        &mut self,
        pipeline: &RayTracingPipeline,
        shader_table: &ShaderTable,
    ) -> RhiResult<()> {
        Err(RhiError::Unsupported(CommandId::SetRayTracingState))
    }

    fn dispatch_rays(&mut self, cmd: &DispatchRays) -> RhiResult<()> {
        Err(RhiError::Unsupported(CommandId::DispatchRays))
    }

    fn build_acceleration_structure(&mut self, cmd: &BuildAccelerationStructure) -> RhiResult<()> {
        Err(RhiError::Unsupported(CommandId::BuildAccelerationStructure))
    }

    fn copy_acceleration_structure(&mut self, cmd: &CopyAccelerationStructure) -> RhiResult<()> {
        Err(RhiError::Unsupported(CommandId::CopyAccelerationStructure))
    }

    fn query_acceleration_structure_properties(
        &mut self,
        cmd: &QueryAccelerationStructureProperties,
    ) -> RhiResult<()> {
        Err(RhiError::Unsupported(CommandId::QueryAccelerationStructureProperties))
    }

    fn serialize_acceleration_structure(
        &mut self,
        cmd: &SerializeAccelerationStructure,
    ) -> RhiResult<()> {
        Err(RhiError::Unsupported(CommandId::SerializeAccelerationStructure))
    }

    fn deserialize_acceleration_structure(
        &mut self,
        cmd: &DeserializeAccelerationStructure,
    ) -> RhiResult<()> {
        Err(RhiError::Unsupported(CommandId::DeserializeAccelerationStructure))
    }

    fn convert_cooperative_vector_matrix(
        &mut self,
        cmd: &ConvertCooperativeVectorMatrix,
    ) -> RhiResult<()> {
        Err(RhiError::Unsupported(CommandId::ConvertCooperativeVectorMatrix))
    }

    fn push_debug_group(&mut self, name: &str, color: [f32; 3]) -> RhiResult<()> {
        Ok(())
    }

    fn pop_debug_group(&mut self) -> RhiResult<()> {
        Ok(())
    }

    fn insert_debug_marker(&mut self, name: &str, color: [f32; 3]) -> RhiResult<()> {
        Ok(())
    }

    fn write_timestamp(&mut self, pool: &QueryPool, index: u32) -> RhiResult<()> {
        Err(RhiError::Unsupported(CommandId::WriteTimestamp))
    }

    /// Run a host callback at this point of the stream. Backends that defer execution to
    /// submit time override this to queue the callback instead.
    fn execute_callback(&mut self, callback: &HostCallback) -> RhiResult<()> {
        callback();
        Ok(())
    }

    /// Close the native recording.
    ///
    /// # Errors
    /// Native failures.
    fn finish(self) -> RhiResult<Self::Output>
    where
        Self: Sized;
}

/// Counters gathered while recording one buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordStats {
    pub commands: usize,
    pub barrier_batches: usize,
    pub buffer_barriers: usize,
    pub texture_barriers: usize,
    pub hoisted_passes: usize,
    pub unsupported: usize,
    pub skipped: usize,
}

/// Native output of one recording plus its statistics.
#[derive(Debug)]
pub struct Recorded<O> {
    pub output: O,
    pub stats: RecordStats,
}

/// Single-use interpreter from a command list to a backend context.
pub struct CommandRecorder<'sink, C: RecordingContext> {
    context: C,
    tracking: StateTracking,
    pass: PassState,
    sink: &'sink dyn DebugSink,
    stats: RecordStats,
    trace_commands: bool,
}

impl<'sink, C: RecordingContext> CommandRecorder<'sink, C> {
    pub fn new(context: C, sink: &'sink dyn DebugSink) -> Self {
        Self {
            context,
            tracking: StateTracking::new(),
            pass: PassState::default(),
            sink,
            stats: RecordStats::default(),
            trace_commands: false,
        }
    }

    /// Log every command at debug level while recording.
    #[must_use]
    pub const fn with_trace(mut self, trace_commands: bool) -> Self {
        self.trace_commands = trace_commands;
        self
    }

    /// Record every command of `buffer`, restore default states and close the context.
    ///
    /// # Errors
    /// Native failures reported by the context, or upload records whose data is missing from
    /// the buffer's scratch memory. Unsupported commands are not errors.
    pub fn record(mut self, buffer: &CommandBuffer) -> RhiResult<Recorded<C::Output>> {
        let _span = info_span!("rhi.record", backend = self.context.backend(), commands = buffer.len())
            .entered();
        let mut cursor = buffer.commands();
        while let Some(command) = cursor.next() {
            self.stats.commands += 1;
            if self.trace_commands {
                debug!(target: "rhi::recorder", "{} {:?}", self.context.backend(), command.id());
            }
            if let Command::BeginRenderPass(begin) = command
                && self.context.supports(CommandId::BeginRenderPass)
            {
                self.close_open_pass()?;
                self.hoist_render_pass(begin, cursor.clone())?;
            }
            self.dispatch(command, buffer)?;
        }

        self.close_open_pass()?;
        self.tracking.require_default_states();
        self.commit_barriers()?;
        self.tracking.clear();

        let stats = self.stats;
        debug!(
            target: "rhi::recorder",
            "{}: {} commands, {} buffer and {} texture barriers in {} batches, {} hoisted passes, {} unsupported, {} skipped",
            self.context.backend(),
            stats.commands,
            stats.buffer_barriers,
            stats.texture_barriers,
            stats.barrier_batches,
            stats.hoisted_passes,
            stats.unsupported,
            stats.skipped,
        );
        let output = self.context.finish()?;
        Ok(Recorded { output, stats })
    }

    fn dispatch(&mut self, command: &Command, buffer: &CommandBuffer) -> RhiResult<()> {
        let id = command.id();
        if !self.context.supports(id) {
            self.report_unsupported(id);
            return Ok(());
        }
        match self.execute(command, buffer) {
            Err(RhiError::Unsupported(unsupported)) => {
                self.report_unsupported(unsupported);
                Ok(())
            }
            other => other,
        }
    }

    fn report_unsupported(&mut self, id: CommandId) {
        self.stats.unsupported += 1;
        let text = format!("{id} command is not supported by the {} backend", self.context.backend());
        self.sink.message(Severity::Warning, &text);
    }

    fn execute(&mut self, command: &Command, buffer: &CommandBuffer) -> RhiResult<()> {
        match command {
            Command::CopyBuffer(cmd) => {
                self.require_buffer(&cmd.dst, ResourceState::CopyDestination);
                self.require_buffer(&cmd.src, ResourceState::CopySource);
                self.commit_barriers()?;
                self.context.copy_buffer(cmd)
            }
            Command::CopyTexture(cmd) => {
                self.require_texture(&cmd.dst, cmd.dst_subresource, ResourceState::CopyDestination);
                self.require_texture(&cmd.src, cmd.src_subresource, ResourceState::CopySource);
                self.commit_barriers()?;
                self.context.copy_texture(cmd)
            }
            Command::CopyTextureToBuffer(cmd) => {
                self.require_buffer(&cmd.dst, ResourceState::CopyDestination);
                self.require_texture(&cmd.src, cmd.src_subresource, ResourceState::CopySource);
                self.commit_barriers()?;
                self.context.copy_texture_to_buffer(cmd)
            }
            Command::ClearBuffer(cmd) => {
                self.require_buffer(&cmd.buffer, ResourceState::CopyDestination);
                self.commit_barriers()?;
                self.context.clear_buffer(cmd)
            }
            Command::ClearTextureFloat(cmd) => {
                self.require_texture(&cmd.texture, cmd.range, ResourceState::CopyDestination);
                self.commit_barriers()?;
                self.context.clear_texture_float(cmd)
            }
            Command::ClearTextureUint(cmd) => {
                self.require_texture(&cmd.texture, cmd.range, ResourceState::CopyDestination);
                self.commit_barriers()?;
                self.context.clear_texture_uint(cmd)
            }
            Command::ClearTextureDepthStencil(cmd) => {
                self.require_texture(&cmd.texture, cmd.range, ResourceState::CopyDestination);
                self.commit_barriers()?;
                self.context.clear_texture_depth_stencil(cmd)
            }
            Command::UploadTextureData(cmd) => {
                let data = scratch_bytes(buffer, cmd.data)?;
                self.require_texture(&cmd.dst, cmd.range, ResourceState::CopyDestination);
                self.commit_barriers()?;
                self.context.upload_texture_data(cmd, data)
            }
            Command::UploadBufferData(cmd) => {
                let data = scratch_bytes(buffer, cmd.data)?;
                self.require_buffer(&cmd.dst, ResourceState::CopyDestination);
                self.commit_barriers()?;
                self.context.upload_buffer_data(cmd, data)
            }
            Command::ResolveQuery(cmd) => {
                self.require_buffer(&cmd.buffer, ResourceState::CopyDestination);
                self.commit_barriers()?;
                self.context.resolve_query(cmd)
            }
            Command::BeginRenderPass(cmd) => self.begin_render_pass(cmd),
            Command::EndRenderPass(_) => self.end_render_pass(),
            Command::SetRenderState(cmd) => self.set_render_state(cmd),
            Command::Draw(cmd) => {
                if self.render_ready() {
                    self.context.draw(cmd)?;
                }
                Ok(())
            }
            Command::DrawIndexed(cmd) => {
                if self.render_ready() {
                    self.context.draw_indexed(cmd)?;
                }
                Ok(())
            }
            Command::DrawIndirect(cmd) => {
                if !self.render_ready() {
                    return Ok(());
                }
                self.require_indirect(&cmd.arg_buffer, cmd.count_buffer.as_ref());
                self.commit_barriers()?;
                self.context.draw_indirect(cmd)
            }
            Command::DrawIndexedIndirect(cmd) => {
                if !self.render_ready() {
                    return Ok(());
                }
                self.require_indirect(&cmd.arg_buffer, cmd.count_buffer.as_ref());
                self.commit_barriers()?;
                self.context.draw_indexed_indirect(cmd)
            }
            Command::DrawMeshTasks(cmd) => {
                if self.render_ready() {
                    self.context.draw_mesh_tasks(cmd)?;
                }
                Ok(())
            }
            Command::BeginComputePass(_) => {
                self.close_open_pass()?;
                self.context.begin_compute_pass()?;
                self.pass.begin(ActivePass::Compute);
                Ok(())
            }
            Command::EndComputePass(_) => self.end_compute_pass(),
            Command::SetComputeState(cmd) => self.set_compute_state(cmd),
            Command::DispatchCompute(cmd) => {
                if self.ready(PassValidity::ComputeValid) {
                    self.context.dispatch_compute(cmd)?;
                }
                Ok(())
            }
            Command::DispatchComputeIndirect(cmd) => {
                if !self.ready(PassValidity::ComputeValid) {
                    return Ok(());
                }
                self.require_indirect(&cmd.arg_buffer, None);
                self.commit_barriers()?;
                self.context.dispatch_compute_indirect(cmd)
            }
            Command::BeginRayTracingPass(_) => {
                self.close_open_pass()?;
                self.context.begin_ray_tracing_pass()?;
                self.pass.begin(ActivePass::RayTracing);
                Ok(())
            }
            Command::EndRayTracingPass(_) => self.end_ray_tracing_pass(),
            Command::SetRayTracingState(cmd) => self.set_ray_tracing_state(cmd),
            Command::DispatchRays(cmd) => {
                if self.ready(PassValidity::RayTracingValid) {
                    self.context.dispatch_rays(cmd)?;
                }
                Ok(())
            }
            Command::BuildAccelerationStructure(cmd) => {
                for input in &cmd.inputs {
                    self.require_buffer(&input.buffer, ResourceState::AccelerationStructureBuildInput);
                }
                self.require_buffer(&cmd.scratch.buffer, ResourceState::UnorderedAccess);
                self.commit_barriers()?;
                self.context.build_acceleration_structure(cmd)
            }
            Command::CopyAccelerationStructure(cmd) => self.context.copy_acceleration_structure(cmd),
            Command::QueryAccelerationStructureProperties(cmd) => {
                self.context.query_acceleration_structure_properties(cmd)
            }
            Command::SerializeAccelerationStructure(cmd) => {
                self.context.serialize_acceleration_structure(cmd)
            }
            Command::DeserializeAccelerationStructure(cmd) => {
                self.context.deserialize_acceleration_structure(cmd)
            }
            Command::ConvertCooperativeVectorMatrix(cmd) => {
                self.require_buffer(&cmd.dst, ResourceState::CopyDestination);
                self.require_buffer(&cmd.src, ResourceState::CopySource);
                self.commit_barriers()?;
                self.context.convert_cooperative_vector_matrix(cmd)
            }
            Command::SetBufferState(cmd) => {
                self.require_buffer(&cmd.buffer, cmd.state);
                Ok(())
            }
            Command::SetTextureState(cmd) => {
                self.require_texture(&cmd.texture, cmd.range, cmd.state);
                Ok(())
            }
            Command::GlobalBarrier(_) => {
                self.commit_barriers()?;
                self.context.global_barrier()
            }
            Command::PushDebugGroup(cmd) => self.context.push_debug_group(&cmd.name, cmd.color),
            Command::PopDebugGroup(_) => self.context.pop_debug_group(),
            Command::InsertDebugMarker(cmd) => self.context.insert_debug_marker(&cmd.name, cmd.color),
            Command::WriteTimestamp(cmd) => self.context.write_timestamp(&cmd.pool, cmd.index),
            Command::ExecuteCallback(cmd) => self.context.execute_callback(&cmd.callback),
        }
    }

    fn require_buffer(&mut self, buffer: &Buffer, state: ResourceState) {
        if !self.pass.is_hoisted() {
            self.tracking.set_buffer_state(buffer, state);
        }
    }

    fn require_texture(&mut self, texture: &Texture, range: SubresourceRange, state: ResourceState) {
        if !self.pass.is_hoisted() {
            self.tracking.set_texture_state(texture, range, state);
        }
    }

    fn require_bindings(&mut self, bindings: &BindingData) {
        if !self.pass.is_hoisted() {
            bindings.require_binding_states(&mut self.tracking);
        }
    }

    fn require_indirect(&mut self, args: &Buffer, count: Option<&Buffer>) {
        self.require_buffer(args, ResourceState::IndirectArgument);
        if let Some(count) = count {
            self.require_buffer(count, ResourceState::IndirectArgument);
        }
    }

    fn ready(&mut self, validity: PassValidity) -> bool {
        let ready = self.pass.validity() == validity;
        if !ready {
            self.stats.skipped += 1;
        }
        ready
    }

    #[inline]
    fn render_ready(&mut self) -> bool {
        self.ready(PassValidity::RenderValid)
    }

    /// First pass over a render pass: request and commit everything it will need.
    fn hoist_render_pass(&mut self, begin: &BeginRenderPass, rest: Commands<'_>) -> RhiResult<()> {
        let requirements = lookahead::collect_render_pass(begin, rest);
        for conflict in &requirements.conflicts {
            let text = format!(
                "resource {} requested as {:?} and {:?} inside one render pass, keeping {:?}",
                conflict.resource, conflict.kept, conflict.dropped, conflict.kept
            );
            self.sink.message(Severity::Warning, &text);
        }
        for (buffer, state) in &requirements.buffers {
            self.tracking.set_buffer_state(buffer, *state);
        }
        for (texture, range, state) in &requirements.textures {
            self.tracking.set_texture_state(texture, *range, *state);
        }
        trace!(target: "rhi::recorder", "hoisted {} render pass requirements", requirements.len());
        self.commit_barriers()?;
        self.stats.hoisted_passes += 1;
        Ok(())
    }

    fn begin_render_pass(&mut self, cmd: &BeginRenderPass) -> RhiResult<()> {
        self.context.begin_render_pass(&cmd.desc)?;
        let resolves = cmd
            .desc
            .color_attachments
            .iter()
            .filter_map(|attachment| {
                attachment
                    .resolve_target
                    .as_ref()
                    .map(|target| (attachment.view.clone(), target.clone()))
            })
            .collect();
        self.pass.begin_hoisted_render(resolves);
        Ok(())
    }

    fn end_render_pass(&mut self) -> RhiResult<()> {
        if !self.pass.is_active(ActivePass::Render) {
            return Ok(());
        }
        let resolves = self.pass.end();
        self.context.end_render_pass()?;
        self.commit_barriers()?;
        for (source, destination) in resolves {
            self.require_texture(source.texture(), source.range(), ResourceState::ResolveSource);
            self.require_texture(destination.texture(), destination.range(), ResourceState::ResolveDestination);
            self.commit_barriers()?;
            self.context.resolve_texture(&source, &destination)?;
        }
        Ok(())
    }

    fn end_compute_pass(&mut self) -> RhiResult<()> {
        if !self.pass.is_active(ActivePass::Compute) {
            return Ok(());
        }
        self.pass.end();
        self.context.end_compute_pass()
    }

    fn end_ray_tracing_pass(&mut self) -> RhiResult<()> {
        if !self.pass.is_active(ActivePass::RayTracing) {
            return Ok(());
        }
        self.pass.end();
        self.context.end_ray_tracing_pass()
    }

    /// End a pass the list forgot to close.
    fn close_open_pass(&mut self) -> RhiResult<()> {
        let Some(active) = self.pass.active() else {
            return Ok(());
        };
        let text = format!("{active:?} pass left open, closing it");
        self.sink.message(Severity::Warning, &text);
        match active {
            ActivePass::Render => self.end_render_pass(),
            ActivePass::Compute => self.end_compute_pass(),
            ActivePass::RayTracing => self.end_ray_tracing_pass(),
        }
    }

    fn set_render_state(&mut self, cmd: &SetRenderState) -> RhiResult<()> {
        if !self.pass.is_active(ActivePass::Render) {
            self.stats.skipped += 1;
            return Ok(());
        }
        let state = &cmd.state;
        let delta = RenderDelta::between(self.pass.committed_render(), state);

        if let Some(bindings) = &state.bindings {
            self.require_bindings(bindings);
        }
        for vertex in &state.vertex_buffers {
            self.require_buffer(&vertex.buffer, ResourceState::VertexBuffer);
        }
        if let Some(index) = &state.index_buffer {
            self.require_buffer(&index.buffer, ResourceState::IndexBuffer);
        }
        self.commit_barriers()?;

        if delta.pipeline {
            self.context.bind_render_pipeline(&state.pipeline)?;
        }
        if delta.bindings
            && let Some(bindings) = &state.bindings
        {
            self.context.bind_bindings(BindPoint::Graphics, bindings)?;
        }
        if delta.stencil_ref {
            self.context.set_stencil_reference(state.stencil_ref)?;
        }
        if delta.vertex_buffers && !state.vertex_buffers.is_empty() {
            self.context.set_vertex_buffers(&state.vertex_buffers)?;
        }
        if delta.index_buffer
            && let Some(index) = &state.index_buffer
        {
            self.context.set_index_buffer(index, state.index_format)?;
        }
        if delta.viewports && !state.viewports.is_empty() {
            self.context.set_viewports(&state.viewports)?;
        }
        if delta.scissor_rects && !state.scissor_rects.is_empty() {
            self.context.set_scissor_rects(&state.scissor_rects)?;
        }
        self.pass.enter_render(state.clone());
        Ok(())
    }

    fn set_compute_state(&mut self, cmd: &SetComputeState) -> RhiResult<()> {
        if !self.pass.is_active(ActivePass::Compute) {
            self.stats.skipped += 1;
            return Ok(());
        }
        let state = &cmd.state;
        let (pipeline, bindings) = compute_delta(self.pass.committed_compute(), state);
        if let Some(data) = &state.bindings {
            self.require_bindings(data);
        }
        self.commit_barriers()?;
        if pipeline {
            self.context.bind_compute_pipeline(&state.pipeline)?;
        }
        if bindings && let Some(data) = &state.bindings {
            self.context.bind_bindings(BindPoint::Compute, data)?;
        }
        self.pass.enter_compute(state.clone());
        Ok(())
    }

    fn set_ray_tracing_state(&mut self, cmd: &SetRayTracingState) -> RhiResult<()> {
        if !self.pass.is_active(ActivePass::RayTracing) {
            self.stats.skipped += 1;
            return Ok(());
        }
        let state = &cmd.state;
        let (pipeline, bindings) = ray_tracing_delta(self.pass.committed_ray_tracing(), state);
        if let Some(data) = &state.bindings {
            self.require_bindings(data);
        }
        self.commit_barriers()?;
        if pipeline {
            self.context
                .bind_ray_tracing_pipeline(&state.pipeline, &state.shader_table)?;
        }
        if bindings && let Some(data) = &state.bindings {
            self.context.bind_bindings(BindPoint::RayTracing, data)?;
        }
        self.pass.enter_ray_tracing(state.clone());
        Ok(())
    }

    /// Flush pending barriers to the context.
    ///
    /// Explicit backends receive contiguous runs of barriers grouped by their
    /// `(source scope, destination scope)` signature, buffers before textures.
    fn commit_barriers(&mut self) -> RhiResult<()> {
        if !self.tracking.has_pending_barriers() {
            return Ok(());
        }
        if self.pass.is_active(ActivePass::Render) {
            self.sink.message(
                Severity::Warning,
                "barriers requested inside a render pass are deferred until it ends",
            );
            return Ok(());
        }

        let buffers = self.tracking.buffer_barriers();
        let textures = self.tracking.texture_barriers();
        self.stats.buffer_barriers += buffers.len();
        self.stats.texture_barriers += textures.len();

        if C::barrier_model() == BarrierModel::Explicit {
            let signature = |before: ResourceState, after: ResourceState| {
                (C::barrier_scope(before, true), C::barrier_scope(after, false))
            };
            let (mut next_buffer, mut next_texture) = (0, 0);
            while next_buffer < buffers.len() || next_texture < textures.len() {
                let key = buffers.get(next_buffer).map_or_else(
                    || signature(textures[next_texture].before, textures[next_texture].after),
                    |barrier| signature(barrier.before, barrier.after),
                );
                let buffer_end = next_buffer
                    + buffers[next_buffer..]
                        .iter()
                        .take_while(|barrier| signature(barrier.before, barrier.after) == key)
                        .count();
                let texture_end = if buffer_end == buffers.len() {
                    next_texture
                        + textures[next_texture..]
                            .iter()
                            .take_while(|barrier| signature(barrier.before, barrier.after) == key)
                            .count()
                } else {
                    next_texture
                };
                let batch = BarrierBatch {
                    src_scope: key.0,
                    dst_scope: key.1,
                    buffers: &buffers[next_buffer..buffer_end],
                    textures: &textures[next_texture..texture_end],
                };
                trace!(
                    target: "rhi::recorder",
                    "barrier batch {:#x} -> {:#x}: {} transitions",
                    batch.src_scope,
                    batch.dst_scope,
                    batch.len()
                );
                self.context.emit_barriers(&batch)?;
                self.stats.barrier_batches += 1;
                next_buffer = buffer_end;
                next_texture = texture_end;
            }
        }
        self.tracking.clear_barriers();
        Ok(())
    }
}

fn scratch_bytes(buffer: &CommandBuffer, slice: crate::scratch::ScratchSlice) -> RhiResult<&[u8]> {
    buffer.scratch().get(slice).ok_or_else(|| {
        RhiError::InvalidArgument(format!(
            "upload data at page {} offset {} is not in this command buffer",
            slice.page, slice.offset
        ))
    })
}
