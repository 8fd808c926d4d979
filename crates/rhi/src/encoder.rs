//! Typed front end that appends records to a command list.
//!
//! Encoding never talks to a device. Errors are sticky: once an append fails, later appends
//! are dropped and [`CommandEncoder::finish`] reports the first failure.

use std::sync::Arc;

use log::debug;

use crate::binding::{BindingCache, BindingData};
use crate::command::{
    AccelerationStructureCopyMode, AccelerationStructureQuery, BeginComputePass,
    BeginRayTracingPass, BeginRenderPass, BuildAccelerationStructure, ClearBuffer,
    ClearTextureDepthStencil, ClearTextureFloat, ClearTextureUint, ConvertCooperativeVectorMatrix,
    CooperativeVectorMatrixDesc, CopyAccelerationStructure, CopyBuffer, CopyTexture,
    CopyTextureToBuffer, DeserializeAccelerationStructure, DispatchCompute,
    DispatchComputeIndirect, DispatchRays, Draw, DrawIndexed, DrawIndexedIndirect, DrawIndirect,
    DrawMeshTasks, EndComputePass, EndRayTracingPass, EndRenderPass, ExecuteCallback,
    GlobalBarrier, InsertDebugMarker, Payload, PopDebugGroup, PushDebugGroup,
    QueryAccelerationStructureProperties, ResolveQuery, SerializeAccelerationStructure,
    SetBufferState, SetComputeState, SetRayTracingState, SetRenderState, SetTextureState,
    UploadBufferData, UploadTextureData, WriteTimestamp,
};
use crate::command_buffer::CommandBuffer;
use crate::command_list::CommandList;
use crate::config::RhiConfig;
use crate::error::{RhiError, RhiResult};
use crate::pass::{BufferOffsetPair, ComputeState, RayTracingState, RenderPassDesc, RenderState};
use crate::resource::{
    AccelerationStructure, Buffer, BufferRange, Extent3d, Offset3d, QueryPool, ResourceState,
    SubresourceRange, Texture,
};
use crate::scratch::{ScratchAllocator, ScratchSlice};

/// Records commands into a fresh [`CommandBuffer`].
///
/// Each method appends exactly one record. Pass encoders borrow the encoder mutably, so
/// out-of-pass commands cannot be interleaved with an open pass.
pub struct CommandEncoder {
    list: CommandList,
    bindings: BindingCache,
    scratch: ScratchAllocator,
    arena_limit: Option<usize>,
    scratch_page_size: usize,
    error: Option<RhiError>,
}

impl CommandEncoder {
    pub fn new() -> Self {
        Self::with_config(&RhiConfig::new())
    }

    pub fn with_config(config: &RhiConfig) -> Self {
        Self {
            list: CommandList::with_limit(config.arena_limit_bytes),
            bindings: BindingCache::new(),
            scratch: ScratchAllocator::new(config.scratch_page_size),
            arena_limit: config.arena_limit_bytes,
            scratch_page_size: config.scratch_page_size,
            error: None,
        }
    }

    /// First append failure, if any.
    #[inline]
    pub const fn error(&self) -> Option<&RhiError> {
        self.error.as_ref()
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.list.len()
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    fn fail(&mut self, err: RhiError) {
        if self.error.is_none() {
            debug!(target: "rhi::encoder", "encoding failed: {err}");
            self.error = Some(err);
        }
    }

    /// Append any payload. The typed helpers below all go through here.
    pub fn push<T: Payload>(&mut self, payload: T) {
        if self.error.is_some() {
            return;
        }
        if let Err(err) = self.list.append(payload) {
            self.fail(err);
        }
    }

    fn stash(&mut self, data: &[u8]) -> Option<ScratchSlice> {
        if self.error.is_some() {
            return None;
        }
        let stored = self
            .list
            .reserve(data.len())
            .and_then(|()| self.scratch.push(data));
        match stored {
            Ok(slice) => Some(slice),
            Err(err) => {
                self.fail(err);
                None
            }
        }
    }

    /// Share one instance per distinct binding bundle within this buffer.
    pub fn resolve_bindings(&mut self, data: BindingData) -> Arc<BindingData> {
        self.bindings.resolve(data)
    }

    pub fn copy_buffer(&mut self, dst: &Buffer, dst_offset: u64, src: &Buffer, src_offset: u64, size: u64) {
        self.push(CopyBuffer {
            dst: dst.clone(),
            dst_offset,
            src: src.clone(),
            src_offset,
            size,
        });
    }

    pub fn copy_texture(&mut self, copy: CopyTexture) {
        self.push(copy);
    }

    pub fn copy_texture_to_buffer(&mut self, copy: CopyTextureToBuffer) {
        self.push(copy);
    }

    /// Zero `range` of `buffer`, or the whole buffer when `range` is `None`.
    pub fn clear_buffer(&mut self, buffer: &Buffer, range: Option<BufferRange>) {
        self.push(ClearBuffer {
            buffer: buffer.clone(),
            range: range.unwrap_or_else(|| buffer.entire()),
        });
    }

    pub fn clear_texture_float(&mut self, texture: &Texture, range: SubresourceRange, value: [f32; 4]) {
        self.push(ClearTextureFloat {
            texture: texture.clone(),
            range,
            value,
        });
    }

    pub fn clear_texture_uint(&mut self, texture: &Texture, range: SubresourceRange, value: [u32; 4]) {
        self.push(ClearTextureUint {
            texture: texture.clone(),
            range,
            value,
        });
    }

    /// Clear depth and/or stencil. `None` leaves that aspect untouched.
    pub fn clear_texture_depth_stencil(
        &mut self,
        texture: &Texture,
        range: SubresourceRange,
        depth: Option<f32>,
        stencil: Option<u8>,
    ) {
        self.push(ClearTextureDepthStencil {
            texture: texture.clone(),
            range,
            clear_depth: depth.is_some(),
            depth: depth.unwrap_or(1.0),
            clear_stencil: stencil.is_some(),
            stencil: stencil.unwrap_or(0),
        });
    }

    /// Copy `data` into scratch memory and record an upload of it into `dst`.
    pub fn upload_texture_data(
        &mut self,
        dst: &Texture,
        range: SubresourceRange,
        offset: Offset3d,
        extent: Extent3d,
        row_pitch: u64,
        data: &[u8],
    ) {
        if let Some(data) = self.stash(data) {
            self.push(UploadTextureData {
                dst: dst.clone(),
                range,
                offset,
                extent,
                row_pitch,
                data,
            });
        }
    }

    pub fn upload_buffer_data(&mut self, dst: &Buffer, offset: u64, data: &[u8]) {
        if let Some(data) = self.stash(data) {
            self.push(UploadBufferData {
                dst: dst.clone(),
                offset,
                data,
            });
        }
    }

    pub fn resolve_query(&mut self, pool: &QueryPool, index: u32, count: u32, buffer: &Buffer, offset: u64) {
        self.push(ResolveQuery {
            pool: pool.clone(),
            index,
            count,
            buffer: buffer.clone(),
            offset,
        });
    }

    pub fn begin_render_pass(&mut self, desc: RenderPassDesc) -> RenderPassEncoder<'_> {
        self.push(BeginRenderPass { desc });
        RenderPassEncoder {
            encoder: self,
            open: true,
        }
    }

    pub fn begin_compute_pass(&mut self) -> ComputePassEncoder<'_> {
        self.push(BeginComputePass);
        ComputePassEncoder {
            encoder: self,
            open: true,
        }
    }

    pub fn begin_ray_tracing_pass(&mut self) -> RayTracingPassEncoder<'_> {
        self.push(BeginRayTracingPass);
        RayTracingPassEncoder {
            encoder: self,
            open: true,
        }
    }

    pub fn build_acceleration_structure(&mut self, build: BuildAccelerationStructure) {
        self.push(build);
    }

    pub fn copy_acceleration_structure(
        &mut self,
        dst: &AccelerationStructure,
        src: &AccelerationStructure,
        mode: AccelerationStructureCopyMode,
    ) {
        self.push(CopyAccelerationStructure {
            dst: dst.clone(),
            src: src.clone(),
            mode,
        });
    }

    pub fn query_acceleration_structure_properties(
        &mut self,
        structures: &[AccelerationStructure],
        queries: Vec<AccelerationStructureQuery>,
    ) {
        self.push(QueryAccelerationStructureProperties {
            structures: structures.to_vec(),
            queries,
        });
    }

    pub fn serialize_acceleration_structure(&mut self, dst: BufferOffsetPair, src: &AccelerationStructure) {
        self.push(SerializeAccelerationStructure {
            dst,
            src: src.clone(),
        });
    }

    pub fn deserialize_acceleration_structure(&mut self, dst: &AccelerationStructure, src: BufferOffsetPair) {
        self.push(DeserializeAccelerationStructure {
            dst: dst.clone(),
            src,
        });
    }

    pub fn convert_cooperative_vector_matrix(
        &mut self,
        dst: &Buffer,
        src: &Buffer,
        matrices: Vec<CooperativeVectorMatrixDesc>,
    ) {
        self.push(ConvertCooperativeVectorMatrix {
            dst: dst.clone(),
            src: src.clone(),
            matrices,
        });
    }

    pub fn set_buffer_state(&mut self, buffer: &Buffer, state: ResourceState) {
        self.push(SetBufferState {
            buffer: buffer.clone(),
            state,
        });
    }

    pub fn set_texture_state(&mut self, texture: &Texture, range: SubresourceRange, state: ResourceState) {
        self.push(SetTextureState {
            texture: texture.clone(),
            range,
            state,
        });
    }

    pub fn global_barrier(&mut self) {
        self.push(GlobalBarrier);
    }

    pub fn push_debug_group(&mut self, name: &str, color: [f32; 3]) {
        self.push(PushDebugGroup {
            name: name.to_owned(),
            color,
        });
    }

    pub fn pop_debug_group(&mut self) {
        self.push(PopDebugGroup);
    }

    pub fn insert_debug_marker(&mut self, name: &str, color: [f32; 3]) {
        self.push(InsertDebugMarker {
            name: name.to_owned(),
            color,
        });
    }

    pub fn write_timestamp(&mut self, pool: &QueryPool, index: u32) {
        self.push(WriteTimestamp {
            pool: pool.clone(),
            index,
        });
    }

    /// Run `callback` on the host when the recorder reaches this point.
    pub fn execute_callback(&mut self, callback: impl Fn() + Send + Sync + 'static) {
        self.push(ExecuteCallback {
            callback: Arc::new(callback),
        });
    }

    /// Hand over everything recorded so far and reset the encoder for reuse.
    ///
    /// # Errors
    /// The first append failure, typically [`RhiError::OutOfMemory`] once the arena budget
    /// was exceeded. The partial recording is discarded.
    pub fn finish(&mut self) -> RhiResult<CommandBuffer> {
        let list = core::mem::replace(&mut self.list, CommandList::with_limit(self.arena_limit));
        let bindings = core::mem::take(&mut self.bindings);
        let scratch = core::mem::replace(&mut self.scratch, ScratchAllocator::new(self.scratch_page_size));
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        debug!(
            target: "rhi::encoder",
            "finished {} commands ({} bytes, {} scratch bytes)",
            list.len(),
            list.bytes_used(),
            scratch.allocated()
        );
        Ok(CommandBuffer::from_parts(list, bindings, scratch))
    }
}

impl Default for CommandEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Records draw-time state and draws. Appends `EndRenderPass` on [`RenderPassEncoder::end`]
/// or when dropped.
pub struct RenderPassEncoder<'enc> {
    encoder: &'enc mut CommandEncoder,
    open: bool,
}

impl RenderPassEncoder<'_> {
    pub fn resolve_bindings(&mut self, data: BindingData) -> Arc<BindingData> {
        self.encoder.resolve_bindings(data)
    }

    pub fn set_render_state(&mut self, state: RenderState) {
        self.encoder.push(SetRenderState { state });
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        self.encoder.push(Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) {
        self.encoder.push(DrawIndexed {
            index_count,
            instance_count,
            first_index,
            base_vertex,
            first_instance,
        });
    }

    /// Up to `max_draw_count` draws read from `args`; `count` optionally caps the number.
    pub fn draw_indirect(&mut self, args: BufferOffsetPair, max_draw_count: u32, count: Option<BufferOffsetPair>) {
        let (count_buffer, count_offset) = split_count(count);
        self.encoder.push(DrawIndirect {
            max_draw_count,
            arg_buffer: args.buffer,
            arg_offset: args.offset,
            count_buffer,
            count_offset,
        });
    }

    pub fn draw_indexed_indirect(
        &mut self,
        args: BufferOffsetPair,
        max_draw_count: u32,
        count: Option<BufferOffsetPair>,
    ) {
        let (count_buffer, count_offset) = split_count(count);
        self.encoder.push(DrawIndexedIndirect {
            max_draw_count,
            arg_buffer: args.buffer,
            arg_offset: args.offset,
            count_buffer,
            count_offset,
        });
    }

    pub fn draw_mesh_tasks(&mut self, x: u32, y: u32, z: u32) {
        self.encoder.push(DrawMeshTasks { x, y, z });
    }

    /// Request a state for the whole pass. Applied before the pass begins.
    pub fn set_buffer_state(&mut self, buffer: &Buffer, state: ResourceState) {
        self.encoder.set_buffer_state(buffer, state);
    }

    pub fn set_texture_state(&mut self, texture: &Texture, range: SubresourceRange, state: ResourceState) {
        self.encoder.set_texture_state(texture, range, state);
    }

    pub fn push_debug_group(&mut self, name: &str, color: [f32; 3]) {
        self.encoder.push_debug_group(name, color);
    }

    pub fn pop_debug_group(&mut self) {
        self.encoder.pop_debug_group();
    }

    pub fn insert_debug_marker(&mut self, name: &str, color: [f32; 3]) {
        self.encoder.insert_debug_marker(name, color);
    }

    pub fn write_timestamp(&mut self, pool: &QueryPool, index: u32) {
        self.encoder.write_timestamp(pool, index);
    }

    pub fn end(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.encoder.push(EndRenderPass);
        }
    }
}

impl Drop for RenderPassEncoder<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

pub struct ComputePassEncoder<'enc> {
    encoder: &'enc mut CommandEncoder,
    open: bool,
}

impl ComputePassEncoder<'_> {
    pub fn resolve_bindings(&mut self, data: BindingData) -> Arc<BindingData> {
        self.encoder.resolve_bindings(data)
    }

    pub fn set_compute_state(&mut self, state: ComputeState) {
        self.encoder.push(SetComputeState { state });
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.encoder.push(DispatchCompute { x, y, z });
    }

    pub fn dispatch_indirect(&mut self, args: &Buffer, offset: u64) {
        self.encoder.push(DispatchComputeIndirect {
            arg_buffer: args.clone(),
            offset,
        });
    }

    pub fn set_buffer_state(&mut self, buffer: &Buffer, state: ResourceState) {
        self.encoder.set_buffer_state(buffer, state);
    }

    pub fn global_barrier(&mut self) {
        self.encoder.global_barrier();
    }

    pub fn push_debug_group(&mut self, name: &str, color: [f32; 3]) {
        self.encoder.push_debug_group(name, color);
    }

    pub fn pop_debug_group(&mut self) {
        self.encoder.pop_debug_group();
    }

    pub fn write_timestamp(&mut self, pool: &QueryPool, index: u32) {
        self.encoder.write_timestamp(pool, index);
    }

    pub fn end(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.encoder.push(EndComputePass);
        }
    }
}

impl Drop for ComputePassEncoder<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

pub struct RayTracingPassEncoder<'enc> {
    encoder: &'enc mut CommandEncoder,
    open: bool,
}

impl RayTracingPassEncoder<'_> {
    pub fn resolve_bindings(&mut self, data: BindingData) -> Arc<BindingData> {
        self.encoder.resolve_bindings(data)
    }

    pub fn set_ray_tracing_state(&mut self, state: RayTracingState) {
        self.encoder.push(SetRayTracingState { state });
    }

    pub fn dispatch_rays(&mut self, ray_gen_index: u32, width: u32, height: u32, depth: u32) {
        self.encoder.push(DispatchRays {
            ray_gen_index,
            width,
            height,
            depth,
        });
    }

    pub fn set_buffer_state(&mut self, buffer: &Buffer, state: ResourceState) {
        self.encoder.set_buffer_state(buffer, state);
    }

    pub fn end(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.encoder.push(EndRayTracingPass);
        }
    }
}

impl Drop for RayTracingPassEncoder<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

fn split_count(count: Option<BufferOffsetPair>) -> (Option<Buffer>, u64) {
    count.map_or((None, 0), |pair| (Some(pair.buffer), pair.offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, CommandId};
    use crate::resource::{BufferDesc, NativeHandle};

    fn ids(buffer: &CommandBuffer) -> Vec<CommandId> {
        buffer.commands().map(Command::id).collect()
    }

    #[test]
    fn dropped_pass_encoder_closes_the_pass() {
        let mut encoder = CommandEncoder::new();
        {
            let mut pass = encoder.begin_compute_pass();
            pass.dispatch(1, 1, 1);
        }
        let mut pass = encoder.begin_render_pass(RenderPassDesc::default());
        pass.draw(3, 1, 0, 0);
        pass.end();
        let buffer = encoder.finish().unwrap();
        assert_eq!(
            ids(&buffer),
            [
                CommandId::BeginComputePass,
                CommandId::DispatchCompute,
                CommandId::EndComputePass,
                CommandId::BeginRenderPass,
                CommandId::Draw,
                CommandId::EndRenderPass,
            ]
        );
    }

    #[test]
    fn clear_without_range_covers_the_buffer() {
        let buffer = Buffer::new(BufferDesc::new(96), NativeHandle::NULL);
        let mut encoder = CommandEncoder::new();
        encoder.clear_buffer(&buffer, None);
        let recorded = encoder.finish().unwrap();
        let Some(Command::ClearBuffer(clear)) = recorded.commands().next() else {
            panic!("expected a clear");
        };
        assert_eq!(clear.range, BufferRange { offset: 0, size: 96 });
    }

    #[test]
    fn uploads_live_in_scratch_memory() {
        let buffer = Buffer::new(BufferDesc::new(4), NativeHandle::NULL);
        let mut encoder = CommandEncoder::new();
        encoder.upload_buffer_data(&buffer, 0, &[9, 8, 7, 6]);
        let recorded = encoder.finish().unwrap();
        let Some(Command::UploadBufferData(upload)) = recorded.commands().next() else {
            panic!("expected an upload");
        };
        assert_eq!(recorded.scratch().get(upload.data), Some(&[9, 8, 7, 6][..]));
    }

    #[test]
    fn identical_bindings_share_one_instance() {
        let buffer = Buffer::new(BufferDesc::new(4), NativeHandle::NULL);
        let mut encoder = CommandEncoder::new();
        let first = encoder.resolve_bindings(
            BindingData::new().with_buffer(&buffer, ResourceState::ShaderResource),
        );
        let second = encoder.resolve_bindings(
            BindingData::new().with_buffer(&buffer, ResourceState::ShaderResource),
        );
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn budget_failure_is_sticky_and_finish_resets() {
        let config = RhiConfig {
            arena_limit_bytes: Some(64),
            ..RhiConfig::new()
        };
        let buffer = Buffer::new(BufferDesc::new(256), NativeHandle::NULL);
        let mut encoder = CommandEncoder::with_config(&config);
        encoder.upload_buffer_data(&buffer, 0, &[0; 128]);
        encoder.global_barrier();
        assert!(matches!(encoder.error(), Some(RhiError::OutOfMemory(_))));
        assert!(matches!(encoder.finish(), Err(RhiError::OutOfMemory(_))));

        assert!(encoder.error().is_none());
        assert!(encoder.is_empty());
    }
}
