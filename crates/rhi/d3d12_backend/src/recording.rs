//! Recording context translating engine calls into a [`GraphicsCommandList`].

use log::trace;
use smallvec::SmallVec;

use rhi::command::{
    AccelerationStructureCopyMode as CopyMode, BuildAccelerationStructure,
    CopyAccelerationStructure, CopyBuffer, CopyTexture, CopyTextureToBuffer,
    DeserializeAccelerationStructure, DispatchCompute, DispatchComputeIndirect, DispatchRays,
    Draw, DrawIndexed, DrawIndexedIndirect, DrawIndirect, DrawMeshTasks,
    QueryAccelerationStructureProperties, ResolveQuery, SerializeAccelerationStructure,
};
use rhi::{
    AccelerationStructure, BarrierBatch, BindPoint, BindingData, BufferOffsetPair, CommandId,
    ComputePipeline, IndexFormat, LoadOp, NativeHandle, Offset3d, QueryPool, RayTracingPipeline,
    RecordingContext, RenderPassDesc, RenderPipeline, ResourceState, RhiResult, ScissorRect,
    ShaderTable, TextureDesc, TextureView, Viewport,
};

use crate::command_list::{
    ALL_SUBRESOURCES, AccelerationStructureCopyMode, ClearFlags, DispatchRaysDesc,
    GpuVirtualAddress, GraphicsCommandList, IndirectSignature, ResourceBarrier,
    TextureCopyLocation, pix_color,
};
use crate::states::ResourceStates;

/// `D3D12CalcSubresource` for plane 0.
const fn subresource_index(desc: &TextureDesc, mip: u32, layer: u32) -> u32 {
    mip + layer * desc.mip_count
}

fn address(pair: &BufferOffsetPair) -> GpuVirtualAddress {
    GpuVirtualAddress::new(pair.buffer.native(), pair.offset)
}

/// Native barrier for one engine transition, or `None` when both sides share a native state.
pub fn translate_barrier(
    resource: NativeHandle,
    before: ResourceState,
    after: ResourceState,
) -> Option<ResourceBarrier> {
    if before == ResourceState::UnorderedAccess && after == ResourceState::UnorderedAccess {
        return Some(ResourceBarrier::Uav {
            resource: Some(resource),
        });
    }
    let (before, after) = (ResourceStates::from_state(before), ResourceStates::from_state(after));
    (before != after).then_some(ResourceBarrier::Transition {
        resource,
        subresource: ALL_SUBRESOURCES,
        before,
        after,
    })
}

/// One recording session over a native list.
pub struct D3d12Recording<L> {
    list: L,
    shader_table: Option<NativeHandle>,
}

impl<L: GraphicsCommandList> D3d12Recording<L> {
    pub const fn new(list: L) -> Self {
        Self {
            list,
            shader_table: None,
        }
    }
}

impl<L: GraphicsCommandList> RecordingContext for D3d12Recording<L> {
    type Output = L;

    fn backend(&self) -> &'static str {
        "d3d12"
    }

    fn supports(&self, id: CommandId) -> bool {
        match id {
            CommandId::ClearBuffer
            | CommandId::ClearTextureFloat
            | CommandId::ClearTextureUint
            | CommandId::ClearTextureDepthStencil
            | CommandId::UploadTextureData
            | CommandId::UploadBufferData
            | CommandId::ConvertCooperativeVectorMatrix => false,
            CommandId::CopyBuffer
            | CommandId::CopyTexture
            | CommandId::CopyTextureToBuffer
            | CommandId::ResolveQuery
            | CommandId::BeginRenderPass
            | CommandId::EndRenderPass
            | CommandId::SetRenderState
            | CommandId::Draw
            | CommandId::DrawIndexed
            | CommandId::DrawIndirect
            | CommandId::DrawIndexedIndirect
            | CommandId::DrawMeshTasks
            | CommandId::BeginComputePass
            | CommandId::EndComputePass
            | CommandId::SetComputeState
            | CommandId::DispatchCompute
            | CommandId::DispatchComputeIndirect
            | CommandId::BeginRayTracingPass
            | CommandId::EndRayTracingPass
            | CommandId::SetRayTracingState
            | CommandId::DispatchRays
            | CommandId::BuildAccelerationStructure
            | CommandId::CopyAccelerationStructure
            | CommandId::QueryAccelerationStructureProperties
            | CommandId::SerializeAccelerationStructure
            | CommandId::DeserializeAccelerationStructure
            | CommandId::SetBufferState
            | CommandId::SetTextureState
            | CommandId::GlobalBarrier
            | CommandId::PushDebugGroup
            | CommandId::PopDebugGroup
            | CommandId::InsertDebugMarker
            | CommandId::WriteTimestamp
            | CommandId::ExecuteCallback => true,
        }
    }

    /// Every pending transition of a commit goes out in a single `ResourceBarrier` call, so all
    /// states share one scope.
    fn emit_barriers(&mut self, batch: &BarrierBatch<'_>) -> RhiResult<()> {
        let buffers = batch
            .buffers
            .iter()
            .filter_map(|barrier| translate_barrier(barrier.buffer.native(), barrier.before, barrier.after));
        let textures = batch
            .textures
            .iter()
            .filter_map(|barrier| translate_barrier(barrier.texture.native(), barrier.before, barrier.after));
        let barriers: SmallVec<[ResourceBarrier; 16]> = buffers.chain(textures).collect();
        if !barriers.is_empty() {
            trace!(target: "rhi::d3d12", "ResourceBarrier x{}", barriers.len());
            self.list.resource_barrier(&barriers);
        }
        Ok(())
    }

    fn global_barrier(&mut self) -> RhiResult<()> {
        self.list.resource_barrier(&[ResourceBarrier::Uav { resource: None }]);
        Ok(())
    }

    fn copy_buffer(&mut self, cmd: &CopyBuffer) -> RhiResult<()> {
        self.list.copy_buffer_region(
            cmd.dst.native(),
            cmd.dst_offset,
            cmd.src.native(),
            cmd.src_offset,
            cmd.size,
        );
        Ok(())
    }

    fn copy_texture(&mut self, cmd: &CopyTexture) -> RhiResult<()> {
        let dst_desc = cmd.dst.desc();
        let src_desc = cmd.src.desc();
        let dst_range = cmd.dst_subresource.resolve(dst_desc);
        let src_range = cmd.src_subresource.resolve(src_desc);
        for layer in 0..dst_range.layer_count {
            for mip in 0..dst_range.mip_count {
                let dst = TextureCopyLocation::SubresourceIndex {
                    resource: cmd.dst.native(),
                    index: subresource_index(dst_desc, dst_range.base_mip + mip, dst_range.base_layer + layer),
                };
                let src = TextureCopyLocation::SubresourceIndex {
                    resource: cmd.src.native(),
                    index: subresource_index(src_desc, src_range.base_mip + mip, src_range.base_layer + layer),
                };
                self.list
                    .copy_texture_region(&dst, cmd.dst_offset, &src, cmd.src_offset, cmd.extent);
            }
        }
        Ok(())
    }

    fn copy_texture_to_buffer(&mut self, cmd: &CopyTextureToBuffer) -> RhiResult<()> {
        let desc = cmd.src.desc();
        let range = cmd.src_subresource.resolve(desc);
        let layer_bytes =
            cmd.dst_row_pitch * u64::from(cmd.extent.height) * u64::from(cmd.extent.depth);
        for layer in 0..range.layer_count {
            let dst = TextureCopyLocation::PlacedFootprint {
                resource: cmd.dst.native(),
                offset: cmd.dst_offset + u64::from(layer) * layer_bytes,
                format: desc.format,
                extent: cmd.extent,
                row_pitch: cmd.dst_row_pitch as u32,
            };
            let src = TextureCopyLocation::SubresourceIndex {
                resource: cmd.src.native(),
                index: subresource_index(desc, range.base_mip, range.base_layer + layer),
            };
            self.list
                .copy_texture_region(&dst, Offset3d::default(), &src, cmd.src_offset, cmd.extent);
        }
        Ok(())
    }

    fn resolve_query(&mut self, cmd: &ResolveQuery) -> RhiResult<()> {
        self.list.resolve_query_data(
            cmd.pool.native(),
            cmd.pool.kind(),
            cmd.index,
            cmd.count,
            cmd.buffer.native(),
            cmd.offset,
        );
        Ok(())
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDesc) -> RhiResult<()> {
        let targets: SmallVec<[NativeHandle; 8]> = desc
            .color_attachments
            .iter()
            .map(|attachment| attachment.view.native())
            .collect();
        let depth = desc.depth_stencil.as_ref().map(|attachment| attachment.view.native());
        self.list.om_set_render_targets(&targets, depth);

        for attachment in &desc.color_attachments {
            if attachment.load_op == LoadOp::Clear {
                self.list
                    .clear_render_target_view(attachment.view.native(), attachment.clear_value);
            }
        }
        if let Some(attachment) = &desc.depth_stencil {
            let mut flags = ClearFlags::empty();
            if attachment.depth_load_op == LoadOp::Clear {
                flags |= ClearFlags::DEPTH;
            }
            if attachment.stencil_load_op == LoadOp::Clear
                && attachment.view.texture().desc().format.has_stencil()
            {
                flags |= ClearFlags::STENCIL;
            }
            if !flags.is_empty() {
                self.list.clear_depth_stencil_view(
                    attachment.view.native(),
                    flags,
                    attachment.depth_clear_value,
                    attachment.stencil_clear_value,
                );
            }
        }
        Ok(())
    }

    fn end_render_pass(&mut self) -> RhiResult<()> {
        Ok(())
    }

    fn resolve_texture(&mut self, source: &TextureView, destination: &TextureView) -> RhiResult<()> {
        let src = source.texture();
        let dst = destination.texture();
        let src_range = source.range().resolve(src.desc());
        let dst_range = destination.range().resolve(dst.desc());
        self.list.resolve_subresource(
            dst.native(),
            subresource_index(dst.desc(), dst_range.base_mip, dst_range.base_layer),
            src.native(),
            subresource_index(src.desc(), src_range.base_mip, src_range.base_layer),
            src.desc().format,
        );
        Ok(())
    }

    fn bind_render_pipeline(&mut self, pipeline: &RenderPipeline) -> RhiResult<()> {
        self.list.set_pipeline_state(BindPoint::Graphics, pipeline.native());
        Ok(())
    }

    fn bind_bindings(&mut self, point: BindPoint, bindings: &BindingData) -> RhiResult<()> {
        self.list.set_descriptor_tables(point, bindings.native_handles());
        if !bindings.push_constants().is_empty() {
            self.list.set_root_constants(point, bindings.push_constants());
        }
        Ok(())
    }

    fn set_stencil_reference(&mut self, reference: u32) -> RhiResult<()> {
        self.list.om_set_stencil_ref(reference);
        Ok(())
    }

    fn set_vertex_buffers(&mut self, buffers: &[BufferOffsetPair]) -> RhiResult<()> {
        let views: SmallVec<[GpuVirtualAddress; 8]> = buffers.iter().map(address).collect();
        self.list.ia_set_vertex_buffers(&views);
        Ok(())
    }

    fn set_index_buffer(&mut self, buffer: &BufferOffsetPair, format: IndexFormat) -> RhiResult<()> {
        self.list.ia_set_index_buffer(address(buffer), format);
        Ok(())
    }

    fn set_viewports(&mut self, viewports: &[Viewport]) -> RhiResult<()> {
        self.list.rs_set_viewports(viewports);
        Ok(())
    }

    fn set_scissor_rects(&mut self, rects: &[ScissorRect]) -> RhiResult<()> {
        self.list.rs_set_scissor_rects(rects);
        Ok(())
    }

    fn draw(&mut self, cmd: &Draw) -> RhiResult<()> {
        self.list.draw_instanced(
            cmd.vertex_count,
            cmd.instance_count,
            cmd.first_vertex,
            cmd.first_instance,
        );
        Ok(())
    }

    fn draw_indexed(&mut self, cmd: &DrawIndexed) -> RhiResult<()> {
        self.list.draw_indexed_instanced(
            cmd.index_count,
            cmd.instance_count,
            cmd.first_index,
            cmd.base_vertex,
            cmd.first_instance,
        );
        Ok(())
    }

    fn draw_indirect(&mut self, cmd: &DrawIndirect) -> RhiResult<()> {
        self.list.execute_indirect(
            IndirectSignature::Draw,
            cmd.max_draw_count,
            GpuVirtualAddress::new(cmd.arg_buffer.native(), cmd.arg_offset),
            cmd.count_buffer
                .as_ref()
                .map(|count| GpuVirtualAddress::new(count.native(), cmd.count_offset)),
        );
        Ok(())
    }

    fn draw_indexed_indirect(&mut self, cmd: &DrawIndexedIndirect) -> RhiResult<()> {
        self.list.execute_indirect(
            IndirectSignature::DrawIndexed,
            cmd.max_draw_count,
            GpuVirtualAddress::new(cmd.arg_buffer.native(), cmd.arg_offset),
            cmd.count_buffer
                .as_ref()
                .map(|count| GpuVirtualAddress::new(count.native(), cmd.count_offset)),
        );
        Ok(())
    }

    fn draw_mesh_tasks(&mut self, cmd: &DrawMeshTasks) -> RhiResult<()> {
        self.list.dispatch_mesh(cmd.x, cmd.y, cmd.z);
        Ok(())
    }

    fn bind_compute_pipeline(&mut self, pipeline: &ComputePipeline) -> RhiResult<()> {
        self.list.set_pipeline_state(BindPoint::Compute, pipeline.native());
        Ok(())
    }

    fn dispatch_compute(&mut self, cmd: &DispatchCompute) -> RhiResult<()> {
        self.list.dispatch(cmd.x, cmd.y, cmd.z);
        Ok(())
    }

    fn dispatch_compute_indirect(&mut self, cmd: &DispatchComputeIndirect) -> RhiResult<()> {
        self.list.execute_indirect(
            IndirectSignature::Dispatch,
            1,
            GpuVirtualAddress::new(cmd.arg_buffer.native(), cmd.offset),
            None,
        );
        Ok(())
    }

    fn end_ray_tracing_pass(&mut self) -> RhiResult<()> {
        self.shader_table = None;
        Ok(())
    }

    fn bind_ray_tracing_pipeline(
        &mut self,
        pipeline: &RayTracingPipeline,
        shader_table: &ShaderTable,
    ) -> RhiResult<()> {
        self.list.set_pipeline_state(BindPoint::RayTracing, pipeline.native());
        self.shader_table = Some(shader_table.native());
        Ok(())
    }

    fn dispatch_rays(&mut self, cmd: &DispatchRays) -> RhiResult<()> {
        let Some(shader_table) = self.shader_table else {
            return Ok(());
        };
        self.list.dispatch_rays(&DispatchRaysDesc {
            shader_table,
            ray_gen_index: cmd.ray_gen_index,
            width: cmd.width,
            height: cmd.height,
            depth: cmd.depth,
        });
        Ok(())
    }

    fn build_acceleration_structure(&mut self, cmd: &BuildAccelerationStructure) -> RhiResult<()> {
        let inputs: SmallVec<[GpuVirtualAddress; 4]> = cmd.inputs.iter().map(address).collect();
        self.list.build_raytracing_acceleration_structure(
            cmd.dst.native(),
            cmd.src.as_ref().map(AccelerationStructure::native),
            address(&cmd.scratch),
            &inputs,
        );
        for query in &cmd.queries {
            self.list.emit_raytracing_acceleration_structure_postbuild_info(
                cmd.dst.native(),
                query.kind,
                query.pool.native(),
                query.first_index,
            );
        }
        Ok(())
    }

    fn copy_acceleration_structure(&mut self, cmd: &CopyAccelerationStructure) -> RhiResult<()> {
        let mode = match cmd.mode {
            CopyMode::Clone => AccelerationStructureCopyMode::Clone,
            CopyMode::Compact => AccelerationStructureCopyMode::Compact,
        };
        self.list.copy_raytracing_acceleration_structure(
            GpuVirtualAddress::new(cmd.dst.native(), 0),
            GpuVirtualAddress::new(cmd.src.native(), 0),
            mode,
        );
        Ok(())
    }

    fn query_acceleration_structure_properties(
        &mut self,
        cmd: &QueryAccelerationStructureProperties,
    ) -> RhiResult<()> {
        for query in &cmd.queries {
            for (slot, structure) in (query.first_index..).zip(&cmd.structures) {
                self.list.emit_raytracing_acceleration_structure_postbuild_info(
                    structure.native(),
                    query.kind,
                    query.pool.native(),
                    slot,
                );
            }
        }
        Ok(())
    }

    fn serialize_acceleration_structure(
        &mut self,
        cmd: &SerializeAccelerationStructure,
    ) -> RhiResult<()> {
        self.list.copy_raytracing_acceleration_structure(
            address(&cmd.dst),
            GpuVirtualAddress::new(cmd.src.native(), 0),
            AccelerationStructureCopyMode::Serialize,
        );
        Ok(())
    }

    fn deserialize_acceleration_structure(
        &mut self,
        cmd: &DeserializeAccelerationStructure,
    ) -> RhiResult<()> {
        self.list.copy_raytracing_acceleration_structure(
            GpuVirtualAddress::new(cmd.dst.native(), 0),
            address(&cmd.src),
            AccelerationStructureCopyMode::Deserialize,
        );
        Ok(())
    }

    fn push_debug_group(&mut self, name: &str, color: [f32; 3]) -> RhiResult<()> {
        self.list.begin_event(name, pix_color(color));
        Ok(())
    }

    fn pop_debug_group(&mut self) -> RhiResult<()> {
        self.list.end_event();
        Ok(())
    }

    fn insert_debug_marker(&mut self, name: &str, color: [f32; 3]) -> RhiResult<()> {
        self.list.set_marker(name, pix_color(color));
        Ok(())
    }

    fn write_timestamp(&mut self, pool: &QueryPool, index: u32) -> RhiResult<()> {
        self.list.end_query(pool.native(), index);
        Ok(())
    }

    fn finish(mut self) -> RhiResult<L> {
        self.list.close()?;
        Ok(self.list)
    }
}
