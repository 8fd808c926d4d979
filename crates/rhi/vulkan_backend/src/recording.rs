//! Recording context translating engine calls into [`VulkanCommands`].
//!
//! Barriers are grouped by the source and destination stage masks of their states, so each
//! batch the recorder hands over becomes exactly one `vkCmdPipelineBarrier`.

use std::ffi::CString;
use std::sync::Arc;

use ash::vk;
use ash::vk::Handle as _;
use log::trace;
use smallvec::SmallVec;

use rhi::command::{
    AccelerationStructureCopyMode, ClearBuffer, ClearTextureDepthStencil, ClearTextureFloat,
    ClearTextureUint, CopyAccelerationStructure, CopyBuffer, CopyTexture, CopyTextureToBuffer,
    DispatchCompute, DispatchComputeIndirect, DispatchRays, Draw, DrawIndexed,
    DrawIndexedIndirect, DrawIndirect, DrawMeshTasks, QueryAccelerationStructureProperties,
    ResolveQuery, UploadBufferData,
};
use rhi::{
    BarrierBatch, BindPoint, BindingData, Buffer, BufferOffsetPair, CommandId, ComputePipeline,
    IndexFormat, Offset3d, QueryKind, QueryPool, RayTracingPipeline, RecordingContext, RenderPassDesc,
    RenderPipeline, ResourceState, RhiError, RhiResult, ScissorRect, ShaderTable,
    SubresourceRange, Texture, TextureView, Viewport,
};

use crate::commands::{DeviceExtensions, TraceRegions, VulkanCommands};
use crate::device::ShaderTableRegistry;
use crate::translate::{
    access_flags, aspect_mask, image_layout, index_type, load_op, offset, stage_flags,
    stages_from_scope, store_op,
};

/// Largest payload `vkCmdUpdateBuffer` accepts in one call.
pub const MAX_INLINE_UPDATE: usize = 65_536;

const DRAW_STRIDE: u32 = 16;
const DRAW_INDEXED_STRIDE: u32 = 20;
const QUERY_RESULT_STRIDE: u64 = 8;

fn buffer_handle(buffer: &Buffer) -> vk::Buffer {
    vk::Buffer::from_raw(buffer.native().0)
}

fn image_handle(texture: &Texture) -> vk::Image {
    vk::Image::from_raw(texture.native().0)
}

const fn bind_point(point: BindPoint) -> vk::PipelineBindPoint {
    match point {
        BindPoint::Graphics => vk::PipelineBindPoint::GRAPHICS,
        BindPoint::Compute => vk::PipelineBindPoint::COMPUTE,
        BindPoint::RayTracing => vk::PipelineBindPoint::RAY_TRACING_KHR,
    }
}

fn subresource_range(texture: &Texture, range: SubresourceRange) -> vk::ImageSubresourceRange {
    let resolved = range.resolve(texture.desc());
    vk::ImageSubresourceRange {
        aspect_mask: aspect_mask(texture.desc().format),
        base_mip_level: resolved.base_mip,
        level_count: resolved.mip_count,
        base_array_layer: resolved.base_layer,
        layer_count: resolved.layer_count,
    }
}

fn subresource_layers(texture: &Texture, mip: u32, range: SubresourceRange) -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: aspect_mask(texture.desc().format),
        mip_level: mip,
        base_array_layer: range.base_layer,
        layer_count: range.layer_count,
    }
}

fn query_type(kind: QueryKind) -> RhiResult<vk::QueryType> {
    match kind {
        QueryKind::AccelerationStructureCompactedSize => {
            Ok(vk::QueryType::ACCELERATION_STRUCTURE_COMPACTED_SIZE_KHR)
        }
        QueryKind::AccelerationStructureSerializedSize => {
            Ok(vk::QueryType::ACCELERATION_STRUCTURE_SERIALIZATION_SIZE_KHR)
        }
        QueryKind::AccelerationStructureCurrentSize => Ok(vk::QueryType::ACCELERATION_STRUCTURE_SIZE_KHR),
        QueryKind::Timestamp => Err(RhiError::InvalidArgument(
            "timestamp pools cannot hold acceleration structure properties".into(),
        )),
    }
}

fn debug_label(name: &str, color: [f32; 3]) -> RhiResult<CString> {
    trace!(target: "rhi::vulkan", "debug label {name} {color:?}");
    CString::new(name).map_err(|_| RhiError::InvalidArgument(format!("debug label {name:?} contains a NUL byte")))
}

/// One recording session over a native command buffer.
pub struct VulkanRecording<C> {
    commands: C,
    shader_tables: Arc<ShaderTableRegistry>,
    trace_regions: Option<TraceRegions>,
}

impl<C: VulkanCommands> VulkanRecording<C> {
    pub fn new(commands: C, shader_tables: Arc<ShaderTableRegistry>) -> Self {
        Self {
            commands,
            shader_tables,
            trace_regions: None,
        }
    }

    fn has(&self, extension: DeviceExtensions) -> bool {
        self.commands.extensions().contains(extension)
    }

    fn push_label(&mut self, name: &str, color: [f32; 3], insert: bool) -> RhiResult<()> {
        if !self.has(DeviceExtensions::DEBUG_UTILS) {
            return Ok(());
        }
        let text = debug_label(name, color)?;
        let label = vk::DebugUtilsLabelEXT::default()
            .label_name(&text)
            .color([color[0], color[1], color[2], 1.0]);
        if insert {
            self.commands.insert_debug_label(&label);
        } else {
            self.commands.begin_debug_label(&label);
        }
        Ok(())
    }
}

impl<C: VulkanCommands> RecordingContext for VulkanRecording<C> {
    type Output = C;

    fn backend(&self) -> &'static str {
        "vulkan"
    }

    fn supports(&self, id: CommandId) -> bool {
        match id {
            CommandId::UploadTextureData
            | CommandId::BuildAccelerationStructure
            | CommandId::SerializeAccelerationStructure
            | CommandId::DeserializeAccelerationStructure
            | CommandId::ConvertCooperativeVectorMatrix => false,
            CommandId::DrawMeshTasks => self.has(DeviceExtensions::MESH_SHADER),
            CommandId::BeginRayTracingPass
            | CommandId::EndRayTracingPass
            | CommandId::SetRayTracingState
            | CommandId::DispatchRays => self.has(DeviceExtensions::RAY_TRACING_PIPELINE),
            CommandId::CopyAccelerationStructure | CommandId::QueryAccelerationStructureProperties => {
                self.has(DeviceExtensions::ACCELERATION_STRUCTURE)
            }
            CommandId::CopyBuffer
            | CommandId::CopyTexture
            | CommandId::CopyTextureToBuffer
            | CommandId::ClearBuffer
            | CommandId::ClearTextureFloat
            | CommandId::ClearTextureUint
            | CommandId::ClearTextureDepthStencil
            | CommandId::UploadBufferData
            | CommandId::ResolveQuery
            | CommandId::BeginRenderPass
            | CommandId::EndRenderPass
            | CommandId::SetRenderState
            | CommandId::Draw
            | CommandId::DrawIndexed
            | CommandId::DrawIndirect
            | CommandId::DrawIndexedIndirect
            | CommandId::BeginComputePass
            | CommandId::EndComputePass
            | CommandId::SetComputeState
            | CommandId::DispatchCompute
            | CommandId::DispatchComputeIndirect
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

    fn barrier_scope(state: ResourceState, is_source: bool) -> u64 {
        u64::from(stage_flags(state, is_source).as_raw())
    }

    /// Textures returning to `Undefined` are left in their current layout, since
    /// `VK_IMAGE_LAYOUT_UNDEFINED` is not a valid transition target.
    fn emit_barriers(&mut self, batch: &BarrierBatch<'_>) -> RhiResult<()> {
        let buffers: SmallVec<[vk::BufferMemoryBarrier<'static>; 16]> = batch
            .buffers
            .iter()
            .map(|barrier| {
                vk::BufferMemoryBarrier::default()
                    .src_access_mask(access_flags(barrier.before))
                    .dst_access_mask(access_flags(barrier.after))
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .buffer(buffer_handle(&barrier.buffer))
                    .offset(0)
                    .size(vk::WHOLE_SIZE)
            })
            .collect();
        let images: SmallVec<[vk::ImageMemoryBarrier<'static>; 16]> = batch
            .textures
            .iter()
            .filter(|barrier| barrier.after != ResourceState::Undefined)
            .map(|barrier| {
                vk::ImageMemoryBarrier::default()
                    .src_access_mask(access_flags(barrier.before))
                    .dst_access_mask(access_flags(barrier.after))
                    .old_layout(image_layout(barrier.before))
                    .new_layout(image_layout(barrier.after))
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(image_handle(&barrier.texture))
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: aspect_mask(barrier.texture.desc().format),
                        base_mip_level: 0,
                        level_count: vk::REMAINING_MIP_LEVELS,
                        base_array_layer: 0,
                        layer_count: vk::REMAINING_ARRAY_LAYERS,
                    })
            })
            .collect();
        if buffers.is_empty() && images.is_empty() {
            return Ok(());
        }
        let src = stages_from_scope(batch.src_scope)?;
        let dst = stages_from_scope(batch.dst_scope)?;
        trace!(
            target: "rhi::vulkan",
            "vkCmdPipelineBarrier {src:?} -> {dst:?}: {} buffers, {} images",
            buffers.len(),
            images.len()
        );
        self.commands.pipeline_barrier(src, dst, &[], &buffers, &images);
        Ok(())
    }

    fn global_barrier(&mut self) -> RhiResult<()> {
        let barrier = vk::MemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::MEMORY_WRITE)
            .dst_access_mask(vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE);
        self.commands.pipeline_barrier(
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::PipelineStageFlags::ALL_COMMANDS,
            &[barrier],
            &[],
            &[],
        );
        Ok(())
    }

    fn copy_buffer(&mut self, cmd: &CopyBuffer) -> RhiResult<()> {
        let region = vk::BufferCopy {
            src_offset: cmd.src_offset,
            dst_offset: cmd.dst_offset,
            size: cmd.size,
        };
        self.commands
            .copy_buffer(buffer_handle(&cmd.src), buffer_handle(&cmd.dst), &[region]);
        Ok(())
    }

    fn copy_texture(&mut self, cmd: &CopyTexture) -> RhiResult<()> {
        let src_range = cmd.src_subresource.resolve(cmd.src.desc());
        let dst_range = cmd.dst_subresource.resolve(cmd.dst.desc());
        let (src_offset, dst_offset) = (offset(cmd.src_offset)?, offset(cmd.dst_offset)?);
        // `extent` is the base mip's; each following mip copies half as much.
        let regions: SmallVec<[vk::ImageCopy; 4]> = (0..dst_range.mip_count.min(src_range.mip_count))
            .map(|mip| vk::ImageCopy {
                src_subresource: subresource_layers(&cmd.src, src_range.base_mip + mip, src_range),
                src_offset,
                dst_subresource: subresource_layers(&cmd.dst, dst_range.base_mip + mip, dst_range),
                dst_offset,
                extent: vk::Extent3D {
                    width: (cmd.extent.width >> mip).max(1),
                    height: (cmd.extent.height >> mip).max(1),
                    depth: cmd.extent.depth,
                },
            })
            .collect();
        self.commands.copy_image(
            image_handle(&cmd.src),
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            image_handle(&cmd.dst),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &regions,
        );
        Ok(())
    }

    fn copy_texture_to_buffer(&mut self, cmd: &CopyTextureToBuffer) -> RhiResult<()> {
        let desc = cmd.src.desc();
        let range = cmd.src_subresource.resolve(desc);
        let texel_bytes = u64::from(desc.format.bytes_per_texel());
        let row_length = if texel_bytes == 0 { 0 } else { cmd.dst_row_pitch / texel_bytes };
        let region = vk::BufferImageCopy {
            buffer_offset: cmd.dst_offset,
            buffer_row_length: u32::try_from(row_length)
                .map_err(|_| RhiError::InvalidArgument(format!("row pitch {} too large", cmd.dst_row_pitch)))?,
            buffer_image_height: cmd.extent.height,
            image_subresource: subresource_layers(&cmd.src, range.base_mip, range),
            image_offset: offset(cmd.src_offset)?,
            image_extent: vk::Extent3D {
                width: cmd.extent.width,
                height: cmd.extent.height,
                depth: cmd.extent.depth,
            },
        };
        self.commands.copy_image_to_buffer(
            image_handle(&cmd.src),
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            buffer_handle(&cmd.dst),
            &[region],
        );
        Ok(())
    }

    fn clear_buffer(&mut self, cmd: &ClearBuffer) -> RhiResult<()> {
        if cmd.range.offset % 4 != 0 || cmd.range.size % 4 != 0 {
            return Err(RhiError::InvalidArgument(format!(
                "buffer clears need 4-byte alignment, got offset {} size {}",
                cmd.range.offset, cmd.range.size
            )));
        }
        self.commands
            .fill_buffer(buffer_handle(&cmd.buffer), cmd.range.offset, cmd.range.size, 0);
        Ok(())
    }

    fn clear_texture_float(&mut self, cmd: &ClearTextureFloat) -> RhiResult<()> {
        let value = vk::ClearColorValue { float32: cmd.value };
        self.commands.clear_color_image(
            image_handle(&cmd.texture),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &value,
            &[subresource_range(&cmd.texture, cmd.range)],
        );
        Ok(())
    }

    fn clear_texture_uint(&mut self, cmd: &ClearTextureUint) -> RhiResult<()> {
        let value = vk::ClearColorValue { uint32: cmd.value };
        self.commands.clear_color_image(
            image_handle(&cmd.texture),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &value,
            &[subresource_range(&cmd.texture, cmd.range)],
        );
        Ok(())
    }

    fn clear_texture_depth_stencil(&mut self, cmd: &ClearTextureDepthStencil) -> RhiResult<()> {
        let mut range = subresource_range(&cmd.texture, cmd.range);
        let mut aspects = vk::ImageAspectFlags::empty();
        if cmd.clear_depth {
            aspects |= vk::ImageAspectFlags::DEPTH;
        }
        if cmd.clear_stencil && cmd.texture.desc().format.has_stencil() {
            aspects |= vk::ImageAspectFlags::STENCIL;
        }
        if aspects.is_empty() {
            return Ok(());
        }
        range.aspect_mask = aspects;
        let value = vk::ClearDepthStencilValue {
            depth: cmd.depth,
            stencil: u32::from(cmd.stencil),
        };
        self.commands.clear_depth_stencil_image(
            image_handle(&cmd.texture),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &value,
            &[range],
        );
        Ok(())
    }

    /// Inline `vkCmdUpdateBuffer` in chunks of [`MAX_INLINE_UPDATE`] bytes.
    fn upload_buffer_data(&mut self, cmd: &UploadBufferData, data: &[u8]) -> RhiResult<()> {
        if cmd.offset % 4 != 0 || data.len() % 4 != 0 {
            return Err(RhiError::InvalidArgument(format!(
                "inline buffer updates need 4-byte alignment, got offset {} size {}",
                cmd.offset,
                data.len()
            )));
        }
        let dst = buffer_handle(&cmd.dst);
        let mut chunk_offset = cmd.offset;
        for chunk in data.chunks(MAX_INLINE_UPDATE) {
            self.commands.update_buffer(dst, chunk_offset, chunk);
            chunk_offset += chunk.len() as u64;
        }
        Ok(())
    }

    fn resolve_query(&mut self, cmd: &ResolveQuery) -> RhiResult<()> {
        self.commands.copy_query_pool_results(
            vk::QueryPool::from_raw(cmd.pool.native().0),
            cmd.index,
            cmd.count,
            buffer_handle(&cmd.buffer),
            cmd.offset,
            QUERY_RESULT_STRIDE,
            vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
        );
        Ok(())
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDesc) -> RhiResult<()> {
        let colors: SmallVec<[vk::RenderingAttachmentInfo<'static>; 8]> = desc
            .color_attachments
            .iter()
            .map(|attachment| {
                vk::RenderingAttachmentInfo::default()
                    .image_view(vk::ImageView::from_raw(attachment.view.native().0))
                    .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .load_op(load_op(attachment.load_op))
                    .store_op(store_op(attachment.store_op))
                    .clear_value(vk::ClearValue {
                        color: vk::ClearColorValue {
                            float32: attachment.clear_value,
                        },
                    })
            })
            .collect();
        let depth = desc.depth_stencil.as_ref().map(|attachment| {
            let layout = if attachment.depth_read_only {
                vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
            } else {
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
            };
            let clear = vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: attachment.depth_clear_value,
                    stencil: u32::from(attachment.stencil_clear_value),
                },
            };
            let view = vk::ImageView::from_raw(attachment.view.native().0);
            let depth_info = vk::RenderingAttachmentInfo::default()
                .image_view(view)
                .image_layout(layout)
                .load_op(load_op(attachment.depth_load_op))
                .store_op(store_op(attachment.depth_store_op))
                .clear_value(clear);
            let stencil_info = attachment.view.texture().desc().format.has_stencil().then(|| {
                vk::RenderingAttachmentInfo::default()
                    .image_view(view)
                    .image_layout(layout)
                    .load_op(load_op(attachment.stencil_load_op))
                    .store_op(store_op(attachment.stencil_store_op))
                    .clear_value(clear)
            });
            (depth_info, stencil_info)
        });

        let extent = desc
            .color_attachments
            .first()
            .map(|attachment| &attachment.view)
            .or_else(|| desc.depth_stencil.as_ref().map(|attachment| &attachment.view))
            .map_or(vk::Extent2D::default(), |view| {
                let size = view.texture().desc().size;
                let mip = view.range().base_mip;
                vk::Extent2D {
                    width: (size.width >> mip).max(1),
                    height: (size.height >> mip).max(1),
                }
            });
        let mut info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            })
            .layer_count(1)
            .color_attachments(&colors);
        if let Some((depth_info, stencil_info)) = &depth {
            info = info.depth_attachment(depth_info);
            if let Some(stencil) = stencil_info {
                info = info.stencil_attachment(stencil);
            }
        }
        self.commands.begin_rendering(&info);
        Ok(())
    }

    fn end_render_pass(&mut self) -> RhiResult<()> {
        self.commands.end_rendering();
        Ok(())
    }

    fn resolve_texture(&mut self, source: &TextureView, destination: &TextureView) -> RhiResult<()> {
        let src = source.texture();
        let dst = destination.texture();
        let src_range = source.range().resolve(src.desc());
        let dst_range = destination.range().resolve(dst.desc());
        let size = src.desc().size;
        let region = vk::ImageResolve {
            src_subresource: vk::ImageSubresourceLayers {
                layer_count: 1,
                ..subresource_layers(src, src_range.base_mip, src_range)
            },
            src_offset: vk::Offset3D::default(),
            dst_subresource: vk::ImageSubresourceLayers {
                layer_count: 1,
                ..subresource_layers(dst, dst_range.base_mip, dst_range)
            },
            dst_offset: vk::Offset3D::default(),
            extent: vk::Extent3D {
                width: (size.width >> src_range.base_mip).max(1),
                height: (size.height >> src_range.base_mip).max(1),
                depth: 1,
            },
        };
        self.commands.resolve_image(
            image_handle(src),
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            image_handle(dst),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
        );
        Ok(())
    }

    fn bind_render_pipeline(&mut self, pipeline: &RenderPipeline) -> RhiResult<()> {
        self.commands
            .bind_pipeline(vk::PipelineBindPoint::GRAPHICS, vk::Pipeline::from_raw(pipeline.native().0));
        Ok(())
    }

    /// The first native handle is the pipeline layout, the rest are descriptor sets bound from
    /// set zero. Push constants are written at offset zero for every stage.
    fn bind_bindings(&mut self, point: BindPoint, bindings: &BindingData) -> RhiResult<()> {
        let Some((layout, sets)) = bindings.native_handles().split_first() else {
            return Ok(());
        };
        let layout = vk::PipelineLayout::from_raw(layout.0);
        if !sets.is_empty() {
            let sets: SmallVec<[vk::DescriptorSet; 8]> =
                sets.iter().map(|set| vk::DescriptorSet::from_raw(set.0)).collect();
            self.commands.bind_descriptor_sets(bind_point(point), layout, &sets);
        }
        if !bindings.push_constants().is_empty() {
            self.commands
                .push_constants(layout, vk::ShaderStageFlags::ALL, bindings.push_constants());
        }
        Ok(())
    }

    fn set_stencil_reference(&mut self, reference: u32) -> RhiResult<()> {
        self.commands
            .set_stencil_reference(vk::StencilFaceFlags::FRONT_AND_BACK, reference);
        Ok(())
    }

    fn set_vertex_buffers(&mut self, buffers: &[BufferOffsetPair]) -> RhiResult<()> {
        let handles: SmallVec<[vk::Buffer; 8]> = buffers.iter().map(|pair| buffer_handle(&pair.buffer)).collect();
        let offsets: SmallVec<[vk::DeviceSize; 8]> = buffers.iter().map(|pair| pair.offset).collect();
        self.commands.bind_vertex_buffers(&handles, &offsets);
        Ok(())
    }

    fn set_index_buffer(&mut self, buffer: &BufferOffsetPair, format: IndexFormat) -> RhiResult<()> {
        self.commands
            .bind_index_buffer(buffer_handle(&buffer.buffer), buffer.offset, index_type(format));
        Ok(())
    }

    /// Viewports are flipped to a negative height so clip space matches the other backends.
    fn set_viewports(&mut self, viewports: &[Viewport]) -> RhiResult<()> {
        let native: SmallVec<[vk::Viewport; 8]> = viewports
            .iter()
            .map(|viewport| vk::Viewport {
                x: viewport.x,
                y: viewport.y + viewport.height,
                width: viewport.width,
                height: -viewport.height,
                min_depth: viewport.min_depth,
                max_depth: viewport.max_depth,
            })
            .collect();
        self.commands.set_viewport(&native);
        Ok(())
    }

    fn set_scissor_rects(&mut self, rects: &[ScissorRect]) -> RhiResult<()> {
        let native = rects
            .iter()
            .map(|rect| {
                let corner = offset(Offset3d {
                    x: rect.min_x,
                    y: rect.min_y,
                    z: 0,
                })?;
                Ok(vk::Rect2D {
                    offset: vk::Offset2D {
                        x: corner.x,
                        y: corner.y,
                    },
                    extent: vk::Extent2D {
                        width: rect.max_x.saturating_sub(rect.min_x),
                        height: rect.max_y.saturating_sub(rect.min_y),
                    },
                })
            })
            .collect::<RhiResult<SmallVec<[vk::Rect2D; 8]>>>()?;
        self.commands.set_scissor(&native);
        Ok(())
    }

    fn draw(&mut self, cmd: &Draw) -> RhiResult<()> {
        self.commands
            .draw(cmd.vertex_count, cmd.instance_count, cmd.first_vertex, cmd.first_instance);
        Ok(())
    }

    fn draw_indexed(&mut self, cmd: &DrawIndexed) -> RhiResult<()> {
        self.commands.draw_indexed(
            cmd.index_count,
            cmd.instance_count,
            cmd.first_index,
            cmd.base_vertex,
            cmd.first_instance,
        );
        Ok(())
    }

    fn draw_indirect(&mut self, cmd: &DrawIndirect) -> RhiResult<()> {
        self.commands.draw_indirect(
            false,
            buffer_handle(&cmd.arg_buffer),
            cmd.arg_offset,
            cmd.count_buffer
                .as_ref()
                .map(|count| (buffer_handle(count), cmd.count_offset)),
            cmd.max_draw_count,
            DRAW_STRIDE,
        );
        Ok(())
    }

    fn draw_indexed_indirect(&mut self, cmd: &DrawIndexedIndirect) -> RhiResult<()> {
        self.commands.draw_indirect(
            true,
            buffer_handle(&cmd.arg_buffer),
            cmd.arg_offset,
            cmd.count_buffer
                .as_ref()
                .map(|count| (buffer_handle(count), cmd.count_offset)),
            cmd.max_draw_count,
            DRAW_INDEXED_STRIDE,
        );
        Ok(())
    }

    fn draw_mesh_tasks(&mut self, cmd: &DrawMeshTasks) -> RhiResult<()> {
        self.commands.draw_mesh_tasks(cmd.x, cmd.y, cmd.z);
        Ok(())
    }

    fn bind_compute_pipeline(&mut self, pipeline: &ComputePipeline) -> RhiResult<()> {
        self.commands
            .bind_pipeline(vk::PipelineBindPoint::COMPUTE, vk::Pipeline::from_raw(pipeline.native().0));
        Ok(())
    }

    fn dispatch_compute(&mut self, cmd: &DispatchCompute) -> RhiResult<()> {
        self.commands.dispatch(cmd.x, cmd.y, cmd.z);
        Ok(())
    }

    fn dispatch_compute_indirect(&mut self, cmd: &DispatchComputeIndirect) -> RhiResult<()> {
        self.commands
            .dispatch_indirect(buffer_handle(&cmd.arg_buffer), cmd.offset);
        Ok(())
    }

    fn end_ray_tracing_pass(&mut self) -> RhiResult<()> {
        self.trace_regions = None;
        Ok(())
    }

    fn bind_ray_tracing_pipeline(
        &mut self,
        pipeline: &RayTracingPipeline,
        shader_table: &ShaderTable,
    ) -> RhiResult<()> {
        let regions = self.shader_tables.get(shader_table).ok_or_else(|| {
            RhiError::InvalidArgument(format!(
                "shader table {} has no registered regions",
                shader_table.id()
            ))
        })?;
        self.commands.bind_pipeline(
            vk::PipelineBindPoint::RAY_TRACING_KHR,
            vk::Pipeline::from_raw(pipeline.native().0),
        );
        self.trace_regions = Some(regions);
        Ok(())
    }

    /// The ray-generation record is picked out of the raygen region by index.
    fn dispatch_rays(&mut self, cmd: &DispatchRays) -> RhiResult<()> {
        let Some(mut regions) = self.trace_regions else {
            return Ok(());
        };
        let stride = regions.raygen.stride;
        regions.raygen.device_address += u64::from(cmd.ray_gen_index) * stride;
        regions.raygen.size = stride;
        self.commands
            .trace_rays(&regions, cmd.width, cmd.height, cmd.depth);
        Ok(())
    }

    fn copy_acceleration_structure(&mut self, cmd: &CopyAccelerationStructure) -> RhiResult<()> {
        let mode = match cmd.mode {
            AccelerationStructureCopyMode::Clone => vk::CopyAccelerationStructureModeKHR::CLONE,
            AccelerationStructureCopyMode::Compact => vk::CopyAccelerationStructureModeKHR::COMPACT,
        };
        let info = vk::CopyAccelerationStructureInfoKHR::default()
            .src(vk::AccelerationStructureKHR::from_raw(cmd.src.native().0))
            .dst(vk::AccelerationStructureKHR::from_raw(cmd.dst.native().0))
            .mode(mode);
        self.commands.copy_acceleration_structure(&info);
        Ok(())
    }

    fn query_acceleration_structure_properties(
        &mut self,
        cmd: &QueryAccelerationStructureProperties,
    ) -> RhiResult<()> {
        let structures: SmallVec<[vk::AccelerationStructureKHR; 8]> = cmd
            .structures
            .iter()
            .map(|structure| vk::AccelerationStructureKHR::from_raw(structure.native().0))
            .collect();
        for query in &cmd.queries {
            self.commands.write_acceleration_structures_properties(
                &structures,
                query_type(query.kind)?,
                vk::QueryPool::from_raw(query.pool.native().0),
                query.first_index,
            );
        }
        Ok(())
    }

    fn push_debug_group(&mut self, name: &str, color: [f32; 3]) -> RhiResult<()> {
        self.push_label(name, color, false)
    }

    fn pop_debug_group(&mut self) -> RhiResult<()> {
        if self.has(DeviceExtensions::DEBUG_UTILS) {
            self.commands.end_debug_label();
        }
        Ok(())
    }

    fn insert_debug_marker(&mut self, name: &str, color: [f32; 3]) -> RhiResult<()> {
        self.push_label(name, color, true)
    }

    fn write_timestamp(&mut self, pool: &QueryPool, index: u32) -> RhiResult<()> {
        self.commands.write_timestamp(
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            vk::QueryPool::from_raw(pool.native().0),
            index,
        );
        Ok(())
    }

    fn finish(mut self) -> RhiResult<C> {
        self.commands.end()?;
        Ok(self.commands)
    }
}
