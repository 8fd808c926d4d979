//! Recording context replaying engine commands onto a `wgpu::CommandEncoder`.
//!
//! wgpu tracks resource usage itself, so barriers are counted by the recorder but never
//! emitted. Open passes are held with their encoder lifetime forgotten, which lets one
//! recording move between the pass and the encoder as the engine's pass commands arrive.

use std::sync::Arc;

use log::{debug, trace};
use rhi::command::{
    ClearBuffer, ClearTextureDepthStencil, ClearTextureFloat, ClearTextureUint, CopyBuffer,
    CopyTexture, CopyTextureToBuffer, DispatchCompute, DispatchComputeIndirect, Draw,
    DrawIndexed, DrawIndexedIndirect, DrawIndirect, ResolveQuery, UploadBufferData,
    UploadTextureData,
};
use rhi::{
    BarrierModel, BindPoint, BindingData, Buffer, BufferOffsetPair, CommandId, ComputePipeline,
    IndexFormat, QueryPool, RecordingContext, RenderPassDesc, RenderPipeline, RhiError,
    RhiResult, ScissorRect, SubresourceRange, Texture, TextureKind, TextureView, Viewport,
};
use wgpu::util::{BufferInitDescriptor, DeviceExt as _};
use wgpu::{
    BufferUsages, Color, CommandEncoder, CommandEncoderDescriptor, ComputePass,
    ComputePassDescriptor, Features, Operations, RenderPass, RenderPassColorAttachment,
    RenderPassDepthStencilAttachment, RenderPassDescriptor, ShaderStages, TexelCopyBufferInfo,
    TexelCopyBufferLayout, TexelCopyTextureInfo, TextureViewDescriptor, TextureViewDimension,
};

use crate::error::{native, with_validation_scope};
use crate::resources::WgpuResources;
use crate::translate::{
    aligned_row_pitch, color, copy_aspect, extent, index_format, load_op, origin, repack_rows,
    store_op, uint_color,
};

/// `copy_buffer_to_buffer` sizes and offsets must be multiples of this.
const COPY_ALIGNMENT: u64 = wgpu::COPY_BUFFER_ALIGNMENT;

enum ActivePass {
    None,
    Render(RenderPass<'static>),
    Compute(ComputePass<'static>),
}

/// Origin of a copy into `layer` of a 2D array or cube, or a plain offset for 3D textures.
fn layered_origin(texture: &Texture, offset: rhi::Offset3d, layer: u32) -> wgpu::Origin3d {
    let mut native = origin(offset);
    if texture.desc().kind != TextureKind::Texture3D {
        native.z += layer;
    }
    native
}

fn mip_extent(size: rhi::Extent3d, mip: u32) -> rhi::Extent3d {
    rhi::Extent3d::new(
        (size.width >> mip).max(1),
        (size.height >> mip).max(1),
        size.depth.max(1),
    )
}

pub struct WgpuRecording {
    device: wgpu::Device,
    resources: Arc<WgpuResources>,
    encoder: CommandEncoder,
    pass: ActivePass,
}

impl WgpuRecording {
    pub fn new(device: wgpu::Device, resources: Arc<WgpuResources>) -> Self {
        let encoder = device.create_command_encoder(&CommandEncoderDescriptor {
            label: Some("rhi-recording"),
        });
        Self {
            device,
            resources,
            encoder,
            pass: ActivePass::None,
        }
    }

    fn features(&self) -> Features {
        self.device.features()
    }

    /// The encoder, as long as no pass holds it.
    fn encoder(&mut self, id: CommandId) -> RhiResult<&mut CommandEncoder> {
        match self.pass {
            ActivePass::None => Ok(&mut self.encoder),
            ActivePass::Render(_) | ActivePass::Compute(_) => Err(RhiError::InvalidArgument(format!(
                "{id} cannot be recorded while a pass is open"
            ))),
        }
    }

    fn render_pass(&mut self, id: CommandId) -> RhiResult<&mut RenderPass<'static>> {
        match &mut self.pass {
            ActivePass::Render(pass) => Ok(pass),
            ActivePass::Compute(_) | ActivePass::None => Err(RhiError::InvalidArgument(format!(
                "{id} recorded outside a render pass"
            ))),
        }
    }

    fn compute_pass(&mut self, id: CommandId) -> RhiResult<&mut ComputePass<'static>> {
        match &mut self.pass {
            ActivePass::Compute(pass) => Ok(pass),
            ActivePass::Render(_) | ActivePass::None => Err(RhiError::InvalidArgument(format!(
                "{id} recorded outside a compute pass"
            ))),
        }
    }

    fn staging(&self, contents: &[u8]) -> wgpu::Buffer {
        self.device.create_buffer_init(&BufferInitDescriptor {
            label: Some("rhi-upload"),
            contents,
            usage: BufferUsages::COPY_SRC,
        })
    }

    /// Clears run as one load-and-store render pass per mip and layer.
    fn clear_color(&mut self, id: CommandId, texture: &Texture, range: SubresourceRange, clear: Color) -> RhiResult<()> {
        if texture.desc().kind == TextureKind::Texture3D {
            return Err(RhiError::Unsupported(id));
        }
        let native = self.resources.texture(texture)?;
        let range = range.resolve(texture.desc());
        let encoder = self.encoder(id)?;
        for mip in range.base_mip..range.base_mip + range.mip_count {
            for layer in range.base_layer..range.base_layer + range.layer_count {
                let view = native.create_view(&TextureViewDescriptor {
                    dimension: Some(TextureViewDimension::D2),
                    base_mip_level: mip,
                    mip_level_count: Some(1),
                    base_array_layer: layer,
                    array_layer_count: Some(1),
                    ..TextureViewDescriptor::default()
                });
                drop(encoder.begin_render_pass(&RenderPassDescriptor {
                    label: Some("rhi-clear"),
                    color_attachments: &[Some(RenderPassColorAttachment {
                        view: &view,
                        depth_slice: None,
                        resolve_target: None,
                        ops: Operations {
                            load: wgpu::LoadOp::Clear(clear),
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                }));
            }
        }
        Ok(())
    }

    fn draw_indirect_args(
        &mut self,
        id: CommandId,
        indexed: bool,
        args: &BufferOffsetPair,
        count: Option<&BufferOffsetPair>,
        max_draw_count: u32,
    ) -> RhiResult<()> {
        let arg_buffer = self.resources.buffer(&args.buffer)?;
        let count_buffer = count
            .map(|pair| self.resources.buffer(&pair.buffer).map(|native| (native, pair.offset)))
            .transpose()?;
        if count_buffer.is_some() && !self.features().contains(Features::MULTI_DRAW_INDIRECT_COUNT) {
            return Err(RhiError::Unsupported(id));
        }
        let pass = self.render_pass(id)?;
        match (count_buffer, indexed) {
            (Some((count, offset)), false) => {
                pass.multi_draw_indirect_count(&arg_buffer, args.offset, &count, offset, max_draw_count);
            }
            (Some((count, offset)), true) => {
                pass.multi_draw_indexed_indirect_count(&arg_buffer, args.offset, &count, offset, max_draw_count);
            }
            (None, false) if max_draw_count == 1 => pass.draw_indirect(&arg_buffer, args.offset),
            (None, true) if max_draw_count == 1 => pass.draw_indexed_indirect(&arg_buffer, args.offset),
            (None, false) => pass.multi_draw_indirect(&arg_buffer, args.offset, max_draw_count),
            (None, true) => pass.multi_draw_indexed_indirect(&arg_buffer, args.offset, max_draw_count),
        }
        Ok(())
    }
}

impl RecordingContext for WgpuRecording {
    type Output = wgpu::CommandBuffer;

    fn backend(&self) -> &'static str {
        "wgpu"
    }

    fn supports(&self, id: CommandId) -> bool {
        match id {
            CommandId::WriteTimestamp => self.features().contains(Features::TIMESTAMP_QUERY_INSIDE_ENCODERS),
            CommandId::ResolveQuery => self.features().contains(Features::TIMESTAMP_QUERY),
            CommandId::DrawMeshTasks
            | CommandId::BeginRayTracingPass
            | CommandId::EndRayTracingPass
            | CommandId::SetRayTracingState
            | CommandId::DispatchRays
            | CommandId::BuildAccelerationStructure
            | CommandId::CopyAccelerationStructure
            | CommandId::QueryAccelerationStructureProperties
            | CommandId::SerializeAccelerationStructure
            | CommandId::DeserializeAccelerationStructure
            | CommandId::ConvertCooperativeVectorMatrix => false,
            CommandId::CopyBuffer
            | CommandId::CopyTexture
            | CommandId::CopyTextureToBuffer
            | CommandId::ClearBuffer
            | CommandId::ClearTextureFloat
            | CommandId::ClearTextureUint
            | CommandId::ClearTextureDepthStencil
            | CommandId::UploadTextureData
            | CommandId::UploadBufferData
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
            | CommandId::ExecuteCallback => true,
        }
    }

    fn barrier_model() -> BarrierModel {
        BarrierModel::Implicit
    }

    fn global_barrier(&mut self) -> RhiResult<()> {
        trace!(target: "wgpu_backend", "global barrier left to wgpu's own tracking");
        Ok(())
    }

    fn copy_buffer(&mut self, cmd: &CopyBuffer) -> RhiResult<()> {
        let src = self.resources.buffer(&cmd.src)?;
        let dst = self.resources.buffer(&cmd.dst)?;
        self.encoder(CommandId::CopyBuffer)?
            .copy_buffer_to_buffer(&src, cmd.src_offset, &dst, cmd.dst_offset, cmd.size);
        Ok(())
    }

    fn copy_texture(&mut self, cmd: &CopyTexture) -> RhiResult<()> {
        let src = self.resources.texture(&cmd.src)?;
        let dst = self.resources.texture(&cmd.dst)?;
        let src_range = cmd.src_subresource.resolve(cmd.src.desc());
        let dst_range = cmd.dst_subresource.resolve(cmd.dst.desc());
        let encoder = self.encoder(CommandId::CopyTexture)?;
        for mip in 0..dst_range.mip_count.min(src_range.mip_count) {
            encoder.copy_texture_to_texture(
                TexelCopyTextureInfo {
                    texture: &src,
                    mip_level: src_range.base_mip + mip,
                    origin: layered_origin(&cmd.src, cmd.src_offset, src_range.base_layer),
                    aspect: copy_aspect(cmd.src.desc().format),
                },
                TexelCopyTextureInfo {
                    texture: &dst,
                    mip_level: dst_range.base_mip + mip,
                    origin: layered_origin(&cmd.dst, cmd.dst_offset, dst_range.base_layer),
                    aspect: copy_aspect(cmd.dst.desc().format),
                },
                extent(mip_extent(cmd.extent, mip)),
            );
        }
        Ok(())
    }

    fn copy_texture_to_buffer(&mut self, cmd: &CopyTextureToBuffer) -> RhiResult<()> {
        let src = self.resources.texture(&cmd.src)?;
        let dst = self.resources.buffer(&cmd.dst)?;
        let range = cmd.src_subresource.resolve(cmd.src.desc());
        let bytes_per_row = u32::try_from(cmd.dst_row_pitch)
            .map_err(|_| RhiError::InvalidArgument(format!("row pitch {} too large", cmd.dst_row_pitch)))?;
        self.encoder(CommandId::CopyTextureToBuffer)?.copy_texture_to_buffer(
            TexelCopyTextureInfo {
                texture: &src,
                mip_level: range.base_mip,
                origin: layered_origin(&cmd.src, cmd.src_offset, range.base_layer),
                aspect: copy_aspect(cmd.src.desc().format),
            },
            TexelCopyBufferInfo {
                buffer: &dst,
                layout: TexelCopyBufferLayout {
                    offset: cmd.dst_offset,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(cmd.extent.height),
                },
            },
            extent(cmd.extent),
        );
        Ok(())
    }

    fn clear_buffer(&mut self, cmd: &ClearBuffer) -> RhiResult<()> {
        let buffer = self.resources.buffer(&cmd.buffer)?;
        self.encoder(CommandId::ClearBuffer)?
            .clear_buffer(&buffer, cmd.range.offset, Some(cmd.range.size));
        Ok(())
    }

    fn clear_texture_float(&mut self, cmd: &ClearTextureFloat) -> RhiResult<()> {
        self.clear_color(CommandId::ClearTextureFloat, &cmd.texture, cmd.range, color(cmd.value))
    }

    fn clear_texture_uint(&mut self, cmd: &ClearTextureUint) -> RhiResult<()> {
        self.clear_color(CommandId::ClearTextureUint, &cmd.texture, cmd.range, uint_color(cmd.value))
    }

    fn clear_texture_depth_stencil(&mut self, cmd: &ClearTextureDepthStencil) -> RhiResult<()> {
        let native = self.resources.texture(&cmd.texture)?;
        let range = cmd.range.resolve(cmd.texture.desc());
        let has_stencil = cmd.texture.desc().format.has_stencil();
        let depth_load = if cmd.clear_depth {
            wgpu::LoadOp::Clear(cmd.depth)
        } else {
            wgpu::LoadOp::Load
        };
        let stencil_load = if cmd.clear_stencil {
            wgpu::LoadOp::Clear(u32::from(cmd.stencil))
        } else {
            wgpu::LoadOp::Load
        };
        let encoder = self.encoder(CommandId::ClearTextureDepthStencil)?;
        for mip in range.base_mip..range.base_mip + range.mip_count {
            for layer in range.base_layer..range.base_layer + range.layer_count {
                let view = native.create_view(&TextureViewDescriptor {
                    dimension: Some(TextureViewDimension::D2),
                    base_mip_level: mip,
                    mip_level_count: Some(1),
                    base_array_layer: layer,
                    array_layer_count: Some(1),
                    ..TextureViewDescriptor::default()
                });
                drop(encoder.begin_render_pass(&RenderPassDescriptor {
                    label: Some("rhi-clear-depth-stencil"),
                    color_attachments: &[],
                    depth_stencil_attachment: Some(RenderPassDepthStencilAttachment {
                        view: &view,
                        depth_ops: Some(Operations {
                            load: depth_load,
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: has_stencil.then_some(Operations {
                            load: stencil_load,
                            store: wgpu::StoreOp::Store,
                        }),
                    }),
                    timestamp_writes: None,
                    occlusion_query_set: None,
                }));
            }
        }
        Ok(())
    }

    /// Rows are repacked to the copy alignment into a staging buffer, then copied on the GPU
    /// timeline so the upload lands in order with the rest of the recording.
    fn upload_texture_data(&mut self, cmd: &UploadTextureData, data: &[u8]) -> RhiResult<()> {
        let desc = cmd.dst.desc();
        let row_bytes = cmd.extent.width * desc.format.bytes_per_texel();
        let rows = cmd.extent.height * cmd.extent.depth.max(1);
        let src_pitch = if cmd.row_pitch == 0 {
            u64::from(row_bytes)
        } else {
            cmd.row_pitch
        };
        let dst_pitch = aligned_row_pitch(row_bytes);
        let src_pitch = usize::try_from(src_pitch)
            .map_err(|_| RhiError::InvalidArgument(format!("row pitch {src_pitch} too large")))?;
        let packed = repack_rows(data, rows as usize, row_bytes as usize, src_pitch, dst_pitch as usize)?;
        if packed.is_empty() {
            return Ok(());
        }
        let staging = self.staging(&packed);
        let texture = self.resources.texture(&cmd.dst)?;
        let range = cmd.range.resolve(desc);
        self.encoder(CommandId::UploadTextureData)?.copy_buffer_to_texture(
            TexelCopyBufferInfo {
                buffer: &staging,
                layout: TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(dst_pitch),
                    rows_per_image: Some(cmd.extent.height),
                },
            },
            TexelCopyTextureInfo {
                texture: &texture,
                mip_level: range.base_mip,
                origin: layered_origin(&cmd.dst, cmd.offset, range.base_layer),
                aspect: copy_aspect(desc.format),
            },
            extent(cmd.extent),
        );
        Ok(())
    }

    fn upload_buffer_data(&mut self, cmd: &UploadBufferData, data: &[u8]) -> RhiResult<()> {
        let size = data.len() as u64;
        if cmd.offset % COPY_ALIGNMENT != 0 || size % COPY_ALIGNMENT != 0 {
            return Err(RhiError::InvalidArgument(format!(
                "buffer uploads need {COPY_ALIGNMENT}-byte alignment, got offset {} size {size}",
                cmd.offset
            )));
        }
        if data.is_empty() {
            return Ok(());
        }
        let staging = self.staging(data);
        let dst = self.resources.buffer(&cmd.dst)?;
        self.encoder(CommandId::UploadBufferData)?
            .copy_buffer_to_buffer(&staging, 0, &dst, cmd.offset, size);
        Ok(())
    }

    fn resolve_query(&mut self, cmd: &ResolveQuery) -> RhiResult<()> {
        let set = self.resources.query_set(&cmd.pool)?;
        let buffer = self.resources.buffer(&cmd.buffer)?;
        self.encoder(CommandId::ResolveQuery)?.resolve_query_set(
            &set,
            cmd.index..cmd.index + cmd.count,
            &buffer,
            cmd.offset,
        );
        Ok(())
    }

    /// Resolve targets are attached to the pass itself, so they resolve when it ends.
    fn begin_render_pass(&mut self, desc: &RenderPassDesc) -> RhiResult<()> {
        let mut views = Vec::with_capacity(desc.color_attachments.len());
        for attachment in &desc.color_attachments {
            let view = self.resources.attachment_view(&attachment.view)?;
            let resolve = attachment
                .resolve_target
                .as_ref()
                .map(|target| self.resources.attachment_view(target))
                .transpose()?;
            views.push((view, resolve));
        }
        let depth_view = desc
            .depth_stencil
            .as_ref()
            .map(|attachment| self.resources.attachment_view(&attachment.view))
            .transpose()?;

        let color_attachments: Vec<_> = desc
            .color_attachments
            .iter()
            .zip(&views)
            .map(|(attachment, (view, resolve))| {
                Some(RenderPassColorAttachment {
                    view,
                    depth_slice: None,
                    resolve_target: resolve.as_ref(),
                    ops: Operations {
                        load: load_op(attachment.load_op, color(attachment.clear_value)),
                        store: store_op(attachment.store_op),
                    },
                })
            })
            .collect();
        let depth_stencil_attachment = desc.depth_stencil.as_ref().zip(depth_view.as_ref()).map(
            |(attachment, view)| {
                let writable = !attachment.depth_read_only;
                let has_stencil = attachment.view.texture().desc().format.has_stencil();
                RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: writable.then_some(Operations {
                        load: load_op(attachment.depth_load_op, attachment.depth_clear_value),
                        store: store_op(attachment.depth_store_op),
                    }),
                    stencil_ops: (writable && has_stencil).then_some(Operations {
                        load: load_op(attachment.stencil_load_op, u32::from(attachment.stencil_clear_value)),
                        store: store_op(attachment.stencil_store_op),
                    }),
                }
            },
        );

        let pass = self
            .encoder(CommandId::BeginRenderPass)?
            .begin_render_pass(&RenderPassDescriptor {
                label: Some("rhi-render-pass"),
                color_attachments: &color_attachments,
                depth_stencil_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            })
            .forget_lifetime();
        self.pass = ActivePass::Render(pass);
        Ok(())
    }

    fn end_render_pass(&mut self) -> RhiResult<()> {
        if matches!(self.pass, ActivePass::Render(_)) {
            self.pass = ActivePass::None;
        }
        Ok(())
    }

    fn resolve_texture(&mut self, source: &TextureView, destination: &TextureView) -> RhiResult<()> {
        trace!(
            target: "wgpu_backend",
            "texture {} resolved into {} by the pass",
            source.texture().id(),
            destination.texture().id()
        );
        Ok(())
    }

    fn bind_render_pipeline(&mut self, pipeline: &RenderPipeline) -> RhiResult<()> {
        let native = self.resources.render_pipeline(pipeline)?;
        self.render_pass(CommandId::SetRenderState)?.set_pipeline(&native);
        Ok(())
    }

    /// Native handles are bind groups, bound to consecutive group indices from zero.
    fn bind_bindings(&mut self, point: BindPoint, bindings: &BindingData) -> RhiResult<()> {
        let groups = bindings
            .native_handles()
            .iter()
            .map(|handle| self.resources.bind_group(*handle))
            .collect::<RhiResult<Vec<_>>>()?;
        let constants = bindings.push_constants();
        if !constants.is_empty() && !self.features().contains(Features::PUSH_CONSTANTS) {
            return Err(RhiError::InvalidArgument(
                "push constants need the PUSH_CONSTANTS feature".into(),
            ));
        }
        match (point, &mut self.pass) {
            (BindPoint::Graphics, ActivePass::Render(pass)) => {
                for (index, group) in (0_u32..).zip(&groups) {
                    pass.set_bind_group(index, group, &[]);
                }
                if !constants.is_empty() {
                    pass.set_push_constants(ShaderStages::VERTEX_FRAGMENT, 0, constants);
                }
            }
            (BindPoint::Compute, ActivePass::Compute(pass)) => {
                for (index, group) in (0_u32..).zip(&groups) {
                    pass.set_bind_group(index, group, &[]);
                }
                if !constants.is_empty() {
                    pass.set_push_constants(0, constants);
                }
            }
            (BindPoint::RayTracing, _) => return Err(RhiError::Unsupported(CommandId::SetRayTracingState)),
            (BindPoint::Graphics | BindPoint::Compute, _) => {
                return Err(RhiError::InvalidArgument(format!(
                    "{point:?} bindings recorded outside a matching pass"
                )));
            }
        }
        Ok(())
    }

    fn set_stencil_reference(&mut self, reference: u32) -> RhiResult<()> {
        self.render_pass(CommandId::SetRenderState)?
            .set_stencil_reference(reference);
        Ok(())
    }

    fn set_vertex_buffers(&mut self, buffers: &[BufferOffsetPair]) -> RhiResult<()> {
        let natives = buffers
            .iter()
            .map(|pair| self.resources.buffer(&pair.buffer))
            .collect::<RhiResult<Vec<_>>>()?;
        let pass = self.render_pass(CommandId::SetRenderState)?;
        for ((slot, native), pair) in (0_u32..).zip(&natives).zip(buffers) {
            pass.set_vertex_buffer(slot, native.slice(pair.offset..));
        }
        Ok(())
    }

    fn set_index_buffer(&mut self, buffer: &BufferOffsetPair, format: IndexFormat) -> RhiResult<()> {
        let native = self.resources.buffer(&buffer.buffer)?;
        self.render_pass(CommandId::SetRenderState)?
            .set_index_buffer(native.slice(buffer.offset..), index_format(format));
        Ok(())
    }

    /// wgpu binds a single viewport; the first one wins.
    fn set_viewports(&mut self, viewports: &[Viewport]) -> RhiResult<()> {
        let Some(viewport) = viewports.first() else {
            return Ok(());
        };
        if viewports.len() > 1 {
            debug!(target: "wgpu_backend", "ignoring {} extra viewports", viewports.len() - 1);
        }
        self.render_pass(CommandId::SetRenderState)?.set_viewport(
            viewport.x,
            viewport.y,
            viewport.width,
            viewport.height,
            viewport.min_depth,
            viewport.max_depth,
        );
        Ok(())
    }

    fn set_scissor_rects(&mut self, rects: &[ScissorRect]) -> RhiResult<()> {
        let Some(rect) = rects.first() else {
            return Ok(());
        };
        self.render_pass(CommandId::SetRenderState)?.set_scissor_rect(
            rect.min_x,
            rect.min_y,
            rect.max_x.saturating_sub(rect.min_x),
            rect.max_y.saturating_sub(rect.min_y),
        );
        Ok(())
    }

    fn draw(&mut self, cmd: &Draw) -> RhiResult<()> {
        self.render_pass(CommandId::Draw)?.draw(
            cmd.first_vertex..cmd.first_vertex + cmd.vertex_count,
            cmd.first_instance..cmd.first_instance + cmd.instance_count,
        );
        Ok(())
    }

    fn draw_indexed(&mut self, cmd: &DrawIndexed) -> RhiResult<()> {
        self.render_pass(CommandId::DrawIndexed)?.draw_indexed(
            cmd.first_index..cmd.first_index + cmd.index_count,
            cmd.base_vertex,
            cmd.first_instance..cmd.first_instance + cmd.instance_count,
        );
        Ok(())
    }

    fn draw_indirect(&mut self, cmd: &DrawIndirect) -> RhiResult<()> {
        let args = BufferOffsetPair::new(&cmd.arg_buffer, cmd.arg_offset);
        let count = cmd
            .count_buffer
            .as_ref()
            .map(|buffer: &Buffer| BufferOffsetPair::new(buffer, cmd.count_offset));
        self.draw_indirect_args(CommandId::DrawIndirect, false, &args, count.as_ref(), cmd.max_draw_count)
    }

    fn draw_indexed_indirect(&mut self, cmd: &DrawIndexedIndirect) -> RhiResult<()> {
        let args = BufferOffsetPair::new(&cmd.arg_buffer, cmd.arg_offset);
        let count = cmd
            .count_buffer
            .as_ref()
            .map(|buffer: &Buffer| BufferOffsetPair::new(buffer, cmd.count_offset));
        self.draw_indirect_args(CommandId::DrawIndexedIndirect, true, &args, count.as_ref(), cmd.max_draw_count)
    }

    fn begin_compute_pass(&mut self) -> RhiResult<()> {
        let pass = self
            .encoder(CommandId::BeginComputePass)?
            .begin_compute_pass(&ComputePassDescriptor {
                label: Some("rhi-compute-pass"),
                timestamp_writes: None,
            })
            .forget_lifetime();
        self.pass = ActivePass::Compute(pass);
        Ok(())
    }

    fn end_compute_pass(&mut self) -> RhiResult<()> {
        if matches!(self.pass, ActivePass::Compute(_)) {
            self.pass = ActivePass::None;
        }
        Ok(())
    }

    fn bind_compute_pipeline(&mut self, pipeline: &ComputePipeline) -> RhiResult<()> {
        let native = self.resources.compute_pipeline(pipeline)?;
        self.compute_pass(CommandId::SetComputeState)?.set_pipeline(&native);
        Ok(())
    }

    fn dispatch_compute(&mut self, cmd: &DispatchCompute) -> RhiResult<()> {
        self.compute_pass(CommandId::DispatchCompute)?
            .dispatch_workgroups(cmd.x, cmd.y, cmd.z);
        Ok(())
    }

    fn dispatch_compute_indirect(&mut self, cmd: &DispatchComputeIndirect) -> RhiResult<()> {
        let native = self.resources.buffer(&cmd.arg_buffer)?;
        self.compute_pass(CommandId::DispatchComputeIndirect)?
            .dispatch_workgroups_indirect(&native, cmd.offset);
        Ok(())
    }

    /// Debug group colors have no wgpu equivalent and are dropped.
    fn push_debug_group(&mut self, name: &str, _color: [f32; 3]) -> RhiResult<()> {
        match &mut self.pass {
            ActivePass::Render(pass) => pass.push_debug_group(name),
            ActivePass::Compute(pass) => pass.push_debug_group(name),
            ActivePass::None => self.encoder.push_debug_group(name),
        }
        Ok(())
    }

    fn pop_debug_group(&mut self) -> RhiResult<()> {
        match &mut self.pass {
            ActivePass::Render(pass) => pass.pop_debug_group(),
            ActivePass::Compute(pass) => pass.pop_debug_group(),
            ActivePass::None => self.encoder.pop_debug_group(),
        }
        Ok(())
    }

    fn insert_debug_marker(&mut self, name: &str, _color: [f32; 3]) -> RhiResult<()> {
        match &mut self.pass {
            ActivePass::Render(pass) => pass.insert_debug_marker(name),
            ActivePass::Compute(pass) => pass.insert_debug_marker(name),
            ActivePass::None => self.encoder.insert_debug_marker(name),
        }
        Ok(())
    }

    fn write_timestamp(&mut self, pool: &QueryPool, index: u32) -> RhiResult<()> {
        let set = self.resources.query_set(pool)?;
        let inside_passes = self.features().contains(Features::TIMESTAMP_QUERY_INSIDE_PASSES);
        match &mut self.pass {
            ActivePass::None => self.encoder.write_timestamp(&set, index),
            ActivePass::Render(pass) if inside_passes => pass.write_timestamp(&set, index),
            ActivePass::Compute(pass) if inside_passes => pass.write_timestamp(&set, index),
            ActivePass::Render(_) | ActivePass::Compute(_) => {
                return Err(RhiError::Unsupported(CommandId::WriteTimestamp));
            }
        }
        Ok(())
    }

    /// Encoder validation errors surface when the encoder is finished.
    fn finish(self) -> RhiResult<wgpu::CommandBuffer> {
        let Self {
            device,
            encoder,
            pass,
            ..
        } = self;
        drop(pass);
        with_validation_scope(&device, "finish", || encoder.finish()).map_err(|err| native(&err))
    }
}
