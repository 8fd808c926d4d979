//! The slice of `ID3D12GraphicsCommandList` the recorder drives.
//!
//! Method names follow the native API. Everything except [`GraphicsCommandList::close`] is
//! infallible, matching D3D12 where errors surface when the list is closed.

use bitflags::bitflags;
use rhi::{
    BindPoint, Extent3d, Format, IndexFormat, NativeHandle, Offset3d, QueryKind, RhiResult,
    ScissorRect, Viewport,
};

use crate::states::ResourceStates;

/// `D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES`
pub const ALL_SUBRESOURCES: u32 = 0xffff_ffff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceBarrier {
    Transition {
        resource: NativeHandle,
        subresource: u32,
        before: ResourceStates,
        after: ResourceStates,
    },
    /// Orders unordered-access work on `resource`, or on every resource when `None`.
    Uav { resource: Option<NativeHandle> },
}

/// Resource plus byte offset, standing in for a `D3D12_GPU_VIRTUAL_ADDRESS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpuVirtualAddress {
    pub resource: NativeHandle,
    pub offset: u64,
}

impl GpuVirtualAddress {
    pub const fn new(resource: NativeHandle, offset: u64) -> Self {
        Self { resource, offset }
    }
}

/// `D3D12_TEXTURE_COPY_LOCATION`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureCopyLocation {
    SubresourceIndex {
        resource: NativeHandle,
        index: u32,
    },
    PlacedFootprint {
        resource: NativeHandle,
        offset: u64,
        format: Format,
        extent: Extent3d,
        row_pitch: u32,
    },
}

bitflags! {
    /// `D3D12_CLEAR_FLAGS`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClearFlags: u32 {
        const DEPTH = 0x1;
        const STENCIL = 0x2;
    }
}

/// Command signature used by `ExecuteIndirect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndirectSignature {
    Draw,
    DrawIndexed,
    Dispatch,
}

/// `D3D12_RAYTRACING_ACCELERATION_STRUCTURE_COPY_MODE`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccelerationStructureCopyMode {
    Clone = 0,
    Compact = 1,
    Serialize = 3,
    Deserialize = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DispatchRaysDesc {
    pub shader_table: NativeHandle,
    pub ray_gen_index: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

/// Native command list. Implemented over the real COM interface by the platform layer.
pub trait GraphicsCommandList {
    fn resource_barrier(&mut self, barriers: &[ResourceBarrier]);

    fn copy_buffer_region(
        &mut self,
        dst: NativeHandle,
        dst_offset: u64,
        src: NativeHandle,
        src_offset: u64,
        size: u64,
    );

    fn copy_texture_region(
        &mut self,
        dst: &TextureCopyLocation,
        dst_offset: Offset3d,
        src: &TextureCopyLocation,
        src_offset: Offset3d,
        extent: Extent3d,
    );

    fn om_set_render_targets(&mut self, render_targets: &[NativeHandle], depth_stencil: Option<NativeHandle>);

    fn clear_render_target_view(&mut self, view: NativeHandle, color: [f32; 4]);

    fn clear_depth_stencil_view(&mut self, view: NativeHandle, flags: ClearFlags, depth: f32, stencil: u8);

    fn resolve_subresource(
        &mut self,
        dst: NativeHandle,
        dst_subresource: u32,
        src: NativeHandle,
        src_subresource: u32,
        format: Format,
    );

    fn set_pipeline_state(&mut self, point: BindPoint, pipeline: NativeHandle);

    fn set_descriptor_tables(&mut self, point: BindPoint, tables: &[NativeHandle]);

    fn set_root_constants(&mut self, point: BindPoint, constants: &[u8]);

    fn om_set_stencil_ref(&mut self, reference: u32);

    fn ia_set_vertex_buffers(&mut self, views: &[GpuVirtualAddress]);

    fn ia_set_index_buffer(&mut self, view: GpuVirtualAddress, format: IndexFormat);

    fn rs_set_viewports(&mut self, viewports: &[Viewport]);

    fn rs_set_scissor_rects(&mut self, rects: &[ScissorRect]);

    fn draw_instanced(&mut self, vertex_count: u32, instance_count: u32, start_vertex: u32, start_instance: u32);

    fn draw_indexed_instanced(
        &mut self,
        index_count: u32,
        instance_count: u32,
        start_index: u32,
        base_vertex: i32,
        start_instance: u32,
    );

    fn execute_indirect(
        &mut self,
        signature: IndirectSignature,
        max_count: u32,
        arguments: GpuVirtualAddress,
        count: Option<GpuVirtualAddress>,
    );

    fn dispatch(&mut self, x: u32, y: u32, z: u32);

    fn dispatch_mesh(&mut self, x: u32, y: u32, z: u32);

    fn dispatch_rays(&mut self, desc: &DispatchRaysDesc);

    fn build_raytracing_acceleration_structure(
        &mut self,
        dst: NativeHandle,
        src: Option<NativeHandle>,
        scratch: GpuVirtualAddress,
        inputs: &[GpuVirtualAddress],
    );

    fn emit_raytracing_acceleration_structure_postbuild_info(
        &mut self,
        structure: NativeHandle,
        kind: QueryKind,
        pool: NativeHandle,
        index: u32,
    );

    fn copy_raytracing_acceleration_structure(
        &mut self,
        dst: GpuVirtualAddress,
        src: GpuVirtualAddress,
        mode: AccelerationStructureCopyMode,
    );

    /// PIX event, color packed as `0xFFRRGGBB`.
    fn begin_event(&mut self, name: &str, color: u32);

    fn end_event(&mut self);

    fn set_marker(&mut self, name: &str, color: u32);

    fn end_query(&mut self, pool: NativeHandle, index: u32);

    fn resolve_query_data(
        &mut self,
        pool: NativeHandle,
        kind: QueryKind,
        first: u32,
        count: u32,
        dst: NativeHandle,
        dst_offset: u64,
    );

    /// # Errors
    /// Whatever `Close()` reports for the recorded list.
    fn close(&mut self) -> RhiResult<()>;
}

/// Pack a float RGB color the way PIX expects it.
pub fn pix_color(color: [f32; 3]) -> u32 {
    let channel = |value: f32| (value.clamp(0.0, 1.0) * 255.0).round() as u32;
    0xFF00_0000 | (channel(color[0]) << 16) | (channel(color[1]) << 8) | channel(color[2])
}
