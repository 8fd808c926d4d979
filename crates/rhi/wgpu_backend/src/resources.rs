//! wgpu objects behind the engine's resource handles.
//!
//! Engine handles only carry an id, so every wgpu object a recording may touch is looked up
//! here. Lookups clone the wgpu handle out of the table, which never holds a shard lock past
//! the call.

use core::fmt::Display;
use core::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use rhi::{
    Buffer, ComputePipeline, NativeHandle, QueryPool, RenderPipeline, ResourceId, RhiError,
    RhiResult, Texture, TextureView,
};

fn missing(kind: &str, id: impl Display) -> RhiError {
    RhiError::InvalidArgument(format!("{kind} {id} was not created on this device"))
}

#[derive(Default)]
pub struct WgpuResources {
    buffers: DashMap<ResourceId, wgpu::Buffer>,
    textures: DashMap<ResourceId, wgpu::Texture>,
    render_pipelines: DashMap<ResourceId, wgpu::RenderPipeline>,
    compute_pipelines: DashMap<ResourceId, wgpu::ComputePipeline>,
    query_sets: DashMap<ResourceId, wgpu::QuerySet>,
    bind_groups: DashMap<NativeHandle, wgpu::BindGroup>,
    next_handle: AtomicU64,
}

impl WgpuResources {
    pub(crate) fn handle(&self) -> NativeHandle {
        NativeHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub(crate) fn insert_buffer(&self, buffer: &Buffer, native: wgpu::Buffer) {
        self.buffers.insert(buffer.id(), native);
    }

    pub(crate) fn insert_texture(&self, texture: &Texture, native: wgpu::Texture) {
        self.textures.insert(texture.id(), native);
    }

    pub(crate) fn insert_render_pipeline(&self, pipeline: &RenderPipeline, native: wgpu::RenderPipeline) {
        self.render_pipelines.insert(pipeline.id(), native);
    }

    pub(crate) fn insert_compute_pipeline(&self, pipeline: &ComputePipeline, native: wgpu::ComputePipeline) {
        self.compute_pipelines.insert(pipeline.id(), native);
    }

    pub(crate) fn insert_query_set(&self, pool: &QueryPool, native: wgpu::QuerySet) {
        self.query_sets.insert(pool.id(), native);
    }

    pub(crate) fn insert_bind_group(&self, native: wgpu::BindGroup) -> NativeHandle {
        let handle = self.handle();
        self.bind_groups.insert(handle, native);
        handle
    }

    pub fn buffer(&self, buffer: &Buffer) -> RhiResult<wgpu::Buffer> {
        self.buffers
            .get(&buffer.id())
            .map(|entry| entry.value().clone())
            .ok_or_else(|| missing("buffer", buffer.id()))
    }

    pub fn texture(&self, texture: &Texture) -> RhiResult<wgpu::Texture> {
        self.textures
            .get(&texture.id())
            .map(|entry| entry.value().clone())
            .ok_or_else(|| missing("texture", texture.id()))
    }

    pub fn render_pipeline(&self, pipeline: &RenderPipeline) -> RhiResult<wgpu::RenderPipeline> {
        self.render_pipelines
            .get(&pipeline.id())
            .map(|entry| entry.value().clone())
            .ok_or_else(|| missing("render pipeline", pipeline.id()))
    }

    pub fn compute_pipeline(&self, pipeline: &ComputePipeline) -> RhiResult<wgpu::ComputePipeline> {
        self.compute_pipelines
            .get(&pipeline.id())
            .map(|entry| entry.value().clone())
            .ok_or_else(|| missing("compute pipeline", pipeline.id()))
    }

    pub fn query_set(&self, pool: &QueryPool) -> RhiResult<wgpu::QuerySet> {
        self.query_sets
            .get(&pool.id())
            .map(|entry| entry.value().clone())
            .ok_or_else(|| missing("query pool", pool.id()))
    }

    pub fn bind_group(&self, handle: NativeHandle) -> RhiResult<wgpu::BindGroup> {
        self.bind_groups
            .get(&handle)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| missing("bind group", handle.0))
    }

    /// A single-mip, single-layer 2D view of the subresource `view` starts at, as render
    /// attachments need.
    pub fn attachment_view(&self, view: &TextureView) -> RhiResult<wgpu::TextureView> {
        let range = view.range().resolve(view.texture().desc());
        Ok(self.texture(view.texture())?.create_view(&wgpu::TextureViewDescriptor {
            label: view.texture().desc().label.as_deref(),
            dimension: Some(wgpu::TextureViewDimension::D2),
            base_mip_level: range.base_mip,
            mip_level_count: Some(1),
            base_array_layer: range.base_layer,
            array_layer_count: Some(1),
            ..wgpu::TextureViewDescriptor::default()
        }))
    }

    pub fn release_buffer(&self, buffer: &Buffer) -> bool {
        self.buffers.remove(&buffer.id()).is_some()
    }

    pub fn release_texture(&self, texture: &Texture) -> bool {
        self.textures.remove(&texture.id()).is_some()
    }

    pub fn release_bind_group(&self, handle: NativeHandle) -> bool {
        self.bind_groups.remove(&handle).is_some()
    }
}
