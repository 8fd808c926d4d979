//! [`rhi::Device`] over a `wgpu::Device` and its queue.

use std::sync::Arc;
use std::sync::mpsc::channel;

use anyhow::{Result as AnyResult, anyhow};
use log::{debug, info};
use pollster::block_on;
use rhi::{
    Buffer, BufferDesc, ComputePipeline, DebugSink, Device, DeviceInfo, LogSink, MemoryType,
    NativeHandle, QueryKind, QueryPool, RenderPipeline, RhiError, RhiResult, Texture, TextureDesc,
};
use tracing::debug_span;
use wgpu::{
    Adapter, BufferDescriptor, DeviceDescriptor, Features, Instance, InstanceDescriptor, MapMode,
    PollType, QuerySetDescriptor, QueryType, RequestAdapterOptions, TextureDescriptor,
};

use crate::error::{native, submit_with_validation};
use crate::recording::WgpuRecording;
use crate::resources::WgpuResources;
use crate::translate::{buffer_usages, texture_dimension, texture_format, texture_size, texture_usages};

/// Optional features the backend turns on whenever the adapter offers them.
fn wanted_features(adapter: &Adapter) -> Features {
    adapter.features()
        & (Features::TIMESTAMP_QUERY
            | Features::TIMESTAMP_QUERY_INSIDE_ENCODERS
            | Features::TIMESTAMP_QUERY_INSIDE_PASSES
            | Features::MULTI_DRAW_INDIRECT_COUNT
            | Features::DEPTH32FLOAT_STENCIL8
            | Features::PUSH_CONSTANTS)
}

pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    resources: Arc<WgpuResources>,
    sink: Box<dyn DebugSink>,
    name: String,
}

impl WgpuDevice {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, name: impl Into<String>) -> Self {
        Self::with_sink(device, queue, name, LogSink)
    }

    pub fn with_sink(
        device: wgpu::Device,
        queue: wgpu::Queue,
        name: impl Into<String>,
        sink: impl DebugSink + 'static,
    ) -> Self {
        Self {
            device,
            queue,
            resources: Arc::default(),
            sink: Box::new(sink),
            name: name.into(),
        }
    }

    /// Open the default adapter without a surface.
    ///
    /// # Errors
    /// Returns an error when no adapter is available or device creation fails.
    pub fn request() -> AnyResult<Self> {
        let instance = Instance::new(&InstanceDescriptor::default());
        let adapter = block_on(instance.request_adapter(&RequestAdapterOptions::default()))
            .map_err(|err| anyhow!("no suitable adapter: {err}"))?;
        let name = adapter.get_info().name;
        let (device, queue) = block_on(adapter.request_device(&DeviceDescriptor {
            label: Some("rhi-device"),
            required_features: wanted_features(&adapter),
            required_limits: adapter.limits(),
            ..DeviceDescriptor::default()
        }))?;
        info!(target: "wgpu_backend", "opened {name} with {:?}", device.features());
        Ok(Self::new(device, queue, name))
    }

    #[inline]
    pub const fn device(&self) -> &wgpu::Device {
        &self.device
    }

    #[inline]
    pub const fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    #[inline]
    pub fn resources(&self) -> &WgpuResources {
        &self.resources
    }

    /// Sizes are rounded up to the copy alignment, since every copy and clear needs it.
    ///
    /// # Errors
    /// Never fails on this backend.
    pub fn create_buffer(&self, desc: BufferDesc) -> RhiResult<Buffer> {
        let size = desc.size.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        let native = self.device.create_buffer(&BufferDescriptor {
            label: desc.label.as_deref(),
            size,
            usage: buffer_usages(desc.memory_type),
            mapped_at_creation: false,
        });
        let buffer = Buffer::new(desc, self.resources.handle());
        self.resources.insert_buffer(&buffer, native);
        debug!(target: "wgpu_backend", "created buffer {} ({size} bytes)", buffer.id());
        Ok(buffer)
    }

    /// # Errors
    /// [`RhiError::InvalidArgument`] when the format needs a feature the device lacks.
    pub fn create_texture(&self, desc: TextureDesc) -> RhiResult<Texture> {
        let features = self.device.features();
        let format = texture_format(desc.format, features)?;
        let native = self.device.create_texture(&TextureDescriptor {
            label: desc.label.as_deref(),
            size: texture_size(&desc),
            mip_level_count: desc.mip_count.max(1),
            sample_count: desc.sample_count.max(1),
            dimension: texture_dimension(desc.kind),
            format,
            usage: texture_usages(format, desc.sample_count, features),
            view_formats: &[],
        });
        let texture = Texture::new(desc, self.resources.handle());
        self.resources.insert_texture(&texture, native);
        debug!(target: "wgpu_backend", "created texture {}", texture.id());
        Ok(texture)
    }

    /// Wrap a pipeline built by the caller so render states can reference it.
    pub fn register_render_pipeline(&self, native: wgpu::RenderPipeline, label: Option<&str>) -> RenderPipeline {
        let pipeline = RenderPipeline::new(self.resources.handle(), label);
        self.resources.insert_render_pipeline(&pipeline, native);
        pipeline
    }

    pub fn register_compute_pipeline(&self, native: wgpu::ComputePipeline, label: Option<&str>) -> ComputePipeline {
        let pipeline = ComputePipeline::new(self.resources.handle(), label);
        self.resources.insert_compute_pipeline(&pipeline, native);
        pipeline
    }

    /// The returned handle goes into [`rhi::BindingData`]; handles bind to consecutive group
    /// indices in the order they are listed there.
    pub fn register_bind_group(&self, native: wgpu::BindGroup) -> NativeHandle {
        self.resources.insert_bind_group(native)
    }

    /// # Errors
    /// [`RhiError::InvalidArgument`] for anything but timestamp pools, or when the device
    /// has no timestamp support.
    pub fn create_query_pool(&self, kind: QueryKind, count: u32) -> RhiResult<QueryPool> {
        if kind != QueryKind::Timestamp {
            return Err(RhiError::InvalidArgument(format!("{kind:?} query pools need ray tracing")));
        }
        if !self.device.features().contains(Features::TIMESTAMP_QUERY) {
            return Err(RhiError::InvalidArgument(
                "timestamp pools need the TIMESTAMP_QUERY feature".into(),
            ));
        }
        let native = self.device.create_query_set(&QuerySetDescriptor {
            label: Some("rhi-timestamps"),
            ty: QueryType::Timestamp,
            count,
        });
        let pool = QueryPool::new(kind, count, self.resources.handle());
        self.resources.insert_query_set(&pool, native);
        Ok(pool)
    }

    /// Map a read-back buffer and copy `len` bytes out from `offset`, blocking on the device.
    ///
    /// # Errors
    /// [`RhiError::InvalidArgument`] for buffers outside the read-back heap, or mapping failures.
    pub fn read_buffer(&self, buffer: &Buffer, offset: u64, len: u64) -> RhiResult<Vec<u8>> {
        if buffer.desc().memory_type != MemoryType::ReadBack {
            return Err(RhiError::InvalidArgument(format!(
                "buffer {} is not in the read-back heap",
                buffer.id()
            )));
        }
        let mapped = self.resources.buffer(buffer)?;
        let slice = mapped.slice(offset..offset + len);
        let (tx, rx) = channel();
        slice.map_async(MapMode::Read, move |res| {
            drop(tx.send(res));
        });
        self.device
            .poll(PollType::Wait)
            .map_err(|err| native(&anyhow!("poll failed: {err}")))?;
        rx.recv()
            .map_err(|err| native(&anyhow!("map callback dropped: {err}")))?
            .map_err(|err| native(&anyhow!("map failed: {err}")))?;
        let bytes = slice.get_mapped_range().to_vec();
        mapped.unmap();
        Ok(bytes)
    }

    /// Write device-local memory on the queue timeline, ahead of the next submission.
    ///
    /// # Errors
    /// [`RhiError::InvalidArgument`] for mapped heaps.
    pub fn write_buffer(&self, buffer: &Buffer, offset: u64, data: &[u8]) -> RhiResult<()> {
        if buffer.desc().memory_type != MemoryType::DeviceLocal {
            return Err(RhiError::InvalidArgument(format!(
                "buffer {} is mapped memory, record an upload instead",
                buffer.id()
            )));
        }
        self.queue.write_buffer(&self.resources.buffer(buffer)?, offset, data);
        Ok(())
    }

    pub fn destroy_buffer(&self, buffer: &Buffer) {
        if let Ok(native) = self.resources.buffer(buffer) {
            native.destroy();
        }
        self.resources.release_buffer(buffer);
    }

    pub fn destroy_texture(&self, texture: &Texture) {
        if let Ok(native) = self.resources.texture(texture) {
            native.destroy();
        }
        self.resources.release_texture(texture);
    }

    pub fn unregister_bind_group(&self, handle: NativeHandle) {
        self.resources.release_bind_group(handle);
    }
}

impl Device for WgpuDevice {
    type Recording = WgpuRecording;

    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            backend: "wgpu".into(),
            name: self.name.clone(),
            explicit_barriers: false,
        }
    }

    fn debug_sink(&self) -> &dyn DebugSink {
        self.sink.as_ref()
    }

    fn create_recording(&self) -> RhiResult<WgpuRecording> {
        Ok(WgpuRecording::new(self.device.clone(), Arc::clone(&self.resources)))
    }

    fn submit(&self, recordings: Vec<wgpu::CommandBuffer>) -> RhiResult<()> {
        let _span = debug_span!("wgpu.submit", buffers = recordings.len()).entered();
        submit_with_validation(&self.device, &self.queue, recordings).map_err(|err| native(&err))
    }
}
