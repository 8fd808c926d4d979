//! [`rhi::Device`] over a Vulkan queue, plus the shader-table regions ray dispatches read.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ash::vk;
use ash::vk::Handle as _;
use log::debug;
use rhi::{DebugSink, Device, DeviceInfo, LogSink, ResourceId, RhiError, RhiResult, ShaderTable};
use smallvec::SmallVec;

use crate::commands::{AshCommandBuffer, ExtensionLoaders, TraceRegions, VulkanCommands, native_error};
use crate::recording::VulkanRecording;

/// Device-address regions of every registered [`ShaderTable`], shared with each recording.
#[derive(Debug, Default)]
pub struct ShaderTableRegistry {
    regions: Mutex<HashMap<ResourceId, TraceRegions>>,
}

impl ShaderTableRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<ResourceId, TraceRegions>> {
        self.regions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, table: &ShaderTable, regions: TraceRegions) {
        self.lock().insert(table.id(), regions);
    }

    pub fn remove(&self, table: &ShaderTable) -> Option<TraceRegions> {
        self.lock().remove(&table.id())
    }

    pub fn get(&self, table: &ShaderTable) -> Option<TraceRegions> {
        self.lock().get(&table.id()).copied()
    }
}

/// The queue and command pool owned by the platform layer.
pub trait NativeQueue {
    type Commands: VulkanCommands;

    fn device_name(&self) -> String;

    /// Allocate a primary command buffer and begin recording on it.
    ///
    /// # Errors
    /// Native allocation failures.
    fn begin_commands(&self) -> RhiResult<Self::Commands>;

    /// `vkQueueSubmit` with every buffer in order.
    ///
    /// # Errors
    /// Device loss or other native failures.
    fn submit(&self, commands: Vec<Self::Commands>) -> RhiResult<()>;
}

pub struct VulkanDevice<Q> {
    queue: Q,
    sink: Box<dyn DebugSink>,
    shader_tables: Arc<ShaderTableRegistry>,
}

impl<Q: NativeQueue> VulkanDevice<Q> {
    pub fn new(queue: Q) -> Self {
        Self::with_sink(queue, LogSink)
    }

    pub fn with_sink(queue: Q, sink: impl DebugSink + 'static) -> Self {
        Self {
            queue,
            sink: Box::new(sink),
            shader_tables: Arc::default(),
        }
    }

    #[inline]
    pub const fn queue(&self) -> &Q {
        &self.queue
    }

    /// Make `table` usable by [`rhi::RayTracingState`]. Binding an unregistered table fails
    /// the recording with [`RhiError::InvalidArgument`].
    pub fn register_shader_table(&self, table: &ShaderTable, regions: TraceRegions) {
        debug!(target: "rhi::vulkan", "registered shader table {}", table.id());
        self.shader_tables.insert(table, regions);
    }

    pub fn unregister_shader_table(&self, table: &ShaderTable) {
        self.shader_tables.remove(table);
    }
}

impl<Q: NativeQueue> Device for VulkanDevice<Q> {
    type Recording = VulkanRecording<Q::Commands>;

    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            backend: "vulkan".into(),
            name: self.queue.device_name(),
            explicit_barriers: true,
        }
    }

    fn debug_sink(&self) -> &dyn DebugSink {
        self.sink.as_ref()
    }

    fn create_recording(&self) -> RhiResult<Self::Recording> {
        Ok(VulkanRecording::new(
            self.queue.begin_commands()?,
            Arc::clone(&self.shader_tables),
        ))
    }

    fn submit(&self, recordings: Vec<Q::Commands>) -> RhiResult<()> {
        debug!(target: "rhi::vulkan", "vkQueueSubmit x{}", recordings.len());
        self.queue.submit(recordings)
    }
}

/// A queue on a real device. Submissions block until the queue is idle, after which their
/// command buffers go back to the pool.
pub struct AshQueue {
    device: ash::Device,
    queue: vk::Queue,
    pool: vk::CommandPool,
    loaders: ExtensionLoaders,
    name: String,
}

impl AshQueue {
    /// `pool` must belong to the family `queue` was taken from, and stays owned by the caller.
    pub fn new(
        device: ash::Device,
        queue: vk::Queue,
        pool: vk::CommandPool,
        loaders: ExtensionLoaders,
        name: impl Into<String>,
    ) -> Self {
        Self {
            device,
            queue,
            pool,
            loaders,
            name: name.into(),
        }
    }

    fn free(&self, buffers: &[vk::CommandBuffer]) {
        // SAFETY: the buffers came from `self.pool` and none of them is pending execution, since
        // submissions either failed or waited for the queue to go idle.
        unsafe { self.device.free_command_buffers(self.pool, buffers) }
    }
}

impl NativeQueue for AshQueue {
    type Commands = AshCommandBuffer;

    fn device_name(&self) -> String {
        self.name.clone()
    }

    fn begin_commands(&self) -> RhiResult<AshCommandBuffer> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        // SAFETY: `self.pool` belongs to `self.device` and is only used from this queue.
        let buffers = unsafe { self.device.allocate_command_buffers(&info) }.map_err(native_error)?;
        let buffer = buffers
            .first()
            .copied()
            .ok_or_else(|| RhiError::OutOfMemory("no command buffer allocated".into()))?;
        AshCommandBuffer::begin(self.device.clone(), self.loaders.clone(), buffer).inspect_err(|_| {
            self.free(&[buffer]);
        })
    }

    fn submit(&self, commands: Vec<AshCommandBuffer>) -> RhiResult<()> {
        let handles: SmallVec<[vk::CommandBuffer; 8]> = commands.iter().map(AshCommandBuffer::handle).collect();
        if handles.is_empty() {
            return Ok(());
        }
        let submit = vk::SubmitInfo::default().command_buffers(&handles);
        // SAFETY: every buffer was ended by its recording and belongs to this device.
        let submitted = unsafe { self.device.queue_submit(self.queue, &[submit], vk::Fence::null()) }
            .map_err(native_error);
        let idle = submitted.and_then(|()| {
            // SAFETY: `self.queue` belongs to `self.device`.
            unsafe { self.device.queue_wait_idle(self.queue) }.map_err(native_error)
        });
        self.free(&handles);
        idle?;
        debug!(target: "rhi::vulkan", "queue idle after {} command buffers", handles.len());
        Ok(())
    }
}
