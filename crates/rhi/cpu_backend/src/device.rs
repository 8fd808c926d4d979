//! The CPU device: buffers live in host memory and compute pipelines are host closures.

use core::mem::size_of;
use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use bytemuck::Pod;
use dashmap::DashMap;
use log::{debug, info};
use rhi::{
    Buffer, BufferDesc, ComputePipeline, DebugSink, Device, DeviceInfo, LogSink, NativeHandle,
    QueryKind, QueryPool, ResourceId, RhiError, RhiResult,
};

use crate::kernel::{HostKernel, KernelInvocation};
use crate::memory::CpuMemory;
use crate::recording::{CpuRecording, CpuWork};

/// State shared between the device and its recordings.
pub(crate) struct CpuShared {
    pub(crate) memory: CpuMemory,
    kernels: DashMap<ResourceId, HostKernel>,
    queries: DashMap<ResourceId, Arc<Mutex<Vec<u64>>>>,
    epoch: Instant,
}

impl CpuShared {
    pub(crate) fn kernel(&self, pipeline: &ComputePipeline) -> RhiResult<HostKernel> {
        self.kernels
            .get(&pipeline.id())
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                RhiError::InvalidArgument(format!(
                    "compute pipeline {} was not created on this device",
                    pipeline.id()
                ))
            })
    }

    fn query_slots(&self, pool: &QueryPool) -> RhiResult<Arc<Mutex<Vec<u64>>>> {
        self.queries
            .get(&pool.id())
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                RhiError::InvalidArgument(format!(
                    "query pool {} was not created on this device",
                    pool.id()
                ))
            })
    }

    pub(crate) fn write_timestamp(&self, pool: &QueryPool, index: u32) -> RhiResult<()> {
        if pool.kind() != QueryKind::Timestamp {
            return Err(RhiError::InvalidArgument(format!(
                "query pool {} holds {:?} queries, not timestamps",
                pool.id(),
                pool.kind()
            )));
        }
        let slots = self.query_slots(pool)?;
        let mut values = slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = values.get_mut(index as usize).ok_or_else(|| {
            RhiError::InvalidArgument(format!("timestamp index {index} is outside pool {}", pool.id()))
        })?;
        *slot = self.epoch.elapsed().as_nanos() as u64;
        Ok(())
    }

    pub(crate) fn query_values(&self, pool: &QueryPool, first: u32, count: u32) -> RhiResult<Vec<u64>> {
        let slots = self.query_slots(pool)?;
        let values = slots.lock().unwrap_or_else(PoisonError::into_inner);
        let (first, count) = (first as usize, count as usize);
        values
            .get(first..first + count)
            .map(<[u64]>::to_vec)
            .ok_or_else(|| {
                RhiError::InvalidArgument(format!(
                    "queries {first}..{} are outside pool {} of {}",
                    first + count,
                    pool.id(),
                    values.len()
                ))
            })
    }
}

/// Reference device that executes command buffers on the calling thread.
///
/// Recording already performs the work, so [`Device::submit`] only accounts for it. Texture,
/// render and ray-tracing commands are reported as unsupported.
pub struct CpuDevice {
    shared: Arc<CpuShared>,
    sink: Box<dyn DebugSink>,
    next_handle: AtomicU64,
    submitted: AtomicU64,
}

impl CpuDevice {
    pub fn new() -> Self {
        Self::with_sink(LogSink)
    }

    pub fn with_sink(sink: impl DebugSink + 'static) -> Self {
        info!(target: "rhi::cpu", "creating CPU device");
        Self {
            shared: Arc::new(CpuShared {
                memory: CpuMemory::new(),
                kernels: DashMap::new(),
                queries: DashMap::new(),
                epoch: Instant::now(),
            }),
            sink: Box::new(sink),
            next_handle: AtomicU64::new(1),
            submitted: AtomicU64::new(0),
        }
    }

    fn handle(&self) -> NativeHandle {
        NativeHandle(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    /// Allocate a zeroed buffer in host memory.
    ///
    /// # Errors
    /// [`RhiError::OutOfMemory`] when the size does not fit the host address space.
    pub fn create_buffer(&self, desc: BufferDesc) -> RhiResult<Buffer> {
        let size = usize::try_from(desc.size)
            .map_err(|_| RhiError::OutOfMemory(format!("{} byte buffer", desc.size)))?;
        let buffer = Buffer::new(desc, self.handle());
        self.shared.memory.allocate(buffer.id(), size);
        Ok(buffer)
    }

    /// Drop the host memory behind `buffer`. Later commands touching it fail.
    pub fn destroy_buffer(&self, buffer: &Buffer) -> bool {
        self.shared.memory.release(buffer.id())
    }

    pub fn create_query_pool(&self, kind: QueryKind, count: u32) -> QueryPool {
        let pool = QueryPool::new(kind, count, self.handle());
        self.shared
            .queries
            .insert(pool.id(), Arc::new(Mutex::new(vec![0; count as usize])));
        pool
    }

    /// Register `kernel` as the body of a new compute pipeline.
    pub fn create_compute_pipeline<F>(&self, label: Option<&str>, kernel: F) -> ComputePipeline
    where
        F: Fn(&KernelInvocation<'_>) -> RhiResult<()> + Send + Sync + 'static,
    {
        let pipeline = ComputePipeline::new(self.handle(), label);
        self.shared.kernels.insert(pipeline.id(), Arc::new(kernel));
        pipeline
    }

    /// # Errors
    /// [`RhiError::InvalidArgument`] for buffers this device did not create.
    pub fn read_buffer(&self, buffer: &Buffer) -> RhiResult<Vec<u8>> {
        self.shared.memory.get(buffer.id())?.read(0, buffer.size())
    }

    /// Buffer contents decoded as `T` elements.
    ///
    /// # Errors
    /// [`RhiError::InvalidArgument`] for buffers this device did not create.
    pub fn read_buffer_as<T: Pod>(&self, buffer: &Buffer) -> RhiResult<Vec<T>> {
        let bytes = self.read_buffer(buffer)?;
        Ok(bytes
            .chunks_exact(size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    /// Write straight into host memory, outside any command buffer.
    ///
    /// # Errors
    /// [`RhiError::InvalidArgument`] when the write does not fit.
    pub fn write_buffer(&self, buffer: &Buffer, offset: u64, data: &[u8]) -> RhiResult<()> {
        self.shared.memory.get(buffer.id())?.write(offset, data)
    }

    /// # Errors
    /// [`RhiError::InvalidArgument`] for pools this device did not create.
    pub fn query_results(&self, pool: &QueryPool) -> RhiResult<Vec<u64>> {
        self.shared.query_values(pool, 0, pool.count())
    }

    /// Number of recordings submitted so far.
    pub fn submissions(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }
}

impl Default for CpuDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for CpuDevice {
    type Recording = CpuRecording;

    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            backend: "cpu".into(),
            name: "host".into(),
            explicit_barriers: false,
        }
    }

    fn debug_sink(&self) -> &dyn DebugSink {
        self.sink.as_ref()
    }

    fn create_recording(&self) -> RhiResult<CpuRecording> {
        Ok(CpuRecording::new(Arc::clone(&self.shared)))
    }

    fn submit(&self, recordings: Vec<CpuWork>) -> RhiResult<()> {
        let operations: usize = recordings.iter().map(|work| work.operations).sum();
        self.submitted
            .fetch_add(recordings.len() as u64, Ordering::Relaxed);
        debug!(
            target: "rhi::cpu",
            "submitted {} recordings, {operations} host operations",
            recordings.len()
        );
        Ok(())
    }
}
