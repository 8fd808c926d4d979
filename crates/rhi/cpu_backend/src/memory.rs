//! Host-memory storage for buffers created on a [`crate::CpuDevice`].

use core::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use rhi::{ResourceId, RhiError, RhiResult};

/// Backing bytes of one buffer.
#[derive(Debug)]
pub struct HostMemory {
    id: ResourceId,
    bytes: Mutex<Vec<u8>>,
}

impl HostMemory {
    fn new(id: ResourceId, size: usize) -> Self {
        Self {
            id,
            bytes: Mutex::new(vec![0; size]),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.bytes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overwrite `data.len()` bytes starting at `offset`.
    ///
    /// # Errors
    /// [`RhiError::InvalidArgument`] if the write does not fit.
    pub fn write(&self, offset: u64, data: &[u8]) -> RhiResult<()> {
        let mut bytes = self.lock();
        let range = checked_range(self.id, bytes.len(), offset, data.len() as u64)?;
        bytes[range].copy_from_slice(data);
        Ok(())
    }

    /// Copy of `size` bytes starting at `offset`.
    ///
    /// # Errors
    /// [`RhiError::InvalidArgument`] if the range does not fit.
    pub fn read(&self, offset: u64, size: u64) -> RhiResult<Vec<u8>> {
        let bytes = self.lock();
        let range = checked_range(self.id, bytes.len(), offset, size)?;
        Ok(bytes[range].to_vec())
    }

    pub fn fill(&self, offset: u64, size: u64, value: u8) -> RhiResult<()> {
        let mut bytes = self.lock();
        let range = checked_range(self.id, bytes.len(), offset, size)?;
        bytes[range].fill(value);
        Ok(())
    }
}

/// Byte range `[offset, offset + size)` of an allocation of `len` bytes.
pub(crate) fn checked_range(id: ResourceId, len: usize, offset: u64, size: u64) -> RhiResult<Range<usize>> {
    let end = offset.checked_add(size).filter(|end| *end <= len as u64);
    match end {
        Some(end) => Ok(offset as usize..end as usize),
        None => Err(RhiError::InvalidArgument(format!(
            "range {offset}+{size} is outside buffer {id} of {len} bytes"
        ))),
    }
}

/// Copy between two allocations, or within one. Locks are taken in id order.
pub(crate) fn copy_between(
    dst: &HostMemory,
    dst_offset: u64,
    src: &HostMemory,
    src_offset: u64,
    size: u64,
) -> RhiResult<()> {
    if dst.id == src.id {
        let mut bytes = dst.lock();
        let len = bytes.len();
        let from = checked_range(src.id, len, src_offset, size)?;
        let to = checked_range(dst.id, len, dst_offset, size)?;
        bytes.copy_within(from, to.start);
        return Ok(());
    }
    let (mut dst_bytes, src_bytes) = if dst.id < src.id {
        let dst_bytes = dst.lock();
        (dst_bytes, src.lock())
    } else {
        let src_bytes = src.lock();
        (dst.lock(), src_bytes)
    };
    let from = checked_range(src.id, src_bytes.len(), src_offset, size)?;
    let to = checked_range(dst.id, dst_bytes.len(), dst_offset, size)?;
    dst_bytes[to].copy_from_slice(&src_bytes[from]);
    Ok(())
}

/// Every live allocation of one device, keyed by buffer id.
#[derive(Debug, Default)]
pub struct CpuMemory {
    allocations: DashMap<ResourceId, Arc<HostMemory>>,
}

impl CpuMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn allocate(&self, id: ResourceId, size: usize) -> Arc<HostMemory> {
        let memory = Arc::new(HostMemory::new(id, size));
        self.allocations.insert(id, Arc::clone(&memory));
        memory
    }

    /// Allocation behind buffer `id`.
    ///
    /// # Errors
    /// [`RhiError::InvalidArgument`] for buffers this device did not create.
    pub fn get(&self, id: ResourceId) -> RhiResult<Arc<HostMemory>> {
        self.allocations
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RhiError::InvalidArgument(format!("buffer {id} has no host memory on this device")))
    }

    pub fn release(&self, id: ResourceId) -> bool {
        self.allocations.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.allocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }
}
