//! Host functions standing in for compute shaders.

use core::mem::size_of;
use std::sync::Arc;

use bytemuck::Pod;
use rhi::{RhiError, RhiResult};

use crate::memory::HostMemory;

/// Body of a compute pipeline on the CPU device. Runs once per dispatch.
pub type HostKernel = Arc<dyn Fn(&KernelInvocation<'_>) -> RhiResult<()> + Send + Sync>;

/// Everything a kernel sees for one dispatch.
pub struct KernelInvocation<'inv> {
    group_count: [u32; 3],
    push_constants: &'inv [u8],
    buffers: &'inv [Arc<HostMemory>],
}

impl<'inv> KernelInvocation<'inv> {
    pub(crate) const fn new(
        group_count: [u32; 3],
        push_constants: &'inv [u8],
        buffers: &'inv [Arc<HostMemory>],
    ) -> Self {
        Self {
            group_count,
            push_constants,
            buffers,
        }
    }

    #[inline]
    pub const fn group_count(&self) -> [u32; 3] {
        self.group_count
    }

    /// Total number of groups across all three dimensions.
    pub fn groups(&self) -> u64 {
        self.group_count.iter().map(|count| u64::from(*count)).product()
    }

    /// Number of buffers in the bound binding data, in binding order.
    #[inline]
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Push constants decoded as `T`.
    ///
    /// # Errors
    /// [`RhiError::InvalidArgument`] when the push-constant block is not exactly `T` sized.
    pub fn push_constants<T: Pod>(&self) -> RhiResult<T> {
        bytemuck::try_pod_read_unaligned(self.push_constants).map_err(|err| {
            RhiError::InvalidArgument(format!(
                "push constants of {} bytes do not decode as {} bytes: {err}",
                self.push_constants.len(),
                size_of::<T>()
            ))
        })
    }

    fn binding(&self, binding: usize) -> RhiResult<&HostMemory> {
        self.buffers.get(binding).map(AsRef::as_ref).ok_or_else(|| {
            RhiError::InvalidArgument(format!(
                "kernel reads binding {binding} but only {} buffers are bound",
                self.buffers.len()
            ))
        })
    }

    /// Element `index` of binding `binding`, viewed as an array of `T`.
    ///
    /// # Errors
    /// [`RhiError::InvalidArgument`] for missing bindings or out-of-range elements.
    pub fn read<T: Pod>(&self, binding: usize, index: usize) -> RhiResult<T> {
        let bytes = self
            .binding(binding)?
            .read((index * size_of::<T>()) as u64, size_of::<T>() as u64)?;
        Ok(bytemuck::pod_read_unaligned(&bytes))
    }

    /// Whole binding decoded as `T` elements. Trailing bytes are ignored.
    ///
    /// # Errors
    /// [`RhiError::InvalidArgument`] for missing bindings.
    pub fn read_all<T: Pod>(&self, binding: usize) -> RhiResult<Vec<T>> {
        let memory = self.binding(binding)?;
        let bytes = memory.lock();
        Ok(bytes
            .chunks_exact(size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    /// # Errors
    /// [`RhiError::InvalidArgument`] for missing bindings or out-of-range elements.
    pub fn write<T: Pod>(&self, binding: usize, index: usize, value: T) -> RhiResult<()> {
        self.binding(binding)?
            .write((index * size_of::<T>()) as u64, bytemuck::bytes_of(&value))
    }

    /// # Errors
    /// [`RhiError::InvalidArgument`] for missing bindings or slices that do not fit.
    pub fn write_all<T: Pod>(&self, binding: usize, first: usize, values: &[T]) -> RhiResult<()> {
        self.binding(binding)?
            .write((first * size_of::<T>()) as u64, bytemuck::cast_slice(values))
    }
}
