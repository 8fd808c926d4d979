//! Ordered submission of command buffers with fence waits and signals.

use core::time::Duration;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use log::debug;
use tracing::info_span;

use crate::command_buffer::CommandBuffer;
use crate::config::{FenceWait, RhiConfig};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::recorder::{CommandRecorder, RecordStats};
use crate::resource::ResourceId;

/// Monotonic 64-bit timeline shared between host and queue.
#[derive(Debug)]
pub struct Fence {
    id: ResourceId,
    value: Mutex<u64>,
    reached: Condvar,
}

impl Fence {
    pub fn new(initial: u64) -> Self {
        Self {
            id: ResourceId::next(),
            value: Mutex::new(initial),
            reached: Condvar::new(),
        }
    }

    #[inline]
    pub const fn id(&self) -> ResourceId {
        self.id
    }

    fn lock(&self) -> MutexGuard<'_, u64> {
        self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current_value(&self) -> u64 {
        *self.lock()
    }

    /// Advance to `value`. Lower values are ignored.
    pub fn signal(&self, value: u64) {
        let mut current = self.lock();
        if value > *current {
            *current = value;
            self.reached.notify_all();
        }
    }

    /// Block the calling thread until the fence reaches `value` or `timeout` elapses.
    ///
    /// # Errors
    /// [`RhiError::FenceNotReached`] on timeout.
    pub fn wait(&self, value: u64, timeout: Duration) -> RhiResult<()> {
        let guard = self.lock();
        let (guard, _) = self
            .reached
            .wait_timeout_while(guard, timeout, |current| *current < value)
            .unwrap_or_else(PoisonError::into_inner);
        if *guard >= value {
            Ok(())
        } else {
            Err(RhiError::FenceNotReached {
                fence: self.id.0,
                required: value,
                current: *guard,
            })
        }
    }
}

impl Default for Fence {
    fn default() -> Self {
        Self::new(0)
    }
}

/// One batch handed to [`CommandQueue::submit`].
#[derive(Debug, Default)]
pub struct SubmitDesc<'desc> {
    pub buffers: &'desc [CommandBuffer],
    pub waits: Vec<(&'desc Fence, u64)>,
    pub signals: Vec<(&'desc Fence, u64)>,
}

impl<'desc> SubmitDesc<'desc> {
    pub fn new(buffers: &'desc [CommandBuffer]) -> Self {
        Self {
            buffers,
            waits: Vec::new(),
            signals: Vec::new(),
        }
    }

    #[must_use]
    pub fn wait(mut self, fence: &'desc Fence, value: u64) -> Self {
        self.waits.push((fence, value));
        self
    }

    #[must_use]
    pub fn signal(mut self, fence: &'desc Fence, value: u64) -> Self {
        self.signals.push((fence, value));
        self
    }
}

/// Records command buffers against a device and submits them in caller order.
pub struct CommandQueue<D: Device> {
    device: Arc<D>,
    config: RhiConfig,
}

impl<D: Device> CommandQueue<D> {
    pub const fn new(device: Arc<D>, config: RhiConfig) -> Self {
        Self { device, config }
    }

    #[inline]
    pub fn device(&self) -> &D {
        &self.device
    }

    #[inline]
    pub const fn config(&self) -> &RhiConfig {
        &self.config
    }

    /// Wait on `desc.waits`, record every buffer with a fresh recorder, submit the outputs in
    /// order and then signal `desc.signals`.
    ///
    /// Nothing is submitted and no fence is signalled if a wait or a recording fails.
    ///
    /// # Errors
    /// [`RhiError::FenceNotReached`] for unreached waits, and any recording or native
    /// submission failure.
    pub fn submit(&self, desc: &SubmitDesc<'_>) -> RhiResult<Vec<RecordStats>> {
        let _span = info_span!("rhi.submit", buffers = desc.buffers.len()).entered();
        for &(fence, value) in &desc.waits {
            self.wait_for(fence, value)?;
        }

        let mut outputs = Vec::with_capacity(desc.buffers.len());
        let mut stats = Vec::with_capacity(desc.buffers.len());
        for buffer in desc.buffers {
            let context = self.device.create_recording()?;
            let recorded = CommandRecorder::new(context, self.device.debug_sink())
                .with_trace(self.config.trace_commands)
                .record(buffer)?;
            outputs.push(recorded.output);
            stats.push(recorded.stats);
        }
        self.device.submit(outputs)?;

        for &(fence, value) in &desc.signals {
            fence.signal(value);
        }
        debug!(
            target: "rhi::queue",
            "submitted {} command buffers, signalled {} fences",
            desc.buffers.len(),
            desc.signals.len()
        );
        Ok(stats)
    }

    fn wait_for(&self, fence: &Fence, value: u64) -> RhiResult<()> {
        let current = fence.current_value();
        if current >= value {
            return Ok(());
        }
        match self.config.fence_wait {
            FenceWait::Fail => Err(RhiError::FenceNotReached {
                fence: fence.id().0,
                required: value,
                current,
            }),
            FenceWait::Device => {
                debug!(target: "rhi::queue", "waiting for fence {} to reach {value}", fence.id());
                self.device
                    .wait_for_fence(fence, value, self.config.fence_timeout())
            }
        }
    }
}
