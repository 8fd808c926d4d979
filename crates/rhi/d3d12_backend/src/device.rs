//! [`rhi::Device`] over a native D3D12 command queue.

use log::debug;
use rhi::{DebugSink, Device, DeviceInfo, LogSink, RhiResult};

use crate::command_list::GraphicsCommandList;
use crate::recording::D3d12Recording;

/// The `ID3D12CommandQueue` plus allocator pair owned by the platform layer.
pub trait NativeQueue {
    type List: GraphicsCommandList;

    fn adapter_name(&self) -> String;

    /// Reset an allocator and open a fresh list on it.
    ///
    /// # Errors
    /// Native allocation failures.
    fn create_command_list(&self) -> RhiResult<Self::List>;

    /// `ExecuteCommandLists` with every list in order.
    ///
    /// # Errors
    /// Device removal or other native failures.
    fn execute_command_lists(&self, lists: Vec<Self::List>) -> RhiResult<()>;
}

pub struct D3d12Device<Q> {
    queue: Q,
    sink: Box<dyn DebugSink>,
}

impl<Q: NativeQueue> D3d12Device<Q> {
    pub fn new(queue: Q) -> Self {
        Self::with_sink(queue, LogSink)
    }

    pub fn with_sink(queue: Q, sink: impl DebugSink + 'static) -> Self {
        Self {
            queue,
            sink: Box::new(sink),
        }
    }

    #[inline]
    pub const fn queue(&self) -> &Q {
        &self.queue
    }
}

impl<Q: NativeQueue> Device for D3d12Device<Q> {
    type Recording = D3d12Recording<Q::List>;

    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            backend: "d3d12".into(),
            name: self.queue.adapter_name(),
            explicit_barriers: true,
        }
    }

    fn debug_sink(&self) -> &dyn DebugSink {
        self.sink.as_ref()
    }

    fn create_recording(&self) -> RhiResult<Self::Recording> {
        Ok(D3d12Recording::new(self.queue.create_command_list()?))
    }

    fn submit(&self, recordings: Vec<Q::List>) -> RhiResult<()> {
        debug!(target: "rhi::d3d12", "ExecuteCommandLists x{}", recordings.len());
        self.queue.execute_command_lists(recordings)
    }
}
