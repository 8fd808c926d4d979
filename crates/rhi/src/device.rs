//! The backend seam a [`crate::CommandQueue`] submits through.

use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::debug::DebugSink;
use crate::error::RhiResult;
use crate::queue::Fence;
use crate::recorder::RecordingContext;

/// Static description of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub backend: String,
    pub name: String,
    /// Whether recordings receive explicit barrier batches.
    pub explicit_barriers: bool,
}

/// A backend device able to open recording sessions and execute their output.
pub trait Device {
    type Recording: RecordingContext;

    fn info(&self) -> DeviceInfo;

    /// Sink every recorder created for this device reports to.
    fn debug_sink(&self) -> &dyn DebugSink;

    /// Open a fresh native recording.
    ///
    /// # Errors
    /// Native allocation failures.
    fn create_recording(&self) -> RhiResult<Self::Recording>;

    /// Execute finished recordings in the given order.
    ///
    /// # Errors
    /// Native submission failures or device loss.
    fn submit(&self, recordings: Vec<<Self::Recording as RecordingContext>::Output>) -> RhiResult<()>;

    /// Block until `fence` reaches `value`.
    ///
    /// # Errors
    /// [`crate::RhiError::FenceNotReached`] once `timeout` expires.
    fn wait_for_fence(&self, fence: &Fence, value: u64, timeout: Duration) -> RhiResult<()> {
        fence.wait(value, timeout)
    }
}
