//! Backend-agnostic command recording and resource-state synchronization.
//!
//! Commands are appended to a [`CommandList`] through a [`CommandEncoder`], finalized into a
//! [`CommandBuffer`] and handed to a [`CommandQueue`]. At submit time the queue drives one
//! [`CommandRecorder`] per buffer, which walks the list in order, asks [`StateTracking`] for the
//! barriers each command needs, and replays everything against a backend [`RecordingContext`].
#![allow(
    clippy::missing_docs_in_private_items,
    clippy::missing_inline_in_public_items,
    clippy::module_name_repetitions,
    clippy::too_many_lines,
    clippy::std_instead_of_core,
    clippy::std_instead_of_alloc,
    clippy::implicit_return,
    clippy::question_mark_used,
    clippy::arbitrary_source_item_ordering,
    clippy::single_call_fn,
    clippy::exhaustive_structs,
    clippy::exhaustive_enums,
    clippy::pub_use,
    clippy::field_scoped_visibility_modifiers,
    clippy::pattern_type_mismatch,
    clippy::ref_patterns,
    clippy::default_numeric_fallback,
    clippy::arithmetic_side_effects,
    clippy::integer_division,
    clippy::indexing_slicing,
    clippy::struct_field_names,
    clippy::missing_trait_methods,
    clippy::unused_self,
    reason = "Command payloads are plain data with public fields, and the recorder dispatches over a wide closed set of commands"
)]

pub mod binding;
pub mod command;
pub mod command_buffer;
pub mod command_list;
pub mod config;
pub mod debug;
pub mod device;
pub mod encoder;
pub mod error;
pub mod pass;
pub mod queue;
pub mod recorder;
pub mod resource;
pub mod scratch;
pub mod state_tracking;

pub use binding::{BindingCache, BindingData, BindingState, BoundResource};
pub use command::{Command, CommandId, HostCallback, Payload};
pub use command_buffer::CommandBuffer;
pub use command_list::{CommandHandle, CommandList, Commands};
pub use config::{FenceWait, RhiConfig};
pub use debug::{DebugSink, LogSink, Severity};
pub use device::{Device, DeviceInfo};
pub use encoder::{CommandEncoder, ComputePassEncoder, RayTracingPassEncoder, RenderPassEncoder};
pub use error::{RhiError, RhiResult};
pub use pass::{
    BufferOffsetPair, ColorAttachment, ComputeState, DepthStencilAttachment, IndexFormat, LoadOp,
    RayTracingState, RenderPassDesc, RenderState, ScissorRect, StoreOp, Viewport,
};
pub use queue::{CommandQueue, Fence, SubmitDesc};
pub use recorder::{
    BarrierBatch, BarrierModel, BindPoint, CommandRecorder, RecordStats, Recorded,
    RecordingContext,
};
pub use resource::{
    AccelerationStructure, Buffer, BufferDesc, BufferRange, ComputePipeline, Extent3d, Format,
    MemoryType, NativeHandle, Offset3d, QueryKind, QueryPool, RayTracingPipeline, RenderPipeline,
    ResourceId, ResourceState, ShaderTable, SubresourceRange, Texture, TextureDesc, TextureKind,
    TextureView,
};
pub use scratch::{ScratchAllocator, ScratchSlice};
pub use state_tracking::{BufferBarrier, StateTracking, TextureBarrier};
