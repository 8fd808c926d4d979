//! Host-memory reference backend for the `rhi` recording engine.
//!
//! Buffers are byte vectors, compute pipelines are Rust closures and every command runs the
//! moment the recorder reaches it. Useful for tests and for checking what a command buffer
//! actually computes without a GPU.
#![allow(
    clippy::missing_docs_in_private_items,
    clippy::missing_inline_in_public_items,
    clippy::module_name_repetitions,
    clippy::implicit_return,
    clippy::question_mark_used,
    clippy::std_instead_of_core,
    clippy::arithmetic_side_effects,
    clippy::indexing_slicing,
    clippy::as_conversions,
    clippy::pub_use,
    clippy::missing_trait_methods,
    clippy::single_call_fn,
    reason = "Host execution is byte arithmetic over bounds-checked ranges"
)]

pub mod device;
pub mod kernel;
pub mod memory;
pub mod recording;

pub use device::CpuDevice;
pub use kernel::{HostKernel, KernelInvocation};
pub use memory::{CpuMemory, HostMemory};
pub use recording::{CpuRecording, CpuWork};
