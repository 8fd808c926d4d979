//! wgpu backend for the `rhi` recording engine.
//!
//! wgpu synchronizes resources on its own, so the recorder only tracks states here and
//! never commits a barrier. Engine handles resolve to wgpu objects through
//! [`WgpuResources`]; pipelines and bind groups are built by the caller and registered with
//! the [`WgpuDevice`].
#![allow(
    clippy::missing_docs_in_private_items,
    clippy::missing_inline_in_public_items,
    clippy::module_name_repetitions,
    clippy::implicit_return,
    clippy::question_mark_used,
    clippy::arithmetic_side_effects,
    clippy::as_conversions,
    clippy::pub_use,
    clippy::missing_trait_methods,
    clippy::single_call_fn,
    clippy::exhaustive_enums,
    clippy::exhaustive_structs,
    clippy::absolute_paths,
    reason = "Engine and wgpu share type names, so wgpu types are spelled out in full"
)]

pub mod device;
pub mod error;
pub mod recording;
pub mod resources;
pub mod translate;

pub use device::WgpuDevice;
pub use error::{submit_with_validation, with_validation_scope};
pub use recording::WgpuRecording;
pub use resources::WgpuResources;
