//! Vulkan backend for the `rhi` recording engine, built on [`ash`].
//!
//! Every barrier batch maps onto one `vkCmdPipelineBarrier`: the recorder groups transitions
//! by their source and destination stage masks, so a commit issues one native call per
//! distinct stage pair. Render passes use dynamic rendering.
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
    clippy::too_many_arguments,
    clippy::exhaustive_enums,
    clippy::exhaustive_structs,
    reason = "Native call signatures mirror the Vulkan API one to one"
)]

pub mod commands;
pub mod device;
pub mod recording;
pub mod translate;

pub use commands::{AshCommandBuffer, DeviceExtensions, ExtensionLoaders, TraceRegions, VulkanCommands};
pub use device::{AshQueue, NativeQueue, ShaderTableRegistry, VulkanDevice};
pub use recording::{MAX_INLINE_UPDATE, VulkanRecording};
