//! D3D12 backend for the `rhi` recording engine.
//!
//! The platform layer owns the COM objects and hands them in through [`GraphicsCommandList`]
//! and [`NativeQueue`]. Each commit becomes a single `ResourceBarrier` call, and a repeated
//! unordered-access request becomes a UAV barrier.
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
    reason = "Native call signatures mirror the D3D12 API one to one"
)]

pub mod command_list;
pub mod device;
pub mod recording;
pub mod states;

pub use command_list::{
    ALL_SUBRESOURCES, AccelerationStructureCopyMode, ClearFlags, DispatchRaysDesc,
    GpuVirtualAddress, GraphicsCommandList, IndirectSignature, ResourceBarrier,
    TextureCopyLocation,
};
pub use device::{D3d12Device, NativeQueue};
pub use recording::{D3d12Recording, translate_barrier};
pub use states::ResourceStates;
