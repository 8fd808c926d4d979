//! `D3D12_RESOURCE_STATES` and the mapping from engine states.

use bitflags::bitflags;
use rhi::ResourceState;

bitflags! {
    /// Bit values match `D3D12_RESOURCE_STATES`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceStates: u32 {
        const COMMON = 0;
        const VERTEX_AND_CONSTANT_BUFFER = 0x1;
        const INDEX_BUFFER = 0x2;
        const RENDER_TARGET = 0x4;
        const UNORDERED_ACCESS = 0x8;
        const DEPTH_WRITE = 0x10;
        const DEPTH_READ = 0x20;
        const NON_PIXEL_SHADER_RESOURCE = 0x40;
        const PIXEL_SHADER_RESOURCE = 0x80;
        const STREAM_OUT = 0x100;
        const INDIRECT_ARGUMENT = 0x200;
        const COPY_DEST = 0x400;
        const COPY_SOURCE = 0x800;
        const RESOLVE_DEST = 0x1000;
        const RESOLVE_SOURCE = 0x2000;
        const RAYTRACING_ACCELERATION_STRUCTURE = 0x40_0000;
    }
}

impl ResourceStates {
    pub const PRESENT: Self = Self::COMMON;

    pub const GENERIC_READ: Self = Self::VERTEX_AND_CONSTANT_BUFFER
        .union(Self::INDEX_BUFFER)
        .union(Self::NON_PIXEL_SHADER_RESOURCE)
        .union(Self::PIXEL_SHADER_RESOURCE)
        .union(Self::INDIRECT_ARGUMENT)
        .union(Self::COPY_SOURCE);

    /// Native state for an engine state.
    pub const fn from_state(state: ResourceState) -> Self {
        match state {
            ResourceState::Undefined | ResourceState::General => Self::COMMON,
            ResourceState::VertexBuffer | ResourceState::ConstantBuffer => {
                Self::VERTEX_AND_CONSTANT_BUFFER
            }
            ResourceState::IndexBuffer => Self::INDEX_BUFFER,
            ResourceState::StreamOutput => Self::STREAM_OUT,
            ResourceState::ShaderResource => {
                Self::PIXEL_SHADER_RESOURCE.union(Self::NON_PIXEL_SHADER_RESOURCE)
            }
            ResourceState::UnorderedAccess => Self::UNORDERED_ACCESS,
            ResourceState::RenderTarget => Self::RENDER_TARGET,
            ResourceState::DepthRead => Self::DEPTH_READ,
            ResourceState::DepthWrite => Self::DEPTH_WRITE,
            ResourceState::Present => Self::PRESENT,
            ResourceState::IndirectArgument => Self::INDIRECT_ARGUMENT,
            ResourceState::CopySource => Self::COPY_SOURCE,
            ResourceState::CopyDestination => Self::COPY_DEST,
            ResourceState::ResolveSource => Self::RESOLVE_SOURCE,
            ResourceState::ResolveDestination => Self::RESOLVE_DEST,
            ResourceState::AccelerationStructure => Self::RAYTRACING_ACCELERATION_STRUCTURE,
            ResourceState::AccelerationStructureBuildInput => Self::NON_PIXEL_SHADER_RESOURCE,
        }
    }
}
