//! Engine states and formats expressed as Vulkan layouts, access masks and stage masks.

use ash::vk;
use rhi::{Format, IndexFormat, LoadOp, Offset3d, ResourceState, RhiError, RhiResult, StoreOp};

const ALL_SHADER_STAGES: vk::PipelineStageFlags = vk::PipelineStageFlags::from_raw(
    vk::PipelineStageFlags::VERTEX_SHADER.as_raw()
        | vk::PipelineStageFlags::TESSELLATION_CONTROL_SHADER.as_raw()
        | vk::PipelineStageFlags::TESSELLATION_EVALUATION_SHADER.as_raw()
        | vk::PipelineStageFlags::GEOMETRY_SHADER.as_raw()
        | vk::PipelineStageFlags::FRAGMENT_SHADER.as_raw()
        | vk::PipelineStageFlags::COMPUTE_SHADER.as_raw()
        | vk::PipelineStageFlags::RAY_TRACING_SHADER_KHR.as_raw(),
);

const FRAGMENT_TESTS: vk::PipelineStageFlags = vk::PipelineStageFlags::from_raw(
    vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS.as_raw()
        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS.as_raw(),
);

/// Image layout a texture must be in while used in `state`.
///
/// Buffer-only states have no dedicated layout and fall back to `GENERAL`.
pub fn image_layout(state: ResourceState) -> vk::ImageLayout {
    match state {
        ResourceState::Undefined => vk::ImageLayout::UNDEFINED,
        ResourceState::RenderTarget => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ResourceState::DepthRead => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        ResourceState::DepthWrite => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ResourceState::ShaderResource => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ResourceState::CopyDestination | ResourceState::ResolveDestination => {
            vk::ImageLayout::TRANSFER_DST_OPTIMAL
        }
        ResourceState::CopySource | ResourceState::ResolveSource => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ResourceState::Present => vk::ImageLayout::PRESENT_SRC_KHR,
        ResourceState::General
        | ResourceState::UnorderedAccess
        | ResourceState::VertexBuffer
        | ResourceState::IndexBuffer
        | ResourceState::ConstantBuffer
        | ResourceState::StreamOutput
        | ResourceState::IndirectArgument
        | ResourceState::AccelerationStructure
        | ResourceState::AccelerationStructureBuildInput => vk::ImageLayout::GENERAL,
    }
}

pub fn access_flags(state: ResourceState) -> vk::AccessFlags {
    match state {
        ResourceState::Undefined | ResourceState::Present => vk::AccessFlags::empty(),
        ResourceState::VertexBuffer => vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
        ResourceState::IndexBuffer => vk::AccessFlags::INDEX_READ,
        ResourceState::ConstantBuffer => vk::AccessFlags::UNIFORM_READ,
        ResourceState::StreamOutput => vk::AccessFlags::TRANSFORM_FEEDBACK_WRITE_EXT,
        ResourceState::ShaderResource => vk::AccessFlags::SHADER_READ,
        ResourceState::UnorderedAccess => vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
        ResourceState::RenderTarget => {
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        }
        ResourceState::DepthRead => vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
        ResourceState::DepthWrite => {
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        }
        ResourceState::IndirectArgument => vk::AccessFlags::INDIRECT_COMMAND_READ,
        ResourceState::CopyDestination | ResourceState::ResolveDestination => vk::AccessFlags::TRANSFER_WRITE,
        ResourceState::CopySource | ResourceState::ResolveSource => vk::AccessFlags::TRANSFER_READ,
        ResourceState::AccelerationStructure => {
            vk::AccessFlags::ACCELERATION_STRUCTURE_READ_KHR | vk::AccessFlags::ACCELERATION_STRUCTURE_WRITE_KHR
        }
        ResourceState::AccelerationStructureBuildInput => vk::AccessFlags::ACCELERATION_STRUCTURE_READ_KHR,
        ResourceState::General => vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
    }
}

/// Pipeline stages that touch a resource in `state`, on the given side of a barrier.
pub fn stage_flags(state: ResourceState, is_source: bool) -> vk::PipelineStageFlags {
    match state {
        ResourceState::Undefined if is_source => vk::PipelineStageFlags::TOP_OF_PIPE,
        ResourceState::Present if is_source => {
            vk::PipelineStageFlags::ALL_GRAPHICS | vk::PipelineStageFlags::ALL_COMMANDS
        }
        ResourceState::Undefined | ResourceState::Present => vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        ResourceState::VertexBuffer | ResourceState::IndexBuffer => vk::PipelineStageFlags::VERTEX_INPUT,
        ResourceState::ConstantBuffer | ResourceState::ShaderResource | ResourceState::UnorderedAccess => {
            ALL_SHADER_STAGES
        }
        ResourceState::StreamOutput => vk::PipelineStageFlags::TRANSFORM_FEEDBACK_EXT,
        ResourceState::RenderTarget => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ResourceState::DepthRead | ResourceState::DepthWrite => FRAGMENT_TESTS,
        ResourceState::IndirectArgument => vk::PipelineStageFlags::DRAW_INDIRECT,
        ResourceState::CopySource
        | ResourceState::CopyDestination
        | ResourceState::ResolveSource
        | ResourceState::ResolveDestination => vk::PipelineStageFlags::TRANSFER,
        ResourceState::AccelerationStructure => {
            ALL_SHADER_STAGES | vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR
        }
        ResourceState::AccelerationStructureBuildInput => vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR,
        ResourceState::General => vk::PipelineStageFlags::ALL_COMMANDS,
    }
}

/// Stage mask carried through a barrier batch scope.
///
/// # Errors
/// [`RhiError::InvalidArgument`] when the scope does not fit a Vulkan stage mask.
pub fn stages_from_scope(scope: u64) -> RhiResult<vk::PipelineStageFlags> {
    vk::Flags::try_from(scope)
        .map(vk::PipelineStageFlags::from_raw)
        .map_err(|_| RhiError::InvalidArgument(format!("pipeline stage scope {scope:#x}")))
}

pub fn aspect_mask(format: Format) -> vk::ImageAspectFlags {
    if format.has_stencil() {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else if format.is_depth() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

pub const fn index_type(format: IndexFormat) -> vk::IndexType {
    match format {
        IndexFormat::Uint16 => vk::IndexType::UINT16,
        IndexFormat::Uint32 => vk::IndexType::UINT32,
    }
}

pub const fn load_op(op: LoadOp) -> vk::AttachmentLoadOp {
    match op {
        LoadOp::Load => vk::AttachmentLoadOp::LOAD,
        LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
        LoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
    }
}

pub const fn store_op(op: StoreOp) -> vk::AttachmentStoreOp {
    match op {
        StoreOp::Store => vk::AttachmentStoreOp::STORE,
        StoreOp::DontCare => vk::AttachmentStoreOp::DONT_CARE,
    }
}

/// # Errors
/// [`RhiError::InvalidArgument`] for coordinates beyond `i32::MAX`.
pub fn offset(offset: Offset3d) -> RhiResult<vk::Offset3D> {
    let coordinate = |value: u32| {
        i32::try_from(value).map_err(|_| RhiError::InvalidArgument(format!("texel offset {value} out of range")))
    };
    Ok(vk::Offset3D {
        x: coordinate(offset.x)?,
        y: coordinate(offset.y)?,
        z: coordinate(offset.z)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_states_share_transfer_layouts() {
        assert_eq!(
            image_layout(ResourceState::CopyDestination),
            image_layout(ResourceState::ResolveDestination)
        );
        assert_eq!(image_layout(ResourceState::CopySource), vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        assert_eq!(image_layout(ResourceState::UnorderedAccess), vk::ImageLayout::GENERAL);
    }

    #[test]
    fn present_waits_on_everything_as_a_source() {
        assert_eq!(
            stage_flags(ResourceState::Present, true),
            vk::PipelineStageFlags::ALL_GRAPHICS | vk::PipelineStageFlags::ALL_COMMANDS
        );
        assert_eq!(stage_flags(ResourceState::Present, false), vk::PipelineStageFlags::BOTTOM_OF_PIPE);
        assert_eq!(stage_flags(ResourceState::Undefined, true), vk::PipelineStageFlags::TOP_OF_PIPE);
    }

    #[test]
    fn shader_states_cover_compute() {
        for state in [
            ResourceState::ConstantBuffer,
            ResourceState::ShaderResource,
            ResourceState::UnorderedAccess,
        ] {
            assert!(stage_flags(state, false).contains(vk::PipelineStageFlags::COMPUTE_SHADER));
        }
    }

    #[test]
    fn scopes_round_trip_through_stage_masks() {
        let stages = stage_flags(ResourceState::DepthWrite, true);
        let scope = u64::from(stages.as_raw());
        assert_eq!(stages_from_scope(scope), Ok(stages));
        assert!(stages_from_scope(u64::MAX).is_err());
    }

    #[test]
    fn depth_stencil_formats_carry_both_aspects() {
        assert_eq!(
            aspect_mask(Format::D24UnormS8Uint),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(aspect_mask(Format::D32Float), vk::ImageAspectFlags::DEPTH);
        assert_eq!(aspect_mask(Format::Rgba16Float), vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn oversized_offsets_are_rejected() {
        assert!(offset(Offset3d { x: u32::MAX, y: 0, z: 0 }).is_err());
        assert_eq!(
            offset(Offset3d { x: 1, y: 2, z: 3 }),
            Ok(vk::Offset3D { x: 1, y: 2, z: 3 })
        );
    }
}
