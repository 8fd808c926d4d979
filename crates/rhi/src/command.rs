//! The closed set of recordable commands.
//!
//! [`Command`] is the wire contract between encoders and recorders. Every recorder matches on it
//! exhaustively, so adding a variant fails to compile until each backend handles it.

use core::fmt;
use core::mem::size_of;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::pass::{ComputeState, RayTracingState, RenderPassDesc, RenderState, BufferOffsetPair};
use crate::resource::{
    AccelerationStructure, Buffer, BufferRange, Extent3d, Offset3d, QueryKind, QueryPool,
    ResourceState, SubresourceRange, Texture,
};
use crate::scratch::ScratchSlice;

/// Host function run when the recorder reaches an [`ExecuteCallback`] record.
pub type HostCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone)]
pub struct CopyBuffer {
    pub dst: Buffer,
    pub dst_offset: u64,
    pub src: Buffer,
    pub src_offset: u64,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct CopyTexture {
    pub dst: Texture,
    pub dst_subresource: SubresourceRange,
    pub dst_offset: Offset3d,
    pub src: Texture,
    pub src_subresource: SubresourceRange,
    pub src_offset: Offset3d,
    pub extent: Extent3d,
}

#[derive(Debug, Clone)]
pub struct CopyTextureToBuffer {
    pub dst: Buffer,
    pub dst_offset: u64,
    pub dst_size: u64,
    pub dst_row_pitch: u64,
    pub src: Texture,
    pub src_subresource: SubresourceRange,
    pub src_offset: Offset3d,
    pub extent: Extent3d,
}

#[derive(Debug, Clone)]
pub struct ClearBuffer {
    pub buffer: Buffer,
    pub range: BufferRange,
}

#[derive(Debug, Clone)]
pub struct ClearTextureFloat {
    pub texture: Texture,
    pub range: SubresourceRange,
    pub value: [f32; 4],
}

#[derive(Debug, Clone)]
pub struct ClearTextureUint {
    pub texture: Texture,
    pub range: SubresourceRange,
    pub value: [u32; 4],
}

#[derive(Debug, Clone)]
pub struct ClearTextureDepthStencil {
    pub texture: Texture,
    pub range: SubresourceRange,
    pub clear_depth: bool,
    pub depth: f32,
    pub clear_stencil: bool,
    pub stencil: u8,
}

/// Tightly packed texel rows stored in the command buffer's scratch memory.
#[derive(Debug, Clone)]
pub struct UploadTextureData {
    pub dst: Texture,
    pub range: SubresourceRange,
    pub offset: Offset3d,
    pub extent: Extent3d,
    pub row_pitch: u64,
    pub data: ScratchSlice,
}

#[derive(Debug, Clone)]
pub struct UploadBufferData {
    pub dst: Buffer,
    pub offset: u64,
    pub data: ScratchSlice,
}

/// Copy `count` 64-bit query results starting at `index` into `buffer` at `offset`.
#[derive(Debug, Clone)]
pub struct ResolveQuery {
    pub pool: QueryPool,
    pub index: u32,
    pub count: u32,
    pub buffer: Buffer,
    pub offset: u64,
}

#[derive(Debug, Clone)]
pub struct BeginRenderPass {
    pub desc: RenderPassDesc,
}

#[derive(Debug, Clone, Copy)]
pub struct EndRenderPass;

#[derive(Debug, Clone)]
pub struct SetRenderState {
    pub state: RenderState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Draw {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawIndexed {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    pub first_instance: u32,
}

#[derive(Debug, Clone)]
pub struct DrawIndirect {
    pub max_draw_count: u32,
    pub arg_buffer: Buffer,
    pub arg_offset: u64,
    pub count_buffer: Option<Buffer>,
    pub count_offset: u64,
}

#[derive(Debug, Clone)]
pub struct DrawIndexedIndirect {
    pub max_draw_count: u32,
    pub arg_buffer: Buffer,
    pub arg_offset: u64,
    pub count_buffer: Option<Buffer>,
    pub count_offset: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawMeshTasks {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct BeginComputePass;

#[derive(Debug, Clone, Copy)]
pub struct EndComputePass;

#[derive(Debug, Clone)]
pub struct SetComputeState {
    pub state: ComputeState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchCompute {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

#[derive(Debug, Clone)]
pub struct DispatchComputeIndirect {
    pub arg_buffer: Buffer,
    pub offset: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct BeginRayTracingPass;

#[derive(Debug, Clone, Copy)]
pub struct EndRayTracingPass;

#[derive(Debug, Clone)]
pub struct SetRayTracingState {
    pub state: RayTracingState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchRays {
    pub ray_gen_index: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

/// Post-build property written into a query pool.
#[derive(Debug, Clone)]
pub struct AccelerationStructureQuery {
    pub kind: QueryKind,
    pub pool: QueryPool,
    pub first_index: u32,
}

#[derive(Debug, Clone)]
pub struct BuildAccelerationStructure {
    pub dst: AccelerationStructure,
    /// Source structure when refitting.
    pub src: Option<AccelerationStructure>,
    pub scratch: BufferOffsetPair,
    /// Geometry or instance buffers read by the build.
    pub inputs: Vec<BufferOffsetPair>,
    pub queries: Vec<AccelerationStructureQuery>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccelerationStructureCopyMode {
    Clone,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CopyAccelerationStructure {
    pub dst: AccelerationStructure,
    pub src: AccelerationStructure,
    pub mode: AccelerationStructureCopyMode,
}

#[derive(Debug, Clone)]
pub struct QueryAccelerationStructureProperties {
    pub structures: Vec<AccelerationStructure>,
    pub queries: Vec<AccelerationStructureQuery>,
}

#[derive(Debug, Clone)]
pub struct SerializeAccelerationStructure {
    pub dst: BufferOffsetPair,
    pub src: AccelerationStructure,
}

#[derive(Debug, Clone)]
pub struct DeserializeAccelerationStructure {
    pub dst: AccelerationStructure,
    pub src: BufferOffsetPair,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CooperativeVectorComponent {
    Float16,
    Float32,
}

impl CooperativeVectorComponent {
    pub const fn size(self) -> u64 {
        match self {
            Self::Float16 => 2,
            Self::Float32 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CooperativeVectorLayout {
    RowMajor,
    ColumnMajor,
}

/// One matrix re-laid-out by [`ConvertCooperativeVectorMatrix`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooperativeVectorMatrixDesc {
    pub rows: u32,
    pub cols: u32,
    pub component: CooperativeVectorComponent,
    pub src_layout: CooperativeVectorLayout,
    pub src_offset: u64,
    pub dst_layout: CooperativeVectorLayout,
    pub dst_offset: u64,
}

#[derive(Debug, Clone)]
pub struct ConvertCooperativeVectorMatrix {
    pub dst: Buffer,
    pub src: Buffer,
    pub matrices: Vec<CooperativeVectorMatrixDesc>,
}

/// Explicitly move a buffer to `state`. No native work besides the barrier.
#[derive(Debug, Clone)]
pub struct SetBufferState {
    pub buffer: Buffer,
    pub state: ResourceState,
}

#[derive(Debug, Clone)]
pub struct SetTextureState {
    pub texture: Texture,
    pub range: SubresourceRange,
    pub state: ResourceState,
}

/// Full execution and memory barrier.
#[derive(Debug, Clone, Copy)]
pub struct GlobalBarrier;

#[derive(Debug, Clone)]
pub struct PushDebugGroup {
    pub name: String,
    pub color: [f32; 3],
}

#[derive(Debug, Clone, Copy)]
pub struct PopDebugGroup;

#[derive(Debug, Clone)]
pub struct InsertDebugMarker {
    pub name: String,
    pub color: [f32; 3],
}

#[derive(Debug, Clone)]
pub struct WriteTimestamp {
    pub pool: QueryPool,
    pub index: u32,
}

#[derive(Clone)]
pub struct ExecuteCallback {
    pub callback: HostCallback,
}

impl fmt::Debug for ExecuteCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecuteCallback").finish_non_exhaustive()
    }
}

/// Typed access to one command payload.
pub trait Payload: Sized {
    const ID: CommandId;

    fn into_command(self) -> Command;

    fn from_command(command: &Command) -> Option<&Self>;
}

macro_rules! command_set {
    ($($name:ident),* $(,)?) => {
        /// Discriminant of a [`Command`].
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum CommandId {
            $($name,)*
        }

        /// One recorded command.
        #[derive(Debug, Clone)]
        pub enum Command {
            $($name($name),)*
        }

        impl Command {
            pub const fn id(&self) -> CommandId {
                match self {
                    $(Self::$name(_) => CommandId::$name,)*
                }
            }
        }

        $(
            impl Payload for $name {
                const ID: CommandId = CommandId::$name;

                #[inline]
                fn into_command(self) -> Command {
                    Command::$name(self)
                }

                #[inline]
                fn from_command(command: &Command) -> Option<&Self> {
                    match command {
                        Command::$name(payload) => Some(payload),
                        _ => None,
                    }
                }
            }
        )*
    };
}

command_set!(
    CopyBuffer,
    CopyTexture,
    CopyTextureToBuffer,
    ClearBuffer,
    ClearTextureFloat,
    ClearTextureUint,
    ClearTextureDepthStencil,
    UploadTextureData,
    UploadBufferData,
    ResolveQuery,
    BeginRenderPass,
    EndRenderPass,
    SetRenderState,
    Draw,
    DrawIndexed,
    DrawIndirect,
    DrawIndexedIndirect,
    DrawMeshTasks,
    BeginComputePass,
    EndComputePass,
    SetComputeState,
    DispatchCompute,
    DispatchComputeIndirect,
    BeginRayTracingPass,
    EndRayTracingPass,
    SetRayTracingState,
    DispatchRays,
    BuildAccelerationStructure,
    CopyAccelerationStructure,
    QueryAccelerationStructureProperties,
    SerializeAccelerationStructure,
    DeserializeAccelerationStructure,
    ConvertCooperativeVectorMatrix,
    SetBufferState,
    SetTextureState,
    GlobalBarrier,
    PushDebugGroup,
    PopDebugGroup,
    InsertDebugMarker,
    WriteTimestamp,
    ExecuteCallback,
);

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Command {
    /// Approximate arena footprint, used for the recording budget.
    pub fn footprint(&self) -> usize {
        let inline = size_of::<Self>();
        let heap = match self {
            Self::BeginRenderPass(cmd) => {
                cmd.desc.color_attachments.len() * size_of::<crate::pass::ColorAttachment>()
            }
            Self::SetRenderState(cmd) => {
                cmd.state.vertex_buffers.len() * size_of::<BufferOffsetPair>()
                    + cmd.state.viewports.len() * size_of::<crate::pass::Viewport>()
                    + cmd.state.scissor_rects.len() * size_of::<crate::pass::ScissorRect>()
            }
            Self::BuildAccelerationStructure(cmd) => {
                cmd.inputs.len() * size_of::<BufferOffsetPair>()
                    + cmd.queries.len() * size_of::<AccelerationStructureQuery>()
            }
            Self::QueryAccelerationStructureProperties(cmd) => {
                cmd.structures.len() * size_of::<AccelerationStructure>()
                    + cmd.queries.len() * size_of::<AccelerationStructureQuery>()
            }
            Self::ConvertCooperativeVectorMatrix(cmd) => {
                cmd.matrices.len() * size_of::<CooperativeVectorMatrixDesc>()
            }
            Self::PushDebugGroup(cmd) => cmd.name.len(),
            Self::InsertDebugMarker(cmd) => cmd.name.len(),
            _ => 0,
        };
        inline + heap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{BufferDesc, NativeHandle};

    #[test]
    fn payload_roundtrips_through_command() {
        let buffer = Buffer::new(BufferDesc::new(8), NativeHandle::NULL);
        let command = SetBufferState {
            buffer,
            state: ResourceState::CopySource,
        }
        .into_command();
        assert_eq!(command.id(), CommandId::SetBufferState);
        assert!(SetBufferState::from_command(&command).is_some());
        assert!(ClearBuffer::from_command(&command).is_none());
    }

    #[test]
    fn debug_names_count_toward_footprint() {
        let short = PushDebugGroup {
            name: String::new(),
            color: [0.0; 3],
        }
        .into_command();
        let long = PushDebugGroup {
            name: "shadow cascades".into(),
            color: [0.0; 3],
        }
        .into_command();
        assert_eq!(long.footprint() - short.footprint(), "shadow cascades".len());
    }
}
