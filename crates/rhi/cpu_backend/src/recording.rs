//! Recording context that executes every command on the host as it is recorded.

use core::mem::size_of;
use std::sync::Arc;

use log::{debug, trace};
use rhi::command::{
    ClearBuffer, ConvertCooperativeVectorMatrix, CooperativeVectorComponent,
    CooperativeVectorLayout, CooperativeVectorMatrixDesc, CopyBuffer, DispatchCompute,
    DispatchComputeIndirect, ResolveQuery, UploadBufferData,
};
use rhi::{
    BarrierModel, BindPoint, BindingData, CommandId, ComputePipeline, QueryPool,
    RecordingContext, RhiError, RhiResult,
};

use crate::device::CpuShared;
use crate::kernel::{HostKernel, KernelInvocation};
use crate::memory::{HostMemory, copy_between};

/// What a finished CPU recording hands to [`crate::CpuDevice`] at submit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuWork {
    /// Host operations performed while recording.
    pub operations: usize,
    pub dispatches: usize,
}

/// One recording session on the CPU device.
pub struct CpuRecording {
    shared: Arc<CpuShared>,
    kernel: Option<HostKernel>,
    bindings: Option<BindingData>,
    debug_depth: usize,
    work: CpuWork,
}

impl CpuRecording {
    pub(crate) const fn new(shared: Arc<CpuShared>) -> Self {
        Self {
            shared,
            kernel: None,
            bindings: None,
            debug_depth: 0,
            work: CpuWork {
                operations: 0,
                dispatches: 0,
            },
        }
    }

    fn run_kernel(&mut self, group_count: [u32; 3]) -> RhiResult<()> {
        let Some(kernel) = &self.kernel else {
            return Err(RhiError::InvalidArgument(
                "dispatch without a bound host kernel".into(),
            ));
        };
        let (push_constants, buffers) = match &self.bindings {
            Some(bindings) => (
                bindings.push_constants(),
                bindings
                    .buffers()
                    .map(|buffer| self.shared.memory.get(buffer.id()))
                    .collect::<RhiResult<Vec<_>>>()?,
            ),
            None => (&[][..], Vec::new()),
        };
        trace!(target: "rhi::cpu", "dispatch {group_count:?} over {} buffers", buffers.len());
        kernel(&KernelInvocation::new(group_count, push_constants, &buffers))?;
        self.work.operations += 1;
        self.work.dispatches += 1;
        Ok(())
    }
}

impl RecordingContext for CpuRecording {
    type Output = CpuWork;

    fn backend(&self) -> &'static str {
        "cpu"
    }

    fn supports(&self, id: CommandId) -> bool {
        match id {
            CommandId::CopyBuffer
            | CommandId::ClearBuffer
            | CommandId::UploadBufferData
            | CommandId::ResolveQuery
            | CommandId::BeginComputePass
            | CommandId::EndComputePass
            | CommandId::SetComputeState
            | CommandId::DispatchCompute
            | CommandId::DispatchComputeIndirect
            | CommandId::ConvertCooperativeVectorMatrix
            | CommandId::SetBufferState
            | CommandId::SetTextureState
            | CommandId::GlobalBarrier
            | CommandId::PushDebugGroup
            | CommandId::PopDebugGroup
            | CommandId::InsertDebugMarker
            | CommandId::WriteTimestamp
            | CommandId::ExecuteCallback => true,
            CommandId::CopyTexture
            | CommandId::CopyTextureToBuffer
            | CommandId::ClearTextureFloat
            | CommandId::ClearTextureUint
            | CommandId::ClearTextureDepthStencil
            | CommandId::UploadTextureData
            | CommandId::BeginRenderPass
            | CommandId::EndRenderPass
            | CommandId::SetRenderState
            | CommandId::Draw
            | CommandId::DrawIndexed
            | CommandId::DrawIndirect
            | CommandId::DrawIndexedIndirect
            | CommandId::DrawMeshTasks
            | CommandId::BeginRayTracingPass
            | CommandId::EndRayTracingPass
            | CommandId::SetRayTracingState
            | CommandId::DispatchRays
            | CommandId::BuildAccelerationStructure
            | CommandId::CopyAccelerationStructure
            | CommandId::QueryAccelerationStructureProperties
            | CommandId::SerializeAccelerationStructure
            | CommandId::DeserializeAccelerationStructure => false,
        }
    }

    fn barrier_model() -> BarrierModel {
        BarrierModel::Implicit
    }

    fn global_barrier(&mut self) -> RhiResult<()> {
        Ok(())
    }

    fn copy_buffer(&mut self, cmd: &CopyBuffer) -> RhiResult<()> {
        let dst = self.shared.memory.get(cmd.dst.id())?;
        let src = self.shared.memory.get(cmd.src.id())?;
        copy_between(&dst, cmd.dst_offset, &src, cmd.src_offset, cmd.size)?;
        self.work.operations += 1;
        Ok(())
    }

    fn clear_buffer(&mut self, cmd: &ClearBuffer) -> RhiResult<()> {
        self.shared
            .memory
            .get(cmd.buffer.id())?
            .fill(cmd.range.offset, cmd.range.size, 0)?;
        self.work.operations += 1;
        Ok(())
    }

    fn upload_buffer_data(&mut self, cmd: &UploadBufferData, data: &[u8]) -> RhiResult<()> {
        self.shared.memory.get(cmd.dst.id())?.write(cmd.offset, data)?;
        self.work.operations += 1;
        Ok(())
    }

    fn resolve_query(&mut self, cmd: &ResolveQuery) -> RhiResult<()> {
        let values = self.shared.query_values(&cmd.pool, cmd.index, cmd.count)?;
        let bytes: Vec<u8> = values.iter().flat_map(|value| value.to_le_bytes()).collect();
        self.shared.memory.get(cmd.buffer.id())?.write(cmd.offset, &bytes)?;
        self.work.operations += 1;
        Ok(())
    }

    fn bind_compute_pipeline(&mut self, pipeline: &ComputePipeline) -> RhiResult<()> {
        self.kernel = Some(self.shared.kernel(pipeline)?);
        Ok(())
    }

    fn bind_bindings(&mut self, point: BindPoint, bindings: &BindingData) -> RhiResult<()> {
        if point == BindPoint::Compute {
            self.bindings = Some(bindings.clone());
        }
        Ok(())
    }

    fn dispatch_compute(&mut self, cmd: &DispatchCompute) -> RhiResult<()> {
        self.run_kernel([cmd.x, cmd.y, cmd.z])
    }

    fn dispatch_compute_indirect(&mut self, cmd: &DispatchComputeIndirect) -> RhiResult<()> {
        let args = self
            .shared
            .memory
            .get(cmd.arg_buffer.id())?
            .read(cmd.offset, 3 * size_of::<u32>() as u64)?;
        let counts: [u32; 3] = bytemuck::pod_read_unaligned(&args);
        self.run_kernel(counts)
    }

    fn end_compute_pass(&mut self) -> RhiResult<()> {
        self.kernel = None;
        self.bindings = None;
        Ok(())
    }

    fn convert_cooperative_vector_matrix(
        &mut self,
        cmd: &ConvertCooperativeVectorMatrix,
    ) -> RhiResult<()> {
        let dst = self.shared.memory.get(cmd.dst.id())?;
        let src = self.shared.memory.get(cmd.src.id())?;
        for matrix in &cmd.matrices {
            convert_matrix(&dst, &src, matrix)?;
        }
        self.work.operations += 1;
        Ok(())
    }

    fn push_debug_group(&mut self, name: &str, _color: [f32; 3]) -> RhiResult<()> {
        self.debug_depth += 1;
        debug!(target: "rhi::cpu", "{:>width$}{name}", "", width = self.debug_depth * 2);
        Ok(())
    }

    fn pop_debug_group(&mut self) -> RhiResult<()> {
        self.debug_depth = self.debug_depth.saturating_sub(1);
        Ok(())
    }

    fn insert_debug_marker(&mut self, name: &str, _color: [f32; 3]) -> RhiResult<()> {
        debug!(target: "rhi::cpu", "marker {name}");
        Ok(())
    }

    fn write_timestamp(&mut self, pool: &QueryPool, index: u32) -> RhiResult<()> {
        self.shared.write_timestamp(pool, index)?;
        self.work.operations += 1;
        Ok(())
    }

    fn finish(self) -> RhiResult<CpuWork> {
        Ok(self.work)
    }
}

const fn element_index(layout: CooperativeVectorLayout, rows: u32, cols: u32, row: u32, col: u32) -> u64 {
    match layout {
        CooperativeVectorLayout::RowMajor => row as u64 * cols as u64 + col as u64,
        CooperativeVectorLayout::ColumnMajor => col as u64 * rows as u64 + row as u64,
    }
}

/// Re-lay one `f32` matrix from `src` into `dst`.
fn convert_matrix(dst: &HostMemory, src: &HostMemory, desc: &CooperativeVectorMatrixDesc) -> RhiResult<()> {
    if desc.component != CooperativeVectorComponent::Float32 {
        return Err(RhiError::Unsupported(CommandId::ConvertCooperativeVectorMatrix));
    }
    let element = desc.component.size();
    let len = u64::from(desc.rows) * u64::from(desc.cols) * element;
    let input = src.read(desc.src_offset, len)?;
    let mut output = vec![0_u8; input.len()];
    for row in 0..desc.rows {
        for col in 0..desc.cols {
            let from = (element_index(desc.src_layout, desc.rows, desc.cols, row, col) * element) as usize;
            let to = (element_index(desc.dst_layout, desc.rows, desc.cols, row, col) * element) as usize;
            let width = element as usize;
            output[to..to + width].copy_from_slice(&input[from..from + width]);
        }
    }
    dst.write(desc.dst_offset, &output)
}
