//! The `vkCmd*` surface the recorder drives, and its implementation over [`ash`].
//!
//! [`VulkanCommands`] exists so the recording logic can run against any command sink. The
//! production sink is [`AshCommandBuffer`], which forwards every call to a command buffer in
//! the recording state.

use ash::vk;
use bitflags::bitflags;
use rhi::{RhiError, RhiResult};

bitflags! {
    /// Optional device extensions a command sink was created with.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DeviceExtensions: u32 {
        const DEBUG_UTILS = 1 << 0;
        const MESH_SHADER = 1 << 1;
        const RAY_TRACING_PIPELINE = 1 << 2;
        const ACCELERATION_STRUCTURE = 1 << 3;
    }
}

/// Shader binding table regions handed to `vkCmdTraceRaysKHR`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceRegions {
    pub raygen: vk::StridedDeviceAddressRegionKHR,
    pub miss: vk::StridedDeviceAddressRegionKHR,
    pub hit: vk::StridedDeviceAddressRegionKHR,
    pub callable: vk::StridedDeviceAddressRegionKHR,
}

/// One command buffer in the recording state. Methods mirror `vkCmd*` minus the buffer handle.
pub trait VulkanCommands {
    fn extensions(&self) -> DeviceExtensions;

    fn pipeline_barrier(
        &mut self,
        src_stages: vk::PipelineStageFlags,
        dst_stages: vk::PipelineStageFlags,
        memory: &[vk::MemoryBarrier<'_>],
        buffers: &[vk::BufferMemoryBarrier<'_>],
        images: &[vk::ImageMemoryBarrier<'_>],
    );

    fn copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]);

    fn copy_image(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageCopy],
    );

    fn copy_image_to_buffer(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Buffer,
        regions: &[vk::BufferImageCopy],
    );

    fn fill_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, size: vk::DeviceSize, data: u32);

    /// Inline update, at most 65536 bytes with offset and size multiples of four.
    fn update_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]);

    fn clear_color_image(
        &mut self,
        image: vk::Image,
        layout: vk::ImageLayout,
        value: &vk::ClearColorValue,
        ranges: &[vk::ImageSubresourceRange],
    );

    fn clear_depth_stencil_image(
        &mut self,
        image: vk::Image,
        layout: vk::ImageLayout,
        value: &vk::ClearDepthStencilValue,
        ranges: &[vk::ImageSubresourceRange],
    );

    fn begin_rendering(&mut self, info: &vk::RenderingInfo<'_>);

    fn end_rendering(&mut self);

    fn resolve_image(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageResolve],
    );

    fn bind_pipeline(&mut self, point: vk::PipelineBindPoint, pipeline: vk::Pipeline);

    fn bind_descriptor_sets(
        &mut self,
        point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        sets: &[vk::DescriptorSet],
    );

    fn push_constants(&mut self, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, data: &[u8]);

    fn set_stencil_reference(&mut self, faces: vk::StencilFaceFlags, reference: u32);

    fn bind_vertex_buffers(&mut self, buffers: &[vk::Buffer], offsets: &[vk::DeviceSize]);

    fn bind_index_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, index_type: vk::IndexType);

    fn set_viewport(&mut self, viewports: &[vk::Viewport]);

    fn set_scissor(&mut self, scissors: &[vk::Rect2D]);

    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32);

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );

    /// `vkCmdDraw[Indexed]Indirect`, or the `Count` variant when `count` is set.
    fn draw_indirect(
        &mut self,
        indexed: bool,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        count: Option<(vk::Buffer, vk::DeviceSize)>,
        max_draw_count: u32,
        stride: u32,
    );

    fn dispatch(&mut self, x: u32, y: u32, z: u32);

    fn dispatch_indirect(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize);

    fn write_timestamp(&mut self, stage: vk::PipelineStageFlags, pool: vk::QueryPool, query: u32);

    fn copy_query_pool_results(
        &mut self,
        pool: vk::QueryPool,
        first: u32,
        count: u32,
        dst: vk::Buffer,
        dst_offset: vk::DeviceSize,
        stride: vk::DeviceSize,
        flags: vk::QueryResultFlags,
    );

    /// Requires [`DeviceExtensions::DEBUG_UTILS`].
    fn begin_debug_label(&mut self, label: &vk::DebugUtilsLabelEXT<'_>);

    fn end_debug_label(&mut self);

    fn insert_debug_label(&mut self, label: &vk::DebugUtilsLabelEXT<'_>);

    /// Requires [`DeviceExtensions::MESH_SHADER`].
    fn draw_mesh_tasks(&mut self, x: u32, y: u32, z: u32);

    /// Requires [`DeviceExtensions::RAY_TRACING_PIPELINE`].
    fn trace_rays(&mut self, regions: &TraceRegions, width: u32, height: u32, depth: u32);

    /// Requires [`DeviceExtensions::ACCELERATION_STRUCTURE`].
    fn copy_acceleration_structure(&mut self, info: &vk::CopyAccelerationStructureInfoKHR<'_>);

    fn write_acceleration_structures_properties(
        &mut self,
        structures: &[vk::AccelerationStructureKHR],
        query_type: vk::QueryType,
        pool: vk::QueryPool,
        first_query: u32,
    );

    /// `vkEndCommandBuffer`
    ///
    /// # Errors
    /// Whatever the driver reports for the recorded commands.
    fn end(&mut self) -> RhiResult<()>;
}

/// Extension function tables loaded by the platform layer.
#[derive(Clone, Default)]
pub struct ExtensionLoaders {
    pub debug_utils: Option<ash::ext::debug_utils::Device>,
    pub mesh_shader: Option<ash::ext::mesh_shader::Device>,
    pub ray_tracing_pipeline: Option<ash::khr::ray_tracing_pipeline::Device>,
    pub acceleration_structure: Option<ash::khr::acceleration_structure::Device>,
}

impl ExtensionLoaders {
    pub fn extensions(&self) -> DeviceExtensions {
        let mut extensions = DeviceExtensions::empty();
        extensions.set(DeviceExtensions::DEBUG_UTILS, self.debug_utils.is_some());
        extensions.set(DeviceExtensions::MESH_SHADER, self.mesh_shader.is_some());
        extensions.set(DeviceExtensions::RAY_TRACING_PIPELINE, self.ray_tracing_pipeline.is_some());
        extensions.set(DeviceExtensions::ACCELERATION_STRUCTURE, self.acceleration_structure.is_some());
        extensions
    }
}

/// Converts a `VkResult` failure into the engine's error.
pub fn native_error(result: vk::Result) -> RhiError {
    match result {
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
            RhiError::OutOfMemory(format!("{result}"))
        }
        vk::Result::ERROR_DEVICE_LOST => RhiError::DeviceLost(format!("{result}")),
        other => RhiError::Native(format!("{other}")),
    }
}

/// A primary command buffer on a real device.
///
/// Every wrapped call requires the buffer to be in the recording state, which holds from
/// [`AshCommandBuffer::begin`] until [`VulkanCommands::end`].
pub struct AshCommandBuffer {
    device: ash::Device,
    loaders: ExtensionLoaders,
    buffer: vk::CommandBuffer,
}

impl AshCommandBuffer {
    /// Begin one-time recording on `buffer`.
    ///
    /// # Errors
    /// Native failures from `vkBeginCommandBuffer`.
    pub fn begin(device: ash::Device, loaders: ExtensionLoaders, buffer: vk::CommandBuffer) -> RhiResult<Self> {
        let info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        // SAFETY: `buffer` was allocated from a pool on `device` and is not pending execution.
        unsafe { device.begin_command_buffer(buffer, &info) }.map_err(native_error)?;
        Ok(Self {
            device,
            loaders,
            buffer,
        })
    }

    #[inline]
    pub const fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }
}

impl VulkanCommands for AshCommandBuffer {
    fn extensions(&self) -> DeviceExtensions {
        self.loaders.extensions()
    }

    fn pipeline_barrier(
        &mut self,
        src_stages: vk::PipelineStageFlags,
        dst_stages: vk::PipelineStageFlags,
        memory: &[vk::MemoryBarrier<'_>],
        buffers: &[vk::BufferMemoryBarrier<'_>],
        images: &[vk::ImageMemoryBarrier<'_>],
    ) {
        // SAFETY: the buffer is recording and every handle belongs to this device.
        unsafe {
            self.device.cmd_pipeline_barrier(
                self.buffer,
                src_stages,
                dst_stages,
                vk::DependencyFlags::empty(),
                memory,
                buffers,
                images,
            )
        }
    }

    fn copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        // SAFETY: the buffer is recording and every handle belongs to this device.
        unsafe { self.device.cmd_copy_buffer(self.buffer, src, dst, regions) }
    }

    fn copy_image(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageCopy],
    ) {
        // SAFETY: the buffer is recording and every handle belongs to this device.
        unsafe {
            self.device
                .cmd_copy_image(self.buffer, src, src_layout, dst, dst_layout, regions)
        }
    }

    fn copy_image_to_buffer(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Buffer,
        regions: &[vk::BufferImageCopy],
    ) {
        // SAFETY: the buffer is recording and every handle belongs to this device.
        unsafe {
            self.device
                .cmd_copy_image_to_buffer(self.buffer, src, src_layout, dst, regions)
        }
    }

    fn fill_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, size: vk::DeviceSize, data: u32) {
        // SAFETY: the buffer is recording and every handle belongs to this device.
        unsafe { self.device.cmd_fill_buffer(self.buffer, buffer, offset, size, data) }
    }

    fn update_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) {
        // SAFETY: the buffer is recording and every handle belongs to this device.
        unsafe { self.device.cmd_update_buffer(self.buffer, buffer, offset, data) }
    }

    fn clear_color_image(
        &mut self,
        image: vk::Image,
        layout: vk::ImageLayout,
        value: &vk::ClearColorValue,
        ranges: &[vk::ImageSubresourceRange],
    ) {
        // SAFETY: the buffer is recording and every handle belongs to this device.
        unsafe {
            self.device
                .cmd_clear_color_image(self.buffer, image, layout, value, ranges)
        }
    }

    fn clear_depth_stencil_image(
        &mut self,
        image: vk::Image,
        layout: vk::ImageLayout,
        value: &vk::ClearDepthStencilValue,
        ranges: &[vk::ImageSubresourceRange],
    ) {
        // SAFETY: the buffer is recording and every handle belongs to this device.
        unsafe {
            self.device
                .cmd_clear_depth_stencil_image(self.buffer, image, layout, value, ranges)
        }
    }

    fn begin_rendering(&mut self, info: &vk::RenderingInfo<'_>) {
        // SAFETY: the buffer is recording and every handle belongs to this device.
        unsafe { self.device.cmd_begin_rendering(self.buffer, info) }
    }

    fn end_rendering(&mut self) {
        // SAFETY: the buffer is recording and every handle belongs to this device.
        unsafe { self.device.cmd_end_rendering(self.buffer) }
    }

    fn resolve_image(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageResolve],
    ) {
        // SAFETY: the buffer is recording and every handle belongs to this device.
        unsafe {
            self.device
                .cmd_resolve_image(self.buffer, src, src_layout, dst, dst_layout, regions)
        }
    }

    fn bind_pipeline(&mut self, point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        // SAFETY: the buffer is recording and every handle belongs to this device.
        unsafe { self.device.cmd_bind_pipeline(self.buffer, point, pipeline) }
    }

    fn bind_descriptor_sets(
        &mut self,
        point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        sets: &[vk::DescriptorSet],
    ) {
        // SAFETY: the buffer is recording and every handle belongs to this device.
        unsafe {
            self.device
                .cmd_bind_descriptor_sets(self.buffer, point, layout, 0, sets, &[])
        }
    }

    fn push_constants(&mut self, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, data: &[u8]) {
        // SAFETY: the buffer is recording and every handle belongs to this device.
        unsafe { self.device.cmd_push_constants(self.buffer, layout, stages, 0, data) }
    }

    fn set_stencil_reference(&mut self, faces: vk::StencilFaceFlags, reference: u32) {
        // SAFETY: the buffer is recording and every handle belongs to this device.
        unsafe { self.device.cmd_set_stencil_reference(self.buffer, faces, reference) }
    }

    fn bind_vertex_buffers(&mut self, buffers: &[vk::Buffer], offsets: &[vk::DeviceSize]) {
        // SAFETY: the buffer is recording and every handle belongs to this device.
        unsafe { self.device.cmd_bind_vertex_buffers(self.buffer, 0, buffers, offsets) }
    }

    fn bind_index_buffer(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize, index_type: vk::IndexType) {
        // SAFETY: the buffer is recording and every handle belongs to this device.
        unsafe {
            self.device
                .cmd_bind_index_buffer(self.buffer, buffer, offset, index_type)
        }
    }

    fn set_viewport(&mut self, viewports: &[vk::Viewport]) {
        // SAFETY: the buffer is recording and every handle belongs to this device.
        unsafe { self.device.cmd_set_viewport(self.buffer, 0, viewports) }
    }

    fn set_scissor(&mut self, scissors: &[vk::Rect2D]) {
        // SAFETY: the buffer is recording and every handle belongs to this device.
        unsafe { self.device.cmd_set_scissor(self.buffer, 0, scissors) }
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        // SAFETY: the buffer is recording and every handle belongs to this device.
        unsafe {
            self.device
                .cmd_draw(self.buffer, vertex_count, instance_count, first_vertex, first_instance)
        }
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        // SAFETY: the buffer is recording and every handle belongs to this device.
        unsafe {
            self.device.cmd_draw_indexed(
                self.buffer,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            )
        }
    }

    fn draw_indirect(
        &mut self,
        indexed: bool,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        count: Option<(vk::Buffer, vk::DeviceSize)>,
        max_draw_count: u32,
        stride: u32,
    ) {
        // SAFETY: the buffer is recording and every handle belongs to this device.
        unsafe {
            match (indexed, count) {
                (false, None) => self
                    .device
                    .cmd_draw_indirect(self.buffer, buffer, offset, max_draw_count, stride),
                (true, None) => self.device.cmd_draw_indexed_indirect(
                    self.buffer,
                    buffer,
                    offset,
                    max_draw_count,
                    stride,
                ),
                (false, Some((count_buffer, count_offset))) => self.device.cmd_draw_indirect_count(
                    self.buffer,
                    buffer,
                    offset,
                    count_buffer,
                    count_offset,
                    max_draw_count,
                    stride,
                ),
                (true, Some((count_buffer, count_offset))) => self.device.cmd_draw_indexed_indirect_count(
                    self.buffer,
                    buffer,
                    offset,
                    count_buffer,
                    count_offset,
                    max_draw_count,
                    stride,
                ),
            }
        }
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        // SAFETY: the buffer is recording and every handle belongs to this device.
        unsafe { self.device.cmd_dispatch(self.buffer, x, y, z) }
    }

    fn dispatch_indirect(&mut self, buffer: vk::Buffer, offset: vk::DeviceSize) {
        // SAFETY: the buffer is recording and every handle belongs to this device.
        unsafe { self.device.cmd_dispatch_indirect(self.buffer, buffer, offset) }
    }

    fn write_timestamp(&mut self, stage: vk::PipelineStageFlags, pool: vk::QueryPool, query: u32) {
        // SAFETY: the buffer is recording and every handle belongs to this device.
        unsafe { self.device.cmd_write_timestamp(self.buffer, stage, pool, query) }
    }

    fn copy_query_pool_results(
        &mut self,
        pool: vk::QueryPool,
        first: u32,
        count: u32,
        dst: vk::Buffer,
        dst_offset: vk::DeviceSize,
        stride: vk::DeviceSize,
        flags: vk::QueryResultFlags,
    ) {
        // SAFETY: the buffer is recording and every handle belongs to this device.
        unsafe {
            self.device.cmd_copy_query_pool_results(
                self.buffer,
                pool,
                first,
                count,
                dst,
                dst_offset,
                stride,
                flags,
            )
        }
    }

    fn begin_debug_label(&mut self, label: &vk::DebugUtilsLabelEXT<'_>) {
        if let Some(debug_utils) = &self.loaders.debug_utils {
            // SAFETY: the buffer is recording and every handle belongs to this device.
            unsafe { debug_utils.cmd_begin_debug_utils_label(self.buffer, label) }
        }
    }

    fn end_debug_label(&mut self) {
        if let Some(debug_utils) = &self.loaders.debug_utils {
            // SAFETY: the buffer is recording and every handle belongs to this device.
            unsafe { debug_utils.cmd_end_debug_utils_label(self.buffer) }
        }
    }

    fn insert_debug_label(&mut self, label: &vk::DebugUtilsLabelEXT<'_>) {
        if let Some(debug_utils) = &self.loaders.debug_utils {
            // SAFETY: the buffer is recording and every handle belongs to this device.
            unsafe { debug_utils.cmd_insert_debug_utils_label(self.buffer, label) }
        }
    }

    fn draw_mesh_tasks(&mut self, x: u32, y: u32, z: u32) {
        if let Some(mesh_shader) = &self.loaders.mesh_shader {
            // SAFETY: the buffer is recording and every handle belongs to this device.
            unsafe { mesh_shader.cmd_draw_mesh_tasks(self.buffer, x, y, z) }
        }
    }

    fn trace_rays(&mut self, regions: &TraceRegions, width: u32, height: u32, depth: u32) {
        if let Some(ray_tracing) = &self.loaders.ray_tracing_pipeline {
            // SAFETY: the buffer is recording and every handle belongs to this device.
            unsafe {
                ray_tracing.cmd_trace_rays(
                    self.buffer,
                    &regions.raygen,
                    &regions.miss,
                    &regions.hit,
                    &regions.callable,
                    width,
                    height,
                    depth,
                )
            }
        }
    }

    fn copy_acceleration_structure(&mut self, info: &vk::CopyAccelerationStructureInfoKHR<'_>) {
        if let Some(structures) = &self.loaders.acceleration_structure {
            // SAFETY: the buffer is recording and every handle belongs to this device.
            unsafe { structures.cmd_copy_acceleration_structure(self.buffer, info) }
        }
    }

    fn write_acceleration_structures_properties(
        &mut self,
        structures: &[vk::AccelerationStructureKHR],
        query_type: vk::QueryType,
        pool: vk::QueryPool,
        first_query: u32,
    ) {
        if let Some(loader) = &self.loaders.acceleration_structure {
            // SAFETY: the buffer is recording and every handle belongs to this device.
            unsafe {
                loader.cmd_write_acceleration_structures_properties(
                    self.buffer,
                    structures,
                    query_type,
                    pool,
                    first_query,
                )
            }
        }
    }

    fn end(&mut self) -> RhiResult<()> {
        // SAFETY: the buffer is recording and every handle belongs to this device.
        unsafe { self.device.end_command_buffer(self.buffer) }.map_err(native_error)
    }
}
