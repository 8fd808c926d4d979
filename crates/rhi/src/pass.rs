//! Pass descriptions and the pipeline state bundles set inside passes.

use std::sync::Arc;

use crate::binding::BindingData;
use crate::resource::{Buffer, ComputePipeline, RayTracingPipeline, RenderPipeline, ShaderTable, TextureView};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoadOp {
    #[default]
    Load,
    Clear,
    DontCare,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StoreOp {
    #[default]
    Store,
    DontCare,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColorAttachment {
    pub view: TextureView,
    /// Multisample resolve destination, resolved when the pass ends.
    pub resolve_target: Option<TextureView>,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub clear_value: [f32; 4],
}

impl ColorAttachment {
    pub fn new(view: TextureView) -> Self {
        Self {
            view,
            resolve_target: None,
            load_op: LoadOp::Load,
            store_op: StoreOp::Store,
            clear_value: [0.0; 4],
        }
    }

    #[must_use]
    pub fn cleared(mut self, value: [f32; 4]) -> Self {
        self.load_op = LoadOp::Clear;
        self.clear_value = value;
        self
    }

    #[must_use]
    pub fn resolving_into(mut self, target: TextureView) -> Self {
        self.resolve_target = Some(target);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DepthStencilAttachment {
    pub view: TextureView,
    pub depth_read_only: bool,
    pub depth_load_op: LoadOp,
    pub depth_store_op: StoreOp,
    pub depth_clear_value: f32,
    pub stencil_load_op: LoadOp,
    pub stencil_store_op: StoreOp,
    pub stencil_clear_value: u8,
}

impl DepthStencilAttachment {
    pub fn new(view: TextureView) -> Self {
        Self {
            view,
            depth_read_only: false,
            depth_load_op: LoadOp::Clear,
            depth_store_op: StoreOp::Store,
            depth_clear_value: 1.0,
            stencil_load_op: LoadOp::DontCare,
            stencil_store_op: StoreOp::DontCare,
            stencil_clear_value: 0,
        }
    }

    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.depth_read_only = true;
        self.depth_load_op = LoadOp::Load;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderPassDesc {
    pub color_attachments: Vec<ColorAttachment>,
    pub depth_stencil: Option<DepthStencilAttachment>,
}

impl RenderPassDesc {
    #[must_use]
    pub fn with_color(mut self, attachment: ColorAttachment) -> Self {
        self.color_attachments.push(attachment);
        self
    }

    #[must_use]
    pub fn with_depth_stencil(mut self, attachment: DepthStencilAttachment) -> Self {
        self.depth_stencil = Some(attachment);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferOffsetPair {
    pub buffer: Buffer,
    pub offset: u64,
}

impl BufferOffsetPair {
    pub fn new(buffer: &Buffer, offset: u64) -> Self {
        Self {
            buffer: buffer.clone(),
            offset,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IndexFormat {
    Uint16,
    #[default]
    Uint32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub const fn from_size(width: f32, height: f32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width,
            height,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ScissorRect {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

/// Compare two optional binding bundles the way recorders diff them: by shared instance.
pub fn same_bindings(lhs: Option<&Arc<BindingData>>, rhs: Option<&Arc<BindingData>>) -> bool {
    match (lhs, rhs) {
        (Some(left), Some(right)) => Arc::ptr_eq(left, right),
        (None, None) => true,
        (Some(_), None) | (None, Some(_)) => false,
    }
}

/// Everything a draw depends on.
#[derive(Debug, Clone)]
pub struct RenderState {
    pub pipeline: RenderPipeline,
    pub bindings: Option<Arc<BindingData>>,
    pub vertex_buffers: Vec<BufferOffsetPair>,
    pub index_buffer: Option<BufferOffsetPair>,
    pub index_format: IndexFormat,
    pub viewports: Vec<Viewport>,
    pub scissor_rects: Vec<ScissorRect>,
    pub stencil_ref: u32,
}

impl RenderState {
    pub fn new(pipeline: &RenderPipeline) -> Self {
        Self {
            pipeline: pipeline.clone(),
            bindings: None,
            vertex_buffers: Vec::new(),
            index_buffer: None,
            index_format: IndexFormat::Uint32,
            viewports: Vec::new(),
            scissor_rects: Vec::new(),
            stencil_ref: 0,
        }
    }

    #[must_use]
    pub fn with_bindings(mut self, bindings: Arc<BindingData>) -> Self {
        self.bindings = Some(bindings);
        self
    }

    #[must_use]
    pub fn with_vertex_buffer(mut self, buffer: &Buffer, offset: u64) -> Self {
        self.vertex_buffers.push(BufferOffsetPair::new(buffer, offset));
        self
    }

    #[must_use]
    pub fn with_index_buffer(mut self, buffer: &Buffer, offset: u64, format: IndexFormat) -> Self {
        self.index_buffer = Some(BufferOffsetPair::new(buffer, offset));
        self.index_format = format;
        self
    }

    #[must_use]
    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewports.push(viewport);
        self
    }

    #[must_use]
    pub fn with_scissor(mut self, rect: ScissorRect) -> Self {
        self.scissor_rects.push(rect);
        self
    }

    #[must_use]
    pub const fn with_stencil_ref(mut self, reference: u32) -> Self {
        self.stencil_ref = reference;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ComputeState {
    pub pipeline: ComputePipeline,
    pub bindings: Option<Arc<BindingData>>,
}

impl ComputeState {
    pub fn new(pipeline: &ComputePipeline) -> Self {
        Self {
            pipeline: pipeline.clone(),
            bindings: None,
        }
    }

    #[must_use]
    pub fn with_bindings(mut self, bindings: Arc<BindingData>) -> Self {
        self.bindings = Some(bindings);
        self
    }
}

#[derive(Debug, Clone)]
pub struct RayTracingState {
    pub pipeline: RayTracingPipeline,
    pub shader_table: ShaderTable,
    pub bindings: Option<Arc<BindingData>>,
}

impl RayTracingState {
    pub fn new(pipeline: &RayTracingPipeline, shader_table: &ShaderTable) -> Self {
        Self {
            pipeline: pipeline.clone(),
            shader_table: shader_table.clone(),
            bindings: None,
        }
    }

    #[must_use]
    pub fn with_bindings(mut self, bindings: Arc<BindingData>) -> Self {
        self.bindings = Some(bindings);
        self
    }
}
