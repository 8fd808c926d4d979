//! Pass bookkeeping and state diffing for the recorder.

use crate::pass::{ComputeState, RayTracingState, RenderState, same_bindings};
use crate::resource::TextureView;

/// Which kind of pipeline state is currently committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PassValidity {
    #[default]
    Invalid,
    RenderValid,
    ComputeValid,
    RayTracingValid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ActivePass {
    Render,
    Compute,
    RayTracing,
}

/// Per-recorder pass flags plus the last committed state of each kind.
#[derive(Default)]
pub(crate) struct PassState {
    active: Option<ActivePass>,
    validity: PassValidity,
    render: Option<RenderState>,
    compute: Option<ComputeState>,
    ray_tracing: Option<RayTracingState>,
    /// Set while inside a render pass whose state requirements were committed up front.
    hoisted: bool,
    resolves: Vec<(TextureView, TextureView)>,
}

impl PassState {
    pub(crate) fn begin(&mut self, pass: ActivePass) {
        self.active = Some(pass);
    }

    pub(crate) fn begin_hoisted_render(&mut self, resolves: Vec<(TextureView, TextureView)>) {
        self.active = Some(ActivePass::Render);
        self.hoisted = true;
        self.resolves = resolves;
    }

    /// Close the active pass. Returns the resolves a render pass deferred to its end.
    pub(crate) fn end(&mut self) -> Vec<(TextureView, TextureView)> {
        self.active = None;
        self.hoisted = false;
        self.invalidate();
        core::mem::take(&mut self.resolves)
    }

    pub(crate) fn invalidate(&mut self) {
        self.validity = PassValidity::Invalid;
        self.render = None;
        self.compute = None;
        self.ray_tracing = None;
    }

    #[inline]
    pub(crate) fn active(&self) -> Option<ActivePass> {
        self.active
    }

    #[inline]
    pub(crate) fn is_active(&self, pass: ActivePass) -> bool {
        self.active == Some(pass)
    }

    #[inline]
    pub(crate) fn is_hoisted(&self) -> bool {
        self.hoisted
    }

    #[inline]
    pub(crate) fn validity(&self) -> PassValidity {
        self.validity
    }

    pub(crate) fn committed_render(&self) -> Option<&RenderState> {
        if self.validity == PassValidity::RenderValid {
            self.render.as_ref()
        } else {
            None
        }
    }

    pub(crate) fn committed_compute(&self) -> Option<&ComputeState> {
        if self.validity == PassValidity::ComputeValid {
            self.compute.as_ref()
        } else {
            None
        }
    }

    pub(crate) fn committed_ray_tracing(&self) -> Option<&RayTracingState> {
        if self.validity == PassValidity::RayTracingValid {
            self.ray_tracing.as_ref()
        } else {
            None
        }
    }

    pub(crate) fn enter_render(&mut self, state: RenderState) {
        self.invalidate();
        self.validity = PassValidity::RenderValid;
        self.render = Some(state);
    }

    pub(crate) fn enter_compute(&mut self, state: ComputeState) {
        self.invalidate();
        self.validity = PassValidity::ComputeValid;
        self.compute = Some(state);
    }

    pub(crate) fn enter_ray_tracing(&mut self, state: RayTracingState) {
        self.invalidate();
        self.validity = PassValidity::RayTracingValid;
        self.ray_tracing = Some(state);
    }
}

/// Which parts of a render state have to be re-issued natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RenderDelta {
    pub pipeline: bool,
    pub bindings: bool,
    pub stencil_ref: bool,
    pub vertex_buffers: bool,
    pub index_buffer: bool,
    pub viewports: bool,
    pub scissor_rects: bool,
}

impl RenderDelta {
    const ALL: Self = Self {
        pipeline: true,
        bindings: true,
        stencil_ref: true,
        vertex_buffers: true,
        index_buffer: true,
        viewports: true,
        scissor_rects: true,
    };

    pub(crate) fn between(previous: Option<&RenderState>, next: &RenderState) -> Self {
        let Some(prev) = previous else {
            return Self::ALL;
        };
        let pipeline = prev.pipeline != next.pipeline;
        Self {
            pipeline,
            bindings: pipeline || !same_bindings(prev.bindings.as_ref(), next.bindings.as_ref()),
            stencil_ref: prev.stencil_ref != next.stencil_ref,
            vertex_buffers: prev.vertex_buffers != next.vertex_buffers,
            index_buffer: prev.index_buffer != next.index_buffer
                || prev.index_format != next.index_format,
            viewports: prev.viewports != next.viewports,
            scissor_rects: prev.scissor_rects != next.scissor_rects,
        }
    }
}

/// `(pipeline, bindings)` change flags for compute state.
pub(crate) fn compute_delta(previous: Option<&ComputeState>, next: &ComputeState) -> (bool, bool) {
    previous.map_or((true, true), |prev| {
        let pipeline = prev.pipeline != next.pipeline;
        (
            pipeline,
            pipeline || !same_bindings(prev.bindings.as_ref(), next.bindings.as_ref()),
        )
    })
}

/// `(pipeline or shader table, bindings)` change flags for ray-tracing state.
pub(crate) fn ray_tracing_delta(
    previous: Option<&RayTracingState>,
    next: &RayTracingState,
) -> (bool, bool) {
    previous.map_or((true, true), |prev| {
        let pipeline = prev.pipeline != next.pipeline || prev.shader_table != next.shader_table;
        (
            pipeline,
            pipeline || !same_bindings(prev.bindings.as_ref(), next.bindings.as_ref()),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pass::{ScissorRect, Viewport};
    use crate::resource::{Buffer, BufferDesc, ComputePipeline, NativeHandle, RenderPipeline};

    #[test]
    fn first_state_commits_everything() {
        let pipeline = RenderPipeline::new(NativeHandle(1), None);
        let delta = RenderDelta::between(None, &RenderState::new(&pipeline));
        assert_eq!(delta, RenderDelta::ALL);
    }

    #[test]
    fn only_changed_parts_are_reissued() {
        let pipeline = RenderPipeline::new(NativeHandle(1), None);
        let vertices = Buffer::new(BufferDesc::new(64), NativeHandle(2));
        let previous = RenderState::new(&pipeline)
            .with_vertex_buffer(&vertices, 0)
            .with_viewport(Viewport::from_size(64.0, 64.0));
        let next = previous.clone().with_scissor(ScissorRect {
            min_x: 0,
            min_y: 0,
            max_x: 32,
            max_y: 32,
        });
        let delta = RenderDelta::between(Some(&previous), &next);
        assert!(!delta.pipeline);
        assert!(!delta.bindings);
        assert!(!delta.vertex_buffers);
        assert!(!delta.viewports);
        assert!(delta.scissor_rects);
    }

    #[test]
    fn entering_one_kind_invalidates_others() {
        let render = RenderPipeline::new(NativeHandle(1), None);
        let compute = ComputePipeline::new(NativeHandle(2), None);
        let mut state = PassState::default();
        assert_eq!(state.validity(), PassValidity::Invalid);
        state.enter_render(RenderState::new(&render));
        state.enter_compute(ComputeState::new(&compute));
        assert_eq!(state.validity(), PassValidity::ComputeValid);
        assert!(state.committed_render().is_none());
        state.end();
        assert_eq!(state.validity(), PassValidity::Invalid);
        assert!(state.committed_compute().is_none());
    }

    #[test]
    fn pipeline_change_rebinds() {
        let first = ComputePipeline::new(NativeHandle(1), None);
        let second = ComputePipeline::new(NativeHandle(2), None);
        let previous = ComputeState::new(&first);
        assert_eq!(compute_delta(Some(&previous), &ComputeState::new(&first)), (false, false));
        assert_eq!(compute_delta(Some(&previous), &ComputeState::new(&second)), (true, true));
    }
}
