//! First interpretation pass over a render pass: collect state requirements, touch nothing.
//!
//! Some native APIs forbid barriers between pass begin and pass end. The recorder calls
//! [`collect_render_pass`] on a forked cursor when it reaches a `BeginRenderPass`, commits the
//! resulting transitions, and only then opens the native pass.

use std::collections::HashMap;

use crate::binding::{BindingData, BoundResource};
use crate::command::{BeginRenderPass, Command};
use crate::resource::{Buffer, ResourceId, ResourceState, SubresourceRange, Texture};

/// A resource requested in two different states inside one render pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conflict {
    pub resource: ResourceId,
    pub kept: ResourceState,
    pub dropped: ResourceState,
}

/// Resource states a render pass needs, in first-request order.
#[derive(Debug, Default)]
pub struct PassRequirements {
    pub buffers: Vec<(Buffer, ResourceState)>,
    pub textures: Vec<(Texture, SubresourceRange, ResourceState)>,
    pub conflicts: Vec<Conflict>,
    seen: HashMap<ResourceId, ResourceState>,
}

impl PassRequirements {
    fn first_request(&mut self, id: ResourceId, state: ResourceState) -> bool {
        match self.seen.get(&id) {
            None => {
                self.seen.insert(id, state);
                true
            }
            Some(&kept) => {
                if kept != state {
                    self.conflicts.push(Conflict {
                        resource: id,
                        kept,
                        dropped: state,
                    });
                }
                false
            }
        }
    }

    fn buffer(&mut self, buffer: &Buffer, state: ResourceState) {
        if self.first_request(buffer.id(), state) {
            self.buffers.push((buffer.clone(), state));
        }
    }

    fn texture(&mut self, texture: &Texture, range: SubresourceRange, state: ResourceState) {
        if self.first_request(texture.id(), state) {
            self.textures.push((texture.clone(), range, state));
        }
    }

    fn bindings(&mut self, bindings: &BindingData) {
        for binding in bindings.states() {
            match &binding.resource {
                BoundResource::Buffer(buffer) => self.buffer(buffer, binding.state),
                BoundResource::Texture(texture) => self.texture(texture, SubresourceRange::ENTIRE, binding.state),
            }
        }
    }

    /// Total number of distinct resources.
    pub fn len(&self) -> usize {
        self.buffers.len() + self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty() && self.textures.is_empty()
    }
}

/// Walk `rest` up to the matching `EndRenderPass` and collect every state it will request.
///
/// Multisample resolve targets are not included: resolves run after the native pass closes.
pub fn collect_render_pass<'list>(
    begin: &BeginRenderPass,
    rest: impl Iterator<Item = &'list Command>,
) -> PassRequirements {
    let mut requirements = PassRequirements::default();
    for attachment in &begin.desc.color_attachments {
        requirements.texture(attachment.view.texture(), attachment.view.range(), ResourceState::RenderTarget);
    }
    if let Some(depth) = &begin.desc.depth_stencil {
        let state = if depth.depth_read_only {
            ResourceState::DepthRead
        } else {
            ResourceState::DepthWrite
        };
        requirements.texture(depth.view.texture(), depth.view.range(), state);
    }

    for command in rest {
        match command {
            Command::EndRenderPass(_) => break,
            Command::SetRenderState(cmd) => {
                if let Some(bindings) = &cmd.state.bindings {
                    requirements.bindings(bindings);
                }
                for vertex in &cmd.state.vertex_buffers {
                    requirements.buffer(&vertex.buffer, ResourceState::VertexBuffer);
                }
                if let Some(index) = &cmd.state.index_buffer {
                    requirements.buffer(&index.buffer, ResourceState::IndexBuffer);
                }
            }
            Command::DrawIndirect(cmd) => {
                requirements.buffer(&cmd.arg_buffer, ResourceState::IndirectArgument);
                if let Some(count) = &cmd.count_buffer {
                    requirements.buffer(count, ResourceState::IndirectArgument);
                }
            }
            Command::DrawIndexedIndirect(cmd) => {
                requirements.buffer(&cmd.arg_buffer, ResourceState::IndirectArgument);
                if let Some(count) = &cmd.count_buffer {
                    requirements.buffer(count, ResourceState::IndirectArgument);
                }
            }
            Command::SetBufferState(cmd) => requirements.buffer(&cmd.buffer, cmd.state),
            Command::SetTextureState(cmd) => requirements.texture(&cmd.texture, cmd.range, cmd.state),
            _ => {}
        }
    }
    requirements
}
