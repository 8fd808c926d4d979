//! Per-session resource state table and pending barrier lists.
//!
//! A [`StateTracking`] instance belongs to exactly one recording session. Every resource it sees
//! starts at its declared default state, and the session restores that default before it ends,
//! so independently recorded command buffers never have to agree on anything else.

use std::collections::BTreeMap;

use log::trace;
use smallvec::SmallVec;

use crate::resource::{Buffer, MemoryType, ResourceId, ResourceState, SubresourceRange, Texture};

/// Pending transition of a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferBarrier {
    pub buffer: Buffer,
    pub before: ResourceState,
    pub after: ResourceState,
}

/// Pending transition of a whole texture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureBarrier {
    pub texture: Texture,
    pub before: ResourceState,
    pub after: ResourceState,
}

struct TrackedBuffer {
    buffer: Buffer,
    state: ResourceState,
}

struct TrackedTexture {
    texture: Texture,
    state: ResourceState,
}

/// Current logical state of every resource touched by one recording session.
///
/// A barrier is appended whenever the requested state differs from the tracked one, or the
/// requested state is [`ResourceState::UnorderedAccess`]: two consecutive unordered-access uses
/// are still a read/write hazard even though the state value does not change.
///
/// # Examples
/// ```
/// use rhi::{Buffer, BufferDesc, NativeHandle, ResourceState, StateTracking};
///
/// let buffer = Buffer::new(
///     BufferDesc::new(256).with_default_state(ResourceState::ShaderResource),
///     NativeHandle::NULL,
/// );
/// let mut tracking = StateTracking::new();
/// tracking.set_buffer_state(&buffer, ResourceState::CopyDestination);
/// tracking.set_buffer_state(&buffer, ResourceState::CopyDestination);
/// assert_eq!(tracking.buffer_barriers().len(), 1);
///
/// tracking.require_default_states();
/// assert_eq!(tracking.buffer_barriers().len(), 2);
/// ```
#[derive(Default)]
pub struct StateTracking {
    buffers: BTreeMap<ResourceId, TrackedBuffer>,
    textures: BTreeMap<ResourceId, TrackedTexture>,
    buffer_barriers: SmallVec<[BufferBarrier; 8]>,
    texture_barriers: SmallVec<[TextureBarrier; 8]>,
}

impl StateTracking {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that `buffer` be in `state` for the next access.
    ///
    /// Buffers outside device-local memory keep a fixed native state and are ignored.
    pub fn set_buffer_state(&mut self, buffer: &Buffer, state: ResourceState) {
        if buffer.desc().memory_type != MemoryType::DeviceLocal {
            return;
        }
        let tracked = self
            .buffers
            .entry(buffer.id())
            .or_insert_with(|| TrackedBuffer {
                buffer: buffer.clone(),
                state: buffer.default_state(),
            });
        if needs_barrier(tracked.state, state) {
            trace!(target: "rhi::state", "buffer {} {:?} -> {state:?}", buffer.id(), tracked.state);
            self.buffer_barriers.push(BufferBarrier {
                buffer: buffer.clone(),
                before: tracked.state,
                after: state,
            });
            tracked.state = state;
        }
    }

    /// Request that `texture` be in `state` for the next access.
    ///
    /// State is tracked per texture, not per subresource. A `range` narrower than the whole
    /// texture trips a debug assertion; release builds transition the whole texture.
    pub fn set_texture_state(&mut self, texture: &Texture, range: SubresourceRange, state: ResourceState) {
        if texture.desc().memory_type != MemoryType::DeviceLocal {
            return;
        }
        debug_assert!(
            range.covers(texture.desc()),
            "subresource state tracking is not implemented"
        );
        let tracked = self
            .textures
            .entry(texture.id())
            .or_insert_with(|| TrackedTexture {
                texture: texture.clone(),
                state: texture.default_state(),
            });
        if needs_barrier(tracked.state, state) {
            trace!(target: "rhi::state", "texture {} {:?} -> {state:?}", texture.id(), tracked.state);
            self.texture_barriers.push(TextureBarrier {
                texture: texture.clone(),
                before: tracked.state,
                after: state,
            });
            tracked.state = state;
        }
    }

    /// Append one barrier per tracked resource that is not at its default state.
    pub fn require_default_states(&mut self) {
        for tracked in self.buffers.values_mut() {
            let default = tracked.buffer.default_state();
            if tracked.state != default {
                self.buffer_barriers.push(BufferBarrier {
                    buffer: tracked.buffer.clone(),
                    before: tracked.state,
                    after: default,
                });
                tracked.state = default;
            }
        }
        for tracked in self.textures.values_mut() {
            let default = tracked.texture.default_state();
            if tracked.state != default {
                self.texture_barriers.push(TextureBarrier {
                    texture: tracked.texture.clone(),
                    before: tracked.state,
                    after: default,
                });
                tracked.state = default;
            }
        }
    }

    #[inline]
    pub fn buffer_barriers(&self) -> &[BufferBarrier] {
        &self.buffer_barriers
    }

    #[inline]
    pub fn texture_barriers(&self) -> &[TextureBarrier] {
        &self.texture_barriers
    }

    #[inline]
    pub fn has_pending_barriers(&self) -> bool {
        !self.buffer_barriers.is_empty() || !self.texture_barriers.is_empty()
    }

    /// Drop pending barriers after the backend emitted them. The state table is kept.
    pub fn clear_barriers(&mut self) {
        self.buffer_barriers.clear();
        self.texture_barriers.clear();
    }

    /// Forget everything, including tracked states.
    pub fn clear(&mut self) {
        self.buffers.clear();
        self.textures.clear();
        self.clear_barriers();
    }

    /// Tracked state of `buffer`, if this session has touched it.
    pub fn buffer_state(&self, buffer: &Buffer) -> Option<ResourceState> {
        self.buffers.get(&buffer.id()).map(|tracked| tracked.state)
    }

    pub fn texture_state(&self, texture: &Texture) -> Option<ResourceState> {
        self.textures.get(&texture.id()).map(|tracked| tracked.state)
    }

    /// Number of resources with an entry in the table.
    pub fn tracked_count(&self) -> usize {
        self.buffers.len() + self.textures.len()
    }
}

#[inline]
fn needs_barrier(current: ResourceState, requested: ResourceState) -> bool {
    current != requested || requested == ResourceState::UnorderedAccess
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{BufferDesc, Format, NativeHandle, TextureDesc};

    fn buffer(default: ResourceState) -> Buffer {
        Buffer::new(BufferDesc::new(64).with_default_state(default), NativeHandle::NULL)
    }

    fn texture(default: ResourceState) -> Texture {
        Texture::new(
            TextureDesc::new_2d(Format::Rgba8Unorm, 16, 16).with_default_state(default),
            NativeHandle::NULL,
        )
    }

    fn transitions(tracking: &StateTracking) -> Vec<(ResourceState, ResourceState)> {
        tracking
            .buffer_barriers()
            .iter()
            .map(|barrier| (barrier.before, barrier.after))
            .collect()
    }

    #[test]
    fn one_barrier_per_change() {
        use ResourceState::{CopyDestination, CopySource, ShaderResource};
        let buf = buffer(ShaderResource);
        let mut tracking = StateTracking::new();
        for state in [CopyDestination, CopyDestination, CopySource, ShaderResource, ShaderResource] {
            tracking.set_buffer_state(&buf, state);
        }
        assert_eq!(
            transitions(&tracking),
            [
                (ShaderResource, CopyDestination),
                (CopyDestination, CopySource),
                (CopySource, ShaderResource),
            ]
        );
    }

    #[test]
    fn repeated_state_is_idempotent() {
        let buf = buffer(ResourceState::General);
        let mut tracking = StateTracking::new();
        tracking.set_buffer_state(&buf, ResourceState::CopySource);
        tracking.set_buffer_state(&buf, ResourceState::CopySource);
        assert_eq!(tracking.buffer_barriers().len(), 1);
    }

    #[test]
    fn unordered_access_always_barriers() {
        let buf = buffer(ResourceState::UnorderedAccess);
        let mut tracking = StateTracking::new();
        tracking.set_buffer_state(&buf, ResourceState::UnorderedAccess);
        tracking.set_buffer_state(&buf, ResourceState::UnorderedAccess);
        assert_eq!(
            transitions(&tracking),
            [
                (ResourceState::UnorderedAccess, ResourceState::UnorderedAccess),
                (ResourceState::UnorderedAccess, ResourceState::UnorderedAccess),
            ]
        );
    }

    #[test]
    fn defaults_on_untouched_table_yield_nothing() {
        let buf = buffer(ResourceState::ShaderResource);
        let mut tracking = StateTracking::new();
        tracking.set_buffer_state(&buf, ResourceState::ShaderResource);
        tracking.require_default_states();
        assert!(!tracking.has_pending_barriers());
    }

    #[test]
    fn defaults_restore_each_resource() {
        let first = buffer(ResourceState::ShaderResource);
        let second = buffer(ResourceState::CopySource);
        let third = buffer(ResourceState::General);
        let tex = texture(ResourceState::RenderTarget);
        let mut tracking = StateTracking::new();
        tracking.set_buffer_state(&first, ResourceState::UnorderedAccess);
        tracking.set_buffer_state(&second, ResourceState::CopyDestination);
        tracking.set_buffer_state(&third, ResourceState::General);
        tracking.set_texture_state(&tex, SubresourceRange::ENTIRE, ResourceState::ShaderResource);
        tracking.clear_barriers();

        tracking.require_default_states();
        let restored: Vec<_> = tracking
            .buffer_barriers()
            .iter()
            .map(|barrier| (barrier.buffer.id(), barrier.after))
            .collect();
        assert_eq!(
            restored,
            [
                (first.id(), ResourceState::ShaderResource),
                (second.id(), ResourceState::CopySource),
            ]
        );
        assert_eq!(tracking.texture_barriers().len(), 1);
        assert_eq!(tracking.texture_barriers()[0].after, ResourceState::RenderTarget);
        assert_eq!(tracking.buffer_state(&first), Some(ResourceState::ShaderResource));
    }

    #[test]
    fn host_visible_buffers_are_not_tracked() {
        let upload = Buffer::new(
            BufferDesc::new(64).with_memory_type(MemoryType::Upload),
            NativeHandle::NULL,
        );
        let mut tracking = StateTracking::new();
        tracking.set_buffer_state(&upload, ResourceState::CopySource);
        tracking.set_buffer_state(&upload, ResourceState::UnorderedAccess);
        assert!(!tracking.has_pending_barriers());
        assert_eq!(tracking.tracked_count(), 0);
    }

    #[test]
    fn clear_barriers_keeps_states() {
        let buf = buffer(ResourceState::ShaderResource);
        let mut tracking = StateTracking::new();
        tracking.set_buffer_state(&buf, ResourceState::CopyDestination);
        tracking.clear_barriers();
        assert_eq!(tracking.buffer_state(&buf), Some(ResourceState::CopyDestination));
        tracking.clear();
        assert_eq!(tracking.buffer_state(&buf), None);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "subresource state tracking is not implemented")]
    fn subresource_ranges_assert() {
        let tex = Texture::new(
            TextureDesc::new_2d(Format::Rgba8Unorm, 16, 16).with_mips(4),
            NativeHandle::NULL,
        );
        let mut tracking = StateTracking::new();
        tracking.set_texture_state(&tex, SubresourceRange::mip(1, 0), ResourceState::CopyDestination);
    }
}
