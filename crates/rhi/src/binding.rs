//! Pre-resolved binding data consumed by state-setting commands.
//!
//! The layout/descriptor builder that produces [`BindingData`] lives outside this crate. The
//! engine only needs the native handles to bind and the states each bound resource must be in.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use smallvec::SmallVec;

use crate::resource::{Buffer, NativeHandle, ResourceState, SubresourceRange, Texture};
use crate::state_tracking::StateTracking;

/// Resource referenced by a binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BoundResource {
    Buffer(Buffer),
    Texture(Texture),
}

/// One `{resource, requiredState}` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingState {
    pub resource: BoundResource,
    pub state: ResourceState,
}

/// Opaque, already-resolved bundle of native handles and resource-state requirements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct BindingData {
    native: SmallVec<[NativeHandle; 4]>,
    push_constants: Vec<u8>,
    states: Vec<BindingState>,
}

impl BindingData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a native descriptor handle (descriptor set, table, bind group).
    #[must_use]
    pub fn with_native(mut self, handle: NativeHandle) -> Self {
        self.native.push(handle);
        self
    }

    #[must_use]
    pub fn with_push_constants(mut self, bytes: &[u8]) -> Self {
        self.push_constants.extend_from_slice(bytes);
        self
    }

    #[must_use]
    pub fn with_buffer(mut self, buffer: &Buffer, state: ResourceState) -> Self {
        self.states.push(BindingState {
            resource: BoundResource::Buffer(buffer.clone()),
            state,
        });
        self
    }

    #[must_use]
    pub fn with_texture(mut self, texture: &Texture, state: ResourceState) -> Self {
        self.states.push(BindingState {
            resource: BoundResource::Texture(texture.clone()),
            state,
        });
        self
    }

    #[inline]
    pub fn native_handles(&self) -> &[NativeHandle] {
        &self.native
    }

    #[inline]
    pub fn push_constants(&self) -> &[u8] {
        &self.push_constants
    }

    #[inline]
    pub fn states(&self) -> &[BindingState] {
        &self.states
    }

    /// Bound buffers in binding order.
    pub fn buffers(&self) -> impl Iterator<Item = &Buffer> {
        self.states.iter().filter_map(|binding| match &binding.resource {
            BoundResource::Buffer(buffer) => Some(buffer),
            BoundResource::Texture(_) => None,
        })
    }

    /// Request every bound resource's state from `tracking`.
    pub fn require_binding_states(&self, tracking: &mut StateTracking) {
        for binding in &self.states {
            match &binding.resource {
                BoundResource::Buffer(buffer) => tracking.set_buffer_state(buffer, binding.state),
                BoundResource::Texture(texture) => {
                    tracking.set_texture_state(texture, SubresourceRange::ENTIRE, binding.state);
                }
            }
        }
    }

    fn cache_key(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

/// Deduplicates identical binding data for the lifetime of one command buffer.
///
/// Recorders diff bindings by pointer, so handing out one shared `Arc` per distinct bundle
/// lets repeated state-setting commands skip rebinding.
#[derive(Debug, Default)]
pub struct BindingCache {
    entries: HashMap<u64, SmallVec<[Arc<BindingData>; 1]>>,
    hits: usize,
}

impl BindingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached instance equal to `data`, inserting it if new.
    pub fn resolve(&mut self, data: BindingData) -> Arc<BindingData> {
        let bucket = self.entries.entry(data.cache_key()).or_default();
        if let Some(existing) = bucket.iter().find(|cached| ***cached == data) {
            self.hits += 1;
            return Arc::clone(existing);
        }
        let shared = Arc::new(data);
        bucket.push(Arc::clone(&shared));
        shared
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.values().map(SmallVec::len).sum()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of `resolve` calls answered from the cache.
    #[inline]
    pub const fn hits(&self) -> usize {
        self.hits
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.hits = 0;
    }
}
