//! Finished, submittable recording.

use core::fmt;

use crate::binding::BindingCache;
use crate::command_list::{CommandList, Commands};
use crate::scratch::ScratchAllocator;

/// A finalized command list plus the side storage its records point into.
///
/// Produced by `CommandEncoder::finish`. Buffers are plain owned data and can be moved to the
/// thread that submits them.
#[derive(Default)]
pub struct CommandBuffer {
    list: CommandList,
    bindings: BindingCache,
    scratch: ScratchAllocator,
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) const fn from_parts(
        list: CommandList,
        bindings: BindingCache,
        scratch: ScratchAllocator,
    ) -> Self {
        Self {
            list,
            bindings,
            scratch,
        }
    }

    #[inline]
    pub const fn list(&self) -> &CommandList {
        &self.list
    }

    #[inline]
    pub fn commands(&self) -> Commands<'_> {
        self.list.commands()
    }

    #[inline]
    pub const fn scratch(&self) -> &ScratchAllocator {
        &self.scratch
    }

    #[inline]
    pub const fn bindings(&self) -> &BindingCache {
        &self.bindings
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.list.len()
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Drop all records, cached bindings and scratch pages so the buffer can be reused.
    pub fn reset(&mut self) {
        self.list.reset();
        self.bindings.clear();
        self.scratch.reset();
    }
}

impl fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("commands", &self.list.len())
            .field("bytes", &self.list.bytes_used())
            .field("bindings", &self.bindings.len())
            .field("scratch", &self.scratch.allocated())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::BindingData;
    use crate::command::GlobalBarrier;
    use crate::resource::NativeHandle;

    #[test]
    fn reset_clears_every_store() {
        let mut list = CommandList::new();
        list.append(GlobalBarrier).unwrap();
        let mut bindings = BindingCache::new();
        bindings.resolve(BindingData::new().with_native(NativeHandle(4)));
        let mut scratch = ScratchAllocator::default();
        scratch.push(&[1, 2, 3]).unwrap();

        let mut buffer = CommandBuffer::from_parts(list, bindings, scratch);
        assert_eq!(buffer.len(), 1);
        buffer.reset();
        assert!(buffer.is_empty());
        assert!(buffer.bindings().is_empty());
        assert_eq!(buffer.scratch().allocated(), 0);
    }
}
