//! Append-only, forward-iterable arena of recorded commands.

use crate::command::{Command, CommandId, Payload};
use crate::error::{RhiError, RhiResult};

/// Handle returned by [`CommandList::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandHandle {
    index: usize,
    id: CommandId,
    generation: u32,
}

impl CommandHandle {
    #[inline]
    pub const fn id(self) -> CommandId {
        self.id
    }
}

/// Ordered, heterogeneous command recording.
///
/// Storage is a [`boxcar::Vec`], whose elements never move once pushed, so a payload reference
/// obtained through [`CommandList::get`] stays valid while later commands are appended. Entries
/// are never removed or reordered; the only way back to empty is [`CommandList::reset`], which
/// also invalidates every handle issued before it.
pub struct CommandList {
    records: boxcar::Vec<Command>,
    len: usize,
    bytes: usize,
    limit: Option<usize>,
    generation: u32,
}

impl CommandList {
    pub fn new() -> Self {
        Self::with_limit(None)
    }

    /// List that refuses to grow past `limit` bytes of estimated footprint.
    pub fn with_limit(limit: Option<usize>) -> Self {
        Self {
            records: boxcar::Vec::new(),
            len: 0,
            bytes: 0,
            limit,
            generation: 0,
        }
    }

    /// Append one command.
    ///
    /// # Errors
    /// Returns [`RhiError::OutOfMemory`] once the configured arena budget is exhausted. The
    /// list is left unchanged in that case.
    pub fn append<T: Payload>(&mut self, payload: T) -> RhiResult<CommandHandle> {
        let command = payload.into_command();
        self.reserve(command.footprint())?;
        let index = self.records.push(command);
        self.len += 1;
        Ok(CommandHandle {
            index,
            id: T::ID,
            generation: self.generation,
        })
    }

    /// Account for `bytes` of out-of-line data (scratch uploads) against the same budget.
    ///
    /// # Errors
    /// Returns [`RhiError::OutOfMemory`] if the budget would be exceeded.
    pub fn reserve(&mut self, bytes: usize) -> RhiResult<()> {
        let total = self.bytes.saturating_add(bytes);
        if let Some(limit) = self.limit
            && total > limit
        {
            return Err(RhiError::OutOfMemory(format!(
                "command arena budget of {limit} bytes exceeded ({total} requested)"
            )));
        }
        self.bytes = total;
        Ok(())
    }

    /// Forward iteration in recording order.
    #[inline]
    pub fn commands(&self) -> Commands<'_> {
        Commands {
            list: self,
            next: 0,
        }
    }

    /// Typed payload for `handle`, or `None` if `T` does not match the recorded command or the
    /// list was reset since the handle was issued.
    pub fn get<T: Payload>(&self, handle: CommandHandle) -> Option<&T> {
        if handle.id != T::ID || handle.generation != self.generation {
            return None;
        }
        self.records.get(handle.index).and_then(T::from_command)
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Estimated bytes consumed so far.
    #[inline]
    pub const fn bytes_used(&self) -> usize {
        self.bytes
    }

    /// Drop every command, releasing the resources they reference.
    pub fn reset(&mut self) {
        self.records = boxcar::Vec::new();
        self.len = 0;
        self.bytes = 0;
        self.generation = self.generation.wrapping_add(1);
    }
}

impl Default for CommandList {
    fn default() -> Self {
        Self::new()
    }
}

/// Forward-only cursor over a [`CommandList`].
///
/// Cloning a cursor forks an independent lookahead from the same position.
#[derive(Clone)]
pub struct Commands<'list> {
    list: &'list CommandList,
    next: usize,
}

impl<'list> Iterator for Commands<'list> {
    type Item = &'list Command;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.list.len {
            return None;
        }
        let command = self.list.records.get(self.next)?;
        self.next += 1;
        Some(command)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.list.len.saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}
