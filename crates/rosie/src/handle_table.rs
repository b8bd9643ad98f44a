// Compiled-pattern handles
// A slot map: a growable array of optional entries plus a free list of
// recycled indices. Handle `n` addresses entry `n - 1`; handle 0 is never issued.

use std::fmt;

/// Identifies a compiled pattern inside one engine.
///
/// `PatternHandle::NONE` (zero) is what a failed compilation returns. Any
/// handle, including zero and handles from other engines, may be passed to a
/// lookup; unknown ones are reported in-band, never as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PatternHandle(u32);

impl PatternHandle {
    pub const NONE: PatternHandle = PatternHandle(0);

    pub fn from_raw(raw: u32) -> Self {
        PatternHandle(raw)
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    fn index(self) -> Option<usize> {
        (self.0 as usize).checked_sub(1)
    }
}

impl fmt::Display for PatternHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Largest handle ever issued. Handles cross the C boundary as `int`.
pub(crate) const MAX_HANDLE: u32 = i32::MAX as u32;

#[derive(Debug)]
pub(crate) struct HandleTable<T> {
    entries: Vec<Option<T>>,
    free: Vec<PatternHandle>,
    limit: u32,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            limit: MAX_HANDLE,
        }
    }
}

impl<T> HandleTable<T> {
    #[cfg(test)]
    pub fn with_limit(limit: u32) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    /// Stores `value` under a recycled handle if one is free, else a new one.
    /// `None` once every handle up to the limit is live.
    pub fn insert(&mut self, value: T) -> Option<PatternHandle> {
        if let Some(handle) = self.free.pop() {
            let index = handle.index()?;
            self.entries[index] = Some(value);
            return Some(handle);
        }
        let raw = u32::try_from(self.entries.len() + 1)
            .ok()
            .filter(|&raw| raw <= self.limit)?;
        self.entries.push(Some(value));
        Some(PatternHandle(raw))
    }

    pub fn get(&self, handle: PatternHandle) -> Option<&T> {
        handle
            .index()
            .and_then(|index| self.entries.get(index))
            .and_then(Option::as_ref)
    }

    /// Removes the entry. Returns `None` for zero, stale or unknown handles.
    pub fn remove(&mut self, handle: PatternHandle) -> Option<T> {
        let index = handle.index()?;
        let value = self.entries.get_mut(index)?.take()?;
        self.free.push(handle);
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.entries.len() - self.free.len()
    }
}
