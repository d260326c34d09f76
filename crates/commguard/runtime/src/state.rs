// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Communication contexts and the shadow slots that record them

use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

use crate::stack::Stack;
use crate::thread::ThreadState;

/// A (thread, call stack) pair. Compared by reference only; each thread
/// interns its States so at most one exists per pair at a time.
pub struct State {
    thread: Arc<ThreadState>,
    stack: Arc<Stack>,
}

impl State {
    pub(crate) fn new(thread: Arc<ThreadState>, stack: Arc<Stack>) -> Self {
        Self { thread, stack }
    }

    pub fn thread(&self) -> &Arc<ThreadState> {
        &self.thread
    }

    pub fn stack(&self) -> &Arc<Stack> {
        &self.stack
    }

    #[inline]
    pub fn same_thread(&self, other: &State) -> bool {
        Arc::ptr_eq(&self.thread, &other.thread)
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State").field("thread", &self.thread.id()).field("stack", &self.stack).finish()
    }
}

/// Shadow metadata for one traced location: the State of its last writer
#[derive(Default)]
pub struct ShadowSlot {
    last_writer: RwLock<Option<Arc<State>>>,
}

impl ShadowSlot {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn load(&self) -> Option<Arc<State>> {
        self.last_writer.read().clone()
    }

    #[inline]
    pub fn store(&self, state: Arc<State>) {
        *self.last_writer.write() = Some(state);
    }

    pub fn is_written(&self) -> bool {
        self.last_writer.read().is_some()
    }
}

impl fmt::Debug for ShadowSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShadowSlot").field("last_writer", &*self.last_writer.read()).finish()
    }
}

/// Shadow metadata for an array, per index or for the whole array
pub enum ArrayShadow {
    PerIndex(RwLock<Vec<Option<Arc<State>>>>),
    Whole(ShadowSlot),
}

impl ArrayShadow {
    pub fn per_index() -> Self {
        ArrayShadow::PerIndex(RwLock::new(Vec::new()))
    }

    pub fn whole() -> Self {
        ArrayShadow::Whole(ShadowSlot::new())
    }

    pub fn load(&self, index: usize) -> Option<Arc<State>> {
        match self {
            ArrayShadow::PerIndex(states) => states.read().get(index).cloned().flatten(),
            ArrayShadow::Whole(slot) => slot.load(),
        }
    }

    /// Record a write. Per-index storage grows to cover `index`.
    pub fn store(&self, index: usize, state: Arc<State>) {
        match self {
            ArrayShadow::PerIndex(states) => {
                let mut states = states.write();
                if index >= states.len() {
                    states.resize(index + 1, None);
                }
                states[index] = Some(state);
            }
            ArrayShadow::Whole(slot) => slot.store(state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::StackTable;

    fn state() -> Arc<State> {
        let table = StackTable::new();
        Arc::new(State::new(Arc::new(ThreadState::current(0)), Arc::clone(table.root())))
    }

    #[test]
    fn test_slot_keeps_last_writer() {
        let slot = ShadowSlot::new();
        assert!(slot.load().is_none());
        let first = state();
        let second = state();
        slot.store(Arc::clone(&first));
        slot.store(Arc::clone(&second));
        assert!(Arc::ptr_eq(&slot.load().unwrap(), &second));
        assert!(slot.is_written());
    }

    #[test]
    fn test_array_granularities() {
        let fine = ArrayShadow::per_index();
        let s = state();
        fine.store(5, Arc::clone(&s));
        assert!(fine.load(4).is_none());
        assert!(fine.load(100).is_none());
        assert!(Arc::ptr_eq(&fine.load(5).unwrap(), &s));

        let coarse = ArrayShadow::whole();
        coarse.store(5, Arc::clone(&s));
        assert!(Arc::ptr_eq(&coarse.load(0).unwrap(), &s));
    }
}
