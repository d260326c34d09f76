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

//! Lock shadow state

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

use crate::state::State;

struct LockInner {
    depth: i32,
    last_holder: Arc<State>,
}

/// Reentrancy depth and last holder of one application lock. Only mutated
/// by the thread that holds the real lock, so the inner mutex is never
/// contended.
pub struct LockState {
    inner: Mutex<LockInner>,
}

impl LockState {
    pub(crate) fn new(holder: Arc<State>) -> Self {
        Self { inner: Mutex::new(LockInner { depth: 0, last_holder: holder }) }
    }

    pub fn depth(&self) -> i32 {
        self.inner.lock().depth
    }

    pub fn last_holder(&self) -> Arc<State> {
        Arc::clone(&self.inner.lock().last_holder)
    }

    /// Reentrant acquire: bump the depth
    pub(crate) fn reenter(&self) -> i32 {
        let mut inner = self.inner.lock();
        inner.depth += 1;
        inner.depth
    }

    /// Acquire outside the reentrancy lookback. At depth zero the lock
    /// changes hands and the previous holder is returned if it was a
    /// different State. Returns the new depth alongside.
    ///
    /// Returns `Err(depth)` if the depth is negative.
    pub(crate) fn take_over(&self, holder: &Arc<State>) -> Result<(i32, Option<Arc<State>>), i32> {
        let mut inner = self.inner.lock();
        if inner.depth < 0 {
            return Err(inner.depth);
        }
        let previous = if inner.depth == 0 && !Arc::ptr_eq(&inner.last_holder, holder) {
            Some(std::mem::replace(&mut inner.last_holder, Arc::clone(holder)))
        } else {
            None
        };
        inner.depth += 1;
        Ok((inner.depth, previous))
    }

    /// Returns the new depth.
    pub(crate) fn exit(&self) -> i32 {
        let mut inner = self.inner.lock();
        inner.depth -= 1;
        inner.depth
    }

    /// Save and zero the depth around a wait
    pub(crate) fn suspend(&self) -> i32 {
        let mut inner = self.inner.lock();
        std::mem::replace(&mut inner.depth, 0)
    }

    /// Restore the depth after a wait. Returns the previous holder if
    /// another State held the lock meanwhile, or `Err(depth)` if the depth
    /// was not zero.
    pub(crate) fn resume(&self, depth: i32, holder: &Arc<State>) -> Result<Option<Arc<State>>, i32> {
        let mut inner = self.inner.lock();
        if inner.depth != 0 {
            return Err(inner.depth);
        }
        inner.depth = depth;
        if Arc::ptr_eq(&inner.last_holder, holder) {
            Ok(None)
        } else {
            Ok(Some(std::mem::replace(&mut inner.last_holder, Arc::clone(holder))))
        }
    }
}

impl fmt::Debug for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("LockState").field("depth", &inner.depth).field("last_holder", &inner.last_holder).finish()
    }
}

/// Locks currently held by one thread, most recent last. Reentrant
/// acquires only look back `window` entries.
pub(crate) struct HeldLocks {
    entries: Vec<(usize, Arc<LockState>)>,
    window: usize,
}

impl HeldLocks {
    pub(crate) fn new(window: usize) -> Self {
        Self { entries: Vec::new(), window: window.max(1) }
    }

    /// Bounded lookback from the most recent acquire
    pub(crate) fn find_recent(&self, addr: usize) -> Option<&Arc<LockState>> {
        self.entries.iter().rev().take(self.window).find(|(a, _)| *a == addr).map(|(_, state)| state)
    }

    pub(crate) fn push(&mut self, addr: usize, state: Arc<LockState>) {
        self.entries.push((addr, state));
    }

    pub(crate) fn remove(&mut self, addr: usize) -> Option<Arc<LockState>> {
        let index = self.entries.iter().rposition(|(a, _)| *a == addr)?;
        Some(self.entries.remove(index).1)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
