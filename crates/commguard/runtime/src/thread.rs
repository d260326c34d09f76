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

//! Per-thread monitor state
//!
//! [`ThreadState`] is the shared identity of a monitored thread, referenced
//! from every State it produced. [`ThreadContext`] is the thread-owned part:
//! call frames, interned States and the small caches. Only the owning
//! thread ever touches a context.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use crate::lock::{HeldLocks, LockState};
use crate::shadow::DirectMappedCache;
use crate::stack::Stack;
use crate::state::{ArrayShadow, State};

/// Initial interned-state map size that triggers pruning of dead entries
const STATE_PRUNE_THRESHOLD: usize = 256;

pub struct ThreadState {
    id: u32,
    name: String,
    os_id: ThreadId,
    /// Cleared when the owning thread's context is torn down
    live: AtomicBool,
}

impl ThreadState {
    /// Identity for the calling thread
    pub(crate) fn current(id: u32) -> Self {
        let current = thread::current();
        let name = current.name().map(str::to_string).unwrap_or_else(|| format!("{:?}", current.id()));
        Self { id, name, os_id: current.id(), live: AtomicBool::new(true) }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn os_id(&self) -> ThreadId {
        self.os_id
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub(crate) fn mark_dead(&self) {
        self.live.store(false, Ordering::Release);
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_live() {
            write!(f, "Thread {} (\"{}\")", self.id, self.name)
        } else {
            write!(f, "Thread {} (\"[No longer live. Originally named {}]\")", self.id, self.name)
        }
    }
}

impl fmt::Debug for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadState").field("id", &self.id).field("name", &self.name).field("live", &self.is_live()).finish()
    }
}

pub(crate) struct ThreadContext {
    pub(crate) thread: Arc<ThreadState>,
    root: Arc<State>,
    frames: Vec<Arc<State>>,
    /// Stack address -> State, so one State exists per (thread, stack)
    states: HashMap<usize, Weak<State>>,
    /// Map size at which `intern` next prunes dead entries
    prune_at: usize,
    pub(crate) array_cache: DirectMappedCache<Arc<ArrayShadow>>,
    pub(crate) lock_cache: DirectMappedCache<Arc<LockState>>,
    pub(crate) held: HeldLocks,
}

impl ThreadContext {
    pub(crate) fn new(thread: Arc<ThreadState>, root: &Arc<Stack>, array_cache_size: usize, lock_cache_size: usize) -> Self {
        let root = Arc::new(State::new(Arc::clone(&thread), Arc::clone(root)));
        Self {
            thread,
            root,
            frames: Vec::new(),
            states: HashMap::new(),
            prune_at: STATE_PRUNE_THRESHOLD,
            array_cache: DirectMappedCache::new(array_cache_size),
            lock_cache: DirectMappedCache::new(lock_cache_size),
            held: HeldLocks::new(lock_cache_size),
        }
    }

    /// Current context, the root State outside any monitored method
    #[inline]
    pub(crate) fn current(&self) -> &Arc<State> {
        self.frames.last().unwrap_or(&self.root)
    }

    pub(crate) fn current_stack(&self) -> &Arc<Stack> {
        self.current().stack()
    }

    pub(crate) fn depth(&self) -> usize {
        self.frames.len()
    }

    pub(crate) fn push(&mut self, stack: Arc<Stack>) {
        let state = self.intern(stack);
        self.frames.push(state);
    }

    pub(crate) fn pop(&mut self) -> Option<Arc<State>> {
        self.frames.pop()
    }

    /// Back to NO_STATE: frames and caches go. The thread identity and the
    /// interned States stay, so a State still referenced from shadow state
    /// is found again on re-entry.
    pub(crate) fn reset(&mut self) {
        self.frames.clear();
        self.array_cache.clear();
        self.lock_cache.clear();
    }

    fn intern(&mut self, stack: Arc<Stack>) -> Arc<State> {
        let key = Arc::as_ptr(&stack) as usize;
        if let Some(state) = self.states.get(&key).and_then(Weak::upgrade) {
            return state;
        }
        if self.states.len() >= self.prune_at {
            self.states.retain(|_, state| state.strong_count() > 0);
            // Grow unless pruning freed at least a quarter of the threshold.
            if self.states.len() > self.prune_at - self.prune_at / 4 {
                self.prune_at *= 2;
            }
        }
        let state = Arc::new(State::new(Arc::clone(&self.thread), stack));
        self.states.insert(key, Arc::downgrade(&state));
        state
    }
}

impl Drop for ThreadContext {
    fn drop(&mut self) {
        self.thread.mark_dead();
    }
}
