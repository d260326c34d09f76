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

//! Call-stack canonicalization
//!
//! Every distinct chain of frames has exactly one [`Stack`] node, shared by
//! all threads, so contexts compare by pointer. Nodes are found through a
//! two-level table: method UID, then parent address. A node is built
//! outside the table and offered with `entry().or_insert`; when two
//! threads race on the same chain the loser's node is dropped.
//!
//! Numeric ids are handed out only when asked for, which happens when a
//! chain shows up in a violation or in the layered writer memo.

use commguard_spec::{MethodUid, SpecRegistry};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Frame {
    /// Bottom of every thread's stack
    Root,
    /// Static initialization, allowed to communicate with anything
    ClassInitializer,
    Method(MethodUid),
}

impl Frame {
    pub fn method(self) -> Option<MethodUid> {
        match self {
            Frame::Method(uid) => Some(uid),
            _ => None,
        }
    }
}

pub struct Stack {
    frame: Frame,
    parent: Option<Arc<Stack>>,
    depth: usize,
    id: OnceLock<u32>,
    /// Ids of writer stacks this stack has been verified to read from
    writer_memo: Mutex<HashSet<u32>>,
}

impl Stack {
    fn new(frame: Frame, parent: Option<Arc<Stack>>) -> Self {
        let depth = parent.as_ref().map_or(0, |p| p.depth + 1);
        Self { frame, parent, depth, id: OnceLock::new(), writer_memo: Mutex::new(HashSet::new()) }
    }

    pub fn frame(&self) -> Frame {
        self.frame
    }

    pub fn method(&self) -> Option<MethodUid> {
        self.frame.method()
    }

    pub fn parent(&self) -> Option<&Arc<Stack>> {
        self.parent.as_ref()
    }

    /// Number of method frames above the root
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_root(&self) -> bool {
        self.frame == Frame::Root
    }

    pub fn is_class_initializer(&self) -> bool {
        self.frame == Frame::ClassInitializer
    }

    /// Id if one has been assigned
    pub fn assigned_id(&self) -> Option<u32> {
        self.id.get().copied()
    }

    /// Frames from top to bottom
    pub fn frames(&self) -> Frames<'_> {
        Frames { next: Some(self) }
    }

    pub(crate) fn memo_contains(&self, writer_id: u32) -> bool {
        self.writer_memo.lock().contains(&writer_id)
    }

    pub(crate) fn memo_insert(&self, writer_id: u32) {
        self.writer_memo.lock().insert(writer_id);
    }

    pub fn display<'a>(&'a self, registry: &'a SpecRegistry) -> StackDisplay<'a> {
        StackDisplay { stack: self, registry }
    }
}

impl fmt::Debug for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stack").field("frame", &self.frame).field("depth", &self.depth).field("id", &self.id.get()).finish()
    }
}

pub struct Frames<'a> {
    next: Option<&'a Stack>,
}

impl<'a> Iterator for Frames<'a> {
    type Item = &'a Stack;

    fn next(&mut self) -> Option<&'a Stack> {
        let current = self.next?;
        self.next = current.parent.as_deref();
        Some(current)
    }
}

pub struct StackDisplay<'a> {
    stack: &'a Stack,
    registry: &'a SpecRegistry,
}

impl fmt::Display for StackDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, frame) in self.stack.frames().enumerate() {
            if i > 0 {
                write!(f, "\n  called by ")?;
            }
            match frame.frame {
                Frame::Root => write!(f, "(root)")?,
                Frame::ClassInitializer => write!(f, "(class initialization)")?,
                Frame::Method(uid) => match self.registry.module_of(uid) {
                    Some(module) => {
                        let signature = module.method_signature(uid).unwrap_or_else(|| uid.to_string());
                        write!(f, "[module: {}] {}", module.name(), signature)?
                    }
                    None => write!(f, "[unknown module] {uid}")?,
                },
            }
        }
        Ok(())
    }
}

type Children = DashMap<usize, Arc<Stack>>;

/// The hash-consing table. One per monitor.
pub struct StackTable {
    root: Arc<Stack>,
    class_initializer: Arc<Stack>,
    children: DashMap<MethodUid, Arc<Children>>,
    next_id: AtomicU32,
    created: AtomicUsize,
}

impl StackTable {
    pub fn new() -> Self {
        Self {
            root: Arc::new(Stack::new(Frame::Root, None)),
            class_initializer: Arc::new(Stack::new(Frame::ClassInitializer, None)),
            children: DashMap::new(),
            next_id: AtomicU32::new(0),
            created: AtomicUsize::new(0),
        }
    }

    pub fn root(&self) -> &Arc<Stack> {
        &self.root
    }

    pub fn class_initializer(&self) -> &Arc<Stack> {
        &self.class_initializer
    }

    /// Canonical node for `parent` extended by `method`
    pub fn push(&self, method: MethodUid, parent: &Arc<Stack>) -> Arc<Stack> {
        let children = match self.children.get(&method) {
            Some(children) => Arc::clone(children.value()),
            None => Arc::clone(self.children.entry(method).or_insert_with(|| Arc::new(DashMap::new())).value()),
        };

        let parent_addr = Arc::as_ptr(parent) as usize;
        if let Some(existing) = children.get(&parent_addr) {
            return Arc::clone(existing.value());
        }

        let candidate = Arc::new(Stack::new(Frame::Method(method), Some(Arc::clone(parent))));
        let winner = Arc::clone(children.entry(parent_addr).or_insert(Arc::clone(&candidate)).value());
        if Arc::ptr_eq(&winner, &candidate) {
            self.created.fetch_add(1, Ordering::Relaxed);
        }
        winner
    }

    /// Caller's node, `None` at a root
    pub fn pop(stack: &Stack) -> Option<&Arc<Stack>> {
        stack.parent()
    }

    /// Numeric id of `stack`, assigned on first request
    pub fn id_of(&self, stack: &Stack) -> u32 {
        *stack.id.get_or_init(|| self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Distinct method stacks created so far
    pub fn len(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for StackTable {
    fn default() -> Self {
        Self::new()
    }
}
