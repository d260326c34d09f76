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

//! Communication policy: may a reader context observe a writer context?
//!
//! `TopFrame` asks the owning module for the single edge between the two
//! innermost methods. `Layered` walks both stacks module layer by module
//! layer: the reader's run of same-module frames forms a layer set, every
//! writer frame in the matching run must reach all of it, and the walk
//! continues below both runs only while the topmost pair is an interface
//! edge.

use commguard_spec::{IntSet, MethodUid, ModuleSpec, SpecRegistry};

use crate::config::ContextPolicy;
use crate::stack::{Frame, Stack};

/// Outcome of a context comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Denied,
}

impl Verdict {
    fn from_bool(allowed: bool) -> Self {
        if allowed { Verdict::Allowed } else { Verdict::Denied }
    }

    pub fn is_allowed(self) -> bool {
        self == Verdict::Allowed
    }
}

pub struct CommunicationPolicy<'a> {
    registry: &'a SpecRegistry,
    mode: ContextPolicy,
}

impl<'a> CommunicationPolicy<'a> {
    pub fn new(registry: &'a SpecRegistry, mode: ContextPolicy) -> Self {
        Self { registry, mode }
    }

    pub fn check(&self, writer: &Stack, reader: &Stack) -> Verdict {
        match self.mode {
            ContextPolicy::TopFrame => self.check_top_frame(writer, reader),
            ContextPolicy::Layered => Verdict::from_bool(self.walk_stacks(writer, reader)),
        }
    }

    fn check_top_frame(&self, writer: &Stack, reader: &Stack) -> Verdict {
        match (writer.frame(), reader.frame()) {
            (Frame::ClassInitializer, _) | (_, Frame::ClassInitializer) => Verdict::Allowed,
            (Frame::Root, _) | (_, Frame::Root) => Verdict::Allowed,
            (Frame::Method(w), Frame::Method(r)) => Verdict::from_bool(self.edge(w, r)),
        }
    }

    /// Single edge query. Null modules answer with their own setting; two
    /// different compiled modules never communicate directly.
    fn edge(&self, writer: MethodUid, reader: MethodUid) -> bool {
        let (Some(wm), Some(rm)) = (self.registry.module_of(writer), self.registry.module_of(reader)) else {
            return false;
        };
        if wm.is_null() || rm.is_null() {
            let wok = !wm.is_null() || wm.is_allowed(writer, reader);
            let rok = !rm.is_null() || rm.is_allowed(writer, reader);
            return wok && rok;
        }
        writer.module_id() == reader.module_id() && wm.is_allowed(writer, reader)
    }

    fn walk_stacks(&self, mut writer: &Stack, mut reader: &Stack) -> bool {
        loop {
            match (writer.frame(), reader.frame()) {
                (Frame::Root, Frame::Root) => return true,
                (Frame::ClassInitializer, _) | (_, Frame::ClassInitializer) => return true,
                (Frame::Root, _) | (_, Frame::Root) => return false,
                (Frame::Method(w), Frame::Method(r)) => {
                    if w.module_id() != r.module_id() {
                        return false;
                    }
                    let Some(module) = self.registry.module_of(w) else {
                        return false;
                    };

                    let mut layer = IntSet::new();
                    let reader_top = expand_layer(reader, w.module_id(), &mut layer);
                    let Some(writer_top) = check_layer(writer, &layer, module.as_ref()) else {
                        return false;
                    };

                    let (Some(wt), Some(rt)) = (writer_top.method(), reader_top.method()) else {
                        return false;
                    };
                    if !module.is_public(wt, rt) {
                        // Hidden inside this module: nothing below can see it.
                        return true;
                    }
                    match (writer_top.parent(), reader_top.parent()) {
                        (Some(wp), Some(rp)) => {
                            writer = wp.as_ref();
                            reader = rp.as_ref();
                        }
                        _ => return false,
                    }
                }
            }
        }
    }
}

/// Collect the method ids of the maximal run of `module` frames starting at
/// `stack`. Returns the last frame of the run.
fn expand_layer<'s>(stack: &'s Stack, module: u32, layer: &mut IntSet) -> &'s Stack {
    let mut current = stack;
    loop {
        if let Some(uid) = current.method() {
            layer.add(uid.method_id());
        }
        match current.parent() {
            Some(parent) if in_module(parent, module) => current = parent.as_ref(),
            _ => return current,
        }
    }
}

/// Verify every frame in the writer's run of `module` frames may reach all
/// of `layer`. Returns the last frame of the run, `None` on a missing edge.
fn check_layer<'s>(stack: &'s Stack, layer: &IntSet, module: &dyn ModuleSpec) -> Option<&'s Stack> {
    let mut current = stack;
    loop {
        let uid = current.method()?;
        if !module.all_allowed(uid, layer) {
            return None;
        }
        match current.parent() {
            Some(parent) if in_module(parent, uid.module_id()) => current = parent.as_ref(),
            _ => return Some(current),
        }
    }
}

fn in_module(stack: &Stack, module: u32) -> bool {
    stack.method().is_some_and(|uid| uid.module_id() == module)
}
