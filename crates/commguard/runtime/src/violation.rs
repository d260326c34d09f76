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

//! Violation records
//!
//! A violation captures both contexts at the moment it is detected, so it
//! stays readable after the threads and stacks involved are gone.

use commguard_spec::{MethodUid, SpecRegistry};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::stack::{Frame, StackTable};
use crate::state::State;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViolationKind {
    /// A read observed an unauthorized write
    Sharing,
    /// A lock was handed over along an unauthorized edge
    Synchronization,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationKind::Sharing => write!(f, "Illegal sharing"),
            ViolationKind::Synchronization => write!(f, "Illegal synchronization"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameInfo {
    pub uid: Option<MethodUid>,
    pub module: Option<String>,
    pub signature: String,
}

impl fmt::Display for FrameInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.module {
            Some(module) => write!(f, "[module: {}] {}", module, self.signature),
            None => write!(f, "{}", self.signature),
        }
    }
}

/// One side of a violation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub thread_id: u32,
    /// Rendered thread, e.g. `Thread 2 ("worker")`
    pub thread: String,
    pub stack_id: u32,
    /// Top frame first
    pub frames: Vec<FrameInfo>,
}

impl ContextSnapshot {
    pub(crate) fn capture(state: &State, stacks: &StackTable, registry: &SpecRegistry) -> Self {
        let frames = state
            .stack()
            .frames()
            .map(|stack| match stack.frame() {
                Frame::Root => FrameInfo { uid: None, module: None, signature: "(root)".to_string() },
                Frame::ClassInitializer => FrameInfo { uid: None, module: None, signature: "(class initialization)".to_string() },
                Frame::Method(uid) => match registry.module_of(uid) {
                    Some(module) => FrameInfo {
                        uid: Some(uid),
                        module: Some(module.name().to_string()),
                        signature: module.method_signature(uid).unwrap_or_else(|| uid.to_string()),
                    },
                    None => FrameInfo { uid: Some(uid), module: None, signature: uid.to_string() },
                },
            })
            .collect();

        Self { thread_id: state.thread().id(), thread: state.thread().to_string(), stack_id: stacks.id_of(state.stack()), frames }
    }

    /// Signature of the innermost method, or the special frame's label
    pub fn method(&self) -> &str {
        self.frames.first().map_or("(root)", |frame| frame.signature.as_str())
    }
}

impl fmt::Display for ContextSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in stack {}:", self.thread, self.stack_id)?;
        for (i, frame) in self.frames.iter().enumerate() {
            if i == 0 {
                write!(f, "\n    {frame}")?;
            } else {
                write!(f, "\n      called by {frame}")?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub writer: ContextSnapshot,
    pub reader: ContextSnapshot,
    /// What was read or acquired, when the caller named it
    pub location: Option<String>,
    /// Reader's backtrace, if capture is enabled
    pub backtrace: Option<String>,
}

impl Violation {
    pub fn message(&self) -> String {
        let verb = match self.kind {
            ViolationKind::Sharing => "read",
            ViolationKind::Synchronization => "acquired",
        };
        let on = self.location.as_deref().map(|l| format!(" {l}")).unwrap_or_default();
        format!(
            "{}: {} in {} {}{} last {} by {} in {}",
            self.kind,
            self.reader.thread,
            self.reader.method(),
            verb,
            on,
            if self.kind == ViolationKind::Sharing { "written" } else { "released" },
            self.writer.thread,
            self.writer.method()
        )
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.message())?;
        writeln!(f, "  Writer: {}", self.writer)?;
        write!(f, "  Reader: {}", self.reader)?;
        if let Some(backtrace) = &self.backtrace {
            write!(f, "\n  Reader backtrace:\n{backtrace}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::ThreadState;
    use commguard_spec::{MissingSpecPolicy, ModuleDescription};
    use std::sync::Arc;

    #[test]
    fn test_snapshot_names_frames() {
        let registry = SpecRegistry::empty(MissingSpecPolicy::Fail);
        registry.register(&ModuleDescription::builder("box").comm("set(I)V", &[], &[]).build().unwrap()).unwrap();
        let set = registry.method_uid("box", "set(I)V").unwrap();

        let stacks = StackTable::new();
        let stack = stacks.push(set, stacks.root());
        let state = State::new(Arc::new(ThreadState::current(7)), stack);

        let snapshot = ContextSnapshot::capture(&state, &stacks, &registry);
        assert_eq!(snapshot.thread_id, 7);
        assert_eq!(snapshot.method(), "set(I)V");
        assert_eq!(snapshot.frames.len(), 2);
        assert_eq!(snapshot.frames[0].module.as_deref(), Some("box"));
        assert_eq!(snapshot.frames[1].signature, "(root)");
        assert_eq!(state.stack().assigned_id(), Some(snapshot.stack_id));
    }

    #[test]
    fn test_message_names_both_sides() {
        let side = |id: u32, method: &str| ContextSnapshot {
            thread_id: id,
            thread: format!("Thread {id} (\"t{id}\")"),
            stack_id: id,
            frames: vec![FrameInfo { uid: None, module: Some("m".to_string()), signature: method.to_string() }],
        };
        let violation = Violation {
            kind: ViolationKind::Sharing,
            writer: side(1, "w()V"),
            reader: side(2, "s()V"),
            location: Some("f".to_string()),
            backtrace: None,
        };
        assert_eq!(violation.message(), "Illegal sharing: Thread 2 (\"t2\") in s()V read f last written by Thread 1 (\"t1\") in w()V");
        assert!(violation.to_string().contains("Writer: Thread 1"));

        let json = serde_json::to_string(&violation).unwrap();
        assert!(json.contains("\"kind\":\"Sharing\""));
    }
}
