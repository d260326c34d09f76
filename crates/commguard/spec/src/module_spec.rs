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

//! The module specification seam between the registry and the monitor

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::SpecResult;
use crate::intset::IntSet;
use crate::uid::{MethodUid, ModuleId};

/// How a method takes part in communication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommunicationKind {
    /// No frame of its own; accesses belong to the caller
    Inline,
    /// Gets a frame but may not communicate
    NonComm,
    Comm,
}

/// Direction of a communicating method's edges, fixed at compilation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommunicationRole {
    Isolated,
    Reader,
    Writer,
    ReaderWriter,
}

impl CommunicationRole {
    pub fn from_edges(writes: bool, reads: bool) -> Self {
        match (writes, reads) {
            (false, false) => Self::Isolated,
            (false, true) => Self::Reader,
            (true, false) => Self::Writer,
            (true, true) => Self::ReaderWriter,
        }
    }
}

/// A loaded module: either compiled from a description or the null module
/// standing in for a missing specification.
///
/// Queries taking UIDs answer `false` for methods of other modules.
pub trait ModuleSpec: fmt::Debug + fmt::Display + Send + Sync {
    fn name(&self) -> &str;

    /// Runtime id, `None` until the registry assigns one
    fn id(&self) -> Option<ModuleId>;

    /// Set the runtime id. Only the first assignment succeeds.
    fn assign_id(&self, id: ModuleId) -> SpecResult<()>;

    fn method_uid(&self, signature: &str) -> SpecResult<MethodUid>;

    fn method_signature(&self, uid: MethodUid) -> Option<String>;

    /// Edge query on the communication graph
    fn is_allowed(&self, writer: MethodUid, reader: MethodUid) -> bool;

    /// True iff every method id in `readers` is an out-edge of `writer`
    fn all_allowed(&self, writer: MethodUid, readers: &IntSet) -> bool;

    /// Edge query on the interface graph
    fn is_public(&self, writer: MethodUid, reader: MethodUid) -> bool;

    fn communication_kind(&self, uid: MethodUid) -> CommunicationKind;

    fn communication_role(&self, uid: MethodUid) -> Option<CommunicationRole>;

    fn num_methods(&self) -> usize;
    fn num_comm_methods(&self) -> usize;
    fn num_comm_edges(&self) -> usize;
    fn num_interface_edges(&self) -> usize;

    fn is_null(&self) -> bool {
        false
    }

    fn owns(&self, uid: MethodUid) -> bool {
        self.id() == Some(uid.module_id())
    }
}
