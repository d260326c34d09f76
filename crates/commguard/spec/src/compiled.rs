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

//! Compiled module specifications
//!
//! Compilation lays method ids out in three contiguous ranges:
//!
//! ```text
//! [0, first_noncomm)              communicating
//! [first_noncomm, first_inlined)  non-communicating
//! [first_inlined, num_methods)    inlined
//! ```
//!
//! so that classifying a method is two comparisons. Both graphs are sized
//! to the full method count; rows outside the communicating range stay
//! empty. Nothing but the runtime id changes after compilation.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use crate::error::{SpecError, SpecResult};
use crate::graph::Graph;
use crate::intset::IntSet;
use crate::module::{GroupKind, MethodTag, ModuleDescription};
use crate::module_spec::{CommunicationKind, CommunicationRole, ModuleSpec};
use crate::uid::{MAX_METHOD_ID, MethodId, MethodUid, ModuleId};

#[derive(Debug)]
pub struct CompiledModuleSpec {
    name: String,
    id: OnceLock<ModuleId>,
    signature_to_id: HashMap<String, MethodId>,
    id_to_signature: Box<[String]>,
    first_noncomm: MethodId,
    first_inlined: MethodId,
    comm_graph: Graph,
    interface_graph: Graph,
    /// Indexed by method id, communicating range only
    roles: Box<[CommunicationRole]>,
}

impl CompiledModuleSpec {
    pub fn compile(description: &ModuleDescription) -> SpecResult<Self> {
        description.validate()?;

        let total = description.methods.len();
        if total > MAX_METHOD_ID as usize + 1 {
            return Err(SpecError::MethodIdSpaceExhausted { method_id: total as u32 - 1, max: MAX_METHOD_ID });
        }

        // Communicating methods first, in encounter order, then the rest.
        let mut id_to_signature: Vec<String> = Vec::with_capacity(total);
        let mut signature_to_id: HashMap<String, MethodId> = HashMap::with_capacity(total);
        let comm = description.methods.iter().filter(|m| m.is_comm());
        let noncomm = description.methods.iter().filter(|m| m.tag == MethodTag::NonComm);
        let inline = description.methods.iter().filter(|m| m.tag == MethodTag::Inline);

        for method in comm {
            signature_to_id.insert(method.signature.clone(), id_to_signature.len() as MethodId);
            id_to_signature.push(method.signature.clone());
        }
        let first_noncomm = id_to_signature.len() as MethodId;
        for method in noncomm {
            signature_to_id.insert(method.signature.clone(), id_to_signature.len() as MethodId);
            id_to_signature.push(method.signature.clone());
        }
        let first_inlined = id_to_signature.len() as MethodId;
        for method in inline {
            signature_to_id.insert(method.signature.clone(), id_to_signature.len() as MethodId);
            id_to_signature.push(method.signature.clone());
        }

        let mut comm_graph = Graph::new(total);
        let mut interface_graph = Graph::new(total);

        for group in &description.groups {
            let mut readers: Vec<MethodId> = group.readers.iter().map(|sig| signature_to_id[sig]).collect();
            let mut writers: Vec<MethodId> = group.writers.iter().map(|sig| signature_to_id[sig]).collect();
            for method in &description.methods {
                if let MethodTag::Comm { read_groups, write_groups } = &method.tag {
                    let id = signature_to_id[&method.signature];
                    if read_groups.contains(&group.name) {
                        readers.push(id);
                    }
                    if write_groups.contains(&group.name) {
                        writers.push(id);
                    }
                }
            }

            let graph = match group.kind {
                GroupKind::Communication => &mut comm_graph,
                GroupKind::Interface => &mut interface_graph,
            };
            for &writer in &writers {
                for &reader in &readers {
                    graph.add_edge(writer, reader);
                }
            }
        }

        let roles = (0..first_noncomm)
            .map(|id| {
                let writes = comm_graph.out_edges(id).is_some_and(|row| !row.is_empty())
                    || interface_graph.out_edges(id).is_some_and(|row| !row.is_empty());
                let reads = comm_graph.has_in_edges(id) || interface_graph.has_in_edges(id);
                CommunicationRole::from_edges(writes, reads)
            })
            .collect();

        Ok(Self {
            name: description.name.clone(),
            id: OnceLock::new(),
            signature_to_id,
            id_to_signature: id_to_signature.into_boxed_slice(),
            first_noncomm,
            first_inlined,
            comm_graph,
            interface_graph,
            roles,
        })
    }

    pub fn first_noncomm(&self) -> MethodId {
        self.first_noncomm
    }

    pub fn first_inlined(&self) -> MethodId {
        self.first_inlined
    }

    pub fn comm_graph(&self) -> &Graph {
        &self.comm_graph
    }

    pub fn interface_graph(&self) -> &Graph {
        &self.interface_graph
    }

    /// Module-local id lookup, independent of the runtime id
    pub fn method_id(&self, signature: &str) -> Option<MethodId> {
        self.signature_to_id.get(signature).copied()
    }

    pub fn signature(&self, method: MethodId) -> Option<&str> {
        self.id_to_signature.get(method as usize).map(String::as_str)
    }

    pub fn signatures(&self) -> impl Iterator<Item = &str> {
        self.id_to_signature.iter().map(String::as_str)
    }

    /// Classification by method id alone
    #[inline]
    pub fn kind_of(&self, method: MethodId) -> CommunicationKind {
        if method < self.first_noncomm {
            CommunicationKind::Comm
        } else if method >= self.first_inlined && (method as usize) < self.id_to_signature.len() {
            CommunicationKind::Inline
        } else {
            CommunicationKind::NonComm
        }
    }

    fn write_edges(&self, f: &mut fmt::Formatter<'_>, graph: &Graph) -> fmt::Result {
        for edge in graph {
            writeln!(
                f,
                "    {}: {}  -->  {}: {}",
                edge.source, self.id_to_signature[edge.source as usize], edge.sink, self.id_to_signature[edge.sink as usize]
            )?;
        }
        Ok(())
    }
}

impl ModuleSpec for CompiledModuleSpec {
    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> Option<ModuleId> {
        self.id.get().copied()
    }

    fn assign_id(&self, id: ModuleId) -> SpecResult<()> {
        self.id.set(id).map_err(|_| SpecError::ModuleIdAlreadyAssigned { module: self.name.clone(), existing: self.id().unwrap_or(id) })
    }

    fn method_uid(&self, signature: &str) -> SpecResult<MethodUid> {
        let module = self.id().ok_or_else(|| SpecError::ModuleNotFound(self.name.clone()))?;
        let method = self
            .method_id(signature)
            .ok_or_else(|| SpecError::MethodNotFound { module: self.name.clone(), signature: signature.to_string() })?;
        MethodUid::new(module, method)
    }

    fn method_signature(&self, uid: MethodUid) -> Option<String> {
        if !self.owns(uid) {
            return None;
        }
        self.signature(uid.method_id()).map(str::to_string)
    }

    #[inline]
    fn is_allowed(&self, writer: MethodUid, reader: MethodUid) -> bool {
        self.owns(writer) && self.owns(reader) && self.comm_graph.contains_edge(writer.method_id(), reader.method_id())
    }

    fn all_allowed(&self, writer: MethodUid, readers: &IntSet) -> bool {
        if !self.owns(writer) {
            return false;
        }
        match self.comm_graph.out_edges(writer.method_id()) {
            Some(edges) => edges.contains_all(readers),
            None => false,
        }
    }

    fn is_public(&self, writer: MethodUid, reader: MethodUid) -> bool {
        self.owns(writer) && self.owns(reader) && self.interface_graph.contains_edge(writer.method_id(), reader.method_id())
    }

    fn communication_kind(&self, uid: MethodUid) -> CommunicationKind {
        if !self.owns(uid) {
            return CommunicationKind::NonComm;
        }
        self.kind_of(uid.method_id())
    }

    fn communication_role(&self, uid: MethodUid) -> Option<CommunicationRole> {
        if !self.owns(uid) {
            return None;
        }
        self.roles.get(uid.method_id() as usize).copied()
    }

    fn num_methods(&self) -> usize {
        self.id_to_signature.len()
    }

    fn num_comm_methods(&self) -> usize {
        self.first_noncomm as usize
    }

    fn num_comm_edges(&self) -> usize {
        self.comm_graph.num_edges()
    }

    fn num_interface_edges(&self) -> usize {
        self.interface_graph.num_edges()
    }
}

impl fmt::Display for CompiledModuleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id() {
            Some(id) => writeln!(f, "Compiled spec for module {} (ID {})", self.name, id)?,
            None => writeln!(f, "Compiled spec for module {} (unregistered)", self.name)?,
        }
        writeln!(f, "  Methods: {}", self.id_to_signature.len())?;

        let ranges = [
            ("Communicating", 0, self.first_noncomm as usize),
            ("Non-communicating", self.first_noncomm as usize, self.first_inlined as usize),
            ("Inlined", self.first_inlined as usize, self.id_to_signature.len()),
        ];
        for (label, start, end) in ranges {
            writeln!(f, "    {}: {}", label, end - start)?;
            for i in start..end {
                writeln!(f, "      {}: {}", i, self.id_to_signature[i])?;
            }
        }

        writeln!(f, "  Communicating Pairs:")?;
        self.write_edges(f, &self.comm_graph)?;
        writeln!(f, "  Interface Pairs:")?;
        self.write_edges(f, &self.interface_graph)
    }
}
