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

//! Stand-in for a module whose specification could not be found

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use crate::error::{SpecError, SpecResult};
use crate::intset::IntSet;
use crate::module_spec::{CommunicationKind, CommunicationRole, ModuleSpec};
use crate::uid::{MAX_METHOD_ID, MethodId, MethodUid, ModuleId};

#[derive(Debug, Default)]
struct NullMethods {
    by_signature: HashMap<String, MethodId>,
    signatures: Vec<String>,
}

/// Every method lookup succeeds and gets an id on first sight. A
/// permissive null module allows all communication; a strict one allows
/// none.
#[derive(Debug)]
pub struct NullModuleSpec {
    name: String,
    id: OnceLock<ModuleId>,
    permissive: bool,
    methods: RwLock<NullMethods>,
}

impl NullModuleSpec {
    pub fn new(name: impl Into<String>, permissive: bool) -> Self {
        Self { name: name.into(), id: OnceLock::new(), permissive, methods: RwLock::new(NullMethods::default()) }
    }

    pub fn is_permissive(&self) -> bool {
        self.permissive
    }

    fn intern(&self, signature: &str) -> SpecResult<MethodId> {
        if let Some(id) = self.methods.read().by_signature.get(signature) {
            return Ok(*id);
        }

        let mut methods = self.methods.write();
        if let Some(id) = methods.by_signature.get(signature) {
            return Ok(*id);
        }
        let id = methods.signatures.len() as MethodId;
        if id > MAX_METHOD_ID {
            return Err(SpecError::MethodIdSpaceExhausted { method_id: id, max: MAX_METHOD_ID });
        }
        methods.signatures.push(signature.to_string());
        methods.by_signature.insert(signature.to_string(), id);
        Ok(id)
    }
}

impl ModuleSpec for NullModuleSpec {
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
        MethodUid::new(module, self.intern(signature)?)
    }

    fn method_signature(&self, uid: MethodUid) -> Option<String> {
        if !self.owns(uid) {
            return None;
        }
        self.methods.read().signatures.get(uid.method_id() as usize).cloned()
    }

    fn is_allowed(&self, _writer: MethodUid, _reader: MethodUid) -> bool {
        self.permissive
    }

    fn all_allowed(&self, _writer: MethodUid, _readers: &IntSet) -> bool {
        self.permissive
    }

    fn is_public(&self, _writer: MethodUid, _reader: MethodUid) -> bool {
        true
    }

    fn communication_kind(&self, _uid: MethodUid) -> CommunicationKind {
        if self.permissive { CommunicationKind::Inline } else { CommunicationKind::NonComm }
    }

    fn communication_role(&self, _uid: MethodUid) -> Option<CommunicationRole> {
        None
    }

    fn num_methods(&self) -> usize {
        self.methods.read().signatures.len()
    }

    fn num_comm_methods(&self) -> usize {
        0
    }

    fn num_comm_edges(&self) -> usize {
        0
    }

    fn num_interface_edges(&self) -> usize {
        0
    }

    fn is_null(&self) -> bool {
        true
    }
}

impl fmt::Display for NullModuleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = if self.permissive { "trusting" } else { "denying" };
        match self.id() {
            Some(id) => write!(f, "Module {} [null module, {}] (ID {})", self.name, mode, id),
            None => write!(f, "Module {} [null module, {}]", self.name, mode),
        }
    }
}
