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

//! Spec registry
//!
//! Resolves module names to loaded specifications and hands out runtime
//! module ids. Registered modules live in an append-only `boxcar::Vec` so
//! that id lookups on the checking path never take a lock; the name map is
//! only touched when a module is loaded.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::compiled::CompiledModuleSpec;
use crate::error::{SpecError, SpecResult};
use crate::module::ModuleDescription;
use crate::module_spec::{CommunicationKind, ModuleSpec};
use crate::null_spec::NullModuleSpec;
use crate::uid::{MAX_MODULE_ID, MethodUid, ModuleId};

/// What to do when no specification exists for a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MissingSpecPolicy {
    /// Register a null module that allows all communication
    #[default]
    Trust,
    /// Register a null module that allows none
    Deny,
    /// Report `ModuleNotFound`
    Fail,
}

/// Source of module descriptions, typically backed by the output of an
/// external spec compiler.
pub trait SpecLoader: Send + Sync {
    /// Returns `ModuleNotFound` when no description exists for `name`.
    fn load(&self, name: &str) -> SpecResult<ModuleDescription>;
}

#[derive(Debug, Default)]
pub struct InMemorySpecLoader {
    descriptions: RwLock<HashMap<String, ModuleDescription>>,
}

impl InMemorySpecLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, description: ModuleDescription) {
        self.descriptions.write().insert(description.name.clone(), description);
    }

    pub fn insert_json(&self, json: &str) -> SpecResult<()> {
        self.insert(ModuleDescription::from_json_str(json)?);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.descriptions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptions.read().is_empty()
    }
}

impl FromIterator<ModuleDescription> for InMemorySpecLoader {
    fn from_iter<I: IntoIterator<Item = ModuleDescription>>(iter: I) -> Self {
        let loader = Self::new();
        for description in iter {
            loader.insert(description);
        }
        loader
    }
}

impl SpecLoader for InMemorySpecLoader {
    fn load(&self, name: &str) -> SpecResult<ModuleDescription> {
        self.descriptions.read().get(name).cloned().ok_or_else(|| SpecError::ModuleNotFound(name.to_string()))
    }
}

pub type ModuleRef = Arc<dyn ModuleSpec>;

pub struct SpecRegistry {
    loader: Box<dyn SpecLoader>,
    missing_spec: MissingSpecPolicy,
    /// Index is the module id
    modules: boxcar::Vec<ModuleRef>,
    by_name: Mutex<HashMap<String, ModuleId>>,
}

impl SpecRegistry {
    pub fn new(loader: impl SpecLoader + 'static, missing_spec: MissingSpecPolicy) -> Self {
        Self { loader: Box::new(loader), missing_spec, modules: boxcar::Vec::new(), by_name: Mutex::new(HashMap::new()) }
    }

    /// A registry that only knows modules registered directly
    pub fn empty(missing_spec: MissingSpecPolicy) -> Self {
        Self::new(InMemorySpecLoader::new(), missing_spec)
    }

    pub fn missing_spec_policy(&self) -> MissingSpecPolicy {
        self.missing_spec
    }

    /// Compile and register a description. A module name can only be
    /// registered once.
    pub fn register(&self, description: &ModuleDescription) -> SpecResult<ModuleRef> {
        let spec = CompiledModuleSpec::compile(description)?;
        self.insert(Arc::new(spec))
    }

    /// Register an already-built spec, assigning its runtime id
    pub fn insert(&self, spec: ModuleRef) -> SpecResult<ModuleRef> {
        let mut by_name = self.by_name.lock();
        if let Some(existing) = by_name.get(spec.name()) {
            return Err(SpecError::ModuleIdAlreadyAssigned { module: spec.name().to_string(), existing: *existing });
        }
        self.insert_locked(&mut by_name, spec)
    }

    fn insert_locked(&self, by_name: &mut HashMap<String, ModuleId>, spec: ModuleRef) -> SpecResult<ModuleRef> {
        // Every push happens under the name lock, so the next index is known.
        let id = self.modules.count() as ModuleId;
        if id > MAX_MODULE_ID {
            return Err(SpecError::ModuleIdSpaceExhausted { module_id: id, max: MAX_MODULE_ID });
        }
        spec.assign_id(id)?;
        let index = self.modules.push(Arc::clone(&spec));
        debug_assert_eq!(index as ModuleId, id);
        by_name.insert(spec.name().to_string(), id);

        if spec.is_null() {
            warn!(module = spec.name(), id, "No specification found, using null module");
        } else {
            info!(
                module = spec.name(),
                id,
                methods = spec.num_methods(),
                comm_methods = spec.num_comm_methods(),
                comm_edges = spec.num_comm_edges(),
                "Registered module spec"
            );
        }
        Ok(spec)
    }

    /// Resolve a module by name, loading it on first use. Missing
    /// specifications are handled per the registry's policy.
    #[instrument(skip(self))]
    pub fn module(&self, name: &str) -> SpecResult<ModuleRef> {
        let mut by_name = self.by_name.lock();
        if let Some(id) = by_name.get(name) {
            return self.module_by_id(*id).cloned().ok_or_else(|| SpecError::ModuleNotFound(name.to_string()));
        }

        match self.loader.load(name) {
            Ok(description) => {
                debug!(module = name, "Loaded module description");
                let spec = CompiledModuleSpec::compile(&description)?;
                self.insert_locked(&mut by_name, Arc::new(spec))
            }
            Err(SpecError::ModuleNotFound(_)) => match self.missing_spec {
                MissingSpecPolicy::Fail => Err(SpecError::ModuleNotFound(name.to_string())),
                MissingSpecPolicy::Trust => self.insert_locked(&mut by_name, Arc::new(NullModuleSpec::new(name, true))),
                MissingSpecPolicy::Deny => self.insert_locked(&mut by_name, Arc::new(NullModuleSpec::new(name, false))),
            },
            Err(e) => Err(e),
        }
    }

    /// Lock-free lookup by runtime id
    #[inline]
    pub fn module_by_id(&self, id: ModuleId) -> Option<&ModuleRef> {
        self.modules.get(id as usize)
    }

    #[inline]
    pub fn module_of(&self, uid: MethodUid) -> Option<&ModuleRef> {
        self.module_by_id(uid.module_id())
    }

    /// UID of `signature` in `module`, loading the module if needed
    pub fn method_uid(&self, module: &str, signature: &str) -> SpecResult<MethodUid> {
        self.module(module)?.method_uid(signature)
    }

    pub fn method_signature(&self, uid: MethodUid) -> Option<String> {
        self.module_of(uid)?.method_signature(uid)
    }

    /// Unknown module ids classify as non-communicating.
    pub fn communication_kind(&self, uid: MethodUid) -> CommunicationKind {
        match self.module_of(uid) {
            Some(module) => module.communication_kind(uid),
            None => CommunicationKind::NonComm,
        }
    }

    pub fn len(&self) -> usize {
        self.modules.count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn modules(&self) -> impl Iterator<Item = &ModuleRef> {
        self.modules.iter().map(|(_, module)| module)
    }
}

impl fmt::Debug for SpecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpecRegistry").field("missing_spec", &self.missing_spec).field("modules", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter() -> ModuleDescription {
        ModuleDescription::builder("counter")
            .group("value", &["get()I"], &["inc()V"])
            .comm("inc()V", &[], &[])
            .comm("get()I", &[], &[])
            .build()
            .unwrap()
    }

    #[test]
    fn test_ids_are_dense_and_stable() {
        let registry = SpecRegistry::empty(MissingSpecPolicy::Fail);
        let a = registry.register(&counter()).unwrap();
        let b = registry.register(&ModuleDescription::builder("other").noncomm("x()V").build().unwrap()).unwrap();
        assert_eq!(a.id(), Some(0));
        assert_eq!(b.id(), Some(1));
        assert_eq!(registry.module("counter").unwrap().id(), Some(0));
        assert_eq!(registry.len(), 2);

        let uid = registry.method_uid("counter", "get()I").unwrap();
        assert_eq!(uid.module_id(), 0);
        assert_eq!(registry.method_signature(uid).as_deref(), Some("get()I"));
        assert_eq!(registry.communication_kind(uid), CommunicationKind::Comm);
    }

    #[test]
    fn test_duplicate_registration() {
        let registry = SpecRegistry::empty(MissingSpecPolicy::Fail);
        registry.register(&counter()).unwrap();
        assert_eq!(
            registry.register(&counter()).unwrap_err(),
            SpecError::ModuleIdAlreadyAssigned { module: "counter".to_string(), existing: 0 }
        );
    }

    #[test]
    fn test_loads_on_demand() {
        let loader: InMemorySpecLoader = [counter()].into_iter().collect();
        let registry = SpecRegistry::new(loader, MissingSpecPolicy::Fail);
        assert!(registry.is_empty());
        let module = registry.module("counter").unwrap();
        assert!(!module.is_null());
        assert!(Arc::ptr_eq(&module, &registry.module("counter").unwrap()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_missing_spec_policies() {
        let fail = SpecRegistry::empty(MissingSpecPolicy::Fail);
        assert_eq!(fail.module("lib").unwrap_err(), SpecError::ModuleNotFound("lib".to_string()));
        assert!(fail.is_empty());

        let trust = SpecRegistry::empty(MissingSpecPolicy::Trust);
        let lib = trust.module("lib").unwrap();
        assert!(lib.is_null());
        let w = lib.method_uid("w()V").unwrap();
        let r = lib.method_uid("r()V").unwrap();
        assert!(lib.is_allowed(w, r));
        assert!(Arc::ptr_eq(&lib, &trust.module("lib").unwrap()), "one null module per missing name");

        let deny = SpecRegistry::empty(MissingSpecPolicy::Deny);
        let lib = deny.module("lib").unwrap();
        let w = lib.method_uid("w()V").unwrap();
        assert!(!lib.is_allowed(w, w));
    }

    #[test]
    fn test_unknown_uid() {
        let registry = SpecRegistry::empty(MissingSpecPolicy::Trust);
        let uid = MethodUid::new(9, 0).unwrap();
        assert!(registry.module_of(uid).is_none());
        assert_eq!(registry.method_signature(uid), None);
        assert_eq!(registry.communication_kind(uid), CommunicationKind::NonComm);
    }
}
