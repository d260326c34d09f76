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

//! Module descriptions
//!
//! The uncompiled shape of a module specification: every method carries a
//! tag, communicating methods name the groups they read and write. An
//! external spec compiler hands these over as JSON, tests build them with
//! [`ModuleBuilder`].

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{SpecError, SpecResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    /// Edges land in the module's communication graph
    #[default]
    Communication,
    /// Edges land in the interface graph and are visible to callers
    Interface,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDescription {
    pub name: String,
    #[serde(default)]
    pub kind: GroupKind,
    #[serde(default)]
    pub readers: Vec<String>,
    #[serde(default)]
    pub writers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MethodTag {
    Inline,
    #[serde(rename = "noncomm")]
    NonComm,
    Comm {
        #[serde(default)]
        read_groups: Vec<String>,
        #[serde(default)]
        write_groups: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDescription {
    pub signature: String,
    #[serde(flatten)]
    pub tag: MethodTag,
}

impl MethodDescription {
    pub fn is_comm(&self) -> bool {
        matches!(self.tag, MethodTag::Comm { .. })
    }
}

/// A module as produced by the spec compiler, before id assignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescription {
    pub name: String,
    #[serde(default)]
    pub groups: Vec<GroupDescription>,
    /// Encounter order matters: ids are handed out in this order.
    #[serde(default)]
    pub methods: Vec<MethodDescription>,
}

impl ModuleDescription {
    pub fn builder(name: impl Into<String>) -> ModuleBuilder {
        ModuleBuilder::new(name)
    }

    pub fn from_json_str(json: &str) -> SpecResult<Self> {
        let description: ModuleDescription = serde_json::from_str(json).map_err(|e| SpecError::InvalidDescription(e.to_string()))?;
        description.validate()?;
        Ok(description)
    }

    pub fn to_json_string(&self) -> SpecResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| SpecError::InvalidDescription(e.to_string()))
    }

    pub fn group(&self, name: &str) -> Option<&GroupDescription> {
        self.groups.iter().find(|g| g.name == name)
    }

    pub fn method(&self, signature: &str) -> Option<&MethodDescription> {
        self.methods.iter().find(|m| m.signature == signature)
    }

    /// Check names and references. Compilation relies on this having passed.
    pub fn validate(&self) -> SpecResult<()> {
        if self.name.is_empty() {
            return Err(SpecError::InvalidDescription("module name is empty".to_string()));
        }

        let mut groups = HashSet::new();
        for group in &self.groups {
            if !groups.insert(group.name.as_str()) {
                return Err(SpecError::DuplicateGroup { module: self.name.clone(), group: group.name.clone() });
            }
        }

        let mut methods = HashSet::new();
        for method in &self.methods {
            if !methods.insert(method.signature.as_str()) {
                return Err(SpecError::DuplicateMethod { module: self.name.clone(), signature: method.signature.clone() });
            }
            if let MethodTag::Comm { read_groups, write_groups } = &method.tag {
                for group in read_groups.iter().chain(write_groups) {
                    if !groups.contains(group.as_str()) {
                        return Err(SpecError::UnknownGroup {
                            module: self.name.clone(),
                            group: group.clone(),
                            signature: method.signature.clone(),
                        });
                    }
                }
            }
        }

        for group in &self.groups {
            for member in group.readers.iter().chain(&group.writers) {
                match self.method(member) {
                    None => {
                        return Err(SpecError::MethodNotFound { module: self.name.clone(), signature: member.clone() });
                    }
                    Some(method) if !method.is_comm() => {
                        return Err(SpecError::ReaderNotCommunicating { group: group.name.clone(), signature: member.clone() });
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }
}

/// Builder for [`ModuleDescription`]. The first error is kept and returned
/// from [`ModuleBuilder::build`].
#[derive(Debug)]
pub struct ModuleBuilder {
    description: ModuleDescription,
}

impl ModuleBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self { description: ModuleDescription { name: name.into(), groups: Vec::new(), methods: Vec::new() } }
    }

    /// Declare a communication group with explicit members
    pub fn group(self, name: &str, readers: &[&str], writers: &[&str]) -> Self {
        self.add_group(name, GroupKind::Communication, readers, writers)
    }

    pub fn interface_group(self, name: &str, readers: &[&str], writers: &[&str]) -> Self {
        self.add_group(name, GroupKind::Interface, readers, writers)
    }

    fn add_group(mut self, name: &str, kind: GroupKind, readers: &[&str], writers: &[&str]) -> Self {
        self.description.groups.push(GroupDescription {
            name: name.to_string(),
            kind,
            readers: readers.iter().map(|s| s.to_string()).collect(),
            writers: writers.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    pub fn comm(mut self, signature: &str, read_groups: &[&str], write_groups: &[&str]) -> Self {
        self.description.methods.push(MethodDescription {
            signature: signature.to_string(),
            tag: MethodTag::Comm {
                read_groups: read_groups.iter().map(|s| s.to_string()).collect(),
                write_groups: write_groups.iter().map(|s| s.to_string()).collect(),
            },
        });
        self
    }

    pub fn noncomm(mut self, signature: &str) -> Self {
        self.description.methods.push(MethodDescription { signature: signature.to_string(), tag: MethodTag::NonComm });
        self
    }

    pub fn inline(mut self, signature: &str) -> Self {
        self.description.methods.push(MethodDescription { signature: signature.to_string(), tag: MethodTag::Inline });
        self
    }

    pub fn build(self) -> SpecResult<ModuleDescription> {
        self.description.validate()?;
        Ok(self.description)
    }
}
