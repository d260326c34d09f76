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

//! Communication specifications
//!
//! Module descriptions, their compiled form (method id ranges plus the
//! communication and interface graphs), and the registry that gives each
//! loaded module its runtime id.

pub mod compiled;
pub mod error;
pub mod graph;
pub mod intset;
pub mod module;
pub mod module_spec;
pub mod null_spec;
pub mod registry;
pub mod uid;

pub use compiled::CompiledModuleSpec;
pub use error::{SpecError, SpecResult};
pub use graph::{Edge, Graph};
pub use intset::IntSet;
pub use module::{GroupDescription, GroupKind, MethodDescription, MethodTag, ModuleBuilder, ModuleDescription};
pub use module_spec::{CommunicationKind, CommunicationRole, ModuleSpec};
pub use null_spec::NullModuleSpec;
pub use registry::{InMemorySpecLoader, MissingSpecPolicy, ModuleRef, SpecLoader, SpecRegistry};
pub use uid::{MethodId, MethodUid, ModuleId};
