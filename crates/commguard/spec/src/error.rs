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

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpecError {
    #[error("Module spec not found: {0}")]
    ModuleNotFound(String),

    #[error("Method {signature} not found in module {module}")]
    MethodNotFound { module: String, signature: String },

    #[error("Method {signature} is declared more than once in module {module}")]
    DuplicateMethod { module: String, signature: String },

    #[error("Group {group} is declared more than once in module {module}")]
    DuplicateGroup { module: String, group: String },

    #[error("Method {signature} references unknown group {group} in module {module}")]
    UnknownGroup { module: String, group: String, signature: String },

    #[error("Reader {signature} of group {group} is not a communicating method")]
    ReaderNotCommunicating { group: String, signature: String },

    #[error("Module {module} already has runtime id {existing}")]
    ModuleIdAlreadyAssigned { module: String, existing: u32 },

    #[error("Method id {method_id} exceeds the method id space (max {max})")]
    MethodIdSpaceExhausted { method_id: u32, max: u32 },

    #[error("Module id {module_id} exceeds the module id space (max {max})")]
    ModuleIdSpaceExhausted { module_id: u32, max: u32 },

    #[error("Invalid module description: {0}")]
    InvalidDescription(String),
}

pub type SpecResult<T> = Result<T, SpecError>;
