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

//! Method UIDs
//!
//! A method UID packs the runtime module id and the module-local method id
//! into one integer so that a single value names a method across all loaded
//! modules.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{SpecError, SpecResult};

/// Module-local method id.
pub type MethodId = u32;

/// Runtime module id, assigned by the registry when a module is loaded.
pub type ModuleId = u32;

/// Number of low bits holding the method id
pub const METHOD_BITS: u32 = 16;

/// Largest method id representable in a UID
pub const MAX_METHOD_ID: MethodId = (1 << METHOD_BITS) - 1;

/// Largest module id representable in a UID
pub const MAX_MODULE_ID: ModuleId = (1 << (32 - METHOD_BITS)) - 1;

/// `(module_id << METHOD_BITS) | method_id`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MethodUid(u32);

impl MethodUid {
    /// Compose a UID, rejecting ids outside their bit ranges.
    pub fn new(module_id: ModuleId, method_id: MethodId) -> SpecResult<Self> {
        if method_id > MAX_METHOD_ID {
            return Err(SpecError::MethodIdSpaceExhausted { method_id, max: MAX_METHOD_ID });
        }
        if module_id > MAX_MODULE_ID {
            return Err(SpecError::ModuleIdSpaceExhausted { module_id, max: MAX_MODULE_ID });
        }
        Ok(Self((module_id << METHOD_BITS) | method_id))
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn module_id(self) -> ModuleId {
        self.0 >> METHOD_BITS
    }

    pub const fn method_id(self) -> MethodId {
        self.0 & MAX_METHOD_ID
    }
}

impl fmt::Display for MethodUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module_id(), self.method_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uid_composition() {
        let uid = MethodUid::new(3, 17).unwrap();
        assert_eq!(uid.module_id(), 3);
        assert_eq!(uid.method_id(), 17);
        assert_eq!(uid.raw(), (3 << METHOD_BITS) | 17);
        assert_eq!(MethodUid::from_raw(uid.raw()), uid);
    }

    #[test]
    fn test_uid_limits() {
        assert!(MethodUid::new(MAX_MODULE_ID, MAX_METHOD_ID).is_ok());
        assert_eq!(
            MethodUid::new(0, MAX_METHOD_ID + 1),
            Err(SpecError::MethodIdSpaceExhausted { method_id: MAX_METHOD_ID + 1, max: MAX_METHOD_ID })
        );
        assert!(matches!(MethodUid::new(MAX_MODULE_ID + 1, 0), Err(SpecError::ModuleIdSpaceExhausted { .. })));
    }
}
