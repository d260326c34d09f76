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

use commguard_spec::SpecError;
use thiserror::Error;

use crate::violation::{Violation, ViolationKind};

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("{0}")]
    Violation(Box<Violation>),

    #[error("Spec error: {0}")]
    Spec(#[from] SpecError),

    #[error("Invalid monitor configuration: {0}")]
    InvalidConfig(String),
}

impl MonitorError {
    pub fn violation(&self) -> Option<&Violation> {
        match self {
            MonitorError::Violation(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_sharing_violation(&self) -> bool {
        self.violation().is_some_and(|v| v.kind == ViolationKind::Sharing)
    }

    pub fn is_synchronization_violation(&self) -> bool {
        self.violation().is_some_and(|v| v.kind == ViolationKind::Synchronization)
    }
}

impl From<Violation> for MonitorError {
    fn from(violation: Violation) -> Self {
        MonitorError::Violation(Box::new(violation))
    }
}

pub type MonitorResult<T> = Result<T, MonitorError>;
