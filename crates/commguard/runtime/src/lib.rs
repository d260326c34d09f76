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

//! Runtime communication monitor
//!
//! Instrumented code reports method entry and exit, shared-memory reads and
//! writes, and lock operations to a [`RuntimeMonitor`]. Each access is tagged
//! with the context (thread plus call stack) that performed it, and every
//! cross-context read or lock handoff is checked against the communication
//! graphs of the modules involved.

pub mod config;
pub mod error;
pub mod lock;
pub mod monitor;
pub mod policy;
pub mod shadow;
pub mod stack;
pub mod state;
pub mod stats;
pub mod thread;
pub mod violation;

pub use config::{ArrayGranularity, ContextPolicy, ErrorAction, MonitorConfig};
pub use error::{MonitorError, MonitorResult};
pub use lock::LockState;
pub use monitor::RuntimeMonitor;
pub use policy::{CommunicationPolicy, Verdict};
pub use shadow::{DirectMappedCache, ShadowStore};
pub use stack::{Frame, Stack, StackTable};
pub use state::{ArrayShadow, ShadowSlot, State};
pub use stats::{MonitorStats, StatsSnapshot};
pub use thread::ThreadState;
pub use violation::{ContextSnapshot, FrameInfo, Violation, ViolationKind};
