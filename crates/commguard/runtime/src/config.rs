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

//! Monitor configuration

use commguard_spec::MissingSpecPolicy;
use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, MonitorResult};

/// Shadow state granularity for arrays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ArrayGranularity {
    /// One State per index
    #[default]
    Fine,
    /// One State for the whole array
    Coarse,
}

/// What happens when a violation is detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorAction {
    /// Panic on the accessing thread
    Halt,
    /// Return the violation as an error
    #[default]
    Throw,
    /// Log it and continue
    Warn,
    /// Count it and continue
    Ignore,
}

/// How writer and reader call contexts are compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContextPolicy {
    /// Single edge query between the two topmost frames
    #[default]
    TopFrame,
    /// Walk both stacks layer by layer through module interfaces
    Layered,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub array_granularity: ArrayGranularity,
    /// Per-thread array cache slots, power of two
    pub array_cache_size: usize,
    /// Per-thread lock cache slots and reentrancy lookback, power of two
    pub lock_cache_size: usize,
    /// Shadow store segments, power of two
    pub shadow_segments: usize,
    /// Sweep dead shadow entries before growing a segment
    pub shadow_store_sweep: bool,
    pub error_action: ErrorAction,
    /// Check same-thread communication as well
    pub intra_thread: bool,
    /// Check lock handoffs at acquire
    pub lock_tracking: bool,
    pub context_policy: ContextPolicy,
    /// Maintain access and cache counters
    pub profile: bool,
    /// Attach the reader's backtrace to violations
    pub capture_backtraces: bool,
    pub missing_spec: MissingSpecPolicy,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            array_granularity: ArrayGranularity::Fine,
            array_cache_size: 16,
            lock_cache_size: 4,
            shadow_segments: 16,
            shadow_store_sweep: true,
            error_action: ErrorAction::Throw,
            intra_thread: false,
            lock_tracking: true,
            context_policy: ContextPolicy::TopFrame,
            profile: false,
            capture_backtraces: false,
            missing_spec: MissingSpecPolicy::Trust,
        }
    }
}

impl MonitorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(json: &str) -> MonitorResult<Self> {
        let config: MonitorConfig = serde_json::from_str(json).map_err(|e| MonitorError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> MonitorResult<()> {
        let sizes = [
            ("array_cache_size", self.array_cache_size),
            ("lock_cache_size", self.lock_cache_size),
            ("shadow_segments", self.shadow_segments),
        ];
        for (name, value) in sizes {
            if !value.is_power_of_two() {
                return Err(MonitorError::InvalidConfig(format!("{name} must be a power of two, got {value}")));
            }
        }
        if self.shadow_segments > 1 << 16 {
            return Err(MonitorError::InvalidConfig(format!("shadow_segments too large: {}", self.shadow_segments)));
        }
        Ok(())
    }

    pub fn with_array_granularity(mut self, granularity: ArrayGranularity) -> Self {
        self.array_granularity = granularity;
        self
    }

    pub fn with_array_cache_size(mut self, size: usize) -> Self {
        self.array_cache_size = size;
        self
    }

    pub fn with_lock_cache_size(mut self, size: usize) -> Self {
        self.lock_cache_size = size;
        self
    }

    pub fn with_shadow_segments(mut self, segments: usize) -> Self {
        self.shadow_segments = segments;
        self
    }

    pub fn with_shadow_store_sweep(mut self, sweep: bool) -> Self {
        self.shadow_store_sweep = sweep;
        self
    }

    pub fn with_error_action(mut self, action: ErrorAction) -> Self {
        self.error_action = action;
        self
    }

    pub fn with_intra_thread(mut self, intra_thread: bool) -> Self {
        self.intra_thread = intra_thread;
        self
    }

    pub fn with_lock_tracking(mut self, lock_tracking: bool) -> Self {
        self.lock_tracking = lock_tracking;
        self
    }

    pub fn with_context_policy(mut self, policy: ContextPolicy) -> Self {
        self.context_policy = policy;
        self
    }

    pub fn with_profile(mut self, profile: bool) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_capture_backtraces(mut self, capture: bool) -> Self {
        self.capture_backtraces = capture;
        self
    }

    pub fn with_missing_spec(mut self, policy: MissingSpecPolicy) -> Self {
        self.missing_spec = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MonitorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.array_cache_size, 16);
        assert_eq!(config.lock_cache_size, 4);
        assert_eq!(config.error_action, ErrorAction::Throw);
        assert_eq!(config.context_policy, ContextPolicy::TopFrame);
        assert!(config.lock_tracking);
        assert!(!config.intra_thread);
    }

    #[test]
    fn test_sizes_must_be_powers_of_two() {
        let err = MonitorConfig::new().with_array_cache_size(12).validate().unwrap_err();
        assert!(matches!(err, MonitorError::InvalidConfig(ref msg) if msg.contains("array_cache_size")));
        assert!(MonitorConfig::new().with_shadow_segments(0).validate().is_err());
        assert!(MonitorConfig::new().with_lock_cache_size(1).validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = MonitorConfig::from_json_str(
            r#"{ "array_granularity": "coarse", "error_action": "warn", "context_policy": "layered", "missing_spec": "deny" }"#,
        )
        .unwrap();
        assert_eq!(config.array_granularity, ArrayGranularity::Coarse);
        assert_eq!(config.error_action, ErrorAction::Warn);
        assert_eq!(config.context_policy, ContextPolicy::Layered);
        assert_eq!(config.missing_spec, MissingSpecPolicy::Deny);
        assert_eq!(config.shadow_segments, 16);

        assert!(MonitorConfig::from_json_str(r#"{ "shadow_segments": 3 }"#).is_err());
        assert!(MonitorConfig::from_json_str("[]").is_err());
    }
}
