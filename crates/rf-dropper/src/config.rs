//! Construction-time configuration
//!
//! Everything here is fixed for the lifetime of one device instance.
//! Operator settings that change at runtime live in [`DropSettings`](crate::DropSettings).

use crate::DropperResult;
use crate::ejection::Facing;
use serde::{Deserialize, Serialize};

/// Dropper configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropperConfig {
    /// Try the adjacent receiver before free-flight ejection
    #[serde(default)]
    pub adjacent_insertion: bool,
    /// Ejection side
    #[serde(default)]
    pub facing: Facing,
    /// Viewer → device command ring buffer size
    #[serde(default = "default_command_queue_capacity")]
    pub command_queue_capacity: usize,
    /// Device → viewer bus snapshot ring buffer size
    #[serde(default = "default_bus_queue_capacity")]
    pub bus_queue_capacity: usize,
    /// Jitter RNG seed (None = seed from the OS)
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

fn default_command_queue_capacity() -> usize {
    256
}
fn default_bus_queue_capacity() -> usize {
    64
}

impl Default for DropperConfig {
    fn default() -> Self {
        Self {
            adjacent_insertion: false,
            facing: Facing::Down,
            command_queue_capacity: 256,
            bus_queue_capacity: 64,
            rng_seed: None,
        }
    }
}

impl DropperConfig {
    /// Load from JSON
    pub fn from_json(json: &str) -> DropperResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Save to JSON
    pub fn to_json(&self) -> DropperResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn with_adjacent_insertion(mut self, enabled: bool) -> Self {
        self.adjacent_insertion = enabled;
        self
    }

    pub fn with_facing(mut self, facing: Facing) -> Self {
        self.facing = facing;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_gives_defaults() {
        let config = DropperConfig::from_json("{}").unwrap();
        assert_eq!(config, DropperConfig::default());
        assert!(!config.adjacent_insertion);
        assert_eq!(config.command_queue_capacity, 256);
    }

    #[test]
    fn test_config_roundtrip() {
        let config = DropperConfig::default()
            .with_adjacent_insertion(true)
            .with_facing(Facing::West)
            .with_seed(42);
        let json = config.to_json().unwrap();
        assert!(json.contains("\"west\""));
        assert_eq!(DropperConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_invalid_json() {
        assert!(DropperConfig::from_json(r#"{"bus_queue_capacity": "many"}"#).is_err());
    }
}
