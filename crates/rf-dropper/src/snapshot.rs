//! Snapshot Blob
//!
//! Versioned JSON form of everything that survives pickup and reload:
//! slot contents, external signal level, shutter timer, drop settings and
//! the round-robin cursor. Cooldown, coarse divider, manual latch and
//! filter states are runtime-only and not stored.

use crate::ejection::DropSettings;
use crate::slots::ItemStack;
use crate::{DropperError, DropperResult, INPUT_SLOTS_SIZE, MAX_TIMER_FIELD, NUM_SLOTS};
use serde::{Deserialize, Serialize};

/// Snapshot format version
pub const SNAPSHOT_VERSION: &str = "1.0";

/// Persisted device state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropperSnapshot {
    /// Format version
    #[serde(default = "default_version")]
    pub version: String,
    /// All 15 slots (input then filter)
    pub slots: Vec<Option<ItemStack>>,
    /// Cached external signal level
    #[serde(default)]
    pub signal: bool,
    /// Shutter open countdown
    #[serde(default)]
    pub shutter_timer: u32,
    /// Drop configuration
    #[serde(default)]
    pub settings: DropSettings,
    /// Round-robin cursor
    #[serde(default)]
    pub cursor: usize,
}

fn default_version() -> String {
    SNAPSHOT_VERSION.to_string()
}

impl Default for DropperSnapshot {
    fn default() -> Self {
        Self {
            version: default_version(),
            slots: vec![None; NUM_SLOTS],
            signal: false,
            shutter_timer: 0,
            settings: DropSettings::default(),
            cursor: 0,
        }
    }
}

impl DropperSnapshot {
    /// Load from JSON, validating the layout and clamping out-of-range values
    pub fn from_json(json: &str) -> DropperResult<Self> {
        let raw: serde_json::Value = serde_json::from_str(json)?;

        let version = raw["version"].as_str().unwrap_or(SNAPSHOT_VERSION);
        let snapshot: Self = match version {
            SNAPSHOT_VERSION => serde_json::from_value(raw)?,
            other => return Err(DropperError::UnsupportedVersion(other.to_string())),
        };

        snapshot.sanitized()
    }

    /// Save to JSON
    pub fn to_json(&self) -> DropperResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Save to indented JSON
    pub fn to_json_pretty(&self) -> DropperResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn sanitized(mut self) -> DropperResult<Self> {
        if self.slots.len() != NUM_SLOTS {
            return Err(DropperError::InvalidSnapshot(format!(
                "expected {} slots, found {}",
                NUM_SLOTS,
                self.slots.len()
            )));
        }

        self.version = SNAPSHOT_VERSION.to_string();

        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.as_ref().is_some_and(|s| s.count == 0) {
                *slot = None;
            }
            if let Some(stack) = slot.as_mut().filter(|s| s.max_stack == 0) {
                log::warn!("Snapshot slot {} has max stack 0, clamped to 1", index);
                stack.max_stack = 1;
            }
        }

        let clamped = self.settings.clamped();
        if clamped != self.settings {
            log::warn!("Snapshot drop settings out of range, clamped: {:?}", self.settings);
            self.settings = clamped;
        }

        if self.cursor >= INPUT_SLOTS_SIZE {
            log::warn!("Snapshot cursor {} out of range, clamped", self.cursor);
            self.cursor = INPUT_SLOTS_SIZE - 1;
        }

        let max_timer = MAX_TIMER_FIELD as u32;
        if self.shutter_timer > max_timer {
            log::warn!("Snapshot shutter timer {} out of range, clamped", self.shutter_timer);
            self.shutter_timer = max_timer;
        }

        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::DropLogic;

    fn sample() -> DropperSnapshot {
        let mut snapshot = DropperSnapshot::default();
        snapshot.slots[0] = Some(ItemStack::new("cobble", 40, 64));
        snapshot.slots[13] = Some(ItemStack::single("sword"));
        snapshot.signal = true;
        snapshot.shutter_timer = 12;
        snapshot.settings.speed = 70;
        snapshot.settings.xdev = -20;
        snapshot.settings.count = 8;
        snapshot.settings.logic = DropLogic::from_bits_truncate(DropLogic::CONTINUOUS);
        snapshot.cursor = 4;
        snapshot
    }

    #[test]
    fn test_snapshot_json_roundtrip() {
        let snapshot = sample();
        let json = snapshot.to_json().unwrap();
        assert_eq!(DropperSnapshot::from_json(&json).unwrap(), snapshot);

        let pretty = snapshot.to_json_pretty().unwrap();
        assert_eq!(DropperSnapshot::from_json(&pretty).unwrap(), snapshot);
    }

    #[test]
    fn test_unsupported_version() {
        let json = r#"{"version": "9.0", "slots": []}"#;
        assert!(matches!(
            DropperSnapshot::from_json(json),
            Err(DropperError::UnsupportedVersion(v)) if v == "9.0"
        ));
    }

    #[test]
    fn test_wrong_slot_count() {
        let json = r#"{"version": "1.0", "slots": [null, null]}"#;
        assert!(matches!(
            DropperSnapshot::from_json(json),
            Err(DropperError::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            DropperSnapshot::from_json("{"),
            Err(DropperError::JsonError(_))
        ));
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let slots = vec![serde_json::Value::Null; NUM_SLOTS];
        let json = serde_json::json!({ "slots": slots }).to_string();
        let snapshot = DropperSnapshot::from_json(&json).unwrap();
        assert_eq!(snapshot, DropperSnapshot::default());
    }

    #[test]
    fn test_out_of_range_values_clamped() {
        let mut snapshot = sample();
        snapshot.settings.speed = 400;
        snapshot.settings.count = 99;
        snapshot.cursor = 30;
        snapshot.shutter_timer = 5000;
        snapshot.slots[2] = Some(ItemStack::new("air", 0, 64));

        let json = snapshot.to_json().unwrap();
        let loaded = DropperSnapshot::from_json(&json).unwrap();
        assert_eq!(loaded.settings.speed, 100);
        assert_eq!(loaded.settings.count, 32);
        assert_eq!(loaded.cursor, INPUT_SLOTS_SIZE - 1);
        assert_eq!(loaded.shutter_timer, MAX_TIMER_FIELD as u32);
        assert!(loaded.slots[2].is_none());
    }

    #[test]
    fn test_zero_max_stack_clamped() {
        let mut slots = vec![serde_json::Value::Null; NUM_SLOTS];
        slots[0] = serde_json::json!({ "item": "a", "count": 5, "max_stack": 0 });
        let json = serde_json::json!({ "version": "1.0", "slots": slots }).to_string();

        let loaded = DropperSnapshot::from_json(&json).unwrap();
        let stack = loaded.slots[0].as_ref().unwrap();
        assert_eq!(stack.max_stack, 1);
        assert_eq!(stack.count, 5);
    }

    #[test]
    fn test_partial_settings_use_defaults() {
        let slots = vec![serde_json::Value::Null; NUM_SLOTS];
        let json = serde_json::json!({
            "version": "1.0",
            "slots": slots,
            "settings": { "speed": 55, "count": 4 }
        })
        .to_string();

        let loaded = DropperSnapshot::from_json(&json).unwrap();
        assert_eq!(loaded.settings.speed, 55);
        assert_eq!(loaded.settings.count, 4);
        assert_eq!(loaded.settings.noise, DropSettings::default().noise);
        assert_eq!(loaded.settings.logic, DropSettings::default().logic);
    }
}
