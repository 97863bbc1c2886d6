//! Sync Bridge
//!
//! Connects a remote control surface (viewer) to the device:
//! - Field bus: 16 indexed integers, a pure projection of live state
//! - Keyed field updates: `{"drop_speed": 40, "manual_trigger": 1}`
//! - Actions: `{"action": "quick-move-all", "slot": 3}`
//!
//! ## Transport
//!
//! Commands flow viewer → device through an rtrb ring buffer and are applied
//! at the start of the next tick. Bus snapshots flow device → viewer through
//! a second ring buffer after every tick.

use crate::slots::{ItemStack, fits_into, insert_into};
use crate::{DropperResult, NUM_FIELDS, NUM_SLOTS};
use parking_lot::Mutex;
use rtrb::{Consumer, Producer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

// ═══════════════════════════════════════════════════════════════════════════════
// FIELD BUS
// ═══════════════════════════════════════════════════════════════════════════════

/// Field bus index map. Indices are fixed for compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum BusField {
    Speed = 0,
    XDev = 1,
    YDev = 2,
    Noise = 3,
    Count = 4,
    Logic = 5,
    Period = 6,
    Reserved7 = 7,
    Reserved8 = 8,
    Cooldown = 9,
    Shutter = 10,
    Signal = 11,
    Filter0 = 12,
    Filter1 = 13,
    Filter2 = 14,
    Cursor = 15,
}

impl BusField {
    pub const ALL: [BusField; NUM_FIELDS] = [
        BusField::Speed,
        BusField::XDev,
        BusField::YDev,
        BusField::Noise,
        BusField::Count,
        BusField::Logic,
        BusField::Period,
        BusField::Reserved7,
        BusField::Reserved8,
        BusField::Cooldown,
        BusField::Shutter,
        BusField::Signal,
        BusField::Filter0,
        BusField::Filter1,
        BusField::Filter2,
        BusField::Cursor,
    ];

    /// Look up a field by bus index
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Filter slot number for the filter state fields
    pub fn filter_slot(self) -> Option<usize> {
        match self {
            BusField::Filter0 => Some(0),
            BusField::Filter1 => Some(1),
            BusField::Filter2 => Some(2),
            _ => None,
        }
    }

    #[inline]
    pub fn is_reserved(self) -> bool {
        matches!(self, BusField::Reserved7 | BusField::Reserved8)
    }
}

/// Snapshot of all bus fields, as published to the viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FieldBus(pub [i32; NUM_FIELDS]);

impl FieldBus {
    #[inline]
    pub fn get(&self, field: BusField) -> i32 {
        self.0[field.index()]
    }

    /// Raw read; out-of-range indices read 0
    pub fn value(&self, index: usize) -> i32 {
        self.0.get(index).copied().unwrap_or(0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// KEYED FIELD UPDATES
// ═══════════════════════════════════════════════════════════════════════════════

/// One entry of a keyed field-update message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldUpdate {
    DropSpeed(i32),
    DropXDev(i32),
    DropYDev(i32),
    DropNoise(i32),
    DropCount(i32),
    DropPeriod(i32),
    DropLogic(i32),
    /// Pretend the external signal just rose
    ManualSignalPulse,
    /// Fire once on the next evaluation
    ManualTrigger,
}

/// Message keys, in application order (configuration first, pulses last)
const UPDATE_KEYS: [&str; 9] = [
    "drop_speed",
    "drop_xdev",
    "drop_ydev",
    "drop_noise",
    "drop_count",
    "drop_period",
    "drop_logic",
    "manual_rstrigger",
    "manual_trigger",
];

impl FieldUpdate {
    /// Wire key of this update
    pub fn key(&self) -> &'static str {
        match self {
            FieldUpdate::DropSpeed(_) => UPDATE_KEYS[0],
            FieldUpdate::DropXDev(_) => UPDATE_KEYS[1],
            FieldUpdate::DropYDev(_) => UPDATE_KEYS[2],
            FieldUpdate::DropNoise(_) => UPDATE_KEYS[3],
            FieldUpdate::DropCount(_) => UPDATE_KEYS[4],
            FieldUpdate::DropPeriod(_) => UPDATE_KEYS[5],
            FieldUpdate::DropLogic(_) => UPDATE_KEYS[6],
            FieldUpdate::ManualSignalPulse => UPDATE_KEYS[7],
            FieldUpdate::ManualTrigger => UPDATE_KEYS[8],
        }
    }

    /// Decode one key/value pair. Zero-valued pulses decode to None.
    pub fn from_pair(key: &str, value: i32) -> Option<Self> {
        let update = match key {
            "drop_speed" => FieldUpdate::DropSpeed(value),
            "drop_xdev" => FieldUpdate::DropXDev(value),
            "drop_ydev" => FieldUpdate::DropYDev(value),
            "drop_noise" => FieldUpdate::DropNoise(value),
            "drop_count" => FieldUpdate::DropCount(value),
            "drop_period" => FieldUpdate::DropPeriod(value),
            "drop_logic" => FieldUpdate::DropLogic(value),
            "manual_rstrigger" if value != 0 => FieldUpdate::ManualSignalPulse,
            "manual_trigger" if value != 0 => FieldUpdate::ManualTrigger,
            _ => return None,
        };
        Some(update)
    }
}

/// Decode the known keys of a field-update object, in application order
pub fn parse_field_updates(object: &Map<String, Value>) -> Vec<FieldUpdate> {
    UPDATE_KEYS
        .iter()
        .filter_map(|&key| {
            let value = object.get(key)?.as_i64()?;
            let value = value.clamp(i32::MIN as i64, i32::MAX as i64) as i32;
            FieldUpdate::from_pair(key, value)
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// BULK MOVE
// ═══════════════════════════════════════════════════════════════════════════════

/// Action name for a bulk move
pub const QUICK_MOVE_ALL: &str = "quick-move-all";

/// Direction of a bulk move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveDirection {
    /// Device slots → remote region
    ToRemote,
    /// Remote region → device input region
    FromRemote,
}

/// Move a stack and all stacks of the same item between the device and a
/// paired remote region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkMove {
    /// Source slot (device slot for `ToRemote`, remote slot for `FromRemote`)
    pub slot: usize,
    pub direction: MoveDirection,
    /// Move whatever fits instead of only complete stacks
    pub allow_partial: bool,
}

/// Move every stack matching `source[slot]` from `source` into `target`.
/// Returns true if anything moved.
pub fn move_matching(
    source: &mut [Option<ItemStack>],
    slot: usize,
    target: &mut [Option<ItemStack>],
    allow_partial: bool,
) -> bool {
    let Some(Some(reference)) = source.get(slot).cloned() else {
        return false;
    };

    // Source slot first, then the rest in slot order
    let order = std::iter::once(slot).chain((0..source.len()).filter(|&i| i != slot));

    let mut moved = false;
    for index in order {
        let Some(stack) = source[index].take() else {
            continue;
        };
        if !stack.same_item(&reference) || (!allow_partial && !fits_into(target, &stack)) {
            source[index] = Some(stack);
            continue;
        }

        let before = stack.count;
        let rest = insert_into(target, stack);
        let rest_count = rest.as_ref().map_or(0, |s| s.count);
        moved |= rest_count < before;
        source[index] = rest;
    }
    moved
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMMANDS
// ═══════════════════════════════════════════════════════════════════════════════

/// Commands from the viewer to the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropperCommand {
    /// Apply keyed field updates in order
    SetFields(Vec<FieldUpdate>),
    /// Write a raw bus field (clamped, invalid indices ignored)
    SetBusField { index: usize, value: i32 },
    /// Flip edge-triggered / continuous mode
    ToggleContinuous,
    /// Flip the filter gate between OR and AND
    ToggleFilterGate,
    /// Rotate the external gate AND → OR → IGNORE
    CycleExternGate,
}

/// Decoded inbound viewer message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerMessage {
    /// Keyed field updates (may be empty)
    Fields(Vec<FieldUpdate>),
    /// Bulk move action
    BulkMove(BulkMove),
}

impl ViewerMessage {
    /// Decode a JSON message. Malformed content yields None.
    pub fn parse(message: &Value) -> Option<Self> {
        let object = message.as_object()?;

        let Some(action) = object.get("action") else {
            return Some(ViewerMessage::Fields(parse_field_updates(object)));
        };

        match action.as_str()? {
            QUICK_MOVE_ALL => parse_bulk_move(object).map(ViewerMessage::BulkMove),
            other => {
                log::debug!("Ignoring unknown viewer action: {}", other);
                None
            }
        }
    }

    /// Decode a JSON message from text
    pub fn from_json(json: &str) -> DropperResult<Option<Self>> {
        let value: Value = serde_json::from_str(json)?;
        Ok(Self::parse(&value))
    }

    /// Queueable form of this message (bulk moves need the remote region
    /// and are applied directly)
    pub fn into_command(self) -> Option<DropperCommand> {
        match self {
            ViewerMessage::Fields(updates) => Some(DropperCommand::SetFields(updates)),
            ViewerMessage::BulkMove(_) => None,
        }
    }
}

/// Decode a bulk move action.
///
/// Without `to_remote`, the slot number is read in the combined numbering
/// where the remote region starts right after the device's slots.
fn parse_bulk_move(object: &Map<String, Value>) -> Option<BulkMove> {
    let slot = usize::try_from(object.get("slot")?.as_i64()?).ok()?;
    let allow_partial = object
        .get("allow_partial")
        .and_then(flag_value)
        .unwrap_or(true);

    let (slot, direction) = match object.get("to_remote").and_then(flag_value) {
        Some(true) => (slot, MoveDirection::ToRemote),
        Some(false) => (slot, MoveDirection::FromRemote),
        None if slot < NUM_SLOTS => (slot, MoveDirection::ToRemote),
        None => (slot - NUM_SLOTS, MoveDirection::FromRemote),
    };

    Some(BulkMove {
        slot,
        direction,
        allow_partial,
    })
}

fn flag_value(value: &Value) -> Option<bool> {
    value.as_bool().or_else(|| value.as_i64().map(|v| v != 0))
}

// ═══════════════════════════════════════════════════════════════════════════════
// DROPPER HANDLE (viewer side)
// ═══════════════════════════════════════════════════════════════════════════════

struct HandleShared {
    command_tx: Mutex<Producer<DropperCommand>>,
    bus_rx: Mutex<Consumer<FieldBus>>,
}

/// Thread-safe viewer-side handle
#[derive(Clone)]
pub struct DropperHandle {
    shared: Arc<HandleShared>,
}

impl DropperHandle {
    pub fn new(command_tx: Producer<DropperCommand>, bus_rx: Consumer<FieldBus>) -> Self {
        Self {
            shared: Arc::new(HandleShared {
                command_tx: Mutex::new(command_tx),
                bus_rx: Mutex::new(bus_rx),
            }),
        }
    }

    /// Queue a command. Returns false if the queue is full.
    pub fn send(&self, command: DropperCommand) -> bool {
        let pushed = self.shared.command_tx.lock().push(command).is_ok();
        if !pushed {
            log::warn!("Dropper command queue full, command dropped");
        }
        pushed
    }

    /// Queue a JSON viewer message. Bulk moves and malformed messages are
    /// not queueable and return false.
    pub fn send_message(&self, message: &Value) -> bool {
        match ViewerMessage::parse(message).and_then(ViewerMessage::into_command) {
            Some(command) => self.send(command),
            None => false,
        }
    }

    /// Write a raw bus field
    pub fn set_field(&self, index: usize, value: i32) -> bool {
        self.send(DropperCommand::SetBusField { index, value })
    }

    /// Most recent bus snapshot, draining older ones
    pub fn latest_bus(&self) -> Option<FieldBus> {
        let mut rx = self.shared.bus_rx.lock();
        let mut latest = None;
        while let Ok(bus) = rx.pop() {
            latest = Some(bus);
        }
        latest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtrb::RingBuffer;
    use serde_json::json;

    #[test]
    fn test_bus_index_roundtrip() {
        for (i, field) in BusField::ALL.iter().enumerate() {
            assert_eq!(field.index(), i);
            assert_eq!(BusField::from_index(i), Some(*field));
        }
        assert_eq!(BusField::from_index(NUM_FIELDS), None);
        assert_eq!(BusField::Filter2.filter_slot(), Some(2));
        assert!(BusField::Reserved8.is_reserved());
    }

    #[test]
    fn test_bus_out_of_range_reads_zero() {
        let mut bus = FieldBus::default();
        bus.0[BusField::Cursor.index()] = 7;
        assert_eq!(bus.get(BusField::Cursor), 7);
        assert_eq!(bus.value(15), 7);
        assert_eq!(bus.value(16), 0);
        assert_eq!(bus.value(usize::MAX), 0);
    }

    #[test]
    fn test_parse_field_updates_in_order() {
        let msg = json!({
            "manual_trigger": 1,
            "drop_speed": 40,
            "bogus": 3,
            "drop_noise": "loud",
            "drop_logic": 255,
            "manual_rstrigger": 0,
        });
        let Some(ViewerMessage::Fields(updates)) = ViewerMessage::parse(&msg) else {
            panic!("expected field updates");
        };
        assert_eq!(
            updates,
            vec![
                FieldUpdate::DropSpeed(40),
                FieldUpdate::DropLogic(255),
                FieldUpdate::ManualTrigger,
            ]
        );
        assert_eq!(updates[2].key(), "manual_trigger");
    }

    #[test]
    fn test_parse_bulk_move() {
        let msg = json!({"action": "quick-move-all", "slot": 3});
        assert_eq!(
            ViewerMessage::parse(&msg),
            Some(ViewerMessage::BulkMove(BulkMove {
                slot: 3,
                direction: MoveDirection::ToRemote,
                allow_partial: true,
            }))
        );

        let msg = json!({"action": "quick-move-all", "slot": 20});
        let Some(ViewerMessage::BulkMove(mv)) = ViewerMessage::parse(&msg) else {
            panic!("expected bulk move");
        };
        assert_eq!(mv.slot, 5);
        assert_eq!(mv.direction, MoveDirection::FromRemote);

        let msg = json!({"action": "quick-move-all", "slot": 2, "to_remote": false, "allow_partial": 0});
        let Some(ViewerMessage::BulkMove(mv)) = ViewerMessage::parse(&msg) else {
            panic!("expected bulk move");
        };
        assert_eq!(mv.direction, MoveDirection::FromRemote);
        assert!(!mv.allow_partial);
    }

    #[test]
    fn test_malformed_messages_ignored() {
        assert_eq!(ViewerMessage::parse(&json!([1, 2])), None);
        assert_eq!(ViewerMessage::parse(&json!({"action": "explode"})), None);
        assert_eq!(ViewerMessage::parse(&json!({"action": "quick-move-all"})), None);
        assert_eq!(ViewerMessage::parse(&json!({"action": "quick-move-all", "slot": -1})), None);
        assert!(ViewerMessage::from_json("{not json").is_err());
        assert_eq!(
            ViewerMessage::from_json("{}").unwrap(),
            Some(ViewerMessage::Fields(Vec::new()))
        );
    }

    #[test]
    fn test_move_matching_collects_same_item() {
        let mut source = vec![
            Some(ItemStack::new("a", 10, 64)),
            Some(ItemStack::new("b", 5, 64)),
            Some(ItemStack::new("a", 20, 64)),
        ];
        let mut target = vec![None, Some(ItemStack::new("a", 60, 64))];

        assert!(move_matching(&mut source, 2, &mut target, true));
        assert!(source[0].is_none());
        assert!(source[2].is_none());
        assert_eq!(source[1].as_ref().unwrap().count, 5);
        assert_eq!(target[1].as_ref().unwrap().count, 64);
        assert_eq!(target[0].as_ref().unwrap().count, 26);
    }

    #[test]
    fn test_move_matching_without_partial() {
        let mut source = vec![Some(ItemStack::new("a", 10, 64))];
        let mut target = vec![Some(ItemStack::new("a", 60, 64))];

        assert!(!move_matching(&mut source, 0, &mut target, false));
        assert_eq!(source[0].as_ref().unwrap().count, 10);

        assert!(move_matching(&mut source, 0, &mut target, true));
        assert_eq!(source[0].as_ref().unwrap().count, 6);
        assert_eq!(target[0].as_ref().unwrap().count, 64);
    }

    #[test]
    fn test_move_matching_empty_source() {
        let mut source: Vec<Option<ItemStack>> = vec![None];
        let mut target = vec![None];
        assert!(!move_matching(&mut source, 0, &mut target, true));
        assert!(!move_matching(&mut source, 9, &mut target, true));
    }

    #[test]
    fn test_handle_queues_commands() {
        let (cmd_tx, mut cmd_rx) = RingBuffer::new(2);
        let (mut bus_tx, bus_rx) = RingBuffer::new(4);
        let handle = DropperHandle::new(cmd_tx, bus_rx);

        assert!(handle.send_message(&json!({"drop_count": 4})));
        assert!(!handle.send_message(&json!({"action": "quick-move-all", "slot": 1})));
        assert!(handle.set_field(4, 9));
        assert!(!handle.send(DropperCommand::ToggleContinuous));

        assert_eq!(
            cmd_rx.pop().ok(),
            Some(DropperCommand::SetFields(vec![FieldUpdate::DropCount(4)]))
        );
        assert_eq!(
            cmd_rx.pop().ok(),
            Some(DropperCommand::SetBusField { index: 4, value: 9 })
        );

        assert_eq!(handle.latest_bus(), None);
        let mut first = FieldBus::default();
        first.0[0] = 1;
        let mut second = FieldBus::default();
        second.0[0] = 2;
        bus_tx.push(first).unwrap();
        bus_tx.push(second).unwrap();
        assert_eq!(handle.latest_bus(), Some(second));
    }
}
