//! Slot Store
//!
//! Fixed 15-slot item storage:
//! - Slots 0..12: input region (round-robin ejection candidates)
//! - Slots 12..15: filter region (reference items and counts)
//!
//! Any mutation marks the store dirty so the host knows to persist it.

use crate::host::ItemReceiver;
use crate::{FILTER_SLOTS_FIRST, INPUT_SLOTS_FIRST, INPUT_SLOTS_SIZE, NUM_SLOTS};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Item identity as defined by the host
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl From<&str> for ItemId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ItemId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stack of identical items
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    /// Item identity
    pub item: ItemId,
    /// Number of items in the stack
    pub count: u32,
    /// Maximum stack size (1 = non-stackable)
    pub max_stack: u32,
}

impl ItemStack {
    /// Create a new stack
    pub fn new(item: impl Into<ItemId>, count: u32, max_stack: u32) -> Self {
        Self {
            item: item.into(),
            count,
            max_stack: max_stack.max(1),
        }
    }

    /// Create a single non-stackable item
    pub fn single(item: impl Into<ItemId>) -> Self {
        Self::new(item, 1, 1)
    }

    /// Whether more than one item fits in a stack
    #[inline]
    pub fn is_stackable(&self) -> bool {
        self.max_stack > 1
    }

    /// Identity comparison, ignoring count and stack size
    #[inline]
    pub fn same_item(&self, other: &ItemStack) -> bool {
        self.item == other.item
    }

    /// Free room left in this stack
    #[inline]
    pub fn space(&self) -> u32 {
        self.max_stack.saturating_sub(self.count)
    }

    /// Split off up to `n` items into a new stack
    pub fn split(&mut self, n: u32) -> ItemStack {
        let taken = n.min(self.count);
        self.count -= taken;
        self.with_count(taken)
    }

    /// Copy of this stack with a different count
    pub fn with_count(&self, count: u32) -> ItemStack {
        Self {
            item: self.item.clone(),
            count,
            max_stack: self.max_stack,
        }
    }
}

/// Insert a stack into a slot range.
///
/// Tops up stacks of the same identity first, then fills empty slots.
/// Returns whatever did not fit.
pub fn insert_into(slots: &mut [Option<ItemStack>], mut stack: ItemStack) -> Option<ItemStack> {
    if stack.count == 0 {
        return None;
    }

    for existing in slots.iter_mut().flatten() {
        if !existing.same_item(&stack) {
            continue;
        }
        let moved = existing.space().min(stack.count);
        existing.count += moved;
        stack.count -= moved;
        if stack.count == 0 {
            return None;
        }
    }

    for slot in slots.iter_mut() {
        if slot.is_some() {
            continue;
        }
        let placed = stack.split(stack.max_stack.max(1));
        *slot = Some(placed);
        if stack.count == 0 {
            return None;
        }
    }

    Some(stack)
}

/// Check whether a stack would fit completely into a slot range
pub fn fits_into(slots: &[Option<ItemStack>], stack: &ItemStack) -> bool {
    let capacity: u64 = slots
        .iter()
        .map(|slot| match slot {
            Some(existing) if existing.same_item(stack) => existing.space() as u64,
            Some(_) => 0,
            None => stack.max_stack.max(1) as u64,
        })
        .sum();
    capacity >= stack.count as u64
}

/// The device's item storage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlotStore {
    slots: [Option<ItemStack>; NUM_SLOTS],
    #[serde(skip)]
    dirty: bool,
}

impl SlotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the stack at a slot index
    ///
    /// # Panics
    /// Panics if `index >= NUM_SLOTS`.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&ItemStack> {
        self.slots[index].as_ref()
    }

    /// Replace the stack at a slot index (zero-count stacks become empty)
    pub fn set(&mut self, index: usize, stack: Option<ItemStack>) {
        self.slots[index] = stack.filter(|s| s.count > 0);
        self.dirty = true;
    }

    /// Remove and return the stack at a slot index
    pub fn take(&mut self, index: usize) -> Option<ItemStack> {
        let stack = self.slots[index].take();
        if stack.is_some() {
            self.dirty = true;
        }
        stack
    }

    /// Split up to `n` items off the stack at a slot index
    pub fn split(&mut self, index: usize, n: u32) -> Option<ItemStack> {
        let slot = &mut self.slots[index];
        let stack = slot.as_mut()?;
        let taken = stack.split(n);
        if stack.count == 0 {
            *slot = None;
        }
        self.dirty = true;
        Some(taken).filter(|s| s.count > 0)
    }

    /// Input region slots
    #[inline]
    pub fn input(&self) -> &[Option<ItemStack>] {
        &self.slots[INPUT_SLOTS_FIRST..INPUT_SLOTS_FIRST + INPUT_SLOTS_SIZE]
    }

    /// Filter region slots
    #[inline]
    pub fn filters(&self) -> &[Option<ItemStack>] {
        &self.slots[FILTER_SLOTS_FIRST..]
    }

    /// All 15 slots
    #[inline]
    pub fn all(&self) -> &[Option<ItemStack>] {
        &self.slots
    }

    /// Raw access to all slots. Callers mark the store dirty themselves.
    pub(crate) fn slots_mut(&mut self) -> &mut [Option<ItemStack>] {
        &mut self.slots
    }

    /// Raw access to the input region. Callers mark the store dirty themselves.
    pub(crate) fn input_slots_mut(&mut self) -> &mut [Option<ItemStack>] {
        &mut self.slots[INPUT_SLOTS_FIRST..INPUT_SLOTS_FIRST + INPUT_SLOTS_SIZE]
    }

    /// Whether the input region holds nothing
    pub fn is_input_empty(&self) -> bool {
        self.input().iter().all(Option::is_none)
    }

    /// True when no input stack holds at least `threshold` items,
    /// i.e. ejection is structurally impossible.
    pub fn none_meets(&self, threshold: u32) -> bool {
        !self.input().iter().flatten().any(|s| s.count >= threshold)
    }

    /// Put a stack back into the input region
    pub fn insert_input(&mut self, stack: ItemStack) -> Option<ItemStack> {
        let offered = stack.count;
        let rest = insert_into(self.input_slots_mut(), stack);
        if rest.as_ref().map_or(0, |s| s.count) < offered {
            self.dirty = true;
        }
        rest
    }

    /// Clear all slots
    pub fn clear(&mut self) {
        self.slots = Default::default();
        self.dirty = true;
    }

    /// Analog fill level of the input region (0-15)
    pub fn comparator_level(&self) -> u8 {
        if self.is_input_empty() {
            return 0;
        }
        let fill: f32 = self
            .input()
            .iter()
            .flatten()
            .map(|s| s.count as f32 / s.max_stack as f32)
            .sum::<f32>()
            / INPUT_SLOTS_SIZE as f32;
        1 + (fill * 14.0).floor().clamp(0.0, 14.0) as u8
    }

    /// Mark the store as changed
    #[inline]
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Return and reset the dirty flag
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Capability view scoped to the input region
    pub fn input_region(&mut self) -> InputRegion<'_> {
        InputRegion { store: self }
    }
}

/// Item handler exposed to adjacent automation.
///
/// Only the input region is reachable; filter slots are never exported.
pub struct InputRegion<'a> {
    store: &'a mut SlotStore,
}

impl InputRegion<'_> {
    /// Number of exposed slots
    pub fn len(&self) -> usize {
        INPUT_SLOTS_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_input_empty()
    }

    /// Stack in an exposed slot (None if empty or out of range)
    pub fn stack(&self, slot: usize) -> Option<&ItemStack> {
        self.store.input().get(slot).and_then(Option::as_ref)
    }

    /// Extract up to `amount` items from an exposed slot
    pub fn extract(&mut self, slot: usize, amount: u32) -> Option<ItemStack> {
        if slot >= INPUT_SLOTS_SIZE || amount == 0 {
            return None;
        }
        self.store.split(INPUT_SLOTS_FIRST + slot, amount)
    }
}

impl ItemReceiver for InputRegion<'_> {
    fn insert(&mut self, stack: ItemStack) -> Option<ItemStack> {
        self.store.insert_input(stack)
    }
}
