//! Ejection Planner
//!
//! Chooses what leaves the device and how it flies:
//! - Round-robin selection over the input region (no filter matched)
//! - Filter-directed withdrawal (one batch per matched filter slot)
//! - Ejection vector from speed, X/Y deviation and noise

use crate::filter::FilterMatch;
use crate::logic::DropLogic;
use crate::slots::{ItemStack, SlotStore};
use crate::{FILTER_SLOTS_SIZE, INPUT_SLOTS_SIZE, MAX_DROP_COUNT};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul};

/// Minimum effective ejection speed (percent)
pub const MIN_SPEED_PERCENT: i32 = 5;

/// Spawn distance from the device centre when facing down
const SPAWN_OFFSET_DOWN: f64 = 0.8;

/// Spawn distance from the device centre for all other facings
const SPAWN_OFFSET: f64 = 0.7;

/// Simple 3D vector
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3::new(0.0, 0.0, 0.0);

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    #[inline]
    pub fn length(self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Unit vector in the same direction (zero stays zero)
    pub fn normalize(self) -> Self {
        let len = self.length();
        if len < 1e-4 {
            return Self::ZERO;
        }
        self * (1.0 / len)
    }
}

impl Add for Vec3 {
    type Output = Vec3;

    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Mul<f64> for Vec3 {
    type Output = Vec3;

    fn mul(self, rhs: f64) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// Device facing (ejection side)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Facing {
    #[default]
    Down,
    Up,
    North,
    South,
    West,
    East,
}

/// World axes that the X and Y deviation map onto, per facing.
///
/// Indexed by [`Facing::index`]: `[x_axis, y_axis]`.
const DEVIATION_AXES: [[Vec3; 2]; 6] = [
    // Down
    [Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 0.0, -1.0)],
    // Up
    [Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 0.0, 1.0)],
    // North
    [Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 1.0, 0.0)],
    // South
    [Vec3::new(-1.0, 0.0, 0.0), Vec3::new(0.0, 1.0, 0.0)],
    // West
    [Vec3::new(0.0, 0.0, -1.0), Vec3::new(0.0, 1.0, 0.0)],
    // East
    [Vec3::new(0.0, 0.0, 1.0), Vec3::new(0.0, 1.0, 0.0)],
];

impl Facing {
    pub const ALL: [Facing; 6] = [
        Facing::Down,
        Facing::Up,
        Facing::North,
        Facing::South,
        Facing::West,
        Facing::East,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Unit step along the facing
    pub fn step(self) -> Vec3 {
        match self {
            Facing::Down => Vec3::new(0.0, -1.0, 0.0),
            Facing::Up => Vec3::new(0.0, 1.0, 0.0),
            Facing::North => Vec3::new(0.0, 0.0, -1.0),
            Facing::South => Vec3::new(0.0, 0.0, 1.0),
            Facing::West => Vec3::new(-1.0, 0.0, 0.0),
            Facing::East => Vec3::new(1.0, 0.0, 0.0),
        }
    }

    /// Map X/Y deviation (fractions of one block) onto world axes
    pub fn deviation(self, dx: f64, dy: f64) -> Vec3 {
        let [x_axis, y_axis] = DEVIATION_AXES[self.index()];
        x_axis * dx + y_axis * dy
    }

    /// Spawn position relative to the device centre
    pub fn spawn_offset(self) -> Vec3 {
        let distance = if self == Facing::Down {
            SPAWN_OFFSET_DOWN
        } else {
            SPAWN_OFFSET
        };
        self.step() * distance
    }
}

/// Operator-configurable drop parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DropSettings {
    /// Ejection speed percent [0, 100]
    pub speed: i32,
    /// Horizontal deviation percent [-100, 100]
    pub xdev: i32,
    /// Vertical deviation percent [-100, 100]
    pub ydev: i32,
    /// Noise percent [0, 100]
    pub noise: i32,
    /// Batch count [1, 32]
    pub count: u32,
    /// Cooldown period percent [0, 100]
    pub period: u32,
    /// Policy flags
    pub logic: DropLogic,
}

impl Default for DropSettings {
    fn default() -> Self {
        Self {
            speed: 10,
            xdev: 0,
            ydev: 0,
            noise: 0,
            count: 1,
            period: 0,
            logic: DropLogic::default(),
        }
    }
}

impl DropSettings {
    pub fn set_speed(&mut self, value: i32) {
        self.speed = value.clamp(0, 100);
    }

    pub fn set_xdev(&mut self, value: i32) {
        self.xdev = value.clamp(-100, 100);
    }

    pub fn set_ydev(&mut self, value: i32) {
        self.ydev = value.clamp(-100, 100);
    }

    pub fn set_noise(&mut self, value: i32) {
        self.noise = value.clamp(0, 100);
    }

    pub fn set_count(&mut self, value: i32) {
        self.count = value.clamp(1, MAX_DROP_COUNT as i32) as u32;
    }

    pub fn set_period(&mut self, value: i32) {
        self.period = value.clamp(0, 100) as u32;
    }

    pub fn set_logic(&mut self, value: i32) {
        self.logic = DropLogic::from_field(value);
    }

    /// Clamp every field into its valid range
    pub fn clamped(mut self) -> Self {
        self.set_speed(self.speed);
        self.set_xdev(self.xdev);
        self.set_ydev(self.ydev);
        self.set_noise(self.noise);
        self.set_count(self.count.min(i32::MAX as u32) as i32);
        self.set_period(self.period.min(i32::MAX as u32) as i32);
        self.logic = DropLogic::from_bits_truncate(self.logic.bits());
        self
    }
}

/// Compute the velocity of an ejected item.
///
/// The result is a unit vector scaled by at least 5% speed.
pub fn ejection_motion<R: Rng + ?Sized>(facing: Facing, settings: &DropSettings, rng: &mut R) -> Vec3 {
    let mut v = facing.step();

    if settings.xdev != 0 || settings.ydev != 0 {
        let dx = 1e-2 * settings.xdev.clamp(-100, 100) as f64;
        let dy = 1e-2 * settings.ydev.clamp(-100, 100) as f64;
        v = v + facing.deviation(dx, dy);
    }

    let noise = settings.noise.clamp(0, 100) as f64;
    let min_speed = 1e-2 * MIN_SPEED_PERCENT as f64;
    let mut speed = 1e-2 * settings.speed.clamp(MIN_SPEED_PERCENT, 100) as f64;

    if noise > 0.0 {
        v = v + Vec3::new(
            (rng.random::<f64>() - 0.5) * 1e-3 * noise,
            (rng.random::<f64>() - 0.5) * 1e-3 * noise,
            (rng.random::<f64>() - 0.5) * 1e-3 * noise,
        );
        speed += (rng.random::<f64>() - 0.5) * 1e-4 * noise;
    }

    let direction = v.normalize();
    let direction = if direction == Vec3::ZERO {
        facing.step()
    } else {
        direction
    };
    direction * speed.max(min_speed)
}

/// A free-flying item handed to the host spawner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EjectedItem {
    pub stack: ItemStack,
    /// Spawn position relative to the device centre
    pub offset: Vec3,
    /// Initial velocity
    pub motion: Vec3,
}

/// Round-robin selection.
///
/// Scans the input region from the cursor for the first stack holding at
/// least `count` items (or a non-stackable item) whose identity does not
/// appear in any filter slot, and splits the batch off. The cursor moves
/// past every inspected slot.
pub fn select_round_robin(store: &mut SlotStore, cursor: &mut usize, count: u32) -> Option<ItemStack> {
    for _ in 0..INPUT_SLOTS_SIZE {
        if *cursor >= INPUT_SLOTS_SIZE {
            *cursor = 0;
        }
        let slot = *cursor;
        *cursor = next_slot(slot);

        let Some(stack) = store.get(slot) else {
            continue;
        };
        if stack.count < count && stack.is_stackable() {
            continue;
        }
        let is_filter_item = store.filters().iter().flatten().any(|f| f.same_item(stack));
        if is_filter_item {
            continue;
        }
        return store.split(slot, count);
    }
    None
}

/// Filter-directed withdrawal.
///
/// For every matched filter slot, remove up to the filter's count of that
/// item from the input region, scanning from the end backwards. Whole
/// stacks go first; the last contributing stack is shrunk. A shortfall
/// shrinks the output batch.
pub fn withdraw_for_filters(
    store: &mut SlotStore,
    states: &[FilterMatch; FILTER_SLOTS_SIZE],
) -> [Option<ItemStack>; FILTER_SLOTS_SIZE] {
    let mut batches: [Option<ItemStack>; FILTER_SLOTS_SIZE] = Default::default();

    for (fi, state) in states.iter().enumerate() {
        if !state.is_matched() {
            continue;
        }
        let Some(filter) = store.filters()[fi].clone() else {
            continue;
        };

        let mut remaining = filter.count;
        for slot in (0..INPUT_SLOTS_SIZE).rev() {
            if remaining == 0 {
                break;
            }
            let matches = store.get(slot).is_some_and(|s| s.same_item(&filter));
            if !matches {
                continue;
            }
            if let Some(taken) = store.split(slot, remaining) {
                remaining -= taken.count;
            }
        }

        let withdrawn = filter.count - remaining;
        if remaining > 0 {
            log::debug!(
                "Filter {} withdrawal short by {} of {}",
                fi,
                remaining,
                filter.item
            );
        }
        batches[fi] = Some(filter.with_count(withdrawn)).filter(|s| s.count > 0);
    }

    batches
}

/// Move the cursor to the next non-empty input slot (wrapping), or to the
/// start of the input region when all input slots are empty.
pub fn advance_cursor(store: &SlotStore, cursor: usize) -> usize {
    let mut slot = cursor % INPUT_SLOTS_SIZE;
    for _ in 0..INPUT_SLOTS_SIZE {
        if store.get(slot).is_some() {
            return slot;
        }
        slot = next_slot(slot);
    }
    0
}

#[inline]
fn next_slot(slot: usize) -> usize {
    if slot + 1 < INPUT_SLOTS_SIZE { slot + 1 } else { 0 }
}
