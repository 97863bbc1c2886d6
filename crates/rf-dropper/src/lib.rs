//! # Factory Dropper
//!
//! Tick-driven automaton for a multi-slot storage device that ejects items
//! from a rotating set of input slots.
//!
//! ## Architecture
//!
//! - **Slots**: 12 input slots (round-robin ejection candidates) and 3 filter slots
//! - **Filters**: Tri-state match of each filter slot against the input region
//! - **Logic**: External signal edge/level semantics combined with filter gates
//! - **Ejection**: Batch selection, 3D ejection vector, adjacent hand-off
//! - **Timers**: Shutter, drop cooldown and the coarse evaluation divider
//! - **Bridge**: Indexed field bus and command messages for a remote viewer
//!
//! ## Threading
//!
//! All evaluation happens synchronously inside [`DropperEngine::tick`].
//! Commands from a viewer arrive through a lock-free queue (rtrb) and are
//! drained at the start of the next tick, so a command is never observed
//! half-applied.

pub mod bridge;
pub mod config;
pub mod ejection;
pub mod engine;
pub mod filter;
pub mod host;
pub mod logic;
pub mod slots;
pub mod snapshot;
pub mod timers;

pub use bridge::*;
pub use config::*;
pub use ejection::*;
pub use engine::*;
pub use filter::*;
pub use host::*;
pub use logic::*;
pub use slots::*;
pub use snapshot::*;
pub use timers::*;

use thiserror::Error;

/// Dropper error types
///
/// Only the persistence and configuration boundary can fail. Tick evaluation,
/// field-bus access and command handling clamp or ignore bad input instead.
#[derive(Debug, Error)]
pub enum DropperError {
    #[error("Unsupported snapshot version: {0}")]
    UnsupportedVersion(String),

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type DropperResult<T> = Result<T, DropperError>;

/// Total number of item slots
pub const NUM_SLOTS: usize = 15;

/// First input slot
pub const INPUT_SLOTS_FIRST: usize = 0;

/// Number of input slots
pub const INPUT_SLOTS_SIZE: usize = 12;

/// First filter slot
pub const FILTER_SLOTS_FIRST: usize = INPUT_SLOTS_SIZE;

/// Number of filter slots
pub const FILTER_SLOTS_SIZE: usize = 3;

/// Number of field bus entries
pub const NUM_FIELDS: usize = 16;

/// Coarse evaluation period (ticks)
pub const TICK_INTERVAL: u32 = 32;

/// Shutter open time after a trigger (ticks)
pub const SHUTTER_CLOSE_DELAY: u32 = 40;

/// Shutter cap when no input slot can satisfy the batch count (ticks)
pub const SHUTTER_RESIDUAL_DELAY: u32 = 10;

/// Coarse divider cap after a trigger, for quick re-evaluation (ticks)
pub const RETRIGGER_INTERVAL: u32 = 10;

/// Maximum ejection batch count
pub const MAX_DROP_COUNT: u32 = 32;

/// Fixed part of the drop cooldown (ticks)
pub const DROP_PERIOD_OFFSET: u32 = 10;

/// Upper bound for timer values written through the field bus
pub const MAX_TIMER_FIELD: i32 = 400;
