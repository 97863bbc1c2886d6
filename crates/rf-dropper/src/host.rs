//! Host interfaces
//!
//! The world around the device is reached only through these traits:
//! the neighbor signal query, the adjacent receiver lookup and the
//! free-flight item spawner. Everything else the device reports back
//! as [`DropperEvent`]s.

use crate::ejection::{EjectedItem, Facing};
use crate::slots::{ItemStack, insert_into};
use serde::{Deserialize, Serialize};

/// Insert-or-reject item sink
pub trait ItemReceiver {
    /// Insert a stack. Returns whatever could not be accepted.
    fn insert(&mut self, stack: ItemStack) -> Option<ItemStack>;
}

/// Plain slot list as a receiver (tops up same items, then fills empty slots)
impl ItemReceiver for Vec<Option<ItemStack>> {
    fn insert(&mut self, stack: ItemStack) -> Option<ItemStack> {
        insert_into(self, stack)
    }
}

/// The device's view of the world it lives in
pub trait DropperHost {
    /// Current external signal level at the device
    fn external_signal(&self) -> bool;

    /// Receiver adjacent to the device on the given side, if any
    fn adjacent_receiver(&mut self, facing: Facing) -> Option<&mut dyn ItemReceiver>;

    /// Spawn a free-flying item. Returns the stack back if it could not be placed.
    fn spawn_item(&mut self, item: EjectedItem) -> Result<(), ItemStack>;
}

/// Sound cues emitted by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoundCue {
    ShutterOpen,
    ShutterClose,
    Drop,
}

impl SoundCue {
    /// Playback volume
    pub fn volume(self) -> f32 {
        match self {
            SoundCue::ShutterOpen | SoundCue::ShutterClose => 0.08,
            SoundCue::Drop => 0.1,
        }
    }

    /// Playback pitch
    pub fn pitch(self) -> f32 {
        match self {
            SoundCue::ShutterOpen | SoundCue::ShutterClose => 3.0,
            SoundCue::Drop => 4.0,
        }
    }
}

/// Side effect reported by a tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropperEvent {
    /// Shutter visual state went from closed to open
    ShutterOpened,
    /// Shutter visual state went from open to closed
    ShutterClosed,
    /// Items left the device
    Dropped {
        /// Units handed to the adjacent receiver
        inserted: u32,
        /// Units spawned as free-flying items
        ejected: u32,
    },
    /// Play a sound at the device
    Sound(SoundCue),
}
