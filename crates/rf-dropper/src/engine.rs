//! Dropper Engine
//!
//! Tick-driven device automaton. Owns the slot store, drop settings, timers
//! and edge state, and runs the full evaluation once per coarse period.
//!
//! ## Tick order
//!
//! 1. Drain the viewer command queue
//! 2. Advance timers (cooldown expiry dirties persistence)
//! 3. On a coarse period: filters → trigger → shutter → edge resample → drop
//! 4. Reconcile the shutter visual state
//! 5. Publish the field bus

use crate::bridge::{
    BulkMove, BusField, DropperCommand, DropperHandle, FieldBus, FieldUpdate, MoveDirection,
    ViewerMessage, move_matching,
};
use crate::config::DropperConfig;
use crate::ejection::{
    DropSettings, EjectedItem, Facing, advance_cursor, ejection_motion, select_round_robin,
    withdraw_for_filters,
};
use crate::filter::{FilterEvaluation, FilterMatch, evaluate_filters};
use crate::host::{DropperEvent, DropperHost, SoundCue};
use crate::logic::{SignalEdge, evaluate_trigger};
use crate::slots::{InputRegion, ItemStack, SlotStore};
use crate::snapshot::DropperSnapshot;
use crate::timers::DropperTimers;
use crate::{DropperResult, FILTER_SLOTS_SIZE, INPUT_SLOTS_SIZE, MAX_TIMER_FIELD, NUM_SLOTS};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rtrb::{Consumer, Producer, RingBuffer};
use serde::{Deserialize, Serialize};

/// What happened during one tick
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    /// Side effects, in the order they occurred
    pub events: Vec<DropperEvent>,
    /// A coarse evaluation ran
    pub evaluated: bool,
    /// The combined trigger fired
    pub triggered: bool,
    /// Persistent state changed; the host should save
    pub dirty: bool,
}

impl TickReport {
    /// Items left the device this tick
    pub fn dropped(&self) -> bool {
        self.events
            .iter()
            .any(|e| matches!(e, DropperEvent::Dropped { .. }))
    }

    /// Sound cues emitted this tick
    pub fn sounds(&self) -> impl Iterator<Item = SoundCue> + '_ {
        self.events.iter().filter_map(|e| match e {
            DropperEvent::Sound(cue) => Some(*cue),
            _ => None,
        })
    }
}

/// Factory dropper automaton
pub struct DropperEngine {
    config: DropperConfig,
    store: SlotStore,
    settings: DropSettings,
    /// Round-robin cursor into the input region
    cursor: usize,
    timers: DropperTimers,
    edge: SignalEdge,
    filter_states: [FilterMatch; FILTER_SLOTS_SIZE],
    /// One-shot manual trigger
    manual_latch: bool,
    /// Runtime state changed outside the slot store
    dirty: bool,
    rng: StdRng,
    command_rx: Consumer<DropperCommand>,
    bus_tx: Producer<FieldBus>,
}

impl DropperEngine {
    /// Create the viewer ↔ device ring buffers
    pub fn create_channels(
        config: &DropperConfig,
    ) -> (
        Producer<DropperCommand>,
        Consumer<FieldBus>,
        Consumer<DropperCommand>,
        Producer<FieldBus>,
    ) {
        let (cmd_tx, cmd_rx) = RingBuffer::new(config.command_queue_capacity.max(1));
        let (bus_tx, bus_rx) = RingBuffer::new(config.bus_queue_capacity.max(1));
        (cmd_tx, bus_rx, cmd_rx, bus_tx)
    }

    /// Create an empty device with a connected viewer handle
    pub fn new(config: DropperConfig) -> (Self, DropperHandle) {
        let (cmd_tx, bus_rx, cmd_rx, bus_tx) = Self::create_channels(&config);
        let engine = Self::from_channels(config, cmd_rx, bus_tx);
        (engine, DropperHandle::new(cmd_tx, bus_rx))
    }

    /// Create an empty device on existing channels
    pub fn from_channels(
        config: DropperConfig,
        command_rx: Consumer<DropperCommand>,
        bus_tx: Producer<FieldBus>,
    ) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Self {
            config,
            store: SlotStore::new(),
            settings: DropSettings::default(),
            cursor: 0,
            timers: DropperTimers::new(),
            edge: SignalEdge::default(),
            filter_states: [FilterMatch::Unset; FILTER_SLOTS_SIZE],
            manual_latch: false,
            dirty: false,
            rng,
            command_rx,
            bus_tx,
        }
    }

    /// Place a device from a pickup blob. Contents and settings are
    /// restored, all runtime state starts fresh.
    pub fn from_blob(config: DropperConfig, blob: &str) -> DropperResult<(Self, DropperHandle)> {
        let snapshot = DropperSnapshot::from_json(blob)?;
        let (mut engine, handle) = Self::new(config);
        engine.restore(snapshot);
        engine.reset_runtime();
        engine.timers.set_shutter(0);
        Ok((engine, handle))
    }

    /// Reseed the jitter RNG
    pub fn seed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ACCESSORS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn config(&self) -> &DropperConfig {
        &self.config
    }

    pub fn facing(&self) -> Facing {
        self.config.facing
    }

    pub fn store(&self) -> &SlotStore {
        &self.store
    }

    /// Direct slot access for player interaction
    pub fn store_mut(&mut self) -> &mut SlotStore {
        &mut self.store
    }

    pub fn settings(&self) -> &DropSettings {
        &self.settings
    }

    /// Replace all drop settings (clamped)
    pub fn set_settings(&mut self, settings: DropSettings) {
        self.settings = settings.clamped();
        self.dirty = true;
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn filter_states(&self) -> &[FilterMatch; FILTER_SLOTS_SIZE] {
        &self.filter_states
    }

    pub fn timers(&self) -> &DropperTimers {
        &self.timers
    }

    pub fn signal(&self) -> &SignalEdge {
        &self.edge
    }

    pub fn is_shutter_open(&self) -> bool {
        self.timers.is_shutter_open()
    }

    /// Analog output level for comparators (0-15)
    pub fn comparator_level(&self) -> u8 {
        self.store.comparator_level()
    }

    /// Item handler for adjacent automation (input region only)
    pub fn item_handler(&mut self) -> InputRegion<'_> {
        self.store.input_region()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TICK
    // ═══════════════════════════════════════════════════════════════════════════

    /// Advance by one simulation tick
    pub fn tick<H: DropperHost + ?Sized>(&mut self, host: &mut H) -> TickReport {
        let mut report = TickReport::default();

        // 1. Drain command queue (non-blocking)
        while let Ok(cmd) = self.command_rx.pop() {
            self.apply_command(cmd);
        }

        // 2. Timers
        let timer_tick = self.timers.tick();
        if timer_tick.cooldown_expired {
            self.dirty = true;
        }

        // 3. Coarse evaluation
        if timer_tick.evaluate {
            self.evaluate(host, &mut report);
        }

        // 4. Shutter visual state
        self.sync_shutter(&mut report);

        report.dirty = self.store.take_dirty() | std::mem::take(&mut self.dirty);

        // 5. Publish state (drop silently if the viewer lags)
        let bus = self.bus();
        let _ = self.bus_tx.push(bus);

        report
    }

    /// Neighbor notification from the host's signal network
    pub fn on_neighbor_changed(&mut self, powered: bool) {
        self.edge.notify(powered);
        self.timers.request_evaluation();
    }

    fn evaluate<H: DropperHost + ?Sized>(&mut self, host: &mut H, report: &mut TickReport) {
        let logic = self.settings.logic;

        let filters = evaluate_filters(
            &self.store,
            self.cursor,
            logic.filter_and_gate(),
            &self.filter_states,
        );
        if filters.changed {
            self.dirty = true;
        }
        self.filter_states = filters.states;

        let manual = std::mem::take(&mut self.manual_latch);
        let decision = evaluate_trigger(&self.edge, logic, &filters, manual);

        log::trace!(
            "Dropper evaluation: external={} filter={} fire={} manual={} states={:?}",
            decision.external,
            decision.filter,
            decision.fire,
            decision.manual,
            filters.states
        );

        if self.store.none_meets(self.settings.count) {
            self.timers.cap_shutter();
        } else if decision.any() {
            self.timers.open_shutter();
        }

        // Edge state is recomputed every cycle, fired or not
        if self.edge.resample(host.external_signal()) {
            self.dirty = true;
        }

        self.sync_shutter(report);

        report.evaluated = true;
        report.triggered = decision.fire;

        if decision.fire && self.timers.cooldown_ready() {
            self.drop_items(host, &filters, report);
        }

        if decision.fire {
            self.timers.expedite();
        }
    }

    fn drop_items<H: DropperHost + ?Sized>(
        &mut self,
        host: &mut H,
        filters: &FilterEvaluation,
        report: &mut TickReport,
    ) {
        let batches: Vec<ItemStack> = if filters.trigger {
            withdraw_for_filters(&mut self.store, &filters.states)
                .into_iter()
                .flatten()
                .collect()
        } else {
            select_round_robin(&mut self.store, &mut self.cursor, self.settings.count)
                .into_iter()
                .collect()
        };

        if batches.is_empty() {
            log::debug!("Dropper triggered with nothing eligible to drop");
            self.cursor = advance_cursor(&self.store, self.cursor);
            return;
        }

        let facing = self.config.facing;
        let mut inserted = 0;
        let mut ejected = 0;

        for mut stack in batches {
            if self.config.adjacent_insertion {
                if let Some(receiver) = host.adjacent_receiver(facing) {
                    let offered = stack.count;
                    match receiver.insert(stack) {
                        None => {
                            inserted += offered;
                            continue;
                        }
                        Some(rest) => {
                            inserted += offered - rest.count;
                            stack = rest;
                        }
                    }
                }
            }

            let count = stack.count;
            let item = EjectedItem {
                stack,
                offset: facing.spawn_offset(),
                motion: ejection_motion(facing, &self.settings, &mut self.rng),
            };
            match host.spawn_item(item) {
                Ok(()) => ejected += count,
                Err(refused) => {
                    if let Some(lost) = self.store.insert_input(refused) {
                        log::debug!(
                            "Dropper could not put back {} x {}, item lost",
                            lost.count,
                            lost.item
                        );
                    }
                }
            }
        }

        if inserted + ejected > 0 {
            log::debug!("Dropped: inserted={} ejected={}", inserted, ejected);
            self.timers.start_cooldown(self.settings.period);
            report.events.push(DropperEvent::Dropped { inserted, ejected });
            if !self.settings.logic.silent_drop() {
                report.events.push(DropperEvent::Sound(SoundCue::Drop));
            }
        }

        self.cursor = advance_cursor(&self.store, self.cursor);
    }

    fn sync_shutter(&mut self, report: &mut TickReport) {
        let Some(open) = self.timers.sync_shutter() else {
            return;
        };
        let silent = self.settings.logic.silent_open();
        if open {
            report.events.push(DropperEvent::ShutterOpened);
            if !silent {
                report.events.push(DropperEvent::Sound(SoundCue::ShutterOpen));
            }
        } else {
            report.events.push(DropperEvent::ShutterClosed);
            if !silent {
                report.events.push(DropperEvent::Sound(SoundCue::ShutterClose));
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // COMMANDS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Apply a viewer command immediately
    pub fn apply_command(&mut self, cmd: DropperCommand) {
        log::debug!("Dropper command: {:?}", cmd);

        match cmd {
            DropperCommand::SetFields(updates) => {
                for update in updates {
                    self.apply_update(update);
                }
            }
            DropperCommand::SetBusField { index, value } => {
                self.set_field(index, value);
            }
            DropperCommand::ToggleContinuous => {
                self.settings.logic.toggle_continuous();
            }
            DropperCommand::ToggleFilterGate => {
                self.settings.logic.toggle_filter_gate();
            }
            DropperCommand::CycleExternGate => {
                self.settings.logic.cycle_extern_gate();
            }
        }
        self.dirty = true;
    }

    fn apply_update(&mut self, update: FieldUpdate) {
        match update {
            FieldUpdate::DropSpeed(v) => self.settings.set_speed(v),
            FieldUpdate::DropXDev(v) => self.settings.set_xdev(v),
            FieldUpdate::DropYDev(v) => self.settings.set_ydev(v),
            FieldUpdate::DropNoise(v) => self.settings.set_noise(v),
            FieldUpdate::DropCount(v) => self.settings.set_count(v),
            FieldUpdate::DropPeriod(v) => self.settings.set_period(v),
            FieldUpdate::DropLogic(v) => self.settings.set_logic(v),
            FieldUpdate::ManualSignalPulse => {
                self.edge.pulse();
                self.timers.request_evaluation();
            }
            FieldUpdate::ManualTrigger => {
                self.manual_latch = true;
                self.timers.request_evaluation();
            }
        }
    }

    /// Apply a decoded viewer message. Bulk moves run against the paired
    /// remote region. Returns true if anything changed.
    pub fn apply_message(
        &mut self,
        message: ViewerMessage,
        remote: &mut [Option<ItemStack>],
    ) -> bool {
        match message {
            ViewerMessage::Fields(updates) => {
                if updates.is_empty() {
                    return false;
                }
                self.apply_command(DropperCommand::SetFields(updates));
                true
            }
            ViewerMessage::BulkMove(mv) => self.bulk_move(remote, mv),
        }
    }

    /// Move a stack and all stacks of the same item between the device and
    /// a remote region. Returns true if anything moved.
    pub fn bulk_move(&mut self, remote: &mut [Option<ItemStack>], mv: BulkMove) -> bool {
        let moved = match mv.direction {
            MoveDirection::ToRemote => {
                if mv.slot >= NUM_SLOTS || self.store.get(mv.slot).is_none() {
                    return false;
                }
                move_matching(self.store.slots_mut(), mv.slot, remote, mv.allow_partial)
            }
            MoveDirection::FromRemote => {
                if remote.get(mv.slot).is_none_or(Option::is_none) {
                    return false;
                }
                move_matching(remote, mv.slot, self.store.input_slots_mut(), mv.allow_partial)
            }
        };

        if moved {
            self.store.mark_dirty();
            log::debug!("Bulk move {:?} from slot {}", mv.direction, mv.slot);
        }
        moved
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // FIELD BUS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Read a bus field (invalid indices read 0)
    pub fn field(&self, index: usize) -> i32 {
        let Some(field) = BusField::from_index(index) else {
            return 0;
        };
        match field {
            BusField::Speed => self.settings.speed,
            BusField::XDev => self.settings.xdev,
            BusField::YDev => self.settings.ydev,
            BusField::Noise => self.settings.noise,
            BusField::Count => self.settings.count as i32,
            BusField::Logic => self.settings.logic.bits() as i32,
            BusField::Period => self.settings.period as i32,
            BusField::Reserved7 | BusField::Reserved8 => 0,
            BusField::Cooldown => self.timers.cooldown() as i32,
            BusField::Shutter => self.timers.shutter() as i32,
            BusField::Signal => self.edge.level as i32,
            BusField::Filter0 | BusField::Filter1 | BusField::Filter2 => field
                .filter_slot()
                .map_or(0, |slot| self.filter_states[slot].as_field()),
            BusField::Cursor => self.cursor as i32,
        }
    }

    /// Write a bus field, clamped to its range (invalid indices ignored)
    pub fn set_field(&mut self, index: usize, value: i32) {
        let Some(field) = BusField::from_index(index) else {
            log::debug!("Ignoring write to bus index {}", index);
            return;
        };
        let timer = |v: i32| v.clamp(0, MAX_TIMER_FIELD) as u32;

        match field {
            BusField::Speed => self.settings.set_speed(value),
            BusField::XDev => self.settings.set_xdev(value),
            BusField::YDev => self.settings.set_ydev(value),
            BusField::Noise => self.settings.set_noise(value),
            BusField::Count => self.settings.set_count(value),
            BusField::Logic => self.settings.set_logic(value),
            BusField::Period => self.settings.set_period(value),
            BusField::Reserved7 | BusField::Reserved8 => {}
            BusField::Cooldown => self.timers.set_cooldown(timer(value)),
            BusField::Shutter => self.timers.set_shutter(timer(value)),
            BusField::Signal => self.edge.level = value != 0,
            BusField::Filter0 | BusField::Filter1 | BusField::Filter2 => {
                if let Some(slot) = field.filter_slot() {
                    self.filter_states[slot] = FilterMatch::from_field(value);
                }
            }
            BusField::Cursor => {
                self.cursor = value.clamp(0, INPUT_SLOTS_SIZE as i32 - 1) as usize;
            }
        }
    }

    /// All bus fields
    pub fn bus(&self) -> FieldBus {
        let mut bus = FieldBus::default();
        for field in BusField::ALL {
            bus.0[field.index()] = self.field(field.index());
        }
        bus
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PERSISTENCE
    // ═══════════════════════════════════════════════════════════════════════════

    /// Capture persistent state
    pub fn snapshot(&self) -> DropperSnapshot {
        DropperSnapshot {
            slots: self.store.all().to_vec(),
            signal: self.edge.level,
            shutter_timer: self.timers.shutter(),
            settings: self.settings,
            cursor: self.cursor,
            ..Default::default()
        }
    }

    /// Restore persistent state (world reload). Runtime-only state
    /// (cooldown, latch, filter states) starts fresh.
    pub fn restore(&mut self, snapshot: DropperSnapshot) {
        for (index, stack) in snapshot.slots.into_iter().take(NUM_SLOTS).enumerate() {
            self.store.set(index, stack);
        }
        self.settings = snapshot.settings.clamped();
        self.cursor = snapshot.cursor.min(INPUT_SLOTS_SIZE - 1);
        self.timers.set_shutter(snapshot.shutter_timer);
        self.timers.set_cooldown(0);
        self.edge = SignalEdge {
            level: snapshot.signal,
            updated: false,
        };
        self.manual_latch = false;
        self.filter_states = [FilterMatch::Unset; FILTER_SLOTS_SIZE];
    }

    /// Restore persistent state from a snapshot blob
    pub fn load_blob(&mut self, blob: &str) -> DropperResult<()> {
        let snapshot = DropperSnapshot::from_json(blob)?;
        self.restore(snapshot);
        Ok(())
    }

    /// Pickup: capture the blob, then empty the device
    pub fn take_blob(&mut self) -> DropperResult<String> {
        let blob = self.snapshot().to_json()?;
        self.store.clear();
        self.reset_runtime();
        Ok(blob)
    }

    /// Destruction without pickup: hand out every stack, then empty the device
    pub fn drain_contents(&mut self) -> Vec<ItemStack> {
        let contents: Vec<ItemStack> = self.store.all().iter().flatten().cloned().collect();
        self.store.clear();
        self.reset_runtime();
        contents
    }

    fn reset_runtime(&mut self) {
        self.edge.reset();
        self.manual_latch = false;
        self.filter_states = [FilterMatch::Unset; FILTER_SLOTS_SIZE];
        self.timers.reset_runtime();
    }
}
