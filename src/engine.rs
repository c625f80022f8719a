//! The coupling engine: classifies incoming performance events by division, maintains
//! the note-status table, synthesizes coupled notes, and keeps everything consistent
//! across live coupler, channel and mode changes.

mod note_status;
pub use note_status::*;

use crate::{
    coupler::{CouplerMatrix, CouplerMode, CouplerState},
    division::{ChannelMap, Division, PortMap, SOUND_DIVISIONS},
    routing::{Port, Routing},
};
use num_traits::FromPrimitive;
use wmidi::{Channel, ControlFunction, MidiMessage, Note, U7, Velocity};

/// Release velocity stamped on synthesized Note-Offs.
const RELEASE_VELOCITY: Velocity = U7::from_u8_lossy(64);

/// First controller number of the block mirrored to the external coupler relays; the
/// MIDI spec leaves CC 102..=119 undefined, so the relays claim 102..=106 (one per
/// target division).
const HARDWARE_COUPLER_CC_BASE: u8 = 102;

/// The division coupling and note-routing core.
///
/// One engine value owns all console state: the channel/port maps, the coupler matrix,
/// and the note-status table. The caller owns the engine and passes it, together with a
/// [`Routing`] implementation, into each entry point; nothing in here is global, blocks,
/// or reenters.
pub struct CouplingEngine {
    mode: CouplerMode,
    channels: ChannelMap,
    ports: PortMap,
    matrix: CouplerMatrix,
    notes: NoteTable,
}

impl Default for CouplingEngine {
    fn default() -> Self {
        Self::new(ChannelMap::default(), PortMap::default())
    }
}

impl CouplingEngine {
    /// Constructs an engine in its power-on state: every coupler off, every division
    /// enabled, software coupling selected. The channel map usually comes from settings
    /// storage, the port map from the board wiring.
    pub fn new(channels: ChannelMap, ports: PortMap) -> Self {
        Self {
            mode: CouplerMode::SoftwareEnabled,
            channels,
            ports,
            matrix: CouplerMatrix::default(),
            notes: NoteTable::default(),
        }
    }

    /// Routes one performance event through the couplers.
    ///
    /// Events arriving on the external keyboard jack always play the Great: that bus is
    /// shared with unrelated gear, so its channel numbers mean nothing here. Everything
    /// else is classified by channel. Unless software coupling is active and the event
    /// belongs to a sound division, the message passes through verbatim on the port it
    /// arrived on.
    ///
    /// For Note-On/Note-Off the engine updates the source's note slot, drives every
    /// coupled target through the shared-source rule (first contributor turns the note
    /// on, last contributor turns it off), and finally forwards the original event on
    /// the source's own port, in that order.
    pub fn route_input<R: Routing>(&mut self, router: &mut R, port: Port, message: &MidiMessage) {
        let division = if port == Port::External {
            Division::Great
        } else {
            match message_channel(message) {
                Some(channel) => self.channels.division_for(channel),
                None => Division::Unmapped,
            }
        };

        if self.mode != CouplerMode::SoftwareEnabled || !division.is_sound() {
            router.inject_message(port, message);
            return;
        }

        match *message {
            MidiMessage::NoteOn(_, note, velocity) => {
                self.note_on(router, division, note, velocity, message)
            }
            MidiMessage::NoteOff(_, note, _) => self.note_off(router, division, note, message),
            _ => {
                // Controllers stay division-local: each division has its own swell box,
                // so coupling them across would be wrong.
                if self.matrix.enabled(division)
                    && let Some(out) = self.ports.port(division)
                {
                    router.inject_message(out, message);
                }
            }
        }
    }

    fn note_on<R: Routing>(
        &mut self,
        router: &mut R,
        division: Division,
        note: Note,
        velocity: Velocity,
        original: &MidiMessage,
    ) {
        if note_index(note).is_none() {
            trace!("Ignoring note {} outside the playable window", note as u8);
            return;
        }
        if !self.matrix.enabled(division) {
            // A disabled division's presses never mark the note pressed, so they can
            // never start a coupled note; releases still clean up, see note_off.
            return;
        }

        let own_was_active = self
            .notes
            .slot(division, note)
            .is_some_and(NoteSlot::is_active);
        if let Some(slot) = self.notes.slot_mut(division, note) {
            slot.pressed = true;
            slot.velocity = velocity;
        }

        for target in SOUND_DIVISIONS {
            let state = self.matrix.coupled(division, target);
            if state == CouplerState::Off {
                continue;
            }
            if let Some(sounding) = state.transposed(note) {
                self.acquire_coupled_note(router, target, sounding, velocity, division);
            }
        }

        // The original event goes out on the division's own port, but only if this
        // press is the slot's first contributor; a coupler may already be sounding it.
        if !own_was_active && let Some(out) = self.ports.port(division) {
            router.inject_message(out, original);
        }
    }

    fn note_off<R: Routing>(
        &mut self,
        router: &mut R,
        division: Division,
        note: Note,
        original: &MidiMessage,
    ) {
        if note_index(note).is_none() {
            return;
        }

        let was_active = self
            .notes
            .slot(division, note)
            .is_some_and(NoteSlot::is_active);
        if let Some(slot) = self.notes.slot_mut(division, note) {
            // Cleared even while the division is disabled, so held notes release
            // cleanly after a mid-phrase disable.
            slot.pressed = false;
        }

        for target in SOUND_DIVISIONS {
            let state = self.matrix.coupled(division, target);
            if state == CouplerState::Off {
                continue;
            }
            if let Some(sounding) = state.transposed(note) {
                self.clear_coupled_note(router, target, sounding, division);
            }
        }

        let still_active = self
            .notes
            .slot(division, note)
            .is_some_and(NoteSlot::is_active);
        if was_active
            && !still_active
            && let Some(out) = self.ports.port(division)
        {
            router.inject_message(out, original);
        }
    }

    /// Marks `source` as a contributor to (`target`, `note`), emitting a Note-On iff it
    /// is the first one. Re-acquiring an already-held contribution is a no-op.
    fn acquire_coupled_note<R: Routing>(
        &mut self,
        router: &mut R,
        target: Division,
        note: Note,
        velocity: Velocity,
        source: Division,
    ) {
        let Some(channel) = self.channels.channel(target) else {
            return;
        };
        let Some(out) = self.ports.port(target) else {
            return;
        };
        let Some(slot) = self.notes.slot_mut(target, note) else {
            return;
        };
        if slot.sources.contains(source.mask()) {
            return;
        }
        let was_active = slot.is_active();
        slot.sources |= source.mask();
        if !was_active {
            router.inject_message(out, &MidiMessage::NoteOn(channel, note, velocity));
        }
    }

    /// Withdraws `source`'s contribution to (`target`, `note`), emitting a Note-Off iff
    /// it was the last one.
    fn clear_coupled_note<R: Routing>(
        &mut self,
        router: &mut R,
        target: Division,
        note: Note,
        source: Division,
    ) {
        let Some(channel) = self.channels.channel(target) else {
            return;
        };
        let Some(out) = self.ports.port(target) else {
            return;
        };
        let Some(slot) = self.notes.slot_mut(target, note) else {
            return;
        };
        if !slot.sources.contains(source.mask()) {
            return;
        }
        slot.sources &= !source.mask();
        if !slot.is_active() {
            router.inject_message(out, &MidiMessage::NoteOff(channel, note, RELEASE_VELOCITY));
        }
    }

    /// Moves a division to a new MIDI channel.
    ///
    /// The division's notes are all released first so nothing keeps sounding on the old
    /// channel, then the old reverse mapping is cleared and the new pair installed.
    /// Reassigning the channel a division already transmits on is a no-op. Channel
    /// values are validated upstream at the panel/settings layer.
    pub fn set_division_channel<R: Routing>(
        &mut self,
        router: &mut R,
        division: Division,
        channel: Channel,
    ) {
        if self.channels.channel(division) == Some(channel) {
            return;
        }
        if division.is_sound() {
            self.all_division_notes_off(router, division, false);
        }
        self.channels.assign(division, channel);
        info!(
            "Division {} now transmits on channel {}",
            division as u8,
            channel.number()
        );
    }

    /// Silences every note of a division outright, sharing rules notwithstanding, and
    /// tells its tone generator with a single All-Notes-Off (or, with `sound_off`,
    /// All-Sound-Off) control change.
    pub fn all_division_notes_off<R: Routing>(
        &mut self,
        router: &mut R,
        division: Division,
        sound_off: bool,
    ) {
        if !division.is_sound() {
            return;
        }
        self.notes.clear(division);
        let Some(channel) = self.channels.channel(division) else {
            return;
        };
        let Some(out) = self.ports.port(division) else {
            return;
        };
        let function = if sound_off {
            ControlFunction::ALL_SOUND_OFF
        } else {
            ControlFunction::ALL_NOTES_OFF
        };
        router.inject_message(
            out,
            &MidiMessage::ControlChange(channel, function, U7::from_u8_lossy(0)),
        );
    }

    /// Releases every note `division` is currently coupling into any target, leaving
    /// the notes the targets play themselves untouched.
    pub fn all_coupler_notes_off<R: Routing>(&mut self, router: &mut R, division: Division) {
        if !division.is_sound() {
            return;
        }
        for target in SOUND_DIVISIONS {
            for note in playable_notes() {
                self.clear_coupled_note(router, target, note, division);
            }
        }
    }

    /// Releases every synthesized note on the console, whatever division couples it in.
    pub fn all_coupler_notes_off_everywhere<R: Routing>(&mut self, router: &mut R) {
        for division in SOUND_DIVISIONS {
            self.all_coupler_notes_off(router, division);
        }
    }

    /// Changes how `source` drives `target`.
    ///
    /// Any note currently held on the source is re-synchronized on the target: released
    /// at the old transposed pitch, re-acquired at the new one (at the velocity of the
    /// original press). A live coupler change therefore never strands or drops a
    /// sounding note. The cell is committed last.
    pub fn set_coupled<R: Routing>(
        &mut self,
        router: &mut R,
        source: Division,
        target: Division,
        state: CouplerState,
    ) {
        if !source.is_sound() || !target.is_sound() {
            return;
        }
        let old = self.matrix.coupled(source, target);
        if old == state {
            return;
        }

        for note in playable_notes() {
            let (pressed, velocity) = match self.notes.slot(source, note) {
                Some(slot) => (slot.pressed, slot.velocity),
                None => continue,
            };
            if !pressed {
                continue;
            }
            if old != CouplerState::Off
                && let Some(sounding) = old.transposed(note)
            {
                self.clear_coupled_note(router, target, sounding, source);
            }
            if state != CouplerState::Off
                && let Some(sounding) = state.transposed(note)
            {
                self.acquire_coupled_note(router, target, sounding, velocity, source);
            }
        }

        self.matrix.set(source, target, state);
        if self.mode == CouplerMode::HardwareMidi {
            self.send_hardware_coupler(router, source, target);
        }
        info!(
            "Coupler {} -> {} set to {}",
            source as u8, target as u8, state as u8
        );
    }

    /// Sets a division's own transpose cell, with the same live re-synchronization as
    /// [`CouplingEngine::set_coupled`].
    ///
    /// `Couple` is meaningless on the diagonal (it would double every note at unison
    /// pitch) and is normalized to `Off`.
    pub fn set_transposed<R: Routing>(
        &mut self,
        router: &mut R,
        division: Division,
        state: CouplerState,
    ) {
        let state = if state == CouplerState::Couple {
            CouplerState::Off
        } else {
            state
        };
        self.set_coupled(router, division, division, state);
    }

    /// Turns a division on or off.
    ///
    /// Turning off releases every note the division is pressing itself, unless a
    /// coupling source still holds the slot; notes coupled in from other divisions are
    /// left sounding. Turning on has no immediate effect, it only re-enables future
    /// input.
    pub fn set_division_enabled<R: Routing>(
        &mut self,
        router: &mut R,
        division: Division,
        enabled: bool,
    ) {
        if !division.is_sound() || self.matrix.enabled(division) == enabled {
            return;
        }
        self.matrix.set_enabled(division, enabled);
        info!("Division {} enabled: {}", division as u8, enabled);
        if enabled {
            return;
        }

        let Some(channel) = self.channels.channel(division) else {
            return;
        };
        let Some(out) = self.ports.port(division) else {
            return;
        };
        for note in playable_notes() {
            let Some(slot) = self.notes.slot_mut(division, note) else {
                continue;
            };
            if !slot.pressed {
                continue;
            }
            slot.pressed = false;
            if !slot.is_active() {
                router.inject_message(out, &MidiMessage::NoteOff(channel, note, RELEASE_VELOCITY));
            }
        }
    }

    /// Switches the coupler realization strategy.
    ///
    /// Leaving software coupling first releases every synthesized note, so none can
    /// survive the change. Entering hardware mode mirrors the whole matrix to the relay
    /// hardware.
    pub fn set_mode<R: Routing>(&mut self, router: &mut R, mode: CouplerMode) {
        if mode == self.mode {
            return;
        }
        if self.mode == CouplerMode::SoftwareEnabled {
            self.all_coupler_notes_off_everywhere(router);
        }
        self.mode = mode;
        info!("Coupler mode is now {}", mode as u8);
        if mode == CouplerMode::HardwareMidi {
            for source in SOUND_DIVISIONS {
                for target in SOUND_DIVISIONS {
                    self.send_hardware_coupler(router, source, target);
                }
            }
        }
    }

    /// Decodes and applies a coupler-mode byte from the panel protocol. Unknown bytes
    /// are ignored; the panel framing itself is the transport's concern.
    pub fn set_mode_from_panel<R: Routing>(&mut self, router: &mut R, byte: u8) {
        match CouplerMode::from_u8(byte) {
            Some(mode) => self.set_mode(router, mode),
            None => warn!("Ignoring unknown coupler mode byte {}", byte),
        }
    }

    /// Mirrors one matrix cell to the external coupler relays: CC `102 + target index`
    /// on the source division's channel, cell state in the value byte.
    fn send_hardware_coupler<R: Routing>(&self, router: &mut R, source: Division, target: Division) {
        let Some(channel) = self.channels.channel(source) else {
            return;
        };
        let Some(out) = self.ports.port(source) else {
            return;
        };
        let Some(index) = target.sound_index() else {
            return;
        };
        let function = ControlFunction(U7::from_u8_lossy(HARDWARE_COUPLER_CC_BASE + index as u8));
        let value = U7::from_u8_lossy(self.matrix.coupled(source, target) as u8);
        router.inject_message(out, &MidiMessage::ControlChange(channel, function, value));
    }

    /// Returns couplers, flags and note bookkeeping to their power-on defaults without
    /// emitting anything. Used by the panel's factory-reset command; callers wanting a
    /// clean release should silence divisions first.
    pub fn reset(&mut self) {
        self.matrix = CouplerMatrix::default();
        self.notes = NoteTable::default();
    }

    /// Current coupler realization strategy.
    pub fn mode(&self) -> CouplerMode {
        self.mode
    }

    /// State of the (source, target) coupler cell.
    pub fn coupled(&self, source: Division, target: Division) -> CouplerState {
        self.matrix.coupled(source, target)
    }

    /// The division's own transpose setting (its diagonal cell).
    pub fn transposed(&self, division: Division) -> CouplerState {
        self.matrix.coupled(division, division)
    }

    /// Whether the division responds to its own key presses.
    pub fn enabled(&self, division: Division) -> bool {
        self.matrix.enabled(division)
    }

    /// Whether the division follows the crescendo pedal.
    pub fn crescendo(&self, division: Division) -> bool {
        self.matrix.crescendo(division)
    }

    /// Sets the division's crescendo flag. Pure flag, no note traffic.
    pub fn set_crescendo(&mut self, division: Division, on: bool) {
        self.matrix.set_crescendo(division, on);
    }

    /// Channel the division transmits on.
    pub fn channel(&self, division: Division) -> Option<Channel> {
        self.channels.channel(division)
    }

    /// Division claiming the channel, or [`Division::Unmapped`].
    pub fn division_for_channel(&self, channel: Channel) -> Division {
        self.channels.division_for(channel)
    }
}

/// Channel of a channel-voice message; `None` for system messages.
fn message_channel(message: &MidiMessage) -> Option<Channel> {
    match *message {
        MidiMessage::NoteOff(channel, ..)
        | MidiMessage::NoteOn(channel, ..)
        | MidiMessage::PolyphonicKeyPressure(channel, ..)
        | MidiMessage::ControlChange(channel, ..)
        | MidiMessage::ProgramChange(channel, ..)
        | MidiMessage::ChannelPressure(channel, ..)
        | MidiMessage::PitchBendChange(channel, ..) => Some(channel),
        _ => None,
    }
}
