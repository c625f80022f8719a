//! Coupler relationship state: how each division drives the others, and the
//! console-wide strategy for realizing the coupling.

use crate::division::{Division, SOUND_DIVISION_COUNT};
use crate::engine::{LOWEST_PLAYABLE, PLAYABLE_NOTE_COUNT};
use num_derive::{FromPrimitive, ToPrimitive};
use wmidi::{Note, U7};

/// How (or whether) a source division drives a target division.
///
/// On the matrix diagonal this is the division's own transpose setting, which behaves
/// exactly like coupling the division into itself an octave away (organists know these
/// as 4′ and 16′ couplers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromPrimitive, ToPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CouplerState {
    /// Not coupled.
    #[default]
    Off = 0,
    /// Coupled at unison pitch.
    Couple = 1,
    /// Coupled one octave up.
    OctaveUp = 2,
    /// Coupled one octave down.
    OctaveDown = 3,
}

impl CouplerState {
    /// Semitone offset this state applies to a coupled note.
    fn offset(self) -> i16 {
        match self {
            CouplerState::Off | CouplerState::Couple => 0,
            CouplerState::OctaveUp => 12,
            CouplerState::OctaveDown => -12,
        }
    }

    /// Pitch at which a source note sounds on the target, or `None` when the result
    /// falls outside the playable window.
    pub fn transposed(self, note: Note) -> Option<Note> {
        let lowest = LOWEST_PLAYABLE as u8 as i16;
        let index = note as u8 as i16 + self.offset();
        if index < lowest || index >= lowest + PLAYABLE_NOTE_COUNT as i16 {
            return None;
        }
        Some(Note::from(U7::from_u8_lossy(index as u8)))
    }

    /// Next setting a transpose piston selects: Off, octave up, octave down, and back.
    ///
    /// `Couple` never belongs on a division's own transpose cell; cycling normalizes it
    /// back to Off.
    pub fn cycle_transpose(self) -> Self {
        match self {
            CouplerState::Off => CouplerState::OctaveUp,
            CouplerState::OctaveUp => CouplerState::OctaveDown,
            CouplerState::OctaveDown | CouplerState::Couple => CouplerState::Off,
        }
    }
}

/// Console-wide strategy for realizing couplers, selected over the panel protocol.
///
/// The wire encoding is the variant index; see
/// [`CouplingEngine::set_mode_from_panel`][crate::engine::CouplingEngine::set_mode_from_panel].
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CouplerMode {
    /// Couplers do nothing; every event is forwarded untouched.
    Disabled = 0,
    /// External relay hardware performs the coupling; the engine only mirrors the
    /// matrix to it as MIDI configuration commands.
    HardwareMidi = 1,
    /// The engine synthesizes coupled notes itself. This is the power-on state.
    SoftwareEnabled = 2,
}

/// The per-(source, target) coupler cells plus the per-division enable and crescendo
/// flags.
///
/// Plain storage with queries; the note-safe mutators live on
/// [`CouplingEngine`][crate::engine::CouplingEngine], which re-synchronizes live notes
/// around every cell change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CouplerMatrix {
    cells: [[CouplerState; SOUND_DIVISION_COUNT]; SOUND_DIVISION_COUNT],
    enabled: [bool; SOUND_DIVISION_COUNT],
    crescendo: [bool; SOUND_DIVISION_COUNT],
}

impl Default for CouplerMatrix {
    /// Power-on state: every coupler off, every division enabled, crescendo off.
    fn default() -> Self {
        Self {
            cells: [[CouplerState::Off; SOUND_DIVISION_COUNT]; SOUND_DIVISION_COUNT],
            enabled: [true; SOUND_DIVISION_COUNT],
            crescendo: [false; SOUND_DIVISION_COUNT],
        }
    }
}

impl CouplerMatrix {
    /// State of the (source, target) cell; `Off` for pseudo-divisions.
    pub fn coupled(&self, source: Division, target: Division) -> CouplerState {
        match (source.sound_index(), target.sound_index()) {
            (Some(s), Some(t)) => self.cells[s][t],
            _ => CouplerState::Off,
        }
    }

    pub(crate) fn set(&mut self, source: Division, target: Division, state: CouplerState) {
        if let (Some(s), Some(t)) = (source.sound_index(), target.sound_index()) {
            self.cells[s][t] = state;
        }
    }

    /// Whether the division responds to its own key presses; false for
    /// pseudo-divisions.
    pub fn enabled(&self, division: Division) -> bool {
        division.sound_index().is_some_and(|d| self.enabled[d])
    }

    pub(crate) fn set_enabled(&mut self, division: Division, enabled: bool) {
        if let Some(d) = division.sound_index() {
            self.enabled[d] = enabled;
        }
    }

    /// Whether the division follows the crescendo pedal.
    pub fn crescendo(&self, division: Division) -> bool {
        division.sound_index().is_some_and(|d| self.crescendo[d])
    }

    pub(crate) fn set_crescendo(&mut self, division: Division, on: bool) {
        if let Some(d) = division.sound_index() {
            self.crescendo[d] = on;
        }
    }
}
