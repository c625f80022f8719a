//! Per-(division, note) bookkeeping of who is driving each note.

use crate::division::{Division, DivisionMask, SOUND_DIVISION_COUNT};
use wmidi::{Note, U7, Velocity};

/// Lowest note of the playable window shared by all divisions.
pub const LOWEST_PLAYABLE: Note = Note::C2;

/// Number of contiguous semitones in the playable window.
pub const PLAYABLE_NOTE_COUNT: usize = 36;

/// Iterates the notes of the playable window in ascending order.
pub fn playable_notes() -> impl Iterator<Item = Note> {
    (0..PLAYABLE_NOTE_COUNT as u8).map(|i| Note::from(U7::from_u8_lossy(LOWEST_PLAYABLE as u8 + i)))
}

/// Index of a note within the playable window, or `None` for notes the console cannot
/// sound. Out-of-window input is hardware noise and gets ignored upstream of every
/// table access.
pub(crate) fn note_index(note: Note) -> Option<usize> {
    (note as u8 as usize)
        .checked_sub(LOWEST_PLAYABLE as u8 as usize)
        .filter(|&index| index < PLAYABLE_NOTE_COUNT)
}

/// Who is driving a single note on a single division.
///
/// The note must be audibly on iff `pressed || !sources.is_none()`. The engine emits
/// exactly one Note-On when that disjunction turns true and exactly one Note-Off when it
/// turns false, however many contributors overlap in between.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoteSlot {
    /// Set while the division's own key is depressed (and the division was enabled when
    /// the press arrived).
    pub pressed: bool,
    /// The divisions currently coupling this note in.
    pub sources: DivisionMask,
    /// Velocity of the most recent direct press; forwarded when a live coupler change
    /// re-acquires the note on a target.
    pub velocity: Velocity,
}

impl Default for NoteSlot {
    fn default() -> Self {
        Self {
            pressed: false,
            sources: DivisionMask::none(),
            velocity: U7::from_u8_lossy(0),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for NoteSlot {
    fn format(&self, fmt: defmt::Formatter) {
        let mut sources = 0u8;
        for (bit, division) in crate::division::SOUND_DIVISIONS.iter().enumerate() {
            if self.sources.contains(division.mask()) {
                sources |= 1 << bit;
            }
        }
        defmt::write!(
            fmt,
            "NoteSlot {{ pressed: {}, sources: {=u8:b}, velocity: {} }}",
            self.pressed,
            sources,
            u8::from(self.velocity)
        );
    }
}

impl NoteSlot {
    /// True while anyone, key or coupler, is driving the note.
    pub fn is_active(&self) -> bool {
        self.pressed || !self.sources.is_none()
    }
}

/// The full (sound division × playable note) status table.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct NoteTable {
    slots: [[NoteSlot; PLAYABLE_NOTE_COUNT]; SOUND_DIVISION_COUNT],
}

// Arrays this wide have no derivable Default.
impl Default for NoteTable {
    fn default() -> Self {
        Self {
            slots: [[NoteSlot::default(); PLAYABLE_NOTE_COUNT]; SOUND_DIVISION_COUNT],
        }
    }
}

impl NoteTable {
    /// Slot for a division/note pair; `None` for pseudo-divisions and out-of-window
    /// notes.
    pub(crate) fn slot(&self, division: Division, note: Note) -> Option<&NoteSlot> {
        Some(&self.slots[division.sound_index()?][note_index(note)?])
    }

    pub(crate) fn slot_mut(&mut self, division: Division, note: Note) -> Option<&mut NoteSlot> {
        Some(&mut self.slots[division.sound_index()?][note_index(note)?])
    }

    /// Forgets every contributor to every note of the division, sharing rules
    /// notwithstanding.
    pub(crate) fn clear(&mut self, division: Division) {
        if let Some(d) = division.sound_index() {
            self.slots[d] = [NoteSlot::default(); PLAYABLE_NOTE_COUNT];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::division::SOUND_DIVISIONS;

    #[test]
    fn default_table_is_fully_inactive() {
        let table = NoteTable::default();
        for division in SOUND_DIVISIONS {
            for note in playable_notes() {
                assert!(!table.slot(division, note).unwrap().is_active());
            }
        }
    }

    #[test]
    fn window_indexing() {
        assert_eq!(Some(0), note_index(Note::C2));
        assert_eq!(Some(4), note_index(Note::E2));
        assert_eq!(Some(PLAYABLE_NOTE_COUNT - 1), note_index(Note::B4));
        assert_eq!(None, note_index(Note::B1));
        assert_eq!(None, note_index(Note::C5));
    }

    #[test]
    fn playable_notes_cover_the_window() {
        let mut notes = playable_notes();
        assert_eq!(Some(Note::C2), notes.next());
        assert_eq!(Some(Note::B4), notes.last());
        assert_eq!(PLAYABLE_NOTE_COUNT, playable_notes().count());
    }

    #[test]
    fn activity_is_the_or_of_contributors() {
        let mut slot = NoteSlot::default();
        assert!(!slot.is_active());
        slot.pressed = true;
        assert!(slot.is_active());
        slot.sources |= DivisionMask::Choir;
        slot.pressed = false;
        assert!(slot.is_active());
        slot.sources &= !DivisionMask::Choir;
        assert!(!slot.is_active());
    }

    #[test]
    fn clear_is_per_division() {
        let mut table = NoteTable::default();
        table.slot_mut(Division::Pedal, Note::E2).unwrap().pressed = true;
        table.slot_mut(Division::Choir, Note::E2).unwrap().pressed = true;
        table.clear(Division::Pedal);
        assert!(!table.slot(Division::Pedal, Note::E2).unwrap().is_active());
        assert!(table.slot(Division::Choir, Note::E2).unwrap().is_active());
    }
}
