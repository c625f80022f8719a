//! Piston interpretation: decoding sub-controller status frames, the per-division
//! command table, and the dispatcher that turns button presses into engine mutations.

mod table;
pub use table::*;

use crate::{
    coupler::CouplerState,
    division::{Division, SOUND_DIVISIONS},
    engine::CouplingEngine,
    routing::{Routing, StepDirection},
};

/// What a piston does when pressed. The command's division says which division the
/// action applies to; which button triggers it is the table's business.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PistonAction {
    /// The piston is not assigned.
    None,
    /// Toggles the coupler from the command's division into the given target between
    /// off and unison; a long press forces the octave-up coupler instead.
    Coupler(Division),
    /// Cycles the division's own transpose; a long press returns it to off.
    Transpose,
    /// Toggles the division on or off; a long press clears every coupler the division
    /// sources.
    DivisionOff,
    /// Recalls the numbered registration slot. Registration memory is a reserved
    /// extension point with no behavior yet.
    Combination(u8),
    /// Clears the current registration; a long press also silences the division.
    ClearCombination,
    /// Toggles whether the division follows the crescendo pedal.
    Crescendo,
    /// Emits a page-turn keystroke toward the sheet-music display.
    PageTurn(StepDirection),
    /// Steps the registration sequencer. Reserved, no behavior yet.
    Sequence(StepDirection),
    /// Captures the current registration. Reserved, no behavior yet.
    SetCombination,
    /// Arms the registration hold. Reserved, no behavior yet.
    HoldCombination,
    /// All-sound-off for the command's division, or for the whole console.
    AllSoundOff {
        /// Silence every sound division rather than just the command's.
        every_division: bool,
    },
}

/// One entry of the piston command table: configuration, not code. What a physical
/// button does is fully determined by its row here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PistonCommand {
    /// Division the action applies to; for couplers, the coupling source.
    pub division: Division,
    /// The action itself, with its parameter baked in.
    pub action: PistonAction,
}

/// Turns piston status reports into engine mutations according to the command table.
#[derive(Debug, Default)]
pub struct PistonDispatcher {
    table: PistonTable,
}

impl PistonDispatcher {
    /// Builds a dispatcher around the given command table. Consoles with the reference
    /// rail layout can just use [`Default`].
    pub fn new(table: PistonTable) -> Self {
        Self { table }
    }

    /// Handles one piston press reported by the status collector.
    ///
    /// Button indices beyond the table width are debounce noise from the scan matrix
    /// and get dropped on the floor; nothing here can fail.
    pub fn process_piston_press<R: Routing>(
        &self,
        engine: &mut CouplingEngine,
        router: &mut R,
        division: Division,
        button: usize,
        long_press: bool,
    ) {
        let Some(command) = self.table.command(division, button).copied() else {
            warn!(
                "Ignoring out-of-range piston {} on division {}",
                button as u8, division as u8
            );
            return;
        };
        debug!(
            "Piston {} on division {} (long: {})",
            button as u8, division as u8, long_press
        );

        match command.action {
            PistonAction::None => {}
            PistonAction::Coupler(target) => {
                let state = if long_press {
                    CouplerState::OctaveUp
                } else if engine.coupled(command.division, target) == CouplerState::Off {
                    CouplerState::Couple
                } else {
                    CouplerState::Off
                };
                engine.set_coupled(router, command.division, target, state);
            }
            PistonAction::Transpose => {
                let state = if long_press {
                    CouplerState::Off
                } else {
                    engine.transposed(command.division).cycle_transpose()
                };
                engine.set_transposed(router, command.division, state);
            }
            PistonAction::DivisionOff => {
                if long_press {
                    for target in SOUND_DIVISIONS {
                        engine.set_coupled(router, command.division, target, CouplerState::Off);
                    }
                } else {
                    let enabled = engine.enabled(command.division);
                    engine.set_division_enabled(router, command.division, !enabled);
                }
            }
            PistonAction::Combination(slot) => {
                info!("Combination slot {} requested; registration memory is not implemented", slot);
            }
            PistonAction::ClearCombination => {
                // No registration memory to clear yet; the long press still silences.
                if long_press {
                    silence(engine, router, command.division, false);
                }
            }
            PistonAction::Crescendo => {
                let on = engine.crescendo(command.division);
                engine.set_crescendo(command.division, !on);
            }
            PistonAction::PageTurn(direction) => router.page_turn(direction),
            PistonAction::Sequence(_) | PistonAction::SetCombination | PistonAction::HoldCombination => {
                info!("Sequencer pistons are not implemented");
            }
            PistonAction::AllSoundOff { every_division } => {
                if every_division {
                    silence(engine, router, Division::Control, true);
                } else {
                    silence(engine, router, command.division, true);
                }
            }
        }
    }
}

/// Silences the division, or every sound division when given a pseudo-division.
fn silence<R: Routing>(
    engine: &mut CouplingEngine,
    router: &mut R,
    division: Division,
    sound_off: bool,
) {
    if division.is_sound() {
        engine.all_division_notes_off(router, division, sound_off);
    } else {
        for division in SOUND_DIVISIONS {
            engine.all_division_notes_off(router, division, sound_off);
        }
    }
}

/// Terminates a piston status frame.
const FRAME_END: u8 = 0xFF;

/// Which physical keyboard a sub-controller status byte refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReportedKeyboard {
    /// The sub-controller's first keyboard.
    First,
    /// The sub-controller's second keyboard.
    Second,
}

/// A single decoded piston press from a sub-controller status frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PistonPress {
    /// Keyboard the press belongs to; the transport task maps this to a division.
    pub keyboard: ReportedKeyboard,
    /// Button index on that keyboard's rail.
    pub button: u8,
    /// Whether the collector classified the press as a long press.
    pub long_press: bool,
}

/// Decodes a piston status frame as reported by a keyboard sub-controller.
///
/// Each byte carries the keyboard select in bit 7, the button index in bits 1..=6 and
/// the long-press flag in bit 0; `0xFF` terminates the frame and anything after it is
/// not looked at.
pub fn decode_status_frame(data: &[u8]) -> impl Iterator<Item = PistonPress> + '_ {
    data.iter()
        .copied()
        .take_while(|&byte| byte != FRAME_END)
        .map(|byte| PistonPress {
            keyboard: if byte & 0x80 == 0 {
                ReportedKeyboard::First
            } else {
                ReportedKeyboard::Second
            },
            button: (byte >> 1) & 0x3F,
            long_press: byte & 0x01 != 0,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coupler::CouplerMode;
    use crate::routing::Port;
    use wmidi::{Channel, ControlFunction, MidiMessage, Note, U7};

    use crate::engine::tests::RecordingBus;

    fn setup() -> (CouplingEngine, PistonDispatcher, RecordingBus) {
        (
            CouplingEngine::default(),
            PistonDispatcher::default(),
            RecordingBus::default(),
        )
    }

    #[test]
    fn coupler_piston_toggles_and_long_press_forces_octave_up() {
        let (mut engine, dispatcher, mut bus) = setup();
        // Button 6 on the Pedal rail is its first coupler piston, toward the Choir.
        dispatcher.process_piston_press(&mut engine, &mut bus, Division::Pedal, 6, false);
        assert_eq!(
            CouplerState::Couple,
            engine.coupled(Division::Pedal, Division::Choir)
        );

        dispatcher.process_piston_press(&mut engine, &mut bus, Division::Pedal, 6, false);
        assert_eq!(
            CouplerState::Off,
            engine.coupled(Division::Pedal, Division::Choir)
        );

        dispatcher.process_piston_press(&mut engine, &mut bus, Division::Pedal, 6, true);
        assert_eq!(
            CouplerState::OctaveUp,
            engine.coupled(Division::Pedal, Division::Choir)
        );
        // Long press forces octave-up from any prior state, not just off.
        dispatcher.process_piston_press(&mut engine, &mut bus, Division::Pedal, 6, true);
        assert_eq!(
            CouplerState::OctaveUp,
            engine.coupled(Division::Pedal, Division::Choir)
        );
    }

    #[test]
    fn transpose_piston_cycles_and_long_press_clears() {
        let (mut engine, dispatcher, mut bus) = setup();
        dispatcher.process_piston_press(&mut engine, &mut bus, Division::Great, 10, false);
        assert_eq!(CouplerState::OctaveUp, engine.transposed(Division::Great));
        dispatcher.process_piston_press(&mut engine, &mut bus, Division::Great, 10, false);
        assert_eq!(CouplerState::OctaveDown, engine.transposed(Division::Great));
        dispatcher.process_piston_press(&mut engine, &mut bus, Division::Great, 10, true);
        assert_eq!(CouplerState::Off, engine.transposed(Division::Great));
    }

    #[test]
    fn division_off_piston_toggles_and_long_press_clears_couplers() {
        let (mut engine, dispatcher, mut bus) = setup();
        dispatcher.process_piston_press(&mut engine, &mut bus, Division::Swell, 11, false);
        assert!(!engine.enabled(Division::Swell));
        dispatcher.process_piston_press(&mut engine, &mut bus, Division::Swell, 11, false);
        assert!(engine.enabled(Division::Swell));

        engine.set_coupled(&mut bus, Division::Swell, Division::Great, CouplerState::Couple);
        engine.set_transposed(&mut bus, Division::Swell, CouplerState::OctaveDown);
        dispatcher.process_piston_press(&mut engine, &mut bus, Division::Swell, 11, true);
        assert_eq!(
            CouplerState::Off,
            engine.coupled(Division::Swell, Division::Great)
        );
        assert_eq!(CouplerState::Off, engine.transposed(Division::Swell));
        assert!(engine.enabled(Division::Swell), "long press leaves the enable alone");
    }

    #[test]
    fn out_of_range_buttons_are_ignored() {
        let (mut engine, dispatcher, mut bus) = setup();
        dispatcher.process_piston_press(&mut engine, &mut bus, Division::Pedal, 99, false);
        dispatcher.process_piston_press(&mut engine, &mut bus, Division::Unmapped, 0, false);
        assert_eq!(0, bus.count());
    }

    #[test]
    fn page_turn_pistons_reach_the_display() {
        let (mut engine, dispatcher, mut bus) = setup();
        dispatcher.process_piston_press(&mut engine, &mut bus, Division::Control, 5, false);
        dispatcher.process_piston_press(&mut engine, &mut bus, Division::Control, 6, false);
        let mut turns = bus.page_turns.iter().flatten();
        assert_eq!(Some(&StepDirection::Previous), turns.next());
        assert_eq!(Some(&StepDirection::Next), turns.next());
        assert_eq!(None, turns.next());
    }

    #[test]
    fn crescendo_piston_toggles_the_flag() {
        let (mut engine, dispatcher, mut bus) = setup();
        dispatcher.process_piston_press(&mut engine, &mut bus, Division::Control, 7, false);
        assert!(engine.crescendo(Division::Swell));
        dispatcher.process_piston_press(&mut engine, &mut bus, Division::Control, 7, false);
        assert!(!engine.crescendo(Division::Swell));
    }

    #[test]
    fn all_sound_off_piston_silences_the_whole_console() {
        let (mut engine, dispatcher, mut bus) = setup();
        dispatcher.process_piston_press(&mut engine, &mut bus, Division::Control, 8, false);
        let sound_offs = bus
            .sent()
            .filter(|(_, m)| {
                matches!(
                    m,
                    MidiMessage::ControlChange(_, f, _) if *f == ControlFunction::ALL_SOUND_OFF
                )
            })
            .count();
        assert_eq!(5, sound_offs, "one all-sound-off per sound division");
    }

    #[test]
    fn combination_pistons_are_accepted_but_inert() {
        let (mut engine, dispatcher, mut bus) = setup();
        dispatcher.process_piston_press(&mut engine, &mut bus, Division::Great, 0, false);
        dispatcher.process_piston_press(&mut engine, &mut bus, Division::Control, 1, false);
        dispatcher.process_piston_press(&mut engine, &mut bus, Division::Control, 3, false);
        assert_eq!(0, bus.count());
    }

    #[test]
    fn clear_combination_long_press_silences() {
        let (mut engine, dispatcher, mut bus) = setup();
        engine.route_input(
            &mut bus,
            Port::Synth,
            &MidiMessage::NoteOn(Channel::Ch3, Note::E2, U7::from_u8_lossy(80)),
        );
        bus.clear();

        dispatcher.process_piston_press(&mut engine, &mut bus, Division::Control, 0, true);
        let notes_offs = bus
            .sent()
            .filter(|(_, m)| {
                matches!(
                    m,
                    MidiMessage::ControlChange(_, f, _) if *f == ControlFunction::ALL_NOTES_OFF
                )
            })
            .count();
        assert_eq!(5, notes_offs);
        // Short press has nothing to clear yet and stays silent.
        bus.clear();
        dispatcher.process_piston_press(&mut engine, &mut bus, Division::Control, 0, false);
        assert_eq!(0, bus.count());
    }

    #[test]
    fn pistons_work_in_any_coupler_mode() {
        let (mut engine, dispatcher, mut bus) = setup();
        engine.set_mode(&mut bus, CouplerMode::Disabled);
        dispatcher.process_piston_press(&mut engine, &mut bus, Division::Pedal, 6, false);
        assert_eq!(
            CouplerState::Couple,
            engine.coupled(Division::Pedal, Division::Choir)
        );
    }

    #[test]
    fn status_frames_decode_until_the_sentinel() {
        let frame = [0x0D, 0x84, FRAME_END, 0x03];
        let mut presses = decode_status_frame(&frame);
        assert_eq!(
            Some(PistonPress {
                keyboard: ReportedKeyboard::First,
                button: 6,
                long_press: true,
            }),
            presses.next()
        );
        assert_eq!(
            Some(PistonPress {
                keyboard: ReportedKeyboard::Second,
                button: 2,
                long_press: false,
            }),
            presses.next()
        );
        assert_eq!(None, presses.next(), "bytes after the sentinel are not decoded");
    }
}
