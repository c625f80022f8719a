//! The default piston rail layout of the reference console.

use crate::{
    division::{Division, SOUND_DIVISIONS},
    piston::{PistonAction, PistonCommand},
    routing::StepDirection,
};

/// Buttons on each division's piston rail.
pub const PISTONS_PER_DIVISION: usize = 12;

/// Rails carrying pistons: one per sound division plus the Control rail.
const RAIL_COUNT: usize = 6;

/// Maps (division, button) to the command the piston issues.
///
/// Pure data; consoles with a different rail layout construct their own table and the
/// dispatcher never knows the difference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PistonTable {
    rows: [[PistonCommand; PISTONS_PER_DIVISION]; RAIL_COUNT],
}

impl Default for PistonTable {
    /// The reference console layout.
    ///
    /// Each sound division's rail: six combination pistons, then one coupler piston per
    /// other sound division (in fixed division order, skipping itself), then transpose
    /// and the division on/off toggle. The Control rail carries the console-wide
    /// pistons.
    fn default() -> Self {
        let unassigned = PistonCommand {
            division: Division::Control,
            action: PistonAction::None,
        };
        let mut rows = [[unassigned; PISTONS_PER_DIVISION]; RAIL_COUNT];

        for division in SOUND_DIVISIONS {
            let Some(rail) = rail_index(division) else {
                continue;
            };
            let row = &mut rows[rail];
            for (button, slot) in row.iter_mut().take(6).enumerate() {
                *slot = PistonCommand {
                    division,
                    action: PistonAction::Combination(button as u8),
                };
            }
            let mut button = 6;
            for target in SOUND_DIVISIONS {
                if target == division {
                    continue;
                }
                row[button] = PistonCommand {
                    division,
                    action: PistonAction::Coupler(target),
                };
                button += 1;
            }
            row[10] = PistonCommand {
                division,
                action: PistonAction::Transpose,
            };
            row[11] = PistonCommand {
                division,
                action: PistonAction::DivisionOff,
            };
        }

        let control = Division::Control;
        rows[RAIL_COUNT - 1] = [
            PistonCommand { division: control, action: PistonAction::ClearCombination },
            PistonCommand { division: control, action: PistonAction::SetCombination },
            PistonCommand { division: control, action: PistonAction::HoldCombination },
            PistonCommand { division: control, action: PistonAction::Sequence(StepDirection::Previous) },
            PistonCommand { division: control, action: PistonAction::Sequence(StepDirection::Next) },
            PistonCommand { division: control, action: PistonAction::PageTurn(StepDirection::Previous) },
            PistonCommand { division: control, action: PistonAction::PageTurn(StepDirection::Next) },
            // The crescendo toggle acts on the Swell, where the crescendo shoe sits.
            PistonCommand { division: Division::Swell, action: PistonAction::Crescendo },
            PistonCommand { division: control, action: PistonAction::AllSoundOff { every_division: true } },
            unassigned,
            unassigned,
            unassigned,
        ];

        Self { rows }
    }
}

impl PistonTable {
    /// Builds a table from explicit rows, one per sound division in fixed order plus
    /// the Control rail last.
    pub fn new(rows: [[PistonCommand; PISTONS_PER_DIVISION]; RAIL_COUNT]) -> Self {
        Self { rows }
    }

    /// Command for a button on a division's rail; `None` for out-of-range buttons and
    /// for divisions without a rail.
    pub fn command(&self, division: Division, button: usize) -> Option<&PistonCommand> {
        self.rows.get(rail_index(division)?)?.get(button)
    }
}

/// Row of a division's rail in the table; `None` for [`Division::Unmapped`].
fn rail_index(division: Division) -> Option<usize> {
    match division {
        Division::Control => Some(RAIL_COUNT - 1),
        Division::Unmapped => None,
        sound => sound.sound_index(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coupler_pistons_skip_the_own_division() {
        let table = PistonTable::default();
        assert_eq!(
            Some(&PistonCommand {
                division: Division::Pedal,
                action: PistonAction::Coupler(Division::Choir),
            }),
            table.command(Division::Pedal, 6)
        );
        assert_eq!(
            Some(&PistonCommand {
                division: Division::Great,
                action: PistonAction::Coupler(Division::Pedal),
            }),
            table.command(Division::Great, 6)
        );
        assert_eq!(
            Some(&PistonCommand {
                division: Division::Great,
                action: PistonAction::Coupler(Division::Swell),
            }),
            table.command(Division::Great, 8)
        );
        // No rail couples a division into itself; that is the transpose piston's job.
        for division in SOUND_DIVISIONS {
            for button in 6..10 {
                assert_ne!(
                    Some(&PistonCommand {
                        division,
                        action: PistonAction::Coupler(division),
                    }),
                    table.command(division, button)
                );
            }
        }
    }

    #[test]
    fn every_sound_rail_has_the_fixed_tail() {
        let table = PistonTable::default();
        for division in SOUND_DIVISIONS {
            assert_eq!(
                Some(&PistonCommand {
                    division,
                    action: PistonAction::Combination(0),
                }),
                table.command(division, 0)
            );
            assert_eq!(
                Some(&PistonCommand {
                    division,
                    action: PistonAction::Transpose,
                }),
                table.command(division, 10)
            );
            assert_eq!(
                Some(&PistonCommand {
                    division,
                    action: PistonAction::DivisionOff,
                }),
                table.command(division, 11)
            );
        }
    }

    #[test]
    fn unknown_rails_and_buttons_resolve_to_nothing() {
        let table = PistonTable::default();
        assert_eq!(None, table.command(Division::Unmapped, 0));
        assert_eq!(None, table.command(Division::Pedal, PISTONS_PER_DIVISION));
        assert_eq!(
            Some(PistonAction::None),
            table.command(Division::Control, 11).map(|c| c.action)
        );
    }
}
