//! Identifiers for the console's MIDI buses and the trait through which finished events
//! leave the core.

use wmidi::MidiMessage;

/// Identifies a physical or internal MIDI bus attached to the console.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Port {
    /// Internal bus to the tone generators.
    Synth,
    /// Bus shared by the two keyboard-manual sub-controllers.
    Manuals,
    /// DIN jack shared with unrelated external gear. Input arriving here always plays
    /// the Great, whatever its channel says.
    External,
    /// USB connection to the console panel or a host computer.
    Panel,
}

/// Direction of stepped side effects: page turns and the registration sequencer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StepDirection {
    /// Step forward.
    Next,
    /// Step backward.
    Previous,
}

/// Sink for everything the core emits.
///
/// The engine and dispatcher never talk to a UART or USB endpoint themselves; they hand
/// finished events to this trait and the transport layer does the rest. Implementations
/// must not call back into the core.
pub trait Routing {
    /// Sends a finished MIDI message out on the given port.
    fn inject_message(&mut self, port: Port, message: &MidiMessage);

    /// Emits a synthetic page-turn keystroke toward the sheet-music display.
    fn page_turn(&mut self, direction: StepDirection);
}
