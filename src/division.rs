//! The console's divisions and their MIDI channel and output port assignments.

use crate::routing::Port;
use bitmask_enum::bitmask;
use num_derive::{FromPrimitive, ToPrimitive};
use wmidi::Channel;

/// An organ manual or pedalboard treated as an independent MIDI voice group, plus the
/// two non-sounding pseudo-divisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Division {
    /// The pedalboard.
    Pedal,
    /// The Choir manual.
    Choir,
    /// The Great manual.
    Great,
    /// The Swell manual.
    Swell,
    /// The Solo manual.
    Solo,
    /// The piston rail under the music desk; carries panel-only buttons, never sounds.
    Control,
    /// Catch-all for MIDI channels no division claims.
    Unmapped,
}

/// Number of divisions that can produce audible notes.
pub const SOUND_DIVISION_COUNT: usize = 5;

/// The divisions that can produce audible notes and take part in coupling, in table
/// order.
pub const SOUND_DIVISIONS: [Division; SOUND_DIVISION_COUNT] = [
    Division::Pedal,
    Division::Choir,
    Division::Great,
    Division::Swell,
    Division::Solo,
];

/// Number of divisions with a channel assignment (the sound divisions plus Control).
const MAPPED_DIVISION_COUNT: usize = 6;

impl Division {
    /// True for divisions that can sound notes, i.e. everything but Control and
    /// Unmapped.
    pub fn is_sound(self) -> bool {
        self.sound_index().is_some()
    }

    /// Index into the per-sound-division tables; `None` for the pseudo-divisions.
    pub(crate) fn sound_index(self) -> Option<usize> {
        match self {
            Division::Pedal => Some(0),
            Division::Choir => Some(1),
            Division::Great => Some(2),
            Division::Swell => Some(3),
            Division::Solo => Some(4),
            Division::Control | Division::Unmapped => None,
        }
    }

    /// Index into the channel/port maps; `None` only for Unmapped.
    fn map_index(self) -> Option<usize> {
        match self {
            Division::Control => Some(5),
            Division::Unmapped => None,
            sound => sound.sound_index(),
        }
    }

    /// This division's bit in a [`DivisionMask`]; the empty mask for pseudo-divisions.
    pub fn mask(self) -> DivisionMask {
        match self {
            Division::Pedal => DivisionMask::Pedal,
            Division::Choir => DivisionMask::Choir,
            Division::Great => DivisionMask::Great,
            Division::Swell => DivisionMask::Swell,
            Division::Solo => DivisionMask::Solo,
            Division::Control | Division::Unmapped => DivisionMask::none(),
        }
    }
}

/// Bitset over the sound divisions, recording which of them are driving a coupled note
/// into a given slot.
#[bitmask(u8)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DivisionMask {
    /// The pedalboard's bit.
    Pedal,
    /// The Choir manual's bit.
    Choir,
    /// The Great manual's bit.
    Great,
    /// The Swell manual's bit.
    Swell,
    /// The Solo manual's bit.
    Solo,
}

/// Total mapping between divisions and MIDI channels.
///
/// The forward and reverse tables are only ever updated together through
/// [`ChannelMap::assign`], which clears the old reverse entry before installing the new
/// pair. Claiming a channel another division holds simply steals it: last writer wins,
/// and input on the loser's channel resolves to [`Division::Unmapped`] until it is
/// reassigned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelMap {
    forward: [Channel; MAPPED_DIVISION_COUNT],
    reverse: [Division; 16],
}

impl Default for ChannelMap {
    /// The reference console wiring: Great=1, Swell=2, Pedal=3, Choir=4, Solo=5,
    /// Control=16.
    fn default() -> Self {
        let mut map = Self {
            forward: [Channel::Ch16; MAPPED_DIVISION_COUNT],
            reverse: [Division::Unmapped; 16],
        };
        map.assign(Division::Great, Channel::Ch1);
        map.assign(Division::Swell, Channel::Ch2);
        map.assign(Division::Pedal, Channel::Ch3);
        map.assign(Division::Choir, Channel::Ch4);
        map.assign(Division::Solo, Channel::Ch5);
        map.assign(Division::Control, Channel::Ch16);
        map
    }
}

impl ChannelMap {
    /// Channel the division transmits on; `None` only for [`Division::Unmapped`].
    pub fn channel(&self, division: Division) -> Option<Channel> {
        division.map_index().map(|index| self.forward[index])
    }

    /// Division claiming the channel, or [`Division::Unmapped`].
    pub fn division_for(&self, channel: Channel) -> Division {
        self.reverse[channel.index() as usize]
    }

    /// Reassigns a division's channel, keeping the reverse table consistent.
    ///
    /// Channel-range validation happens upstream at the panel/settings layer, not here.
    pub fn assign(&mut self, division: Division, channel: Channel) {
        let Some(index) = division.map_index() else {
            return;
        };
        let old = self.forward[index];
        if self.reverse[old.index() as usize] == division {
            self.reverse[old.index() as usize] = Division::Unmapped;
        }
        self.reverse[channel.index() as usize] = division;
        self.forward[index] = channel;
    }
}

/// Fixed assignment of each division to the output bus its tone generator listens on.
///
/// Only the two keyboard manuals vary between consoles (they may or may not share a
/// bus), so only those are parameters of [`PortMap::new`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortMap {
    ports: [Port; MAPPED_DIVISION_COUNT],
}

impl Default for PortMap {
    /// The reference console: both manuals on the shared manual bus, everything else on
    /// the internal synth bus, the Control rail toward the panel.
    fn default() -> Self {
        Self::new(Port::Manuals, Port::Manuals)
    }
}

impl PortMap {
    /// Builds a port map with the given buses for the Great and Swell manuals.
    pub fn new(great: Port, swell: Port) -> Self {
        let mut ports = [Port::Synth; MAPPED_DIVISION_COUNT];
        ports[3] = swell;
        ports[2] = great;
        ports[5] = Port::Panel;
        Self { ports }
    }

    /// Output port for the division; `None` only for [`Division::Unmapped`].
    pub fn port(&self, division: Division) -> Option<Port> {
        division.map_index().map(|index| self.ports[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sound_divisions_have_distinct_bits() {
        let mut seen = DivisionMask::none();
        for division in SOUND_DIVISIONS {
            assert!(division.is_sound());
            assert!(!seen.intersects(division.mask()), "bit reused");
            seen |= division.mask();
        }
        assert!(Division::Control.mask().is_none());
        assert!(Division::Unmapped.mask().is_none());
    }

    #[test]
    fn default_channels_match_reference_console() {
        let map = ChannelMap::default();
        assert_eq!(Some(Channel::Ch3), map.channel(Division::Pedal));
        assert_eq!(Some(Channel::Ch4), map.channel(Division::Choir));
        assert_eq!(Division::Great, map.division_for(Channel::Ch1));
        assert_eq!(Division::Unmapped, map.division_for(Channel::Ch7));
        assert_eq!(None, map.channel(Division::Unmapped));
    }

    #[test]
    fn assign_clears_old_reverse_entry() {
        let mut map = ChannelMap::default();
        map.assign(Division::Pedal, Channel::Ch6);
        assert_eq!(Division::Unmapped, map.division_for(Channel::Ch3));
        assert_eq!(Division::Pedal, map.division_for(Channel::Ch6));
        assert_eq!(Some(Channel::Ch6), map.channel(Division::Pedal));
    }

    #[test]
    fn assign_steals_a_claimed_channel() {
        let mut map = ChannelMap::default();
        map.assign(Division::Solo, Channel::Ch1);
        assert_eq!(Division::Solo, map.division_for(Channel::Ch1));
        // The Great still believes it transmits on channel 1; input there now resolves
        // to the Solo. Last writer wins, nothing is signaled.
        assert_eq!(Some(Channel::Ch1), map.channel(Division::Great));
    }

    #[test]
    fn manuals_may_share_a_bus() {
        let map = PortMap::default();
        assert_eq!(Some(Port::Manuals), map.port(Division::Great));
        assert_eq!(Some(Port::Manuals), map.port(Division::Swell));
        assert_eq!(Some(Port::Synth), map.port(Division::Pedal));
        assert_eq!(Some(Port::Panel), map.port(Division::Control));

        let split = PortMap::new(Port::Synth, Port::Manuals);
        assert_eq!(Some(Port::Synth), split.port(Division::Great));
        assert_eq!(Some(Port::Manuals), split.port(Division::Swell));
    }
}
