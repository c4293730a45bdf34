//! Typed messages routed over the device bus.
//!
//! Wire messages mirror the MIDI 1.0 vocabulary the hub actually uses;
//! internal messages speak in macros (virtual control numbers independent
//! of the wire) and carry the data each consumer needs, no more.

use smallvec::SmallVec;

use crate::sysex::SysexFrame;

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8, velocity: u8 },
    ControlChange { channel: u8, control: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    Clock,
    Start,
    Stop,
    Sysex(SysexFrame),
    Internal(Internal),
}

impl Message {
    /// Note constructor collapsing zero velocity to note-off.
    pub fn note(channel: u8, note: u8, velocity: u8) -> Message {
        if velocity > 0 {
            Message::NoteOn { channel, note, velocity }
        } else {
            Message::NoteOff { channel, note, velocity: 0 }
        }
    }

    pub fn cc(channel: u8, control: u8, value: u8) -> Message {
        Message::ControlChange { channel, control, value }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, Message::Internal(_))
    }

    /// Serialize to wire bytes. Internal messages have no wire form and
    /// leave `out` untouched.
    pub fn to_wire(&self, out: &mut Vec<u8>) -> bool {
        match self {
            Message::NoteOn { channel, note, velocity } => {
                out.extend_from_slice(&[0x90 | (channel & 0x0f), *note, *velocity]);
                true
            }
            Message::NoteOff { channel, note, velocity } => {
                out.extend_from_slice(&[0x80 | (channel & 0x0f), *note, *velocity]);
                true
            }
            Message::ControlChange { channel, control, value } => {
                out.extend_from_slice(&[0xb0 | (channel & 0x0f), *control, *value]);
                true
            }
            Message::ProgramChange { channel, program } => {
                out.extend_from_slice(&[0xc0 | (channel & 0x0f), *program]);
                true
            }
            Message::Clock => {
                out.push(0xf8);
                true
            }
            Message::Start => {
                out.push(0xfa);
                true
            }
            Message::Stop => {
                out.push(0xfc);
                true
            }
            Message::Sysex(frame) => {
                frame.encode(out);
                true
            }
            Message::Internal(_) => false,
        }
    }
}

/// The bus-internal vocabulary. Values named `macro_id` are virtual control
/// numbers; CC-space macros are stored offset by 128 so pad and knob macros
/// share one space.
#[derive(Debug, Clone, PartialEq)]
pub enum Internal {
    Init,
    /// Quarter-note boundary; payload is the phrase length in bars.
    Beat(u8),
    /// Phrase boundary. State changes queued for "next start" apply here.
    Start(u8),
    /// The final 1/32 of the phrase.
    End(u8),
    Stop,
    Play,
    Rec,
    Toggle,
    Overdub(bool),
    Bars(u8),
    /// Relative phrase selection.
    Phrase(i8),
    /// Relative patch selection.
    Patch(i16),
    /// A per-string gesture from the surface: fader channel, controller,
    /// 0..=127 value.
    Strings { channel: u8, control: u8, value: u8 },
    /// A string bank readback from the synth: six volumes then six pans,
    /// vendor units.
    StringValues { instrument: u8, values: SmallVec<[u8; 12]> },
    Volume { track: u8, value: u8 },
    Xfade { track: u8, value: u8 },
    Xfader(u8),
    /// A synth parameter edit or reflection.
    Synth { instrument: u8, macro_id: u8, value: u8 },
    /// One step cell toggled on the surface.
    Step { instrument: u8, macro_id: u8, target: u8, row: u8, col: u8, value: u8 },
    /// A full step row readback: lit-pad count per column.
    Steps { instrument: u8, macro_id: u8, target: u8, counts: SmallVec<[u8; 16]> },
    /// Which sequencer (1/2, 0 = off) drives a grid target.
    Target { instrument: u8, target: u8, value: u8 },
    /// Sequencer length/state readback (macro 85/86, value = length).
    Seq { instrument: u8, macro_id: u8, value: u8 },
    /// Sequencer length edit from the surface.
    Length { instrument: u8, macro_id: u8, value: u8 },
}

impl From<Internal> for Message {
    fn from(i: Internal) -> Message {
        Message::Internal(i)
    }
}
