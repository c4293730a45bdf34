//! Abstract synth parameters.
//!
//! A parameter owns a window of the instrument's sysex address space and
//! converts between wire units (vendor-specific, usually 0..=100) and macro
//! units (0..=127 pad/CC velocity). Parameters that share a response window
//! carry a negative offset and read their byte out of the window at
//! `origin`.

use smallvec::SmallVec;

use crate::error::SysexError;
use crate::msg::Internal;
use crate::sysex::{AddressFamily, SysexFrame};
use crate::util::clip;

/// Wire value boundaries of one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub min: i32,
    pub max: i32,
}

impl Bounds {
    pub const WIRE: Bounds = Bounds { min: 0, max: 100 };

    pub const fn new(min: i32, max: i32) -> Self {
        Bounds { min, max }
    }

    /// Wire value → macro velocity.
    pub fn to_macro(&self, value: i32) -> u8 {
        let span = (self.max - self.min) as f32;
        clip((value - self.min) as f32 * 128.0 / span, 0, 127) as u8
    }

    /// Macro velocity → wire value.
    pub fn from_macro(&self, vel: u8) -> i32 {
        let span = (self.max - self.min) as f32;
        clip(vel as f32 / 127.0 * span + self.min as f32, self.min, self.max)
    }
}

/// One-to-one scalar.
#[derive(Debug, Clone)]
pub struct Pot {
    pub address: u8,
    pub offset: i16,
    pub macro_id: u8,
    pub bounds: Bounds,
}

/// On/off plus a value byte.
#[derive(Debug, Clone)]
pub struct Switch {
    pub address: u8,
    pub offset: i16,
    pub macro_id: u8,
    pub bounds: Bounds,
}

/// Shape byte plus a rate that only counts when it is beat-synced.
#[derive(Debug, Clone)]
pub struct Lfo {
    pub address: u8,
    pub offset: i16,
    pub macro_id: u8,
    pub bounds: Bounds,
    shape: u8,
}

/// Filter-type plus unipolar value folded onto 0..=127 around 64.
#[derive(Debug, Clone)]
pub struct Bipolar {
    pub address: u8,
    pub offset: i16,
    pub macro_id: u8,
    pub bounds: Bounds,
    pub data_idx: usize,
}

/// Per-string volume or pan bank, six channels wide.
#[derive(Debug, Clone)]
pub struct Strings {
    pub address: u8,
    pub offset: i16,
    pub macro_id: u8,
}

/// 16 columns of quantized step values feeding one sequencer target.
/// `values` is the quantization table in macro velocities, loudest first.
#[derive(Debug, Clone)]
pub struct Grid {
    pub address: u8,
    pub offset: i16,
    pub macro_id: u8,
    pub bounds: Bounds,
    pub values: [u8; 5],
}

/// Sequencer on/off + length + phrase-locked rate.
#[derive(Debug, Clone)]
pub struct BarSeq {
    pub address: u8,
    pub offset: i16,
    pub macro_id: u8,
    pub bounds: Bounds,
}

/// Rates that lock the step sequencer to the phrase, indexed by `bars - 1`.
pub const SEQ_RATES: [u8; 8] = [115, 112, 110, 109, 108, 107, 106, 106];

/// The composite step sequencer: three grids and two bar blocks sharing one
/// big response window.
#[derive(Debug, Clone)]
pub struct StepSequencer {
    pub address: u8,
    pub offset: i16,
    pub macro_id: u8,
    pub grids: [Grid; 3],
    pub bars: [BarSeq; 2],
}

#[derive(Debug, Clone)]
pub enum Param {
    Pot(Pot),
    Switch(Switch),
    Lfo(Lfo),
    Bipolar(Bipolar),
    Strings(Strings),
    Sequencer(StepSequencer),
}

impl Pot {
    pub fn new(address: u8, offset: i16, cc: u8, bounds: Bounds) -> Param {
        Param::Pot(Pot { address, offset, macro_id: 128 + cc, bounds })
    }
}

impl Switch {
    pub fn new(address: u8, offset: i16, cc: u8, bounds: Bounds) -> Param {
        Param::Switch(Switch { address, offset, macro_id: 128 + cc, bounds })
    }
}

impl Lfo {
    pub fn new(address: u8, offset: i16, cc: u8, bounds: Bounds) -> Param {
        Param::Lfo(Lfo { address, offset, macro_id: 128 + cc, bounds, shape: 0 })
    }
}

impl Bipolar {
    pub fn new(address: u8, offset: i16, cc: u8, data_idx: usize) -> Param {
        Param::Bipolar(Bipolar {
            address,
            offset,
            macro_id: 128 + cc,
            bounds: Bounds::WIRE,
            data_idx,
        })
    }

    fn fold(&self, vel: u8) -> i32 {
        self.bounds.from_macro(vel) * 2
    }

    fn unfold(&self, ftype: u8, value: i32) -> Option<u8> {
        let max = self.bounds.max as f32;
        match ftype {
            0 => Some(clip(64.0 - value as f32 / max * 64.0, self.bounds.min, 64) as u8),
            1 => Some(clip(value as f32 / max * 64.0 + 64.0, 64, 127) as u8),
            _ => None,
        }
    }
}

impl Strings {
    pub fn new(address: u8, offset: i16, cc: u8) -> Param {
        Param::Strings(Strings { address, offset, macro_id: 128 + cc })
    }

    fn matches_control(&self, control: u8) -> bool {
        if self.address == 6 {
            (16..=19).contains(&control)
        } else {
            (20..=23).contains(&control)
        }
    }
}

impl Grid {
    pub fn new(address: u8, offset: i16, macro_id: u8, bounds: Bounds, values: [u8; 5]) -> Self {
        Grid { address, offset, macro_id, bounds, values }
    }

    /// Number of pads lit for a wire step value, counted from the softest
    /// threshold up.
    pub fn lit_count(&self, value: i32) -> u8 {
        let vel = self.bounds.to_macro(value);
        self.values.iter().filter(|v| vel >= **v).count() as u8
    }

    /// Wire value for a pad row press; rows map onto the quantized table,
    /// anything else passes the velocity through.
    pub fn from_cell(&self, row: u8, vel: u8) -> i32 {
        match self.values.get(row as usize) {
            Some(v) => self.bounds.from_macro(*v),
            None => self.bounds.from_macro(vel),
        }
    }
}

impl BarSeq {
    pub fn new(address: u8, offset: i16, macro_id: u8, bounds: Bounds) -> Self {
        BarSeq { address, offset, macro_id, bounds }
    }
}

impl StepSequencer {
    pub fn new(
        address: u8,
        offset: i16,
        macro_id: u8,
        grids: [Grid; 3],
        bars: [BarSeq; 2],
    ) -> Param {
        Param::Sequencer(StepSequencer { address, offset, macro_id, grids, bars })
    }
}

impl Param {
    /// Start of the parameter's response window, negative offsets folded in.
    pub fn origin(&self) -> u8 {
        let (address, offset) = match self {
            Param::Pot(p) => (p.address, p.offset),
            Param::Switch(p) => (p.address, p.offset),
            Param::Lfo(p) => (p.address, p.offset),
            Param::Bipolar(p) => (p.address, p.offset),
            Param::Strings(p) => (p.address, p.offset),
            Param::Sequencer(p) => (p.address, p.offset),
        };
        (address as i16 + offset.min(0)) as u8
    }

    /// The read-back request covering this parameter's window, if it owns
    /// one (shared-window parameters ride along on the owner's request).
    pub fn request(&self, instr: u8, out: &mut Vec<SysexFrame>) {
        let (address, offset) = match self {
            Param::Pot(p) => (p.address, p.offset),
            Param::Switch(p) => (p.address, p.offset),
            Param::Lfo(p) => (p.address, p.offset),
            Param::Bipolar(p) => (p.address, p.offset),
            // string banks are requested per slot, not per parameter
            Param::Strings(_) => return,
            Param::Sequencer(p) => (p.address, p.offset),
        };
        if offset > 0 {
            if let Ok(frame) = SysexFrame::request(
                AddressFamily::Patch,
                &[instr as u16, address as u16, 0, 0, 0, offset as u16],
            ) {
                out.push(frame);
            }
        }
    }

    /// Decode a response window starting at this parameter's origin.
    /// `instrument` is the registry index carried on the bus.
    pub fn receive(&mut self, instrument: u8, body: &[u8], out: &mut Vec<Internal>) {
        match self {
            Param::Pot(p) => {
                let idx = if p.offset < 0 { (-p.offset) as usize } else { 0 };
                if let Some(byte) = body.get(idx) {
                    out.push(Internal::Synth {
                        instrument,
                        macro_id: p.macro_id,
                        value: p.bounds.to_macro(*byte as i32),
                    });
                }
            }
            Param::Switch(p) => {
                if body.len() >= 2 {
                    let on = body[0] == 1;
                    let value = if on { p.bounds.to_macro(body[1] as i32) } else { 0 };
                    out.push(Internal::Synth { instrument, macro_id: p.macro_id, value });
                }
            }
            Param::Lfo(p) => {
                if body.len() >= 3 {
                    p.shape = body[1];
                    let rate = body[2] as i32;
                    let value = if rate <= 100 { 0 } else { p.bounds.to_macro(rate) };
                    out.push(Internal::Synth { instrument, macro_id: p.macro_id, value });
                }
            }
            Param::Bipolar(p) => {
                if let Some(byte) = body.get(p.data_idx) {
                    if let Some(value) = p.unfold(body[0], *byte as i32) {
                        out.push(Internal::Synth { instrument, macro_id: p.macro_id, value });
                    }
                }
            }
            Param::Strings(_) => {}
            Param::Sequencer(p) => {
                if body.len() < 123 {
                    return;
                }
                for (g, grid) in p.grids.iter().enumerate() {
                    let window = &body[3 + g * 32..3 + (g + 1) * 32];
                    let mut counts: SmallVec<[u8; 16]> = SmallVec::new();
                    for pair in window.chunks(2) {
                        // even byte is the step floor, odd byte the peak
                        counts.push(grid.lit_count(pair[1] as i32));
                    }
                    out.push(Internal::Steps {
                        instrument,
                        macro_id: p.macro_id,
                        target: grid.macro_id,
                        counts,
                    });
                    out.push(Internal::Target {
                        instrument,
                        target: g as u8,
                        value: body[g],
                    });
                }
                for (b, bar) in p.bars.iter().enumerate() {
                    let on = body[99 + b * 22] != 0;
                    let length = if on { body[101 + b * 22] } else { 0 };
                    out.push(Internal::Seq {
                        instrument,
                        macro_id: bar.macro_id,
                        value: length,
                    });
                }
            }
        }
    }

    /// Does this parameter consume the outgoing internal message?
    pub fn matches(&self, msg: &Internal) -> bool {
        match (self, msg) {
            (Param::Pot(p), Internal::Synth { macro_id, .. }) => *macro_id == p.macro_id,
            (Param::Switch(p), Internal::Synth { macro_id, .. }) => *macro_id == p.macro_id,
            (Param::Lfo(p), Internal::Synth { macro_id, .. }) => *macro_id == p.macro_id,
            (Param::Bipolar(p), Internal::Synth { macro_id, .. }) => *macro_id == p.macro_id,
            (Param::Strings(p), Internal::Strings { control, .. }) => {
                p.matches_control(*control)
            }
            (Param::Sequencer(p), Internal::Step { macro_id, .. }) => *macro_id == p.macro_id,
            (Param::Sequencer(_), Internal::Target { .. }) => true,
            (Param::Sequencer(p), Internal::Length { macro_id, .. }) => {
                p.bars.iter().any(|b| b.macro_id == *macro_id)
            }
            (Param::Sequencer(_), Internal::Bars(_)) => true,
            _ => false,
        }
    }

    /// Encode a command for the wire. `instr` is the slot address the
    /// command writes to (type-adjusted for synth params, slot base for
    /// string banks).
    pub fn from_internal(
        &mut self,
        instr: u8,
        msg: &Internal,
        out: &mut Vec<SysexFrame>,
    ) -> Result<(), SysexError> {
        let instr = instr as u16;
        match (self, msg) {
            (Param::Pot(p), Internal::Synth { value, .. }) => {
                let wire = p.bounds.from_macro(*value) as u16;
                out.push(SysexFrame::command(
                    AddressFamily::Patch,
                    &[instr, p.address as u16, wire],
                )?);
            }
            (Param::Switch(p), Internal::Synth { value, .. }) => {
                let body: SmallVec<[u16; 4]> = if *value > 0 {
                    let wire = p.bounds.from_macro(*value) as u16;
                    [instr, p.address as u16, 1, wire].into_iter().collect()
                } else {
                    [instr, p.address as u16, 0].into_iter().collect()
                };
                out.push(SysexFrame::command(AddressFamily::Patch, &body)?);
            }
            (Param::Lfo(p), Internal::Synth { value, .. }) => {
                let body: SmallVec<[u16; 5]> = if *value > 0 {
                    let rate = p.bounds.from_macro(*value) as u16;
                    [instr, p.address as u16, 1, p.shape as u16, rate].into_iter().collect()
                } else {
                    [instr, p.address as u16, 0].into_iter().collect()
                };
                out.push(SysexFrame::command(AddressFamily::Patch, &body)?);
            }
            (Param::Bipolar(p), Internal::Synth { value, .. }) => {
                let fold = p.fold(*value);
                let max = p.bounds.max;
                let body = if fold < max {
                    [instr, p.address as u16, 0, 1, (max - fold) as u16]
                } else {
                    [instr, p.address as u16, 1, 1, (fold - max) as u16]
                };
                out.push(SysexFrame::command(AddressFamily::Patch, &body)?);
            }
            (Param::Strings(p), Internal::Strings { channel, control: _, value }) => {
                let wire = Bounds::WIRE.from_macro(*value) as u16;
                let mut body: SmallVec<[u16; 10]> = SmallVec::new();
                body.push(instr);
                if *channel < 6 {
                    body.push(p.address as u16 + *channel as u16);
                    body.push(wire);
                } else {
                    // channel 8: broadcast the value across all six strings
                    body.push(p.address as u16);
                    for _ in 0..6 {
                        body.push(wire);
                    }
                }
                out.push(SysexFrame::command(AddressFamily::Patch, &body)?);
            }
            (Param::Sequencer(p), Internal::Step { target, row, col, value, .. }) => {
                if let Some(grid) = p.grids.iter().find(|g| g.macro_id == *target) {
                    // +1 writes the step peak, leaving the floor byte alone;
                    // a cleared pad drops the peak to the floor
                    let address = grid.address as u16 + *col as u16 + 1;
                    let wire = if *value == 0 {
                        grid.bounds.min as u16
                    } else {
                        grid.from_cell(*row, *value) as u16
                    };
                    out.push(SysexFrame::command(
                        AddressFamily::Patch,
                        &[instr, address, wire],
                    )?);
                }
            }
            (Param::Sequencer(p), Internal::Target { target, value, .. }) => {
                if (*target as usize) < p.grids.len() {
                    out.push(SysexFrame::command(
                        AddressFamily::Patch,
                        &[instr, p.address as u16 + *target as u16, *value as u16],
                    )?);
                }
            }
            (Param::Sequencer(p), Internal::Length { macro_id, value, .. }) => {
                for bar in p.bars.iter().filter(|b| b.macro_id == *macro_id) {
                    let address = bar.address as u16 + if *value > 0 { 2 } else { 0 };
                    out.push(SysexFrame::command(
                        AddressFamily::Patch,
                        &[instr, address, *value as u16],
                    )?);
                }
            }
            (Param::Sequencer(p), Internal::Bars(bars)) => {
                let rate = SEQ_RATES[(clip(*bars as f32, 1, 8) - 1) as usize] as u16;
                for bar in p.bars.iter() {
                    out.push(SysexFrame::command(
                        AddressFamily::Patch,
                        &[instr, bar.address as u16 + 3, rate],
                    )?);
                }
            }
            _ => {}
        }
        Ok(())
    }
}
