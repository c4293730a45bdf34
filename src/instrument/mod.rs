//! Instruments and the slot registry.
//!
//! The synth exposes three instrument slots at fixed base addresses, each
//! 11 addresses wide. The slot's reported type selects which parameter set
//! lives behind it; types are swapped in place when the synth reports a
//! change. Parameter addresses are relative to the slot plus a small
//! per-type displacement.

pub mod params;

use crate::error::SysexError;
use crate::msg::Internal;
use crate::sysex::{AddressFamily, SysexFrame};

use params::{BarSeq, Bipolar, Bounds, Grid, Lfo, Param, Pot, StepSequencer, Strings, Switch};

/// Slot base addresses of the three instruments.
pub const SLOT_BASES: [u8; 3] = [21, 32, 43];
/// Width of one slot's address range.
pub const SLOT_WIDTH: u8 = 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentKind {
    DynaSynth,
    OscSynth,
    Gr300,
    EGuitar,
    AGuitar,
    EBass,
    VioGuitar,
    PolyFx,
}

impl InstrumentKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(InstrumentKind::DynaSynth),
            1 => Some(InstrumentKind::OscSynth),
            2 => Some(InstrumentKind::Gr300),
            3 => Some(InstrumentKind::EGuitar),
            4 => Some(InstrumentKind::AGuitar),
            5 => Some(InstrumentKind::EBass),
            6 => Some(InstrumentKind::VioGuitar),
            7 => Some(InstrumentKind::PolyFx),
            _ => None,
        }
    }

    /// Displacement of the type's parameter block within the slot.
    pub fn address_offset(self) -> u8 {
        match self {
            InstrumentKind::DynaSynth => 1,
            InstrumentKind::OscSynth => 3,
            InstrumentKind::Gr300 => 4,
            InstrumentKind::EGuitar => 5,
            InstrumentKind::AGuitar => 6,
            InstrumentKind::EBass => 7,
            InstrumentKind::VioGuitar => 8,
            InstrumentKind::PolyFx => 9,
        }
    }

    /// Per-string banks first (all types carry them), synth parameters
    /// after, addresses relative to the type's block.
    fn params(self) -> Vec<Param> {
        let mut params = vec![Strings::new(6, 12, 16), Strings::new(12, -6, 20)];
        match self {
            InstrumentKind::DynaSynth => {
                params.extend([
                    Pot::new(5, 1, 48, Bounds::new(8, 56)),
                    Pot::new(16, 1, 52, Bounds::new(14, 114)),
                    Bipolar::new(29, 6, 49, 2),
                    Pot::new(32, -3, 53, Bounds::WIRE),
                    Pot::new(33, -4, 50, Bounds::new(14, 114)),
                    Pot::new(34, -5, 54, Bounds::new(14, 114)),
                    Lfo::new(39, 3, 51, Bounds::new(100, 118)),
                    Lfo::new(49, 3, 55, Bounds::new(100, 118)),
                    StepSequencer::new(
                        59,
                        125,
                        53,
                        [
                            // pitch rows: +12, +5, +3, +1, 0 semitones
                            Grid::new(62, -3, 82, Bounds::new(8, 56), [96, 77, 72, 66, 64]),
                            Grid::new(94, -35, 83, Bounds::WIRE, [127, 100, 75, 50, 25]),
                            Grid::new(126, -67, 84, Bounds::WIRE, [127, 100, 75, 50, 25]),
                        ],
                        [
                            BarSeq::new(158, -99, 85, Bounds::new(0, 118)),
                            BarSeq::new(180, -121, 86, Bounds::new(0, 118)),
                        ],
                    ),
                ]);
            }
            InstrumentKind::OscSynth => {
                params.extend([
                    Pot::new(2, 1, 48, Bounds::new(8, 56)),
                    Pot::new(8, 1, 52, Bounds::new(4, 28)),
                    Bipolar::new(27, 11, 49, 3),
                    Pot::new(31, -4, 53, Bounds::WIRE),
                    Pot::new(33, -6, 50, Bounds::WIRE),
                    Pot::new(37, -10, 54, Bounds::new(14, 114)),
                    Lfo::new(45, 3, 51, Bounds::new(100, 118)),
                    Lfo::new(55, 3, 55, Bounds::new(100, 118)),
                ]);
            }
            InstrumentKind::Gr300 => {
                params.extend([
                    Pot::new(8, 3, 48, Bounds::new(4, 28)),
                    Pot::new(10, 0, 52, Bounds::new(4, 28)),
                    Pot::new(2, 2, 49, Bounds::WIRE),
                    Pot::new(3, -1, 53, Bounds::WIRE),
                    Switch::new(13, 3, 54, Bounds::WIRE),
                    Pot::new(15, -2, 50, Bounds::WIRE),
                    Switch::new(16, 3, 55, Bounds::WIRE),
                    Pot::new(18, -2, 51, Bounds::WIRE),
                ]);
            }
            // plain pickup models only carry the string banks
            _ => {}
        }
        params
    }
}

#[derive(Debug)]
pub struct Instrument {
    base: u8,
    kind: Option<InstrumentKind>,
    params: Vec<Param>,
}

impl Instrument {
    /// A slot whose type is not known yet: string banks only, no
    /// displacement.
    pub fn unknown(base: u8) -> Self {
        Instrument {
            base,
            kind: None,
            params: vec![Strings::new(6, 12, 16), Strings::new(12, -6, 20)],
        }
    }

    pub fn with_kind(base: u8, kind: InstrumentKind) -> Self {
        Instrument { base, kind: Some(kind), params: kind.params() }
    }

    pub fn base(&self) -> u8 {
        self.base
    }

    pub fn kind(&self) -> Option<InstrumentKind> {
        self.kind
    }

    /// The address the type's parameter block starts at.
    pub fn addr(&self) -> u8 {
        self.base + self.kind.map(InstrumentKind::address_offset).unwrap_or(0)
    }

    /// Registry index (0-based), also the bus `instrument` value.
    pub fn index(&self) -> u8 {
        (self.base - SLOT_BASES[0]) / SLOT_WIDTH
    }

    pub fn owns(&self, address: u8) -> bool {
        (self.base..self.base + SLOT_WIDTH).contains(&address)
    }

    /// Read-back burst for every parameter that owns a window.
    pub fn request(&self, out: &mut Vec<SysexFrame>) {
        for param in &self.params {
            param.request(self.addr(), out);
        }
    }

    /// Dispatch a response window to every parameter anchored at `field`.
    pub fn receive(&mut self, field: u8, body: &[u8], out: &mut Vec<Internal>) {
        let index = self.index();
        for param in self.params.iter_mut() {
            if param.origin() == field {
                param.receive(index, body, out);
            }
        }
    }

    /// Encode an outgoing internal command through the matching parameter.
    pub fn send(&mut self, msg: &Internal, out: &mut Vec<SysexFrame>) -> Result<(), SysexError> {
        let base = self.base;
        let addr = self.addr();
        for param in self.params.iter_mut() {
            if param.matches(msg) {
                // string banks write at the slot base, synth params at the
                // type's block
                let instr = if matches!(param, Param::Strings(_)) { base } else { addr };
                param.from_internal(instr, msg, out)?;
            }
        }
        Ok(())
    }
}

/// Ordered slot collection, indexed by registry index or by any address
/// inside a slot's range.
#[derive(Debug)]
pub struct Rack {
    slots: Vec<Instrument>,
}

impl Default for Rack {
    fn default() -> Self {
        Self::new()
    }
}

impl Rack {
    pub fn new() -> Self {
        Rack { slots: SLOT_BASES.iter().map(|b| Instrument::unknown(*b)).collect() }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Resolve by registry index first, then by slot address range.
    pub fn get(&self, idx: u8) -> Option<&Instrument> {
        if (idx as usize) < self.slots.len() {
            return self.slots.get(idx as usize);
        }
        self.slots.iter().find(|i| i.owns(idx))
    }

    pub fn get_mut(&mut self, idx: u8) -> Option<&mut Instrument> {
        if (idx as usize) < self.slots.len() {
            return self.slots.get_mut(idx as usize);
        }
        self.slots.iter_mut().find(|i| i.owns(idx))
    }

    /// Replace the slot covering `idx` with a fresh instance of the
    /// reported type, keeping the slot base.
    pub fn set(&mut self, idx: u8, type_byte: u8) {
        let kind = match InstrumentKind::from_byte(type_byte) {
            Some(kind) => kind,
            None => return,
        };
        if let Some(slot) = self.slots.iter_mut().find(|i| i.owns(idx)) {
            *slot = Instrument::with_kind(slot.base, kind);
        } else if (idx as usize) < self.slots.len() {
            let base = self.slots[idx as usize].base;
            self.slots[idx as usize] = Instrument::with_kind(base, kind);
        }
    }

    /// Instruments addressed by a string controller: 16..=18 and 20..=22
    /// pick one slot, the master knobs 19 and 23 pick all three.
    pub fn select_by_control(&self, control: u8) -> Vec<usize> {
        match control {
            16 | 20 => vec![0],
            17 | 21 => vec![1],
            18 | 22 => vec![2],
            19 | 23 => (0..self.slots.len()).collect(),
            _ => Vec::new(),
        }
    }

    /// Startup readback: slot type + volume, then the string banks.
    pub fn bank_requests(&self, out: &mut Vec<SysexFrame>) {
        for slot in &self.slots {
            let base = slot.base() as u16;
            if let Ok(frame) =
                SysexFrame::request(AddressFamily::Patch, &[base, 1, 0, 0, 0, 2])
            {
                out.push(frame);
            }
            if let Ok(frame) =
                SysexFrame::request(AddressFamily::Patch, &[base, 6, 0, 0, 0, 12])
            {
                out.push(frame);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instrument> {
        self.slots.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dyna_synth_request_covers_its_windows() {
        let instr = Instrument::with_kind(21, InstrumentKind::DynaSynth);
        assert_eq!(instr.addr(), 22);
        assert_eq!(instr.index(), 0);
        let mut reqs = Vec::new();
        instr.request(&mut reqs);
        let addrs: Vec<[u8; 4]> = reqs.iter().map(|f| f.address).collect();
        assert_eq!(
            addrs,
            vec![
                [16, 0, 22, 5],
                [16, 0, 22, 16],
                [16, 0, 22, 29],
                [16, 0, 22, 39],
                [16, 0, 22, 49],
                [16, 0, 22, 59],
            ]
        );
        let offsets: Vec<u8> = reqs.iter().map(|f| f.body[3]).collect();
        assert_eq!(offsets, vec![1, 1, 6, 3, 3, 125]);
    }

    #[test]
    fn shared_window_fans_out_to_every_anchored_param() {
        let mut instr = Instrument::with_kind(21, InstrumentKind::DynaSynth);
        let mut msgs = Vec::new();
        instr.receive(29, &[1, 1, 0, 50, 114, 14], &mut msgs);
        // the bipolar filter plus the three pots sharing its window
        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[1], Internal::Synth { instrument: 0, macro_id: 181, value: 64 });
        assert_eq!(msgs[2], Internal::Synth { instrument: 0, macro_id: 178, value: 127 });
        assert_eq!(msgs[3], Internal::Synth { instrument: 0, macro_id: 182, value: 0 });
    }

    #[test]
    fn rack_resolves_index_and_address() {
        let rack = Rack::new();
        assert_eq!(rack.get(0).unwrap().base(), 21);
        assert_eq!(rack.get(2).unwrap().base(), 43);
        assert_eq!(rack.get(25).unwrap().base(), 21);
        assert_eq!(rack.get(43).unwrap().base(), 43);
        assert_eq!(rack.get(53).unwrap().base(), 43);
        assert!(rack.get(54).is_none());
    }

    #[test]
    fn set_swaps_the_covering_slot_in_place() {
        let mut rack = Rack::new();
        rack.set(33, 0);
        let slot = rack.get(1).unwrap();
        assert_eq!(slot.base(), 32);
        assert_eq!(slot.kind(), Some(InstrumentKind::DynaSynth));
        assert_eq!(slot.addr(), 33);

        // out-of-range type bytes are ignored
        rack.set(33, 9);
        assert_eq!(rack.get(1).unwrap().kind(), Some(InstrumentKind::DynaSynth));
    }

    #[test]
    fn master_knobs_select_every_slot() {
        let rack = Rack::new();
        assert_eq!(rack.select_by_control(16), vec![0]);
        assert_eq!(rack.select_by_control(22), vec![2]);
        assert_eq!(rack.select_by_control(19), vec![0, 1, 2]);
        assert_eq!(rack.select_by_control(23), vec![0, 1, 2]);
    }

    #[test]
    fn bank_requests_cover_type_and_strings() {
        let rack = Rack::new();
        let mut reqs = Vec::new();
        rack.bank_requests(&mut reqs);
        assert_eq!(reqs.len(), 6);
        assert_eq!(reqs[0].address, [16, 0, 21, 1]);
        assert_eq!(reqs[1].address, [16, 0, 21, 6]);
        assert_eq!(reqs[5].address, [16, 0, 43, 6]);
    }
}
