//! The phrase looper.
//!
//! Sixteen phrases of multi-track audio live in one buffer allocated at the
//! eight-bar maximum and logically windowed by the current bar count.
//! Transport state, phrase selection and the mixer are published by the
//! dispatcher as an immutable snapshot; the audio callback reads one
//! snapshot per cycle and owns the write cursor. Transport and phrase
//! changes are queued on the handle and only reach the snapshot at the next
//! phrase boundary, so the loop never tears mid-phrase.

pub mod audio_thread;
pub mod mixer;

use basedrop::{Collector, Handle, Shared, SharedCell};
use bitflags::bitflags;

use crate::util::{minmax, scroll};

pub const PHRASES: usize = 16;
pub const MAX_BARS: u8 = 8;
/// Seconds per bar at the slowest supported tempo (4 beats × 60 s / 40 BPM).
pub const SECONDS_PER_BAR: f64 = 6.0;
/// Tracks 6 and 7 form the stereo output bus.
pub const BUS_LEFT: usize = 6;
pub const BUS_RIGHT: usize = 7;

bitflags! {
    pub struct TransportFlags: u32 {
        const PLAY    = 1 << 0;
        const RECORD  = 1 << 1;
        const OVERDUB = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fader {
    pub volume: f32,
    pub pan: f32,
}

impl Default for Fader {
    fn default() -> Self {
        Fader { volume: 1.0, pan: 0.5 }
    }
}

/// One immutable control snapshot, published whole.
#[derive(Debug, Clone)]
pub struct LooperParams {
    pub flags: TransportFlags,
    pub phrase: usize,
    pub bars: u8,
    pub faders: Vec<Fader>,
    pub master_x: f32,
    /// Bumped on every phrase boundary; tells the callback to rewind.
    pub generation: u64,
}

impl LooperParams {
    fn new(tracks: usize, bars: u8) -> Self {
        LooperParams {
            flags: TransportFlags::empty(),
            phrase: 0,
            bars,
            faders: vec![Fader::default(); tracks],
            master_x: 0.5,
            generation: 0,
        }
    }

    /// Frames in the logical phrase window.
    pub fn maxsize(&self, sample_rate: f64) -> usize {
        (sample_rate * self.bars as f64 * SECONDS_PER_BAR) as usize
    }
}

/// Dispatcher-side looper state: pending transitions plus the publish cell.
pub struct LooperHandle {
    cell: Shared<SharedCell<LooperParams>>,
    collector: Collector,
    current: LooperParams,
    pending_flags: Option<TransportFlags>,
    pending_phrase: i32,
    pending_bars: Option<u8>,
}

impl LooperHandle {
    pub fn new(tracks: usize, bars: u8) -> Self {
        let collector = Collector::new();
        let params = LooperParams::new(tracks, bars);
        let cell = Shared::new(
            &collector.handle(),
            SharedCell::new(Shared::new(&collector.handle(), params.clone())),
        );
        LooperHandle {
            cell,
            collector,
            current: params,
            pending_flags: None,
            pending_phrase: 0,
            pending_bars: None,
        }
    }

    pub fn coll_handle(&self) -> Handle {
        self.collector.handle()
    }

    /// The cell the audio thread reads its snapshots from.
    pub fn shared(&self) -> Shared<SharedCell<LooperParams>> {
        Shared::clone(&self.cell)
    }

    pub fn params(&self) -> &LooperParams {
        &self.current
    }

    fn flags(&self) -> TransportFlags {
        self.pending_flags.unwrap_or(self.current.flags)
    }

    fn queue_flags(&mut self, flags: TransportFlags) {
        self.pending_flags = Some(flags);
    }

    // -- phrase-aligned transitions --------------------------------------

    pub fn play(&mut self) {
        let mut flags = self.flags();
        flags.insert(TransportFlags::PLAY);
        if !flags.contains(TransportFlags::OVERDUB) {
            flags.remove(TransportFlags::RECORD);
        }
        self.queue_flags(flags);
    }

    pub fn rec(&mut self) {
        let mut flags = self.flags();
        flags.insert(TransportFlags::RECORD);
        if !flags.contains(TransportFlags::OVERDUB) {
            flags.remove(TransportFlags::PLAY);
        }
        self.queue_flags(flags);
    }

    pub fn stop(&mut self) {
        self.queue_flags(TransportFlags::empty());
    }

    pub fn toggle(&mut self) {
        let mut flags = self.flags();
        flags.remove(TransportFlags::OVERDUB);
        flags.toggle(TransportFlags::PLAY);
        if !flags.contains(TransportFlags::PLAY) {
            flags.insert(TransportFlags::RECORD);
        } else {
            flags.remove(TransportFlags::RECORD);
        }
        self.queue_flags(flags);
    }

    pub fn overdub(&mut self, on: bool) {
        let flags = if on {
            TransportFlags::OVERDUB | TransportFlags::PLAY | TransportFlags::RECORD
        } else {
            TransportFlags::PLAY
        };
        self.queue_flags(flags);
    }

    pub fn phrase_offset(&mut self, offset: i8) {
        self.pending_phrase += offset as i32;
    }

    pub fn set_bars(&mut self, bars: u8) {
        self.pending_bars = Some(bars.clamp(1, MAX_BARS));
    }

    // -- immediate mixer updates -----------------------------------------

    pub fn set_volume(&mut self, track: u8, value: u8) {
        if let Some(fader) = self.current.faders.get_mut(track as usize) {
            fader.volume = minmax(value as f32 / 127.0, 0.0, 1.0);
            self.publish(false);
        }
    }

    pub fn set_pan(&mut self, track: u8, value: u8) {
        if let Some(fader) = self.current.faders.get_mut(track as usize) {
            fader.pan = minmax(value as f32 / 127.0, 0.0, 1.0);
            self.publish(false);
        }
    }

    pub fn set_master(&mut self, value: u8) {
        self.current.master_x = minmax(value as f32 / 127.0, 0.0, 1.0);
        self.publish(false);
    }

    /// A phrase boundary: apply everything queued and rewind the callback.
    pub fn apply_start(&mut self) {
        if let Some(flags) = self.pending_flags.take() {
            self.current.flags = flags;
        }
        if let Some(bars) = self.pending_bars.take() {
            self.current.bars = bars;
        }
        if self.pending_phrase != 0 {
            let phrase = self.current.phrase as i32 + self.pending_phrase;
            self.current.phrase = scroll(phrase, 0, PHRASES as i32 - 1) as usize;
            self.pending_phrase = 0;
        }
        self.publish(true);
    }

    fn publish(&mut self, bump: bool) {
        if bump {
            self.current.generation += 1;
        }
        self.cell.set(Shared::new(&self.collector.handle(), self.current.clone()));
        self.collector.collect();
    }
}
