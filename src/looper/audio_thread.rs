//! The looper's real-time half.
//!
//! Owns the phrase buffer and the write cursor. Runs inside the host audio
//! callback: no allocation, no locks, no bus access. Control state arrives
//! as one immutable snapshot per cycle through a shared cell published by
//! the dispatcher.

use basedrop::{Owned, Shared, SharedCell};

use super::mixer::{to_mono, to_stereo};
use super::{LooperParams, TransportFlags, BUS_LEFT, BUS_RIGHT, MAX_BARS, PHRASES, SECONDS_PER_BAR};

/// What the host should do after this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Continue,
    /// The phrase window is exhausted; stop the stream.
    Stop,
}

pub struct LooperAudioThread {
    params: Shared<SharedCell<LooperParams>>,
    /// `PHRASES × max_frames × tracks`, interleaved per frame. Allocated
    /// once at the eight-bar maximum; `bars` only narrows the window.
    buffer: Owned<Vec<f32>>,
    tracks: usize,
    sample_rate: f64,
    max_frames: usize,
    cursor: usize,
    generation: u64,
}

impl LooperAudioThread {
    pub fn new(
        params: Shared<SharedCell<LooperParams>>,
        coll_handle: &basedrop::Handle,
        tracks: usize,
        sample_rate: f64,
    ) -> Self {
        let max_frames = (sample_rate * MAX_BARS as f64 * SECONDS_PER_BAR) as usize;
        let buffer = Owned::new(coll_handle, vec![0.0f32; PHRASES * max_frames * tracks]);
        LooperAudioThread {
            params,
            buffer,
            tracks,
            sample_rate,
            max_frames,
            cursor: 0,
            generation: 0,
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// One host cycle over interleaved `frames × tracks` buffers.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) -> ProcessStatus {
        let params = self.params.get();
        if params.generation != self.generation {
            self.generation = params.generation;
            self.cursor = 0;
        }

        let tracks = self.tracks;
        let frames = output.len() / tracks;
        let maxsize = params.maxsize(self.sample_rate).min(self.max_frames);
        if maxsize <= self.cursor {
            return ProcessStatus::Stop;
        }
        let remaining = maxsize - self.cursor;
        let offset = frames.min(remaining);

        let playing = params.flags.contains(TransportFlags::PLAY);
        let recording = params.flags.contains(TransportFlags::RECORD);
        let phrase_base = params.phrase * self.max_frames * tracks;

        for f in 0..frames {
            let in_window = f < offset;
            let buf_frame = phrase_base + (self.cursor + f) * tracks;
            for ch in 0..tracks {
                let i = f * tracks + ch;
                let dry = input.get(i).copied().unwrap_or(0.0);

                // read the loop sample before an overdub pass overwrites it
                let wet = if playing && in_window { self.buffer[buf_frame + ch] } else { 0.0 };
                if recording && in_window {
                    self.buffer[buf_frame + ch] = dry;
                }

                let fader = &params.faders[ch];
                let mix = match ch {
                    BUS_LEFT => wet * fader.volume * (1.0 - fader.pan),
                    BUS_RIGHT => wet * fader.volume * fader.pan,
                    _ => {
                        let (l, r) = to_stereo(wet, fader.pan);
                        to_mono(l, r, params.master_x) * fader.volume
                    }
                };
                output[i] = mix + dry;
            }
        }

        self.cursor += offset;
        if self.cursor >= maxsize {
            self.cursor = 0;
        }
        ProcessStatus::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::looper::LooperHandle;
    use approx::assert_abs_diff_eq;

    // A tiny fake sample rate keeps the phrase buffer small; the window
    // formula itself is exercised against real rates in `LooperParams`.
    const RATE: f64 = 1_000.0;
    const TRACKS: usize = 8;

    fn rig(bars: u8) -> (LooperHandle, LooperAudioThread) {
        let handle = LooperHandle::new(TRACKS, bars);
        let audio =
            LooperAudioThread::new(handle.shared(), &handle.coll_handle(), TRACKS, RATE);
        (handle, audio)
    }

    fn run(audio: &mut LooperAudioThread, input: f32, frames: usize) -> Vec<f32> {
        let inbuf = vec![input; frames * TRACKS];
        let mut outbuf = vec![0.0f32; frames * TRACKS];
        assert_eq!(audio.process(&inbuf, &mut outbuf), ProcessStatus::Continue);
        outbuf
    }

    #[test]
    fn cursor_advances_and_wraps_at_the_window() {
        let (mut handle, mut audio) = rig(2);
        handle.apply_start();
        let maxsize = handle.params().maxsize(RATE);
        run(&mut audio, 0.0, 100);
        assert_eq!(audio.cursor(), 100);
        // a callback crossing the window end clips to it and wraps
        run(&mut audio, 0.0, maxsize - 50);
        assert_eq!(audio.cursor(), 0);
    }

    #[test]
    fn streaming_passes_input_through_unchanged() {
        let (mut handle, mut audio) = rig(2);
        handle.set_volume(0, 127);
        handle.apply_start();
        let out = run(&mut audio, 1.0, 64);
        for sample in out {
            assert_abs_diff_eq!(sample, 1.0);
        }
    }

    #[test]
    fn record_then_play_single_phrase() {
        let (mut handle, mut audio) = rig(2);
        // unity mixer path: pan hard left, crossfade hard left
        for t in 0..TRACKS as u8 {
            handle.set_pan(t, 0);
        }
        handle.set_master(0);
        handle.rec();
        handle.apply_start();
        let maxsize = handle.params().maxsize(RATE);

        // record one full phrase of DC
        run(&mut audio, 1.0, maxsize);
        assert_eq!(audio.cursor(), 0);

        handle.play();
        handle.apply_start();
        let out = run(&mut audio, 0.0, maxsize);
        for f in 0..maxsize {
            for ch in 0..6 {
                assert_abs_diff_eq!(out[f * TRACKS + ch], 1.0, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn playback_stays_silent_beyond_the_recorded_window() {
        let (mut handle, mut audio) = rig(1);
        for t in 0..TRACKS as u8 {
            handle.set_pan(t, 0);
        }
        handle.set_master(0);
        handle.rec();
        handle.apply_start();
        let maxsize = handle.params().maxsize(RATE);
        run(&mut audio, 1.0, maxsize);

        handle.play();
        handle.apply_start();
        // play half the phrase, then a callback that crosses the end:
        // frames past the window must be silent
        run(&mut audio, 0.0, maxsize - 10);
        let out = run(&mut audio, 0.0, 20);
        for f in 0..20 {
            let expected = if f < 10 { 1.0 } else { 0.0 };
            assert_abs_diff_eq!(out[f * TRACKS], expected, epsilon = 1e-6);
        }
    }

    #[test]
    fn crossfader_split_matches_the_pan_law() {
        let (mut handle, mut audio) = rig(1);
        handle.rec();
        handle.apply_start();
        let maxsize = handle.params().maxsize(RATE);
        run(&mut audio, 1.0, maxsize);

        handle.overdub(true);
        handle.apply_start();
        handle.set_master(32); // 32/127 ≈ 0.25
        let x = 32.0 / 127.0;
        let out = run(&mut audio, 1.0, 32);
        // track 0: dry + vol · to_mono(to_stereo(1, 0.5), x)
        let expected = 1.0 + (0.5 * (1.0 - x) + 0.5 * x);
        assert_abs_diff_eq!(out[0], expected, epsilon = 1e-6);
    }

    #[test]
    fn bus_tracks_split_by_pan_without_the_crossfade() {
        let (mut handle, mut audio) = rig(1);
        handle.rec();
        handle.apply_start();
        let maxsize = handle.params().maxsize(RATE);
        run(&mut audio, 1.0, maxsize);

        handle.play();
        handle.apply_start();
        handle.set_pan(BUS_LEFT as u8, 32);
        handle.set_pan(BUS_RIGHT as u8, 32);
        let pan = 32.0 / 127.0;
        let out = run(&mut audio, 0.0, 16);
        assert_abs_diff_eq!(out[BUS_LEFT], 1.0 - pan, epsilon = 1e-6);
        assert_abs_diff_eq!(out[BUS_RIGHT], pan, epsilon = 1e-6);
        // the pair sums to the recorded signal at unity volume
        assert_abs_diff_eq!(out[BUS_LEFT] + out[BUS_RIGHT], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn bars_resize_the_window_at_the_next_start() {
        let (mut handle, mut audio) = rig(2);
        handle.apply_start();
        let two_bars = handle.params().maxsize(RATE);
        handle.set_bars(4);
        // mid-phrase the callback still sees the two-bar window
        run(&mut audio, 0.0, 10);
        assert_eq!(handle.params().maxsize(RATE), two_bars);
        handle.apply_start();
        assert_eq!(handle.params().maxsize(RATE), two_bars * 2);
        // generation bump rewound the cursor
        run(&mut audio, 0.0, 10);
        assert_eq!(audio.cursor(), 10);
    }

    #[test]
    fn each_phrase_owns_its_audio() {
        let (mut handle, mut audio) = rig(1);
        for t in 0..TRACKS as u8 {
            handle.set_pan(t, 0);
        }
        handle.set_master(0);
        handle.rec();
        handle.apply_start();
        let maxsize = handle.params().maxsize(RATE);
        run(&mut audio, 1.0, maxsize);

        handle.phrase_offset(1);
        handle.play();
        handle.apply_start();
        let out = run(&mut audio, 0.0, 32);
        // phrase 1 was never recorded
        for sample in out {
            assert_abs_diff_eq!(sample, 0.0);
        }

        handle.phrase_offset(-1);
        handle.apply_start();
        let out = run(&mut audio, 0.0, 32);
        assert_abs_diff_eq!(out[0], 1.0, epsilon = 1e-6);
    }
}
