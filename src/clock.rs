//! The master clock.
//!
//! Consumes wire MIDI clock (24 pulses per quarter-note) from the synth
//! port and publishes phrase-aligned internal events: `start` when the
//! pulse counter wraps to zero, `beat` on every quarter-note, `end`
//! once per phrase inside its final 1/32. A phrase is `bars × 96` pulses.
//!
//! `bars` changes are deferred to the next beat, so a phrase never changes
//! length mid-beat; consumers that need phrase alignment (the looper)
//! defer further, to the next `start`.

use crate::bridge::{Device, Outbox};
use crate::msg::{Internal, Message};
use crate::util::clip;

pub const PULSES_PER_BEAT: u32 = 24;
pub const BEATS_PER_BAR: u32 = 4;

pub struct Clock {
    bars: u8,
    counter: i64,
    pending_bars: Option<u8>,
    end_sent: bool,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new(2)
    }
}

impl Clock {
    pub fn new(bars: u8) -> Self {
        Clock {
            bars: clip(bars as f32, 1, 8) as u8,
            counter: -1,
            pending_bars: None,
            end_sent: false,
        }
    }

    pub fn bars(&self) -> u8 {
        self.bars
    }

    pub fn counter(&self) -> i64 {
        self.counter
    }

    /// Pulses in one phrase at the current bar count.
    fn phrase_len(&self) -> i64 {
        (self.bars as i64) * (PULSES_PER_BEAT * BEATS_PER_BAR) as i64
    }

    /// Width of the end window: 1/32 of the phrase, rounded up.
    fn end_window(&self) -> i64 {
        let len = self.phrase_len();
        (len + 31) / 32
    }

    fn pulse(&mut self, out: &mut Outbox) {
        self.counter = (self.counter + 1) % self.phrase_len();

        if self.counter == 0 {
            self.restart(out);
            return;
        }
        if self.counter % PULSES_PER_BEAT as i64 == 0 {
            if let Some(bars) = self.pending_bars.take() {
                self.bars = bars;
                if self.counter >= self.phrase_len() {
                    self.counter %= self.phrase_len();
                }
            }
            out.push(Internal::Beat(self.bars));
        }
        if !self.end_sent && self.phrase_len() - self.counter <= self.end_window() {
            self.end_sent = true;
            out.push(Internal::End(self.bars));
        }
    }

    fn restart(&mut self, out: &mut Outbox) {
        self.counter = 0;
        self.end_sent = false;
        out.push(Internal::Start(self.bars));
    }
}

impl Device for Clock {
    fn name(&self) -> &str {
        "clock"
    }

    fn select_message(&self, msg: &Message) -> bool {
        matches!(msg, Message::Clock | Message::Start | Message::Stop)
    }

    fn external_message(&self, msg: &Message) -> bool {
        matches!(msg, Message::Internal(Internal::Bars(_)))
    }

    fn receive(&mut self, msg: &Message, out: &mut Outbox) {
        match msg {
            Message::Clock => self.pulse(out),
            Message::Start => self.restart(out),
            Message::Stop => out.push(Internal::Stop),
            Message::Internal(Internal::Bars(bars)) => {
                self.pending_bars = Some(clip(*bars as f32, 1, 8) as u8);
            }
            _ => {}
        }
    }

    fn send(&mut self, _msg: Message) -> Option<Message> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::Outbox;
    use crate::msg::{Internal, Message};

    fn events(clock: &mut Clock, pulses: usize) -> Vec<Internal> {
        let mut all = Vec::new();
        for _ in 0..pulses {
            let mut out = Outbox::default();
            clock.receive(&Message::Clock, &mut out);
            for msg in out.messages {
                if let Message::Internal(i) = msg {
                    all.push(i);
                }
            }
        }
        all
    }

    fn count<F: Fn(&Internal) -> bool>(events: &[Internal], f: F) -> usize {
        events.iter().filter(|e| f(e)).count()
    }

    #[test]
    fn one_start_then_a_beat_every_24_pulses() {
        let mut clock = Clock::new(2);
        let ev = events(&mut clock, 96);
        assert_eq!(count(&ev, |e| matches!(e, Internal::Start(_))), 1);
        assert_eq!(count(&ev, |e| matches!(e, Internal::Beat(_))), 3);
    }

    #[test]
    fn exactly_one_end_per_phrase() {
        let mut clock = Clock::new(2);
        // two full phrases of 192 pulses
        let ev = events(&mut clock, 384);
        assert_eq!(count(&ev, |e| matches!(e, Internal::End(_))), 2);
        assert_eq!(count(&ev, |e| matches!(e, Internal::Start(_))), 2);
    }

    #[test]
    fn end_lands_in_the_final_thirtysecond() {
        let mut clock = Clock::new(1);
        // phrase is 96 pulses, window is the last 3
        let ev = events(&mut clock, 93);
        assert_eq!(count(&ev, |e| matches!(e, Internal::End(_))), 0);
        let ev = events(&mut clock, 1);
        assert_eq!(count(&ev, |e| matches!(e, Internal::End(_))), 1);
    }

    #[test]
    fn wire_start_resets_mid_phrase() {
        let mut clock = Clock::new(2);
        events(&mut clock, 50);
        let mut out = Outbox::default();
        clock.receive(&Message::Start, &mut out);
        assert!(out
            .messages
            .iter()
            .any(|m| matches!(m, Message::Internal(Internal::Start(2)))));
        assert_eq!(clock.counter(), 0);
        // the next 96 pulses complete the restarted phrase
        let ev = events(&mut clock, 96);
        assert_eq!(count(&ev, |e| matches!(e, Internal::Beat(_))), 3);
    }

    #[test]
    fn bars_change_waits_for_the_next_beat() {
        let mut clock = Clock::new(2);
        events(&mut clock, 10);
        let mut out = Outbox::default();
        clock.receive(&Message::Internal(Internal::Bars(4)), &mut out);
        assert_eq!(clock.bars(), 2);
        // the rest of the current beat keeps the old bar count
        events(&mut clock, 14);
        assert_eq!(clock.bars(), 2);
        // pulse 24 is the next beat: the new count applies and is reported
        let ev = events(&mut clock, 1);
        assert_eq!(ev, vec![Internal::Beat(4)]);
        assert_eq!(clock.bars(), 4);
    }

    #[test]
    fn stop_is_forwarded_without_touching_the_counter() {
        let mut clock = Clock::new(2);
        events(&mut clock, 30);
        let before = clock.counter();
        let mut out = Outbox::default();
        clock.receive(&Message::Stop, &mut out);
        assert_eq!(out.messages.as_slice(), &[Message::Internal(Internal::Stop)]);
        assert_eq!(clock.counter(), before);
    }
}
