//! The control-surface adapter.
//!
//! Translates pad and fader gestures into internal messages and reflects
//! bus state back onto the surface's LEDs. Surface-local state lives in a
//! block tree rooted at the instrument navigator: page 0 is the mixer,
//! pages 1..=3 one instrument slot each, every page carrying a knob block,
//! a paged step block with a length bar, and the sequencer-target pads.

use std::time::Instant;

use fnv::FnvHashSet;
use smallvec::SmallVec;

use crate::blocks::Block;
use crate::bridge::{Device, Outbox};
use crate::midi_io::MidiPort;
use crate::msg::{Internal, Message};
use crate::util::clip;

/// Two presses of the shutdown pad within this window complete the bus.
const DOUBLE_CLICK: std::time::Duration = std::time::Duration::from_millis(400);

/// Sequencer-target pad pairs, one per grid: (seq 1 pad, seq 2 pad).
const TARGET_PAIRS: [(u8, u8); 3] = [(82, 83), (84, 85), (86, 81)];

const BEAT_LED: u8 = 63;
const START_LED: u8 = 65;
const TRANSPORT_LED: u8 = 62;

pub struct ControlSurface {
    port: Option<MidiPort>,
    blocks: Block,
    blinks: FnvHashSet<u8>,
    blink_on: bool,
    start_lit: bool,
    channel: u8,
    bars: u8,
    overdub: bool,
    shutdown_at: Option<Instant>,
    /// Which grid target each instrument page is editing.
    selected_target: [u8; 3],
    /// Last full step readback per instrument page and grid.
    steps_cache: [[Option<SmallVec<[u8; 16]>>; 3]; 3],
}

fn surface_tree() -> Block {
    Block::nav(
        "instr",
        87,
        4,
        vec![
            Block::cc("synth", 48, 8),
            Block::pager(59, vec![Block::pads("step", 53, (5, 16)), Block::stack("length", 52, 16)]),
            Block::pads("target", 81, (6, 1)),
        ],
    )
}

impl ControlSurface {
    pub fn new(port: Option<MidiPort>) -> Self {
        let mut blocks = surface_tree();
        blocks.update(87, 0, Some(127));
        ControlSurface {
            port,
            blocks,
            blinks: [BEAT_LED].into_iter().collect(),
            blink_on: false,
            start_lit: false,
            channel: 0,
            bars: 2,
            overdub: false,
            shutdown_at: None,
            selected_target: [0; 3],
            steps_cache: Default::default(),
        }
    }

    pub fn wire_filter() -> Box<dyn Fn(&Message) -> bool + Send> {
        Box::new(|msg| {
            matches!(
                msg,
                Message::ControlChange { .. } | Message::NoteOn { .. } | Message::NoteOff { .. }
            )
        })
    }

    fn page(&self) -> usize {
        self.blocks.page()
    }

    fn bars_row(&self, bars: u8, out: &mut Outbox) {
        for ch in 0..8u8 {
            out.push(Message::note(ch, 50, if ch < bars { 127 } else { 0 }));
        }
    }

    fn repaint(&self, out: &mut Outbox) {
        let mut leds = Vec::new();
        self.blocks.current(&mut leds);
        for led in leds {
            out.push(led);
        }
    }

    fn repaint_steps(&mut self, out: &mut Outbox) {
        let page = self.page();
        if page == 0 {
            return;
        }
        let instr = page - 1;
        let target = self.selected_target[instr] as usize;
        let counts = match &self.steps_cache[instr][target] {
            Some(counts) => counts.clone(),
            None => return,
        };
        if let Some(step) = self.blocks.find_mut(page, 53) {
            let rows = step.rows() as u8;
            for (col, count) in counts.iter().enumerate() {
                for r in 0..rows {
                    let lit = *count >= rows - r;
                    step.update_absolute(r, col, if lit { 127 } else { 0 });
                }
            }
            let mut leds = Vec::new();
            step.current(&mut leds);
            for led in leds {
                out.push(led);
            }
        }
    }

    fn control_change(&mut self, channel: u8, control: u8, value: u8, out: &mut Outbox) {
        match control {
            7 => out.push(Internal::Volume { track: channel, value }),
            14 => {
                for track in 0..8 {
                    out.push(Internal::Volume { track, value });
                }
            }
            15 => out.push(Internal::Xfader(value)),
            16..=23 => self.strings_input(channel, control, value, out),
            48..=55 => {
                let page = self.page();
                let macro_id = 128 + control;
                if let Some(block) = self.blocks.find_mut(page, macro_id) {
                    block.update(macro_id, 0, Some(value));
                    if let Some(msg) = block.cc_internal(page, macro_id, value) {
                        out.push(msg);
                    }
                }
            }
            64 => out.push(Internal::Toggle),
            67 => out.push(Internal::Stop),
            _ => {}
        }
    }

    fn strings_input(&mut self, channel: u8, control: u8, value: u8, out: &mut Outbox) {
        // channels 6 and 7 are the output-bus aliases, never forwarded
        if channel == 6 || channel == 7 {
            return;
        }
        out.push(Internal::Strings { channel, control, value });

        // LED fan-out: the master channel mirrors onto all six strings and
        // the master knobs (19, 23) onto their three sub-controls
        let mut channels: SmallVec<[u8; 7]> = SmallVec::new();
        channels.push(channel);
        if channel == 8 {
            channels.extend(0..6);
        }
        let controls: SmallVec<[u8; 3]> = if control == 19 || control == 23 {
            (control - 3..control).collect()
        } else {
            [control].into_iter().collect()
        };
        for ch in channels {
            for ctl in controls.iter() {
                if *ctl != control || ch != channel {
                    out.push(Message::cc(ch, *ctl, value));
                }
            }
        }
    }

    fn note_on(&mut self, channel: u8, note: u8, velocity: u8, out: &mut Outbox) {
        match note {
            48 | 49 => {
                if channel == 7 {
                    for ch in 0..7 {
                        out.push(Message::note(ch, note, velocity));
                    }
                }
            }
            50 => {
                let bars = channel + 1;
                self.bars = bars;
                out.push(Internal::Bars(bars));
                self.bars_row(bars, out);
            }
            52 => self.length_input(channel, out),
            53..=57 => self.step_input(note, channel, out),
            58 | 59 => {
                let page = self.page();
                if let Some(pager) = self.blocks.find_mut(page, note) {
                    let mut leds = Vec::new();
                    if note == 59 {
                        pager.next(&mut leds);
                    } else {
                        pager.previous(&mut leds);
                    }
                    for led in leds {
                        out.push(led);
                    }
                }
            }
            64 => {
                self.overdub = !self.overdub;
                out.push(Internal::Overdub(self.overdub));
                out.push(Message::note(0, 64, if self.overdub { 127 } else { 0 }));
            }
            81..=86 => self.target_input(note, out),
            87..=90 => {
                self.blocks.update(note, 0, Some(127));
                self.repaint(out);
                self.repaint_steps(out);
            }
            91 => {
                self.blinks.remove(&TRANSPORT_LED);
                out.push(Internal::Play);
                for ch in 0..9 {
                    out.push(Message::note(ch, TRANSPORT_LED, 127));
                }
            }
            92 => {
                self.blinks.remove(&TRANSPORT_LED);
                out.push(Internal::Stop);
                for ch in 0..9 {
                    out.push(Message::note(ch, TRANSPORT_LED, 0));
                }
            }
            93 => {
                self.blinks.insert(TRANSPORT_LED);
                out.push(Internal::Rec);
            }
            94 => out.push(Internal::Patch(-1)),
            95 => out.push(Internal::Patch(1)),
            96 => out.push(Internal::Patch(4)),
            97 => out.push(Internal::Patch(-4)),
            98 => {
                if velocity == 127 {
                    self.shutdown_click(out);
                }
            }
            100 => out.push(Internal::Phrase(1)),
            101 => out.push(Internal::Phrase(-1)),
            _ => {}
        }
    }

    fn note_off(&mut self, channel: u8, note: u8, out: &mut Outbox) {
        // pads light while held; re-light the ones whose cell stayed on
        let page = self.page();
        match note {
            52..=57 | 81..=90 => {
                if let Some(block) = self.blocks.find(page, note) {
                    if block.value_at(note, if note <= 57 { channel } else { 0 }) > 0 {
                        out.push(Message::note(channel, note, 127));
                    }
                }
            }
            _ => {}
        }
    }

    fn length_input(&mut self, channel: u8, out: &mut Outbox) {
        let page = self.page();
        if page == 0 {
            return;
        }
        if let Some(stack) = self.blocks.find_mut(page, 52) {
            stack.update(52, channel, None);
            let value = stack.value_at(52, 0);
            let mut leds = Vec::new();
            stack.current(&mut leds);
            for led in leds {
                out.push(led);
            }
            out.push(Internal::Length {
                instrument: (page - 1) as u8,
                macro_id: 85,
                value,
            });
        }
    }

    fn step_input(&mut self, note: u8, channel: u8, out: &mut Outbox) {
        let page = self.page();
        if page == 0 {
            return;
        }
        let instr = (page - 1) as u8;
        let target = 82 + self.selected_target[instr as usize];
        if let Some(step) = self.blocks.find_mut(page, note) {
            step.update(note, channel, None);
            let value = step.value_at(note, channel);
            let col = (step.cursor() + channel as usize) as u8;
            out.push(Message::note(channel, note, value));
            out.push(Internal::Step {
                instrument: instr,
                macro_id: 53,
                target,
                row: note - 53,
                col,
                value,
            });
        }
    }

    fn target_input(&mut self, note: u8, out: &mut Outbox) {
        let page = self.page();
        if page == 0 {
            return;
        }
        let instr = (page - 1) as usize;
        let (grid, pos, other) = match TARGET_PAIRS.iter().enumerate().find_map(|(g, (a, b))| {
            if *a == note {
                Some((g, 1u8, *b))
            } else if *b == note {
                Some((g, 2u8, *a))
            } else {
                None
            }
        }) {
            Some(found) => found,
            None => return,
        };
        self.selected_target[instr] = grid as u8;
        if let Some(block) = self.blocks.find_mut(page, note) {
            let was_on = block.value_at(note, 0) > 0;
            block.update(other, 0, Some(0));
            block.update(note, 0, Some(if was_on { 0 } else { 127 }));
            out.push(Message::note(0, other, 0));
            out.push(Message::note(0, note, if was_on { 0 } else { 127 }));
            out.push(Internal::Target {
                instrument: instr as u8,
                target: grid as u8,
                value: if was_on { 0 } else { pos },
            });
        }
        self.repaint_steps(out);
    }

    fn shutdown_click(&mut self, out: &mut Outbox) {
        match self.shutdown_at {
            Some(t0) if t0.elapsed() < DOUBLE_CLICK => {
                log::info!("[ctl] shutdown double-click");
                out.shutdown();
            }
            _ => self.shutdown_at = Some(Instant::now()),
        }
    }

    // -- reflections ------------------------------------------------------

    fn beat_in(&mut self, out: &mut Outbox) {
        self.blink_on = !self.blink_on;
        let velocity = if self.blink_on { 127 } else { 0 };
        for note in self.blinks.iter() {
            out.push(Message::note(self.channel, *note, velocity));
        }
        if self.start_lit {
            self.start_lit = false;
            out.push(Message::note(0, START_LED, 0));
        }
    }

    fn start_in(&mut self, out: &mut Outbox) {
        out.push(Message::note(0, START_LED, 127));
        self.beat_in(out);
        // cleared by the next beat
        self.start_lit = true;
    }

    fn strings_in(&mut self, instrument: u8, values: &[u8], out: &mut Outbox) {
        for (i, value) in values.iter().enumerate().take(12) {
            let channel = (i % 6) as u8;
            let control = if i < 6 { 16 + instrument } else { 20 + instrument };
            out.push(Message::cc(channel, control, clip(*value as f32 / 100.0 * 127.0, 0, 127) as u8));
        }
    }

    fn synth_in(&mut self, instrument: u8, macro_id: u8, value: u8, out: &mut Outbox) {
        let page = instrument as usize + 1;
        if let Some(block) = self.blocks.find_mut(page, macro_id) {
            block.update(macro_id, 0, Some(value));
        }
        if page == self.page() && macro_id >= 128 {
            out.push(Message::cc(0, macro_id - 128, value));
        }
    }

    fn steps_in(&mut self, instrument: u8, target: u8, counts: &SmallVec<[u8; 16]>, out: &mut Outbox) {
        let instr = instrument as usize;
        let grid = (target.saturating_sub(82)) as usize;
        if instr < 3 && grid < 3 {
            self.steps_cache[instr][grid] = Some(counts.clone());
            if self.page() == instr + 1 && self.selected_target[instr] == grid as u8 {
                self.repaint_steps(out);
            }
        }
    }

    fn target_in(&mut self, instrument: u8, target: u8, value: u8, out: &mut Outbox) {
        let instr = instrument as usize;
        if instr >= 3 || target as usize >= TARGET_PAIRS.len() {
            return;
        }
        if value > 0 {
            self.selected_target[instr] = target;
        }
        let page = instr + 1;
        let (a, b) = TARGET_PAIRS[target as usize];
        if let Some(block) = self.blocks.find_mut(page, a.min(b)) {
            block.update(a, 0, Some(if value == 1 { 127 } else { 0 }));
            block.update(b, 0, Some(if value == 2 { 127 } else { 0 }));
        }
        if page == self.page() {
            out.push(Message::note(0, a, if value == 1 { 127 } else { 0 }));
            out.push(Message::note(0, b, if value == 2 { 127 } else { 0 }));
        }
    }

    fn seq_in(&mut self, instrument: u8, macro_id: u8, value: u8, out: &mut Outbox) {
        // one length bar on the surface; it tracks the first sequencer
        if macro_id != 85 {
            return;
        }
        let page = instrument as usize + 1;
        let current_page = self.page();
        if let Some(stack) = self.blocks.find_mut(page, 52) {
            stack.set_fill(value as usize);
            if page == current_page {
                let mut leds = Vec::new();
                stack.current(&mut leds);
                for led in leds {
                    out.push(led);
                }
            }
        }
    }
}

impl Device for ControlSurface {
    fn name(&self) -> &str {
        "control"
    }

    fn select_message(&self, msg: &Message) -> bool {
        matches!(
            msg,
            Message::ControlChange { .. } | Message::NoteOn { .. } | Message::NoteOff { .. }
        )
    }

    fn external_message(&self, msg: &Message) -> bool {
        matches!(
            msg,
            Message::Internal(
                Internal::Beat(_)
                    | Internal::Start(_)
                    | Internal::StringValues { .. }
                    | Internal::Synth { .. }
                    | Internal::Steps { .. }
                    | Internal::Target { .. }
                    | Internal::Seq { .. }
            )
        )
    }

    fn init_actions(&mut self, out: &mut Outbox) {
        for ch in 0..8u8 {
            out.push(Message::cc(ch, 7, 127));
            for ctl in 16..20 {
                out.push(Message::cc(ch, ctl, 127));
            }
            for ctl in (20..24).chain(48..56) {
                out.push(Message::cc(ch, ctl, 64));
            }
            for note in [48, 49] {
                out.push(Message::note(ch, note, 127));
            }
        }
        out.push(Message::cc(0, 14, 127));
        out.push(Message::cc(0, 15, 64));
        for ctl in 16..20 {
            out.push(Message::cc(8, ctl, 127));
        }
        for ctl in 20..24 {
            out.push(Message::cc(8, ctl, 64));
        }
        out.push(Internal::Bars(self.bars));
        self.bars_row(self.bars, out);
        self.repaint(out);
    }

    fn receive(&mut self, msg: &Message, out: &mut Outbox) {
        match msg {
            Message::ControlChange { channel, control, value } => {
                self.control_change(*channel, *control, *value, out)
            }
            Message::NoteOn { channel, note, velocity } => {
                self.note_on(*channel, *note, *velocity, out)
            }
            Message::NoteOff { channel, note, .. } => self.note_off(*channel, *note, out),
            Message::Internal(internal) => match internal {
                Internal::Beat(_) => self.beat_in(out),
                Internal::Start(_) => self.start_in(out),
                Internal::StringValues { instrument, values } => {
                    self.strings_in(*instrument, values, out)
                }
                Internal::Synth { instrument, macro_id, value } => {
                    self.synth_in(*instrument, *macro_id, *value, out)
                }
                Internal::Steps { instrument, target, counts, .. } => {
                    self.steps_in(*instrument, *target, counts, out)
                }
                Internal::Target { instrument, target, value } => {
                    self.target_in(*instrument, *target, *value, out)
                }
                Internal::Seq { instrument, macro_id, value } => {
                    self.seq_in(*instrument, *macro_id, *value, out)
                }
                _ => {}
            },
            _ => {}
        }
    }

    fn send(&mut self, msg: Message) -> Option<Message> {
        if msg.is_internal() {
            return Some(msg);
        }
        if let Some(port) = self.port.as_mut() {
            port.send(&msg);
        }
        None
    }

    fn channel_focus(&mut self, channel: u8) {
        log::debug!("[ctl] channel focus {}", channel);
        self.channel = channel;
    }

    fn close(&mut self) {
        self.port = None;
    }
}
