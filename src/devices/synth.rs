//! The synth adapter.
//!
//! Owns the instrument registry. Inbound vendor sysex is decoded into
//! patch-number, instrument-type, string-bank and parameter updates;
//! outbound internal commands are encoded through the owning instrument's
//! parameters. The patch number wraps over the synth's 400 program slots.

use smallvec::SmallVec;

use crate::bridge::{Device, Outbox};
use crate::instrument::Rack;
use crate::midi_io::MidiPort;
use crate::msg::{Internal, Message};
use crate::sysex::{AddressFamily, SysexFrame};
use crate::util::{clip, scroll, split_hex};

pub const MAX_PATCH: i32 = 399;

pub struct SynthDevice {
    port: Option<MidiPort>,
    rack: Rack,
    patch: u16,
}

impl SynthDevice {
    pub fn new(port: Option<MidiPort>) -> Self {
        SynthDevice { port, rack: Rack::new(), patch: 0 }
    }

    pub fn patch(&self) -> u16 {
        self.patch
    }

    fn request_patch_number(&self, out: &mut Outbox) {
        if let Ok(frame) = SysexFrame::request(AddressFamily::Common, &[0, 0, 0, 0, 0, 4]) {
            out.push(Message::Sysex(frame));
        }
    }

    fn patch_command(&self, out: &mut Outbox) {
        let n = self.patch;
        let nibbles =
            [(n >> 12) & 0xf, (n >> 8) & 0xf, (n >> 4) & 0xf, n & 0xf];
        let body = [0, 0, nibbles[0], nibbles[1], nibbles[2], nibbles[3]];
        if let Ok(frame) = SysexFrame::command(AddressFamily::Common, &body) {
            out.push(Message::Sysex(frame));
        }
    }

    fn xfader_command(&self, value: u8, out: &mut Outbox) {
        let value = clip(value as f32 / 127.0 * 200.0, 0, 200);
        let (left, right) =
            if value < 100 { (200 - value, value) } else { (value, 200 - value) };
        let mut body: SmallVec<[u16; 12]> = SmallVec::new();
        body.push(0);
        body.push(44);
        for _ in 0..2 {
            for gain in [left, right] {
                body.extend(split_hex(gain as u16).into_iter().map(|d| d as u16));
            }
        }
        if let Ok(frame) = SysexFrame::command(AddressFamily::InOut, &body) {
            out.push(Message::Sysex(frame));
        }
    }

    fn sysex_in(&mut self, frame: &SysexFrame, out: &mut Outbox) {
        match frame.family() {
            Some(AddressFamily::Common) if frame.address[3] == 0 => {
                if frame.body.len() >= 4 {
                    self.patch = frame.body[..4]
                        .iter()
                        .fold(0u16, |acc, nibble| (acc << 4) | *nibble as u16);
                    log::info!("[syn] patch {}", self.patch);
                    let mut requests = Vec::new();
                    self.rack.bank_requests(&mut requests);
                    for frame in requests {
                        out.push(Message::Sysex(frame));
                    }
                }
            }
            Some(AddressFamily::Patch) => {
                let instr = frame.address[2];
                let field = frame.address[3];
                match field {
                    1 => {
                        if let Some(type_byte) = frame.body.first() {
                            self.rack.set(instr, *type_byte);
                            if let Some(slot) = self.rack.get(instr) {
                                log::info!(
                                    "[syn] slot {} reports {:?}",
                                    slot.index(),
                                    slot.kind()
                                );
                                let mut requests = Vec::new();
                                slot.request(&mut requests);
                                for frame in requests {
                                    out.push(Message::Sysex(frame));
                                }
                            }
                        }
                    }
                    6 => {
                        if let Some(slot) = self.rack.get(instr) {
                            out.push(Internal::StringValues {
                                instrument: slot.index(),
                                values: frame.body.iter().copied().take(12).collect(),
                            });
                        }
                    }
                    _ => {
                        if let Some(slot) = self.rack.get_mut(instr) {
                            let mut msgs = Vec::new();
                            slot.receive(field, &frame.body, &mut msgs);
                            for msg in msgs {
                                out.push(msg);
                            }
                        } else {
                            log::debug!("[syn] sysex for unknown slot {}", instr);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    fn forward(&mut self, instrument: u8, msg: &Internal, out: &mut Outbox) {
        if let Some(slot) = self.rack.get_mut(instrument) {
            let mut frames = Vec::new();
            match slot.send(msg, &mut frames) {
                Ok(()) => {
                    for frame in frames {
                        out.push(Message::Sysex(frame));
                    }
                }
                Err(e) => log::warn!("[syn] dropping command: {}", e),
            }
        }
    }

    fn strings_in(&mut self, msg: &Internal, control: u8, out: &mut Outbox) {
        for idx in self.rack.select_by_control(control) {
            self.forward(idx as u8, msg, out);
        }
    }
}

impl Device for SynthDevice {
    fn name(&self) -> &str {
        "synth"
    }

    fn select_message(&self, msg: &Message) -> bool {
        matches!(msg, Message::Sysex(_) | Message::ProgramChange { .. })
    }

    fn external_message(&self, msg: &Message) -> bool {
        matches!(
            msg,
            Message::Internal(
                Internal::Patch(_)
                    | Internal::Strings { .. }
                    | Internal::Synth { .. }
                    | Internal::Step { .. }
                    | Internal::Target { .. }
                    | Internal::Length { .. }
                    | Internal::Bars(_)
                    | Internal::Xfader(_)
            )
        )
    }

    fn init_actions(&mut self, out: &mut Outbox) {
        self.request_patch_number(out);
        // stereo link: main on, sub off
        if let Ok(frame) = SysexFrame::command(AddressFamily::InOut, &[0, 52, 1, 0]) {
            out.push(Message::Sysex(frame));
        }
        self.xfader_command(64, out);
    }

    fn receive(&mut self, msg: &Message, out: &mut Outbox) {
        match msg {
            Message::ProgramChange { .. } => self.request_patch_number(out),
            Message::Sysex(frame) => self.sysex_in(frame, out),
            Message::Internal(internal) => match internal {
                Internal::Patch(offset) => {
                    self.patch =
                        scroll(self.patch as i32 + *offset as i32, 0, MAX_PATCH) as u16;
                    self.patch_command(out);
                }
                Internal::Strings { control, .. } => {
                    self.strings_in(internal, *control, out);
                }
                Internal::Synth { instrument, .. }
                | Internal::Step { instrument, .. }
                | Internal::Target { instrument, .. }
                | Internal::Length { instrument, .. } => {
                    self.forward(*instrument, internal, out);
                }
                Internal::Bars(_) => {
                    // relock every step sequencer to the new phrase length
                    for idx in 0..self.rack.len() {
                        self.forward(idx as u8, internal, out);
                    }
                }
                Internal::Xfader(value) => self.xfader_command(*value, out),
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

    fn close(&mut self) {
        self.port = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::InstrumentKind;

    fn synth() -> SynthDevice {
        SynthDevice::new(None)
    }

    fn receive(dev: &mut SynthDevice, msg: Message) -> Outbox {
        let mut out = Outbox::default();
        dev.receive(&msg, &mut out);
        out
    }

    fn sysex_frames(out: &Outbox) -> Vec<&SysexFrame> {
        out.messages
            .iter()
            .filter_map(|m| match m {
                Message::Sysex(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    fn type_report(instr: u8, type_byte: u8) -> Message {
        Message::Sysex(
            SysexFrame::command(AddressFamily::Patch, &[instr as u16, 1, type_byte as u16, 100])
                .unwrap(),
        )
    }

    #[test]
    fn patch_increment_wraps_and_encodes_nibbles() {
        let mut dev = synth();
        dev.patch = 0x007f;
        let out = receive(&mut dev, Message::Internal(Internal::Patch(1)));
        assert_eq!(dev.patch(), 0x0080);
        let frames = sysex_frames(&out);
        assert_eq!(frames[0].address, [0, 1, 0, 0]);
        assert_eq!(frames[0].body.as_slice(), &[0, 0, 8, 0]);
        // the checksum zeroes the payload sum
        let sum: u32 = frames[0]
            .address
            .iter()
            .chain(frames[0].body.iter())
            .map(|b| *b as u32)
            .sum::<u32>()
            + frames[0].checksum() as u32;
        assert_eq!(sum % 128, 0);
    }

    #[test]
    fn patch_scrolls_over_the_program_range() {
        let mut dev = synth();
        receive(&mut dev, Message::Internal(Internal::Patch(-1)));
        assert_eq!(dev.patch(), 399);
        receive(&mut dev, Message::Internal(Internal::Patch(4)));
        assert_eq!(dev.patch(), 0);
    }

    #[test]
    fn patch_number_response_requests_the_banks() {
        let mut dev = synth();
        let response = SysexFrame::command(AddressFamily::Common, &[0, 0, 0, 1, 8, 7]).unwrap();
        let out = receive(&mut dev, Message::Sysex(response));
        assert_eq!(dev.patch(), 0x0187);
        assert_eq!(sysex_frames(&out).len(), 6);
    }

    #[test]
    fn program_change_rerequests_the_patch_number() {
        let mut dev = synth();
        let out = receive(&mut dev, Message::ProgramChange { channel: 0, program: 3 });
        let frames = sysex_frames(&out);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].op, crate::sysex::SysexOp::Request);
        assert_eq!(frames[0].address, [0, 1, 0, 0]);
    }

    #[test]
    fn type_report_swaps_the_slot_and_requests_params() {
        let mut dev = synth();
        let out = receive(&mut dev, type_report(21, 0));
        assert_eq!(dev.rack.get(0).unwrap().kind(), Some(InstrumentKind::DynaSynth));
        // dyna synth owns six readback windows
        assert_eq!(sysex_frames(&out).len(), 6);

        let out = receive(&mut dev, type_report(32, 3));
        assert_eq!(dev.rack.get(1).unwrap().kind(), Some(InstrumentKind::EGuitar));
        assert!(sysex_frames(&out).is_empty(), "pickup models have no synth windows");
    }

    #[test]
    fn string_bank_response_reflects_values() {
        let mut dev = synth();
        let mut body: Vec<u16> = vec![32, 6];
        body.extend([100, 100, 100, 100, 100, 100, 50, 50, 50, 50, 50, 50]);
        let frame = SysexFrame::command(AddressFamily::Patch, &body).unwrap();
        let out = receive(&mut dev, Message::Sysex(frame));
        match &out.messages[0] {
            Message::Internal(Internal::StringValues { instrument, values }) => {
                assert_eq!(*instrument, 1);
                assert_eq!(values.len(), 12);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parameter_response_dispatches_to_the_slot() {
        let mut dev = synth();
        receive(&mut dev, type_report(21, 0));
        // pitch window of the dyna synth at its type-adjusted address
        let frame = SysexFrame::command(AddressFamily::Patch, &[22, 5, 32]).unwrap();
        let out = receive(&mut dev, Message::Sysex(frame));
        assert_eq!(
            out.messages.as_slice(),
            &[Message::Internal(Internal::Synth { instrument: 0, macro_id: 176, value: 64 })]
        );
    }

    #[test]
    fn string_gesture_routes_by_controller() {
        let mut dev = synth();
        let msg = Internal::Strings { channel: 2, control: 17, value: 127 };
        let out = receive(&mut dev, Message::Internal(msg));
        let frames = sysex_frames(&out);
        assert_eq!(frames.len(), 1);
        // slot 1 base 32, volume bank string 2
        assert_eq!(frames[0].address, [16, 0, 32, 8]);
        assert_eq!(frames[0].body.as_slice(), &[100]);

        // the master knob writes every slot
        let msg = Internal::Strings { channel: 0, control: 19, value: 0 };
        let out = receive(&mut dev, Message::Internal(msg));
        assert_eq!(sysex_frames(&out).len(), 3);
    }

    #[test]
    fn xfader_splits_onto_two_gains() {
        let mut dev = synth();
        let out = receive(&mut dev, Message::Internal(Internal::Xfader(0)));
        let frames = sysex_frames(&out);
        assert_eq!(frames[0].address, [0, 4, 0, 44]);
        // hard left: left gain 200 (0xc8), right gain 0, twice
        assert_eq!(frames[0].body.as_slice(), &[12, 8, 0, 12, 8, 0]);
    }

    #[test]
    fn bars_relock_the_sequencer_rates() {
        let mut dev = synth();
        receive(&mut dev, type_report(21, 0));
        let out = receive(&mut dev, Message::Internal(Internal::Bars(4)));
        let frames = sysex_frames(&out);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].address, [16, 0, 22, 161]);
        assert_eq!(frames[0].body.as_slice(), &[109]);
    }

    #[test]
    fn init_actions_request_patch_and_center_the_field() {
        let mut dev = synth();
        let mut out = Outbox::default();
        dev.init_actions(&mut out);
        let frames = sysex_frames(&out);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].op, crate::sysex::SysexOp::Request);
        assert_eq!(frames[1].address, [0, 4, 0, 52]);
    }
}
