//! MIDI port plumbing.
//!
//! Each hardware port gets a midir input connection whose callback decodes
//! wire bytes into typed messages and pushes them onto a lock-free ring.
//! A poll loop per port drains that ring every ~10 ms, applies the
//! device-level wire filter, dedups through the reducing queue, and hands
//! the survivors to the dispatcher. Output connections are owned by the
//! device adapters and written on the dispatcher thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Sender;
use midir::{MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};

use crate::bridge::{BusEvent, PortId};
use crate::error::{PortOpenError, SysexDecodeError};
use crate::msg::Message;
use crate::reducing_queue::ReducingQueue;
use crate::sysex::SysexFrame;

pub const RETRY_TIMEOUT: Duration = Duration::from_secs(3);
pub const RETRIES: u32 = 5;
const POLL_INTERVAL: Duration = Duration::from_millis(10);
const WIRE_RING_CAPACITY: usize = 1024;

/// Decode one wire message. Unknown or foreign traffic decodes to `None`.
pub fn parse_wire(bytes: &[u8]) -> Option<Message> {
    let status = *bytes.first()?;
    match status {
        0xf8 => return Some(Message::Clock),
        0xfa => return Some(Message::Start),
        0xfc => return Some(Message::Stop),
        0xf0 => {
            return match SysexFrame::decode(bytes) {
                Ok(frame) => Some(Message::Sysex(frame)),
                Err(SysexDecodeError::BadChecksum { expected, actual }) => {
                    log::debug!(
                        "[midi] sysex dropped: checksum {} should be {}",
                        actual,
                        expected
                    );
                    None
                }
                Err(_) => None,
            };
        }
        _ => {}
    }
    let channel = status & 0x0f;
    match status & 0xf0 {
        0x90 => Some(Message::note(channel, *bytes.get(1)?, *bytes.get(2)?)),
        0x80 => Some(Message::NoteOff { channel, note: *bytes.get(1)?, velocity: *bytes.get(2)? }),
        0xb0 => Some(Message::cc(channel, *bytes.get(1)?, *bytes.get(2)?)),
        0xc0 => Some(Message::ProgramChange { channel, program: *bytes.get(1)? }),
        _ => None,
    }
}

/// An open duplex MIDI port. The input half feeds the wire ring until the
/// connection is dropped; the output half belongs to the owning adapter.
pub struct MidiPort {
    pub name: String,
    _input: MidiInputConnection<()>,
    output: MidiOutputConnection,
    scratch: Vec<u8>,
}

impl MidiPort {
    pub fn send(&mut self, msg: &Message) {
        self.scratch.clear();
        if !msg.to_wire(&mut self.scratch) {
            return;
        }
        if let Err(e) = self.output.send(&self.scratch) {
            log::error!("[out] {}: {}", self.name, e);
        }
    }
}

/// Open the named port, retrying with a fixed backoff. Port names are
/// matched by prefix, the way the devices report themselves.
pub fn open(device_name: &str) -> Result<(MidiPort, rtrb::Consumer<Message>), PortOpenError> {
    let mut last_err: Option<Box<dyn std::error::Error + Send + Sync>> = None;
    for attempt in 0..RETRIES {
        if attempt > 0 {
            std::thread::sleep(RETRY_TIMEOUT);
        }
        match try_open(device_name) {
            Ok(opened) => return Ok(opened),
            Err(e) => {
                log::warn!("[midi] open \"{}\" attempt {}: {}", device_name, attempt + 1, e);
                last_err = Some(e);
            }
        }
    }
    Err(PortOpenError { port: device_name.to_string(), attempts: RETRIES, source: last_err })
}

fn try_open(
    device_name: &str,
) -> Result<(MidiPort, rtrb::Consumer<Message>), Box<dyn std::error::Error + Send + Sync>> {
    let mut midi_in = MidiInput::new("octoloop")?;
    midi_in.ignore(midir::Ignore::None);
    let midi_out = MidiOutput::new("octoloop")?;

    let in_port = midi_in
        .ports()
        .into_iter()
        .find(|p| {
            midi_in.port_name(p).map(|n| n.starts_with(device_name)).unwrap_or(false)
        })
        .ok_or_else(|| format!("no input port matching \"{}\"", device_name))?;
    let out_port = midi_out
        .ports()
        .into_iter()
        .find(|p| {
            midi_out.port_name(p).map(|n| n.starts_with(device_name)).unwrap_or(false)
        })
        .ok_or_else(|| format!("no output port matching \"{}\"", device_name))?;

    let name = midi_in.port_name(&in_port)?;
    let (mut producer, consumer) = rtrb::RingBuffer::<Message>::new(WIRE_RING_CAPACITY);

    let input = midi_in
        .connect(
            &in_port,
            "octoloop-in",
            move |_stamp, bytes, _| {
                if let Some(msg) = parse_wire(bytes) {
                    if producer.push(msg).is_err() {
                        log::warn!("[midi] wire ring full, dropping message");
                    }
                }
            },
            (),
        )
        .map_err(|e| e.to_string())?;
    let output = midi_out.connect(&out_port, "octoloop-out").map_err(|e| e.to_string())?;

    log::info!("[midi] {} connected", name);
    Ok((MidiPort { name, _input: input, output, scratch: Vec::with_capacity(64) }, consumer))
}

/// Drain one port's wire ring into the dispatcher until shutdown.
pub fn spawn_poll_loop(
    port: PortId,
    mut consumer: rtrb::Consumer<Message>,
    filter: Box<dyn Fn(&Message) -> bool + Send>,
    tx: Sender<BusEvent>,
    running: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut queue = ReducingQueue::new();
        while running.load(Ordering::Relaxed) {
            while let Ok(msg) = consumer.pop() {
                if filter(&msg) {
                    queue.push(msg);
                }
            }
            if let Some(channel) = queue.take_channel_focus() {
                if tx.send(BusEvent::ChannelFocus { port, channel }).is_err() {
                    return;
                }
            }
            while let Some(msg) = queue.pop() {
                if tx.send(BusEvent::Wire { port, msg }).is_err() {
                    return;
                }
            }
            std::thread::park_timeout(POLL_INTERVAL);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_channel_and_realtime_messages() {
        assert_eq!(parse_wire(&[0xf8]), Some(Message::Clock));
        assert_eq!(parse_wire(&[0xfa]), Some(Message::Start));
        assert_eq!(parse_wire(&[0xfc]), Some(Message::Stop));
        assert_eq!(parse_wire(&[0xb3, 7, 100]), Some(Message::cc(3, 7, 100)));
        assert_eq!(
            parse_wire(&[0x92, 60, 0]),
            Some(Message::NoteOff { channel: 2, note: 60, velocity: 0 })
        );
        assert_eq!(
            parse_wire(&[0xc0, 12]),
            Some(Message::ProgramChange { channel: 0, program: 12 })
        );
        assert_eq!(parse_wire(&[0xfe]), None);
    }

    #[test]
    fn foreign_sysex_is_silently_dropped() {
        assert_eq!(parse_wire(&[0xf0, 0x7e, 0x7f, 0x06, 0x01, 0xf7]), None);
    }

    #[test]
    fn vendor_sysex_round_trips_through_the_parser() {
        let frame =
            SysexFrame::command(crate::sysex::AddressFamily::Patch, &[22, 16, 0, 0, 0, 1])
                .unwrap();
        let mut wire = Vec::new();
        Message::Sysex(frame.clone()).to_wire(&mut wire);
        assert_eq!(parse_wire(&wire), Some(Message::Sysex(frame)));
    }
}
