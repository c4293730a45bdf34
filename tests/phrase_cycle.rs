//! Wire-to-bus integration: a clock fed from the synth port drives the
//! phrase machinery, and surface gestures land on the other devices in
//! publication order.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use octoloop::bridge::{bus_channel, Bridge, BusEvent, Device, Outbox};
use octoloop::devices::{ControlSurface, SynthDevice};
use octoloop::msg::{Internal, Message};
use octoloop::Clock;

/// Captures every internal message that reaches it.
struct Probe {
    seen: Arc<Mutex<Vec<Internal>>>,
}

impl Device for Probe {
    fn name(&self) -> &str {
        "probe"
    }
    fn external_message(&self, msg: &Message) -> bool {
        msg.is_internal()
    }
    fn receive(&mut self, msg: &Message, _out: &mut Outbox) {
        if let Message::Internal(internal) = msg {
            self.seen.lock().unwrap().push(internal.clone());
        }
    }
    fn send(&mut self, _msg: Message) -> Option<Message> {
        None
    }
}

fn run_events(events: Vec<BusEvent>) -> Vec<Internal> {
    let (tx, rx) = bus_channel();
    let running = Arc::new(AtomicBool::new(true));
    let seen = Arc::new(Mutex::new(Vec::new()));

    let mut bridge = Bridge::new(rx, Arc::clone(&running));
    let clock = bridge.add_device(Box::new(Clock::new(2)));
    let synth = bridge.add_device(Box::new(SynthDevice::new(None)));
    let control = bridge.add_device(Box::new(ControlSurface::new(None)));
    bridge.add_device(Box::new(Probe { seen: Arc::clone(&seen) }));

    bridge.bind_port(0, clock);
    bridge.bind_port(0, synth);
    bridge.bind_port(1, control);

    // the bus channel is bounded, so feed it from a producer thread while
    // the dispatcher drains it
    let producer = std::thread::spawn(move || {
        for event in events {
            if tx.send(event).is_err() {
                return;
            }
        }
    });
    bridge.run();
    producer.join().unwrap();

    Arc::try_unwrap(seen).unwrap().into_inner().unwrap()
}

fn wire(port: usize, msg: Message) -> BusEvent {
    BusEvent::Wire { port, msg }
}

#[test]
fn two_phrases_of_clock_emit_the_full_event_cycle() {
    let mut events = Vec::new();
    for _ in 0..384 {
        events.push(wire(0, Message::Clock));
    }
    let seen = run_events(events);

    let starts = seen.iter().filter(|m| matches!(m, Internal::Start(2))).count();
    let beats = seen.iter().filter(|m| matches!(m, Internal::Beat(2))).count();
    let ends = seen.iter().filter(|m| matches!(m, Internal::End(2))).count();
    assert_eq!(starts, 2);
    // ⌊384/24⌋ quarter-notes, minus the two that land on phrase starts
    assert_eq!(beats, 14);
    assert_eq!(ends, 2);
}

#[test]
fn record_gesture_reaches_the_bus_before_the_next_start() {
    let mut events = vec![wire(1, Message::note(0, 93, 127))];
    for _ in 0..96 {
        events.push(wire(0, Message::Clock));
    }
    let seen = run_events(events);

    let rec = seen.iter().position(|m| matches!(m, Internal::Rec));
    let start = seen.iter().position(|m| matches!(m, Internal::Start(_)));
    assert!(rec.unwrap() < start.unwrap());
}

#[test]
fn bars_gesture_defers_to_the_clock_beat() {
    // select 4 bars on the surface, then play through one beat
    let mut events = vec![wire(1, Message::note(3, 50, 127))];
    for _ in 0..25 {
        events.push(wire(0, Message::Clock));
    }
    let seen = run_events(events);

    assert!(seen.iter().any(|m| matches!(m, Internal::Bars(4))));
    // the first beat already reports the new phrase length
    assert!(seen.iter().any(|m| matches!(m, Internal::Beat(4))));
}

#[test]
fn patch_gesture_produces_a_synth_command_not_an_echo() {
    let seen = run_events(vec![wire(1, Message::note(0, 95, 127))]);
    assert!(seen.iter().any(|m| matches!(m, Internal::Patch(1))));
}

#[test]
fn wire_stop_is_republished_for_every_listener() {
    let seen = run_events(vec![wire(0, Message::Stop)]);
    // the surface's startup burst publishes its bar setting first
    assert_eq!(seen.last(), Some(&Internal::Stop));
    assert!(seen.contains(&Internal::Bars(2)));
}
