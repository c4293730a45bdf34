//! The device bus.
//!
//! Every device is a filter/transform/emit unit: it selects the wire
//! messages it handles, filters the internal messages it wants to observe,
//! turns either into zero or more outgoing messages, and emits those to its
//! own port (wire) or back onto the bus (internal).
//!
//! All transforms run serialized on one dispatcher thread, fed by a bounded
//! channel. Wire input reaches the channel through per-port poll loops (see
//! `midi_io`); internal messages published by one device are delivered to
//! every other device in publication order. A panicking transform is
//! caught, logged, and never takes the bus down.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use smallvec::SmallVec;

use crate::msg::Message;

pub type PortId = usize;
pub type DeviceId = usize;

const BUS_CAPACITY: usize = 256;

/// Events handed to the dispatcher.
#[derive(Debug)]
pub enum BusEvent {
    /// A wire message drained from a port's pending queue.
    Wire { port: PortId, msg: Message },
    /// A track-selection avalanche collapsed by the reducing queue.
    ChannelFocus { port: PortId, channel: u8 },
}

/// Transform output: messages to emit, plus the one out-of-band action a
/// device can take (completing the bus).
#[derive(Debug, Default)]
pub struct Outbox {
    pub messages: SmallVec<[Message; 8]>,
    pub shutdown: bool,
}

impl Outbox {
    pub fn push<M: Into<Message>>(&mut self, msg: M) {
        self.messages.push(msg.into());
    }

    pub fn shutdown(&mut self) {
        self.shutdown = true;
    }
}

pub trait Device: Send {
    fn name(&self) -> &str;

    /// Filter for internal messages published by *other* devices.
    fn external_message(&self, msg: &Message) -> bool;

    /// Filter for raw wire messages arriving on this device's port.
    fn select_message(&self, _msg: &Message) -> bool {
        false
    }

    /// Startup burst (initial LED state, readback requests).
    fn init_actions(&mut self, _out: &mut Outbox) {}

    /// Inbound transform; runs on the dispatcher thread only.
    fn receive(&mut self, msg: &Message, out: &mut Outbox);

    /// Emit one transform output. Wire messages go out the device's port
    /// and `None` is returned; internal messages are handed back for
    /// publication on the bus.
    fn send(&mut self, msg: Message) -> Option<Message>;

    /// The reducing queue collapsed a track-selection avalanche.
    fn channel_focus(&mut self, _channel: u8) {}

    /// Shutdown; close ports, stop streams.
    fn close(&mut self) {}
}

pub fn bus_channel() -> (Sender<BusEvent>, Receiver<BusEvent>) {
    bounded(BUS_CAPACITY)
}

pub struct Bridge {
    devices: Vec<Box<dyn Device>>,
    bindings: Vec<(PortId, DeviceId)>,
    rx: Receiver<BusEvent>,
    running: Arc<AtomicBool>,
}

impl Bridge {
    pub fn new(rx: Receiver<BusEvent>, running: Arc<AtomicBool>) -> Self {
        Bridge { devices: Vec::new(), bindings: Vec::new(), rx, running }
    }

    pub fn add_device(&mut self, device: Box<dyn Device>) -> DeviceId {
        self.devices.push(device);
        self.devices.len() - 1
    }

    /// Route wire messages from `port` to `device` (subject to its
    /// `select_message` filter). A port may feed several devices.
    pub fn bind_port(&mut self, port: PortId, device: DeviceId) {
        self.bindings.push((port, device));
    }

    /// Run the dispatcher until a device completes the bus or `running` is
    /// cleared from outside (signal handler).
    pub fn run(mut self) {
        let mut pending: VecDeque<(DeviceId, Message)> = VecDeque::new();

        for id in 0..self.devices.len() {
            let mut out = Outbox::default();
            self.devices[id].init_actions(&mut out);
            log::info!(
                "[bus] {} connected ({} init actions)",
                self.devices[id].name(),
                out.messages.len()
            );
            if self.dispatch_outbox(id, out, &mut pending) || self.fan_out(&mut pending) {
                self.complete();
                return;
            }
        }
        log::info!("[bus] connected and started {} devices", self.devices.len());

        loop {
            if !self.running.load(Ordering::Relaxed) {
                break;
            }
            let event = match self.rx.recv_timeout(Duration::from_millis(100)) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            match event {
                BusEvent::Wire { port, msg } => {
                    let targets: Vec<DeviceId> = self
                        .bindings
                        .iter()
                        .filter(|(p, _)| *p == port)
                        .map(|(_, d)| *d)
                        .collect();
                    for id in targets {
                        if self.devices[id].select_message(&msg) {
                            log::debug!("[in] {:?} for {}", msg, self.devices[id].name());
                            if self.deliver(id, &msg, &mut pending) {
                                self.complete();
                                return;
                            }
                        }
                    }
                }
                BusEvent::ChannelFocus { port, channel } => {
                    let targets: Vec<DeviceId> = self
                        .bindings
                        .iter()
                        .filter(|(p, _)| *p == port)
                        .map(|(_, d)| *d)
                        .collect();
                    for id in targets {
                        self.devices[id].channel_focus(channel);
                    }
                }
            }
            if self.fan_out(&mut pending) {
                self.complete();
                return;
            }
        }
        self.complete();
    }

    /// Run one device transform and queue whatever it publishes.
    /// Returns true when the device asked for shutdown.
    fn deliver(
        &mut self,
        id: DeviceId,
        msg: &Message,
        pending: &mut VecDeque<(DeviceId, Message)>,
    ) -> bool {
        let device = &mut self.devices[id];
        let mut out = Outbox::default();
        let result = panic::catch_unwind(AssertUnwindSafe(|| device.receive(msg, &mut out)));
        if let Err(e) = result {
            let what = e
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| e.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic".to_string());
            log::error!("[bus] {} transform panicked: {}", self.devices[id].name(), what);
            return false;
        }
        self.dispatch_outbox(id, out, pending)
    }

    fn dispatch_outbox(
        &mut self,
        id: DeviceId,
        out: Outbox,
        pending: &mut VecDeque<(DeviceId, Message)>,
    ) -> bool {
        for msg in out.messages {
            if let Some(published) = self.devices[id].send(msg) {
                pending.push_back((id, published));
            }
        }
        out.shutdown
    }

    /// Deliver queued publications to every other interested device, in
    /// publication order, until the queue drains.
    fn fan_out(&mut self, pending: &mut VecDeque<(DeviceId, Message)>) -> bool {
        while let Some((source, msg)) = pending.pop_front() {
            for id in 0..self.devices.len() {
                if id == source || !self.devices[id].external_message(&msg) {
                    continue;
                }
                if self.deliver(id, &msg, pending) {
                    return true;
                }
            }
        }
        false
    }

    fn complete(&mut self) {
        log::info!("[bus] completing, closing {} devices", self.devices.len());
        self.running.store(false, Ordering::Relaxed);
        for device in self.devices.iter_mut() {
            device.close();
        }
    }
}
