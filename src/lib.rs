//! octoloop — a phrase-aligned live looper and synth-control hub.
//!
//! Binds a grid control surface, a vendor guitar synth and a multi-channel
//! audio interface into one instrument: a MIDI-clock-driven transport, a
//! typed message bus routing between device adapters, a sample-accurate
//! multi-phrase looper mixed inside the audio callback, and a structured
//! model of the synth's parameter address space.

pub mod blocks;
pub mod bridge;
pub mod clock;
pub mod config;
pub mod devices;
pub mod error;
pub mod instrument;
pub mod looper;
pub mod midi_io;
pub mod msg;
pub mod reducing_queue;
pub mod sysex;
pub mod util;

pub use bridge::{Bridge, BusEvent, Device, Outbox};
pub use clock::Clock;
pub use config::Config;
pub use looper::{LooperHandle, LooperParams, TransportFlags};
pub use msg::{Internal, Message};
pub use sysex::{AddressFamily, SysexFrame, SysexOp};
