//! Device adapters: the glue between each piece of hardware's wire format
//! and the bus's typed messages.

pub mod audio;
pub mod control;
pub mod synth;

pub use audio::{open_streams, AudioDevice, AudioStreams};
pub use control::ControlSurface;
pub use synth::SynthDevice;
