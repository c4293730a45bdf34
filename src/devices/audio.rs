//! The audio adapter.
//!
//! Bus side: turns transport and mixer messages into looper-handle calls,
//! deferring transport, phrase and bar changes to the next phrase boundary
//! and applying fader moves immediately.
//!
//! Backend side: one duplex pair of cpal streams. The input callback feeds
//! an SPSC ring; the output callback drains it, runs the looper processor,
//! and silences the buffer on underrun or after the window stops.

use cpal::traits::{DeviceTrait, HostTrait};

use crate::bridge::{Device, Outbox};
use crate::error::AudioBackendError;
use crate::looper::audio_thread::{LooperAudioThread, ProcessStatus};
use crate::looper::LooperHandle;
use crate::msg::{Internal, Message};

pub struct AudioDevice {
    handle: LooperHandle,
}

impl AudioDevice {
    pub fn new(handle: LooperHandle) -> Self {
        AudioDevice { handle }
    }

    pub fn handle(&self) -> &LooperHandle {
        &self.handle
    }
}

impl Device for AudioDevice {
    fn name(&self) -> &str {
        "audio"
    }

    fn external_message(&self, msg: &Message) -> bool {
        matches!(
            msg,
            Message::Internal(
                Internal::Start(_)
                    | Internal::Stop
                    | Internal::Bars(_)
                    | Internal::Phrase(_)
                    | Internal::Volume { .. }
                    | Internal::Xfade { .. }
                    | Internal::Xfader(_)
                    | Internal::Play
                    | Internal::Rec
                    | Internal::Toggle
                    | Internal::Overdub(_)
            )
        )
    }

    fn receive(&mut self, msg: &Message, _out: &mut Outbox) {
        let internal = match msg {
            Message::Internal(internal) => internal,
            _ => return,
        };
        match internal {
            Internal::Start(_) => {
                self.handle.apply_start();
                let params = self.handle.params();
                log::debug!(
                    "[aud] phrase {} at {} bars, flags {:?}",
                    params.phrase,
                    params.bars,
                    params.flags
                );
            }
            Internal::Stop => self.handle.stop(),
            Internal::Play => self.handle.play(),
            Internal::Rec => self.handle.rec(),
            Internal::Toggle => self.handle.toggle(),
            Internal::Overdub(on) => self.handle.overdub(*on),
            Internal::Bars(bars) => self.handle.set_bars(*bars),
            Internal::Phrase(offset) => self.handle.phrase_offset(*offset),
            Internal::Volume { track, value } => self.handle.set_volume(*track, *value),
            Internal::Xfade { track, value } => self.handle.set_pan(*track, *value),
            Internal::Xfader(value) => self.handle.set_master(*value),
            _ => {}
        }
    }

    fn send(&mut self, _msg: Message) -> Option<Message> {
        None
    }
}

/// The running backend streams; dropping them closes the audio device.
pub struct AudioStreams {
    _input: cpal::Stream,
    _output: cpal::Stream,
    pub sample_rate: f64,
}

/// Bring up the duplex stream pair on the named device and hand the looper
/// processor to the output callback.
pub fn open_streams(
    device_name: &str,
    tracks: usize,
    handle: &LooperHandle,
) -> Result<AudioStreams, AudioBackendError> {
    use cpal::traits::StreamTrait;

    let host = cpal::default_host();
    let input_device = host
        .input_devices()
        .map_err(|e| AudioBackendError::StreamFailed(Box::new(e)))?
        .find(|d| d.name().map(|n| n.starts_with(device_name)).unwrap_or(false))
        .ok_or_else(|| AudioBackendError::DeviceNotFound(device_name.to_string()))?;
    let output_device = host
        .output_devices()
        .map_err(|e| AudioBackendError::StreamFailed(Box::new(e)))?
        .find(|d| d.name().map(|n| n.starts_with(device_name)).unwrap_or(false))
        .ok_or_else(|| AudioBackendError::DeviceNotFound(device_name.to_string()))?;

    let default_config = input_device
        .default_input_config()
        .map_err(|e| AudioBackendError::StreamFailed(Box::new(e)))?;
    let sample_rate = default_config.sample_rate();
    let config = cpal::StreamConfig {
        channels: tracks as cpal::ChannelCount,
        sample_rate,
        buffer_size: cpal::BufferSize::Default,
    };
    let sample_rate = sample_rate.0 as f64;

    let mut looper =
        LooperAudioThread::new(handle.shared(), &handle.coll_handle(), tracks, sample_rate);

    // one second of headroom between the two callbacks
    let (mut in_tx, mut in_rx) = rtrb::RingBuffer::<f32>::new(sample_rate as usize * tracks);

    let input_stream = input_device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                match in_tx.write_chunk(data.len()) {
                    Ok(mut chunk) => {
                        let (s1, s2) = chunk.as_mut_slices();
                        let split = s1.len();
                        s1.copy_from_slice(&data[..split]);
                        s2.copy_from_slice(&data[split..]);
                        chunk.commit_all();
                    }
                    Err(_) => log::trace!("[aud] input overrun"),
                }
            },
            |e| log::error!("[aud] input stream: {}", e),
        )
        .map_err(|e| AudioBackendError::StreamFailed(Box::new(e)))?;

    let mut in_scratch = vec![0.0f32; sample_rate as usize * tracks];
    let mut stopped = false;
    let output_stream = output_device
        .build_output_stream(
            &config,
            move |out: &mut [f32], _: &cpal::OutputCallbackInfo| {
                if stopped || out.len() > in_scratch.len() {
                    out.iter_mut().for_each(|s| *s = 0.0);
                    return;
                }
                let wanted = out.len();
                let input = &mut in_scratch[..wanted];
                match in_rx.read_chunk(wanted) {
                    Ok(chunk) => {
                        let (s1, s2) = chunk.as_slices();
                        input[..s1.len()].copy_from_slice(s1);
                        input[s1.len()..s1.len() + s2.len()].copy_from_slice(s2);
                        chunk.commit_all();
                    }
                    Err(_) => {
                        log::trace!("[aud] underrun");
                        input.iter_mut().for_each(|s| *s = 0.0);
                    }
                }
                if looper.process(input, out) == ProcessStatus::Stop {
                    log::warn!("[aud] phrase window exhausted, stopping stream");
                    stopped = true;
                    out.iter_mut().for_each(|s| *s = 0.0);
                }
            },
            |e| log::error!("[aud] output stream: {}", e),
        )
        .map_err(|e| AudioBackendError::StreamFailed(Box::new(e)))?;

    input_stream.play().map_err(|e| AudioBackendError::StreamFailed(Box::new(e)))?;
    output_stream.play().map_err(|e| AudioBackendError::StreamFailed(Box::new(e)))?;

    log::info!("[aud] {} running at {} Hz, {} tracks", device_name, sample_rate, tracks);
    Ok(AudioStreams { _input: input_stream, _output: output_stream, sample_rate })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::looper::TransportFlags;

    fn device() -> AudioDevice {
        AudioDevice::new(LooperHandle::new(8, 2))
    }

    fn receive(dev: &mut AudioDevice, msg: Internal) {
        let mut out = Outbox::default();
        dev.receive(&Message::Internal(msg), &mut out);
        assert!(out.messages.is_empty(), "the audio adapter publishes nothing");
    }

    #[test]
    fn transport_defers_to_the_phrase_boundary() {
        let mut dev = device();
        receive(&mut dev, Internal::Rec);
        assert!(dev.handle().params().flags.is_empty());
        receive(&mut dev, Internal::Start(2));
        assert_eq!(dev.handle().params().flags, TransportFlags::RECORD);
    }

    #[test]
    fn mixer_moves_apply_immediately() {
        let mut dev = device();
        receive(&mut dev, Internal::Volume { track: 2, value: 0 });
        assert_eq!(dev.handle().params().faders[2].volume, 0.0);
        receive(&mut dev, Internal::Xfade { track: 2, value: 127 });
        assert_eq!(dev.handle().params().faders[2].pan, 1.0);
        receive(&mut dev, Internal::Xfader(127));
        assert_eq!(dev.handle().params().master_x, 1.0);
    }

    #[test]
    fn bars_and_phrase_wait_for_start() {
        let mut dev = device();
        receive(&mut dev, Internal::Bars(4));
        receive(&mut dev, Internal::Phrase(3));
        assert_eq!(dev.handle().params().bars, 2);
        assert_eq!(dev.handle().params().phrase, 0);
        receive(&mut dev, Internal::Start(4));
        assert_eq!(dev.handle().params().bars, 4);
        assert_eq!(dev.handle().params().phrase, 3);
    }
}
