use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use octoloop::bridge::{bus_channel, Bridge};
use octoloop::devices::{open_streams, AudioDevice, ControlSurface, SynthDevice};
use octoloop::looper::LooperHandle;
use octoloop::msg::Message;
use octoloop::{midi_io, Clock, Config};

const TRACKS: usize = 8;
const DEFAULT_BARS: u8 = 2;

static SIGINT: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_: libc::c_int) {
    SIGINT.store(true, Ordering::Relaxed);
}

fn setup_logging(level: log::LevelFilter) {
    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{} {:5} {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stdout())
        .apply()
        .expect("logger already installed");
}

fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let running = Arc::new(AtomicBool::new(true));

    unsafe {
        libc::signal(libc::SIGINT, on_sigint as libc::sighandler_t);
    }
    {
        let running = Arc::clone(&running);
        std::thread::spawn(move || loop {
            if SIGINT.load(Ordering::Relaxed) {
                log::info!("[all] interrupted, shutting down");
                running.store(false, Ordering::Relaxed);
                return;
            }
            if !running.load(Ordering::Relaxed) {
                return;
            }
            std::thread::sleep(Duration::from_millis(50));
        });
    }

    let (synth_port, synth_wire) = midi_io::open(&config.synth_device)?;
    let (control_port, control_wire) = midi_io::open(&config.control_device)?;

    let handle = LooperHandle::new(TRACKS, DEFAULT_BARS);
    let streams = open_streams(&config.audio_device, TRACKS, &handle)?;

    let (tx, rx) = bus_channel();
    let mut bridge = Bridge::new(rx, Arc::clone(&running));

    let clock = bridge.add_device(Box::new(Clock::new(DEFAULT_BARS)));
    let synth = bridge.add_device(Box::new(SynthDevice::new(Some(synth_port))));
    let control = bridge.add_device(Box::new(ControlSurface::new(Some(control_port))));
    bridge.add_device(Box::new(AudioDevice::new(handle)));

    const SYNTH_PORT: usize = 0;
    const CONTROL_PORT: usize = 1;
    bridge.bind_port(SYNTH_PORT, clock);
    bridge.bind_port(SYNTH_PORT, synth);
    bridge.bind_port(CONTROL_PORT, control);

    let polls = vec![
        midi_io::spawn_poll_loop(
            SYNTH_PORT,
            synth_wire,
            Box::new(|msg: &Message| {
                matches!(
                    msg,
                    Message::Clock
                        | Message::Start
                        | Message::Stop
                        | Message::Sysex(_)
                        | Message::ProgramChange { .. }
                )
            }),
            tx.clone(),
            Arc::clone(&running),
        ),
        midi_io::spawn_poll_loop(
            CONTROL_PORT,
            control_wire,
            ControlSurface::wire_filter(),
            tx.clone(),
            Arc::clone(&running),
        ),
    ];
    drop(tx);

    log::info!(
        "[all] starting: {} <--> {} over {}",
        config.synth_device,
        config.control_device,
        config.audio_device
    );
    bridge.run();

    running.store(false, Ordering::Relaxed);
    for poll in polls {
        poll.thread().unpark();
        let _ = poll.join();
    }
    drop(streams);
    Ok(())
}

fn main() {
    let config = Config::from_env();
    setup_logging(config.log_level);

    match run(config) {
        Ok(()) => {
            log::info!("[all] clean shutdown");
        }
        Err(e) => {
            log::error!("[all] fatal: {}", e);
            std::process::exit(1);
        }
    }
}
