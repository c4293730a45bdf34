//! Environment configuration.

use std::env;

pub const DEFAULT_SYNTH_DEVICE: &str = "SY-1000 MIDI 1";
pub const DEFAULT_CONTROL_DEVICE: &str = "Akai APC40 MIDI 1";
pub const DEFAULT_AUDIO_DEVICE: &str = "SY-1000";

#[derive(Debug, Clone)]
pub struct Config {
    pub synth_device: String,
    pub control_device: String,
    pub audio_device: String,
    pub log_level: log::LevelFilter,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            synth_device: DEFAULT_SYNTH_DEVICE.to_string(),
            control_device: DEFAULT_CONTROL_DEVICE.to_string(),
            audio_device: DEFAULT_AUDIO_DEVICE.to_string(),
            log_level: log::LevelFilter::Info,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Config::default();
        Config {
            synth_device: env::var("SYNTH_DEVICE").unwrap_or(defaults.synth_device),
            control_device: env::var("CONTROL_DEVICE").unwrap_or(defaults.control_device),
            audio_device: env::var("AUDIO_DEVICE").unwrap_or(defaults.audio_device),
            log_level: env::var("DEBUG")
                .ok()
                .map(|v| parse_level(&v))
                .unwrap_or(defaults.log_level),
        }
    }
}

/// `DEBUG` takes the usual numeric thresholds (10 = debug, 20 = info,
/// 30 = warning, 40 = error) or a level name.
fn parse_level(value: &str) -> log::LevelFilter {
    if let Ok(n) = value.parse::<i32>() {
        return match n {
            i32::MIN..=10 => log::LevelFilter::Debug,
            11..=20 => log::LevelFilter::Info,
            21..=30 => log::LevelFilter::Warn,
            _ => log::LevelFilter::Error,
        };
    }
    value.parse().unwrap_or(log::LevelFilter::Info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_debug_levels() {
        assert_eq!(parse_level("10"), log::LevelFilter::Debug);
        assert_eq!(parse_level("20"), log::LevelFilter::Info);
        assert_eq!(parse_level("30"), log::LevelFilter::Warn);
        assert_eq!(parse_level("50"), log::LevelFilter::Error);
    }

    #[test]
    fn named_levels_and_fallback() {
        assert_eq!(parse_level("debug"), log::LevelFilter::Debug);
        assert_eq!(parse_level("nonsense"), log::LevelFilter::Info);
    }
}
