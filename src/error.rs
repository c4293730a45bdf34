use std::error::Error;

/// Failure while packing a sysex body into 7-bit wire bytes.
///
/// Bytes above 127 are flattened by carrying their quotient into the next
/// higher byte; when the most significant byte itself overflows there is
/// nowhere left to carry and the message is unencodable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysexError {
    OverflowByte { index: usize, value: u16 },
}

impl Error for SysexError {}

impl std::fmt::Display for SysexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SysexError::OverflowByte { index, value } => {
                write!(
                    f,
                    "Sysex byte {} overflows the 7-bit range after carry ({}).",
                    index, value
                )
            }
        }
    }
}

/// Failure while decoding an inbound sysex frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysexDecodeError {
    /// The frame does not carry the vendor header. Dropped silently.
    UnknownVendor,
    /// The frame is shorter than header + opcode + address + checksum.
    Truncated,
    /// Only command frames (opcode 0x12) are decoded.
    NotACommand(u8),
    /// The checksum byte does not zero the payload sum modulo 128.
    BadChecksum { expected: u8, actual: u8 },
}

impl Error for SysexDecodeError {}

impl std::fmt::Display for SysexDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SysexDecodeError::UnknownVendor => {
                write!(f, "Sysex frame does not match the vendor header.")
            }
            SysexDecodeError::Truncated => {
                write!(f, "Sysex frame is too short to carry an address.")
            }
            SysexDecodeError::NotACommand(op) => {
                write!(f, "Sysex frame carries opcode {:#04x}, expected a command.", op)
            }
            SysexDecodeError::BadChecksum { expected, actual } => {
                write!(f, "Sysex checksum mismatch: expected {}, got {}.", expected, actual)
            }
        }
    }
}

/// A MIDI port could not be opened after the bounded retry sequence.
#[derive(Debug)]
pub struct PortOpenError {
    pub port: String,
    pub attempts: u32,
    pub source: Option<Box<dyn Error + Send + Sync>>,
}

impl Error for PortOpenError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn Error + 'static))
    }
}

impl std::fmt::Display for PortOpenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Could not open MIDI port \"{}\" after {} attempts.",
            self.port, self.attempts
        )
    }
}

/// The audio backend could not bring up the duplex stream.
#[derive(Debug)]
pub enum AudioBackendError {
    DeviceNotFound(String),
    ConfigUnsupported(String),
    StreamFailed(Box<dyn Error + Send + Sync>),
}

impl Error for AudioBackendError {}

impl std::fmt::Display for AudioBackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioBackendError::DeviceNotFound(name) => {
                write!(f, "No audio device matching \"{}\".", name)
            }
            AudioBackendError::ConfigUnsupported(what) => {
                write!(f, "Audio device rejected the requested configuration: {}.", what)
            }
            AudioBackendError::StreamFailed(e) => {
                write!(f, "Audio stream failed: {}", e)
            }
        }
    }
}
