//! Vendor system-exclusive framing.
//!
//! Every frame is `F0` + vendor header + opcode + 4-byte address + body +
//! checksum + `F7`. The address is the 2-byte family prefix followed by the
//! first two body bytes; the checksum zeroes the sum of address and body
//! modulo 128.

use smallvec::SmallVec;

use crate::error::{SysexDecodeError, SysexError};

pub const VENDOR_HEADER: [u8; 6] = [0x41, 0x00, 0x00, 0x00, 0x00, 0x69];
pub const OP_REQUEST: u8 = 0x11;
pub const OP_COMMAND: u8 = 0x12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysexOp {
    Request,
    Command,
}

impl SysexOp {
    pub fn byte(self) -> u8 {
        match self {
            SysexOp::Request => OP_REQUEST,
            SysexOp::Command => OP_COMMAND,
        }
    }
}

/// The three address families the synth exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    /// Global state: patch number, program metadata.
    Common,
    /// The current patch, instrument slots included.
    Patch,
    /// Input/output routing and gains.
    InOut,
}

impl AddressFamily {
    pub fn prefix(self) -> [u8; 2] {
        match self {
            AddressFamily::Common => [0, 1],
            AddressFamily::Patch => [16, 0],
            AddressFamily::InOut => [0, 4],
        }
    }

    pub fn from_prefix(prefix: [u8; 2]) -> Option<Self> {
        match prefix {
            [0, 1] => Some(AddressFamily::Common),
            [16, 0] => Some(AddressFamily::Patch),
            [0, 4] => Some(AddressFamily::InOut),
            _ => None,
        }
    }
}

/// A decoded vendor frame: opcode, 4-byte address, body (checksum and
/// framing bytes stripped).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysexFrame {
    pub op: SysexOp,
    pub address: [u8; 4],
    pub body: SmallVec<[u8; 16]>,
}

impl SysexFrame {
    /// Build a read-back request. `body` starts with the two low address
    /// bytes and may carry values above 127; those are flattened.
    pub fn request(family: AddressFamily, body: &[u16]) -> Result<Self, SysexError> {
        Self::build(SysexOp::Request, family, body)
    }

    /// Build a command frame.
    pub fn command(family: AddressFamily, body: &[u16]) -> Result<Self, SysexError> {
        Self::build(SysexOp::Command, family, body)
    }

    fn build(op: SysexOp, family: AddressFamily, body: &[u16]) -> Result<Self, SysexError> {
        let prefix = family.prefix();
        let mut raw: SmallVec<[u16; 24]> = SmallVec::new();
        raw.push(prefix[0] as u16);
        raw.push(prefix[1] as u16);
        raw.extend_from_slice(body);
        let flat = flatten_bytes(&raw)?;

        let mut address = [0u8; 4];
        for (i, b) in flat.iter().take(4).enumerate() {
            address[i] = *b;
        }
        let body = flat.iter().skip(4).copied().collect();
        Ok(SysexFrame { op, address, body })
    }

    pub fn family(&self) -> Option<AddressFamily> {
        AddressFamily::from_prefix([self.address[0], self.address[1]])
    }

    pub fn checksum(&self) -> u8 {
        let sum: u32 = self.address.iter().chain(self.body.iter()).map(|b| *b as u32).sum();
        ((128 - (sum % 128)) % 128) as u8
    }

    /// Serialize to a complete wire frame including `F0`/`F7`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(0xf0);
        out.extend_from_slice(&VENDOR_HEADER);
        out.push(self.op.byte());
        out.extend_from_slice(&self.address);
        out.extend_from_slice(&self.body);
        out.push(self.checksum());
        out.push(0xf7);
    }

    /// Strict decode of an inbound wire frame.
    ///
    /// Accepts only vendor command frames with a valid checksum; requests
    /// are never decoded (the synth does not send them back).
    pub fn decode(bytes: &[u8]) -> Result<Self, SysexDecodeError> {
        let bytes = match bytes {
            [0xf0, inner @ .., 0xf7] => inner,
            other => other,
        };
        if bytes.len() < VENDOR_HEADER.len() {
            return Err(SysexDecodeError::UnknownVendor);
        }
        let (header, rest) = bytes.split_at(VENDOR_HEADER.len());
        if header != VENDOR_HEADER {
            return Err(SysexDecodeError::UnknownVendor);
        }
        // opcode + address + checksum
        if rest.len() < 1 + 4 + 1 {
            return Err(SysexDecodeError::Truncated);
        }
        let op = rest[0];
        if op != OP_COMMAND {
            return Err(SysexDecodeError::NotACommand(op));
        }
        let payload = &rest[1..];
        let sum: u32 = payload.iter().map(|b| *b as u32).sum();
        if sum % 128 != 0 {
            let n = payload.len();
            let body_sum: u32 = payload[..n - 1].iter().map(|b| *b as u32).sum();
            return Err(SysexDecodeError::BadChecksum {
                expected: ((128 - (body_sum % 128)) % 128) as u8,
                actual: payload[n - 1],
            });
        }
        let address = [payload[0], payload[1], payload[2], payload[3]];
        let body = payload[4..payload.len() - 1].iter().copied().collect();
        Ok(SysexFrame { op: SysexOp::Command, address, body })
    }
}

/// Pack a byte sequence into 7-bit values.
///
/// Scanning from the least significant end, any value of 128 or more keeps
/// its remainder and carries the quotient into the next higher byte. A carry
/// out of byte 0 cannot be represented and fails the whole message.
pub fn flatten_bytes(values: &[u16]) -> Result<SmallVec<[u8; 24]>, SysexError> {
    let mut work: SmallVec<[u16; 24]> = values.iter().copied().collect();
    // Right-to-left: each index is visited after every carry from its right
    // has landed, so one pass settles the whole sequence.
    for i in (0..work.len()).rev() {
        if work[i] >= 128 {
            let carry = work[i] / 128;
            work[i] %= 128;
            if i == 0 {
                return Err(SysexError::OverflowByte { index: 0, value: carry * 128 + work[0] });
            }
            work[i - 1] += carry;
        }
    }
    Ok(work.iter().map(|v| *v as u8).collect())
}
