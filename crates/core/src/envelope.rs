//! CSP envelope headers
//!
//! The relay forwards bytes without looking at them. Only the capture tap
//! decodes the envelope header prepended by the CubeSat Space Protocol, and it
//! does so through [`EnvelopeDecoder`] so a fake can stand in during tests.

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::{HubError, Result};

/// Header size of a CSP 1.x identifier
pub const CSP_V1_HEADER_LEN: usize = 4;

/// Header size of a CSP 2.x identifier
pub const CSP_V2_HEADER_LEN: usize = 6;

bitflags! {
    /// Header flag bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CspFlags: u8 {
        const CRC32 = 0x01;
        const RDP = 0x02;
        const XTEA = 0x04;
        const HMAC = 0x08;
        const FRAG = 0x10;
    }
}

/// Decoded envelope header of one captured message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeHeader {
    pub source: u16,
    pub destination: u16,
    pub dest_port: u8,
    pub src_port: u8,
    pub priority: u8,
    pub flags: u8,
    /// Bytes following the header
    pub payload_length: usize,
}

impl EnvelopeHeader {
    pub fn csp_flags(&self) -> CspFlags {
        CspFlags::from_bits_retain(self.flags)
    }
}

impl fmt::Display for EnvelopeHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Packet: Src {}, Dst {}, Dport {}, Sport {}, Pri {}, Flags 0x{:02X}, Size {}",
            self.source,
            self.destination,
            self.dest_port,
            self.src_port,
            self.priority,
            self.flags,
            self.payload_length
        )
    }
}

/// Decodes the envelope header of a raw message
pub trait EnvelopeDecoder: Send + Sync {
    /// Shortest input `decode` accepts
    fn min_len(&self) -> usize;

    /// Decode the header at the start of `raw`.
    ///
    /// Fails with [`HubError::MalformedEnvelope`] when `raw` is shorter than
    /// [`min_len`](Self::min_len).
    fn decode(&self, raw: &[u8]) -> Result<EnvelopeHeader>;
}

/// CSP identifier layout version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "u8", into = "u8")]
pub enum CspVersion {
    /// 32-bit identifier with 5-bit addresses
    V1,
    /// 48-bit identifier with 14-bit addresses
    #[default]
    V2,
}

impl CspVersion {
    pub fn header_len(&self) -> usize {
        match self {
            Self::V1 => CSP_V1_HEADER_LEN,
            Self::V2 => CSP_V2_HEADER_LEN,
        }
    }
}

impl TryFrom<u8> for CspVersion {
    type Error = HubError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::V1),
            2 => Ok(Self::V2),
            other => Err(HubError::InvalidConfig(format!(
                "unsupported CSP version: {}",
                other
            ))),
        }
    }
}

impl From<CspVersion> for u8 {
    fn from(version: CspVersion) -> u8 {
        match version {
            CspVersion::V1 => 1,
            CspVersion::V2 => 2,
        }
    }
}

impl FromStr for CspVersion {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self> {
        let value: u8 = s
            .trim()
            .parse()
            .map_err(|_| HubError::InvalidConfig(format!("invalid CSP version: {}", s)))?;
        Self::try_from(value)
    }
}

impl fmt::Display for CspVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

/// [`EnvelopeDecoder`] for CSP 1.x and 2.x identifiers
#[derive(Debug, Clone, Copy, Default)]
pub struct CspDecoder {
    version: CspVersion,
}

impl CspDecoder {
    pub fn new(version: CspVersion) -> Self {
        Self { version }
    }

    pub fn version(&self) -> CspVersion {
        self.version
    }

    fn decode_v1(raw: &[u8]) -> EnvelopeHeader {
        let id = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
        EnvelopeHeader {
            priority: ((id >> 30) & 0x3) as u8,
            source: ((id >> 25) & 0x1f) as u16,
            destination: ((id >> 20) & 0x1f) as u16,
            dest_port: ((id >> 14) & 0x3f) as u8,
            src_port: ((id >> 8) & 0x3f) as u8,
            flags: (id & 0xff) as u8,
            payload_length: raw.len() - CSP_V1_HEADER_LEN,
        }
    }

    fn decode_v2(raw: &[u8]) -> EnvelopeHeader {
        let mut id_bytes = [0u8; 8];
        id_bytes[2..].copy_from_slice(&raw[..CSP_V2_HEADER_LEN]);
        let id = u64::from_be_bytes(id_bytes);
        EnvelopeHeader {
            priority: ((id >> 46) & 0x3) as u8,
            destination: ((id >> 32) & 0x3fff) as u16,
            source: ((id >> 18) & 0x3fff) as u16,
            dest_port: ((id >> 12) & 0x3f) as u8,
            src_port: ((id >> 6) & 0x3f) as u8,
            flags: (id & 0x3f) as u8,
            payload_length: raw.len() - CSP_V2_HEADER_LEN,
        }
    }
}

impl EnvelopeDecoder for CspDecoder {
    fn min_len(&self) -> usize {
        self.version.header_len()
    }

    fn decode(&self, raw: &[u8]) -> Result<EnvelopeHeader> {
        let required = self.min_len();
        if raw.len() < required {
            return Err(HubError::MalformedEnvelope {
                required,
                actual: raw.len(),
            });
        }

        Ok(match self.version {
            CspVersion::V1 => Self::decode_v1(raw),
            CspVersion::V2 => Self::decode_v2(raw),
        })
    }
}
