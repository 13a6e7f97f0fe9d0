//! Client wire format: framing for the broadcast stream.
//!
//! A client opens a stream and writes request frames; the orderer writes
//! exactly one reply per request, in request order. A clean EOF at a frame
//! boundary is the client's half-close.
//!
//! Both frame types have fixed little-endian layouts built from zerocopy
//! byte-order types, so there is no padding and no unsafe code here.

use static_assertions::assert_eq_size;
use zerocopy::byteorder::{LittleEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

// ── Request ───────────────────────────────────────────────────────────────────

/// Precedes every request payload.
///
/// Wire size: 8 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct RequestHeader {
    /// Wire format version. Currently 0x01.
    pub version: u8,
    /// Request kind. Only [`KIND_BROADCAST`] is defined.
    pub kind: u8,
    /// Reserved, must be zero.
    pub flags: u8,
    /// Reserved, must be zero.
    pub reserved: u8,
    /// Payload length in bytes, not including this header.
    pub length: U32<LittleEndian>,
}

assert_eq_size!(RequestHeader, [u8; REQUEST_HEADER_LEN]);

impl RequestHeader {
    /// Header for a broadcast request carrying `len` payload bytes.
    pub fn broadcast(len: usize) -> Result<Self, WireError> {
        if len > MAX_FRAME {
            return Err(WireError::FrameTooLarge(len));
        }
        Ok(Self {
            version: WIRE_VERSION,
            kind: KIND_BROADCAST,
            flags: 0,
            reserved: 0,
            length: U32::new(len as u32),
        })
    }

    /// Check a received header. Returns the payload length.
    pub fn validate(&self) -> Result<usize, WireError> {
        if self.version != WIRE_VERSION {
            return Err(WireError::UnknownVersion(self.version));
        }
        if self.kind != KIND_BROADCAST {
            return Err(WireError::UnknownKind(self.kind));
        }
        if self.flags != 0 || self.reserved != 0 {
            return Err(WireError::ReservedFlagsSet(self.flags | self.reserved));
        }
        let len = self.length.get() as usize;
        if len > MAX_FRAME {
            return Err(WireError::FrameTooLarge(len));
        }
        Ok(len)
    }
}

/// Header followed by payload, ready to write.
pub fn encode_request(payload: &[u8]) -> Result<Vec<u8>, WireError> {
    let header = RequestHeader::broadcast(payload.len())?;
    let mut out = Vec::with_capacity(REQUEST_HEADER_LEN + payload.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

// ── Reply ─────────────────────────────────────────────────────────────────────

/// Acknowledgement status.
///
/// `Success` means the message was accepted into the ordering queue, not
/// that its block has been durably sequenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Status {
    /// Enqueued for ordering.
    Success = 200,
    /// Rejected: larger than the configured maximum.
    BadRequest = 400,
    /// Rejected: the cutter has halted or is shutting down.
    ServiceUnavailable = 503,
}

impl Status {
    pub fn is_success(self) -> bool {
        matches!(self, Status::Success)
    }
}

impl TryFrom<u16> for Status {
    type Error = WireError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            200 => Ok(Status::Success),
            400 => Ok(Status::BadRequest),
            503 => Ok(Status::ServiceUnavailable),
            other => Err(WireError::UnknownStatus(other)),
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Status::Success => "SUCCESS",
            Status::BadRequest => "BAD_REQUEST",
            Status::ServiceUnavailable => "SERVICE_UNAVAILABLE",
        };
        f.write_str(name)
    }
}

/// One per request.
///
/// Wire size: 4 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct BroadcastReply {
    pub version: u8,
    /// Reserved, must be zero.
    pub reserved: u8,
    /// [`Status`] code.
    pub status: U16<LittleEndian>,
}

assert_eq_size!(BroadcastReply, [u8; REPLY_LEN]);

impl BroadcastReply {
    pub fn new(status: Status) -> Self {
        Self {
            version: WIRE_VERSION,
            reserved: 0,
            status: U16::new(status as u16),
        }
    }

    pub fn status(&self) -> Result<Status, WireError> {
        if self.version != WIRE_VERSION {
            return Err(WireError::UnknownVersion(self.version));
        }
        Status::try_from(self.status.get())
    }
}

// ── Constants ─────────────────────────────────────────────────────────────────

/// Current wire format version.
pub const WIRE_VERSION: u8 = 0x01;

/// Request kind: submit one message for ordering.
pub const KIND_BROADCAST: u8 = 0x01;

pub const REQUEST_HEADER_LEN: usize = 8;
pub const REPLY_LEN: usize = 4;

/// Hard protocol ceiling on a single payload. Anything bigger cannot be
/// skipped safely and ends the session. The configurable per-message limit
/// sits below this and is answered with `BadRequest` instead.
pub const MAX_FRAME: usize = 16 * 1024 * 1024;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unknown wire version: 0x{0:02x}")]
    UnknownVersion(u8),

    #[error("unknown request kind: 0x{0:02x}")]
    UnknownKind(u8),

    #[error("unknown reply status: {0}")]
    UnknownStatus(u16),

    #[error("frame length {0} exceeds maximum {}", MAX_FRAME)]
    FrameTooLarge(usize),

    #[error("reserved flags are non-zero: 0x{0:02x}")]
    ReservedFlagsSet(u8),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
