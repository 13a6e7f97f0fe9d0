//! Blocks: ordered, hash-chained batches of client messages.
//!
//! A block's identity is the BLAKE3 hash of its canonical encoding. The
//! encoding is the only thing a downstream verifier sees, so every field,
//! every length prefix, and the order of messages is part of the format:
//!
//! ```text
//! u8   version (0x01)
//! u64  number                      little-endian
//! u32  prev_hash length            little-endian, then prev_hash bytes
//! u32  message count               little-endian
//! per message: u32 length (LE), then payload bytes
//! ```
//!
//! Encoding is a pure function of `(number, prev_hash, messages)`. Two calls
//! with identical inputs produce identical bytes and therefore identical
//! hashes.

use bytes::{BufMut, Bytes, BytesMut};

/// Current block encoding version.
pub const BLOCK_VERSION: u8 = 0x01;

/// Payload of the single message carried by block 0.
pub const GENESIS_PAYLOAD: &[u8] = b"genesis";

/// BLAKE3 digest of a block's canonical encoding.
pub type BlockHash = [u8; 32];

/// An immutable batch of messages with its position in the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Position in the chain. Genesis is 0.
    pub number: u64,
    /// Hash of the previous block's encoding. Empty for genesis.
    pub prev_hash: Bytes,
    /// Client payloads in cut order.
    pub messages: Vec<Bytes>,
}

/// A block after encoding: what actually leaves the cutter.
#[derive(Debug, Clone)]
pub struct SealedBlock {
    pub number: u64,
    pub hash: BlockHash,
    pub data: Bytes,
    pub message_count: usize,
}

impl Block {
    pub fn new(number: u64, prev_hash: Bytes, messages: Vec<Bytes>) -> Self {
        Self {
            number,
            prev_hash,
            messages,
        }
    }

    /// Block 0: no predecessor, one fixed bootstrap message.
    pub fn genesis() -> Self {
        Self::new(
            0,
            Bytes::new(),
            vec![Bytes::from_static(GENESIS_PAYLOAD)],
        )
    }

    pub fn is_genesis(&self) -> bool {
        self.number == 0 && self.prev_hash.is_empty()
    }

    /// Give the messages back, e.g. after a failed send.
    pub fn into_messages(self) -> Vec<Bytes> {
        self.messages
    }

    /// Canonical encoding.
    pub fn encode(&self) -> Result<Bytes, BlockError> {
        let payload_len: usize = self.messages.iter().map(|m| 4 + m.len()).sum();
        let mut buf = BytesMut::with_capacity(1 + 8 + 4 + self.prev_hash.len() + 4 + payload_len);

        buf.put_u8(BLOCK_VERSION);
        buf.put_u64_le(self.number);
        buf.put_u32_le(len_u32("prev_hash", self.prev_hash.len())?);
        buf.put_slice(&self.prev_hash);
        buf.put_u32_le(len_u32("message count", self.messages.len())?);
        for msg in &self.messages {
            buf.put_u32_le(len_u32("message", msg.len())?);
            buf.put_slice(msg);
        }

        Ok(buf.freeze())
    }

    /// Encode and hash in one step.
    pub fn seal(&self) -> Result<SealedBlock, BlockError> {
        let data = self.encode()?;
        Ok(SealedBlock {
            number: self.number,
            hash: hash_bytes(&data),
            data,
            message_count: self.messages.len(),
        })
    }

    /// Parse a canonical encoding. Rejects unknown versions, truncation,
    /// and trailing bytes.
    pub fn decode(data: &[u8]) -> Result<Self, BlockError> {
        let mut r = Reader { data, offset: 0 };

        let version = r.take(1)?[0];
        if version != BLOCK_VERSION {
            return Err(BlockError::UnknownVersion(version));
        }
        let number = r.u64_le()?;
        let prev_len = r.u32_le()? as usize;
        let prev_hash = Bytes::copy_from_slice(r.take(prev_len)?);
        let count = r.u32_le()? as usize;

        // Every message needs at least its 4-byte prefix; don't let a
        // corrupt count drive a huge allocation.
        let mut messages = Vec::with_capacity(count.min(r.remaining() / 4));
        for _ in 0..count {
            let len = r.u32_le()? as usize;
            messages.push(Bytes::copy_from_slice(r.take(len)?));
        }

        if r.remaining() != 0 {
            return Err(BlockError::TrailingBytes(r.remaining()));
        }

        Ok(Self {
            number,
            prev_hash,
            messages,
        })
    }
}

/// The hasher as a free function: canonical bytes and content hash for a
/// `(number, prev_hash, messages)` tuple.
pub fn hash_block(
    number: u64,
    prev_hash: &[u8],
    messages: &[Bytes],
) -> Result<(Bytes, BlockHash), BlockError> {
    let block = Block::new(number, Bytes::copy_from_slice(prev_hash), messages.to_vec());
    let sealed = block.seal()?;
    Ok((sealed.data, sealed.hash))
}

/// BLAKE3 of raw bytes.
pub fn hash_bytes(data: &[u8]) -> BlockHash {
    *blake3::hash(data).as_bytes()
}

fn len_u32(what: &'static str, len: usize) -> Result<u32, BlockError> {
    u32::try_from(len).map_err(|_| BlockError::TooLarge { what, len })
}

struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], BlockError> {
        if self.remaining() < n {
            return Err(BlockError::Truncated {
                offset: self.offset,
                needed: n - self.remaining(),
            });
        }
        let out = &self.data[self.offset..self.offset + n];
        self.offset += n;
        Ok(out)
    }

    fn u32_le(&mut self) -> Result<u32, BlockError> {
        let mut b = [0u8; 4];
        b.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(b))
    }

    fn u64_le(&mut self) -> Result<u64, BlockError> {
        let mut b = [0u8; 8];
        b.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(b))
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlockError {
    #[error("unknown block version: 0x{0:02x}")]
    UnknownVersion(u8),

    #[error("block truncated at offset {offset}: {needed} more bytes needed")]
    Truncated { offset: usize, needed: usize },

    #[error("{0} trailing bytes after block")]
    TrailingBytes(usize),

    #[error("{what} length {len} does not fit in u32")]
    TooLarge { what: &'static str, len: usize },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
