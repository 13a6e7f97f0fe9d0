//! Chain state: the running `(next number, previous hash)` pair that gives
//! blocks their total order and tamper-evident linkage.

use bytes::Bytes;

use crate::block::{hash_bytes, Block, BlockError, SealedBlock, GENESIS_PAYLOAD};

/// Where the next block goes.
///
/// Invariant: block `n` has number `n`; its `prev_hash` is the hash of block
/// `n - 1`, or empty for `n == 0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainState {
    pub next_number: u64,
    pub prev_hash: Bytes,
}

impl Default for ChainState {
    fn default() -> Self {
        Self::genesis()
    }
}

impl ChainState {
    /// Empty chain: the next block is genesis.
    pub fn genesis() -> Self {
        Self {
            next_number: 0,
            prev_hash: Bytes::new(),
        }
    }

    /// State following an already-accepted block, given its encoding.
    pub fn after(last_block: &[u8]) -> Result<Self, ChainError> {
        let block = Block::decode(last_block).map_err(|source| ChainError::Decode {
            index: None,
            source,
        })?;
        let next_number = block
            .number
            .checked_add(1)
            .ok_or(ChainError::NumberOverflow)?;
        Ok(Self {
            next_number,
            prev_hash: Bytes::copy_from_slice(&hash_bytes(last_block)),
        })
    }

    /// True until the genesis block has been accepted.
    pub fn needs_genesis(&self) -> bool {
        self.next_number == 0
    }

    /// Move past a block that the backend has accepted.
    pub fn advance(&mut self, sealed: &SealedBlock) {
        debug_assert_eq!(sealed.number, self.next_number, "advance out of order");
        self.next_number += 1;
        self.prev_hash = Bytes::copy_from_slice(&sealed.hash);
    }

    pub fn prev_hash_hex(&self) -> String {
        hex::encode(&self.prev_hash)
    }
}

/// Walk encoded blocks from genesis and check numbering and linkage.
///
/// Returns the state after the last block, i.e. where the next block would
/// go. An empty input yields [`ChainState::genesis`].
pub fn verify_chain<I, B>(blocks: I) -> Result<ChainState, ChainError>
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut state = ChainState::genesis();

    for (index, data) in blocks.into_iter().enumerate() {
        let data = data.as_ref();
        let block = Block::decode(data).map_err(|source| ChainError::Decode {
            index: Some(index as u64),
            source,
        })?;

        if block.number != state.next_number {
            return Err(ChainError::Numbering {
                expected: state.next_number,
                found: block.number,
            });
        }
        if block.prev_hash != state.prev_hash {
            return Err(ChainError::BrokenLink {
                number: block.number,
            });
        }
        if block.number == 0
            && (block.messages.len() != 1 || block.messages[0] != GENESIS_PAYLOAD)
        {
            return Err(ChainError::BadGenesis);
        }

        state.next_number += 1;
        state.prev_hash = Bytes::copy_from_slice(&hash_bytes(data));
    }

    Ok(state)
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("block {index:?} does not decode: {source}")]
    Decode {
        index: Option<u64>,
        #[source]
        source: BlockError,
    },

    #[error("expected block {expected}, found block {found}")]
    Numbering { expected: u64, found: u64 },

    #[error("block {number} does not link to its predecessor")]
    BrokenLink { number: u64 },

    #[error("genesis block does not carry the bootstrap payload")]
    BadGenesis,

    #[error("block number overflow")]
    NumberOverflow,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
