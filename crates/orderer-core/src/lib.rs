//! orderer-core: block model, canonical encoding, client wire format, and
//! configuration. All other orderer crates depend on this one.

pub mod block;
pub mod chain;
pub mod config;
pub mod wire;

pub use block::{Block, BlockHash, SealedBlock, GENESIS_PAYLOAD};
pub use chain::{verify_chain, ChainError, ChainState};
pub use wire::{BroadcastReply, Status};
