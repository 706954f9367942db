//! Consensus header payload and its wire encoding.

use bincode::Options;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::round::Round;
use crate::types::PublicKey;
use crate::{TenureError, TenureResult};

/// Upper bound on an encoded header.
pub const MAX_HEADER_BYTES: u64 = 4 * 1024 * 1024;

/// What a participant may do, or did, at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Behavior {
    /// Nothing to produce yet
    Wait,
    /// First block in the participant's own slot, publishing its commitment
    UpdateValue,
    /// Follow-up block in the same slot
    TinyBlock,
    /// Terminates the round within the current term
    NextRound,
    /// Terminates the round and the term
    NextTerm,
}

impl Behavior {
    pub fn terminates_round(&self) -> bool {
        matches!(self, Behavior::NextRound | Behavior::NextTerm)
    }

    pub fn is_same_round(&self) -> bool {
        matches!(self, Behavior::UpdateValue | Behavior::TinyBlock)
    }
}

impl fmt::Display for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Behavior::Wait => "wait",
            Behavior::UpdateValue => "update_value",
            Behavior::TinyBlock => "tiny_block",
            Behavior::NextRound => "next_round",
            Behavior::NextTerm => "next_term",
        };
        f.write_str(name)
    }
}

/// Where a header came from. `Retry` is only meaningful for local headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeaderOrigin {
    Local,
    Remote,
}

/// Consensus payload carried by every block header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderInfo {
    pub sender_pubkey: PublicKey,
    /// Proposed round: the updated current round, or the next round
    pub round: Option<Round>,
    pub behavior: Behavior,
}

impl HeaderInfo {
    pub fn new(sender_pubkey: PublicKey, round: Round, behavior: Behavior) -> Self {
        Self {
            sender_pubkey,
            round: Some(round),
            behavior,
        }
    }

    /// Proposed round, `MissingData` if absent or empty.
    pub fn proposed_round(&self) -> TenureResult<&Round> {
        match &self.round {
            Some(round) if !round.is_empty() => Ok(round),
            Some(_) => Err(TenureError::MissingData(format!(
                "header from {} carries an empty round",
                self.sender_pubkey
            ))),
            None => Err(TenureError::MissingData(format!(
                "header from {} carries no round",
                self.sender_pubkey
            ))),
        }
    }

    pub fn encode(&self) -> TenureResult<Vec<u8>> {
        codec_options()
            .serialize(self)
            .map_err(|e| TenureError::Codec(e.to_string()))
    }

    /// Decode a header, rejecting oversized input and trailing bytes.
    pub fn decode(bytes: &[u8]) -> TenureResult<Self> {
        codec_options()
            .deserialize(bytes)
            .map_err(|e| TenureError::Codec(e.to_string()))
    }
}

pub(crate) fn codec_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_limit(MAX_HEADER_BYTES)
        .reject_trailing_bytes()
}

pub(crate) fn snapshot_options() -> impl Options {
    bincode::DefaultOptions::new().reject_trailing_bytes()
}
