//! # Tenure - Round-Based Leader Rotation Consensus
//!
//! This library implements the deterministic state transition of a
//! permissioned, round-based block production protocol. A fixed set of
//! participants take turns producing blocks inside time slots; the set is
//! replaced at term boundaries from an externally supplied election result,
//! and per-participant attestations are periodically aggregated into an
//! agreed irreversible block height (LIB).
//!
//! ## Architecture
//!
//! - **RoundStore**: round history and scalar chain state ([`store`])
//! - **RoundGenerator**: `current round -> next round` ([`generation`])
//! - **ValidationPipeline**: ordered header validators ([`validation`])
//! - **ConsensusScheduler**: what a participant may do and when ([`scheduler`])
//! - **IrreversibleHeightAggregator**: 2/3 LIB aggregation ([`irreversible`])
//! - **SecretRevealReconstructor**: threshold recovery of in-values ([`secret`])
//! - **ConsensusEngine**: wires the components into one block transition ([`engine`])
//!
//! ## Usage
//!
//! ```rust
//! use tenure_consensus::{ConsensusConfig, ConsensusEngine, PublicKey};
//!
//! let keys: Vec<PublicKey> = (0u8..4).map(|i| PublicKey::new(vec![i + 1; 33])).collect();
//! let engine = ConsensusEngine::genesis(ConsensusConfig::default(), keys, 1_000_000).unwrap();
//! assert_eq!(engine.current_round().unwrap().round_number, 1);
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod config;
pub mod engine;
pub mod generation;
pub mod header;
pub mod irreversible;
pub mod round;
pub mod scheduler;
pub mod secret;
pub mod store;
pub mod types;
pub mod validation;

pub use config::{ConsensusConfig, ParticipantCountSchedule};
pub use engine::{BlockEffects, ConsensusEngine, ElectionSource, TriggerInformation};
pub use generation::RoundGenerator;
pub use header::{Behavior, HeaderInfo, HeaderOrigin};
pub use irreversible::IrreversibleHeightAggregator;
pub use round::{ParticipantRecord, Round};
pub use scheduler::{ConsensusCommand, ConsensusScheduler, MiningStatus};
pub use secret::SecretRevealReconstructor;
pub use store::RoundStore;
pub use types::{BlockHeight, Hash, PublicKey, RoundNumber, TermNumber, Timestamp};
pub use validation::{ValidatedHeader, ValidationContext, ValidationOutcome, ValidationPipeline, Validator};

/// Error taxonomy of the consensus core.
///
/// Every fatal variant rejects exactly one header; none of them leaves a
/// partially applied round behind.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum TenureError {
    /// Sender is not a participant of the base round
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Block time outside the sender's window
    #[error("time slot violation: {0}")]
    TimeSlotViolation(String),

    /// Out-value, in-value or signature mismatch
    #[error("invalid commitment: {0}")]
    InvalidCommitment(String),

    /// Wrong round number, duplicate orders or a foreign round layout
    #[error("round sequence error: {0}")]
    RoundSequenceError(String),

    /// Round number or irreversible height moving backward
    #[error("regression: {0}")]
    RegressionError(String),

    /// Referenced round or participant does not exist
    #[error("missing data: {0}")]
    MissingData(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Wire encoding or decoding failure
    #[error("codec error: {0}")]
    Codec(String),

    #[error("arithmetic overflow: {0}")]
    ArithmeticOverflow(String),
}

/// Result type for consensus operations
pub type TenureResult<T> = Result<T, TenureError>;

/// Smallest count that is at least two thirds of `n`, i.e. `ceil(2n/3)`.
///
/// Used by both the term-change predicate and LIB aggregation so that the
/// two never disagree for `n` divisible by three.
pub fn two_thirds_quorum(n: usize) -> TenureResult<usize> {
    n.checked_mul(2)
        .and_then(|d| d.checked_add(2))
        .map(|d| d / 3)
        .ok_or_else(|| TenureError::ArithmeticOverflow(format!("quorum of {n}")))
}

/// Number of decrypted pieces needed to rebuild a shared in-value:
/// `max(1, floor(2n/3))`.
pub fn minimum_secret_pieces(n: usize) -> TenureResult<usize> {
    n.checked_mul(2)
        .map(|d| (d / 3).max(1))
        .ok_or_else(|| TenureError::ArithmeticOverflow(format!("piece threshold of {n}")))
}
