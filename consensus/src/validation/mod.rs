//! # Header Validation
//!
//! Every incoming header runs through an ordered list of independent
//! validators. Each one sees the same unmodified snapshot of the store and
//! the first non-accepting outcome wins. Only an accepted header yields a
//! [`ValidatedHeader`], and only a [`ValidatedHeader`] can be merged into
//! state, so no half-checked round ever reaches the store.

use thiserror::Error;
use tracing::debug;

use crate::config::ConsensusConfig;
use crate::generation::RoundGenerator;
use crate::header::{Behavior, HeaderInfo, HeaderOrigin};
use crate::round::{ParticipantRecord, Round};
use crate::scheduler::ConsensusScheduler;
use crate::secret::SecretRevealReconstructor;
use crate::store::RoundStore;
use crate::types::{PublicKey, Timestamp};
use crate::{TenureError, TenureResult};

mod commitment;
mod irreversible;
mod permission;
mod round_terminate;
mod time_slot;

pub use commitment::{CommitmentValidator, SignatureValidator};
pub use irreversible::IrreversibleHeightValidator;
pub use permission::PermissionValidator;
pub use round_terminate::{RoundBindingValidator, RoundTerminateValidator};
pub use time_slot::{ContinuousBlocksValidator, TimeSlotValidator};

// ============================================================================
// Outcomes
// ============================================================================

/// Verdict of one validator or of the whole pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Accept,
    /// Header is invalid
    Reject(TenureError),
    /// Header may become valid if rebuilt, only for local headers
    Retry(TenureError),
}

impl ValidationOutcome {
    pub fn is_accept(&self) -> bool {
        matches!(self, ValidationOutcome::Accept)
    }

    /// Remote headers are never retried.
    pub fn for_origin(self, origin: HeaderOrigin) -> Self {
        match (self, origin) {
            (ValidationOutcome::Retry(e), HeaderOrigin::Remote) => ValidationOutcome::Reject(e),
            (outcome, _) => outcome,
        }
    }

    pub fn into_result(self) -> TenureResult<()> {
        match self {
            ValidationOutcome::Accept => Ok(()),
            ValidationOutcome::Reject(e) | ValidationOutcome::Retry(e) => Err(e),
        }
    }
}

impl From<TenureResult<()>> for ValidationOutcome {
    fn from(result: TenureResult<()>) -> Self {
        match result {
            Ok(()) => ValidationOutcome::Accept,
            Err(e) => ValidationOutcome::Reject(e),
        }
    }
}

/// A header the pipeline did not accept.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{error}")]
pub struct Refusal {
    pub error: TenureError,
    /// Set only for local headers that failed a retryable check
    pub retryable: bool,
}

impl From<Refusal> for TenureError {
    fn from(refusal: Refusal) -> Self {
        refusal.error
    }
}

// ============================================================================
// Context
// ============================================================================

/// Read-only view a validator checks a header against.
pub struct ValidationContext<'a> {
    pub header: &'a HeaderInfo,
    pub sender: &'a PublicKey,
    pub proposed: &'a Round,
    pub base_round: &'a Round,
    pub previous_round: Option<&'a Round>,
    pub store: &'a RoundStore,
    pub scheduler: &'a ConsensusScheduler,
    pub generator: &'a RoundGenerator,
    /// Timestamp of the block carrying the header
    pub block_time: Timestamp,
}

impl<'a> ValidationContext<'a> {
    /// Fails with `MissingData` when the header carries no round or the
    /// store has no current round.
    pub fn new(
        store: &'a RoundStore,
        scheduler: &'a ConsensusScheduler,
        generator: &'a RoundGenerator,
        header: &'a HeaderInfo,
        block_time: Timestamp,
    ) -> TenureResult<Self> {
        Ok(Self {
            header,
            sender: &header.sender_pubkey,
            proposed: header.proposed_round()?,
            base_round: store.current_round()?,
            previous_round: store.previous_round(),
            store,
            scheduler,
            generator,
            block_time,
        })
    }

    pub fn behavior(&self) -> Behavior {
        self.header.behavior
    }

    pub fn config(&self) -> &ConsensusConfig {
        self.scheduler.config()
    }

    pub fn mining_interval(&self) -> u64 {
        self.config().mining_interval_ms
    }

    pub fn is_bootstrap(&self) -> bool {
        self.store.is_bootstrap()
    }

    /// Sender's record in the base round.
    pub fn base_record(&self) -> TenureResult<&'a ParticipantRecord> {
        self.base_round.record(self.sender)
    }

    /// Sender's record in the proposed round.
    pub fn proposed_record(&self) -> TenureResult<&'a ParticipantRecord> {
        self.proposed.record(self.sender)
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// One independent header check.
pub trait Validator: Send + Sync {
    fn name(&self) -> &'static str;

    fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationOutcome;
}

/// Ordered validator list.
pub struct ValidationPipeline {
    validators: Vec<Box<dyn Validator>>,
}

impl ValidationPipeline {
    /// Pipeline without validators; accepts every well-formed header.
    pub fn empty() -> Self {
        Self {
            validators: Vec::new(),
        }
    }

    /// The full production pipeline.
    pub fn standard() -> Self {
        Self::empty()
            .with_validator(PermissionValidator)
            .with_validator(RoundBindingValidator)
            .with_validator(TimeSlotValidator)
            .with_validator(ContinuousBlocksValidator)
            .with_validator(CommitmentValidator)
            .with_validator(SignatureValidator)
            .with_validator(RoundTerminateValidator)
            .with_validator(IrreversibleHeightValidator)
    }

    pub fn with_validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validators.push(Box::new(validator));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.validators.iter().map(|v| v.name()).collect()
    }

    /// Run every validator in order; the first non-accepting outcome wins.
    pub fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationOutcome {
        if ctx.behavior() == Behavior::Wait {
            return ValidationOutcome::Reject(TenureError::RoundSequenceError(format!(
                "header from {} carries no behavior",
                ctx.sender
            )));
        }

        for validator in &self.validators {
            let outcome = validator.validate(ctx);
            if !outcome.is_accept() {
                debug!(
                    validator = validator.name(),
                    sender = %ctx.sender,
                    behavior = %ctx.behavior(),
                    round = ctx.base_round.round_number,
                    outcome = ?outcome,
                    "header not accepted"
                );
                return outcome;
            }
        }
        ValidationOutcome::Accept
    }

    /// Validate and, on acceptance, hand out the header for merging.
    pub fn admit(
        &self,
        ctx: &ValidationContext<'_>,
        origin: HeaderOrigin,
    ) -> Result<ValidatedHeader, Refusal> {
        match self.validate(ctx).for_origin(origin) {
            ValidationOutcome::Accept => Ok(ValidatedHeader {
                sender: ctx.sender.clone(),
                behavior: ctx.behavior(),
                proposed: ctx.proposed.clone(),
                block_time: ctx.block_time,
            }),
            ValidationOutcome::Reject(error) => Err(Refusal {
                error,
                retryable: false,
            }),
            ValidationOutcome::Retry(error) => Err(Refusal {
                error,
                retryable: true,
            }),
        }
    }
}

impl Default for ValidationPipeline {
    fn default() -> Self {
        Self::standard()
    }
}

// ============================================================================
// Merge
// ============================================================================

/// A header that passed the pipeline. Fields are private: the only way to
/// obtain one is [`ValidationPipeline::admit`].
#[derive(Debug, Clone)]
pub struct ValidatedHeader {
    sender: PublicKey,
    behavior: Behavior,
    proposed: Round,
    block_time: Timestamp,
}

impl ValidatedHeader {
    pub fn sender(&self) -> &PublicKey {
        &self.sender
    }

    pub fn behavior(&self) -> Behavior {
        self.behavior
    }

    pub fn block_time(&self) -> Timestamp {
        self.block_time
    }

    pub fn proposed_round(&self) -> &Round {
        &self.proposed
    }

    /// Round that results from applying this header to `base`.
    ///
    /// Same-round headers only contribute the sender's own fields; derived
    /// orders are recomputed rather than copied. Terminating headers yield
    /// the regenerated next round with recoverable in-values revealed.
    pub fn apply_to(&self, base: &Round, generator: &RoundGenerator) -> TenureResult<Round> {
        match self.behavior {
            Behavior::UpdateValue => self.merge_update_value(base),
            Behavior::TinyBlock => {
                let mut merged = base.clone();
                let record = merged.record_mut(&self.sender)?;
                record.actual_mining_times.push(self.block_time);
                record.produced_blocks = record.produced_blocks.saturating_add(1);
                Ok(merged)
            }
            Behavior::NextRound | Behavior::NextTerm => {
                let participants = (self.behavior == Behavior::NextTerm)
                    .then(|| self.proposed.participant_list());
                let mut next = generator.generate_next(base, self.block_time, participants)?;
                SecretRevealReconstructor::reveal_into(base, &mut next)?;
                if let Some(record) = next.participants.get_mut(&self.sender) {
                    record.produced_blocks = record.produced_blocks.saturating_add(1);
                }
                Ok(next)
            }
            Behavior::Wait => Err(TenureError::RoundSequenceError(
                "nothing to apply for a wait".to_string(),
            )),
        }
    }

    fn merge_update_value(&self, base: &Round) -> TenureResult<Round> {
        let proposed = self.proposed.record(&self.sender)?;
        let signature = proposed.signature.ok_or_else(|| {
            TenureError::MissingData(format!("{} published no signature", self.sender))
        })?;

        let mut merged = base.clone();
        {
            let record = merged.record_mut(&self.sender)?;
            record.out_value = proposed.out_value;
            if proposed.previous_in_value.is_some() {
                record.previous_in_value = proposed.previous_in_value;
            }
            record.implied_irreversible_height = proposed.implied_irreversible_height;
            record.actual_mining_times.push(self.block_time);
            record.produced_blocks = record.produced_blocks.saturating_add(1);
            record.encrypted_pieces = proposed
                .encrypted_pieces
                .iter()
                .filter(|(holder, _)| base.contains(holder))
                .map(|(holder, piece)| (holder.clone(), piece.clone()))
                .collect();
        }
        merged.apply_next_round_order(&self.sender, signature)?;

        // Pieces the sender decrypted for other participants
        for (target, record) in &self.proposed.participants {
            if *target == self.sender {
                continue;
            }
            let Some(piece) = record.decrypted_pieces.get(&self.sender) else {
                continue;
            };
            match merged.participants.get_mut(target) {
                Some(target_record) => {
                    target_record
                        .decrypted_pieces
                        .insert(self.sender.clone(), piece.clone());
                }
                None => debug!(target = %target, "dropping piece for departed participant"),
            }
        }
        Ok(merged)
    }
}
