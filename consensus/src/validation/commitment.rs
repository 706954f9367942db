//! Commit-reveal and consensus signature checks for `UpdateValue` headers.

use super::{ValidationContext, ValidationOutcome, Validator};
use crate::header::Behavior;
use crate::types::Hash;
use crate::{TenureError, TenureResult};

/// The revealed previous in-value must open last round's out-value.
pub struct CommitmentValidator;

impl Validator for CommitmentValidator {
    fn name(&self) -> &'static str {
        "commitment"
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationOutcome {
        if ctx.behavior() != Behavior::UpdateValue {
            return ValidationOutcome::Accept;
        }
        check_commitment(ctx).into()
    }
}

fn check_commitment(ctx: &ValidationContext<'_>) -> TenureResult<()> {
    let base = ctx.base_record()?;
    let proposed = ctx.proposed_record()?;

    if proposed.out_value.is_none() {
        return Err(TenureError::InvalidCommitment(format!(
            "{} published no out value",
            ctx.sender
        )));
    }

    let committed_last_round = ctx
        .previous_round
        .and_then(|p| p.get(ctx.sender))
        .and_then(|r| r.out_value)
        .is_some();
    // Without a reveal the signature falls back to the fresh out-value,
    // which the sender chooses freely
    let Some(revealed) = proposed.previous_in_value else {
        if committed_last_round || base.previous_in_value.is_some() {
            return Err(TenureError::InvalidCommitment(format!(
                "{} withheld the in-value it committed in round {}",
                ctx.sender,
                ctx.base_round.round_number.saturating_sub(1)
            )));
        }
        return Ok(());
    };
    if let Some(known) = base.previous_in_value {
        if known != revealed {
            return Err(TenureError::InvalidCommitment(format!(
                "{} revealed an in-value that differs from the reconstructed one",
                ctx.sender
            )));
        }
    }

    let previous = ctx.previous_round.ok_or_else(|| {
        TenureError::MissingData(format!(
            "round {} is not retained",
            ctx.base_round.round_number.saturating_sub(1)
        ))
    })?;
    let committed = previous.record(ctx.sender)?.out_value.ok_or_else(|| {
        TenureError::MissingData(format!(
            "{} committed no out value in round {}",
            ctx.sender, previous.round_number
        ))
    })?;
    if revealed.rehash() != committed {
        return Err(TenureError::InvalidCommitment(format!(
            "{}'s previous in-value does not hash to its round {} out value",
            ctx.sender, previous.round_number
        )));
    }
    Ok(())
}

/// The published signature must be the deterministic one, and so must the
/// next-round order derived from it.
pub struct SignatureValidator;

impl Validator for SignatureValidator {
    fn name(&self) -> &'static str {
        "signature"
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationOutcome {
        if ctx.behavior() != Behavior::UpdateValue {
            return ValidationOutcome::Accept;
        }
        check_signature(ctx).into()
    }
}

/// Signature a participant must publish when revealing `revealed` in the
/// round following `ctx.previous_round`.
pub(crate) fn expected_signature(ctx: &ValidationContext<'_>, revealed: &Hash) -> TenureResult<Hash> {
    match ctx.previous_round {
        Some(previous) => Ok(previous.calculate_signature(revealed)),
        None if ctx.base_round.round_number <= 1 => Ok(*revealed),
        None => Err(TenureError::MissingData(format!(
            "round {} is not retained",
            ctx.base_round.round_number.saturating_sub(1)
        ))),
    }
}

fn check_signature(ctx: &ValidationContext<'_>) -> TenureResult<()> {
    let proposed = ctx.proposed_record()?;
    let out_value = proposed.out_value.ok_or_else(|| {
        TenureError::InvalidCommitment(format!("{} published no out value", ctx.sender))
    })?;
    let revealed = proposed.previous_in_value.unwrap_or(out_value);
    let expected = expected_signature(ctx, &revealed)?;

    if proposed.signature != Some(expected) {
        return Err(TenureError::InvalidCommitment(format!(
            "{} published a signature that does not derive from its reveal",
            ctx.sender
        )));
    }

    let order = expected.to_order(ctx.base_round.participant_count())?;
    if proposed.supposed_order_of_next_round != 0 && proposed.supposed_order_of_next_round != order {
        return Err(TenureError::InvalidCommitment(format!(
            "{} claims next round order {} instead of {order}",
            ctx.sender, proposed.supposed_order_of_next_round
        )));
    }
    Ok(())
}
