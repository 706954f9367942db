//! Round identity checks: same-round headers must target the base round,
//! terminating headers must propose exactly the round the base implies.

use std::collections::BTreeSet;

use super::{ValidationContext, ValidationOutcome, Validator};
use crate::header::Behavior;
use crate::round::Round;
use crate::types::PublicKey;
use crate::{TenureError, TenureResult};

/// Binds `UpdateValue` and `TinyBlock` headers to the round they were built on.
pub struct RoundBindingValidator;

impl Validator for RoundBindingValidator {
    fn name(&self) -> &'static str {
        "round_binding"
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationOutcome {
        if !ctx.behavior().is_same_round() {
            return ValidationOutcome::Accept;
        }
        check_binding(ctx).into()
    }
}

fn check_binding(ctx: &ValidationContext<'_>) -> TenureResult<()> {
    let (base, proposed) = (ctx.base_round, ctx.proposed);
    if proposed.round_number < base.round_number {
        return Err(TenureError::RegressionError(format!(
            "header targets past round {} during round {}",
            proposed.round_number, base.round_number
        )));
    }
    if proposed.round_number != base.round_number || proposed.term_number != base.term_number {
        return Err(TenureError::RoundSequenceError(format!(
            "header targets round {} of term {} during round {} of term {}",
            proposed.round_number, proposed.term_number, base.round_number, base.term_number
        )));
    }
    if key_set(proposed) != key_set(base) || proposed.round_id() != base.round_id() {
        return Err(TenureError::RoundSequenceError(format!(
            "header was built against a different layout of round {}",
            base.round_number
        )));
    }

    let base_record = ctx.base_record()?;
    let proposed_record = ctx.proposed_record()?;
    match (ctx.behavior(), base_record.out_value.is_some()) {
        (Behavior::UpdateValue, true) => {
            return Err(TenureError::RoundSequenceError(format!(
                "{} already published its value in round {}",
                ctx.sender, base.round_number
            )))
        }
        (Behavior::TinyBlock, false) => {
            return Err(TenureError::RoundSequenceError(format!(
                "{} sent a tiny block before its normal block",
                ctx.sender
            )))
        }
        _ => {}
    }

    let appended = proposed_record.actual_mining_times.len() == base_record.actual_mining_times.len() + 1
        && proposed_record
            .actual_mining_times
            .starts_with(&base_record.actual_mining_times);
    if !appended {
        return Err(TenureError::RoundSequenceError(format!(
            "{} must append exactly one mining time",
            ctx.sender
        )));
    }
    Ok(())
}

/// Regenerates the next round from the base and demands the proposal match
/// it slot for slot.
pub struct RoundTerminateValidator;

impl Validator for RoundTerminateValidator {
    fn name(&self) -> &'static str {
        "round_terminate"
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationOutcome {
        if !ctx.behavior().terminates_round() {
            return ValidationOutcome::Accept;
        }
        check_termination(ctx).into()
    }
}

fn check_termination(ctx: &ValidationContext<'_>) -> TenureResult<()> {
    let (base, proposed) = (ctx.base_round, ctx.proposed);
    let next_number = base
        .round_number
        .checked_add(1)
        .ok_or_else(|| TenureError::ArithmeticOverflow("round number".to_string()))?;
    if proposed.round_number <= base.round_number {
        return Err(TenureError::RegressionError(format!(
            "proposed round {} does not follow round {}",
            proposed.round_number, base.round_number
        )));
    }
    if proposed.round_number != next_number {
        return Err(TenureError::RoundSequenceError(format!(
            "proposed round {} skips past {next_number}",
            proposed.round_number
        )));
    }
    if !proposed.orders_form_permutation() {
        return Err(TenureError::RoundSequenceError(format!(
            "orders of proposed round {} are not a permutation",
            proposed.round_number
        )));
    }

    let new_participants = match ctx.behavior() {
        Behavior::NextTerm => {
            if !ctx.scheduler.needs_term_change(base)? {
                return Err(TenureError::RoundSequenceError(format!(
                    "term {} is not over yet",
                    base.term_number
                )));
            }
            let next_term = base
                .term_number
                .checked_add(1)
                .ok_or_else(|| TenureError::ArithmeticOverflow("term number".to_string()))?;
            if proposed.term_number != next_term {
                return Err(TenureError::RoundSequenceError(format!(
                    "next term must be {next_term}, got {}",
                    proposed.term_number
                )));
            }
            Some(proposed.participant_list())
        }
        _ => {
            if proposed.term_number != base.term_number {
                return Err(TenureError::RoundSequenceError(format!(
                    "next round must stay in term {}, got {}",
                    base.term_number, proposed.term_number
                )));
            }
            None
        }
    };

    let expected = ctx
        .generator
        .generate_next(base, ctx.block_time, new_participants)?;
    compare_layout(&expected, proposed)
}

fn key_set(round: &Round) -> BTreeSet<&PublicKey> {
    round.participants.keys().collect()
}

fn compare_layout(expected: &Round, proposed: &Round) -> TenureResult<()> {
    if key_set(expected) != key_set(proposed) {
        return Err(TenureError::RoundSequenceError(format!(
            "round {} has a foreign participant set",
            proposed.round_number
        )));
    }
    if expected.extra_block_producer_pubkey != proposed.extra_block_producer_pubkey {
        return Err(TenureError::RoundSequenceError(format!(
            "round {} names {} as extra-block producer, expected {}",
            proposed.round_number,
            proposed.extra_block_producer_pubkey,
            expected.extra_block_producer_pubkey
        )));
    }
    for (key, want) in &expected.participants {
        let got = proposed.record(key)?;
        let same = got.order == want.order
            && got.expected_mining_time == want.expected_mining_time
            && got.is_extra_block_producer == want.is_extra_block_producer
            && got.produced_blocks == want.produced_blocks
            && got.missed_time_slots == want.missed_time_slots;
        if !same {
            return Err(TenureError::RoundSequenceError(format!(
                "slot of {key} in round {} differs from the derived layout",
                proposed.round_number
            )));
        }
    }
    Ok(())
}
