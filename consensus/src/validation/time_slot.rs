//! Slot timing and producer streak checks.

use super::{ValidationContext, ValidationOutcome, Validator};
use crate::{TenureError, TenureResult};

/// Same-round blocks must land in the sender's own slot; round-terminating
/// blocks must come from whoever holds the termination window and propose a
/// gapless slot layout.
pub struct TimeSlotValidator;

impl Validator for TimeSlotValidator {
    fn name(&self) -> &'static str {
        "time_slot"
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationOutcome {
        if ctx.behavior().terminates_round() {
            return check_termination_window(ctx)
                .and_then(|()| check_layout(ctx))
                .into();
        }
        check_own_slot(ctx)
    }
}

fn check_own_slot(ctx: &ValidationContext<'_>) -> ValidationOutcome {
    let (base, proposed) = match (ctx.base_record(), ctx.proposed_record()) {
        (Ok(base), Ok(proposed)) => (base, proposed),
        (Err(e), _) | (_, Err(e)) => return ValidationOutcome::Reject(e),
    };

    let Some(mined_at) = proposed.latest_mining_time() else {
        return ValidationOutcome::Reject(TenureError::MissingData(format!(
            "{} reports no mining time",
            ctx.sender
        )));
    };
    if mined_at != ctx.block_time {
        return ValidationOutcome::Reject(TenureError::TimeSlotViolation(format!(
            "reported mining time {mined_at} differs from block time {}",
            ctx.block_time
        )));
    }

    if ctx.is_bootstrap() {
        return ValidationOutcome::Accept;
    }

    let within = match base.is_within_slot(mined_at, ctx.mining_interval()) {
        Ok(within) => within,
        Err(e) => return ValidationOutcome::Reject(e),
    };
    if !within {
        let err = TenureError::TimeSlotViolation(format!(
            "{} mined at {mined_at} outside slot starting {}",
            ctx.sender, base.expected_mining_time
        ));
        // Overran its own slot with tiny blocks: rebuilding may still succeed
        if !base.actual_mining_times.is_empty() {
            return ValidationOutcome::Retry(err);
        }
        return ValidationOutcome::Reject(err);
    }

    let produced = u32::try_from(base.actual_mining_times.len()).unwrap_or(u32::MAX);
    let ceiling = ctx.scheduler.max_blocks_per_slot(ctx.base_round);
    if produced >= ceiling {
        return ValidationOutcome::Reject(TenureError::TimeSlotViolation(format!(
            "{} already produced {produced} of {ceiling} blocks in its slot",
            ctx.sender
        )));
    }
    ValidationOutcome::Accept
}

fn check_termination_window(ctx: &ValidationContext<'_>) -> TenureResult<()> {
    let interval = ctx.mining_interval();
    let extra_start = ctx.base_round.extra_block_mining_time(interval)?;
    if ctx.block_time < extra_start {
        return Err(TenureError::TimeSlotViolation(format!(
            "round {} terminated at {} before its extra slot at {extra_start}",
            ctx.base_round.round_number, ctx.block_time
        )));
    }

    let extra_end = extra_start
        .checked_add(interval)
        .ok_or_else(|| TenureError::ArithmeticOverflow("extra slot end".to_string()))?;
    if ctx.block_time < extra_end {
        if ctx.base_round.extra_block_producer_pubkey != *ctx.sender {
            return Err(TenureError::TimeSlotViolation(format!(
                "{} terminated round {} inside the extra slot of {}",
                ctx.sender, ctx.base_round.round_number, ctx.base_round.extra_block_producer_pubkey
            )));
        }
        return Ok(());
    }

    let (start, end) = ctx
        .scheduler
        .catch_up_window(ctx.base_round, ctx.sender, ctx.block_time)?;
    if ctx.block_time < start || ctx.block_time >= end {
        return Err(TenureError::TimeSlotViolation(format!(
            "{} terminated round {} at {} outside its catch-up slot [{start}, {end})",
            ctx.sender, ctx.base_round.round_number, ctx.block_time
        )));
    }
    Ok(())
}

/// Proposed slots start after the block and follow each other one interval apart.
fn check_layout(ctx: &ValidationContext<'_>) -> TenureResult<()> {
    let interval = ctx.mining_interval();
    let slots = ctx.proposed.sorted_by_order();
    let mut previous = ctx.block_time;
    for (index, record) in slots.iter().enumerate() {
        let gap_ok = if index == 0 {
            record.expected_mining_time > previous
        } else {
            record.expected_mining_time.checked_sub(previous) == Some(interval)
        };
        if !gap_ok {
            return Err(TenureError::TimeSlotViolation(format!(
                "slot of order {} at {} does not follow {previous}",
                record.order, record.expected_mining_time
            )));
        }
        previous = record.expected_mining_time;
    }
    Ok(())
}

/// Caps how many same-round blocks one producer may emit in a row.
pub struct ContinuousBlocksValidator;

impl Validator for ContinuousBlocksValidator {
    fn name(&self) -> &'static str {
        "continuous_blocks"
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationOutcome {
        if ctx.behavior().terminates_round()
            || ctx.is_bootstrap()
            || ctx.base_round.participant_count() <= 1
        {
            return ValidationOutcome::Accept;
        }
        let streak = ctx.store.streak_of(ctx.sender);
        let cap = ctx.config().max_continuous_blocks;
        if streak >= cap {
            return ValidationOutcome::Reject(TenureError::TimeSlotViolation(format!(
                "{} already produced {streak} blocks in a row, cap is {cap}",
                ctx.sender
            )));
        }
        ValidationOutcome::Accept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TriggerInformation;
    use crate::header::{Behavior, HeaderOrigin};
    use crate::round::tests::key;
    use crate::validation::fixtures::{self, INTERVAL};

    #[test]
    fn test_block_inside_own_slot() {
        // Round 2 of four: key(3) owns [700, 800)
        let engine = fixtures::past_bootstrap(4);
        let header = fixtures::update_header(&engine, 3, 750);
        assert!(fixtures::check(&engine, TimeSlotValidator, &header, 750).is_accept());
    }

    #[test]
    fn test_block_outside_own_slot_is_rejected() {
        let engine = fixtures::past_bootstrap(4);
        let header = fixtures::update_header(&engine, 3, 800);
        assert!(matches!(
            fixtures::check(&engine, TimeSlotValidator, &header, 800),
            ValidationOutcome::Reject(TenureError::TimeSlotViolation(_))
        ));
    }

    #[test]
    fn test_reported_time_must_match_block_time() {
        let engine = fixtures::past_bootstrap(4);
        let header = fixtures::update_header(&engine, 3, 750);
        assert!(matches!(
            fixtures::check(&engine, TimeSlotValidator, &header, 760),
            ValidationOutcome::Reject(TenureError::TimeSlotViolation(_))
        ));
    }

    #[test]
    fn test_bootstrap_round_skips_slot_check() {
        // Round 1: key(4) owns [100, 200), but bootstrap accepts any time
        let engine = fixtures::engine(4);
        let header = fixtures::update_header(&engine, 4, 350);
        assert!(fixtures::check(&engine, TimeSlotValidator, &header, 350).is_accept());
    }

    #[test]
    fn test_overrun_after_own_tiny_blocks_is_retryable() {
        let mut engine = fixtures::past_bootstrap(4);
        let header = fixtures::update_header(&engine, 3, 700);
        engine.process_block(&header, 700, HeaderOrigin::Local).unwrap();

        let tiny = engine
            .build_header(&key(3), Behavior::TinyBlock, &TriggerInformation::default(), 800, 11)
            .unwrap();
        assert!(matches!(
            fixtures::check(&engine, TimeSlotValidator, &tiny, 800),
            ValidationOutcome::Retry(TenureError::TimeSlotViolation(_))
        ));
        let tiny = engine
            .build_header(&key(3), Behavior::TinyBlock, &TriggerInformation::default(), 790, 11)
            .unwrap();
        assert!(fixtures::check(&engine, TimeSlotValidator, &tiny, 790).is_accept());
    }

    #[test]
    fn test_extra_slot_belongs_to_extra_block_producer() {
        // Round 2 of four ends at 1000; key(4) is the extra-block producer
        let engine = fixtures::past_bootstrap(4);
        let by_producer = engine
            .build_header(&key(4), Behavior::NextRound, &TriggerInformation::default(), 1_000, 11)
            .unwrap();
        assert!(fixtures::check(&engine, TimeSlotValidator, &by_producer, 1_000).is_accept());

        let by_other = engine
            .build_header(&key(2), Behavior::NextRound, &TriggerInformation::default(), 1_000, 11)
            .unwrap();
        assert!(matches!(
            fixtures::check(&engine, TimeSlotValidator, &by_other, 1_000),
            ValidationOutcome::Reject(TenureError::TimeSlotViolation(_))
        ));

        let early = engine
            .build_header(&key(4), Behavior::NextRound, &TriggerInformation::default(), 990, 11)
            .unwrap();
        assert!(fixtures::check(&engine, TimeSlotValidator, &early, 990).into_result().is_err());
    }

    #[test]
    fn test_catch_up_termination() {
        // Round 2 starts at 600 and lasts 500: key(2) (order 3) catches up at [1300, 1400)
        let engine = fixtures::past_bootstrap(4);
        let header = engine
            .build_header(&key(2), Behavior::NextRound, &TriggerInformation::default(), 1_300, 11)
            .unwrap();
        assert!(fixtures::check(&engine, TimeSlotValidator, &header, 1_300).is_accept());

        let header = engine
            .build_header(&key(2), Behavior::NextRound, &TriggerInformation::default(), 1_150, 11)
            .unwrap();
        assert!(!fixtures::check(&engine, TimeSlotValidator, &header, 1_150).is_accept());
    }

    #[test]
    fn test_gapped_layout_is_rejected() {
        let engine = fixtures::past_bootstrap(4);
        let mut header = engine
            .build_header(&key(4), Behavior::NextRound, &TriggerInformation::default(), 1_000, 11)
            .unwrap();
        let round = header.round.as_mut().unwrap();
        let last = round.participants.values_mut().find(|r| r.order == 4).unwrap();
        last.expected_mining_time += INTERVAL / 2;
        assert!(matches!(
            fixtures::check(&engine, TimeSlotValidator, &header, 1_000),
            ValidationOutcome::Reject(TenureError::TimeSlotViolation(_))
        ));
    }

    #[test]
    fn test_streak_cap() {
        let config = crate::config::ConsensusConfig::default()
            .with_mining_interval(INTERVAL)
            .with_max_tiny_blocks(2)
            .with_max_continuous_blocks(2);
        let keys: Vec<_> = (1..=4).map(key).collect();
        let mut engine = crate::engine::ConsensusEngine::genesis(config, keys, 0).unwrap();
        let header = engine
            .build_header(&key(4), Behavior::NextRound, &TriggerInformation::default(), 500, 2)
            .unwrap();
        engine.process_block(&header, 500, HeaderOrigin::Local).unwrap();

        let header = fixtures::update_header(&engine, 3, 700);
        engine.process_block(&header, 700, HeaderOrigin::Local).unwrap();
        let tiny = engine
            .build_header(&key(3), Behavior::TinyBlock, &TriggerInformation::default(), 710, 11)
            .unwrap();
        engine.process_block(&tiny, 710, HeaderOrigin::Local).unwrap();

        let tiny = engine
            .build_header(&key(3), Behavior::TinyBlock, &TriggerInformation::default(), 720, 12)
            .unwrap();
        assert!(matches!(
            fixtures::check(&engine, ContinuousBlocksValidator, &tiny, 720),
            ValidationOutcome::Reject(TenureError::TimeSlotViolation(_))
        ));
        // Terminating headers are never capped
        let next = engine
            .build_header(&key(3), Behavior::NextRound, &TriggerInformation::default(), 1_200, 12)
            .unwrap();
        assert!(fixtures::check(&engine, ContinuousBlocksValidator, &next, 1_200).is_accept());
    }
}
