use super::{ValidationContext, ValidationOutcome, Validator};
use crate::header::Behavior;
use crate::{TenureError, TenureResult};

/// Neither the agreed irreversible height nor a participant's own
/// attestation may move backward.
pub struct IrreversibleHeightValidator;

impl Validator for IrreversibleHeightValidator {
    fn name(&self) -> &'static str {
        "irreversible_height"
    }

    fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationOutcome {
        check_irreversible(ctx).into()
    }
}

fn check_irreversible(ctx: &ValidationContext<'_>) -> TenureResult<()> {
    let stored_height = ctx.store.confirmed_irreversible_height();
    let stored_round = ctx.store.confirmed_irreversible_round();
    if ctx.proposed.confirmed_irreversible_height < stored_height
        || ctx.proposed.confirmed_irreversible_round < stored_round
    {
        return Err(TenureError::RegressionError(format!(
            "proposed irreversible height {}@{} below stored {stored_height}@{stored_round}",
            ctx.proposed.confirmed_irreversible_height, ctx.proposed.confirmed_irreversible_round
        )));
    }

    if ctx.behavior() != Behavior::UpdateValue {
        return Ok(());
    }
    let implied = ctx.proposed_record()?.implied_irreversible_height;
    let floor = ctx
        .previous_round
        .and_then(|r| r.get(ctx.sender))
        .map(|r| r.implied_irreversible_height)
        .unwrap_or(0)
        .max(ctx.base_record()?.implied_irreversible_height);
    if implied < floor {
        return Err(TenureError::RegressionError(format!(
            "{} implied irreversible height {implied} below its earlier {floor}",
            ctx.sender
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TriggerInformation;
    use crate::header::HeaderOrigin;
    use crate::round::tests::key;
    use crate::validation::fixtures;

    #[test]
    fn test_unchanged_height_is_accepted() {
        let engine = fixtures::past_bootstrap(4);
        let header = fixtures::update_header(&engine, 3, 700);
        assert!(fixtures::check(&engine, IrreversibleHeightValidator, &header, 700).is_accept());
    }

    #[test]
    fn test_own_attestation_cannot_regress() {
        // key(3) attests 9 in round 2, then tries 4 in round 3
        let mut engine = fixtures::past_bootstrap(4);
        let header = fixtures::update_header(&engine, 3, 700);
        engine.process_block(&header, 700, HeaderOrigin::Local).unwrap();
        let next = engine
            .build_header(&key(4), Behavior::NextRound, &TriggerInformation::default(), 1_000, 11)
            .unwrap();
        engine.process_block(&next, 1_000, HeaderOrigin::Local).unwrap();

        let t = engine.current_round().unwrap().get(&key(3)).unwrap().expected_mining_time;
        let mut header = fixtures::update_header(&engine, 3, t);
        header
            .round
            .as_mut()
            .unwrap()
            .participants
            .get_mut(&key(3))
            .unwrap()
            .implied_irreversible_height = 4;
        assert!(matches!(
            fixtures::check(&engine, IrreversibleHeightValidator, &header, t),
            ValidationOutcome::Reject(TenureError::RegressionError(_))
        ));
    }

    #[test]
    fn test_lowered_confirmed_height_is_regression() {
        let mut engine = fixtures::past_bootstrap(4);
        // Everyone attests in round 2, so round 3's first block confirms a height
        for (i, t) in [(4u8, 600u64), (3, 700), (2, 800), (1, 900)] {
            let header = fixtures::update_header(&engine, i, t);
            engine.process_block(&header, t, HeaderOrigin::Local).unwrap();
        }
        let next = engine
            .build_header(&key(4), Behavior::NextRound, &TriggerInformation::default(), 1_000, 11)
            .unwrap();
        engine.process_block(&next, 1_000, HeaderOrigin::Local).unwrap();
        let first = engine.current_round().unwrap().sorted_by_order()[0].public_key.clone();
        let t = engine.current_round().unwrap().get(&first).unwrap().expected_mining_time;
        let sender = first.as_bytes()[0];
        let header = fixtures::update_header(&engine, sender, t);
        engine.process_block(&header, t, HeaderOrigin::Local).unwrap();
        assert_eq!(engine.confirmed_irreversible_height(), 9);

        let mut header = engine
            .build_header(&key(sender), Behavior::TinyBlock, &TriggerInformation::default(), t + 1, 12)
            .unwrap();
        header.round.as_mut().unwrap().confirmed_irreversible_height = 8;
        assert!(matches!(
            fixtures::check(&engine, IrreversibleHeightValidator, &header, t + 1),
            ValidationOutcome::Reject(TenureError::RegressionError(_))
        ));
    }
}
