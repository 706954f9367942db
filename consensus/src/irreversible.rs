//! Last irreversible block height aggregation.
//!
//! Every participant publishes, with its normal block, the height it
//! personally considers final. Once at least two thirds of the previous
//! round's participants attested, the value at the one-third position of the
//! sorted attestations is one that two thirds of them have reached.

use tracing::debug;

use crate::round::Round;
use crate::types::{BlockHeight, PublicKey};
use crate::{two_thirds_quorum, TenureResult};

pub struct IrreversibleHeightAggregator;

impl IrreversibleHeightAggregator {
    /// Candidate irreversible height from the previous round's attestations.
    ///
    /// Returns `None` when nobody mined in the current round yet or when
    /// fewer than `ceil(2N/3)` previous-round participants attested.
    pub fn aggregate(
        previous_round: &Round,
        current_round_mined_keys: &[PublicKey],
    ) -> TenureResult<Option<BlockHeight>> {
        if current_round_mined_keys.is_empty() {
            return Ok(None);
        }

        let mut heights: Vec<BlockHeight> = previous_round
            .participants
            .values()
            .map(|r| r.implied_irreversible_height)
            .filter(|h| *h > 0)
            .collect();

        let quorum = two_thirds_quorum(previous_round.participant_count())?;
        if heights.len() < quorum {
            debug!(
                round = previous_round.round_number,
                attested = heights.len(),
                quorum,
                "not enough implied heights for irreversible height"
            );
            return Ok(None);
        }

        heights.sort_unstable();
        let index = (heights.len() - 1) / 3;
        Ok(heights.get(index).copied())
    }

    /// Aggregate and return the height only when it advances past `current`.
    pub fn advance(
        previous_round: &Round,
        current_round_mined_keys: &[PublicKey],
        current: BlockHeight,
    ) -> TenureResult<Option<BlockHeight>> {
        Ok(Self::aggregate(previous_round, current_round_mined_keys)?.filter(|h| *h > current))
    }
}
