//! # Consensus Scheduler
//!
//! Decides what a participant may produce at a given time and in which
//! window. The decision is a pure function of the current round, the
//! participant's key and the clock; nothing here mutates state.
//!
//! ## Windows
//!
//! - Own slot `[expected, expected + I)`: the normal block, then tiny blocks.
//! - Extra slot `[E, E + I)`: only the extra-block producer may terminate.
//! - From `E + I` on: every participant gets a catch-up slot in each
//!   hypothetical later round, at its own order, so a stalled round is
//!   eventually terminated by somebody.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ConsensusConfig;
use crate::header::Behavior;
use crate::round::Round;
use crate::types::{PublicKey, Timestamp};
use crate::{two_thirds_quorum, TenureError, TenureResult};

/// A behavior together with the window in which it is allowed.
///
/// For [`Behavior::Wait`] the window runs from the decision time to the
/// moment the scheduler should be consulted again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusCommand {
    pub behavior: Behavior,
    pub window_start: Timestamp,
    /// Exclusive
    pub window_end: Timestamp,
}

impl ConsensusCommand {
    pub fn new(behavior: Behavior, window_start: Timestamp, window_end: Timestamp) -> Self {
        Self {
            behavior,
            window_start,
            window_end,
        }
    }

    pub fn wait(now: Timestamp, until: Timestamp) -> Self {
        Self::new(Behavior::Wait, now, until.max(now))
    }

    pub fn is_open_at(&self, now: Timestamp) -> bool {
        now >= self.window_start && now < self.window_end
    }
}

/// Health of finality as seen from the current round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MiningStatus {
    Normal,
    /// Finality lags; fewer tiny blocks per slot
    Abnormal,
    /// Finality lags by at least the tiny-block ceiling; one block per slot
    Severe,
}

/// Pure slot scheduling over a round snapshot.
#[derive(Debug, Clone)]
pub struct ConsensusScheduler {
    config: ConsensusConfig,
    chain_start: Timestamp,
}

impl ConsensusScheduler {
    pub fn new(config: ConsensusConfig, chain_start: Timestamp) -> Self {
        Self {
            config,
            chain_start,
        }
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    pub fn chain_start(&self) -> Timestamp {
        self.chain_start
    }

    fn interval(&self) -> u64 {
        self.config.mining_interval_ms
    }

    /// Next action for `self_key` at `now`.
    pub fn next_action(
        &self,
        round: &Round,
        self_key: &PublicKey,
        now: Timestamp,
    ) -> TenureResult<ConsensusCommand> {
        let interval = self.interval();
        let Some(record) = round.get(self_key) else {
            // Not a participant: look again once this round could have ended
            let until = checked_add(now, round.total_length(interval)?, "observer wait")?;
            return Ok(ConsensusCommand::wait(now, until));
        };

        let slot_start = record.expected_mining_time;
        let slot_end = record.slot_end(interval)?;
        if now >= slot_start && now < slot_end {
            if record.out_value.is_none() {
                return Ok(ConsensusCommand::new(Behavior::UpdateValue, slot_start, slot_end));
            }
            let produced = u32::try_from(record.actual_mining_times.len()).unwrap_or(u32::MAX);
            if produced < self.max_blocks_per_slot(round) {
                return Ok(ConsensusCommand::new(Behavior::TinyBlock, now, slot_end));
            }
        }

        let extra_start = round.extra_block_mining_time(interval)?;
        let extra_end = checked_add(extra_start, interval, "extra slot end")?;
        let is_producer = round.extra_block_producer_pubkey == *self_key;

        if is_producer && now >= extra_start && now < extra_end {
            let behavior = self.terminating_behavior(round)?;
            return Ok(ConsensusCommand::new(behavior, extra_start, extra_end));
        }

        let (catch_up_start, catch_up_end) =
            self.catch_up_window(round, self_key, now.max(extra_end))?;
        if now >= catch_up_start && now < catch_up_end {
            let behavior = self.terminating_behavior(round)?;
            debug!(
                round = round.round_number,
                participant = %self_key,
                "round overdue, terminating from catch-up slot"
            );
            return Ok(ConsensusCommand::new(behavior, catch_up_start, catch_up_end));
        }

        let mut next = catch_up_start;
        if now < slot_start && record.out_value.is_none() {
            next = next.min(slot_start);
        }
        if is_producer && now < extra_start {
            next = next.min(extra_start);
        }
        Ok(ConsensusCommand::wait(now, next))
    }

    fn terminating_behavior(&self, round: &Round) -> TenureResult<Behavior> {
        if self.needs_term_change(round)? {
            Ok(Behavior::NextTerm)
        } else {
            Ok(Behavior::NextRound)
        }
    }

    /// Catch-up slot of `key` at or after `now`.
    ///
    /// Rounds are laid end to end from the round start; the slot sits at the
    /// participant's order within the first hypothetical round that has not
    /// fully elapsed.
    pub fn catch_up_window(
        &self,
        round: &Round,
        key: &PublicKey,
        now: Timestamp,
    ) -> TenureResult<(Timestamp, Timestamp)> {
        let interval = self.interval();
        let record = round.record(key)?;
        let start = round.round_start_time()?;
        let length = round.total_length(interval)?;
        if length == 0 {
            return Err(TenureError::InvalidConfig("mining interval must be positive".to_string()));
        }

        let missed_rounds = (now.saturating_sub(start) / length).max(1);
        let offset = u64::from(record.order.saturating_sub(1))
            .checked_mul(interval)
            .ok_or_else(|| TenureError::ArithmeticOverflow("catch-up offset".to_string()))?;
        let mut slot = missed_rounds
            .checked_mul(length)
            .and_then(|d| d.checked_add(start))
            .and_then(|t| t.checked_add(offset))
            .ok_or_else(|| TenureError::ArithmeticOverflow("catch-up slot".to_string()))?;
        if checked_add(slot, interval, "catch-up slot end")? <= now {
            slot = checked_add(slot, length, "catch-up slot")?;
        }
        Ok((slot, checked_add(slot, interval, "catch-up slot end")?))
    }

    /// Whether at least two thirds of the round's participants have already
    /// mined past the end of the current term.
    pub fn needs_term_change(&self, round: &Round) -> TenureResult<bool> {
        let term_end = round
            .term_number
            .checked_mul(self.config.term_period_ms()?)
            .and_then(|d| d.checked_add(self.chain_start))
            .ok_or_else(|| TenureError::ArithmeticOverflow("term end".to_string()))?;
        let past_term_end = round
            .participants
            .values()
            .filter(|r| r.latest_mining_time().is_some_and(|t| t >= term_end))
            .count();
        Ok(past_term_end >= two_thirds_quorum(round.participant_count())?)
    }

    pub fn mining_status(&self, round: &Round) -> MiningStatus {
        let ceiling = u64::from(self.config.max_tiny_blocks);
        let lag = Self::finality_lag(round);
        match lag {
            None => MiningStatus::Normal,
            Some(lag) if lag <= 2 => MiningStatus::Normal,
            Some(lag) if lag >= ceiling => MiningStatus::Severe,
            Some(_) => MiningStatus::Abnormal,
        }
    }

    /// Ceiling on blocks per slot, shrinking while finality lags.
    pub fn max_blocks_per_slot(&self, round: &Round) -> u32 {
        let ceiling = self.config.max_tiny_blocks;
        match (self.mining_status(round), Self::finality_lag(round)) {
            (MiningStatus::Normal, _) | (_, None) => ceiling,
            (MiningStatus::Severe, Some(lag)) => {
                warn!(
                    round = round.round_number,
                    confirmed_round = round.confirmed_irreversible_round,
                    lag,
                    "irreversible height severely behind, one block per slot"
                );
                1
            }
            (MiningStatus::Abnormal, Some(lag)) => {
                let reduced = u64::from(ceiling).saturating_sub(lag - 2).max(1);
                u32::try_from(reduced).unwrap_or(1)
            }
        }
    }

    /// Rounds between the current round and the round of the last
    /// irreversible height; `None` before any height became irreversible.
    fn finality_lag(round: &Round) -> Option<u64> {
        if round.confirmed_irreversible_round == 0 {
            return None;
        }
        Some(round.round_number.saturating_sub(round.confirmed_irreversible_round))
    }
}

fn checked_add(a: u64, b: u64, what: &str) -> TenureResult<u64> {
    a.checked_add(b)
        .ok_or_else(|| TenureError::ArithmeticOverflow(what.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::round::tests::{key, sample_round};
    use crate::types::Hash;

    const INTERVAL: u64 = 100;

    fn scheduler() -> ConsensusScheduler {
        ConsensusScheduler::new(ConsensusConfig::default().with_mining_interval(INTERVAL), 0)
    }

    #[test]
    fn test_update_value_inside_own_slot() {
        // Orders 1..=4 at 100, 200, 300, 400; extra slot at 500
        let round = sample_round(4, 0, INTERVAL);
        let command = scheduler().next_action(&round, &key(2), 250).unwrap();
        assert_eq!(command, ConsensusCommand::new(Behavior::UpdateValue, 200, 300));
        assert!(command.is_open_at(250));
        assert!(!command.is_open_at(300));
    }

    #[test]
    fn test_tiny_blocks_until_ceiling() {
        let mut round = sample_round(4, 0, INTERVAL);
        let record = round.participants.get_mut(&key(2)).unwrap();
        record.out_value = Some(Hash::digest(b"out"));
        record.actual_mining_times = vec![200];

        let command = scheduler().next_action(&round, &key(2), 230).unwrap();
        assert_eq!(command, ConsensusCommand::new(Behavior::TinyBlock, 230, 300));

        let record = round.participants.get_mut(&key(2)).unwrap();
        record.actual_mining_times = (0..8).map(|i| 200 + i).collect();
        let command = scheduler().next_action(&round, &key(2), 230).unwrap();
        assert_eq!(command.behavior, Behavior::Wait);
    }

    #[test]
    fn test_extra_block_producer_terminates() {
        let round = sample_round(4, 0, INTERVAL);
        let command = scheduler().next_action(&round, &key(1), 520).unwrap();
        assert_eq!(command, ConsensusCommand::new(Behavior::NextRound, 500, 600));

        // Anyone else waits for its catch-up slot
        let command = scheduler().next_action(&round, &key(3), 520).unwrap();
        assert_eq!(command.behavior, Behavior::Wait);
        assert_eq!(command.window_end, 100 + 500 + 200);
    }

    #[test]
    fn test_catch_up_after_extra_slot_lapses() {
        let round = sample_round(4, 0, INTERVAL);
        let s = scheduler();
        // Round start 100, length 500: first catch-up round starts at 600
        assert_eq!(s.catch_up_window(&round, &key(1), 600).unwrap(), (600, 700));
        assert_eq!(s.catch_up_window(&round, &key(3), 600).unwrap(), (800, 900));
        // key(1)'s first catch-up slot has passed, next hypothetical round
        assert_eq!(s.catch_up_window(&round, &key(1), 750).unwrap(), (1_100, 1_200));

        let command = s.next_action(&round, &key(3), 850).unwrap();
        assert_eq!(command, ConsensusCommand::new(Behavior::NextRound, 800, 900));
    }

    #[test]
    fn test_waits_for_own_slot() {
        let round = sample_round(4, 0, INTERVAL);
        let command = scheduler().next_action(&round, &key(3), 50).unwrap();
        assert_eq!(command, ConsensusCommand::wait(50, 300));

        // Extra-block producer whose slot already passed waits for the extra slot
        let command = scheduler().next_action(&round, &key(1), 250).unwrap();
        assert_eq!(command, ConsensusCommand::wait(250, 500));
    }

    #[test]
    fn test_observer_only_waits() {
        let round = sample_round(4, 0, INTERVAL);
        let command = scheduler().next_action(&round, &key(9), 0).unwrap();
        assert_eq!(command.behavior, Behavior::Wait);
        assert_eq!(command.window_end, 500);
    }

    #[test]
    fn test_term_change_with_four_of_six() {
        let config = ConsensusConfig::default()
            .with_mining_interval(INTERVAL)
            .with_term_period(10);
        let s = ConsensusScheduler::new(config, 0);
        let mut round = sample_round(6, 0, INTERVAL);
        for i in 1..=3u8 {
            round.participants.get_mut(&key(i)).unwrap().actual_mining_times = vec![10_000];
        }
        round.participants.get_mut(&key(4)).unwrap().actual_mining_times = vec![9_999];
        assert!(!s.needs_term_change(&round).unwrap());

        round.participants.get_mut(&key(4)).unwrap().actual_mining_times.push(10_001);
        assert!(s.needs_term_change(&round).unwrap());
        let command = s.next_action(&round, &key(1), 700).unwrap();
        assert_eq!(command.behavior, Behavior::NextTerm);
    }

    #[test]
    fn test_tiny_block_ceiling_shrinks_with_finality_lag() {
        let s = scheduler();
        let mut round = sample_round(4, 0, INTERVAL);
        round.round_number = 10;

        round.confirmed_irreversible_round = 0;
        assert_eq!(s.max_blocks_per_slot(&round), 8);

        round.confirmed_irreversible_round = 9;
        assert_eq!(s.mining_status(&round), MiningStatus::Normal);
        assert_eq!(s.max_blocks_per_slot(&round), 8);

        round.confirmed_irreversible_round = 5;
        assert_eq!(s.mining_status(&round), MiningStatus::Abnormal);
        assert_eq!(s.max_blocks_per_slot(&round), 5);

        round.confirmed_irreversible_round = 2;
        assert_eq!(s.mining_status(&round), MiningStatus::Severe);
        assert_eq!(s.max_blocks_per_slot(&round), 1);
    }

    #[test]
    fn test_windows_of_distinct_participants_are_disjoint() {
        let round = sample_round(5, 1_000, INTERVAL);
        let s = scheduler();
        for now in (1_000..3_000).step_by(7) {
            let producing: Vec<_> = (1..=5u8)
                .filter_map(|i| s.next_action(&round, &key(i), now).ok())
                .filter(|c| c.behavior != Behavior::Wait && c.is_open_at(now))
                .collect();
            assert!(producing.len() <= 1, "overlap at {now}: {producing:?}");
        }
    }
}
