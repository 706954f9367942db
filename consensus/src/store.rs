//! Round history and scalar chain state.
//!
//! The store is the single owner of consensus state. Validators read it
//! through shared references; only the engine writes it, and only with a
//! round it has already validated.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::config::{ConsensusConfig, ParticipantCountSchedule};
use crate::header::snapshot_options;
use crate::round::Round;
use crate::types::{BlockHeight, PublicKey, RoundNumber, TermNumber, Timestamp};
use crate::{TenureError, TenureResult};

use bincode::Options;

/// Consecutive same-round blocks of one producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerStreak {
    pub producer: PublicKey,
    pub count: u32,
}

/// Round history keyed by round number plus the chain scalars.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundStore {
    rounds: BTreeMap<RoundNumber, Round>,
    current_round_number: RoundNumber,
    current_term_number: TermNumber,
    chain_start_timestamp: Timestamp,
    confirmed_irreversible_height: BlockHeight,
    confirmed_irreversible_round: RoundNumber,
    /// First round number of every term
    term_first_rounds: BTreeMap<TermNumber, RoundNumber>,
    streak: Option<ProducerStreak>,
    /// Growth schedule as re-anchored so far; part of every snapshot
    participant_schedule: ParticipantCountSchedule,
    keep_rounds: u64,
    bootstrap_rounds: u64,
}

impl RoundStore {
    pub fn new(config: &ConsensusConfig, chain_start_timestamp: Timestamp) -> Self {
        Self {
            rounds: BTreeMap::new(),
            current_round_number: 0,
            current_term_number: 0,
            chain_start_timestamp,
            confirmed_irreversible_height: 0,
            confirmed_irreversible_round: 0,
            term_first_rounds: BTreeMap::new(),
            streak: None,
            participant_schedule: ParticipantCountSchedule::new(config, chain_start_timestamp),
            keep_rounds: config.keep_rounds.max(2),
            bootstrap_rounds: config.bootstrap_rounds,
        }
    }

    /// Install the genesis round.
    pub fn initialize(&mut self, first_round: Round) -> TenureResult<()> {
        if !self.rounds.is_empty() {
            return Err(TenureError::RoundSequenceError(
                "store is already initialized".to_string(),
            ));
        }
        if first_round.round_number != 1 {
            return Err(TenureError::RoundSequenceError(format!(
                "genesis round must be round 1, got {}",
                first_round.round_number
            )));
        }
        first_round.check_invariants()?;

        self.current_round_number = 1;
        self.current_term_number = first_round.term_number;
        self.term_first_rounds.insert(first_round.term_number, 1);
        self.rounds.insert(1, first_round);
        info!(chain_start = self.chain_start_timestamp, "round store initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.current_round_number != 0
    }

    pub fn current_round(&self) -> TenureResult<&Round> {
        self.round(self.current_round_number).ok_or_else(|| {
            TenureError::MissingData(format!("current round {} not stored", self.current_round_number))
        })
    }

    /// Round preceding the current one, if still retained.
    pub fn previous_round(&self) -> Option<&Round> {
        self.current_round_number
            .checked_sub(1)
            .and_then(|n| self.round(n))
    }

    pub fn round(&self, round_number: RoundNumber) -> Option<&Round> {
        self.rounds.get(&round_number)
    }

    pub fn current_round_number(&self) -> RoundNumber {
        self.current_round_number
    }

    pub fn current_term_number(&self) -> TermNumber {
        self.current_term_number
    }

    pub fn chain_start_timestamp(&self) -> Timestamp {
        self.chain_start_timestamp
    }

    pub fn confirmed_irreversible_height(&self) -> BlockHeight {
        self.confirmed_irreversible_height
    }

    pub fn confirmed_irreversible_round(&self) -> RoundNumber {
        self.confirmed_irreversible_round
    }

    pub fn first_round_of_term(&self, term: TermNumber) -> Option<RoundNumber> {
        self.term_first_rounds.get(&term).copied()
    }

    pub fn retained_rounds(&self) -> usize {
        self.rounds.len()
    }

    /// Participants of the current round in slot order.
    pub fn active_participant_list(&self) -> Vec<PublicKey> {
        self.current_round()
            .map(Round::participant_list)
            .unwrap_or_default()
    }

    pub fn is_current_participant(&self, key: &PublicKey) -> bool {
        self.current_round().map(|r| r.contains(key)).unwrap_or(false)
    }

    /// Whether the chain is still in its bootstrap phase, in which slot and
    /// streak checks are relaxed.
    pub fn is_bootstrap(&self) -> bool {
        self.current_term_number <= 1 && self.current_round_number <= self.bootstrap_rounds
    }

    /// Replace the current round with a validated update of itself.
    pub fn update_current_round(&mut self, round: Round) -> TenureResult<()> {
        if round.round_number != self.current_round_number {
            return Err(TenureError::RoundSequenceError(format!(
                "update targets round {} but current round is {}",
                round.round_number, self.current_round_number
            )));
        }
        if round.term_number != self.current_term_number {
            return Err(TenureError::RoundSequenceError(format!(
                "update carries term {} but current term is {}",
                round.term_number, self.current_term_number
            )));
        }
        round.check_invariants()?;
        self.raise_irreversible(round.confirmed_irreversible_height, round.confirmed_irreversible_round)?;
        self.rounds.insert(round.round_number, round);
        Ok(())
    }

    /// Append the round that follows the current one and make it current.
    pub fn advance(&mut self, next: Round) -> TenureResult<()> {
        if next.round_number <= self.current_round_number {
            return Err(TenureError::RegressionError(format!(
                "round {} does not advance past {}",
                next.round_number, self.current_round_number
            )));
        }
        if next.round_number != self.current_round_number + 1 {
            return Err(TenureError::RoundSequenceError(format!(
                "round {} skips ahead of {}",
                next.round_number, self.current_round_number
            )));
        }
        let term_changed = match next.term_number.checked_sub(self.current_term_number) {
            Some(0) => false,
            Some(1) => true,
            Some(_) => {
                return Err(TenureError::RoundSequenceError(format!(
                    "term {} skips ahead of {}",
                    next.term_number, self.current_term_number
                )))
            }
            None => {
                return Err(TenureError::RegressionError(format!(
                    "term {} precedes {}",
                    next.term_number, self.current_term_number
                )))
            }
        };
        next.check_invariants()?;
        self.raise_irreversible(next.confirmed_irreversible_height, next.confirmed_irreversible_round)?;

        self.current_round_number = next.round_number;
        if term_changed {
            self.current_term_number = next.term_number;
            self.term_first_rounds.insert(next.term_number, next.round_number);
            info!(term = next.term_number, round = next.round_number, "term advanced");
        }
        self.rounds.insert(next.round_number, next);
        self.prune();
        Ok(())
    }

    pub fn participant_schedule(&self) -> &ParticipantCountSchedule {
        &self.participant_schedule
    }

    /// Re-anchor the participant growth schedule at `now`.
    pub fn set_participant_increase_interval(&mut self, now: Timestamp, interval_seconds: u64) -> TenureResult<()> {
        self.participant_schedule.set_increase_interval(now, interval_seconds)
    }

    fn raise_irreversible(&mut self, height: BlockHeight, round: RoundNumber) -> TenureResult<()> {
        if height < self.confirmed_irreversible_height || round < self.confirmed_irreversible_round {
            return Err(TenureError::RegressionError(format!(
                "irreversible height {height}@{round} below stored {}@{}",
                self.confirmed_irreversible_height, self.confirmed_irreversible_round
            )));
        }
        if height > self.confirmed_irreversible_height {
            info!(
                height,
                round,
                previous = self.confirmed_irreversible_height,
                "irreversible height advanced"
            );
        }
        self.confirmed_irreversible_height = height;
        self.confirmed_irreversible_round = round;
        Ok(())
    }

    fn prune(&mut self) {
        let Some(oldest_kept) = self.current_round_number.checked_sub(self.keep_rounds - 1) else {
            return;
        };
        let before = self.rounds.len();
        self.rounds = self.rounds.split_off(&oldest_kept);
        let pruned = before - self.rounds.len();
        if pruned > 0 {
            debug!(pruned, oldest_kept, "pruned round history");
        }
    }

    /// Consecutive same-round blocks `producer` has emitted up to now.
    pub fn streak_of(&self, producer: &PublicKey) -> u32 {
        match &self.streak {
            Some(streak) if streak.producer == *producer => streak.count,
            _ => 0,
        }
    }

    /// Count a same-round block by `producer`.
    pub fn record_producer(&mut self, producer: &PublicKey) {
        match &mut self.streak {
            Some(streak) if streak.producer == *producer => {
                streak.count = streak.count.saturating_add(1);
            }
            _ => {
                self.streak = Some(ProducerStreak {
                    producer: producer.clone(),
                    count: 1,
                });
            }
        }
    }

    /// Round-terminating block by `producer`: does not extend a streak but
    /// breaks anyone else's.
    pub fn record_terminating_producer(&mut self, producer: &PublicKey) {
        if self.streak.as_ref().is_some_and(|s| s.producer != *producer) {
            self.streak = None;
        }
    }

    pub fn to_bytes(&self) -> TenureResult<Vec<u8>> {
        snapshot_options()
            .serialize(self)
            .map_err(|e| TenureError::Codec(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> TenureResult<Self> {
        let store: Self = snapshot_options()
            .deserialize(bytes)
            .map_err(|e| TenureError::Codec(e.to_string()))?;
        store.current_round()?.check_invariants()?;
        Ok(store)
    }
}
