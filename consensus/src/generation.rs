//! # Round Generation
//!
//! Pure derivation of the next round from the current one. Participants who
//! mined keep the order they earned through their signature; everyone else
//! fills the remaining orders and is charged a missed slot. A term change
//! replaces the whole participant set and orders it by a public tie-break.

use indexmap::IndexMap;
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

use crate::config::ConsensusConfig;
use crate::round::{ParticipantRecord, Round};
use crate::types::{PublicKey, Timestamp};
use crate::{TenureError, TenureResult};

/// Derives rounds from rounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundGenerator {
    mining_interval: u64,
    chain_start: Timestamp,
}

impl RoundGenerator {
    pub fn new(mining_interval: u64, chain_start: Timestamp) -> Self {
        Self {
            mining_interval,
            chain_start,
        }
    }

    pub fn from_config(config: &ConsensusConfig, chain_start: Timestamp) -> Self {
        Self::new(config.mining_interval_ms, chain_start)
    }

    pub fn mining_interval(&self) -> u64 {
        self.mining_interval
    }

    /// Genesis round: term 1, round 1, slots starting one interval after `start`.
    pub fn generate_first_round(&self, keys: &[PublicKey], start: Timestamp) -> TenureResult<Round> {
        let mut round = self.term_round(keys, start, 1, 1)?;
        round.blockchain_age_seconds = 1;
        Ok(round)
    }

    /// Next round of `round`, or first round of the next term when
    /// `new_participants` is supplied.
    pub fn generate_next(
        &self,
        round: &Round,
        now: Timestamp,
        new_participants: Option<Vec<PublicKey>>,
    ) -> TenureResult<Round> {
        let round_number = round
            .round_number
            .checked_add(1)
            .ok_or_else(|| TenureError::ArithmeticOverflow("round number".to_string()))?;

        let mut next = match new_participants {
            Some(keys) => {
                let term_number = round
                    .term_number
                    .checked_add(1)
                    .ok_or_else(|| TenureError::ArithmeticOverflow("term number".to_string()))?;
                self.term_round(&keys, now, term_number, round_number)?
            }
            None => self.next_round_of_term(round, now, round_number)?,
        };

        next.confirmed_irreversible_height = round.confirmed_irreversible_height;
        next.confirmed_irreversible_round = round.confirmed_irreversible_round;
        next.blockchain_age_seconds = now.saturating_sub(self.chain_start) / 1_000;

        next.check_invariants()?;
        debug!(
            round = next.round_number,
            term = next.term_number,
            participants = next.participant_count(),
            extra_block_producer = %next.extra_block_producer_pubkey,
            "generated round"
        );
        Ok(next)
    }

    fn next_round_of_term(&self, round: &Round, now: Timestamp, round_number: u64) -> TenureResult<Round> {
        let n = round.participant_count();
        if n == 0 {
            return Err(TenureError::MissingData(format!(
                "round {} has no participants",
                round.round_number
            )));
        }
        let n32 = u32::try_from(n)
            .map_err(|_| TenureError::ArithmeticOverflow("participant count".to_string()))?;

        let mut mined: Vec<&ParticipantRecord> = round.mined_participants();
        mined.sort_by_key(|r| r.final_order_of_next_round);

        let mut occupied = HashSet::new();
        for record in &mined {
            let order = record.final_order_of_next_round;
            if order == 0 || order > n32 || !occupied.insert(order) {
                return Err(TenureError::RoundSequenceError(format!(
                    "{} holds invalid or duplicate next round order {order}",
                    record.public_key
                )));
            }
        }

        let mut participants = IndexMap::with_capacity(n);
        for record in &mined {
            let next = self.carried_record(record, record.final_order_of_next_round, now, false)?;
            participants.insert(record.public_key.clone(), next);
        }

        let free_orders: BTreeSet<u32> = (1..=n32).filter(|o| !occupied.contains(o)).collect();
        let mut idle: Vec<&ParticipantRecord> =
            round.participants.values().filter(|r| !r.has_mined()).collect();
        idle.sort_by_key(|r| r.order);
        if idle.len() != free_orders.len() {
            return Err(TenureError::RoundSequenceError(format!(
                "{} idle participants for {} free orders",
                idle.len(),
                free_orders.len()
            )));
        }
        for (record, order) in idle.into_iter().zip(free_orders) {
            let next = self.carried_record(record, order, now, true)?;
            participants.insert(record.public_key.clone(), next);
        }

        participants.sort_by(|_, a, _, b| a.order.cmp(&b.order));

        let mut next = Round {
            round_number,
            term_number: round.term_number,
            participants,
            ..Default::default()
        };

        let producer_order = Self::extra_block_producer_order(round)?;
        let producer = next
            .occupant_of_order(producer_order)
            .or_else(|| next.occupant_of_order(1))
            .map(|r| r.public_key.clone())
            .ok_or_else(|| TenureError::MissingData("no occupant of order 1".to_string()))?;
        next.record_mut(&producer)?.is_extra_block_producer = true;
        next.extra_block_producer_pubkey = producer;
        Ok(next)
    }

    /// Order of the next round's extra-block producer.
    ///
    /// Seeded by the signature of the lowest-order participant that signed
    /// this round; order 1 when nobody signed.
    pub fn extra_block_producer_order(round: &Round) -> TenureResult<u32> {
        match round.sorted_by_order().into_iter().find_map(|r| r.signature) {
            Some(signature) => signature.to_order(round.participant_count()),
            None => Ok(1),
        }
    }

    fn carried_record(
        &self,
        record: &ParticipantRecord,
        order: u32,
        now: Timestamp,
        missed: bool,
    ) -> TenureResult<ParticipantRecord> {
        let mut next = ParticipantRecord::new(
            record.public_key.clone(),
            order,
            self.expected_time(now, order)?,
        );
        next.produced_blocks = record.produced_blocks;
        next.missed_time_slots = if missed {
            record.missed_time_slots.saturating_add(1)
        } else {
            record.missed_time_slots
        };
        Ok(next)
    }

    fn term_round(
        &self,
        keys: &[PublicKey],
        now: Timestamp,
        term_number: u64,
        round_number: u64,
    ) -> TenureResult<Round> {
        let ordered = Self::term_order(keys)?;
        let mut participants = IndexMap::with_capacity(ordered.len());
        for (index, key) in ordered.into_iter().enumerate() {
            let order = u32::try_from(index + 1)
                .map_err(|_| TenureError::ArithmeticOverflow("participant count".to_string()))?;
            let mut record = ParticipantRecord::new(key.clone(), order, self.expected_time(now, order)?);
            record.is_extra_block_producer = order == 1;
            participants.insert(key, record);
        }

        let extra_block_producer_pubkey = participants
            .first()
            .map(|(key, _)| key.clone())
            .ok_or_else(|| TenureError::MissingData("empty participant list".to_string()))?;

        let round = Round {
            round_number,
            term_number,
            participants,
            extra_block_producer_pubkey,
            is_participant_list_just_changed: true,
            ..Default::default()
        };
        round.check_invariants()?;
        Ok(round)
    }

    /// Public ordering of a new participant set: leading key byte descending,
    /// ties broken by the full key descending. Caller order is ignored.
    pub fn term_order(keys: &[PublicKey]) -> TenureResult<Vec<PublicKey>> {
        if keys.is_empty() {
            return Err(TenureError::MissingData("empty participant list".to_string()));
        }
        let mut seen = HashSet::with_capacity(keys.len());
        for key in keys {
            if key.is_empty() {
                return Err(TenureError::InvalidConfig("empty public key".to_string()));
            }
            if !seen.insert(key) {
                return Err(TenureError::RoundSequenceError(format!(
                    "duplicate participant {key}"
                )));
            }
        }
        let mut ordered = keys.to_vec();
        ordered.sort_by(|a, b| b.first_byte().cmp(&a.first_byte()).then_with(|| b.cmp(a)));
        Ok(ordered)
    }

    fn expected_time(&self, now: Timestamp, order: u32) -> TenureResult<Timestamp> {
        u64::from(order)
            .checked_mul(self.mining_interval)
            .and_then(|offset| now.checked_add(offset))
            .ok_or_else(|| TenureError::ArithmeticOverflow(format!("expected time of order {order}")))
    }
}
