//! # Round Data Model
//!
//! A [`Round`] is one full cycle in which every active participant owns
//! exactly one production slot, followed by one extra slot in which the
//! extra-block producer terminates the round.
//!
//! ## Slot layout
//!
//! ```text
//! | order 1 | order 2 | ... | order N | extra block |
//! ^ round start                       ^ extra block time
//! ```
//!
//! Every slot is `mining_interval` milliseconds long. Records are mutated in
//! place only by the participant owning the slot (its own commitment fields)
//! and by LIB aggregation; once the round number advances the round is
//! history.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;

use crate::types::{BlockHeight, Hash, PublicKey, RoundNumber, TermNumber, Timestamp};
use crate::{TenureError, TenureResult};

/// Per-participant state within one round.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub public_key: PublicKey,

    /// Slot position in this round, `1..=N`
    pub order: u32,

    pub expected_mining_time: Timestamp,

    /// Append-only; one normal block followed by tiny blocks
    pub actual_mining_times: Vec<Timestamp>,

    /// Commitment to this round's in-value
    pub out_value: Option<Hash>,

    pub signature: Option<Hash>,

    /// In-value committed in the previous round, once revealed
    pub previous_in_value: Option<Hash>,

    /// `(signature mod N) + 1`, 0 until the participant has mined
    pub supposed_order_of_next_round: u32,

    /// Supposed order after collision tuning
    pub final_order_of_next_round: u32,

    pub produced_blocks: u64,
    pub missed_time_slots: u64,
    pub implied_irreversible_height: BlockHeight,
    pub is_extra_block_producer: bool,

    /// Shares of this participant's in-value, keyed by holder
    pub encrypted_pieces: BTreeMap<PublicKey, Vec<u8>>,

    /// Shares of this participant's in-value returned by holders
    pub decrypted_pieces: BTreeMap<PublicKey, Vec<u8>>,
}

impl ParticipantRecord {
    pub fn new(public_key: PublicKey, order: u32, expected_mining_time: Timestamp) -> Self {
        Self {
            public_key,
            order,
            expected_mining_time,
            ..Default::default()
        }
    }

    pub fn has_mined(&self) -> bool {
        self.supposed_order_of_next_round != 0
    }

    pub fn latest_mining_time(&self) -> Option<Timestamp> {
        self.actual_mining_times.last().copied()
    }

    /// End of this participant's slot (exclusive).
    pub fn slot_end(&self, mining_interval: u64) -> TenureResult<Timestamp> {
        self.expected_mining_time
            .checked_add(mining_interval)
            .ok_or_else(|| TenureError::ArithmeticOverflow("slot end".to_string()))
    }

    pub fn is_within_slot(&self, time: Timestamp, mining_interval: u64) -> TenureResult<bool> {
        Ok(time >= self.expected_mining_time && time < self.slot_end(mining_interval)?)
    }
}

/// Snapshot of one round.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Round {
    pub round_number: RoundNumber,
    pub term_number: TermNumber,
    pub participants: IndexMap<PublicKey, ParticipantRecord>,
    pub confirmed_irreversible_height: BlockHeight,
    pub confirmed_irreversible_round: RoundNumber,
    pub blockchain_age_seconds: u64,
    pub extra_block_producer_pubkey: PublicKey,

    /// Set on the first round of every term
    pub is_participant_list_just_changed: bool,
}

impl Round {
    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn contains(&self, key: &PublicKey) -> bool {
        self.participants.contains_key(key)
    }

    pub fn get(&self, key: &PublicKey) -> Option<&ParticipantRecord> {
        self.participants.get(key)
    }

    /// Record of `key`, failing with `MissingData` if it is not a participant.
    pub fn record(&self, key: &PublicKey) -> TenureResult<&ParticipantRecord> {
        self.participants.get(key).ok_or_else(|| {
            TenureError::MissingData(format!(
                "{key} is not a participant of round {}",
                self.round_number
            ))
        })
    }

    pub fn record_mut(&mut self, key: &PublicKey) -> TenureResult<&mut ParticipantRecord> {
        let round_number = self.round_number;
        self.participants.get_mut(key).ok_or_else(|| {
            TenureError::MissingData(format!("{key} is not a participant of round {round_number}"))
        })
    }

    /// Records in ascending slot order.
    pub fn sorted_by_order(&self) -> Vec<&ParticipantRecord> {
        let mut records: Vec<_> = self.participants.values().collect();
        records.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.public_key.cmp(&b.public_key)));
        records
    }

    /// Participant keys in slot order.
    pub fn participant_list(&self) -> Vec<PublicKey> {
        self.sorted_by_order()
            .into_iter()
            .map(|r| r.public_key.clone())
            .collect()
    }

    pub fn occupant_of_order(&self, order: u32) -> Option<&ParticipantRecord> {
        self.participants.values().find(|r| r.order == order)
    }

    /// Expected mining time of the order-1 slot.
    pub fn round_start_time(&self) -> TenureResult<Timestamp> {
        self.sorted_by_order()
            .first()
            .map(|r| r.expected_mining_time)
            .ok_or_else(|| TenureError::MissingData(format!("round {} is empty", self.round_number)))
    }

    /// Start of the extra slot: one interval after the last normal slot.
    pub fn extra_block_mining_time(&self, mining_interval: u64) -> TenureResult<Timestamp> {
        let last = self
            .sorted_by_order()
            .last()
            .map(|r| r.expected_mining_time)
            .ok_or_else(|| TenureError::MissingData(format!("round {} is empty", self.round_number)))?;
        last.checked_add(mining_interval)
            .ok_or_else(|| TenureError::ArithmeticOverflow("extra block time".to_string()))
    }

    /// Full length of a round, `(N + 1) * interval`.
    pub fn total_length(&self, mining_interval: u64) -> TenureResult<u64> {
        u64::try_from(self.participant_count())
            .ok()
            .and_then(|n| n.checked_add(1))
            .and_then(|n| n.checked_mul(mining_interval))
            .ok_or_else(|| TenureError::ArithmeticOverflow("round length".to_string()))
    }

    /// Fingerprint of the slot layout, binding same-round headers to the
    /// round they were built against.
    pub fn round_id(&self) -> u64 {
        self.participants
            .values()
            .fold(0u64, |acc, r| acc.wrapping_add(r.expected_mining_time))
    }

    pub fn extra_block_producer(&self) -> Option<&ParticipantRecord> {
        self.participants.values().find(|r| r.is_extra_block_producer)
    }

    /// XOR of every signature recorded in this round.
    pub fn signature_aggregate(&self) -> Hash {
        self.participants
            .values()
            .filter_map(|r| r.signature)
            .fold(Hash::ZERO, |acc, s| acc.xor(&s))
    }

    /// Deterministic consensus signature for a participant revealing
    /// `in_value` in the round that follows this one.
    pub fn calculate_signature(&self, in_value: &Hash) -> Hash {
        in_value.xor(&self.signature_aggregate())
    }

    /// Participants that produced their normal block this round.
    pub fn mined_participants(&self) -> Vec<&ParticipantRecord> {
        self.participants.values().filter(|r| r.has_mined()).collect()
    }

    /// Keys of participants holding an out-value this round.
    pub fn mined_keys(&self) -> Vec<PublicKey> {
        self.participants
            .values()
            .filter(|r| r.out_value.is_some())
            .map(|r| r.public_key.clone())
            .collect()
    }

    /// Whether `order` values form a permutation of `1..=N`.
    pub fn orders_form_permutation(&self) -> bool {
        let n = self.participant_count();
        let orders: BTreeSet<u32> = self.participants.values().map(|r| r.order).collect();
        orders.len() == n
            && orders
                .iter()
                .zip(1u32..)
                .all(|(order, expected)| *order == expected)
    }

    /// Structural invariants every stored or generated round satisfies.
    pub fn check_invariants(&self) -> TenureResult<()> {
        if self.participants.is_empty() {
            return Err(TenureError::MissingData(format!(
                "round {} has no participants",
                self.round_number
            )));
        }

        for (key, record) in &self.participants {
            if *key != record.public_key {
                return Err(TenureError::RoundSequenceError(format!(
                    "record keyed by {key} belongs to {}",
                    record.public_key
                )));
            }
        }

        if !self.orders_form_permutation() {
            return Err(TenureError::RoundSequenceError(format!(
                "orders of round {} are not a permutation of 1..={}",
                self.round_number,
                self.participant_count()
            )));
        }

        let producers: Vec<_> = self
            .participants
            .values()
            .filter(|r| r.is_extra_block_producer)
            .collect();
        match producers.as_slice() {
            [only] if only.public_key == self.extra_block_producer_pubkey => Ok(()),
            [only] => Err(TenureError::RoundSequenceError(format!(
                "extra block producer flag on {} but header names {}",
                only.public_key, self.extra_block_producer_pubkey
            ))),
            _ => Err(TenureError::RoundSequenceError(format!(
                "round {} has {} extra block producers",
                self.round_number,
                producers.len()
            ))),
        }
    }

    /// Record `signature` for `key` and derive its next-round order.
    ///
    /// The participant keeps `(signature mod N) + 1`. Any other participant
    /// already holding that final order is moved forward to the next free
    /// order, wrapping from N back to 1.
    pub fn apply_next_round_order(&mut self, key: &PublicKey, signature: Hash) -> TenureResult<u32> {
        let n = self.participant_count();
        let supposed = signature.to_order(n)?;
        self.record(key)?;

        let conflicted: Vec<PublicKey> = self
            .participants
            .values()
            .filter(|r| r.public_key != *key && r.final_order_of_next_round == supposed)
            .map(|r| r.public_key.clone())
            .collect();

        for other in conflicted {
            let mut taken: HashSet<u32> = self
                .participants
                .values()
                .filter(|r| r.public_key != other && r.public_key != *key)
                .map(|r| r.final_order_of_next_round)
                .filter(|order| *order != 0)
                .collect();
            taken.insert(supposed);

            let free = next_free_order(supposed, n, &taken)?;
            debug!(
                round = self.round_number,
                participant = %other,
                from = supposed,
                to = free,
                "next round order retuned after collision"
            );
            self.record_mut(&other)?.final_order_of_next_round = free;
        }

        let record = self.record_mut(key)?;
        record.signature = Some(signature);
        record.supposed_order_of_next_round = supposed;
        record.final_order_of_next_round = supposed;
        Ok(supposed)
    }

    /// Whether `key`'s slot ended before `now`.
    pub fn is_time_slot_passed(
        &self,
        key: &PublicKey,
        now: Timestamp,
        mining_interval: u64,
    ) -> TenureResult<bool> {
        Ok(now >= self.record(key)?.slot_end(mining_interval)?)
    }
}

/// First order after `start` (wrapping within `1..=n`) that is not taken.
fn next_free_order(start: u32, n: usize, taken: &HashSet<u32>) -> TenureResult<u32> {
    let n64 = u64::try_from(n)
        .map_err(|_| TenureError::ArithmeticOverflow("participant count".to_string()))?;
    let base = u64::from(start)
        .checked_sub(1)
        .ok_or_else(|| TenureError::RoundSequenceError("order 0 is not a slot".to_string()))?;
    for step in 1..n64 {
        let candidate = (base + step) % n64 + 1;
        let candidate = u32::try_from(candidate)
            .map_err(|_| TenureError::ArithmeticOverflow("order".to_string()))?;
        if !taken.contains(&candidate) {
            return Ok(candidate);
        }
    }
    Err(TenureError::RoundSequenceError(format!(
        "no free order left after {start} among {n} participants"
    )))
}
