//! # Consensus Engine
//!
//! Owns the round store and drives one block at a time through
//! validation and merge. The host asks the engine what to do
//! ([`ConsensusEngine::next_action`]), builds a header for it
//! ([`ConsensusEngine::build_header`]) and feeds every block, local or
//! remote, back through [`ConsensusEngine::process_block`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};

use crate::config::ConsensusConfig;
use crate::generation::RoundGenerator;
use crate::header::{Behavior, HeaderInfo, HeaderOrigin};
use crate::irreversible::IrreversibleHeightAggregator;
use crate::round::Round;
use crate::scheduler::{ConsensusCommand, ConsensusScheduler};
use crate::store::RoundStore;
use crate::types::{BlockHeight, Hash, PublicKey, RoundNumber, TermNumber, Timestamp};
use crate::validation::{ValidatedHeader, ValidationContext, ValidationOutcome, ValidationPipeline};
use crate::{TenureError, TenureResult};

/// Supplies the participant set of an upcoming term.
pub trait ElectionSource: Send + Sync {
    /// Elected keys for `term`, best first. Empty keeps the current set.
    fn elected_participants(&self, term: TermNumber) -> Vec<PublicKey>;
}

/// Proposer-side secrets and shares for one header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerInformation {
    /// Fresh in-value committed by an `UpdateValue`
    pub in_value: Option<Hash>,
    /// In-value committed in the previous round
    pub previous_in_value: Option<Hash>,
    /// Shares of `in_value`, keyed by holder
    pub encrypted_pieces: BTreeMap<PublicKey, Vec<u8>>,
    /// Shares returned to their owners, keyed by owner
    pub decrypted_pieces: BTreeMap<PublicKey, Vec<u8>>,
}

impl TriggerInformation {
    pub fn new(in_value: Hash) -> Self {
        Self {
            in_value: Some(in_value),
            ..Default::default()
        }
    }

    pub fn with_previous_in_value(mut self, previous_in_value: Option<Hash>) -> Self {
        self.previous_in_value = previous_in_value;
        self
    }

    pub fn with_encrypted_pieces(mut self, pieces: BTreeMap<PublicKey, Vec<u8>>) -> Self {
        self.encrypted_pieces = pieces;
        self
    }

    pub fn with_decrypted_pieces(mut self, pieces: BTreeMap<PublicKey, Vec<u8>>) -> Self {
        self.decrypted_pieces = pieces;
        self
    }
}

/// What one accepted block changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEffects {
    pub producer: PublicKey,
    pub behavior: Behavior,
    pub round_number: RoundNumber,
    pub term_number: TermNumber,
    pub round_advanced: bool,
    pub term_advanced: bool,
    /// Newly confirmed irreversible height
    pub irreversible_height: Option<BlockHeight>,
}

pub struct ConsensusEngine {
    config: ConsensusConfig,
    store: RoundStore,
    scheduler: ConsensusScheduler,
    generator: RoundGenerator,
    pipeline: ValidationPipeline,
    election: Option<Box<dyn ElectionSource>>,
}

impl ConsensusEngine {
    /// Start a chain at `start` with `participants` as the first term.
    pub fn genesis(
        config: ConsensusConfig,
        participants: Vec<PublicKey>,
        start: Timestamp,
    ) -> TenureResult<Self> {
        config.validate()?;
        let generator = RoundGenerator::from_config(&config, start);
        let first = generator.generate_first_round(&participants, start)?;
        let mut store = RoundStore::new(&config, start);
        store.initialize(first)?;
        info!(
            participants = participants.len(),
            start,
            interval = config.mining_interval_ms,
            "consensus genesis"
        );
        Ok(Self::assemble(config, store))
    }

    /// Resume from a persisted store.
    pub fn from_store(config: ConsensusConfig, store: RoundStore) -> TenureResult<Self> {
        config.validate()?;
        store.current_round()?.check_invariants()?;
        Ok(Self::assemble(config, store))
    }

    /// Resume from [`ConsensusEngine::snapshot`] bytes.
    pub fn restore(config: ConsensusConfig, snapshot: &[u8]) -> TenureResult<Self> {
        Self::from_store(config, RoundStore::from_bytes(snapshot)?)
    }

    fn assemble(config: ConsensusConfig, store: RoundStore) -> Self {
        let start = store.chain_start_timestamp();
        Self {
            scheduler: ConsensusScheduler::new(config.clone(), start),
            generator: RoundGenerator::from_config(&config, start),
            pipeline: ValidationPipeline::standard(),
            election: None,
            config,
            store,
        }
    }

    pub fn with_election(mut self, election: Box<dyn ElectionSource>) -> Self {
        self.election = Some(election);
        self
    }

    pub fn with_pipeline(mut self, pipeline: ValidationPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    pub fn store(&self) -> &RoundStore {
        &self.store
    }

    pub fn scheduler(&self) -> &ConsensusScheduler {
        &self.scheduler
    }

    pub fn generator(&self) -> &RoundGenerator {
        &self.generator
    }

    pub fn snapshot(&self) -> TenureResult<Vec<u8>> {
        self.store.to_bytes()
    }

    // ------------------------------------------------------------------
    // Downstream queries
    // ------------------------------------------------------------------

    pub fn current_round(&self) -> TenureResult<&Round> {
        self.store.current_round()
    }

    pub fn active_participant_list(&self) -> Vec<PublicKey> {
        self.store.active_participant_list()
    }

    pub fn confirmed_irreversible_height(&self) -> BlockHeight {
        self.store.confirmed_irreversible_height()
    }

    pub fn is_current_participant(&self, key: &PublicKey) -> bool {
        self.store.is_current_participant(key)
    }

    /// Participant count the growth schedule allows at `now`.
    pub fn participant_count_at(&self, now: Timestamp) -> u32 {
        self.store.participant_schedule().count_at(now)
    }

    pub fn set_participant_increase_interval(
        &mut self,
        now: Timestamp,
        interval_seconds: u64,
    ) -> TenureResult<()> {
        self.store.set_participant_increase_interval(now, interval_seconds)?;
        info!(now, interval_seconds, "participant growth interval changed");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Proposer side
    // ------------------------------------------------------------------

    pub fn next_action(&self, self_key: &PublicKey, now: Timestamp) -> TenureResult<ConsensusCommand> {
        self.scheduler.next_action(self.store.current_round()?, self_key, now)
    }

    /// Build the header `self_key` would attach to a block at `now` and
    /// `height`. Construction does not check timing; validation does.
    pub fn build_header(
        &self,
        self_key: &PublicKey,
        behavior: Behavior,
        trigger: &TriggerInformation,
        now: Timestamp,
        height: BlockHeight,
    ) -> TenureResult<HeaderInfo> {
        let base = self.store.current_round()?;
        if !base.contains(self_key) {
            return Err(TenureError::PermissionDenied(format!(
                "{self_key} is not a participant of round {}",
                base.round_number
            )));
        }

        let round = match behavior {
            Behavior::UpdateValue => self.build_update_value(base, self_key, trigger, now, height)?,
            Behavior::TinyBlock => {
                let mut round = base.clone();
                round.record_mut(self_key)?.actual_mining_times.push(now);
                round
            }
            Behavior::NextRound => self.generator.generate_next(base, now, None)?,
            Behavior::NextTerm => {
                let participants = self.next_term_participants(base, now)?;
                self.generator.generate_next(base, now, Some(participants))?
            }
            Behavior::Wait => {
                return Err(TenureError::RoundSequenceError(
                    "a wait produces no header".to_string(),
                ))
            }
        };
        debug!(sender = %self_key, %behavior, round = round.round_number, "header built");
        Ok(HeaderInfo::new(self_key.clone(), round, behavior))
    }

    fn build_update_value(
        &self,
        base: &Round,
        self_key: &PublicKey,
        trigger: &TriggerInformation,
        now: Timestamp,
        height: BlockHeight,
    ) -> TenureResult<Round> {
        let in_value = trigger.in_value.ok_or_else(|| {
            TenureError::MissingData("publishing a value requires an in-value".to_string())
        })?;
        let out_value = in_value.rehash();

        let previous = self.store.previous_round();
        let committed = previous
            .and_then(|p| p.get(self_key))
            .and_then(|r| r.out_value);
        // A reconstructed in-value takes precedence; an unverifiable one is dropped
        let previous_in_value = base.record(self_key)?.previous_in_value.or_else(|| {
            trigger
                .previous_in_value
                .filter(|v| committed == Some(v.rehash()))
        });
        let revealed = previous_in_value.unwrap_or(out_value);
        let signature = match previous {
            Some(previous) => previous.calculate_signature(&revealed),
            None => revealed,
        };

        let mut round = base.clone();
        {
            let record = round.record_mut(self_key)?;
            record.out_value = Some(out_value);
            record.previous_in_value = previous_in_value;
            record.implied_irreversible_height = height.saturating_sub(1);
            record.actual_mining_times.push(now);
            record.encrypted_pieces = trigger.encrypted_pieces.clone();
        }
        round.apply_next_round_order(self_key, signature)?;
        for (owner, piece) in &trigger.decrypted_pieces {
            if let Some(record) = round.participants.get_mut(owner) {
                record.decrypted_pieces.insert(self_key.clone(), piece.clone());
            }
        }
        Ok(round)
    }

    /// Participant set of the term after `base`'s: the elected list capped by
    /// the growth schedule, or the current set when nobody was elected.
    fn next_term_participants(&self, base: &Round, now: Timestamp) -> TenureResult<Vec<PublicKey>> {
        let next_term = base
            .term_number
            .checked_add(1)
            .ok_or_else(|| TenureError::ArithmeticOverflow("term number".to_string()))?;
        let elected = self
            .election
            .as_ref()
            .map(|e| e.elected_participants(next_term))
            .unwrap_or_default();
        if elected.is_empty() {
            return Ok(base.participant_list());
        }

        let cap = usize::try_from(self.participant_count_at(now)).unwrap_or(usize::MAX).max(1);
        let mut seen = HashSet::new();
        let participants: Vec<PublicKey> = elected
            .into_iter()
            .filter(|k| !k.is_empty() && seen.insert(k.clone()))
            .take(cap)
            .collect();
        Ok(participants)
    }

    // ------------------------------------------------------------------
    // Block processing
    // ------------------------------------------------------------------

    /// Run the pipeline without touching state.
    pub fn validate_header(
        &self,
        header: &HeaderInfo,
        block_time: Timestamp,
        origin: HeaderOrigin,
    ) -> ValidationOutcome {
        let ctx = match self.context(header, block_time) {
            Ok(ctx) => ctx,
            Err(e) => return ValidationOutcome::Reject(e),
        };
        let outcome = self.pipeline.validate(&ctx).for_origin(origin);
        if !outcome.is_accept() {
            return outcome;
        }
        self.check_elected_set(&ctx).into()
    }

    /// Validate a block's header and merge it into state.
    pub fn process_block(
        &mut self,
        header: &HeaderInfo,
        block_time: Timestamp,
        origin: HeaderOrigin,
    ) -> TenureResult<BlockEffects> {
        let validated = {
            let ctx = self.context(header, block_time)?;
            let validated = self.pipeline.admit(&ctx, origin).map_err(|refusal| {
                warn!(
                    sender = %header.sender_pubkey,
                    behavior = %header.behavior,
                    ?origin,
                    retryable = refusal.retryable,
                    error = %refusal.error,
                    "header rejected"
                );
                TenureError::from(refusal)
            })?;
            self.check_elected_set(&ctx)?;
            validated
        };
        self.apply(validated)
    }

    fn context<'a>(
        &'a self,
        header: &'a HeaderInfo,
        block_time: Timestamp,
    ) -> TenureResult<ValidationContext<'a>> {
        ValidationContext::new(&self.store, &self.scheduler, &self.generator, header, block_time)
    }

    /// A new term must seat exactly the participants the election implies.
    fn check_elected_set(&self, ctx: &ValidationContext<'_>) -> TenureResult<()> {
        if ctx.behavior() != Behavior::NextTerm {
            return Ok(());
        }
        let expected: HashSet<PublicKey> = self
            .next_term_participants(ctx.base_round, ctx.block_time)?
            .into_iter()
            .collect();
        let proposed: HashSet<PublicKey> = ctx.proposed.participants.keys().cloned().collect();
        if expected != proposed {
            return Err(TenureError::RoundSequenceError(format!(
                "term {} seats participants other than the elected ones",
                ctx.proposed.term_number
            )));
        }
        Ok(())
    }

    fn apply(&mut self, validated: ValidatedHeader) -> TenureResult<BlockEffects> {
        let base = self.store.current_round()?;
        let base_term = base.term_number;
        let mut next = validated.apply_to(base, &self.generator)?;
        let producer = validated.sender().clone();

        if validated.behavior().terminates_round() {
            let effects = BlockEffects {
                producer: producer.clone(),
                behavior: validated.behavior(),
                round_number: next.round_number,
                term_number: next.term_number,
                round_advanced: true,
                term_advanced: next.term_number != base_term,
                irreversible_height: None,
            };
            self.store.advance(next)?;
            self.store.record_terminating_producer(&producer);
            info!(
                producer = %producer,
                round = effects.round_number,
                term = effects.term_number,
                "round advanced"
            );
            return Ok(effects);
        }

        let mut irreversible_height = None;
        if let Some(previous) = self.store.previous_round() {
            let advanced = IrreversibleHeightAggregator::advance(
                previous,
                &next.mined_keys(),
                self.store.confirmed_irreversible_height(),
            )?;
            if let Some(height) = advanced {
                next.confirmed_irreversible_height = height;
                next.confirmed_irreversible_round = previous.round_number;
                irreversible_height = Some(height);
            }
        }

        let effects = BlockEffects {
            producer: producer.clone(),
            behavior: validated.behavior(),
            round_number: next.round_number,
            term_number: next.term_number,
            round_advanced: false,
            term_advanced: false,
            irreversible_height,
        };
        self.store.update_current_round(next)?;
        self.store.record_producer(&producer);
        debug!(producer = %producer, behavior = %effects.behavior, round = effects.round_number, "block applied");
        Ok(effects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::round::tests::key;
    use crate::secret::SecretRevealReconstructor;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const INTERVAL: u64 = 100;

    fn engine(n: u8) -> ConsensusEngine {
        let config = ConsensusConfig::default().with_mining_interval(INTERVAL);
        ConsensusEngine::genesis(config, (1..=n).map(key).collect(), 0).unwrap()
    }

    fn in_value(i: u8, round: u64) -> Hash {
        Hash::digest(&[i, u8::try_from(round).unwrap()])
    }

    /// Every participant mines its slot in order, then the extra-block
    /// producer terminates the round.
    fn run_round(engine: &mut ConsensusEngine, height: &mut u64) {
        let round = engine.current_round().unwrap().clone();
        for record in round.sorted_by_order() {
            let i = record.public_key.as_bytes()[0];
            let trigger = TriggerInformation::new(in_value(i, round.round_number))
                .with_previous_in_value(Some(in_value(i, round.round_number - 1)));
            let t = record.expected_mining_time;
            let header = engine
                .build_header(&record.public_key, Behavior::UpdateValue, &trigger, t, *height)
                .unwrap();
            engine.process_block(&header, t, HeaderOrigin::Remote).unwrap();
            *height += 1;
        }
        let t = round.extra_block_mining_time(INTERVAL).unwrap();
        let producer = round.extra_block_producer_pubkey.clone();
        let command = engine.next_action(&producer, t).unwrap();
        let header = engine
            .build_header(&producer, command.behavior, &TriggerInformation::default(), t, *height)
            .unwrap();
        engine.process_block(&header, t, HeaderOrigin::Remote).unwrap();
        *height += 1;
    }

    #[test]
    fn test_genesis_state() {
        let engine = engine(3);
        let round = engine.current_round().unwrap();
        assert_eq!(round.round_number, 1);
        assert_eq!(engine.active_participant_list(), vec![key(3), key(2), key(1)]);
        assert!(engine.is_current_participant(&key(1)));
        assert_eq!(engine.confirmed_irreversible_height(), 0);
        assert!(ConsensusEngine::genesis(ConsensusConfig::default(), Vec::new(), 0).is_err());
    }

    #[test]
    fn test_full_rounds_advance_and_confirm_height() {
        let mut engine = engine(4);
        let mut height = 1;
        for _ in 0..4 {
            run_round(&mut engine, &mut height);
        }
        assert_eq!(engine.current_round().unwrap().round_number, 5);
        assert!(engine.confirmed_irreversible_height() > 0);
        // Every participant produced one block per round plus extra blocks
        let produced: u64 = engine
            .current_round()
            .unwrap()
            .participants
            .values()
            .map(|r| r.produced_blocks)
            .sum();
        assert_eq!(produced, 4 * 4 + 4);
    }

    #[test]
    fn test_outsider_header_is_rejected_without_state_change() {
        let mut engine = engine(4);
        let mut header = engine
            .build_header(&key(4), Behavior::UpdateValue, &TriggerInformation::new(in_value(4, 1)), 100, 1)
            .unwrap();
        header.sender_pubkey = key(9);
        let before = engine.store().clone();
        let err = engine.process_block(&header, 100, HeaderOrigin::Remote).unwrap_err();
        assert!(matches!(err, TenureError::PermissionDenied(_)));
        assert_eq!(engine.store(), &before);
        assert!(engine.build_header(&key(9), Behavior::TinyBlock, &TriggerInformation::default(), 100, 1).is_err());
    }

    #[test]
    fn test_missing_round_is_missing_data() {
        let mut engine = engine(4);
        let header = HeaderInfo {
            sender_pubkey: key(4),
            round: None,
            behavior: Behavior::UpdateValue,
        };
        assert!(matches!(
            engine.validate_header(&header, 100, HeaderOrigin::Remote),
            ValidationOutcome::Reject(TenureError::MissingData(_))
        ));
        assert!(matches!(
            engine.process_block(&header, 100, HeaderOrigin::Remote),
            Err(TenureError::MissingData(_))
        ));
    }

    #[test]
    fn test_update_value_requires_in_value() {
        let engine = engine(4);
        assert!(matches!(
            engine.build_header(&key(4), Behavior::UpdateValue, &TriggerInformation::default(), 100, 1),
            Err(TenureError::MissingData(_))
        ));
    }

    struct FixedElection(Vec<PublicKey>);

    impl ElectionSource for FixedElection {
        fn elected_participants(&self, _term: TermNumber) -> Vec<PublicKey> {
            self.0.clone()
        }
    }

    #[test]
    fn test_term_change_seats_elected_participants_capped_by_schedule() {
        let config = ConsensusConfig::default()
            .with_mining_interval(INTERVAL)
            .with_term_period(1)
            .with_participant_growth(3, 10, 0, 0);
        let elected = vec![key(7), key(8), key(9), key(6)];
        let mut engine = ConsensusEngine::genesis(config, (1..=3).map(key).collect(), 0)
            .unwrap()
            .with_election(Box::new(FixedElection(elected)));

        let mut height = 1;
        // Round 1 ends at 400 and round 2 at 800; both mined past the one-second term
        // only once the clock passes 1000
        while engine.current_round().unwrap().term_number == 1 {
            run_round(&mut engine, &mut height);
            assert!(engine.current_round().unwrap().round_number < 10);
        }
        let mut seated = engine.active_participant_list();
        seated.sort();
        assert_eq!(seated, vec![key(7), key(8), key(9)]);
        assert!(engine.current_round().unwrap().is_participant_list_just_changed);
        assert_eq!(engine.store().first_round_of_term(2), Some(engine.current_round().unwrap().round_number));
    }

    #[test]
    fn test_term_change_with_foreign_set_is_rejected() {
        let config = ConsensusConfig::default()
            .with_mining_interval(INTERVAL)
            .with_term_period(1);
        let mut engine = ConsensusEngine::genesis(config.clone(), (1..=3).map(key).collect(), 0).unwrap();
        let mut height = 1;
        run_round(&mut engine, &mut height);
        run_round(&mut engine, &mut height);
        let round = engine.current_round().unwrap().clone();
        for record in round.sorted_by_order() {
            let i = record.public_key.as_bytes()[0];
            let trigger = TriggerInformation::new(in_value(i, round.round_number))
                .with_previous_in_value(Some(in_value(i, round.round_number - 1)));
            let t = record.expected_mining_time;
            let header = engine
                .build_header(&record.public_key, Behavior::UpdateValue, &trigger, t, height)
                .unwrap();
            engine.process_block(&header, t, HeaderOrigin::Remote).unwrap();
            height += 1;
        }

        let t = round.extra_block_mining_time(INTERVAL).unwrap();
        let producer = round.extra_block_producer_pubkey.clone();
        assert_eq!(engine.next_action(&producer, t).unwrap().behavior, Behavior::NextTerm);
        let foreign = RoundGenerator::new(INTERVAL, 0)
            .generate_next(&round, t, Some(vec![key(1), key(2), key(9)]))
            .unwrap();
        let header = HeaderInfo::new(producer.clone(), foreign, Behavior::NextTerm);
        assert!(engine.process_block(&header, t, HeaderOrigin::Remote).is_err());

        let header = engine
            .build_header(&producer, Behavior::NextTerm, &TriggerInformation::default(), t, height)
            .unwrap();
        let effects = engine.process_block(&header, t, HeaderOrigin::Remote).unwrap();
        assert!(effects.term_advanced);
        assert_eq!(effects.term_number, 2);
    }

    #[test]
    fn test_shares_reveal_in_value_before_owner_does() {
        // Round 1: key(4) mines first and shares its in-value with the others,
        // who hand their pieces back when they mine
        let mut engine = engine(4);
        let round = engine.current_round().unwrap().clone();
        let mut rng = StdRng::seed_from_u64(3);
        let shares = SecretRevealReconstructor::share_in_value(&round, &key(4), &in_value(4, 1), &mut rng).unwrap();
        assert_eq!(shares.len(), 3);

        for (height, record) in (1..).zip(round.sorted_by_order()) {
            let i = record.public_key.as_bytes()[0];
            let mut trigger = TriggerInformation::new(in_value(i, 1));
            if i == 4 {
                trigger = trigger.with_encrypted_pieces(shares.clone());
            } else {
                let piece = shares.get(&record.public_key).unwrap().clone();
                trigger = trigger.with_decrypted_pieces(BTreeMap::from([(key(4), piece)]));
            }
            let t = record.expected_mining_time;
            let header = engine
                .build_header(&record.public_key, Behavior::UpdateValue, &trigger, t, height)
                .unwrap();
            engine.process_block(&header, t, HeaderOrigin::Remote).unwrap();
        }
        let held = SecretRevealReconstructor::pieces_held_by(engine.current_round().unwrap(), &key(1));
        assert!(held.contains_key(&key(4)));

        let t = round.extra_block_mining_time(INTERVAL).unwrap();
        let producer = round.extra_block_producer_pubkey.clone();
        let header = engine
            .build_header(&producer, Behavior::NextRound, &TriggerInformation::default(), t, 5)
            .unwrap();
        engine.process_block(&header, t, HeaderOrigin::Remote).unwrap();

        let revealed = engine.current_round().unwrap().get(&key(4)).unwrap().previous_in_value;
        assert_eq!(revealed, Some(in_value(4, 1)));
    }

    #[test]
    fn test_snapshot_restore_continues_chain() {
        let mut engine = engine(3);
        let mut height = 1;
        run_round(&mut engine, &mut height);
        let bytes = engine.snapshot().unwrap();
        let mut restored = ConsensusEngine::restore(engine.config().clone(), &bytes).unwrap();
        assert_eq!(restored.store(), engine.store());
        run_round(&mut restored, &mut height);
        assert_eq!(restored.current_round().unwrap().round_number, 3);
    }

    #[test]
    fn test_growth_schedule_survives_restore() {
        const DAY_MS: u64 = 86_400_000;
        let config = ConsensusConfig::default()
            .with_mining_interval(INTERVAL)
            .with_participant_growth(5, 50, 10 * 86_400, 2);
        let mut engine = ConsensusEngine::genesis(config.clone(), (1..=3).map(key).collect(), 0).unwrap();
        engine.set_participant_increase_interval(9 * DAY_MS, 86_400).unwrap();

        let restored = ConsensusEngine::restore(config, &engine.snapshot().unwrap()).unwrap();
        assert_eq!(engine.participant_count_at(12 * DAY_MS), 11);
        assert_eq!(restored.participant_count_at(12 * DAY_MS), 11);
        assert_eq!(restored.store().participant_schedule().interval_seconds(), 86_400);
    }
}
