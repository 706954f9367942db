//! Lockstep chain driver shared by the integration tests.

#![allow(dead_code)]

use std::collections::BTreeSet;

use tenure_consensus::{
    Behavior, BlockEffects, ConsensusConfig, ConsensusEngine, Hash, HeaderInfo, HeaderOrigin,
    PublicKey, TenureResult, Timestamp, TriggerInformation,
};

pub const INTERVAL: u64 = 100;

pub fn key(i: u8) -> PublicKey {
    PublicKey::new(vec![i; 33])
}

pub fn keys(n: u8) -> Vec<PublicKey> {
    (1..=n).map(key).collect()
}

/// Deterministic in-value of `participant` for `round`.
pub fn in_value(participant: &PublicKey, round: u64) -> Hash {
    let mut seed = participant.as_bytes().to_vec();
    seed.extend_from_slice(&round.to_be_bytes());
    Hash::digest(&seed)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One engine plus the chain height, driven slot by slot.
pub struct Chain {
    pub engine: ConsensusEngine,
    pub height: u64,
    /// Every header accepted so far, with its block time
    pub log: Vec<(HeaderInfo, Timestamp)>,
}

impl Chain {
    pub fn new(n: u8) -> Self {
        Self::with_config(ConsensusConfig::default().with_mining_interval(INTERVAL), n)
    }

    pub fn with_config(config: ConsensusConfig, n: u8) -> Self {
        let engine = ConsensusEngine::genesis(config, keys(n), 0).expect("genesis");
        Self {
            engine,
            height: 1,
            log: Vec::new(),
        }
    }

    pub fn produce(
        &mut self,
        producer: &PublicKey,
        behavior: Behavior,
        trigger: &TriggerInformation,
        at: Timestamp,
    ) -> TenureResult<BlockEffects> {
        let header = self
            .engine
            .build_header(producer, behavior, trigger, at, self.height)?;
        let effects = self.engine.process_block(&header, at, HeaderOrigin::Local)?;
        self.log.push((header, at));
        self.height += 1;
        Ok(effects)
    }

    /// Normal block of `producer` at the start of its slot, then up to
    /// `tiny` tiny blocks while the scheduler allows them.
    pub fn mine_slot(&mut self, producer: &PublicKey, tiny: u32) -> TenureResult<()> {
        let round = self.engine.current_round()?.clone();
        let record = round.record(producer)?;
        let at = record.expected_mining_time;
        let trigger = TriggerInformation::new(in_value(producer, round.round_number))
            .with_previous_in_value(
                round
                    .round_number
                    .checked_sub(1)
                    .map(|r| in_value(producer, r)),
            );
        self.produce(producer, Behavior::UpdateValue, &trigger, at)?;

        for step in 1..=u64::from(tiny) {
            let t = at + step * (INTERVAL / 10);
            let command = self.engine.next_action(producer, t)?;
            if command.behavior != Behavior::TinyBlock {
                break;
            }
            self.produce(producer, Behavior::TinyBlock, &TriggerInformation::default(), t)?;
        }
        Ok(())
    }

    /// Terminate the current round through the first participant in `online`
    /// whose scheduler opens a terminating window, scanning from the extra
    /// slot onward.
    pub fn terminate(&mut self, online: &BTreeSet<PublicKey>) -> TenureResult<BlockEffects> {
        let round = self.engine.current_round()?.clone();
        let extra = round.extra_block_mining_time(INTERVAL)?;
        let steps = 4 * (round.participant_count() as u64 + 2);
        for step in 0..steps {
            let t = extra + step * INTERVAL;
            for participant in online {
                if !round.contains(participant) {
                    continue;
                }
                let command = self.engine.next_action(participant, t)?;
                if command.behavior.terminates_round() && command.is_open_at(t) {
                    return self.produce(participant, command.behavior, &TriggerInformation::default(), t);
                }
            }
        }
        panic!("nobody in {online:?} could terminate round {}", round.round_number);
    }

    /// Mine every slot of the current round whose owner is online, in slot
    /// order, then terminate it.
    pub fn run_round(&mut self, online: &BTreeSet<PublicKey>, tiny: u32) -> TenureResult<BlockEffects> {
        let round = self.engine.current_round()?.clone();
        for record in round.sorted_by_order() {
            if online.contains(&record.public_key) {
                self.mine_slot(&record.public_key, tiny)?;
            }
        }
        self.terminate(online)
    }

    pub fn everyone(&self) -> BTreeSet<PublicKey> {
        self.engine.active_participant_list().into_iter().collect()
    }
}
