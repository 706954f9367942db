//! In-process simulation: every participant of one chain produces against a
//! single engine on a manual clock, in strict time order.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use tenure_consensus::{
    Behavior, BlockEffects, ConsensusConfig, ConsensusEngine, Hash, MiningStatus,
    PublicKey, RoundNumber, TermNumber, Timestamp, TriggerInformation,
};

use crate::clock::{Clock, ManualClock};
use crate::commitments::InValueKeeper;
use crate::producer::LocalChain;
use crate::settings::{default_block_spacing, SimulationSettings};
use crate::{NodeError, NodeResult};

/// Deterministic compressed-looking keys for local chains.
pub fn devnet_keys(n: u8) -> Vec<PublicKey> {
    (0..n)
        .map(|i| {
            let mut key = vec![0x02];
            key.extend_from_slice(Hash::digest(&[b'd', b'e', b'v', i]).as_bytes());
            PublicKey::new(key)
        })
        .collect()
}

/// What happened in one completed round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSummary {
    pub round_number: RoundNumber,
    pub term_number: TermNumber,
    /// Participants that produced a normal block, in slot order
    pub producers: Vec<String>,
    pub offline: Vec<String>,
    pub terminated_by: String,
    pub terminated_at: Timestamp,
    pub term_changed: bool,
    pub blocks: u64,
    pub confirmed_irreversible_height: u64,
    pub mining_status: MiningStatus,
    /// In-values of the next round filled from returned shares
    pub revealed_by_shares: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub participants: usize,
    pub rounds: Vec<RoundSummary>,
    pub height: u64,
    pub confirmed_irreversible_height: u64,
}

#[derive(Default)]
struct RoundTally {
    producers: Vec<String>,
    blocks: u64,
}

pub struct Simulation {
    chain: LocalChain,
    clock: ManualClock,
    keepers: BTreeMap<PublicKey, InValueKeeper>,
    rng: StdRng,
    settings: SimulationSettings,
    block_spacing_ms: u64,
    offline: BTreeSet<PublicKey>,
    tiny_used: BTreeMap<PublicKey, (RoundNumber, u32)>,
    tally: RoundTally,
}

impl Simulation {
    /// A fresh chain of `settings.participants` devnet keys starting at 0.
    pub fn new(consensus: ConsensusConfig, settings: SimulationSettings) -> NodeResult<Self> {
        let keys = devnet_keys(settings.participants);
        Self::with_keys(consensus, settings, keys, 0)
    }

    pub fn with_keys(
        consensus: ConsensusConfig,
        settings: SimulationSettings,
        keys: Vec<PublicKey>,
        start: Timestamp,
    ) -> NodeResult<Self> {
        if !(0.0..1.0).contains(&settings.offline_probability) {
            return Err(NodeError::InvalidSettings(format!(
                "offline probability must be in [0, 1), got {}",
                settings.offline_probability
            )));
        }
        let block_spacing_ms = settings
            .block_spacing_ms
            .unwrap_or_else(|| default_block_spacing(&consensus));
        let engine = ConsensusEngine::genesis(consensus, keys.clone(), start)?;
        let keepers = keys
            .iter()
            .map(|k| (k.clone(), InValueKeeper::new(k.clone(), settings.share_secrets)))
            .collect();

        let mut simulation = Self {
            chain: LocalChain::new(engine),
            clock: ManualClock::new(start),
            keepers,
            rng: StdRng::seed_from_u64(settings.seed),
            settings,
            block_spacing_ms: block_spacing_ms.max(1),
            offline: BTreeSet::new(),
            tiny_used: BTreeMap::new(),
            tally: RoundTally::default(),
        };
        simulation.draw_offline()?;
        Ok(simulation)
    }

    pub fn engine(&self) -> &ConsensusEngine {
        &self.chain.engine
    }

    pub fn height(&self) -> u64 {
        self.chain.height
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn snapshot(&self) -> NodeResult<Vec<u8>> {
        Ok(self.chain.engine.snapshot()?)
    }

    /// Run until the configured number of rounds has completed.
    pub fn run(&mut self) -> NodeResult<SimulationReport> {
        let mut rounds = Vec::new();
        while (rounds.len() as u64) < self.settings.rounds {
            if let Some(summary) = self.step()? {
                info!(
                    round = summary.round_number,
                    term = summary.term_number,
                    producers = summary.producers.len(),
                    lib = summary.confirmed_irreversible_height,
                    "round complete"
                );
                rounds.push(summary);
            }
        }
        Ok(SimulationReport {
            participants: self.chain.engine.active_participant_list().len(),
            rounds,
            height: self.chain.height,
            confirmed_irreversible_height: self.chain.engine.confirmed_irreversible_height(),
        })
    }

    /// Produce the next block, moving the clock forward as far as needed.
    /// Returns a summary when the block terminated a round.
    pub fn step(&mut self) -> NodeResult<Option<RoundSummary>> {
        loop {
            let now = self.clock.now();
            let round = self.chain.engine.current_round()?.clone();
            let mut wake = Timestamp::MAX;

            for record in round.sorted_by_order() {
                let key = &record.public_key;
                if self.offline.contains(key) {
                    continue;
                }
                let command = self.chain.engine.next_action(key, now)?;
                if command.behavior == Behavior::Wait {
                    wake = wake.min(command.window_end);
                } else if !command.is_open_at(now) {
                    wake = wake.min(command.window_start);
                } else if command.behavior == Behavior::TinyBlock && !self.tiny_budget_left(key, round.round_number) {
                    wake = wake.min(command.window_end);
                } else {
                    let key = key.clone();
                    return self.produce(&key, command.behavior, now);
                }
            }

            if wake == Timestamp::MAX || wake <= now {
                return Err(NodeError::Stalled(now));
            }
            self.clock.set(wake);
        }
    }

    fn tiny_budget_left(&self, key: &PublicKey, round_number: RoundNumber) -> bool {
        match self.tiny_used.get(key) {
            Some((round, used)) if *round == round_number => *used < self.settings.tiny_blocks_per_slot,
            _ => self.settings.tiny_blocks_per_slot > 0,
        }
    }

    fn produce(&mut self, key: &PublicKey, behavior: Behavior, now: Timestamp) -> NodeResult<Option<RoundSummary>> {
        let base = self.chain.engine.current_round()?.clone();
        let trigger = match (behavior, self.keepers.get_mut(key)) {
            (Behavior::UpdateValue, Some(keeper)) => keeper.trigger(&base, &mut self.rng)?,
            _ => TriggerInformation::default(),
        };
        let height = self.chain.height.saturating_add(1);
        let header = self.chain.engine.build_header(key, behavior, &trigger, now, height)?;
        let effects = self.chain.apply(&header, now, height)?;
        self.clock.advance(self.block_spacing_ms);
        debug!(producer = %key, %behavior, height, now, "simulated block");

        self.tally.blocks += 1;
        match behavior {
            Behavior::UpdateValue => self.tally.producers.push(key.to_hex()),
            Behavior::TinyBlock => {
                let entry = self.tiny_used.entry(key.clone()).or_insert((base.round_number, 0));
                if entry.0 != base.round_number {
                    *entry = (base.round_number, 0);
                }
                entry.1 += 1;
            }
            _ => {}
        }

        if !effects.round_advanced {
            return Ok(None);
        }
        let summary = self.summarize(&base, key, now, &effects)?;
        self.draw_offline()?;
        Ok(Some(summary))
    }

    fn summarize(
        &mut self,
        finished: &tenure_consensus::Round,
        terminator: &PublicKey,
        now: Timestamp,
        effects: &BlockEffects,
    ) -> NodeResult<RoundSummary> {
        let tally = std::mem::take(&mut self.tally);
        let next = self.chain.engine.current_round()?;
        let revealed_by_shares = next
            .participants
            .values()
            .filter(|r| r.previous_in_value.is_some())
            .count();
        Ok(RoundSummary {
            round_number: finished.round_number,
            term_number: finished.term_number,
            producers: tally.producers,
            offline: self.offline.iter().map(PublicKey::to_hex).collect(),
            terminated_by: terminator.to_hex(),
            terminated_at: now,
            term_changed: effects.term_advanced,
            blocks: tally.blocks,
            confirmed_irreversible_height: self.chain.engine.confirmed_irreversible_height(),
            mining_status: self.chain.engine.scheduler().mining_status(next),
            revealed_by_shares,
        })
    }

    /// Pick who sits out the new round; somebody always stays online.
    fn draw_offline(&mut self) -> NodeResult<()> {
        let participants = self.chain.engine.active_participant_list();
        self.offline.clear();
        if self.settings.offline_probability > 0.0 {
            for key in &participants {
                if self.rng.gen_bool(self.settings.offline_probability) {
                    self.offline.insert(key.clone());
                }
            }
        }
        if self.offline.len() == participants.len() {
            if let Some(first) = participants.first() {
                self.offline.remove(first);
            }
        }
        if !self.offline.is_empty() {
            debug!(
                round = self.chain.engine.current_round()?.round_number,
                offline = self.offline.len(),
                "participants offline"
            );
        }
        Ok(())
    }
}
