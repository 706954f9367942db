//! # Producer Loop
//!
//! Cooperative host loop for one participant. It asks the engine for the
//! next action, sleeps until the window opens, re-checks the window after
//! waking and only then builds and submits a local header. An action whose
//! window lapsed while waiting is dropped and recomputed; nothing is applied
//! for it. A round change published by any producer cuts every sleep short.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use tenure_consensus::{
    Behavior, BlockEffects, BlockHeight, ConsensusCommand, ConsensusEngine, HeaderInfo,
    HeaderOrigin, PublicKey, RoundNumber, Timestamp, TriggerInformation, ValidationOutcome,
};

use crate::clock::Clock;
use crate::commitments::InValueKeeper;
use crate::NodeResult;

/// The engine plus the height of the last block applied to it.
pub struct LocalChain {
    pub engine: ConsensusEngine,
    pub height: BlockHeight,
    rounds: watch::Sender<RoundNumber>,
}

impl LocalChain {
    pub fn new(engine: ConsensusEngine) -> Self {
        let (rounds, _) = watch::channel(engine.store().current_round_number());
        Self {
            engine,
            height: 0,
            rounds,
        }
    }

    pub fn shared(engine: ConsensusEngine) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::new(engine)))
    }

    /// Current round number, updated whenever a block advances the round.
    pub fn subscribe(&self) -> watch::Receiver<RoundNumber> {
        self.rounds.subscribe()
    }

    /// Apply a local header as block `height`.
    pub fn apply(&mut self, header: &HeaderInfo, now: Timestamp, height: BlockHeight) -> NodeResult<BlockEffects> {
        let effects = self.engine.process_block(header, now, HeaderOrigin::Local)?;
        self.height = height;
        if effects.round_advanced {
            self.rounds.send_replace(self.engine.store().current_round_number());
        }
        Ok(effects)
    }
}

/// One block produced by a loop.
#[derive(Debug, Clone, Serialize)]
pub struct ProducedBlock {
    pub height: BlockHeight,
    pub block_time: Timestamp,
    pub effects: BlockEffects,
}

enum Step {
    Produced(Timestamp),
    SleepUntil(Timestamp),
    Recheck,
}

pub struct ProducerLoop {
    key: PublicKey,
    chain: Arc<Mutex<LocalChain>>,
    clock: Arc<dyn Clock>,
    keeper: InValueKeeper,
    rng: StdRng,
    events: Option<mpsc::UnboundedSender<ProducedBlock>>,
    block_spacing_ms: u64,
    tiny_blocks_per_slot: u32,
    /// Tiny blocks already produced in the current slot
    tiny_in_slot: (RoundNumber, u32),
}

impl ProducerLoop {
    pub fn new(key: PublicKey, chain: Arc<Mutex<LocalChain>>, clock: Arc<dyn Clock>) -> Self {
        Self {
            keeper: InValueKeeper::new(key.clone(), true),
            key,
            chain,
            clock,
            rng: StdRng::from_entropy(),
            events: None,
            block_spacing_ms: 1,
            tiny_blocks_per_slot: 0,
            tiny_in_slot: (0, 0),
        }
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<ProducedBlock>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn with_block_spacing(mut self, ms: u64) -> Self {
        self.block_spacing_ms = ms.max(1);
        self
    }

    pub fn with_tiny_blocks(mut self, per_slot: u32) -> Self {
        self.tiny_blocks_per_slot = per_slot;
        self
    }

    pub fn with_secret_sharing(mut self, enabled: bool) -> Self {
        self.keeper = InValueKeeper::new(self.key.clone(), enabled);
        self
    }

    /// Produce until `shutdown` turns true. Returns the number of blocks produced.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> NodeResult<u64> {
        info!(participant = %self.key, "producer started");
        let mut rounds = self.chain.lock().await.subscribe();
        let mut produced = 0;
        loop {
            if *shutdown.borrow() {
                break;
            }
            rounds.mark_unchanged();
            let wake = match self.step().await? {
                Step::Produced(at) => {
                    produced += 1;
                    at.saturating_add(self.block_spacing_ms)
                }
                Step::SleepUntil(at) => at,
                Step::Recheck => continue,
            };
            tokio::select! {
                _ = self.clock.sleep_until(wake) => {}
                _ = rounds.changed() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!(participant = %self.key, produced, "producer stopped");
        Ok(produced)
    }

    async fn step(&mut self) -> NodeResult<Step> {
        let now = self.clock.now();
        let command = self.chain.lock().await.engine.next_action(&self.key, now)?;
        if command.behavior == Behavior::Wait {
            return Ok(Step::SleepUntil(command.window_end));
        }
        if !command.is_open_at(now) {
            return Ok(Step::SleepUntil(command.window_start));
        }
        if command.behavior == Behavior::TinyBlock && !self.tiny_budget_left().await? {
            return Ok(Step::SleepUntil(command.window_end));
        }
        self.produce(command).await
    }

    async fn tiny_budget_left(&self) -> NodeResult<bool> {
        let round = self.chain.lock().await.engine.current_round()?.round_number;
        let (slot_round, used) = self.tiny_in_slot;
        Ok(slot_round != round || used < self.tiny_blocks_per_slot)
    }

    async fn produce(&mut self, planned: ConsensusCommand) -> NodeResult<Step> {
        let mut chain = self.chain.lock().await;

        // The window may have lapsed while we waited for the lock
        let now = self.clock.now();
        let command = chain.engine.next_action(&self.key, now)?;
        if command.behavior != planned.behavior || !command.is_open_at(now) {
            debug!(
                participant = %self.key,
                planned = %planned.behavior,
                now,
                "window lapsed, abandoning action"
            );
            return Ok(Step::Recheck);
        }

        let round = chain.engine.current_round()?.clone();
        let trigger = match command.behavior {
            Behavior::UpdateValue => self.keeper.trigger(&round, &mut self.rng)?,
            _ => TriggerInformation::default(),
        };
        let height = chain.height.saturating_add(1);
        let header = chain
            .engine
            .build_header(&self.key, command.behavior, &trigger, now, height)?;

        match chain.engine.validate_header(&header, now, HeaderOrigin::Local) {
            ValidationOutcome::Accept => {}
            ValidationOutcome::Retry(error) => {
                debug!(participant = %self.key, %error, "header needs rebuilding");
                return Ok(Step::SleepUntil(now.saturating_add(self.block_spacing_ms)));
            }
            ValidationOutcome::Reject(error) => {
                warn!(participant = %self.key, behavior = %command.behavior, %error, "own header rejected");
                return Ok(Step::SleepUntil(command.window_end));
            }
        }

        let effects = chain.apply(&header, now, height)?;
        drop(chain);

        self.tiny_in_slot = match command.behavior {
            Behavior::TinyBlock if self.tiny_in_slot.0 == round.round_number => {
                (round.round_number, self.tiny_in_slot.1 + 1)
            }
            Behavior::TinyBlock => (round.round_number, 1),
            _ => (round.round_number, 0),
        };
        if effects.round_advanced {
            info!(
                producer = %self.key,
                round = effects.round_number,
                term = effects.term_number,
                height,
                "round terminated"
            );
        }
        if let Some(events) = &self.events {
            let _ = events.send(ProducedBlock {
                height,
                block_time: now,
                effects,
            });
        }
        Ok(Step::Produced(now))
    }
}
