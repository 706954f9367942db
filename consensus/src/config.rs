//! Consensus parameters and the participant-count growth schedule.

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;
use crate::{TenureError, TenureResult};

/// Consensus configuration surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Length of one production slot in milliseconds
    pub mining_interval_ms: u64,

    /// Ceiling on blocks (normal + tiny) per participant per slot
    pub max_tiny_blocks: u32,

    /// Length of one term in seconds
    pub term_period_seconds: u64,

    /// Participant count at chain start
    pub initial_participants_count: u32,

    /// Hard cap on the participant count
    pub max_participants_count: u32,

    /// Growth step period in seconds, 0 disables growth
    pub participant_increase_interval_seconds: u64,

    /// Participants added per growth step
    pub participant_increment: u32,

    /// Rounds of history retained by the store
    pub keep_rounds: u64,

    /// Consecutive blocks one producer may emit before others must follow
    pub max_continuous_blocks: u32,

    /// Rounds at the start of the chain treated as bootstrap
    pub bootstrap_rounds: u64,
}

impl ConsensusConfig {
    pub fn new() -> Self {
        Self {
            mining_interval_ms: 4_000,
            max_tiny_blocks: 8,
            term_period_seconds: 604_800,
            initial_participants_count: 17,
            max_participants_count: 101,
            participant_increase_interval_seconds: 31_536_000,
            participant_increment: 2,
            keep_rounds: 40_960,
            max_continuous_blocks: 16,
            bootstrap_rounds: 1,
        }
    }

    pub fn with_mining_interval(mut self, interval_ms: u64) -> Self {
        self.mining_interval_ms = interval_ms;
        self
    }

    pub fn with_max_tiny_blocks(mut self, count: u32) -> Self {
        self.max_tiny_blocks = count;
        self
    }

    pub fn with_term_period(mut self, seconds: u64) -> Self {
        self.term_period_seconds = seconds;
        self
    }

    /// Set growth parameters: initial count, cap, step interval and increment
    pub fn with_participant_growth(
        mut self,
        initial: u32,
        max: u32,
        interval_seconds: u64,
        increment: u32,
    ) -> Self {
        self.initial_participants_count = initial;
        self.max_participants_count = max;
        self.participant_increase_interval_seconds = interval_seconds;
        self.participant_increment = increment;
        self
    }

    pub fn with_keep_rounds(mut self, rounds: u64) -> Self {
        self.keep_rounds = rounds;
        self
    }

    pub fn with_max_continuous_blocks(mut self, count: u32) -> Self {
        self.max_continuous_blocks = count;
        self
    }

    /// Parse a TOML document; missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> TenureResult<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| TenureError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> TenureResult<()> {
        if self.mining_interval_ms == 0 {
            return Err(TenureError::InvalidConfig(
                "mining interval must be positive".to_string(),
            ));
        }

        if self.max_tiny_blocks == 0 {
            return Err(TenureError::InvalidConfig(
                "max tiny blocks must be at least 1".to_string(),
            ));
        }

        if self.term_period_seconds == 0 {
            return Err(TenureError::InvalidConfig(
                "term period must be positive".to_string(),
            ));
        }

        if self.initial_participants_count == 0 {
            return Err(TenureError::InvalidConfig(
                "initial participant count must be positive".to_string(),
            ));
        }

        if self.max_participants_count < self.initial_participants_count {
            return Err(TenureError::InvalidConfig(
                "participant cap must not be below the initial count".to_string(),
            ));
        }

        if self.keep_rounds < 2 {
            return Err(TenureError::InvalidConfig(
                "at least two rounds of history are required".to_string(),
            ));
        }

        // The last slot of one round and the first of the next may share a producer
        if self.max_continuous_blocks < self.max_tiny_blocks {
            return Err(TenureError::InvalidConfig(
                "max continuous blocks must not be below max tiny blocks".to_string(),
            ));
        }

        // Every slot layout of a round must fit in u64 milliseconds
        self.mining_interval_ms
            .checked_mul(u64::from(self.max_participants_count) + 1)
            .ok_or_else(|| {
                TenureError::InvalidConfig("round length overflows u64 milliseconds".to_string())
            })?;

        Ok(())
    }

    /// Term period in milliseconds.
    pub fn term_period_ms(&self) -> TenureResult<u64> {
        self.term_period_seconds
            .checked_mul(1_000)
            .ok_or_else(|| TenureError::ArithmeticOverflow("term period".to_string()))
    }
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Participant-count growth over wall-clock time.
///
/// The count grows by `increment` every `interval` starting from an anchor.
/// Changing the interval re-anchors at the count reached so far, so a shorter
/// interval only speeds up future growth and never back-dates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantCountSchedule {
    anchor_time: Timestamp,
    anchor_count: u32,
    interval_seconds: u64,
    increment: u32,
    max_count: u32,
}

impl ParticipantCountSchedule {
    pub fn new(config: &ConsensusConfig, chain_start: Timestamp) -> Self {
        Self {
            anchor_time: chain_start,
            anchor_count: config.initial_participants_count,
            interval_seconds: config.participant_increase_interval_seconds,
            increment: config.participant_increment,
            max_count: config.max_participants_count,
        }
    }

    /// Allowed participant count at `now`.
    pub fn count_at(&self, now: Timestamp) -> u32 {
        if self.interval_seconds == 0 || now <= self.anchor_time {
            return self.anchor_count.min(self.max_count);
        }
        let elapsed_seconds = (now - self.anchor_time) / 1_000;
        let steps = elapsed_seconds / self.interval_seconds;
        let grown = steps
            .saturating_mul(u64::from(self.increment))
            .saturating_add(u64::from(self.anchor_count));
        u32::try_from(grown.min(u64::from(self.max_count))).unwrap_or(self.max_count)
    }

    /// Replace the growth interval at `now`.
    pub fn set_increase_interval(&mut self, now: Timestamp, interval_seconds: u64) -> TenureResult<()> {
        if now < self.anchor_time {
            return Err(TenureError::RegressionError(format!(
                "schedule change at {now} precedes anchor {}",
                self.anchor_time
            )));
        }
        self.anchor_count = self.count_at(now);
        self.anchor_time = now;
        self.interval_seconds = interval_seconds;
        Ok(())
    }

    pub fn interval_seconds(&self) -> u64 {
        self.interval_seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY_MS: u64 = 86_400_000;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ConsensusConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let invalid = ConsensusConfig {
            mining_interval_ms: 0,
            ..Default::default()
        };
        assert!(invalid.validate().is_err());

        let invalid = ConsensusConfig::default().with_participant_growth(10, 5, 0, 0);
        assert!(invalid.validate().is_err());

        let invalid = ConsensusConfig::default()
            .with_max_tiny_blocks(8)
            .with_max_continuous_blocks(4);
        assert!(invalid.validate().is_err());

        let invalid = ConsensusConfig {
            mining_interval_ms: u64::MAX / 2,
            ..Default::default()
        };
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_from_toml_uses_defaults_for_missing_keys() {
        let config = ConsensusConfig::from_toml_str("mining_interval_ms = 500\nmax_tiny_blocks = 4\n")
            .unwrap();
        assert_eq!(config.mining_interval_ms, 500);
        assert_eq!(config.max_tiny_blocks, 4);
        assert_eq!(config.keep_rounds, ConsensusConfig::default().keep_rounds);

        assert!(ConsensusConfig::from_toml_str("mining_interval_ms = 0").is_err());
        assert!(ConsensusConfig::from_toml_str("mining_interval_ms = \"x\"").is_err());
    }

    #[test]
    fn test_schedule_growth_is_capped() {
        let config = ConsensusConfig::default().with_participant_growth(5, 9, 86_400, 2);
        let schedule = ParticipantCountSchedule::new(&config, 0);
        assert_eq!(schedule.count_at(0), 5);
        assert_eq!(schedule.count_at(DAY_MS - 1), 5);
        assert_eq!(schedule.count_at(DAY_MS), 7);
        assert_eq!(schedule.count_at(2 * DAY_MS), 9);
        assert_eq!(schedule.count_at(100 * DAY_MS), 9);
    }

    #[test]
    fn test_shrinking_interval_does_not_backdate_growth() {
        let config = ConsensusConfig::default().with_participant_growth(5, 50, 10 * 86_400, 2);
        let mut schedule = ParticipantCountSchedule::new(&config, 0);
        let now = 9 * DAY_MS;
        assert_eq!(schedule.count_at(now), 5);

        // With a naive formula a one-day interval would jump straight to 5 + 9 * 2
        schedule.set_increase_interval(now, 86_400).unwrap();
        assert_eq!(schedule.count_at(now), 5);
        assert_eq!(schedule.count_at(now + DAY_MS), 7);
        assert!(schedule.set_increase_interval(now - 1, 86_400).is_err());
    }
}
