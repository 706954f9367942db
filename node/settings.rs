//! Node settings: a TOML file layered under `TENURE__*` environment variables.
//!
//! ```toml
//! [consensus]
//! mining_interval_ms = 4000
//!
//! [chain]
//! participants = ["02ab...", "03cd..."]
//! self_key = "02ab..."
//!
//! [logging]
//! filter = "info,tenure_consensus=debug"
//! ```
//!
//! `TENURE__CONSENSUS__MINING_INTERVAL_MS=1000` overrides the file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use tenure_consensus::{ConsensusConfig, PublicKey, Timestamp};

use crate::{NodeError, NodeResult};

/// Environment prefix for overrides; nested keys are separated by `__`.
pub const ENV_PREFIX: &str = "TENURE";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    pub consensus: ConsensusConfig,
    pub chain: ChainSettings,
    pub logging: LoggingSettings,
    pub simulation: SimulationSettings,
}

/// Who participates and as whom this node produces.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainSettings {
    /// Hex public keys of the first term; empty uses generated devnet keys
    pub participants: Vec<String>,
    /// Hex key this node produces as; unset produces for every participant
    pub self_key: Option<String>,
    /// Chain start in unix milliseconds; unset starts now
    pub chain_start_ms: Option<Timestamp>,
    /// Where `run` writes the round store on shutdown
    pub snapshot_path: Option<PathBuf>,
    /// Pause after each produced block
    pub block_spacing_ms: Option<u64>,
    /// Tiny blocks a producer emits per slot after its normal block
    pub tiny_blocks_per_slot: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

/// Parameters of the in-process simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    pub participants: u8,
    /// Rounds to complete before stopping
    pub rounds: u64,
    pub seed: u64,
    /// Chance that a participant sits out a round
    pub offline_probability: f64,
    pub tiny_blocks_per_slot: u32,
    /// Attach secret shares of every in-value
    pub share_secrets: bool,
    pub block_spacing_ms: Option<u64>,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            participants: 7,
            rounds: 20,
            seed: 7,
            offline_probability: 0.0,
            tiny_blocks_per_slot: 0,
            share_secrets: true,
            block_spacing_ms: None,
        }
    }
}

impl NodeSettings {
    /// Load defaults, then `path` if given, then environment overrides.
    pub fn load(path: Option<&Path>) -> NodeResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }
        let settings: Self = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_toml_str(s: &str) -> NodeResult<Self> {
        let settings: Self = toml::from_str(s)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_toml_string(&self) -> NodeResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> NodeResult<()> {
        self.consensus.validate()?;
        self.participant_keys()?;
        self.self_key()?;

        let p = self.simulation.offline_probability;
        if !(0.0..1.0).contains(&p) {
            return Err(NodeError::InvalidSettings(format!(
                "offline probability must be in [0, 1), got {p}"
            )));
        }
        if self.simulation.participants == 0 {
            return Err(NodeError::InvalidSettings(
                "simulation needs at least one participant".to_string(),
            ));
        }
        if self.chain.block_spacing_ms == Some(0) || self.simulation.block_spacing_ms == Some(0) {
            return Err(NodeError::InvalidSettings(
                "block spacing must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Configured first-term keys.
    pub fn participant_keys(&self) -> NodeResult<Vec<PublicKey>> {
        self.chain
            .participants
            .iter()
            .map(|k| PublicKey::from_hex(k).map_err(NodeError::from))
            .collect()
    }

    pub fn self_key(&self) -> NodeResult<Option<PublicKey>> {
        self.chain
            .self_key
            .as_deref()
            .map(PublicKey::from_hex)
            .transpose()
            .map_err(NodeError::from)
    }

    /// Spacing between blocks: configured, or an even split of one slot.
    pub fn block_spacing_ms(&self) -> u64 {
        self.chain
            .block_spacing_ms
            .unwrap_or_else(|| default_block_spacing(&self.consensus))
    }
}

pub(crate) fn default_block_spacing(config: &ConsensusConfig) -> u64 {
    (config.mining_interval_ms / (u64::from(config.max_tiny_blocks) + 1)).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let settings = NodeSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.block_spacing_ms(), 4_000 / 9);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings = NodeSettings::from_toml_str(
            r#"
            [consensus]
            mining_interval_ms = 1000

            [simulation]
            participants = 4
            "#,
        )
        .unwrap();
        assert_eq!(settings.consensus.mining_interval_ms, 1_000);
        assert_eq!(settings.consensus.max_tiny_blocks, 8);
        assert_eq!(settings.simulation.participants, 4);
        assert_eq!(settings.logging.filter, "info");
    }

    #[test]
    fn test_invalid_values_are_reported() {
        assert!(matches!(
            NodeSettings::from_toml_str("[simulation]\noffline_probability = 1.5"),
            Err(NodeError::InvalidSettings(_))
        ));
        assert!(matches!(
            NodeSettings::from_toml_str("[chain]\nparticipants = [\"zz\"]"),
            Err(NodeError::Consensus(_))
        ));
        assert!(matches!(
            NodeSettings::from_toml_str("[consensus]\nmining_interval_ms = 0"),
            Err(NodeError::Consensus(_))
        ));
        assert!(matches!(
            NodeSettings::from_toml_str("[consensus\n"),
            Err(NodeError::SettingsParse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[chain]\nparticipants = [\"{}\"]\nself_key = \"{}\"\ntiny_blocks_per_slot = 2",
            "02".repeat(33),
            "02".repeat(33)
        )
        .unwrap();
        let settings = NodeSettings::load(Some(file.path())).unwrap();
        assert_eq!(settings.participant_keys().unwrap().len(), 1);
        assert_eq!(settings.self_key().unwrap(), Some(PublicKey::new(vec![2; 33])));
        assert_eq!(settings.chain.tiny_blocks_per_slot, 2);
    }

    #[test]
    fn test_rendered_settings_parse_back() {
        let settings = NodeSettings::default();
        let rendered = settings.to_toml_string().unwrap();
        assert_eq!(NodeSettings::from_toml_str(&rendered).unwrap(), settings);
    }
}
