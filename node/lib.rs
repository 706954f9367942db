//! # Tenure Node
//!
//! Host side of the tenure consensus core: loads settings, initialises
//! logging, keeps a participant's in-values and drives block production
//! against a [`ConsensusEngine`](tenure_consensus::ConsensusEngine).
//!
//! ## Components
//!
//! - **Settings**: TOML file plus `TENURE__*` environment overrides ([`settings`])
//! - **Clock**: wall clock, tokio clock and manual clock ([`clock`])
//! - **InValueKeeper**: per-participant in-values and secret shares ([`commitments`])
//! - **ProducerLoop**: waits on the scheduler window and submits local headers ([`producer`])
//! - **Simulation**: N participants against one engine on a manual clock ([`simulation`])

use thiserror::Error;

use tenure_consensus::{TenureError, Timestamp};

pub mod clock;
pub mod commitments;
pub mod producer;
pub mod settings;
pub mod simulation;
pub mod telemetry;

pub use clock::{Clock, ManualClock, SystemClock, TokioClock};
pub use commitments::InValueKeeper;
pub use producer::{LocalChain, ProducedBlock, ProducerLoop};
pub use settings::{ChainSettings, LoggingSettings, NodeSettings, SimulationSettings};
pub use simulation::{RoundSummary, Simulation, SimulationReport};

/// Errors raised by the host.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("consensus error: {0}")]
    Consensus(#[from] TenureError),

    #[error("settings error: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("settings parse error: {0}")]
    SettingsParse(#[from] toml::de::Error),

    #[error("settings render error: {0}")]
    SettingsRender(#[from] toml::ser::Error),

    #[error("report error: {0}")]
    Report(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("logging already initialised: {0}")]
    Telemetry(String),

    /// Nobody can act at any future time
    #[error("simulation stalled at {0}")]
    Stalled(Timestamp),

    #[error("producer task failed: {0}")]
    Task(String),
}

/// Result type for host operations
pub type NodeResult<T> = Result<T, NodeError>;
