//! Logging setup for the node binary.

use tracing_subscriber::EnvFilter;

use crate::{NodeError, NodeResult};

/// Install the global fmt subscriber. `RUST_LOG` wins over `filter`.
pub fn init_tracing(filter: &str) -> NodeResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .map_err(|e| NodeError::Telemetry(e.to_string()))?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|e| NodeError::Telemetry(e.to_string()))
}
