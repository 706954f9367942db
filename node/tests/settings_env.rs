//! Environment overrides live in their own test binary so no other test
//! observes the process environment changing.

use tenure_node::settings::ENV_PREFIX;
use tenure_node::NodeSettings;

#[test]
fn test_environment_overrides_file() {
    let file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    std::fs::write(
        file.path(),
        "[consensus]\nmining_interval_ms = 2000\n\n[simulation]\nrounds = 5\n",
    )
    .unwrap();

    std::env::set_var(format!("{ENV_PREFIX}__CONSENSUS__MINING_INTERVAL_MS"), "750");
    std::env::set_var(format!("{ENV_PREFIX}__LOGGING__FILTER"), "debug");
    let settings = NodeSettings::load(Some(file.path())).unwrap();
    std::env::remove_var(format!("{ENV_PREFIX}__CONSENSUS__MINING_INTERVAL_MS"));
    std::env::remove_var(format!("{ENV_PREFIX}__LOGGING__FILTER"));

    assert_eq!(settings.consensus.mining_interval_ms, 750);
    assert_eq!(settings.simulation.rounds, 5);
    assert_eq!(settings.logging.filter, "debug");
}
