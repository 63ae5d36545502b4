//! Per-request dependency isolation: a disposable virtual environment per
//! backtest, a strictly ordered install step, and a single bounded strategy
//! invocation speaking a one-line stdout protocol.
//!
//! The subprocess boundary isolates *dependencies*, not the operating
//! system: strategy code runs with the daemon's own OS privileges.

pub mod driver;
pub mod env;

pub use driver::{StrategyUnit, ENTRY_POINT};
pub use env::{EnvState, Environment, Provisioner};

use std::time::Duration;

use common::{Result, WeightsTable};

/// Provision, install, run, and tear down for one request.
///
/// Teardown happens on every exit path: install failure, load/runtime
/// failure, contract violation, and timeout all release the environment
/// exactly once before the error propagates.
pub async fn execute(
    provisioner: &Provisioner,
    request_id: &str,
    unit: &StrategyUnit,
    dataset_blob: &str,
    limit: Duration,
) -> Result<WeightsTable> {
    let mut env = provisioner.create(request_id).await?;
    let outcome = run_stages(&mut env, unit, dataset_blob, limit).await;
    if outcome.is_err() {
        env.fail();
    }
    let removed = env.teardown().await;
    let weights = outcome?;
    removed?;
    Ok(weights)
}

async fn run_stages(
    env: &mut Environment,
    unit: &StrategyUnit,
    dataset_blob: &str,
    limit: Duration,
) -> Result<WeightsTable> {
    env.install(&unit.requirements).await?;
    driver::run(env, unit, dataset_blob, limit).await
}
