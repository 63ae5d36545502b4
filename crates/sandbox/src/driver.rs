use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::{info, warn};

use common::{Error, Result, WeightsTable};

use crate::env::Environment;

/// Entry point every strategy must expose: a fixed protocol constant, not a
/// convention.
pub const ENTRY_POINT: &str = "func_strat";

/// Harness executed inside the environment; written next to the strategy
/// artifacts for each request.
const HARNESS_SOURCE: &str = include_str!("harness.py");

const DATA_FILE: &str = "user_data.json";
const STRATEGY_FILE: &str = "user_function.py";
const HARNESS_FILE: &str = "harness.py";

// Exit codes agreed with harness.py.
const EXIT_LOAD: i32 = 10;
const EXIT_RUNTIME: i32 = 11;
const EXIT_CONTRACT: i32 = 12;

/// User-authored strategy: source text plus its dependency declaration.
#[derive(Debug, Clone)]
pub struct StrategyUnit {
    pub source: String,
    pub requirements: Vec<String>,
}

/// Invoke the strategy once inside its provisioned environment and decode
/// the weight table it prints.
///
/// The harness receives the dataset path and the strategy path as its two
/// positional arguments and may write exactly one line to stdout. Each
/// failure mode arrives as a distinct exit code carrying the child's stderr.
pub async fn run(
    env: &mut Environment,
    unit: &StrategyUnit,
    dataset_blob: &str,
    limit: Duration,
) -> Result<WeightsTable> {
    let data_path = env.dir().join(DATA_FILE);
    let strategy_path = env.dir().join(STRATEGY_FILE);
    let harness_path = env.dir().join(HARNESS_FILE);
    tokio::fs::write(&data_path, dataset_blob).await?;
    tokio::fs::write(&strategy_path, &unit.source).await?;
    tokio::fs::write(&harness_path, HARNESS_SOURCE).await?;

    env.begin_run()?;
    info!(environment = %env.id(), "invoking strategy");

    let child = Command::new(env.python_path())
        .arg(&harness_path)
        .arg(&data_path)
        .arg(&strategy_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let output = match timeout(limit, child.wait_with_output()).await {
        Ok(done) => done?,
        // Dropping the timed-out future kills the child.
        Err(_) => {
            return Err(Error::Timeout {
                limit_secs: limit.as_secs(),
            })
        }
    };

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if !output.status.success() {
        return Err(classify_failure(output.status.code(), stderr));
    }
    if !stderr.is_empty() {
        warn!(environment = %env.id(), "strategy wrote to stderr: {stderr}");
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = extract_result_line(&stdout)?;
    codec::decode_weights(line)
}

/// The runner's only sanctioned stdout content is the single result line.
fn extract_result_line(stdout: &str) -> Result<&str> {
    let mut lines = stdout.lines().filter(|l| !l.trim().is_empty());
    let Some(first) = lines.next() else {
        return Err(Error::ContractViolation(
            "runner produced no result line on stdout".into(),
        ));
    };
    if lines.next().is_some() {
        return Err(Error::ContractViolation(
            "runner produced more than one line on stdout".into(),
        ));
    }
    Ok(first)
}

fn classify_failure(code: Option<i32>, stderr: String) -> Error {
    match code {
        Some(EXIT_LOAD) => Error::Load(stderr),
        Some(EXIT_RUNTIME) => Error::Runtime(stderr),
        Some(EXIT_CONTRACT) => Error::ContractViolation(stderr),
        Some(other) => Error::Runtime(format!("runner exited with status {other}: {stderr}")),
        None => Error::Runtime(format!("runner terminated by signal: {stderr}")),
    }
}
