use std::path::PathBuf;

/// All configuration loaded from environment variables at startup.
/// Every field has a usable default so a bare `backtestd` starts locally.
#[derive(Debug, Clone)]
pub struct Config {
    /// Interpreter used to seed per-request virtual environments.
    pub python_bin: String,
    /// Parent directory under which environments are created and destroyed.
    pub sandbox_root: PathBuf,
    /// Wall-clock budget for one strategy invocation, in seconds.
    pub strategy_timeout_secs: u64,
    /// HTTP listen port.
    pub listen_port: u16,
    /// Default annualization factor (periods per year).
    pub stats_scale: f64,
    /// Default annual risk-free rate.
    pub stats_risk_free_rate: f64,
}

impl Config {
    /// Load configuration from environment variables, reading `.env` first
    /// when present.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        Config {
            python_bin: optional_env("PYTHON_BIN").unwrap_or_else(|| "python3".to_string()),
            sandbox_root: optional_env("SANDBOX_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("backtestd")),
            strategy_timeout_secs: optional_env("STRATEGY_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
            listen_port: optional_env("LISTEN_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            stats_scale: optional_env("STATS_SCALE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(252.0),
            stats_risk_free_rate: optional_env("STATS_RISK_FREE_RATE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.02),
        }
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}
