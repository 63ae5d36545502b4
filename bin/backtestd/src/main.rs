use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use api::AppState;
use collector::BinanceSource;
use common::Config;
use sandbox::Provisioner;
use stats::StatsConfig;

#[tokio::main]
async fn main() {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    info!(
        python = %cfg.python_bin,
        root = %cfg.sandbox_root.display(),
        "backtestd starting"
    );

    std::fs::create_dir_all(&cfg.sandbox_root).unwrap_or_else(|e| {
        panic!(
            "Failed to create sandbox root '{}': {e}",
            cfg.sandbox_root.display()
        )
    });

    // ── Shared state ──────────────────────────────────────────────────────────
    let state = AppState {
        provisioner: Arc::new(Provisioner::new(
            cfg.python_bin.clone(),
            cfg.sandbox_root.clone(),
        )),
        source: Arc::new(BinanceSource::new()),
        stats_defaults: StatsConfig {
            scale: cfg.stats_scale,
            risk_free_rate: cfg.stats_risk_free_rate,
            ..StatsConfig::default()
        },
        strategy_timeout: Duration::from_secs(cfg.strategy_timeout_secs),
    };

    api::serve(state, cfg.listen_port).await;
}
