//! Full sandbox round trip against a real interpreter. Run explicitly with
//! `cargo test -- --ignored` on a machine with python3 and network access
//! (the environment pip-installs pandas).
#![cfg(unix)]

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::DateTime;

use common::{AssetSeries, MarketDataset, PricePoint};
use sandbox::{Provisioner, StrategyUnit};

const EQUAL_WEIGHTS_STRATEGY: &str = r#"
import pandas as pd

def func_strat(data):
    frames = {key: df["Close"] for key, df in data.items()}
    closes = pd.DataFrame(frames)
    weights = closes.copy()
    weights[:] = 1.0 / len(data)
    return weights
"#;

fn dataset() -> MarketDataset {
    let closes_a = [100.0, 110.0, 121.0];
    let closes_b = [200.0, 190.0, 209.0];
    let series = |closes: &[f64]| {
        AssetSeries::from_points(
            closes
                .iter()
                .enumerate()
                .map(|(i, &close)| PricePoint {
                    timestamp: DateTime::from_timestamp_millis(i as i64 * 86_400_000).unwrap(),
                    close,
                })
                .collect(),
        )
        .unwrap()
    };
    let mut d = BTreeMap::new();
    d.insert("AAA".to_string(), series(&closes_a));
    d.insert("BBB".to_string(), series(&closes_b));
    d
}

#[tokio::test]
#[ignore = "requires python3 and network access for pip"]
async fn equal_weight_strategy_round_trips() {
    let root = tempfile::tempdir().unwrap();
    let prov = Provisioner::new("python3", root.path());
    let unit = StrategyUnit {
        source: EQUAL_WEIGHTS_STRATEGY.into(),
        requirements: vec!["pandas".into()],
    };

    let dataset = dataset();
    let blob = codec::encode_dataset(&dataset).unwrap();
    let weights = sandbox::execute(&prov, "e2e-1", &unit, &blob, Duration::from_secs(600))
        .await
        .unwrap();

    assert_eq!(weights.n_periods(), 3);
    for asset in ["AAA", "BBB"] {
        let col = weights.column(asset).unwrap();
        assert!(col.iter().all(|w| (w - 0.5).abs() < 1e-12));
    }
    assert_eq!(prov.active_count(), 0);
    assert!(!root.path().join("e2e-1").exists());
}
