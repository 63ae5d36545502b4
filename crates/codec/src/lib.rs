//! Transport encoding between the parent process and the isolated runner.
//!
//! Wire layout for a dataset: a JSON object keyed by asset id whose values
//! are JSON-encoded *strings*, each holding a row-oriented table
//! `{"<epoch_millis>": {"Close": <price>}}`. The nested string encoding is
//! part of the wire format, not an accident. Weight tables travel back as a
//! single document `{"<epoch_millis>": {"<asset>": <weight>}}` on the
//! runner's stdout.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use common::{AssetSeries, Error, MarketDataset, PricePoint, Result, WeightsTable};

/// Field every dataset row must carry. Rows may hold more columns; only
/// this one is read back.
pub const CLOSE_FIELD: &str = "Close";

/// Encode a dataset into the transport blob handed to the isolated runner.
pub fn encode_dataset(dataset: &MarketDataset) -> Result<String> {
    let mut outer = serde_json::Map::new();
    for (asset, series) in dataset {
        let mut rows = serde_json::Map::new();
        for p in series.points() {
            rows.insert(
                p.timestamp.timestamp_millis().to_string(),
                json!({ CLOSE_FIELD: p.close }),
            );
        }
        let inner = serde_json::to_string(&Value::Object(rows))?;
        outer.insert(asset.clone(), Value::String(inner));
    }
    Ok(serde_json::to_string(&Value::Object(outer))?)
}

#[derive(Deserialize)]
struct DatasetRow {
    #[serde(rename = "Close")]
    close: f64,
}

/// Decode a transport blob back into a dataset.
///
/// Rows are re-sorted chronologically (JSON objects carry no order) and the
/// `AssetSeries` invariants are enforced; any violation names the offending
/// asset key.
pub fn decode_dataset(blob: &str) -> Result<MarketDataset> {
    let outer: BTreeMap<String, Value> = serde_json::from_str(blob).map_err(|e| Error::Decode {
        asset: "<document>".into(),
        detail: e.to_string(),
    })?;

    let mut dataset = MarketDataset::new();
    for (asset, value) in outer {
        let inner = value.as_str().ok_or_else(|| Error::Decode {
            asset: asset.clone(),
            detail: "series payload is not a JSON-encoded string".into(),
        })?;
        let rows: BTreeMap<String, DatasetRow> =
            serde_json::from_str(inner).map_err(|e| Error::Decode {
                asset: asset.clone(),
                detail: e.to_string(),
            })?;

        let mut points = Vec::with_capacity(rows.len());
        for (key, row) in rows {
            points.push(PricePoint {
                timestamp: parse_millis(&key).map_err(|detail| Error::Decode {
                    asset: asset.clone(),
                    detail,
                })?,
                close: row.close,
            });
        }
        points.sort_by_key(|p| p.timestamp);

        let series = AssetSeries::from_points(points).map_err(|detail| Error::Decode {
            asset: asset.clone(),
            detail,
        })?;
        dataset.insert(asset, series);
    }
    Ok(dataset)
}

/// Decode the single-line weight document printed by the isolated runner.
/// Any shape problem is a contract violation, never a silent coercion.
pub fn decode_weights(doc: &str) -> Result<WeightsTable> {
    let rows: BTreeMap<String, BTreeMap<String, Option<f64>>> = serde_json::from_str(doc)
        .map_err(|e| {
            Error::ContractViolation(format!("weights are not a tabular JSON document: {e}"))
        })?;

    let mut indexed: Vec<(DateTime<Utc>, BTreeMap<String, Option<f64>>)> =
        Vec::with_capacity(rows.len());
    for (key, row) in rows {
        let ts = parse_millis(&key).map_err(Error::ContractViolation)?;
        indexed.push((ts, row));
    }
    indexed.sort_by_key(|(ts, _)| *ts);

    let assets: Vec<String> = indexed
        .first()
        .map(|(_, row)| row.keys().cloned().collect())
        .unwrap_or_default();

    let mut timestamps = Vec::with_capacity(indexed.len());
    let mut columns: BTreeMap<String, Vec<f64>> =
        assets.iter().map(|a| (a.clone(), Vec::new())).collect();

    for (ts, row) in indexed {
        if row.len() != assets.len() || !assets.iter().all(|a| row.contains_key(a)) {
            return Err(Error::ContractViolation(format!(
                "row at {ts} does not carry the same asset columns as the first row"
            )));
        }
        for (asset, weight) in row {
            let w = weight.ok_or_else(|| {
                Error::ContractViolation(format!("null weight for '{asset}' at {ts}"))
            })?;
            if !w.is_finite() {
                return Err(Error::ContractViolation(format!(
                    "non-finite weight for '{asset}' at {ts}"
                )));
            }
            columns.get_mut(&asset).expect("column pre-seeded").push(w);
        }
        timestamps.push(ts);
    }

    WeightsTable::new(timestamps, columns).map_err(Error::ContractViolation)
}

fn parse_millis(key: &str) -> std::result::Result<DateTime<Utc>, String> {
    let ms: i64 = key
        .parse()
        .map_err(|_| format!("index key '{key}' is not an epoch-millisecond timestamp"))?;
    DateTime::from_timestamp_millis(ms).ok_or_else(|| format!("timestamp {ms}ms out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(ms: i64, close: f64) -> PricePoint {
        PricePoint {
            timestamp: DateTime::from_timestamp_millis(ms).unwrap(),
            close,
        }
    }

    fn sample_dataset() -> MarketDataset {
        let mut d = MarketDataset::new();
        d.insert(
            "ETHBTC".into(),
            AssetSeries::from_points(vec![
                point(1_672_531_200_000, 0.0721),
                point(1_672_617_600_000, 0.0735),
                point(1_672_704_000_000, 0.0728),
            ])
            .unwrap(),
        );
        d.insert(
            "BNBETH".into(),
            AssetSeries::from_points(vec![
                point(1_672_531_200_000, 0.205),
                point(1_672_617_600_000, 0.199),
            ])
            .unwrap(),
        );
        d
    }

    #[test]
    fn dataset_round_trips_losslessly() {
        let dataset = sample_dataset();
        let blob = encode_dataset(&dataset).unwrap();
        assert_eq!(decode_dataset(&blob).unwrap(), dataset);
    }

    #[test]
    fn encoded_series_are_nested_json_strings() {
        let blob = encode_dataset(&sample_dataset()).unwrap();
        let outer: serde_json::Value = serde_json::from_str(&blob).unwrap();
        assert!(outer["ETHBTC"].is_string());
    }

    #[test]
    fn decode_reorders_rows_chronologically() {
        // String-sorted keys would put "1000" before "999".
        let blob = r#"{"A": "{\"1000\": {\"Close\": 2.0}, \"999\": {\"Close\": 1.0}}"}"#;
        let dataset = decode_dataset(blob).unwrap();
        assert_eq!(dataset["A"].closes(), vec![1.0, 2.0]);
    }

    #[test]
    fn decode_tolerates_extra_row_fields() {
        let blob = r#"{"A": "{\"1000\": {\"Close\": 2.0, \"Volume\": 10.0}}"}"#;
        let dataset = decode_dataset(blob).unwrap();
        assert_eq!(dataset["A"].closes(), vec![2.0]);
    }

    #[test]
    fn decode_names_asset_on_malformed_series() {
        let blob = r#"{"GOOD": "{\"1000\": {\"Close\": 1.0}}", "BAD": "not json"}"#;
        match decode_dataset(blob) {
            Err(Error::Decode { asset, .. }) => assert_eq!(asset, "BAD"),
            other => panic!("expected Decode error, got {other:?}"),
        }
    }

    #[test]
    fn decode_names_asset_on_missing_close_field() {
        let blob = r#"{"A": "{\"1000\": {\"Open\": 1.0}}"}"#;
        match decode_dataset(blob) {
            Err(Error::Decode { asset, .. }) => assert_eq!(asset, "A"),
            other => panic!("expected Decode error, got {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_negative_close() {
        let blob = r#"{"A": "{\"1000\": {\"Close\": -1.0}}"}"#;
        assert!(matches!(decode_dataset(blob), Err(Error::Decode { .. })));
    }

    #[test]
    fn decode_rejects_non_string_series_payload() {
        let blob = r#"{"A": {"1000": {"Close": 1.0}}}"#;
        match decode_dataset(blob) {
            Err(Error::Decode { asset, .. }) => assert_eq!(asset, "A"),
            other => panic!("expected Decode error, got {other:?}"),
        }
    }

    #[test]
    fn weights_decode_into_ordered_columns() {
        let doc = r#"{"2000": {"A": 0.4, "B": 0.6}, "1000": {"A": 0.5, "B": 0.5}}"#;
        let table = decode_weights(doc).unwrap();
        assert_eq!(table.n_periods(), 2);
        assert_eq!(table.column("A").unwrap(), &[0.5, 0.4]);
        assert_eq!(table.column("B").unwrap(), &[0.5, 0.6]);
    }

    #[test]
    fn weights_reject_scalar_document() {
        assert!(matches!(
            decode_weights("0.5"),
            Err(Error::ContractViolation(_))
        ));
    }

    #[test]
    fn weights_reject_ragged_rows() {
        let doc = r#"{"1000": {"A": 0.5, "B": 0.5}, "2000": {"A": 1.0}}"#;
        assert!(matches!(
            decode_weights(doc),
            Err(Error::ContractViolation(_))
        ));
    }

    #[test]
    fn weights_reject_null_entries() {
        let doc = r#"{"1000": {"A": null}}"#;
        assert!(matches!(
            decode_weights(doc),
            Err(Error::ContractViolation(_))
        ));
    }
}
