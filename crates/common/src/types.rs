use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One closing price observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub close: f64,
}

/// One asset's chronologically ordered closing prices.
///
/// Invariants, checked on construction: timestamps strictly increasing,
/// closes non-negative and finite.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetSeries {
    points: Vec<PricePoint>,
}

impl AssetSeries {
    /// Build a series from observations already sorted by timestamp.
    /// `Err` carries the violated invariant; callers attach the asset id.
    pub fn from_points(points: Vec<PricePoint>) -> Result<Self, String> {
        for pair in points.windows(2) {
            if pair[1].timestamp <= pair[0].timestamp {
                return Err(format!(
                    "timestamps not strictly increasing at {}",
                    pair[1].timestamp
                ));
            }
        }
        for p in &points {
            if !p.close.is_finite() || p.close < 0.0 {
                return Err(format!("close {} at {} is not a non-negative finite number", p.close, p.timestamp));
            }
        }
        Ok(Self { points })
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn closes(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.close).collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Asset identifier → price series. Series are independently valid and are
/// not required to share a timestamp grid.
pub type MarketDataset = BTreeMap<String, AssetSeries>;

/// Per-period portfolio weights returned by a strategy: an ordered time
/// index with one numeric column per asset. The sandbox only guarantees the
/// tabular shape; weight normalization is the strategy author's problem.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightsTable {
    timestamps: Vec<DateTime<Utc>>,
    columns: BTreeMap<String, Vec<f64>>,
}

impl WeightsTable {
    /// `Err` carries the violated invariant (ragged column, unsorted index).
    pub fn new(
        timestamps: Vec<DateTime<Utc>>,
        columns: BTreeMap<String, Vec<f64>>,
    ) -> Result<Self, String> {
        for pair in timestamps.windows(2) {
            if pair[1] <= pair[0] {
                return Err(format!("time index not strictly increasing at {}", pair[1]));
            }
        }
        for (asset, col) in &columns {
            if col.len() != timestamps.len() {
                return Err(format!(
                    "column '{}' has {} rows, index has {}",
                    asset,
                    col.len(),
                    timestamps.len()
                ));
            }
        }
        Ok(Self { timestamps, columns })
    }

    pub fn n_periods(&self) -> usize {
        self.timestamps.len()
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    /// Weight column for one asset, aligned with `timestamps()`.
    pub fn column(&self, asset: &str) -> Option<&[f64]> {
        self.columns.get(asset).map(Vec::as_slice)
    }

    pub fn assets(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }
}

/// The eleven performance metrics, assembled once per request and never
/// mutated. Non-finite values serialize as the string sentinels "NaN",
/// "Infinity", "-Infinity"; everything else as a plain JSON number.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    #[serde(with = "json_num")]
    pub annualized_return: f64,
    #[serde(with = "json_num")]
    pub annualized_volatility: f64,
    #[serde(with = "json_num")]
    pub sharpe_ratio: f64,
    #[serde(with = "json_num")]
    pub skewness: f64,
    #[serde(with = "json_num")]
    pub kurtosis: f64,
    #[serde(with = "json_num")]
    pub semi_deviation: f64,
    #[serde(with = "json_num")]
    pub var_historic: f64,
    #[serde(with = "json_num")]
    pub max_drawdown: f64,
    #[serde(with = "json_num")]
    pub downside_volatility: f64,
    #[serde(with = "json_num")]
    pub sortino_ratio: f64,
    #[serde(with = "json_num")]
    pub calmar_ratio: f64,
}

/// JSON representation for metric scalars: finite values are numbers,
/// non-finite values are the string sentinels.
pub mod json_num {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
        if v.is_finite() {
            s.serialize_f64(*v)
        } else if v.is_nan() {
            s.serialize_str("NaN")
        } else if *v > 0.0 {
            s.serialize_str("Infinity")
        } else {
            s.serialize_str("-Infinity")
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Num(f64),
            Text(String),
        }
        match Raw::deserialize(d)? {
            Raw::Num(v) => Ok(v),
            Raw::Text(t) => match t.as_str() {
                "NaN" => Ok(f64::NAN),
                "Infinity" => Ok(f64::INFINITY),
                "-Infinity" => Ok(f64::NEG_INFINITY),
                other => Err(serde::de::Error::custom(format!(
                    "unrecognized numeric sentinel '{other}'"
                ))),
            },
        }
    }
}

/// Backtest request payload accepted by `POST /backtest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestRequest {
    /// Strategy source text defining `func_strat(dataset) -> weights`.
    pub func_strat: String,
    /// Bare package names installed into the environment, in order.
    pub requirements: Vec<String>,
    /// Symbols to fetch, e.g. "ETHBTC".
    pub tickers: Vec<String>,
    /// Two `YYYY-MM-DD` dates bounding the candle window.
    pub dates: Vec<String>,
    /// Candle interval, e.g. "1d".
    pub interval: String,
    /// Environment / request identifier. Generated when absent.
    #[serde(default)]
    pub request_id: Option<String>,
    /// Periods per year used for annualization; service default when absent.
    #[serde(default)]
    pub scale: Option<f64>,
    /// Annual risk-free rate; service default when absent.
    #[serde(default)]
    pub risk_free_rate: Option<f64>,
    /// Recurrence is acknowledged but scheduled by the deployment, not here.
    #[serde(default)]
    pub is_recurring: bool,
    #[serde(default)]
    pub repeat_frequency: Option<String>,
    #[serde(default)]
    pub nb_execution: Option<u32>,
}

impl BacktestRequest {
    pub fn validate(&self) -> crate::Result<()> {
        if self.func_strat.trim().is_empty() {
            return Err(crate::Error::Request("func_strat is empty".into()));
        }
        if self.tickers.is_empty() {
            return Err(crate::Error::Request("tickers is empty".into()));
        }
        if self.dates.len() != 2 {
            return Err(crate::Error::Request(format!(
                "dates must hold exactly two YYYY-MM-DD entries, got {}",
                self.dates.len()
            )));
        }
        if self.interval.trim().is_empty() {
            return Err(crate::Error::Request("interval is empty".into()));
        }
        for name in &self.requirements {
            // Bare package names only: anything starting with '-' would be
            // interpreted as a pip flag.
            if name.trim().is_empty() || name.starts_with('-') || name.chars().any(char::is_whitespace) {
                return Err(crate::Error::Request(format!(
                    "requirement '{name}' is not a bare package name"
                )));
            }
        }
        Ok(())
    }
}
