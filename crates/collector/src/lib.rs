//! Historical candle retrieval from the Binance public data API.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use common::{AssetSeries, Error, MarketDataset, PricePoint, Result};

const BASE_URL: &str = "https://data-api.binance.vision";

/// UTC-midnight millisecond bounds parsed from two `YYYY-MM-DD` dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl DateWindow {
    pub fn parse(dates: &[String]) -> Result<Self> {
        let [start, end] = dates else {
            return Err(Error::Request(format!(
                "expected two dates, got {}",
                dates.len()
            )));
        };
        let window = Self {
            start_ms: date_to_ms(start)?,
            end_ms: date_to_ms(end)?,
        };
        if window.end_ms <= window.start_ms {
            return Err(Error::Request(format!(
                "date window '{start}'..'{end}' is empty"
            )));
        }
        Ok(window)
    }
}

fn date_to_ms(date: &str) -> Result<i64> {
    let parsed = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|e| Error::Request(format!("date '{date}' is not YYYY-MM-DD: {e}")))?;
    Ok(parsed
        .and_hms_opt(0, 0, 0)
        .expect("midnight is a valid time")
        .and_utc()
        .timestamp_millis())
}

/// Abstraction over candle retrieval.
///
/// `BinanceSource` implements this against the public data API; tests drive
/// the request pipeline with a canned source instead.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn collect(
        &self,
        symbols: &[String],
        window: DateWindow,
        interval: &str,
    ) -> Result<MarketDataset>;
}

/// REST client for the unauthenticated Binance market-data host.
pub struct BinanceSource {
    http: Client,
}

impl BinanceSource {
    pub fn new() -> Self {
        Self {
            http: Client::builder()
                .use_rustls_tls()
                .build()
                .expect("Failed to build HTTP client"),
        }
    }
}

impl Default for BinanceSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceSource for BinanceSource {
    async fn collect(
        &self,
        symbols: &[String],
        window: DateWindow,
        interval: &str,
    ) -> Result<MarketDataset> {
        let url = format!("{BASE_URL}/api/v3/klines");
        let mut dataset = MarketDataset::new();
        for symbol in symbols {
            debug!(symbol = %symbol, interval = %interval, "fetching klines");
            let resp = self
                .http
                .get(&url)
                .query(&[("symbol", symbol.as_str()), ("interval", interval)])
                .query(&[("startTime", window.start_ms), ("endTime", window.end_ms)])
                .send()
                .await
                .map_err(|e| Error::Http(e.to_string()))?;

            let status = resp.status();
            let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
            if !status.is_success() {
                return Err(Error::Exchange(format!("HTTP {status} for {symbol}: {body}")));
            }

            let rows: Vec<Value> = serde_json::from_str(&body)
                .map_err(|e| Error::Exchange(format!("{symbol}: {e}")))?;
            let series = series_from_klines(&rows)
                .map_err(|detail| Error::Exchange(format!("{symbol}: {detail}")))?;
            dataset.insert(symbol.clone(), series);
        }
        Ok(dataset)
    }
}

/// Convert raw kline rows into a close-price series. Each row is a mixed
/// array: open time in milliseconds at index 0, close price as a decimal
/// string at index 4.
pub fn series_from_klines(rows: &[Value]) -> std::result::Result<AssetSeries, String> {
    let mut points = Vec::with_capacity(rows.len());
    for row in rows {
        let fields = row.as_array().ok_or("kline row is not an array")?;
        let open_time = fields
            .first()
            .and_then(Value::as_i64)
            .ok_or("kline open time missing")?;
        let close = fields
            .get(4)
            .and_then(Value::as_str)
            .ok_or("kline close price missing")?
            .parse::<f64>()
            .map_err(|e| format!("close price not numeric: {e}"))?;
        points.push(PricePoint {
            timestamp: DateTime::from_timestamp_millis(open_time)
                .ok_or_else(|| format!("open time {open_time}ms out of range"))?,
            close,
        });
    }
    AssetSeries::from_points(points)
}
