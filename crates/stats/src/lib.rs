//! Performance statistics over a weight series and its price data.
//!
//! `evaluate` is a pure function: identical inputs always produce an
//! identical report. Degenerate inputs (zero variance, empty downside,
//! zero drawdown) surface as non-finite metric values, never as panics.

use serde::{Deserialize, Serialize};
use tracing::debug;

use common::{Error, MarketDataset, PerformanceReport, Result, WeightsTable};

/// Evaluation parameters. Defaults assume daily candles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Number of return periods per year.
    pub scale: f64,
    /// Annual risk-free rate.
    pub risk_free_rate: f64,
    /// Percentile level for historical VaR.
    pub var_level: f64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            scale: 252.0,
            risk_free_rate: 0.02,
            var_level: 5.0,
        }
    }
}

/// Collapse per-asset returns and weights into one scalar return per period.
///
/// Alignment is positional: row `t` of each weight column is applied to
/// period `t` of that asset's return series, so every asset series must have
/// exactly as many periods as the weight table. Columns are matched by asset
/// id; weight columns with no corresponding asset are ignored. The first
/// period's return is 0 (no prior observation), and a 0/0 price ratio is
/// treated as a 0 return.
pub fn composite_returns(weights: &WeightsTable, dataset: &MarketDataset) -> Result<Vec<f64>> {
    let n = weights.n_periods();
    if n == 0 {
        return Err(Error::Statistics("weight table has no periods".into()));
    }
    if dataset.is_empty() {
        return Err(Error::Statistics("dataset has no assets".into()));
    }

    let mut composite = vec![0.0; n];
    for (asset, series) in dataset {
        let col = weights.column(asset).ok_or_else(|| {
            Error::Statistics(format!("weights carry no column for asset '{asset}'"))
        })?;
        if series.len() != n {
            return Err(Error::Statistics(format!(
                "asset '{asset}' has {} periods but the weight table has {n}; \
                 positional alignment requires equal counts",
                series.len()
            )));
        }
        let closes = series.closes();
        for t in 1..n {
            let raw = closes[t] / closes[t - 1] - 1.0;
            let r = if raw.is_nan() { 0.0 } else { raw };
            composite[t] += r * col[t];
        }
    }
    Ok(composite)
}

/// Compute the full performance report for a weight series against its
/// price data.
pub fn evaluate(
    weights: &WeightsTable,
    dataset: &MarketDataset,
    cfg: &StatsConfig,
) -> Result<PerformanceReport> {
    let r = composite_returns(weights, dataset)?;
    debug!(
        periods = r.len(),
        assets = dataset.len(),
        "computing performance report"
    );

    let scale = cfg.scale;
    let rf = cfg.risk_free_rate;
    let n = r.len() as f64;

    let annualized_return = annualize_returns(&r, scale);
    let annualized_volatility = sample_std(&r) * scale.sqrt();

    let rf_per_period = (1.0 + rf).powf(1.0 / scale) - 1.0;
    let excess: Vec<f64> = r.iter().map(|x| x - rf_per_period).collect();
    let annualized_excess = annualize_returns(&excess, scale);
    let sharpe_ratio = annualized_excess / annualized_volatility;

    // Third and fourth standardized moments use the population standard
    // deviation, unlike the volatility above which is sample-based.
    let m = mean(&r);
    let pop_std = population_std(&r);
    let skewness = r.iter().map(|x| (x - m).powi(3)).sum::<f64>() / n / pop_std.powi(3);
    let kurtosis = r.iter().map(|x| (x - m).powi(4)).sum::<f64>() / n / pop_std.powi(4);

    let negatives: Vec<f64> = r.iter().copied().filter(|x| *x < 0.0).collect();
    let semi_deviation = population_std(&negatives);

    let var_historic = historic_var(&r, cfg.var_level);
    let max_drawdown = max_drawdown(&r);

    // Downside deviation measures against the annual rate, not the
    // per-period one, and averages over every period.
    let downside_volatility =
        (r.iter().map(|x| (x - rf).min(0.0).powi(2)).sum::<f64>() / n).sqrt();
    let sortino_ratio = annualized_excess / downside_volatility;
    let calmar_ratio = annualized_return / -max_drawdown;

    Ok(PerformanceReport {
        annualized_return,
        annualized_volatility,
        sharpe_ratio,
        skewness,
        kurtosis,
        semi_deviation,
        var_historic,
        max_drawdown,
        downside_volatility,
        sortino_ratio,
        calmar_ratio,
    })
}

/// Compound a per-period return series up to an annual rate.
pub fn annualize_returns(returns: &[f64], scale: f64) -> f64 {
    let growth: f64 = returns.iter().map(|r| 1.0 + r).product();
    growth.powf(scale / returns.len() as f64) - 1.0
}

/// Sample standard deviation (ddof = 1). NaN below two observations.
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    (ss / (values.len() - 1) as f64).sqrt()
}

/// Population standard deviation (ddof = 0). NaN on an empty slice.
pub fn population_std(values: &[f64]) -> f64 {
    let m = mean(values);
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    (ss / values.len() as f64).sqrt()
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Historical value-at-risk: the `level`-th linear-interpolation percentile
/// of the return distribution.
pub fn historic_var(returns: &[f64], level: f64) -> f64 {
    if returns.is_empty() {
        return f64::NAN;
    }
    let mut sorted = returns.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pos = (sorted.len() - 1) as f64 * level / 100.0;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    sorted[lo] + (pos - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Deepest drawdown of the series below its running peak, as a fraction of
/// the peak; at most 0 whenever the peak is positive.
///
/// The peak is taken over the return series itself, not over a compounded
/// equity curve, so Calmar inherits that definition as well.
pub fn max_drawdown(returns: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut worst = f64::NAN;
    for &r in returns {
        if r > peak {
            peak = r;
        }
        // f64::min ignores a NaN operand, so undefined periods (peak == 0)
        // do not mask real drawdowns.
        worst = worst.min((r - peak) / peak);
    }
    worst
}
