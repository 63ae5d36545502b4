use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use collector::DateWindow;
use common::{BacktestRequest, Error, PerformanceReport};
use sandbox::StrategyUnit;
use stats::StatsConfig;

use crate::AppState;

pub fn backtest_router() -> Router<AppState> {
    Router::new().route("/backtest", post(post_backtest))
}

/// Run the full pipeline for one request: collect candles, marshal them,
/// provision the environment, execute the strategy, evaluate statistics.
async fn post_backtest(
    State(state): State<AppState>,
    Json(req): Json<BacktestRequest>,
) -> Result<Json<PerformanceReport>, ApiError> {
    req.validate()?;
    let request_id = req
        .request_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    if req.is_recurring {
        // Recurrence is executed by the deployment's scheduler; the service
        // itself only runs the immediate evaluation.
        info!(
            request = %request_id,
            frequency = ?req.repeat_frequency,
            executions = ?req.nb_execution,
            "recurring request acknowledged"
        );
    }

    let window = DateWindow::parse(&req.dates)?;
    let dataset = state
        .source
        .collect(&req.tickers, window, &req.interval)
        .await?;
    let blob = codec::encode_dataset(&dataset)?;

    let unit = StrategyUnit {
        source: req.func_strat.clone(),
        requirements: req.requirements.clone(),
    };
    let weights = sandbox::execute(
        &state.provisioner,
        &request_id,
        &unit,
        &blob,
        state.strategy_timeout,
    )
    .await?;

    let cfg = StatsConfig {
        scale: req.scale.unwrap_or(state.stats_defaults.scale),
        risk_free_rate: req
            .risk_free_rate
            .unwrap_or(state.stats_defaults.risk_free_rate),
        var_level: state.stats_defaults.var_level,
    };
    let report = stats::evaluate(&weights, &dataset, &cfg)?;

    info!(request = %request_id, "backtest complete");
    Ok(Json(report))
}

/// Maps pipeline errors onto a structured response naming the failed stage.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Request(_) | Error::Decode { .. } => StatusCode::BAD_REQUEST,
            Error::DependencyInstall { .. }
            | Error::Load(_)
            | Error::Runtime(_)
            | Error::ContractViolation(_)
            | Error::Statistics(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Timeout { .. } => StatusCode::REQUEST_TIMEOUT,
            Error::Provisioning(_) => StatusCode::CONFLICT,
            Error::Exchange(_) | Error::Http(_) => StatusCode::BAD_GATEWAY,
            Error::Io(_) | Error::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({
            "stage": self.0.stage(),
            "detail": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}
