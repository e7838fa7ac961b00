//! HTTP surface. Every bot route answers with the bot as persisted after the
//! operation, with account secrets masked.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::backtest::{run_backtest, BacktestConfig, BacktestReport};
use crate::bot_manager::{BotManager, ExecutionOutcome};
use crate::error::AppError;
use crate::indicator::IndicatorSnapshot;
use crate::model::bot::{Bot, BotConfig};
use crate::model::candle::Candle;
use crate::model::trade::Trade;
use crate::time_sync::{SyncRecord, SyncStats, TimeOffset, TimeSync};

const DEFAULT_INDICATOR_LIMIT: usize = 100;
const MAX_INDICATOR_LIMIT: usize = 1000;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<BotManager>,
    /// Named synchronisers, one per exchange endpoint.
    pub time_syncs: Vec<(String, Arc<TimeSync>)>,
}

pub struct ApiError(anyhow::Error);

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

fn status_for(err: &anyhow::Error) -> StatusCode {
    let Some(app) = err.chain().find_map(|c| c.downcast_ref::<AppError>()) else {
        return StatusCode::INTERNAL_SERVER_ERROR;
    };
    match app {
        AppError::BotNotFound(_) => StatusCode::NOT_FOUND,
        AppError::InvalidTransition { .. }
        | AppError::BotHasTrades { .. }
        | AppError::BotRunning(_) => StatusCode::CONFLICT,
        AppError::InvalidConfig(_) | AppError::Config(_) => StatusCode::UNPROCESSABLE_ENTITY,
        AppError::BinanceApi { .. } | AppError::Http(_) | AppError::Timeout(_) => {
            StatusCode::BAD_GATEWAY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!(error = %format!("{:#}", self.0), "Request failed");
        }
        let body = serde_json::json!({ "error": format!("{:#}", self.0) });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
pub struct CreateBotRequest {
    pub name: String,
    pub config: BotConfig,
}

#[derive(Debug, Serialize)]
pub struct DeleteBotResponse {
    pub id: String,
    pub trades_removed: u64,
}

#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub outcome: ExecutionOutcome,
    pub bot: Bot,
}

#[derive(Debug, Deserialize)]
pub struct IndicatorQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct TimeSyncView {
    pub endpoint: String,
    pub state: TimeOffset,
    pub safe_timestamp: u64,
    pub stats: SyncStats,
    pub history: Vec<SyncRecord>,
}

/// Manual offset correction. Without `endpoint` every synchroniser moves.
#[derive(Debug, Deserialize)]
pub struct AdjustOffsetRequest {
    pub delta_ms: i64,
    pub endpoint: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BacktestRequest {
    pub config: BacktestConfig,
    pub candles: Vec<Candle>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/bots", get(list_bots).post(create_bot))
        .route("/bots/{id}", get(get_bot).delete(delete_bot))
        .route("/bots/{id}/start", post(start_bot))
        .route("/bots/{id}/stop", post(stop_bot))
        .route("/bots/{id}/reset", post(reset_bot))
        .route("/bots/{id}/execute", post(execute_bot))
        .route("/bots/{id}/trades", get(bot_trades))
        .route("/bots/{id}/indicators", get(bot_indicators))
        .route("/backtest", post(backtest))
        .route("/time-sync", get(time_sync_status))
        .route("/time-sync/sync", post(time_sync_now))
        .route("/time-sync/adjust", post(time_sync_adjust))
        .with_state(state)
}

async fn list_bots(State(state): State<AppState>) -> ApiResult<Json<Vec<Bot>>> {
    let bots = state.manager.list()?;
    Ok(Json(bots.iter().map(Bot::redacted).collect()))
}

async fn create_bot(
    State(state): State<AppState>,
    Json(req): Json<CreateBotRequest>,
) -> ApiResult<(StatusCode, Json<Bot>)> {
    let bot = state.manager.create_bot(&req.name, req.config).await?;
    Ok((StatusCode::CREATED, Json(bot.redacted())))
}

async fn get_bot(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Bot>> {
    Ok(Json(state.manager.get(&id)?.redacted()))
}

async fn delete_bot(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DeleteBotResponse>> {
    let trades_removed = state.manager.delete(&id).await?;
    Ok(Json(DeleteBotResponse { id, trades_removed }))
}

async fn start_bot(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Bot>> {
    Ok(Json(state.manager.start(&id).await?.redacted()))
}

async fn stop_bot(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Bot>> {
    Ok(Json(state.manager.stop(&id).await?.redacted()))
}

async fn reset_bot(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Bot>> {
    Ok(Json(state.manager.reset(&id).await?.redacted()))
}

async fn execute_bot(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ExecuteResponse>> {
    let outcome = state.manager.execute_once(&id).await?;
    let bot = state.manager.get(&id)?.redacted();
    Ok(Json(ExecuteResponse { outcome, bot }))
}

async fn bot_trades(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Trade>>> {
    Ok(Json(state.manager.trades(&id)?))
}

async fn bot_indicators(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<IndicatorQuery>,
) -> ApiResult<Json<Vec<IndicatorSnapshot>>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_INDICATOR_LIMIT)
        .clamp(1, MAX_INDICATOR_LIMIT);
    Ok(Json(state.manager.indicators(&id, limit).await?))
}

async fn backtest(Json(req): Json<BacktestRequest>) -> ApiResult<Json<BacktestReport>> {
    Ok(Json(run_backtest(&req.candles, &req.config)?))
}

fn time_sync_views(state: &AppState) -> Vec<TimeSyncView> {
    state
        .time_syncs
        .iter()
        .map(|(endpoint, sync)| TimeSyncView {
            endpoint: endpoint.clone(),
            state: sync.snapshot(),
            safe_timestamp: sync.safe_timestamp(),
            stats: sync.stats(),
            history: sync.history(),
        })
        .collect()
}

async fn time_sync_status(State(state): State<AppState>) -> Json<Vec<TimeSyncView>> {
    Json(time_sync_views(&state))
}

async fn time_sync_now(State(state): State<AppState>) -> Json<Vec<TimeSyncView>> {
    for (endpoint, sync) in &state.time_syncs {
        if !sync.sync().await {
            tracing::warn!(endpoint = %endpoint, "Manual time sync failed");
        }
    }
    Json(time_sync_views(&state))
}

async fn time_sync_adjust(
    State(state): State<AppState>,
    Json(req): Json<AdjustOffsetRequest>,
) -> ApiResult<Json<Vec<TimeSyncView>>> {
    let targets: Vec<_> = state
        .time_syncs
        .iter()
        .filter(|(endpoint, _)| {
            req.endpoint
                .as_deref()
                .map_or(true, |wanted| wanted == endpoint.as_str())
        })
        .collect();
    if targets.is_empty() {
        return Err(AppError::InvalidConfig(format!(
            "unknown time sync endpoint {:?}",
            req.endpoint
        ))
        .into());
    }
    for (endpoint, sync) in targets {
        let offset_ms = sync.adjust_offset(req.delta_ms);
        tracing::info!(endpoint = %endpoint, delta_ms = req.delta_ms, offset_ms, "Time offset adjusted");
    }
    Ok(Json(time_sync_views(&state)))
}
