//! HTTP handlers.

use std::convert::Infallible;

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderName, header};
use axum::response::{IntoResponse, Response};
use futures::stream;
use portfolio_stream::{
    AnalysisRequest, CompanyList, CompanyListResponse, PortfolioAnalysis, ResultRecord,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::analyzer::AnalysisWindow;
use crate::error::RunnerError;
use crate::job::{BatchJob, analyze_item, encode_event};
use crate::RunnerState;

const STREAM_BUFFER: usize = 32;

pub(crate) async fn health(State(state): State<RunnerState>) -> Json<Value> {
    Json(json!({ "status": "ok", "version": state.config.version }))
}

/// `POST /portfolio/analyze-stream`
pub(crate) async fn analyze_stream(
    State(state): State<RunnerState>,
    Json(request): Json<AnalysisRequest>,
) -> Result<Response, RunnerError> {
    request.validate()?;
    let job = BatchJob::new(state.analyzer.clone(), state.config.retry, request);
    info!(request_id = job.request_id(), "streaming portfolio analysis");

    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    tokio::spawn(job.run(tx));
    let records = stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|event| (Ok::<_, Infallible>(encode_event(&event)), rx))
    });

    Ok((
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Body::from_stream(records),
    )
        .into_response())
}

/// `POST /portfolio/analyze`
pub(crate) async fn analyze_batch(
    State(state): State<RunnerState>,
    Json(request): Json<AnalysisRequest>,
) -> Result<Json<PortfolioAnalysis>, RunnerError> {
    request.validate()?;
    let job = BatchJob::new(state.analyzer.clone(), state.config.retry, request);
    info!(request_id = job.request_id(), "running portfolio analysis");
    job.collect().await.map(Json)
}

#[derive(Debug, Deserialize)]
pub(crate) struct SingleQuery {
    symbol: String,
    analysis_date: Option<String>,
}

/// `POST /portfolio/analyze-single?symbol=...&analysis_date=...`
pub(crate) async fn analyze_single(
    State(state): State<RunnerState>,
    Query(query): Query<SingleQuery>,
) -> Result<Json<ResultRecord>, RunnerError> {
    let symbol = query.symbol.trim();
    if symbol.is_empty() {
        return Err(RunnerError::Validation("symbol must not be empty".into()));
    }
    debug!(item_id = symbol, "single analysis");
    let window = AnalysisWindow {
        analysis_date: query.analysis_date,
        ..AnalysisWindow::default()
    };
    analyze_item(state.analyzer.as_ref(), &state.config.retry, symbol, &window)
        .await
        .map(Json)
        .map_err(|err| RunnerError::Analysis(format!("analysis failed for {symbol}: {err}")))
}

/// `GET /companies/{category}`
pub(crate) async fn company_list(
    State(state): State<RunnerState>,
    Path(category): Path<String>,
) -> Result<Json<CompanyListResponse>, RunnerError> {
    let list = category
        .parse::<CompanyList>()
        .map_err(|_| RunnerError::UnknownCategory(category.clone()))?;
    let companies = state.directory.require(list)?.to_vec();
    Ok(Json(CompanyListResponse {
        category: list.to_string(),
        count: companies.len(),
        companies,
        success: true,
    }))
}
