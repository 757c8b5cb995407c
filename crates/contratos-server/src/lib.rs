//! HTTP API over the import engine.
//!
//! The engine owns a single DuckDB connection, so it sits behind one mutex
//! and every request runs on the blocking pool while holding it. Commits
//! therefore serialize.

mod error;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use contratos_core::parse::parse_date;
use contratos_core::{BatchStatus, Exclusion, HeaderMeta, ImportBatch, LogKind};
use contratos_import::{DuplicatePolicy, Engine};
use contratos_store::rows::DEFAULT_PER_PAGE;
use contratos_store::{DashboardFilter, ItemFilter, ItemOrder, SortDir};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

pub use error::ApiError;

const LOG_LIMIT: usize = 200;
const HISTORY_LIMIT: usize = 200;
const MAX_HISTORY_LIMIT: usize = 1000;

#[derive(Clone)]
pub struct AppState {
    engine: Arc<Mutex<Engine>>,
}

impl AppState {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
        }
    }

    /// Run `f` against the engine on the blocking pool.
    async fn run<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Engine) -> Result<T, ApiError> + Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || {
            let mut guard = engine
                .lock()
                .map_err(|_| ApiError::internal("engine lock poisoned"))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| ApiError::internal(format!("engine task failed: {e}")))?
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/imports/preview", post(preview))
        .route("/api/imports/last", get(last_import))
        .route("/api/imports/history", get(import_history))
        .route("/api/imports/{id}", get(show_batch))
        .route("/api/imports/{id}/commit", post(commit))
        .route("/api/imports/{id}/discard", post(discard))
        .route("/api/headers", get(list_headers).post(register_header))
        .route("/api/headers/import", post(import_headers))
        .route("/api/headers/{number}", get(header_detail).put(edit_header))
        .route("/api/items", get(list_items))
        .route("/api/recalc", post(recalc))
        .route("/api/recalc/{number}", post(recalc_contract))
        .route("/api/dashboard", get(dashboard))
        .route("/api/logs", get(logs))
        .route("/export/contratos.csv", get(export_csv))
        .with_state(state)
}

/// Bind `addr` and serve until the process stops.
pub async fn serve(engine: Engine, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, router(AppState::new(engine))).await
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

// ── Imports ──

#[derive(Debug, Deserialize)]
struct PreviewParams {
    file: Option<String>,
}

/// What the operator reviews before committing.
#[derive(Debug, Serialize)]
struct BatchSummary {
    id: i64,
    file_name: Option<String>,
    status: BatchStatus,
    total_rows: usize,
    admitted: usize,
    duplicates: usize,
    invalid: usize,
    warnings: Vec<String>,
    exclusions: Vec<Exclusion>,
}

impl From<ImportBatch> for BatchSummary {
    fn from(batch: ImportBatch) -> Self {
        let mut warnings: Vec<String> = batch
            .records
            .iter()
            .flat_map(|r| r.warnings.iter().cloned())
            .collect();
        warnings.sort();
        warnings.dedup();
        Self {
            id: batch.id,
            admitted: batch.admitted(),
            file_name: batch.file_name,
            status: batch.status,
            total_rows: batch.total_rows,
            duplicates: batch.duplicates,
            invalid: batch.invalid,
            warnings,
            exclusions: batch.exclusions,
        }
    }
}

async fn preview(
    State(state): State<AppState>,
    Query(params): Query<PreviewParams>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let batch = state
        .run(move |engine| Ok(engine.preview(&body, params.file.as_deref())?))
        .await?;
    Ok((StatusCode::CREATED, Json(BatchSummary::from(batch))))
}

async fn show_batch(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let batch = state.run(move |engine| Ok(engine.batch(id)?)).await?;
    Ok(Json(batch))
}

async fn commit(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.run(move |engine| Ok(engine.commit(id)?)).await?;
    Ok(Json(outcome))
}

async fn discard(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.run(move |engine| Ok(engine.discard(id)?)).await?;
    Ok(Json(json!({ "id": id, "status": BatchStatus::Discarded })))
}

async fn last_import(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let last = state.run(|engine| Ok(engine.last_import()?)).await?;
    last.map(Json)
        .ok_or_else(|| ApiError::not_found("no import has been committed yet"))
}

#[derive(Debug, Default, Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
}

async fn import_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = params.limit.unwrap_or(HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT);
    let history = state.run(move |engine| Ok(engine.import_history(limit)?)).await?;
    Ok(Json(json!({ "total": history.len(), "items": history })))
}

// ── Headers ──

async fn list_headers(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let headers = state.run(|engine| Ok(engine.list_headers()?)).await?;
    Ok(Json(headers))
}

async fn register_header(
    State(state): State<AppState>,
    Json(meta): Json<HeaderMeta>,
) -> Result<impl IntoResponse, ApiError> {
    let header = state.run(move |engine| Ok(engine.register_header(meta)?)).await?;
    Ok((StatusCode::CREATED, Json(header)))
}

async fn header_detail(
    State(state): State<AppState>,
    Path(number): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let detail = state.run(move |engine| Ok(engine.header_detail(&number)?)).await?;
    Ok(Json(detail))
}

async fn edit_header(
    State(state): State<AppState>,
    Path(number): Path<String>,
    Json(meta): Json<HeaderMeta>,
) -> Result<impl IntoResponse, ApiError> {
    let header = state
        .run(move |engine| Ok(engine.edit_header(&number, meta)?))
        .await?;
    Ok(Json(header))
}

#[derive(Debug, Deserialize)]
struct HeaderImportParams {
    on_duplicate: Option<String>,
}

async fn import_headers(
    State(state): State<AppState>,
    Query(params): Query<HeaderImportParams>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let policy = match params.on_duplicate.as_deref() {
        None | Some("") => DuplicatePolicy::default(),
        Some(raw) => raw
            .parse::<DuplicatePolicy>()
            .map_err(|e| ApiError::validation(e.to_string()))?,
    };
    let report = state
        .run(move |engine| Ok(engine.import_headers(&body, policy)?))
        .await?;
    Ok(Json(report))
}

// ── Recalc, items, dashboard, logs, export ──

async fn recalc(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let report = state.run(|engine| Ok(engine.recalc_all()?)).await?;
    Ok(Json(report))
}

async fn recalc_contract(
    State(state): State<AppState>,
    Path(number): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let out = state.run(move |engine| Ok(engine.recalc_contract(&number)?)).await?;
    Ok(Json(out))
}

/// Item filters as the listing and export pages send them.
#[derive(Debug, Default, Deserialize)]
struct ItemParams {
    cliente: Option<String>,
    contrato: Option<String>,
    ativo: Option<String>,
    #[serde(default)]
    incluir_retornados: bool,
    order_by: Option<String>,
    order_dir: Option<String>,
    page: Option<usize>,
    per_page: Option<usize>,
}

fn non_blank(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

impl ItemParams {
    fn filter(&self) -> Result<ItemFilter, ApiError> {
        let order_by = match self.order_by.as_deref() {
            Some(raw) => raw
                .parse::<ItemOrder>()
                .map_err(|e| ApiError::validation(e.to_string()))?,
            None => ItemOrder::default(),
        };
        let order_dir = match self.order_dir.as_deref() {
            Some(raw) => raw
                .parse::<SortDir>()
                .map_err(|e| ApiError::validation(e.to_string()))?,
            None => SortDir::default(),
        };
        Ok(ItemFilter {
            client: non_blank(self.cliente.clone()),
            contract: non_blank(self.contrato.clone()),
            asset: non_blank(self.ativo.clone()),
            include_returned: self.incluir_retornados,
            order_by,
            order_dir,
        })
    }
}

async fn list_items(
    State(state): State<AppState>,
    Query(params): Query<ItemParams>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = params.filter()?;
    let page = params.page.unwrap_or(1);
    let per_page = params.per_page.unwrap_or(DEFAULT_PER_PAGE);
    let items = state
        .run(move |engine| Ok(engine.list_items(&filter, page, per_page)?))
        .await?;
    Ok(Json(items))
}

#[derive(Debug, Default, Deserialize)]
struct DashboardParams {
    cliente: Option<String>,
    de: Option<String>,
    ate: Option<String>,
}

fn query_date(name: &str, raw: Option<&str>) -> Result<Option<NaiveDate>, ApiError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => parse_date(s)
            .map(Some)
            .map_err(|e| ApiError::validation(format!("{name}: {e}"))),
    }
}

async fn dashboard(
    State(state): State<AppState>,
    Query(params): Query<DashboardParams>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = DashboardFilter {
        client: params.cliente.filter(|c| !c.trim().is_empty()),
        from: query_date("de", params.de.as_deref())?,
        to: query_date("ate", params.ate.as_deref())?,
    };
    let dashboard = state.run(move |engine| Ok(engine.dashboard(&filter)?)).await?;
    Ok(Json(dashboard))
}

#[derive(Debug, Default, Deserialize)]
struct LogParams {
    kind: Option<String>,
    contract: Option<String>,
    limit: Option<usize>,
}

async fn logs(
    State(state): State<AppState>,
    Query(params): Query<LogParams>,
) -> Result<impl IntoResponse, ApiError> {
    let kind = match params.kind.as_deref().filter(|k| !k.is_empty()) {
        None => None,
        Some(k) => Some(
            k.parse::<LogKind>()
                .map_err(|e| ApiError::validation(e.to_string()))?,
        ),
    };
    let limit = params.limit.unwrap_or(LOG_LIMIT).min(LOG_LIMIT);
    let contract = params.contract.filter(|c| !c.trim().is_empty());
    let entries = state
        .run(move |engine| Ok(engine.logs(kind, contract.as_deref(), limit)?))
        .await?;
    Ok(Json(entries))
}

async fn export_csv(
    State(state): State<AppState>,
    Query(params): Query<ItemParams>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = params.filter()?;
    let csv = state
        .run(move |engine| {
            let mut buf = Vec::new();
            engine.export_csv(&mut buf, &filter)?;
            Ok(buf)
        })
        .await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"contratos.csv\"",
            ),
        ],
        csv,
    ))
}
