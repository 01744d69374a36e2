#![cfg(feature = "web")]
//! HTTP layer: routes, handlers and the mapping of errors to responses.

use axum::{
    Extension, Json, Router,
    extract::{DefaultBodyLimit, Multipart, Query, State, multipart::MultipartError},
    http::{StatusCode, header},
    middleware,
    response::{Html, IntoResponse, Response},
    routing::{delete, get, post},
};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;

use crate::alignment::{AlignmentMap, AlignmentReport, OutputKind, output_basename};
use crate::auth::{self, AccessGate};
use crate::chart::{ChartOptions, value_count_chart};
use crate::compare::{Comparator, Comparison, KeyedComparator};
use crate::config::Config;
use crate::downloader::{DownloadFormat, export};
use crate::error::SheetError;
use crate::loader::{LoadOptions, SheetSelector, load_file};
use crate::merge::MergeHow;
use crate::preview::Preview;
use crate::processing::StrategyRegistry;
use crate::session::{
    self, RESULT_SLOT, Session, SessionId, SessionStore, StoredResult, Upload, is_result_slot,
};
use crate::table::Table;
use crate::workflow::{InputSpec, Metric, WorkflowInputs, WorkflowRegistry};

/// Shared state behind every handler
pub struct AppState {
    pub config: Config,
    pub sessions: Arc<SessionStore>,
    pub gate: AccessGate,
    pub registry: StrategyRegistry,
    pub workflows: WorkflowRegistry,
    pub alignment: Arc<AlignmentMap>,
}

impl AppState {
    /// Build state from configuration: load the alignment map and hash the password
    pub fn new(config: Config) -> crate::error::Result<AppState> {
        let alignment = Arc::new(config.load_alignment_map()?);
        let gate = AccessGate::new(config.password.as_deref())?;
        if gate.is_enabled() {
            info!("Password protection enabled");
        }
        Ok(AppState {
            sessions: Arc::new(SessionStore::new(config.session_ttl)),
            registry: StrategyRegistry::with_defaults(alignment.clone()),
            workflows: WorkflowRegistry::with_defaults(),
            gate,
            alignment,
            config,
        })
    }
}

/// `{status, message}` body used for acknowledgements and errors
#[derive(Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub message: Option<String>,
}

impl StatusResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        StatusResponse {
            status: "ok".to_string(),
            message: Some(message.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        StatusResponse {
            status: "error".to_string(),
            message: Some(message.into()),
        }
    }
}

/// Error returned by handlers; always rendered as a JSON [`StatusResponse`]
#[derive(Debug)]
pub enum ApiError {
    Sheet(SheetError),
    Request(StatusCode, String),
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        ApiError::Request(StatusCode::BAD_REQUEST, message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Request(status, _) => *status,
            ApiError::Sheet(err) => match err {
                SheetError::EmptyUpload
                | SheetError::MissingColumn { .. }
                | SheetError::UnknownStrategy(_)
                | SheetError::NothingToMerge => StatusCode::BAD_REQUEST,
                SheetError::NoUpload(_) | SheetError::SheetNotFound(_) => StatusCode::NOT_FOUND,
                SheetError::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                SheetError::Encrypted(_)
                | SheetError::Validation(_)
                | SheetError::Parse(_)
                | SheetError::Csv(_)
                | SheetError::Chart(_) => StatusCode::UNPROCESSABLE_ENTITY,
                SheetError::Write(_) | SheetError::Config(_) | SheetError::Io(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}

impl From<SheetError> for ApiError {
    fn from(err: SheetError) -> Self {
        ApiError::Sheet(err)
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::Request(err.status(), err.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::Sheet(err) => err.to_string(),
            ApiError::Request(_, message) => message,
        };
        if status.is_server_error() {
            error!("{}", message);
        } else {
            warn!("{}", message);
        }
        (status, Json(StatusResponse::error(message))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Build the application router
///
/// Every route runs inside a session. All routes except `/login` and
/// `/logout` sit behind the password gate.
pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/", get(serve_index))
        .route("/api/upload", post(upload))
        .route("/api/sheets", get(list_sheets))
        .route("/api/preview", get(preview))
        .route("/api/strategies", get(list_strategies))
        .route("/api/process", post(process))
        .route("/api/alignment", get(alignment_report))
        .route("/api/compare", post(compare))
        .route("/api/merge", post(merge))
        .route("/api/download", get(download))
        .route("/api/chart", get(chart))
        .route("/api/workflows", get(list_workflows))
        .route("/api/workflow", post(run_workflow))
        .route("/api/session", delete(clear_session))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    Router::new()
        .route(
            "/login",
            get(auth::serve_login_page).post(auth::handle_login),
        )
        .route("/logout", get(auth::handle_logout))
        .merge(protected)
        .layer(middleware::from_fn_with_state(
            state.sessions.clone(),
            session::session_layer,
        ))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(state.config.max_upload_bytes))
        .with_state(state)
}

/// Start the web server and serve until the process is stopped
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let bind = config.bind.clone();
    let state = Arc::new(AppState::new(config)?);
    let app = router(state);

    let listener = TcpListener::bind(&bind).await?;
    info!("Listening on http://{}", bind);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn serve_index() -> Html<&'static str> {
    Html(include_str!("./static/index.html"))
}

/// Run `f` on the caller's session, converting its error
///
/// The store is locked for the duration, so `f` only copies tables in or out.
fn in_session<R>(
    state: &AppState,
    id: &str,
    f: impl FnOnce(&mut Session) -> crate::error::Result<R>,
) -> ApiResult<R> {
    state.sessions.with_session(id, f).map_err(ApiError::from)
}

/// Run parsing or table work on the blocking pool, away from the session lock
async fn blocking<R, F>(work: F) -> ApiResult<R>
where
    F: FnOnce() -> crate::error::Result<R> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| {
            ApiError::Request(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Worker task failed: {}", e),
            )
        })?
        .map_err(ApiError::from)
}

/// Store results unless the uploads changed since `revision` was read
fn commit(
    state: &AppState,
    id: &str,
    revision: u64,
    results: Vec<(String, StoredResult)>,
) -> ApiResult<()> {
    let stored = state.sessions.with_session(id, |s| {
        if s.revision() != revision {
            return false;
        }
        s.set_results(results);
        true
    });
    if stored {
        Ok(())
    } else {
        Err(ApiError::Request(
            StatusCode::CONFLICT,
            "The uploads changed while this was running; run it again".to_string(),
        ))
    }
}

fn commit_result(state: &AppState, id: &str, revision: u64, name: String, table: Table) -> ApiResult<()> {
    commit(
        state,
        id,
        revision,
        vec![(RESULT_SLOT.to_string(), StoredResult::new(name, table))],
    )
}

fn file_stem(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("result")
        .to_string()
}

#[derive(Deserialize)]
struct UploadQuery {
    sheet: Option<String>,
    header_row: Option<usize>,
}

#[derive(Serialize)]
struct SlotPreview {
    slot: String,
    sheets: Vec<String>,
    #[serde(flatten)]
    preview: Preview,
}

#[derive(Serialize)]
struct UploadResponse {
    status: String,
    uploads: Vec<SlotPreview>,
}

/// Parse every file field of a multipart body; the field name is the slot
///
/// Nothing is stored unless every file parses, and then all of them are
/// stored together.
async fn upload(
    State(state): State<Arc<AppState>>,
    Extension(SessionId(id)): Extension<SessionId>,
    Query(params): Query<UploadQuery>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    let options = LoadOptions {
        sheet: params
            .sheet
            .as_deref()
            .map(SheetSelector::parse)
            .unwrap_or_default(),
        header_row: params.header_row.unwrap_or(0),
        password: state.config.workbook_password.clone(),
    };

    let mut received = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let slot = field
            .name()
            .filter(|name| !name.is_empty())
            .unwrap_or("file")
            .to_string();
        if is_result_slot(&slot) {
            return Err(ApiError::bad_request(format!(
                "'{}' names a result and cannot be used as an upload slot",
                slot
            )));
        }
        let bytes = field.bytes().await?;
        info!("Received {} ({} bytes) into slot {}", filename, bytes.len(), slot);
        received.push((slot, filename, bytes));
    }

    if received.is_empty() {
        return Err(ApiError::bad_request("No file data received"));
    }

    let rows = state.config.preview_rows;
    let parsed = blocking(move || {
        received
            .into_iter()
            .map(|(slot, filename, bytes)| {
                let file = load_file(&bytes, &filename, &options)?;
                let preview = Preview::of(&filename, &file.table, rows);
                Ok((slot, filename, file, preview))
            })
            .collect::<crate::error::Result<Vec<_>>>()
    })
    .await?;

    let uploads = state.sessions.with_session(&id, |session| {
        parsed
            .into_iter()
            .map(|(slot, filename, file, preview)| {
                session.put_upload(
                    &slot,
                    Upload {
                        filename,
                        sheets: file.sheets.clone(),
                        table: Arc::new(file.table),
                    },
                );
                SlotPreview {
                    slot,
                    sheets: file.sheets,
                    preview,
                }
            })
            .collect::<Vec<_>>()
    });

    Ok(Json(UploadResponse {
        status: "ok".to_string(),
        uploads,
    }))
}

#[derive(Deserialize)]
struct SlotQuery {
    slot: String,
}

#[derive(Serialize)]
struct SheetsResponse {
    slot: String,
    sheets: Vec<String>,
}

async fn list_sheets(
    State(state): State<Arc<AppState>>,
    Extension(SessionId(id)): Extension<SessionId>,
    Query(params): Query<SlotQuery>,
) -> ApiResult<Json<SheetsResponse>> {
    let sheets = in_session(&state, &id, |s| Ok(s.upload(&params.slot)?.sheets.clone()))?;
    Ok(Json(SheetsResponse {
        slot: params.slot,
        sheets,
    }))
}

/// Preview an upload, `result`, or one workflow output as `result:<key>`
async fn preview(
    State(state): State<Arc<AppState>>,
    Extension(SessionId(id)): Extension<SessionId>,
    Query(params): Query<SlotQuery>,
) -> ApiResult<Json<Preview>> {
    let rows = state.config.preview_rows;
    let (name, table) = in_session(&state, &id, |s| s.named_table(&params.slot))?;
    let preview = blocking(move || Ok(Preview::of(&name, &table, rows))).await?;
    Ok(Json(preview))
}

#[derive(Serialize)]
struct StrategyInfo {
    name: String,
    description: String,
}

async fn list_strategies(State(state): State<Arc<AppState>>) -> Json<Vec<StrategyInfo>> {
    Json(
        state
            .registry
            .names()
            .into_iter()
            .map(|(name, description)| StrategyInfo { name, description })
            .collect(),
    )
}

#[derive(Deserialize)]
struct ProcessQuery {
    slot: String,
    strategy: String,
}

/// Run a named processor over an upload and keep the output as the result
async fn process(
    State(state): State<Arc<AppState>>,
    Extension(SessionId(id)): Extension<SessionId>,
    Query(params): Query<ProcessQuery>,
) -> ApiResult<Json<Preview>> {
    let rows = state.config.preview_rows;
    let today = chrono::Local::now().date_naive();
    let (upload, revision) =
        in_session(&state, &id, |s| Ok((s.upload(&params.slot)?.clone(), s.revision())))?;

    let worker = state.clone();
    let (name, table, preview) = blocking(move || {
        let table = worker.registry.run(&params.strategy, &upload.table)?;
        let name = if params.strategy == "align-headers" {
            output_basename(&upload.filename, &worker.config.output_prefix, today)
        } else {
            format!("{}_{}", file_stem(&upload.filename), params.strategy)
        };
        let preview = Preview::of(&name, &table, rows);
        Ok((name, table, preview))
    })
    .await?;

    commit_result(&state, &id, revision, name, table)?;
    Ok(Json(preview))
}

#[derive(Serialize)]
struct AlignmentResponse {
    #[serde(flatten)]
    report: AlignmentReport,
    kind: OutputKind,
    output_name: String,
}

async fn alignment_report(
    State(state): State<Arc<AppState>>,
    Extension(SessionId(id)): Extension<SessionId>,
    Query(params): Query<SlotQuery>,
) -> ApiResult<Json<AlignmentResponse>> {
    let today = chrono::Local::now().date_naive();
    let upload = in_session(&state, &id, |s| Ok(s.upload(&params.slot)?.clone()))?;
    let worker = state.clone();
    let response = blocking(move || {
        Ok(AlignmentResponse {
            report: worker.alignment.report(&upload.table),
            kind: OutputKind::detect(&upload.filename),
            output_name: output_basename(&upload.filename, &worker.config.output_prefix, today),
        })
    })
    .await?;
    Ok(Json(response))
}

#[derive(Deserialize)]
struct CompareQuery {
    left: String,
    right: String,
    key: Option<String>,
}

#[derive(Serialize)]
struct CompareResponse {
    #[serde(flatten)]
    comparison: Comparison,
    identical: bool,
    preview: Preview,
}

/// Compare two uploads; the difference table becomes the result
async fn compare(
    State(state): State<Arc<AppState>>,
    Extension(SessionId(id)): Extension<SessionId>,
    Query(params): Query<CompareQuery>,
) -> ApiResult<Json<CompareResponse>> {
    let rows = state.config.preview_rows;
    let key = params.key.filter(|k| !k.trim().is_empty());
    let comparator = KeyedComparator::new(key);
    let (left, right, revision) = in_session(&state, &id, |s| {
        Ok((s.table(&params.left)?, s.table(&params.right)?, s.revision()))
    })?;

    let name = format!("comparison_{}_{}", params.left, params.right);
    let (comparison, table, preview) = blocking(move || {
        let comparison = comparator.compare(&left, &right)?;
        let table = comparison.to_table();
        let preview = Preview::of(&name, &table, rows);
        Ok((comparison, table, preview))
    })
    .await?;

    commit_result(&state, &id, revision, preview.name.clone(), table)?;
    Ok(Json(CompareResponse {
        identical: comparison.is_identical(),
        comparison,
        preview,
    }))
}

#[derive(Deserialize)]
struct MergeQuery {
    slots: String,
    how: String,
    on: Option<String>,
}

/// Merge uploads in the order listed; the merged table becomes the result
async fn merge(
    State(state): State<Arc<AppState>>,
    Extension(SessionId(id)): Extension<SessionId>,
    Query(params): Query<MergeQuery>,
) -> ApiResult<Json<Preview>> {
    let rows = state.config.preview_rows;
    let how = MergeHow::parse(&params.how)
        .ok_or_else(|| ApiError::bad_request(format!("Unknown merge method: {}", params.how)))?;
    let merger = how.merger(params.on.filter(|k| !k.trim().is_empty()))?;
    let slots: Vec<&str> = params
        .slots
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    let (tables, revision) = in_session(&state, &id, |s| {
        let tables = slots
            .iter()
            .map(|slot| s.table(slot))
            .collect::<crate::error::Result<Vec<_>>>()?;
        Ok((tables, s.revision()))
    })?;

    let (table, preview) = blocking(move || {
        let borrowed: Vec<&Table> = tables.iter().map(|t| t.as_ref()).collect();
        let table = merger.merge(&borrowed)?;
        let preview = Preview::of("merged", &table, rows);
        Ok((table, preview))
    })
    .await?;

    commit_result(&state, &id, revision, "merged".to_string(), table)?;
    Ok(Json(preview))
}

#[derive(Deserialize)]
struct DownloadQuery {
    source: Option<String>,
    format: Option<String>,
}

/// Send an upload or a result as a file
async fn download(
    State(state): State<Arc<AppState>>,
    Extension(SessionId(id)): Extension<SessionId>,
    Query(params): Query<DownloadQuery>,
) -> ApiResult<Response> {
    let format = match params.format.as_deref() {
        Some(raw) => DownloadFormat::parse(raw)
            .ok_or_else(|| ApiError::bad_request(format!("Unknown download format: {}", raw)))?,
        None => DownloadFormat::default(),
    };
    let source = params.source.unwrap_or_else(|| RESULT_SLOT.to_string());

    let (name, table) = in_session(&state, &id, |s| {
        let (name, table) = s.named_table(&source)?;
        if is_result_slot(&source) {
            Ok((name, table))
        } else {
            Ok((file_stem(&name), table))
        }
    })?;
    let bytes = blocking(move || export(&table, format)).await?;

    let filename = format!("{}.{}", name, format.extension());
    info!("Download {} ({} bytes)", filename, bytes.len());
    Ok((
        [
            (header::CONTENT_TYPE, format.mime().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename.replace('"', "")),
            ),
        ],
        bytes,
    )
        .into_response())
}

#[derive(Deserialize)]
struct ChartQuery {
    slot: String,
    column: String,
}

async fn chart(
    State(state): State<Arc<AppState>>,
    Extension(SessionId(id)): Extension<SessionId>,
    Query(params): Query<ChartQuery>,
) -> ApiResult<Response> {
    let table = in_session(&state, &id, |s| s.table(&params.slot))?;
    let column = params.column;
    let png = blocking(move || value_count_chart(&table, &column, &ChartOptions::default())).await?;
    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

#[derive(Serialize)]
struct WorkflowInfo {
    name: String,
    description: String,
    inputs: Vec<InputSpec>,
}

async fn list_workflows(State(state): State<Arc<AppState>>) -> Json<Vec<WorkflowInfo>> {
    Json(
        state
            .workflows
            .list()
            .into_iter()
            .map(|workflow| WorkflowInfo {
                name: workflow.name().to_string(),
                description: workflow.description().to_string(),
                inputs: workflow.inputs(),
            })
            .collect(),
    )
}

#[derive(Serialize)]
struct OutputPreview {
    key: String,
    /// Name to pass as `source` or `slot` to reach this output
    slot: String,
    #[serde(flatten)]
    preview: Preview,
}

#[derive(Serialize)]
struct WorkflowResponse {
    status: String,
    workflow: String,
    metrics: Vec<Metric>,
    warnings: Vec<String>,
    outputs: Vec<OutputPreview>,
}

/// Run a workflow over uploads and keep every output as a result
///
/// `name` picks the workflow. Any other query parameter maps an input role to
/// the slot holding it, e.g. `tad=today`; a role with no mapping reads the
/// slot of the same name.
async fn run_workflow(
    State(state): State<Arc<AppState>>,
    Extension(SessionId(id)): Extension<SessionId>,
    Query(mut params): Query<HashMap<String, String>>,
) -> ApiResult<Json<WorkflowResponse>> {
    let name = params
        .remove("name")
        .ok_or_else(|| ApiError::bad_request("Missing workflow name"))?;
    let specs = state
        .workflows
        .get(&name)
        .map_err(|_| ApiError::bad_request(format!("Unknown workflow: {}", name)))?
        .inputs();

    let (inputs, revision) = in_session(&state, &id, |s| {
        let mut inputs = WorkflowInputs::new();
        for spec in &specs {
            let slot = params.get(spec.role).map(String::as_str).unwrap_or(spec.role);
            if let Ok(upload) = s.upload(slot) {
                inputs.insert(spec.role, upload.filename.clone(), upload.table.clone());
            }
        }
        Ok((inputs, s.revision()))
    })?;

    let rows = state.config.preview_rows;
    let today = chrono::Local::now().date_naive();
    let worker = state.clone();
    let workflow = name.clone();
    let (output, outputs) = blocking(move || {
        let output = worker.workflows.run(&workflow, &inputs, today)?;
        let outputs = output
            .outputs
            .iter()
            .map(|o| OutputPreview {
                key: o.key.clone(),
                slot: format!("{}:{}", RESULT_SLOT, o.key),
                preview: Preview::of(&o.name, &o.table, rows),
            })
            .collect::<Vec<_>>();
        Ok((output, outputs))
    })
    .await?;

    let results = output
        .outputs
        .into_iter()
        .map(|o| (o.key, StoredResult::new(o.name, o.table)))
        .collect();
    commit(&state, &id, revision, results)?;

    Ok(Json(WorkflowResponse {
        status: "ok".to_string(),
        workflow: name,
        metrics: output.metrics,
        warnings: output.warnings,
        outputs,
    }))
}

async fn clear_session(
    State(state): State<Arc<AppState>>,
    Extension(SessionId(id)): Extension<SessionId>,
) -> Json<StatusResponse> {
    state.sessions.with_session(&id, |s| s.clear());
    Json(StatusResponse::ok("Session cleared"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_status_codes() {
        let cases = [
            (SheetError::EmptyUpload, StatusCode::BAD_REQUEST),
            (SheetError::UnsupportedFormat(".txt".into()), StatusCode::UNSUPPORTED_MEDIA_TYPE),
            (SheetError::Parse("bad zip".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (SheetError::Encrypted("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (SheetError::Validation("REENDO without DATE REFERRED".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (SheetError::NoUpload("left".into()), StatusCode::NOT_FOUND),
            (SheetError::Config("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn stale_results_are_refused() {
        let state = AppState::new(Config::default()).unwrap();
        let (id, _) = state.sessions.resume(None);
        let revision = state.sessions.with_session(&id, |s| s.revision());

        state.sessions.with_session(&id, |s| {
            s.put_upload(
                "file",
                Upload {
                    filename: "new.xlsx".into(),
                    sheets: vec![],
                    table: Arc::new(Table::new(vec!["id".into()])),
                },
            )
        });
        let err = commit_result(&state, &id, revision, "old".into(), Table::new(vec![])).unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);

        let current = state.sessions.with_session(&id, |s| s.revision());
        commit_result(&state, &id, current, "fresh".into(), Table::new(vec![])).unwrap();
        assert_eq!(
            state.sessions.with_session(&id, |s| s.result().map(|r| r.name.clone())).unwrap(),
            "fresh"
        );
    }

    #[test]
    fn file_stem_drops_extension() {
        assert_eq!(file_stem("FOR UPLOAD 1016.xlsx"), "FOR UPLOAD 1016");
        assert_eq!(file_stem(""), "result");
    }
}
