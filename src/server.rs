use std::sync::Arc;

use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::header;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use axum::Json;
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::exporter;
use crate::exporter::ExportParams;
use crate::job_queue::JobQueue;
use crate::job_queue::TaskType;
use crate::models::export::ExportEnvelope;
use crate::models::state::NodeState;
use crate::models::sync::SyncError;
use crate::models::sync::SyncJobParams;
use crate::peer_client::ClockStatusResponse;
use crate::peer_client::SyncTriggerResponse;

/// Everything the HTTP handlers reach for.
#[derive(Clone, Debug)]
pub struct AppState {
    pub node: NodeState,
    pub sync_queue: Arc<JobQueue>,
}

pub fn router(app: AppState) -> Router {
    Router::new()
        .route("/export", get(export))
        .route("/users/clock_status/:wallet", get(clock_status))
        .route("/sync", post(sync_trigger))
        .route("/async_processing_status", get(async_processing_status))
        .route("/health_check", get(health_check))
        .route("/ipfs/:multihash", get(serve_content))
        .route("/ipfs/:dir_multihash/:file_name", get(serve_dir_content))
        .with_state(app)
}

/// Serve until the shutdown signal fires.
pub async fn serve(
    app: AppState,
    listener: TcpListener,
    mut shutdown_rx: watch::Receiver<()>,
) -> anyhow::Result<()> {
    info!("http server listening on {}", listener.local_addr()?);
    axum::serve(listener, router(app))
        .with_graceful_shutdown(async move {
            shutdown_rx.changed().await.ok();
        })
        .await?;
    Ok(())
}

/// `GET /export?wallet_public_key=<w>&clock_range_min=<n>&source_endpoint=<url>`.
/// The wallet parameter repeats for multi-user exports.
async fn export(
    State(app): State<AppState>,
    Query(raw_params): Query<Vec<(String, String)>>,
) -> Response {
    let mut wallets = vec![];
    let mut clock_range_min = 0u64;
    let mut source_endpoint = None;
    for (key, value) in raw_params {
        match key.as_str() {
            "wallet_public_key" => wallets.push(value),
            "clock_range_min" => match value.parse() {
                Ok(parsed) => clock_range_min = parsed,
                Err(_) => {
                    return reject(
                        StatusCode::BAD_REQUEST,
                        "BadRequest",
                        &format!("clock_range_min {value:?} is not an integer"),
                    )
                }
            },
            "source_endpoint" => source_endpoint = Some(value),
            _ => {}
        }
    }
    if wallets.is_empty() {
        return reject(
            StatusCode::BAD_REQUEST,
            "BadRequest",
            "at least one wallet_public_key is required",
        );
    }

    let result = exporter::build_export(
        &app.node.clock_log,
        &*app.node.chain,
        &app.node.cli.creator_node_endpoint,
        app.node.cli.export_window,
        ExportParams {
            wallets,
            clock_range_min,
            source_endpoint,
        },
    )
    .await;

    match result {
        Ok(payload) => Json(ExportEnvelope { data: payload }).into_response(),
        Err(error) => error_response(&error),
    }
}

/// `GET /users/clock_status/:wallet`. Answers `-1` for users unknown here.
async fn clock_status(State(app): State<AppState>, Path(wallet): Path<String>) -> Response {
    match app.node.clock_log.local_clock(&wallet).await {
        Ok(clock) => Json(ClockStatusResponse { clock }).into_response(),
        Err(error) => error_response(&error),
    }
}

/// `POST /sync`. Enqueues a sync job against the named source node.
async fn sync_trigger(
    State(app): State<AppState>,
    Json(params): Json<SyncJobParams>,
) -> Response {
    if params.wallet.is_empty() {
        return reject(
            StatusCode::BAD_REQUEST,
            "BadRequest",
            "at least one wallet is required",
        );
    }
    if !app.node.cli.peer_is_allowed(&params.creator_node_endpoint) {
        return reject(
            StatusCode::FORBIDDEN,
            "Forbidden",
            &format!(
                "{} is not an accepted sync peer of this node",
                params.creator_node_endpoint
            ),
        );
    }

    match app.sync_queue.add_job(&params).await {
        Ok(job_id) => Json(SyncTriggerResponse { job_id }).into_response(),
        Err(error) => reject(
            StatusCode::INTERNAL_SERVER_ERROR,
            "QueueUnavailable",
            &error.to_string(),
        ),
    }
}

#[derive(Deserialize)]
struct StatusQuery {
    uuid: String,
}

/// `GET /async_processing_status?uuid=...`. Polls a job by request id.
async fn async_processing_status(
    State(app): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Response {
    match JobQueue::status(&*app.node.coordination, TaskType::Sync, &query.uuid).await {
        Some(record) => Json(record).into_response(),
        None => reject(
            StatusCode::NOT_FOUND,
            "NotFound",
            &format!("no status for request {}", query.uuid),
        ),
    }
}

async fn health_check(State(app): State<AppState>) -> Response {
    let sp_id = app.node.sp_id().ok();
    Json(json!({
        "healthy": true,
        "service": "creator-node",
        "version": env!("CARGO_PKG_VERSION"),
        "sp_id": sp_id,
    }))
    .into_response()
}

/// `GET /ipfs/:multihash`: the byte-stream half of replica-to-replica
/// content transfer.
async fn serve_content(State(app): State<AppState>, Path(multihash): Path<String>) -> Response {
    content_bytes(&app, &multihash).await
}

/// `GET /ipfs/:dir_multihash/:file_name`: directory-form addressing used by
/// image files.
async fn serve_dir_content(
    State(app): State<AppState>,
    Path((dir_multihash, file_name)): Path<(String, String)>,
) -> Response {
    match app.node.clock_log.dir_entry(&dir_multihash, &file_name).await {
        Ok(Some(multihash)) => content_bytes(&app, &multihash).await,
        Ok(None) => reject(
            StatusCode::NOT_FOUND,
            "NotFound",
            &format!("no file {file_name} under directory {dir_multihash}"),
        ),
        Err(error) => error_response(&error),
    }
}

async fn content_bytes(app: &AppState, multihash: &str) -> Response {
    match app.node.content.read(multihash).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response(),
        Err(error) => reject(StatusCode::NOT_FOUND, "NotFound", &error.to_string()),
    }
}

/// Failures always carry the `{ error: { kind, message } }` body with a
/// stable kind string.
fn error_response(error: &SyncError) -> Response {
    let status = match error {
        SyncError::SyncInProgress(_) => StatusCode::CONFLICT,
        SyncError::BootstrapPending => StatusCode::SERVICE_UNAVAILABLE,
        SyncError::StorageFull { .. } => StatusCode::INSUFFICIENT_STORAGE,
        SyncError::Db(_) | SyncError::CommitFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    };
    reject(status, error.kind(), &error.to_string())
}

fn reject(status: StatusCode, kind: &str, message: &str) -> Response {
    (
        status,
        Json(json!({ "error": { "kind": kind, "message": message } })),
    )
        .into_response()
}
