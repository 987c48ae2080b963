use crate::{
    error::AppError,
    models::{AudioFormat, DownloadRequest, DownloadResponse, ExtractionJob, HealthResponse},
    pipeline::{self, Tools},
    registry::DownloadRegistry,
    AppState,
};
use axum::{
    body::Body,
    extract::{Path, Request, State},
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_stream::Stream;
use tokio_util::io::ReaderStream;

// ===================================================================
//                          HEALTH HANDLER
// ===================================================================

/// # GET /health, GET /healthz
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// ===================================================================
//                          AUTH MIDDLEWARE
// ===================================================================

/// Rejects the request unless it carries `Authorization: Bearer <secret>`.
///
/// Runs as a layer so nothing, not even body parsing, happens before it.
pub async fn require_bearer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    check_bearer(state.config.secret(), request.headers())?;
    Ok(next.run(request).await)
}

fn check_bearer(secret: Option<&str>, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(secret) = secret else {
        tracing::error!("YTDLP_TOKEN not set; refusing request");
        return Err(AppError::Misconfigured);
    };

    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Unauthorized("Missing token".to_string()))?;

    if provided != secret {
        return Err(AppError::Unauthorized("Invalid token".to_string()));
    }
    Ok(())
}

// ===================================================================
//                          DOWNLOAD HANDLER
// ===================================================================

/// # POST /download - Runs the extraction pipeline and returns a one-time link.
///
/// Tool failures come back as `200` with `status: "error"`.
pub async fn download(
    State(state): State<AppState>,
    Json(payload): Json<DownloadRequest>,
) -> Result<Json<DownloadResponse>, AppError> {
    if payload.source_url.trim().is_empty() {
        return Err(AppError::BadRequest("source_url cannot be empty".to_string()));
    }
    let format: AudioFormat = payload
        .format
        .parse()
        .map_err(|_| AppError::BadRequest("Unsupported format".to_string()))?;

    tokio::fs::create_dir_all(&state.config.data_dir).await?;
    let job = ExtractionJob::new(&payload, format, &state.config.data_dir);
    let tools = Tools::from_config(&state.config);

    let file_path = match pipeline::run(&job, &tools).await {
        Ok(path) => path,
        Err(e) => {
            tracing::warn!("Download of {} failed: {}", job.source_url, e);
            return Ok(Json(DownloadResponse::error(e.to_string())));
        }
    };

    let token = state.registry.issue(file_path.clone(), state.config.token_ttl());
    let filename = file_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    tracing::info!("Issued download token for {}", filename);

    Ok(Json(DownloadResponse::ok(
        state.config.file_url(&token),
        filename,
        format.quality_label(),
    )))
}

// ===================================================================
//                          FILE HANDLER
// ===================================================================

/// # GET /file/:token - Streams the file once, then deletes it.
pub async fn get_file(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let not_found = || AppError::NotFound("File not found".to_string());

    let file_path = state.registry.redeem(&token).await.ok_or_else(not_found)?;
    let file = match tokio::fs::File::open(&file_path).await {
        Ok(file) => file,
        Err(e) => {
            tracing::debug!("Lost race for {}: {}", file_path.display(), e);
            state.registry.retire(&token).await;
            return Err(not_found());
        }
    };

    let stream = RetireOnDrop {
        inner: ReaderStream::new(file),
        registry: state.registry.clone(),
        token,
    };
    let body = Body::from_stream(stream);

    let name = file_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "download".to_string());

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&content_disposition(&name))?,
    );

    Ok((headers, body))
}

/// `attachment` with an ASCII fallback name plus the RFC 5987 UTF-8 form.
fn content_disposition(name: &str) -> String {
    let ascii: String = name
        .chars()
        .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { '_' })
        .map(|c| if c == '"' || c == '\\' { '_' } else { c })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        ascii,
        utf8_percent_encode(name, NON_ALPHANUMERIC)
    )
}

/// Response body that retires its token once hyper is done with it.
///
/// Dropped after the last chunk is written or when the client goes away,
/// so the record stays valid for the whole transfer.
struct RetireOnDrop<S> {
    inner: S,
    registry: Arc<DownloadRegistry>,
    token: String,
}

impl<S: Stream + Unpin> Stream for RetireOnDrop<S> {
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl<S> Drop for RetireOnDrop<S> {
    fn drop(&mut self) {
        let registry = self.registry.clone();
        let token = std::mem::take(&mut self.token);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { registry.retire(&token).await });
            }
            // The sweeper reaps it at expiry instead.
            Err(_) => tracing::warn!("No runtime to retire download token"),
        }
    }
}
