use std::{
    io::ErrorKind,
    path::{Path as FsPath, PathBuf},
    sync::Arc,
};

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State, rejection::JsonRejection},
    http::{
        HeaderMap, HeaderValue, Method,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, HOST},
    },
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, info, warn};

use crate::{
    config::{Config, normalize_origin},
    downloader::{Downloader, MediaType, parse_quality},
    error::{ApiError, JobError},
    janitor::Janitor,
    metadata::VideoInfo,
    sanitize::sanitize_ascii_filename,
    slots::DownloadSlots,
    ytdlp::YtDlp,
};

/// Substrings that mark a URL as belonging to a supported video platform.
const SUPPORTED_URL_MARKERS: [&str; 2] = ["youtube.com/", "youtu.be/"];

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub downloader: Arc<Downloader>,
    pub janitor: Janitor,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let ytdlp = YtDlp::new(config.yt_dlp_bin.clone(), config.download_timeout);
        let slots = DownloadSlots::new(config.max_concurrent_downloads);
        let downloader = Downloader::new(ytdlp, slots, config.output_dir.clone());
        let janitor = Janitor::new(config.output_dir.clone(), config.file_retention);

        Self {
            config: Arc::new(config),
            downloader: Arc::new(downloader),
            janitor,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    #[serde(default, rename = "type")]
    pub media_type: MediaType,
    #[serde(default)]
    pub quality: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DownloadResult {
    pub size: u64,
    pub url: String,
    pub actual_file_name: String,
    pub video_info: VideoInfo,
}

pub fn router(state: AppState) -> Result<Router, ApiError> {
    let cors = build_cors_layer(&state.config.allowed_origins)?;

    Ok(Router::new()
        .route("/health", get(health))
        .route("/generate-url", post(generate_download_url))
        .route("/download/{file_name}", get(serve_file))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http()))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn generate_download_url(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> Result<Json<DownloadResult>, ApiError> {
    let Json(payload) = payload.map_err(|rejection| {
        debug!("Rejected download request body: {rejection}");
        ApiError::bad_request("Invalid input")
    })?;

    run_job(&state, &headers, payload).await.map(Json).map_err(|job_error| {
        match &job_error {
            JobError::Validation(_) | JobError::NotFound => {
                warn!("Download request rejected: {job_error}")
            }
            _ => error!("Download job failed: {job_error}"),
        }
        ApiError::from(job_error)
    })
}

async fn run_job(
    state: &AppState,
    headers: &HeaderMap,
    payload: DownloadRequest,
) -> Result<DownloadResult, JobError> {
    let url = payload.url.trim();
    if !is_supported_video_url(url) {
        return Err(JobError::Validation("Invalid YouTube URL".to_string()));
    }
    let max_height = match payload.media_type {
        MediaType::Video => parse_quality(payload.quality.as_deref())?,
        MediaType::Audio => None,
    };

    let video_info = state.downloader.ytdlp().fetch_video_info(url).await?;

    tokio::fs::create_dir_all(state.downloader.output_dir())
        .await
        .map_err(|error| {
            JobError::Download(format!("failed to create output directory: {error}"))
        })?;
    let swept = state.janitor.sweep().await;
    if swept > 0 {
        info!("Removed {swept} expired file(s) before download");
    }

    let file = state
        .downloader
        .download(url, &video_info.title, payload.media_type, max_height)
        .await?;

    state.janitor.schedule_removal(file.path.clone()).await;

    Ok(DownloadResult {
        size: file.size,
        url: download_url(&state.config, headers, &file.file_name),
        actual_file_name: file.file_name,
        video_info,
    })
}

async fn serve_file(
    State(state): State<AppState>,
    Path(file_name): Path<String>,
) -> Result<Response, ApiError> {
    let Some(path) = resolve_served_path(state.downloader.output_dir(), &file_name) else {
        warn!("Rejected download of {file_name:?}");
        return Err(ApiError::not_found());
    };

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(error) if error.kind() == ErrorKind::NotFound => return Err(ApiError::not_found()),
        Err(error) => {
            return Err(ApiError::internal(format!("Failed to open file: {error}")));
        }
    };
    let metadata = file
        .metadata()
        .await
        .map_err(|error| ApiError::internal(format!("Failed to read file info: {error}")))?;
    if !metadata.is_file() {
        return Err(ApiError::not_found());
    }

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static(content_type_for_filename(&file_name)),
    );
    headers.insert(CONTENT_LENGTH, HeaderValue::from(metadata.len()));
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_str(&build_content_disposition(&file_name))
            .map_err(|_| ApiError::internal("Failed to build download header."))?,
    );

    info!("Serving {file_name} ({} bytes)", metadata.len());
    let body = Body::from_stream(ReaderStream::new(file));
    Ok((headers, body).into_response())
}

pub fn is_supported_video_url(url: &str) -> bool {
    SUPPORTED_URL_MARKERS
        .iter()
        .any(|marker| url.contains(marker))
}

/// Joins `file_name` onto `output_dir` only when it is a single plain component.
fn resolve_served_path(output_dir: &FsPath, file_name: &str) -> Option<PathBuf> {
    let candidate = FsPath::new(file_name);
    let is_plain = !file_name.is_empty()
        && !file_name.contains(['/', '\\'])
        && candidate.file_name().is_some_and(|name| name == file_name);

    is_plain.then(|| output_dir.join(candidate))
}

fn download_url(config: &Config, headers: &HeaderMap, file_name: &str) -> String {
    let base = match &config.public_base_url {
        Some(base) => base.clone(),
        None => {
            let host = headers
                .get(HOST)
                .and_then(|value| value.to_str().ok())
                .filter(|value| !value.trim().is_empty())
                .unwrap_or(config.bind_addr.as_str());
            format!("http://{host}")
        }
    };

    format!("{base}/download/{}", urlencoding::encode(file_name))
}

pub fn content_type_for_filename(filename: &str) -> &'static str {
    let extension = FsPath::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "wav" => "audio/wav",
        "ogg" | "opus" => "audio/ogg",
        "flac" => "audio/flac",
        _ => "application/octet-stream",
    }
}

fn build_content_disposition(filename: &str) -> String {
    let safe_ascii = sanitize_ascii_filename(filename);
    format!(
        "attachment; filename=\"{safe_ascii}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}

fn build_cors_layer(allowed_origins: &[String]) -> Result<CorsLayer, ApiError> {
    let allow_origin = if allowed_origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        let allowed = allowed_origins
            .iter()
            .map(|origin| {
                HeaderValue::from_str(origin).map_err(|_| {
                    ApiError::internal(format!("Invalid origin in ALLOWED_ORIGINS: {origin}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        info!("CORS allow-list loaded with {} origin(s)", allowed.len());
        AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            let normalized = origin.to_str().ok().and_then(normalize_origin);
            normalized
                .as_deref()
                .is_some_and(|value| allowed.iter().any(|allowed| allowed == value))
        })
    };

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers([CONTENT_DISPOSITION, CONTENT_LENGTH]))
}
