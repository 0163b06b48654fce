use std::{path::PathBuf, time::Duration};

use url::Url;

use crate::error::ApiError;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_YT_DLP_BIN: &str = "yt-dlp";
const OUTPUT_DIR_NAME: &str = "BlackMate";
const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 1;
const DEFAULT_FILE_RETENTION_SECONDS: u64 = 5 * 60;
const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub output_dir: PathBuf,
    pub yt_dlp_bin: PathBuf,
    pub max_concurrent_downloads: usize,
    pub file_retention: Duration,
    /// `None` disables the periodic sweep; the per-request sweep still runs.
    pub sweep_interval: Option<Duration>,
    pub download_timeout: Option<Duration>,
    pub public_base_url: Option<String>,
    /// Empty means any origin.
    pub allowed_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ApiError> {
        let output_dir = std::env::var("OUTPUT_DIR")
            .ok()
            .and_then(|value| non_empty(&value).map(PathBuf::from))
            .unwrap_or_else(default_output_dir);

        let yt_dlp_bin = std::env::var("YT_DLP_BIN")
            .ok()
            .and_then(|value| non_empty(&value).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_YT_DLP_BIN));

        let max_concurrent_downloads = read_usize_env("MAX_CONCURRENT_DOWNLOADS")
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_MAX_CONCURRENT_DOWNLOADS);

        let file_retention = Duration::from_secs(
            read_u64_env("FILE_RETENTION_SECONDS").unwrap_or(DEFAULT_FILE_RETENTION_SECONDS),
        );

        let sweep_interval = match read_u64_env("SWEEP_INTERVAL_SECONDS") {
            Some(0) => None,
            Some(seconds) => Some(Duration::from_secs(seconds)),
            None => Some(Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECONDS)),
        };

        let download_timeout = read_u64_env("YT_DLP_TIMEOUT_SECONDS")
            .filter(|value| *value > 0)
            .map(Duration::from_secs);

        let public_base_url = match std::env::var("PUBLIC_BASE_URL")
            .ok()
            .and_then(|value| non_empty(&value).map(ToString::to_string))
        {
            Some(value) => Some(normalize_base_url(&value).ok_or_else(|| {
                ApiError::internal(format!(
                    "Invalid PUBLIC_BASE_URL: {value}. Use a value like https://example.com"
                ))
            })?),
            None => None,
        };

        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .ok()
            .map(|value| parse_origins(&value))
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            bind_addr: resolve_bind_addr(),
            output_dir,
            yt_dlp_bin,
            max_concurrent_downloads,
            file_retention,
            sweep_interval,
            download_timeout,
            public_base_url,
            allowed_origins,
        })
    }

    /// Defaults with the output directory placed at `output_dir`.
    pub fn for_output_dir(output_dir: PathBuf) -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            output_dir,
            yt_dlp_bin: PathBuf::from(DEFAULT_YT_DLP_BIN),
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            file_retention: Duration::from_secs(DEFAULT_FILE_RETENTION_SECONDS),
            sweep_interval: Some(Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECONDS)),
            download_timeout: None,
            public_base_url: None,
            allowed_origins: Vec::new(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(OUTPUT_DIR_NAME)
}

fn read_usize_env(name: &str) -> Option<usize> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
}

fn read_u64_env(name: &str) -> Option<u64> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
}

fn resolve_bind_addr() -> String {
    if let Some(configured) = std::env::var("APP_ADDR")
        .ok()
        .and_then(|value| non_empty(&value).map(ToString::to_string))
    {
        return configured;
    }

    if let Some(port) = std::env::var("PORT")
        .ok()
        .and_then(|value| value.trim().parse::<u16>().ok())
    {
        return format!("0.0.0.0:{port}");
    }

    DEFAULT_BIND_ADDR.to_string()
}

fn parse_origins(value: &str) -> Result<Vec<String>, ApiError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(|origin| {
            normalize_origin(origin).ok_or_else(|| {
                ApiError::internal(format!(
                    "Invalid origin in ALLOWED_ORIGINS: {origin}. Use values like https://example.com"
                ))
            })
        })
        .collect()
}

/// `scheme://host[:port]` with the default port dropped, or `None` if `value`
/// carries a path, query or fragment.
pub fn normalize_origin(value: &str) -> Option<String> {
    let parsed = Url::parse(value).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let scheme = parsed.scheme();
    let default_port = match scheme {
        "http" => 80,
        "https" => 443,
        _ => return None,
    };
    let port = parsed.port();

    if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
        return None;
    }

    match port.filter(|explicit| *explicit != default_port) {
        Some(port) => Some(format!("{scheme}://{host}:{port}")),
        None => Some(format!("{scheme}://{host}")),
    }
}

fn normalize_base_url(value: &str) -> Option<String> {
    let parsed = Url::parse(value).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return None;
    }
    Some(parsed.as_str().trim_end_matches('/').to_string())
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
