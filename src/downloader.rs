use std::{
    collections::HashSet,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    error::JobError,
    sanitize::{PLACEHOLDER_FILENAME, sanitize_filename},
    slots::DownloadSlots,
    ytdlp::{YtDlp, extract_printed_path},
};

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    #[default]
    Video,
    Audio,
}

impl MediaType {
    pub fn extension(self) -> &'static str {
        match self {
            MediaType::Video => "mp4",
            MediaType::Audio => "mp3",
        }
    }
}

/// Parses the optional maximum height, e.g. `"720"` or `"720p"`.
pub fn parse_quality(raw: Option<&str>) -> Result<Option<u32>, JobError> {
    let Some(value) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };

    let digits = value.strip_suffix(['p', 'P']).unwrap_or(value);
    digits
        .parse::<u32>()
        .ok()
        .filter(|height| *height > 0)
        .map(Some)
        .ok_or_else(|| JobError::Validation(format!("Invalid quality: {value}")))
}

pub fn video_format_selector(max_height: Option<u32>) -> String {
    match max_height {
        Some(height) => format!(
            "bestvideo[height<={height}][ext=mp4]+bestaudio[ext=m4a]/best[height<={height}][ext=mp4]/best"
        ),
        None => "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best".to_string(),
    }
}

/// Argument list for one download. The height ceiling only applies to video.
pub fn build_download_args(
    url: &str,
    output_path: &Path,
    media: MediaType,
    max_height: Option<u32>,
) -> Vec<String> {
    let mut args = match media {
        MediaType::Audio => vec![
            "-f".to_string(),
            "bestaudio".to_string(),
            "--extract-audio".to_string(),
            "--audio-format".to_string(),
            "mp3".to_string(),
        ],
        MediaType::Video => vec![
            "-f".to_string(),
            video_format_selector(max_height),
            "--merge-output-format".to_string(),
            "mp4".to_string(),
        ],
    };

    args.extend([
        "--newline".to_string(),
        "--embed-thumbnail".to_string(),
        "--embed-metadata".to_string(),
        "--no-playlist".to_string(),
        "--print".to_string(),
        "after_move:filepath".to_string(),
        "-o".to_string(),
        output_path.to_string_lossy().into_owned(),
        url.to_string(),
    ]);

    args
}

/// `{title}_{timestamp}.{ext}`, with `_{n}` before the extension for `attempt > 1`.
pub fn output_file_name(title: &str, timestamp: &str, media: MediaType, attempt: u32) -> String {
    let sanitized = sanitize_filename(title);
    let stem = if sanitized.is_empty() {
        PLACEHOLDER_FILENAME
    } else {
        sanitized.as_str()
    };
    let extension = media.extension();

    if attempt > 1 {
        format!("{stem}_{timestamp}_{attempt}.{extension}")
    } else {
        format!("{stem}_{timestamp}.{extension}")
    }
}

#[derive(Debug, Clone)]
pub struct DownloadedFile {
    pub path: PathBuf,
    pub file_name: String,
    pub size: u64,
}

/// Runs downloads into the output directory, at most `slots.capacity()` at a time.
#[derive(Debug, Clone)]
pub struct Downloader {
    ytdlp: YtDlp,
    slots: DownloadSlots,
    output_dir: PathBuf,
    in_flight: Arc<Mutex<HashSet<PathBuf>>>,
}

struct Reservation {
    path: PathBuf,
    in_flight: Arc<Mutex<HashSet<PathBuf>>>,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.path);
    }
}

impl Downloader {
    pub fn new(ytdlp: YtDlp, slots: DownloadSlots, output_dir: PathBuf) -> Self {
        Self {
            ytdlp,
            slots,
            output_dir,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn ytdlp(&self) -> &YtDlp {
        &self.ytdlp
    }

    pub fn slots(&self) -> &DownloadSlots {
        &self.slots
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Downloads `url` and returns the produced file.
    ///
    /// The job runs on its own task. Dropping the returned future does not
    /// stop it: the child runs to completion and the slot is held from before
    /// it is spawned until its output has been stat'ed. A failed run never
    /// yields a partial result.
    pub async fn download(
        &self,
        url: &str,
        title: &str,
        media: MediaType,
        max_height: Option<u32>,
    ) -> Result<DownloadedFile, JobError> {
        let job = self.clone();
        let url = url.to_string();
        let title = title.to_string();

        tokio::spawn(async move { job.run(&url, &title, media, max_height).await })
            .await
            .map_err(|error| JobError::Download(format!("download task failed: {error}")))?
    }

    async fn run(
        &self,
        url: &str,
        title: &str,
        media: MediaType,
        max_height: Option<u32>,
    ) -> Result<DownloadedFile, JobError> {
        let _permit = self.slots.acquire().await?;

        let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        let reservation = self.reserve_output(title, &timestamp, media).await;
        let args = build_download_args(url, &reservation.path, media, max_height);

        info!("Starting download of {url} into {:?}", reservation.path);
        let output = self.ytdlp.run_download(&args).await?;

        let printed_path = extract_printed_path(&output.stdout);
        let path = self
            .resolve_output(&reservation.path, printed_path.as_deref())
            .await;

        let metadata = tokio::fs::metadata(&path).await.map_err(|error| {
            warn!("yt-dlp exited cleanly but {:?} is not readable: {error}", path);
            JobError::FileStat(error.to_string())
        })?;
        if !metadata.is_file() {
            return Err(JobError::FileStat(format!("{} is not a file", path.display())));
        }
        let path = tokio::fs::canonicalize(&path).await.unwrap_or(path);

        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(ToString::to_string)
            .ok_or_else(|| JobError::FileStat(format!("invalid file name: {}", path.display())))?;

        info!("Finished download {file_name} ({} bytes)", metadata.len());
        Ok(DownloadedFile {
            path,
            file_name,
            size: metadata.len(),
        })
    }

    async fn reserve_output(&self, title: &str, timestamp: &str, media: MediaType) -> Reservation {
        let mut attempt = 1;
        loop {
            let name = output_file_name(title, timestamp, media, attempt);
            let path = self.output_dir.join(name);
            let exists = tokio::fs::try_exists(&path).await.unwrap_or(false);

            if !exists {
                let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
                if in_flight.insert(path.clone()) {
                    return Reservation {
                        path,
                        in_flight: Arc::clone(&self.in_flight),
                    };
                }
            }

            attempt += 1;
        }
    }

    /// Prefers the path the tool printed when it resolves inside the output directory.
    async fn resolve_output(&self, requested: &Path, printed: Option<&str>) -> PathBuf {
        let Some(printed) = printed else {
            return requested.to_path_buf();
        };

        let candidate = PathBuf::from(printed);
        let canonical_dir = match tokio::fs::canonicalize(&self.output_dir).await {
            Ok(dir) => dir,
            Err(_) => return requested.to_path_buf(),
        };

        match tokio::fs::canonicalize(&candidate).await {
            Ok(canonical) if canonical.starts_with(&canonical_dir) => canonical,
            Ok(canonical) => {
                warn!("Ignoring yt-dlp output outside the output directory: {:?}", canonical);
                requested.to_path_buf()
            }
            Err(error) => {
                if error.kind() != ErrorKind::NotFound {
                    warn!("Could not resolve yt-dlp output {:?}: {error}", candidate);
                }
                requested.to_path_buf()
            }
        }
    }
}
