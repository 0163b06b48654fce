//! HTTP front for yt-dlp: downloads a video or its audio track into a
//! short-lived output directory and serves the result back by name.

pub mod config;
pub mod downloader;
pub mod error;
pub mod janitor;
pub mod metadata;
pub mod routes;
pub mod sanitize;
pub mod slots;
pub mod ytdlp;

#[cfg(test)]
mod test_support;
