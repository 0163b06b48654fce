#![allow(dead_code)]

use std::path::{Path, PathBuf};

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, Response},
};
use blackmate::{
    config::Config,
    routes::{AppState, router},
};
use tempfile::TempDir;

#[path = "../../src/test_support.rs"]
mod support;

pub use support::FAKE_DOWNLOAD_SCRIPT;
#[cfg(unix)]
pub use support::write_script;

pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    pub output_dir: PathBuf,
    _dir: TempDir,
}

/// Router over a fresh output directory, with `tool` as the yt-dlp executable.
pub fn test_app(tool: impl FnOnce(&Path) -> PathBuf) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let output_dir = dir.path().join("BlackMate");
    std::fs::create_dir_all(&output_dir).unwrap();

    let mut config = Config::for_output_dir(output_dir.clone());
    config.yt_dlp_bin = tool(dir.path());

    let state = AppState::new(config);
    let app = router(state.clone()).unwrap();

    TestApp {
        app,
        state,
        output_dir,
        _dir: dir,
    }
}

pub fn json_request(uri: &str, body: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
