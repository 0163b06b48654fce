//! Process plumbing around the external media tool.

use std::{
    ffi::OsStr,
    io::ErrorKind,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, BufReader},
    process::{Child, ChildStderr, Command},
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, warn};

use crate::{error::JobError, metadata::VideoInfo};

const FALLBACK_ERROR_MESSAGE: &str = "yt-dlp could not complete the operation";

#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
    timeout: Option<Duration>,
}

/// Result of a completed download run.
#[derive(Debug)]
pub struct RunOutput {
    pub stdout: String,
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>, timeout: Option<Duration>) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Runs the tool in info-only mode and parses its JSON.
    pub async fn fetch_video_info(&self, url: &str) -> Result<VideoInfo, JobError> {
        let args = ["--dump-json", "--no-playlist", "--no-warnings", url];
        let finished = self.execute(&args, JobError::MetadataFetch).await?;

        if !finished.status.success() {
            return Err(JobError::MetadataFetch(finished.failure_message()));
        }

        VideoInfo::from_dump(&finished.stdout)
    }

    /// Runs a download to completion.
    ///
    /// Stderr is drained line by line while the child runs so a chatty tool
    /// never stalls on a full pipe. A non-zero exit is a `Download` error.
    pub async fn run_download(&self, args: &[String]) -> Result<RunOutput, JobError> {
        let finished = self.execute(args, JobError::Download).await?;

        if !finished.status.success() {
            return Err(JobError::Download(finished.failure_message()));
        }

        Ok(RunOutput {
            stdout: String::from_utf8_lossy(&finished.stdout).into_owned(),
        })
    }

    /// Spawns the tool and waits for it to exit.
    ///
    /// The child is only ever killed by the configured time limit, and it is
    /// reaped before this returns. Callers that must not outlive the process
    /// have to keep this future alive.
    async fn execute<S: AsRef<OsStr>>(
        &self,
        args: &[S],
        to_error: fn(String) -> JobError,
    ) -> Result<Finished, JobError> {
        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|error| to_error(self.spawn_error_message(&error)))?;

        let drain = child.stderr.take().map(drain_stderr);

        let outcome = match self.timeout {
            Some(limit) => match timeout(limit, collect_child(&mut child)).await {
                Ok(result) => result,
                Err(_) => {
                    if let Err(error) = child.kill().await {
                        warn!("Failed to kill timed out yt-dlp process: {error}");
                    }
                    return Err(to_error(format!(
                        "yt-dlp exceeded the {}s time limit",
                        limit.as_secs()
                    )));
                }
            },
            None => collect_child(&mut child).await,
        };

        let last_stderr_line = match drain {
            Some(handle) => handle.await.ok().flatten(),
            None => None,
        };

        let (status, stdout) =
            outcome.map_err(|error| to_error(format!("failed to wait for yt-dlp: {error}")))?;

        Ok(Finished {
            status,
            stdout,
            last_stderr_line,
        })
    }

    fn spawn_error_message(&self, error: &std::io::Error) -> String {
        if error.kind() == ErrorKind::NotFound {
            format!(
                "{} is not installed. Install yt-dlp and restart the server.",
                self.program.display()
            )
        } else {
            format!("could not run {}: {error}", self.program.display())
        }
    }
}

struct Finished {
    status: ExitStatus,
    stdout: Vec<u8>,
    last_stderr_line: Option<String>,
}

impl Finished {
    fn failure_message(self) -> String {
        self.last_stderr_line
            .unwrap_or_else(|| match self.status.code() {
                Some(code) => format!("yt-dlp exited with status {code}"),
                None => FALLBACK_ERROR_MESSAGE.to_string(),
            })
    }
}

async fn collect_child(child: &mut Child) -> std::io::Result<(ExitStatus, Vec<u8>)> {
    let mut stdout = Vec::new();
    if let Some(mut pipe) = child.stdout.take() {
        pipe.read_to_end(&mut stdout).await?;
    }
    let status = child.wait().await?;
    Ok((status, stdout))
}

fn drain_stderr(stderr: ChildStderr) -> JoinHandle<Option<String>> {
    tokio::spawn(async move {
        let mut last_line = None;
        let mut lines = BufReader::new(stderr).lines();

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    debug!("yt-dlp: {line}");
                    last_line = Some(line.to_string());
                }
                Ok(None) => break,
                Err(error) => {
                    debug!("Stopped reading yt-dlp stderr: {error}");
                    break;
                }
            }
        }

        last_line
    })
}

/// Last non-empty stdout line, the path printed by `--print after_move:filepath`.
pub fn extract_printed_path(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn printed_path_is_last_line() {
        assert_eq!(
            extract_printed_path("/tmp/a.webm\n/tmp/a.mp3\n\n"),
            Some("/tmp/a.mp3".to_string())
        );
        assert_eq!(extract_printed_path(""), None);
    }

    #[tokio::test]
    async fn missing_program_is_a_metadata_error() {
        let ytdlp = YtDlp::new("/nonexistent/blackmate-yt-dlp", None);
        let error = ytdlp
            .fetch_video_info("https://youtu.be/abc")
            .await
            .unwrap_err();

        match error {
            JobError::MetadataFetch(message) => assert!(message.contains("not installed")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    mod with_fake_tool {
        use super::*;
        use crate::test_support::write_script;

        #[tokio::test]
        async fn fetches_video_info() {
            let dir = tempfile::tempdir().unwrap();
            let program = write_script(
                dir.path(),
                "yt-dlp",
                r#"echo '{"title":"Clip","duration":3661,"thumbnail":"t","description":"d"}'"#,
            );

            let info = YtDlp::new(program, None)
                .fetch_video_info("https://youtu.be/abc")
                .await
                .unwrap();
            assert_eq!(info.title, "Clip");
            assert_eq!(info.duration, "01:01:01");
        }

        #[tokio::test]
        async fn non_zero_exit_surfaces_stderr() {
            let dir = tempfile::tempdir().unwrap();
            let program = write_script(
                dir.path(),
                "yt-dlp",
                "echo 'ERROR: Video unavailable' >&2\nexit 1",
            );
            let ytdlp = YtDlp::new(program, None);

            let error = ytdlp
                .fetch_video_info("https://youtu.be/abc")
                .await
                .unwrap_err();
            assert!(matches!(error, JobError::MetadataFetch(ref m) if m == "ERROR: Video unavailable"));

            let error = ytdlp.run_download(&["x".to_string()]).await.unwrap_err();
            assert!(matches!(error, JobError::Download(ref m) if m == "ERROR: Video unavailable"));
        }

        #[tokio::test]
        async fn error_message_is_the_last_non_empty_stderr_line() {
            let dir = tempfile::tempdir().unwrap();
            let program = write_script(
                dir.path(),
                "yt-dlp",
                "printf '[youtube] abc: Downloading webpage\\n\\nERROR: [youtube] abc: Video unavailable\\n\\n  \\n' >&2\nexit 1",
            );

            let error = YtDlp::new(program, None).run_download(&[]).await.unwrap_err();
            assert!(matches!(
                error,
                JobError::Download(ref m) if m == "ERROR: [youtube] abc: Video unavailable"
            ));
        }

        #[tokio::test]
        async fn silent_failure_reports_the_exit_status() {
            let dir = tempfile::tempdir().unwrap();
            let program = write_script(dir.path(), "yt-dlp", "exit 3");

            let error = YtDlp::new(program, None)
                .fetch_video_info("https://youtu.be/abc")
                .await
                .unwrap_err();
            assert!(matches!(
                error,
                JobError::MetadataFetch(ref m) if m == "yt-dlp exited with status 3"
            ));
        }

        #[tokio::test]
        async fn drains_large_stderr_without_blocking() {
            let dir = tempfile::tempdir().unwrap();
            let program = write_script(
                dir.path(),
                "yt-dlp",
                "i=0\nwhile [ $i -lt 5000 ]; do echo \"[download] progress line $i of a long run\" >&2; i=$((i+1)); done\necho /tmp/out.mp4",
            );

            let output = YtDlp::new(program, None).run_download(&[]).await.unwrap();
            assert_eq!(extract_printed_path(&output.stdout).as_deref(), Some("/tmp/out.mp4"));
        }

        #[tokio::test]
        async fn timeout_aborts_the_run() {
            let dir = tempfile::tempdir().unwrap();
            let program = write_script(dir.path(), "yt-dlp", "sleep 5");

            let error = YtDlp::new(program, Some(Duration::from_millis(100)))
                .run_download(&[])
                .await
                .unwrap_err();
            assert!(matches!(error, JobError::Download(ref m) if m.contains("time limit")));
        }

        #[tokio::test]
        async fn timed_out_lookup_is_killed() {
            let dir = tempfile::tempdir().unwrap();
            let marker = dir.path().join("finished");
            let program = write_script(
                dir.path(),
                "yt-dlp",
                &format!("sleep 1\necho done > '{}'", marker.display()),
            );

            let error = YtDlp::new(program, Some(Duration::from_millis(100)))
                .fetch_video_info("https://youtu.be/abc")
                .await
                .unwrap_err();
            assert!(matches!(error, JobError::MetadataFetch(ref m) if m.contains("time limit")));

            tokio::time::sleep(Duration::from_millis(1500)).await;
            assert!(!marker.exists());
        }
    }
}
