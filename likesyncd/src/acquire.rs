use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use crate::sync::status::FailureReason;

#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("no result found: {0}")]
    NoResult(String),
    #[error("download failed: {0}")]
    Network(String),
    #[error("conversion failed: {0}")]
    Conversion(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl AcquisitionError {
    pub fn reason(&self) -> FailureReason {
        match self {
            AcquisitionError::NoResult(_) => FailureReason::NoResultFound,
            AcquisitionError::Network(_) | AcquisitionError::Io(_) => {
                FailureReason::NetworkFailure
            }
            AcquisitionError::Conversion(_) => FailureReason::ConversionFailure,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquireRequest {
    pub query: String,
    pub output_dir: PathBuf,
    /// Sanitized `"<title> - <artist>"` stem.
    pub base_name: String,
    pub format: String,
}

impl AcquireRequest {
    pub fn target_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", self.base_name, self.format))
    }
}

/// Lets a backend announce that the download is done and transcoding has
/// started. Only the first call has an effect.
#[derive(Clone)]
pub struct ConversionSignal {
    inner: Arc<SignalInner>,
}

struct SignalInner {
    fired: AtomicBool,
    notify: Box<dyn Fn() + Send + Sync>,
}

impl ConversionSignal {
    pub fn new(notify: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(SignalInner {
                fired: AtomicBool::new(false),
                notify: Box::new(notify),
            }),
        }
    }

    pub fn noop() -> Self {
        Self::new(|| {})
    }

    pub fn fire(&self) {
        if !self.inner.fired.swap(true, Ordering::SeqCst) {
            (self.inner.notify)();
        }
    }

    pub fn has_fired(&self) -> bool {
        self.inner.fired.load(Ordering::SeqCst)
    }
}

/// Turns a search query into a local audio file at `request.target_path()`.
pub trait TrackAcquirer: Send + Sync + 'static {
    fn acquire(
        &self,
        request: &AcquireRequest,
        converting: &ConversionSignal,
    ) -> impl Future<Output = Result<PathBuf, AcquisitionError>> + Send;
}

/// Runs `yt-dlp` against its search extractor and extracts audio with ffmpeg.
/// The child is killed if the returned future is dropped.
#[derive(Debug, Clone)]
pub struct YtDlpAcquirer {
    binary: PathBuf,
    audio_quality: String,
}

impl YtDlpAcquirer {
    pub fn new(binary: impl Into<PathBuf>, audio_quality: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            audio_quality: audio_quality.into(),
        }
    }

    fn command(&self, request: &AcquireRequest) -> Command {
        let template = request
            .output_dir
            .join(format!("{}.%(ext)s", request.base_name));
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--no-playlist")
            .arg("--newline")
            .arg("--no-progress")
            .args(["-f", "bestaudio/best"])
            .arg("--extract-audio")
            .args(["--audio-format", request.format.as_str()])
            .args(["--audio-quality", self.audio_quality.as_str()])
            .arg("-o")
            .arg(template)
            .arg(format!("ytsearch1:{}", request.query))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl TrackAcquirer for YtDlpAcquirer {
    async fn acquire(
        &self,
        request: &AcquireRequest,
        converting: &ConversionSignal,
    ) -> Result<PathBuf, AcquisitionError> {
        tokio::fs::create_dir_all(&request.output_dir).await?;
        let mut child = self.command(request).spawn().map_err(|err| {
            AcquisitionError::Network(format!(
                "failed to start {}: {err}",
                self.binary.display()
            ))
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("yt-dlp stdout was not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("yt-dlp stderr was not captured"))?;

        let read_stdout = async {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                if line.starts_with("[ExtractAudio]") {
                    converting.fire();
                }
                tracing::trace!(target: "likesyncd::yt_dlp", "{line}");
            }
            Ok::<_, io::Error>(())
        };
        let read_stderr = async {
            let mut buf = String::new();
            stderr.read_to_string(&mut buf).await?;
            Ok::<_, io::Error>(buf)
        };
        let (stdout_done, stderr_text) = tokio::join!(read_stdout, read_stderr);
        stdout_done?;
        let stderr_text = stderr_text?;

        let status = child.wait().await?;
        if !status.success() {
            return Err(classify_failure(&stderr_text));
        }

        let target = request.target_path();
        if !tokio::fs::try_exists(&target).await? {
            return Err(AcquisitionError::Conversion(format!(
                "expected output {} is missing",
                target.display()
            )));
        }
        Ok(target)
    }
}

fn classify_failure(stderr: &str) -> AcquisitionError {
    let detail = stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("yt-dlp exited with an error")
        .trim()
        .to_string();
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("no video results") || lower.contains("no results") {
        AcquisitionError::NoResult(detail)
    } else if lower.contains("postprocessing") || lower.contains("ffmpeg") {
        AcquisitionError::Conversion(detail)
    } else {
        AcquisitionError::Network(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn request(dir: &std::path::Path) -> AcquireRequest {
        AcquireRequest {
            query: "X Y official audio".into(),
            output_dir: dir.to_path_buf(),
            base_name: "X - Y".into(),
            format: "mp3".into(),
        }
    }

    #[test]
    fn target_path_joins_base_name_and_format() {
        let req = request(std::path::Path::new("/music"));
        assert_eq!(req.target_path(), PathBuf::from("/music/X - Y.mp3"));
    }

    #[test]
    fn classifies_yt_dlp_errors() {
        assert!(matches!(
            classify_failure("ERROR: [youtube:search] X: No video results\n"),
            AcquisitionError::NoResult(_)
        ));
        assert!(matches!(
            classify_failure("ERROR: Postprocessing: ffprobe and ffmpeg not found"),
            AcquisitionError::Conversion(_)
        ));
        let stderr = "WARNING: retrying\nERROR: Unable to download webpage: timed out\n\n";
        match classify_failure(stderr) {
            AcquisitionError::Network(detail) => {
                assert_eq!(detail, "ERROR: Unable to download webpage: timed out")
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn conversion_signal_notifies_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let signal = ConversionSignal::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(!signal.has_fired());
        signal.fire();
        signal.clone().fire();
        assert!(signal.has_fired());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_binary_is_a_network_failure() {
        let dir = tempfile::tempdir().unwrap();
        let acquirer = YtDlpAcquirer::new(dir.path().join("no-such-yt-dlp"), "192K");
        let err = acquirer
            .acquire(&request(dir.path()), &ConversionSignal::noop())
            .await
            .unwrap_err();
        assert_eq!(err.reason(), FailureReason::NetworkFailure);
    }

    #[cfg(unix)]
    fn fake_binary(dir: &std::path::Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-yt-dlp");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_run_signals_conversion_and_returns_target() {
        let bin_dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let binary = fake_binary(
            bin_dir.path(),
            r#"out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-o" ]; then out="$2"; fi
  shift
done
file=$(printf '%s' "$out" | sed 's/%(ext)s/mp3/')
echo "[ExtractAudio] Destination: $file"
printf 'ID3' > "$file""#,
        );
        let signal = ConversionSignal::noop();

        let path = YtDlpAcquirer::new(binary, "192K")
            .acquire(&request(out_dir.path()), &signal)
            .await
            .unwrap();

        assert_eq!(path, out_dir.path().join("X - Y.mp3"));
        assert!(path.exists());
        assert!(signal.has_fired());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_search_maps_to_no_result() {
        let bin_dir = tempfile::tempdir().unwrap();
        let binary = fake_binary(
            bin_dir.path(),
            "echo 'ERROR: [youtube:search] query: No video results' >&2\nexit 1",
        );

        let err = YtDlpAcquirer::new(binary, "192K")
            .acquire(&request(bin_dir.path()), &ConversionSignal::noop())
            .await
            .unwrap_err();

        assert_eq!(err.reason(), FailureReason::NoResultFound);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn clean_exit_without_output_is_a_conversion_failure() {
        let bin_dir = tempfile::tempdir().unwrap();
        let binary = fake_binary(bin_dir.path(), "exit 0");

        let err = YtDlpAcquirer::new(binary, "192K")
            .acquire(&request(bin_dir.path()), &ConversionSignal::noop())
            .await
            .unwrap_err();

        assert_eq!(err.reason(), FailureReason::ConversionFailure);
    }
}
