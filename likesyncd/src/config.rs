use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;

use crate::sync::backoff::Backoff;
use crate::sync::coordinator::CoordinatorConfig;
use crate::sync::session::SyncOptions;

const DEFAULT_LIBRARY_DIR_NAME: &str = "likesync";
const DEFAULT_CONCURRENCY: u64 = 3;
const DEFAULT_ITEM_TIMEOUT_SECS: u64 = 600;
const DEFAULT_FETCH_ATTEMPTS: u64 = 4;
const DEFAULT_AUDIO_FORMAT: &str = "mp3";
const DEFAULT_AUDIO_QUALITY: &str = "192K";
const DEFAULT_YTDLP_BIN: &str = "yt-dlp";

#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub token: Option<String>,
    pub api_base: Option<String>,
    pub library_dir: PathBuf,
    pub db_path: PathBuf,
    pub concurrency: usize,
    pub item_timeout: Duration,
    pub retry_rounds: u64,
    pub fetch_attempts: u32,
    pub protect_empty_remote: bool,
    pub use_trash: bool,
    pub ytdlp_bin: PathBuf,
    pub audio_format: String,
    pub audio_quality: String,
}

impl SyncConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        Ok(Self::from_vars(|name| std::env::var(name).ok(), &home))
    }

    pub fn from_vars(var: impl Fn(&str) -> Option<String>, home: &Path) -> Self {
        let non_empty = |name: &str| var(name).filter(|value| !value.trim().is_empty());

        let library_dir = non_empty("LIKESYNC_LIBRARY_DIR")
            .map(|value| expand_with_home(&value, home))
            .unwrap_or_else(|| default_library_dir(home));
        let db_path = non_empty("LIKESYNC_DB_PATH")
            .map(|value| expand_with_home(&value, home))
            .unwrap_or_else(|| default_db_path(home));
        let ytdlp_bin = non_empty("LIKESYNC_YTDLP_BIN")
            .map(|value| expand_with_home(&value, home))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_YTDLP_BIN));

        Self {
            token: non_empty("LIKESYNC_TOKEN"),
            api_base: non_empty("LIKESYNC_API_BASE"),
            library_dir,
            db_path,
            concurrency: read_u64_env(&var, "LIKESYNC_CONCURRENCY", DEFAULT_CONCURRENCY) as usize,
            item_timeout: Duration::from_secs(read_u64_env(
                &var,
                "LIKESYNC_ITEM_TIMEOUT_SECS",
                DEFAULT_ITEM_TIMEOUT_SECS,
            )),
            retry_rounds: read_u64_env(&var, "LIKESYNC_RETRY_ROUNDS", 0),
            fetch_attempts: read_u64_env(&var, "LIKESYNC_FETCH_ATTEMPTS", DEFAULT_FETCH_ATTEMPTS)
                .min(u64::from(u32::MAX)) as u32,
            protect_empty_remote: read_bool_env(&var, "LIKESYNC_PROTECT_EMPTY_REMOTE", false),
            use_trash: read_bool_env(&var, "LIKESYNC_USE_TRASH", false),
            ytdlp_bin,
            audio_format: non_empty("LIKESYNC_AUDIO_FORMAT")
                .unwrap_or_else(|| DEFAULT_AUDIO_FORMAT.to_string()),
            audio_quality: non_empty("LIKESYNC_AUDIO_QUALITY")
                .unwrap_or_else(|| DEFAULT_AUDIO_QUALITY.to_string()),
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            library_root: self.library_dir.clone(),
            audio_format: self.audio_format.clone(),
            item_timeout: self.item_timeout,
        }
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            concurrency: self.concurrency,
            fetch_attempts: self.fetch_attempts,
            backoff: Backoff::default(),
            protect_empty_remote: self.protect_empty_remote,
            use_trash: self.use_trash,
        }
    }
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn default_library_dir(home: &Path) -> PathBuf {
    dirs::audio_dir()
        .unwrap_or_else(|| home.join("Music"))
        .join(DEFAULT_LIBRARY_DIR_NAME)
}

fn default_db_path(home: &Path) -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| home.join(".local").join("share"))
        .join("likesync")
        .join("index.db")
}

fn read_u64_env(var: &impl Fn(&str) -> Option<String>, name: &str, default: u64) -> u64 {
    var(name)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn read_bool_env(var: &impl Fn(&str) -> Option<String>, name: &str, default: bool) -> bool {
    var(name)
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}
