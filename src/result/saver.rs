//! Log persistence.
//!
//! A [`LogSaver`] turns log streams into durable [`LogFile`]s. Storage
//! mechanics belong to the saver; the pipeline only relies on the
//! started/save/ended contract described on [`LogSaver`].

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info};

use super::{LogDataType, LogFile};
use crate::build::BuildInfo;
use crate::config::LogSaverConfig;
use crate::log::{InputStreamSource, read_all};

/// Persists logs produced during an invocation.
///
/// The pipeline calls `invocation_started` before any listener sees the
/// invocation and `invocation_ended` after all of them, so a saver can
/// scope its storage to one invocation.
#[async_trait]
pub trait LogSaver: Send + Sync {
    /// An invocation testing `build` started.
    async fn invocation_started(&self, build: &BuildInfo);

    /// Persists the data of `source` and describes where it went.
    ///
    /// The source is not released; a saved copy is independent of it.
    async fn save_log_data(
        &self,
        name: &str,
        data_type: LogDataType,
        source: &dyn InputStreamSource,
    ) -> io::Result<LogFile>;

    /// The invocation ended.
    async fn invocation_ended(&self, elapsed: Duration);

    /// Fresh saver with the same settings, for a child invocation.
    fn clone_saver(&self) -> Arc<dyn LogSaver>;
}

/// Saves logs under `<root>/<build id>/<timestamp>_<id>/`.
///
/// The invocation directory also receives an `invocation.json` describing
/// the build.
///
/// # Example
///
/// ```no_run
/// use tradeflow::result::FileSystemLogSaver;
///
/// let saver = FileSystemLogSaver::new("/var/log/tradeflow")
///     .with_url_prefix("https://logs.example.com");
/// ```
pub struct FileSystemLogSaver {
    root_dir: PathBuf,
    url_prefix: Option<String>,
    invocation_dir: Mutex<Option<PathBuf>>,
}

impl FileSystemLogSaver {
    /// Creates a saver writing below `root_dir`.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            url_prefix: None,
            invocation_dir: Mutex::new(None),
        }
    }

    /// Creates a saver from configuration.
    pub fn from_config(config: &LogSaverConfig) -> Self {
        let saver = Self::new(config.root_dir.clone());
        match &config.url_prefix {
            Some(prefix) => saver.with_url_prefix(prefix.clone()),
            None => saver,
        }
    }

    /// Reports URLs as `<prefix>/<path relative to root>` instead of `file://` URLs.
    pub fn with_url_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.url_prefix = Some(prefix.into());
        self
    }

    /// Directory of the current invocation, once started.
    pub fn invocation_dir(&self) -> Option<PathBuf> {
        self.invocation_dir
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn url_for(&self, path: &Path) -> String {
        match (&self.url_prefix, path.strip_prefix(&self.root_dir)) {
            (Some(prefix), Ok(relative)) => format!(
                "{}/{}",
                prefix.trim_end_matches('/'),
                relative.to_string_lossy()
            ),
            _ => format!("file://{}", path.display()),
        }
    }

    async fn ensure_invocation_dir(&self) -> io::Result<PathBuf> {
        if let Some(dir) = self.invocation_dir() {
            return Ok(dir);
        }
        let dir = self.root_dir.join("unknown").join(unique_dir_name());
        tokio::fs::create_dir_all(&dir).await?;
        *self.invocation_dir.lock().unwrap_or_else(|e| e.into_inner()) = Some(dir.clone());
        Ok(dir)
    }
}

fn unique_dir_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}",
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S"),
        &id[..8]
    )
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl LogSaver for FileSystemLogSaver {
    async fn invocation_started(&self, build: &BuildInfo) {
        let dir = self
            .root_dir
            .join(sanitize(&build.build_id))
            .join(unique_dir_name());
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            error!("Failed to create log directory {}: {}", dir.display(), e);
            return;
        }
        match serde_json::to_vec_pretty(build) {
            Ok(json) => {
                if let Err(e) = tokio::fs::write(dir.join("invocation.json"), json).await {
                    error!("Failed to write build description: {}", e);
                }
            }
            Err(e) => error!("Failed to serialize build description: {}", e),
        }
        info!("Saving logs to {}", dir.display());
        *self.invocation_dir.lock().unwrap_or_else(|e| e.into_inner()) = Some(dir);
    }

    async fn save_log_data(
        &self,
        name: &str,
        data_type: LogDataType,
        source: &dyn InputStreamSource,
    ) -> io::Result<LogFile> {
        let dir = self.ensure_invocation_dir().await?;
        let data = read_all(source)?;
        let id = uuid::Uuid::new_v4().simple().to_string();
        let path = dir.join(format!(
            "{}_{}.{}",
            sanitize(name),
            &id[..8],
            data_type.file_ext()
        ));
        tokio::fs::write(&path, data).await?;
        debug!("Saved log {} to {}", name, path.display());
        let url = self.url_for(&path);
        Ok(LogFile::new(path, url))
    }

    async fn invocation_ended(&self, elapsed: Duration) {
        if let Some(dir) = self.invocation_dir() {
            debug!(
                "Invocation logs in {} complete after {:?}",
                dir.display(),
                elapsed
            );
        }
    }

    fn clone_saver(&self) -> Arc<dyn LogSaver> {
        Arc::new(Self {
            root_dir: self.root_dir.clone(),
            url_prefix: self.url_prefix.clone(),
            invocation_dir: Mutex::new(None),
        })
    }
}
