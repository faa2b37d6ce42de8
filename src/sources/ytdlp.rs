use futures::{
    stream::{self, BoxStream},
    TryStreamExt,
};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{fuse_on_error, JsonType, ResolveError, Song};

/// How much work the backend does per playlist entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractMode {
    /// Playlist entries carry page urls only; stream urls are resolved later.
    Flat,
    /// Every entry is resolved down to its stream url.
    Full,
}

/// Network or availability failure reported by the backend.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct DownloadError {
    pub message: String,
}

impl DownloadError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Picks the last `ERROR:` line of yt-dlp's stderr, falling back to the
    /// whole trimmed output.
    pub fn from_stderr(stderr: &str) -> Self {
        let message = stderr
            .lines()
            .rev()
            .find_map(|line| line.trim().strip_prefix("ERROR:"))
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .unwrap_or_else(|| stderr.trim());

        if message.is_empty() {
            Self::new("yt-dlp failed without an error message")
        } else {
            Self::new(message)
        }
    }
}

impl From<DownloadError> for ResolveError {
    fn from(error: DownloadError) -> Self {
        ResolveError::Resolution {
            message: error.message,
        }
    }
}

/// Blocking media-info extraction. Implementations are moved onto the
/// blocking pool, so adapters require them to be `Send + Sync + 'static`.
#[cfg_attr(test, mockall::automock)]
pub trait Extractor {
    fn extract_info(&self, query: &str, mode: ExtractMode) -> Result<Value, DownloadError>;
}

/// Extraction through the `yt-dlp` executable.
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: String,
}

impl YtDlp {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command_args(query: &str, mode: ExtractMode) -> Vec<&str> {
        let mut args = vec![
            "--dump-single-json",
            "--no-download",
            "--format",
            "bestaudio/best",
            "--default-search",
            "auto",
            "--no-check-certificate",
            "--source-address",
            "0.0.0.0",
            "--quiet",
            "--no-warnings",
        ];

        if mode == ExtractMode::Flat {
            args.push("--flat-playlist");
        }

        // Que una búsqueda con '-' no se tome como opción
        args.push("--");
        args.push(query);
        args
    }
}

impl Default for YtDlp {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

impl Extractor for YtDlp {
    fn extract_info(&self, query: &str, mode: ExtractMode) -> Result<Value, DownloadError> {
        let output = std::process::Command::new(&self.program)
            .args(Self::command_args(query, mode))
            .output()
            .map_err(|e| DownloadError::new(format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("yt-dlp falló para '{}': {}", query, stderr.trim());
            return Err(DownloadError::from_stderr(&stderr));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| DownloadError::new(format!("yt-dlp returned invalid JSON: {}", e)))
    }
}

/// Turns backend results into songs.
pub struct ExtractionAdapter<E> {
    extractor: Arc<E>,
}

impl<E> ExtractionAdapter<E>
where
    E: Extractor + Send + Sync + 'static,
{
    pub fn new(extractor: Arc<E>) -> Self {
        Self { extractor }
    }

    /// Resolves a url or search text. The backend runs on the blocking pool;
    /// songs are yielded in entry order and the first malformed entry ends
    /// the stream with an error.
    pub fn resolve(&self, query: String, info_only: bool) -> BoxStream<'static, Result<Song, ResolveError>> {
        let extractor = Arc::clone(&self.extractor);
        let mode = if info_only {
            ExtractMode::Flat
        } else {
            ExtractMode::Full
        };

        let songs = stream::once(async move {
            debug!("🔍 Extrayendo '{}' ({:?})", query, mode);
            let info = tokio::task::spawn_blocking(move || extractor.extract_info(&query, mode))
                .await
                .map_err(|e| ResolveError::Resolution {
                    message: format!("extraction task failed: {}", e),
                })??;

            let songs = songs_from_info(&info);
            info!("📋 La extracción produjo {} entradas", songs.len());
            Ok::<_, ResolveError>(stream::iter(songs))
        })
        .try_flatten();

        fuse_on_error(songs)
    }
}

/// Normalizes a backend result. The returned list ends with the first error,
/// if any.
fn songs_from_info(info: &Value) -> Vec<Result<Song, ResolveError>> {
    let shape = |field: &str, expected: JsonType, actual: Option<&Value>| {
        ResolveError::shape(field, expected, actual, None, info.to_string())
    };

    let Some(object) = info.as_object() else {
        return vec![Err(shape("<info>", JsonType::Object, Some(info)))];
    };

    if let Some(entries) = object.get("entries").and_then(Value::as_array) {
        let mut songs = Vec::with_capacity(entries.len());
        for entry in entries {
            match song_from_entry(entry) {
                Some(song) => songs.push(Ok(song)),
                None => {
                    songs.push(Err(shape("url", JsonType::String, entry.get("url"))));
                    break;
                }
            }
        }
        return songs;
    }

    match object.get("url") {
        None | Some(Value::Null) => vec![Err(shape("entries or url", JsonType::List, object.get("entries")))],
        Some(url) => match song_from_entry(info) {
            Some(song) => vec![Ok(song)],
            None => vec![Err(shape("url", JsonType::String, Some(url)))],
        },
    }
}

fn song_from_entry(entry: &Value) -> Option<Song> {
    let url = entry.get("url")?.as_str()?;
    let title = entry.get("title").and_then(Value::as_str).map(str::to_owned);
    let duration = entry.get("duration").and_then(|duration| {
        duration
            .as_u64()
            .or_else(|| duration.as_f64().filter(|secs| *secs >= 0.0).map(|secs| secs as u64))
    });

    Some(Song::new(title, url, duration))
}
