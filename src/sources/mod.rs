//! # Sources Module
//!
//! Song resolution for the bot: turns whatever a user typed into `/play`
//! into a lazy stream of playable [`Song`] records.
//!
//! ## Architecture
//!
//! ### [`resolver`] - Song Resolver
//! - Classifies the request (Spotify playlist, Spotify track, anything else)
//! - Re-enters itself with an `"artists - title"` search per Spotify track
//!
//! ### [`spotify`] - Spotify Metadata Client
//! - Client-credentials authentication with in-memory token reuse
//! - Track lookup and lazily paged playlist streaming
//!
//! ### [`ytdlp`] - Extraction Backend
//! - Runs `yt-dlp` on the blocking pool
//! - Normalizes flat and nested results into songs
//!
//! Every layer validates the third-party JSON it receives and reports
//! problems through [`ResolveError`].

pub mod error;
pub mod resolver;
pub mod spotify;
pub mod ytdlp;

use futures::{
    future,
    stream::{BoxStream, Stream},
    StreamExt,
};
use std::fmt;

pub use error::{JsonType, ResolveError};
pub use resolver::SongResolver;
pub use spotify::{SpotifyClient, SpotifyConfig, Track};
pub use ytdlp::{DownloadError, ExtractMode, ExtractionAdapter, Extractor, YtDlp};

/// A resolved, playable unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Song {
    pub title: Option<String>,
    /// Stream locator. In flat mode this is the page url of the entry, which
    /// gets resolved again right before playback.
    pub url: String,
    /// Length in whole seconds.
    pub duration: Option<u64>,
}

impl Song {
    pub fn new(title: Option<String>, url: impl Into<String>, duration: Option<u64>) -> Self {
        Self {
            title,
            url: url.into(),
            duration,
        }
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("Unknown title")
    }
}

impl fmt::Display for Song {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.duration {
            Some(seconds) => write!(f, "{} ({})", self.display_title(), format_duration(seconds))?,
            None => write!(f, "{}", self.display_title())?,
        }
        write!(f, "\n<{}>", self.url)
    }
}

/// Formats seconds as `H:MM:SS`, hours always included.
pub fn format_duration(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}:{:02}:{:02}", hours, minutes, seconds)
}

/// Ends the stream right after the first error it yields.
pub(crate) fn fuse_on_error<'a, T, S>(stream: S) -> BoxStream<'a, Result<T, ResolveError>>
where
    T: Send + 'a,
    S: Stream<Item = Result<T, ResolveError>> + Send + 'a,
{
    stream
        .scan(false, |failed, item| {
            if *failed {
                return future::ready(None);
            }
            *failed = item.is_err();
            future::ready(Some(item))
        })
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_duration_formatting() {
        assert_eq!(format_duration(125), "0:02:05");
        assert_eq!(format_duration(0), "0:00:00");
        assert_eq!(format_duration(3600 + 61), "1:01:01");
    }

    #[test]
    fn test_song_display() {
        let song = Song::new(Some("Intro".into()), "https://example.com/a", Some(125));
        assert_eq!(song.to_string(), "Intro (0:02:05)\n<https://example.com/a>");

        let untitled = Song::new(None, "https://example.com/b", None);
        assert_eq!(untitled.to_string(), "Unknown title\n<https://example.com/b>");
    }

    #[tokio::test]
    async fn test_fuse_on_error_stops_after_first_error() {
        let items = vec![
            Ok(1),
            Err(ResolveError::Resolution {
                message: "gone".into(),
            }),
            Ok(2),
        ];
        let collected: Vec<_> = fuse_on_error(stream::iter(items)).collect().await;

        assert_eq!(collected.len(), 2);
        assert!(matches!(collected[0], Ok(1)));
        assert!(matches!(collected[1], Err(ResolveError::Resolution { .. })));
    }
}
