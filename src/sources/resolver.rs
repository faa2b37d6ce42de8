use futures::{
    stream::{self, BoxStream},
    StreamExt, TryStreamExt,
};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use super::{
    fuse_on_error, ExtractionAdapter, Extractor, ResolveError, Song, SpotifyClient, SpotifyConfig,
    Track,
};

pub const SPOTIFY_HOST: &str = "open.spotify.com";

/// What a Spotify web link points at.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SpotifyLink {
    Playlist(String),
    Track(String),
    /// Albums, artists, localized paths and anything else we do not follow.
    Unsupported,
}

impl SpotifyLink {
    /// `None` when the query is not a Spotify web link at all.
    fn parse(query: &str) -> Option<Self> {
        let url = Url::parse(query).ok()?;
        if url.host_str() != Some(SPOTIFY_HOST) {
            return None;
        }

        let segments: Vec<&str> = url
            .path_segments()
            .map(|segments| segments.filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        Some(match segments.as_slice() {
            ["playlist", id, ..] => SpotifyLink::Playlist(id.to_string()),
            ["track", id, ..] => SpotifyLink::Track(id.to_string()),
            _ => SpotifyLink::Unsupported,
        })
    }
}

/// Resolves user requests into songs.
///
/// One resolver is built per request and dropped afterwards, which closes the
/// Spotify connection pool whichever way the request ended.
pub struct SongResolver<E> {
    spotify: SpotifyClient,
    extraction: ExtractionAdapter<E>,
}

impl<E> SongResolver<E>
where
    E: Extractor + Send + Sync + 'static,
{
    pub fn new(spotify: SpotifyClient, extraction: ExtractionAdapter<E>) -> Self {
        Self { spotify, extraction }
    }

    pub fn from_config(spotify: SpotifyConfig, extractor: Arc<E>) -> Result<Self, ResolveError> {
        Ok(Self::new(
            SpotifyClient::new(spotify)?,
            ExtractionAdapter::new(extractor),
        ))
    }

    /// Lazily resolves `query` into songs.
    ///
    /// - Spotify playlist links resolve each track's `"artists - title"`
    ///   search, last track first, because the queue is consumed from the
    ///   back. Those searches always go to the extraction backend, even when
    ///   a title happens to look like a Spotify link.
    /// - Spotify track links resolve the track's search.
    /// - Other Spotify links resolve to nothing.
    /// - Everything else goes straight to the extraction backend.
    ///
    /// The stream ends at the first error; songs yielded before it stay valid.
    pub fn resolve_all<'a>(&'a self, query: &str, info_only: bool) -> BoxStream<'a, Result<Song, ResolveError>> {
        fuse_on_error(self.resolve_query(query.to_owned(), info_only))
    }

    fn resolve_query(&self, query: String, info_only: bool) -> BoxStream<'_, Result<Song, ResolveError>> {
        match SpotifyLink::parse(&query) {
            Some(SpotifyLink::Playlist(id)) => self.resolve_playlist(id, info_only),
            Some(SpotifyLink::Track(id)) => self.resolve_track(id, info_only),
            Some(SpotifyLink::Unsupported) => {
                debug!("Ignorando link de Spotify no soportado: {}", query);
                stream::empty().boxed()
            }
            None => self.extraction.resolve(query, info_only),
        }
    }

    fn resolve_playlist(&self, id: String, info_only: bool) -> BoxStream<'_, Result<Song, ResolveError>> {
        stream::once(async move {
            let tracks: Vec<Track> = self.spotify.playlist(&id).try_collect().await?;
            info!("🎧 Playlist de Spotify {} con {} tracks", id, tracks.len());
            Ok::<_, ResolveError>(stream::iter(tracks.into_iter().rev().map(Ok::<_, ResolveError>)))
        })
        .try_flatten()
        .map_ok(move |track| self.extraction.resolve(track.search_query(), info_only))
        .try_flatten()
        .boxed()
    }

    fn resolve_track(&self, id: String, info_only: bool) -> BoxStream<'_, Result<Song, ResolveError>> {
        stream::once(async move { self.spotify.track(&id).await })
            .map_ok(move |track| {
                debug!("🎧 Track de Spotify resuelto a '{}'", track.search_query());
                self.extraction.resolve(track.search_query(), info_only)
            })
            .try_flatten()
            .boxed()
    }
}
