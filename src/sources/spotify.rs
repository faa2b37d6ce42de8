use chrono::{DateTime, TimeDelta, Utc};
use futures::{
    stream::{self, BoxStream},
    TryStreamExt,
};
use reqwest::{header, Client, StatusCode};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{fuse_on_error, JsonType, ResolveError};

pub const SPOTIFY_ACCOUNTS_URL: &str = "https://accounts.spotify.com";
pub const SPOTIFY_API_URL: &str = "https://api.spotify.com";

const PLAYLIST_FIELDS: &str = "items(track(name,artists(name))),next";

/// Credentials and endpoints for the Spotify Web API.
#[derive(Debug, Clone)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    pub accounts_url: String,
    pub api_url: String,
}

impl SpotifyConfig {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            accounts_url: SPOTIFY_ACCOUNTS_URL.to_string(),
            api_url: SPOTIFY_API_URL.to_string(),
        }
    }

    pub fn with_endpoints(mut self, accounts_url: impl Into<String>, api_url: impl Into<String>) -> Self {
        self.accounts_url = accounts_url.into().trim_end_matches('/').to_string();
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }
}

/// Spotify track metadata. Never playable on its own; only used to build a
/// search for the extraction backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub title: String,
    pub artist_names: Vec<String>,
}

impl Track {
    /// `"Artist A & Artist B - Title"`, or just the title without artists.
    pub fn search_query(&self) -> String {
        if self.artist_names.is_empty() {
            self.title.clone()
        } else {
            format!("{} - {}", self.artist_names.join(" & "), self.title)
        }
    }
}

#[derive(Debug)]
struct AuthSession {
    access_token: Option<String>,
    expires_time: DateTime<Utc>,
}

impl AuthSession {
    fn new() -> Self {
        Self {
            access_token: None,
            expires_time: Utc::now(),
        }
    }

    /// The token, if one is present and `now` is before its expiry.
    fn token_at(&self, now: DateTime<Utc>) -> Option<&str> {
        match &self.access_token {
            Some(token) if now < self.expires_time => Some(token),
            _ => None,
        }
    }

    fn store(&mut self, token: String, expires_in: i64, now: DateTime<Utc>) {
        self.expires_time = TimeDelta::try_seconds(expires_in)
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(now);
        self.access_token = Some(token);
    }
}

/// Status and raw body of a Spotify response, kept around so every shape
/// error can carry them.
struct ApiResponse {
    status: StatusCode,
    body: String,
}

impl ApiResponse {
    async fn read(response: reqwest::Response) -> Result<Self, ResolveError> {
        let status = response.status();
        let body = response.text().await?;
        Ok(Self { status, body })
    }

    /// Parses the body of a 200 response.
    fn json(&self) -> Result<Value, ResolveError> {
        if self.status != StatusCode::OK {
            return Err(ResolveError::Http {
                status: self.status.as_u16(),
                body: self.body.clone(),
            });
        }

        serde_json::from_str(&self.body).map_err(|_| ResolveError::Shape {
            field: "<body>".to_string(),
            expected: JsonType::Object,
            actual: JsonType::Unparseable,
            status: Some(self.status.as_u16()),
            body: self.body.clone(),
        })
    }

    fn shape_error(&self, field: &str, expected: JsonType, actual: Option<&Value>) -> ResolveError {
        ResolveError::shape(field, expected, actual, Some(self.status.as_u16()), self.body.clone())
    }

    fn object<'v>(&self, body: &'v Value) -> Result<&'v Map<String, Value>, ResolveError> {
        body.as_object()
            .ok_or_else(|| self.shape_error("<body>", JsonType::Object, Some(body)))
    }

    fn parse_track(&self, track: &Map<String, Value>) -> Result<Track, ResolveError> {
        let title = track
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| self.shape_error("name", JsonType::String, track.get("name")))?;

        let artist_names = track
            .get("artists")
            .and_then(Value::as_array)
            .and_then(|artists| {
                artists
                    .iter()
                    .map(|artist| artist.get("name").and_then(Value::as_str).map(str::to_owned))
                    .collect::<Option<Vec<_>>>()
            })
            .ok_or_else(|| self.shape_error("artists", JsonType::StringList, track.get("artists")))?;

        Ok(Track {
            title: title.to_owned(),
            artist_names,
        })
    }
}

/// One page of playlist items. Validation stops at the first bad item, in
/// which case `next` is dropped so the stream ends there.
struct PlaylistPage {
    tracks: Vec<Result<Track, ResolveError>>,
    next: Option<String>,
}

/// Client for the Spotify Web API, authenticated with the client-credentials
/// grant. The token is reused until it expires.
///
/// The session lives behind an async mutex, so a shared reference is enough
/// to drive lookups, but the client is meant for one resolution at a time.
pub struct SpotifyClient {
    http: Client,
    config: SpotifyConfig,
    session: Mutex<AuthSession>,
}

impl SpotifyClient {
    pub fn new(config: SpotifyConfig) -> Result<Self, ResolveError> {
        let http = Client::builder().build()?;

        Ok(Self {
            http,
            config,
            session: Mutex::new(AuthSession::new()),
        })
    }

    /// Requests a new access token and stores it in the session.
    pub async fn authenticate(&self) -> Result<(), ResolveError> {
        let mut session = self.session.lock().await;
        self.authenticate_session(&mut session).await
    }

    async fn authenticate_session(&self, session: &mut AuthSession) -> Result<(), ResolveError> {
        let url = format!("{}/api/token", self.config.accounts_url);
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];

        let response = ApiResponse::read(self.http.post(&url).form(&form).send().await?).await?;
        let body = response.json()?;
        let object = response.object(&body)?;

        let token = object
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| response.shape_error("access_token", JsonType::String, object.get("access_token")))?;
        let expires_in = object
            .get("expires_in")
            .and_then(Value::as_i64)
            .ok_or_else(|| response.shape_error("expires_in", JsonType::Integer, object.get("expires_in")))?;

        session.store(token.to_owned(), expires_in, Utc::now());
        info!("🔑 Token de Spotify obtenido, expira en {}s", expires_in);
        Ok(())
    }

    /// Returns a valid token, authenticating first when there is none or it
    /// has expired.
    async fn access_token(&self) -> Result<String, ResolveError> {
        let mut session = self.session.lock().await;
        if let Some(token) = session.token_at(Utc::now()) {
            return Ok(token.to_owned());
        }

        self.authenticate_session(&mut session).await?;
        session
            .access_token
            .clone()
            .ok_or_else(|| ResolveError::shape("access_token", JsonType::String, None, None, ""))
    }

    async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<ApiResponse, ResolveError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(url)
            .query(query)
            .bearer_auth(token)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        ApiResponse::read(response).await
    }

    /// Looks up a single track.
    pub async fn track(&self, track_id: &str) -> Result<Track, ResolveError> {
        let url = format!("{}/v1/tracks/{}", self.config.api_url, track_id);
        debug!("Obteniendo track de Spotify {}", track_id);

        let response = self.get(&url, &[]).await?;
        let body = response.json()?;
        let object = response.object(&body)?;
        response.parse_track(object)
    }

    /// Streams the tracks of a playlist in playlist order. Further pages are
    /// only requested once the previous page has been consumed. The first
    /// invalid item ends the stream with an error.
    pub fn playlist<'a>(&'a self, playlist_id: &str) -> BoxStream<'a, Result<Track, ResolveError>> {
        let first = format!("{}/v1/playlists/{}/tracks", self.config.api_url, playlist_id);
        debug!("Leyendo playlist de Spotify {}", playlist_id);

        let pages = stream::try_unfold(Some((first, true)), move |next| async move {
            let Some((url, first_page)) = next else {
                return Ok(None);
            };

            let page = self.playlist_page(&url, first_page).await?;
            let tracks = stream::iter(page.tracks);
            Ok::<_, ResolveError>(Some((tracks, page.next.map(|url| (url, false)))))
        });

        fuse_on_error(pages.try_flatten())
    }

    fn is_api_url(&self, url: &str) -> bool {
        url.strip_prefix(self.config.api_url.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }

    async fn playlist_page(&self, url: &str, first_page: bool) -> Result<PlaylistPage, ResolveError> {
        let query: &[(&str, &str)] = if first_page {
            &[("fields", PLAYLIST_FIELDS)]
        } else {
            &[]
        };

        let response = self.get(url, query).await?;
        let body = response.json()?;
        let object = response.object(&body)?;

        let items = object
            .get("items")
            .and_then(Value::as_array)
            .ok_or_else(|| response.shape_error("items", JsonType::List, object.get("items")))?;

        // El token viaja con `next`: solo se sigue dentro del host de la API
        let next = match object.get("next") {
            None | Some(Value::Null) => None,
            Some(Value::String(next)) if self.is_api_url(next) => Some(next.clone()),
            Some(Value::String(next)) => {
                warn!("🚫 Rechazando página siguiente fuera de la API de Spotify: {}", next);
                return Err(response.shape_error("next", JsonType::String, object.get("next")));
            }
            other => return Err(response.shape_error("next", JsonType::String, other)),
        };

        let mut tracks = Vec::with_capacity(items.len());
        for item in items {
            let track = item
                .get("track")
                .and_then(Value::as_object)
                .ok_or_else(|| response.shape_error("track", JsonType::Object, item.get("track")))
                .and_then(|track| response.parse_track(track));

            let failed = track.is_err();
            tracks.push(track);
            if failed {
                return Ok(PlaylistPage { tracks, next: None });
            }
        }

        debug!("Página de playlist con {} tracks", tracks.len());
        Ok(PlaylistPage { tracks, next })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::{
        matchers::{body_string_contains, header, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    async fn mount_token(server: &MockServer, expires_in: i64, times: u64) {
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_id=id"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "abc",
                "token_type": "Bearer",
                "expires_in": expires_in,
            })))
            .expect(times)
            .mount(server)
            .await;
    }

    fn client_for(server: &MockServer) -> SpotifyClient {
        let config = SpotifyConfig::new("id", "secret").with_endpoints(server.uri(), server.uri());
        SpotifyClient::new(config).unwrap()
    }

    fn track_json(name: &str, artists: &[&str]) -> Value {
        json!({
            "name": name,
            "artists": artists.iter().map(|a| json!({"name": a})).collect::<Vec<_>>(),
        })
    }

    #[test]
    fn test_search_query() {
        let track = Track {
            title: "Song".into(),
            artist_names: vec!["A".into(), "B".into()],
        };
        assert_eq!(track.search_query(), "A & B - Song");

        let solo = Track {
            title: "Song".into(),
            artist_names: vec![],
        };
        assert_eq!(solo.search_query(), "Song");
    }

    #[test]
    fn test_session_validity() {
        let now = Utc::now();
        let mut session = AuthSession::new();
        assert_eq!(session.token_at(now), None);

        session.store("abc".into(), 3600, now);
        assert_eq!(session.token_at(now), Some("abc"));
        assert_eq!(session.token_at(now + TimeDelta::seconds(3600)), None);

        session.store("def".into(), 0, now);
        assert_eq!(session.token_at(now), None);
    }

    #[tokio::test]
    async fn test_token_is_reused_until_expiry() {
        let server = MockServer::start().await;
        mount_token(&server, 3600, 1).await;
        Mock::given(method("GET"))
            .and(path("/v1/tracks/t1"))
            .and(header("authorization", "Bearer abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(track_json("One", &["A"])))
            .expect(2)
            .mount(&server)
            .await;

        let client = client_for(&server);
        for _ in 0..2 {
            let track = client.track("t1").await.unwrap();
            assert_eq!(track.title, "One");
            assert_eq!(track.artist_names, vec!["A".to_string()]);
        }
    }

    #[tokio::test]
    async fn test_expired_token_reauthenticates() {
        let server = MockServer::start().await;
        mount_token(&server, 0, 2).await;
        Mock::given(method("GET"))
            .and(path("/v1/tracks/t1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(track_json("One", &[])))
            .expect(2)
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.track("t1").await.unwrap();
        client.track("t1").await.unwrap();
    }

    #[tokio::test]
    async fn test_authenticate_rejects_non_string_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"access_token": 42, "expires_in": 3600})),
            )
            .mount(&server)
            .await;

        let error = client_for(&server).authenticate().await.unwrap_err();
        match error {
            ResolveError::Shape {
                field,
                expected,
                actual,
                status,
                ..
            } => {
                assert_eq!(field, "access_token");
                assert_eq!(expected, JsonType::String);
                assert_eq!(actual, JsonType::Integer);
                assert_eq!(status, Some(200));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_authenticate_rejects_non_integer_expiry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"access_token": "abc", "expires_in": "soon"})),
            )
            .mount(&server)
            .await;

        let error = client_for(&server).authenticate().await.unwrap_err();
        assert!(matches!(
            error,
            ResolveError::Shape { ref field, actual: JsonType::String, .. } if field == "expires_in"
        ));
    }

    #[tokio::test]
    async fn test_authenticate_rejects_non_object_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[1, 2]"))
            .mount(&server)
            .await;

        let error = client_for(&server).authenticate().await.unwrap_err();
        match error {
            ResolveError::Shape { field, actual, body, .. } => {
                assert_eq!(field, "<body>");
                assert_eq!(actual, JsonType::List);
                assert_eq!(body, "[1, 2]");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_authenticate_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(ResponseTemplate::new(401).set_body_string(r#"{"error":"invalid_client"}"#))
            .mount(&server)
            .await;

        let error = client_for(&server).authenticate().await.unwrap_err();
        match error {
            ResolveError::Http { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body, r#"{"error":"invalid_client"}"#);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_track_missing_artists() {
        let server = MockServer::start().await;
        mount_token(&server, 3600, 1).await;
        Mock::given(method("GET"))
            .and(path("/v1/tracks/t1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"name":"Lonely"}"#))
            .mount(&server)
            .await;

        let error = client_for(&server).track("t1").await.unwrap_err();
        match error {
            ResolveError::Shape {
                field,
                expected,
                actual,
                status,
                body,
            } => {
                assert_eq!(field, "artists");
                assert_eq!(expected, JsonType::StringList);
                assert_eq!(actual, JsonType::Missing);
                assert_eq!(status, Some(200));
                assert_eq!(body, r#"{"name":"Lonely"}"#);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_track_http_error() {
        let server = MockServer::start().await;
        mount_token(&server, 3600, 1).await;
        Mock::given(method("GET"))
            .and(path("/v1/tracks/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
            .mount(&server)
            .await;

        let error = client_for(&server).track("missing").await.unwrap_err();
        assert!(matches!(error, ResolveError::Http { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_playlist_follows_pages_in_order() {
        let server = MockServer::start().await;
        mount_token(&server, 3600, 1).await;
        Mock::given(method("GET"))
            .and(path("/v1/playlists/p1/tracks"))
            .and(query_param("fields", PLAYLIST_FIELDS))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    {"track": track_json("One", &["A"])},
                    {"track": track_json("Two", &["B", "C"])},
                ],
                "next": format!("{}/v1/playlists/p1/page2", server.uri()),
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/playlists/p1/page2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{"track": track_json("Three", &[])}],
                "next": null,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let tracks: Vec<Track> = client.playlist("p1").try_collect().await.unwrap();
        let titles: Vec<_> = tracks.iter().map(|t| t.title.as_str()).collect();

        assert_eq!(titles, vec!["One", "Two", "Three"]);
        assert_eq!(tracks[1].artist_names, vec!["B".to_string(), "C".to_string()]);
    }

    #[tokio::test]
    async fn test_playlist_stops_at_first_invalid_item() {
        let server = MockServer::start().await;
        mount_token(&server, 3600, 1).await;
        Mock::given(method("GET"))
            .and(path("/v1/playlists/p1/tracks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    {"track": track_json("One", &["A"])},
                    {"track": null},
                    {"track": track_json("Three", &["C"])},
                ],
                "next": format!("{}/v1/playlists/p1/page2", server.uri()),
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/playlists/p1/page2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let results: Vec<_> = client.playlist("p1").collect().await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap().title, "One");
        assert!(matches!(
            &results[1],
            Err(ResolveError::Shape { field, actual: JsonType::Null, .. }) if field == "track"
        ));
    }

    #[tokio::test]
    async fn test_playlist_never_follows_foreign_next() {
        let server = MockServer::start().await;
        let foreign = MockServer::start().await;
        mount_token(&server, 3600, 1).await;
        Mock::given(method("GET"))
            .and(path("/v1/playlists/p1/tracks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{"track": track_json("One", &["A"])}],
                "next": format!("{}/v1/playlists/p1/page2", foreign.uri()),
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
            .expect(0)
            .mount(&foreign)
            .await;

        let results: Vec<_> = client_for(&server).playlist("p1").collect().await;

        assert_eq!(results.len(), 1);
        assert!(matches!(
            &results[0],
            Err(ResolveError::Shape { field, actual: JsonType::String, .. }) if field == "next"
        ));
        assert!(foreign.received_requests().await.unwrap_or_default().is_empty());
    }

    #[test]
    fn test_api_url_prefix_needs_path_boundary() {
        let client = SpotifyClient::new(
            SpotifyConfig::new("id", "secret").with_endpoints("https://accounts", "https://api.spotify.com"),
        )
        .unwrap();

        assert!(client.is_api_url("https://api.spotify.com/v1/playlists/p1/tracks?offset=100"));
        assert!(!client.is_api_url("https://api.spotify.com.evil.example/v1"));
        assert!(!client.is_api_url("https://api.spotify.com"));
        assert!(!client.is_api_url("http://api.spotify.com/v1"));
    }

    #[tokio::test]
    async fn test_playlist_http_error() {
        let server = MockServer::start().await;
        mount_token(&server, 3600, 1).await;
        Mock::given(method("GET"))
            .and(path("/v1/playlists/p1/tracks"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let results: Vec<_> = client_for(&server).playlist("p1").collect().await;

        assert_eq!(results.len(), 1);
        match &results[0] {
            Err(ResolveError::Http { status, body }) => {
                assert_eq!(*status, 403);
                assert_eq!(body, "forbidden");
            }
            other => panic!("unexpected item: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_playlist_rejects_non_string_next() {
        let server = MockServer::start().await;
        mount_token(&server, 3600, 1).await;
        Mock::given(method("GET"))
            .and(path("/v1/playlists/p1/tracks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{"track": track_json("One", &["A"])}],
                "next": 2,
            })))
            .mount(&server)
            .await;

        let results: Vec<_> = client_for(&server).playlist("p1").collect().await;

        assert_eq!(results.len(), 1);
        assert!(matches!(
            &results[0],
            Err(ResolveError::Shape { field, expected: JsonType::String, actual: JsonType::Integer, .. })
                if field == "next"
        ));
    }

    #[tokio::test]
    async fn test_playlist_requires_item_list() {
        let server = MockServer::start().await;
        mount_token(&server, 3600, 1).await;
        Mock::given(method("GET"))
            .and(path("/v1/playlists/p1/tracks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": {"track": {}}})))
            .mount(&server)
            .await;

        let results: Vec<_> = client_for(&server).playlist("p1").collect().await;
        assert_eq!(results.len(), 1);
        assert!(matches!(
            &results[0],
            Err(ResolveError::Shape { field, actual: JsonType::Object, .. }) if field == "items"
        ));
    }
}
