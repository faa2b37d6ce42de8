use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Shape of a JSON value, used to describe what a response held versus what
/// the resolver needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonType {
    Missing,
    Null,
    Boolean,
    Integer,
    Float,
    String,
    List,
    /// A list whose elements are objects carrying a string `name`.
    StringList,
    Object,
    /// The body was not JSON at all.
    Unparseable,
}

impl JsonType {
    pub fn of(value: Option<&Value>) -> Self {
        match value {
            None => JsonType::Missing,
            Some(Value::Null) => JsonType::Null,
            Some(Value::Bool(_)) => JsonType::Boolean,
            Some(Value::Number(n)) if n.is_i64() || n.is_u64() => JsonType::Integer,
            Some(Value::Number(_)) => JsonType::Float,
            Some(Value::String(_)) => JsonType::String,
            Some(Value::Array(_)) => JsonType::List,
            Some(Value::Object(_)) => JsonType::Object,
        }
    }
}

impl fmt::Display for JsonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JsonType::Missing => "nothing",
            JsonType::Null => "null",
            JsonType::Boolean => "a boolean",
            JsonType::Integer => "an integer",
            JsonType::Float => "a float",
            JsonType::String => "a string",
            JsonType::List => "a list",
            JsonType::StringList => "a list of strings",
            JsonType::Object => "an object",
            JsonType::Unparseable => "unparseable data",
        };
        f.write_str(name)
    }
}

/// Everything that can end a song resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// An external response did not have the required structure.
    #[error("expected '{field}' to be {expected}, got {actual} instead{}", http_suffix(.status))]
    Shape {
        field: String,
        expected: JsonType,
        actual: JsonType,
        /// HTTP status of the response; `None` for extraction results.
        status: Option<u16>,
        /// Raw response body (or serialized extraction result).
        body: String,
    },

    #[error("Spotify responded with HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The extraction backend could not produce the media.
    #[error("{message}")]
    Resolution { message: String },

    #[error("network error talking to Spotify: {0}")]
    Network(#[from] reqwest::Error),
}

impl ResolveError {
    pub fn shape(
        field: impl Into<String>,
        expected: JsonType,
        actual: Option<&Value>,
        status: Option<u16>,
        body: impl Into<String>,
    ) -> Self {
        ResolveError::Shape {
            field: field.into(),
            expected,
            actual: JsonType::of(actual),
            status,
            body: body.into(),
        }
    }

    /// Short message that is safe to show in a Discord channel.
    pub fn user_message(&self) -> String {
        match self {
            ResolveError::Shape { field, .. } => {
                format!("Unexpected response while resolving the song (field '{}')", field)
            }
            ResolveError::Http { status, .. } => format!("Spotify request failed (HTTP {})", status),
            ResolveError::Resolution { message } => message.clone(),
            ResolveError::Network(_) => "Could not reach Spotify".to_string(),
        }
    }
}

fn http_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}
