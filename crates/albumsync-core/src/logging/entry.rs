//! Log entry written as one JSONL line.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single structured log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// RFC 3339 timestamp with milliseconds
    pub ts: String,

    /// trace, debug, info, warn or error
    pub level: String,

    /// Session label chosen by the process (e.g. "demo", a user id)
    pub session: String,

    /// Module path of the event
    pub target: String,

    pub msg: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Remaining event fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Value>,

    /// Enclosing spans, root first, joined with " > "
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<String>,
}

impl LogEntry {
    pub fn new(
        level: impl Into<String>,
        session: impl Into<String>,
        target: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            level: level.into(),
            session: session.into(),
            target: target.into(),
            msg: msg.into(),
            album_id: None,
            user: None,
            fields: None,
            span: None,
        }
    }

    /// Attach event fields, lifting `album_id` and `user` to the top level.
    pub fn with_fields(mut self, mut fields: Map<String, Value>) -> Self {
        self.album_id = take_string(&mut fields, "album_id");
        self.user = take_string(&mut fields, "user");
        if !fields.is_empty() {
            self.fields = Some(Value::Object(fields));
        }
        self
    }

    pub fn with_span(mut self, span: impl Into<String>) -> Self {
        self.span = Some(span.into());
        self
    }

    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

fn take_string(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    match fields.remove(key)? {
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// Selection of entries when reading logs back
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub album_id: Option<String>,
    pub user: Option<String>,
    /// Lowest level to keep
    pub min_level: Option<String>,
}

impl EntryFilter {
    pub fn matches(&self, entry: &LogEntry) -> bool {
        if let Some(album) = &self.album_id {
            if entry.album_id.as_deref() != Some(album.as_str()) {
                return false;
            }
        }
        if let Some(user) = &self.user {
            if entry.user.as_deref() != Some(user.as_str()) {
                return false;
            }
        }
        match &self.min_level {
            Some(min) => level_rank(&entry.level) >= level_rank(min),
            None => true,
        }
    }
}

fn level_rank(level: &str) -> u8 {
    match level.to_ascii_lowercase().as_str() {
        "trace" => 0,
        "debug" => 1,
        "info" => 2,
        "warn" => 3,
        "error" => 4,
        _ => 0,
    }
}
