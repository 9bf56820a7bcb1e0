use regex::Regex;
use serde_json::Value;

use crate::event::Event;

/// A validated (id/source/content/start/end/tags) predicate.
///
/// Shared verbatim by the live matcher (`/live`) and the historical search
/// path (`/find`): both parse the same JSON shape into a `Criteria` and both
/// evaluate it with [`Criteria::matches`].
#[derive(Debug, Default, Clone)]
pub struct Criteria {
    id: Option<Regex>,
    source: Option<Regex>,
    content: Option<Regex>,
    start: Option<f64>,
    end: Option<f64>,
    tags: Vec<String>,
}

/// Error returned when a JSON criteria object fails validation.
#[derive(Debug, thiserror::Error)]
pub enum CriteriaError {
    #[error("unknown criteria key: {0}")]
    UnknownKey(String),
    #[error("invalid value for criteria {key}: expected {expected}")]
    InvalidValue { key: &'static str, expected: &'static str },
    #[error("invalid regex for criteria {key}: {source}")]
    InvalidRegex {
        key: &'static str,
        #[source]
        source: regex::Error,
    },
}

const ALLOWED_KEYS: &[&str] = &["id", "source", "start", "end", "content", "tags"];

impl Criteria {
    /// Validates and builds a `Criteria` from a JSON object, rejecting
    /// unknown keys and type-mismatched values.
    pub fn from_json(value: &Value) -> Result<Self, CriteriaError> {
        let obj = value
            .as_object()
            .ok_or_else(|| CriteriaError::InvalidValue {
                key: "<root>",
                expected: "a JSON object",
            })?;

        for key in obj.keys() {
            if !ALLOWED_KEYS.contains(&key.as_str()) {
                return Err(CriteriaError::UnknownKey(key.clone()));
            }
        }

        let id = Self::regex_field(obj, "id")?;
        let source = Self::regex_field(obj, "source")?;
        let content = Self::regex_field(obj, "content")?;
        let start = Self::number_field(obj, "start")?;
        let end = Self::number_field(obj, "end")?;
        let tags = Self::tags_field(obj)?;

        Ok(Self {
            id,
            source,
            content,
            start,
            end,
            tags,
        })
    }

    fn regex_field(
        obj: &serde_json::Map<String, Value>,
        key: &'static str,
    ) -> Result<Option<Regex>, CriteriaError> {
        match obj.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Regex::new(s)
                .map(Some)
                .map_err(|source| CriteriaError::InvalidRegex { key, source }),
            Some(_) => Err(CriteriaError::InvalidValue {
                key,
                expected: "a string",
            }),
        }
    }

    fn number_field(
        obj: &serde_json::Map<String, Value>,
        key: &'static str,
    ) -> Result<Option<f64>, CriteriaError> {
        match obj.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n.as_f64().map(Some).ok_or(CriteriaError::InvalidValue {
                key,
                expected: "a number",
            }),
            Some(_) => Err(CriteriaError::InvalidValue {
                key,
                expected: "a number",
            }),
        }
    }

    fn tags_field(obj: &serde_json::Map<String, Value>) -> Result<Vec<String>, CriteriaError> {
        match obj.get("tags") {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or(CriteriaError::InvalidValue {
                            key: "tags",
                            expected: "an array of strings",
                        })
                })
                .collect(),
            Some(_) => Err(CriteriaError::InvalidValue {
                key: "tags",
                expected: "an array of strings",
            }),
        }
    }

    /// The `start` bound, if any (used by callers that need it directly,
    /// e.g. to reject a `/find` request missing a required `start`).
    pub fn start(&self) -> Option<f64> {
        self.start
    }

    pub fn end(&self) -> Option<f64> {
        self.end
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn content_regex(&self) -> Option<&Regex> {
        self.content.as_ref()
    }

    /// Evaluates the predicate from spec §4.1: regex fields use unanchored
    /// substring search, `start`/`end` are numeric bounds, `tags` requires
    /// every listed tag to be present. Missing criteria accept everything.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(re) = &self.id {
            if !re.is_match(event.id()) {
                return false;
            }
        }
        if let Some(re) = &self.source {
            if !re.is_match(event.source()) {
                return false;
            }
        }
        if let Some(re) = &self.content {
            if !re.is_match(event.content()) {
                return false;
            }
        }
        if let Some(start) = self.start {
            if event.timestamp() < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if event.timestamp() > end {
                return false;
            }
        }
        if !self.tags.is_empty() {
            let event_tags = event.tags();
            if !self.tags.iter().all(|t| event_tags.contains(t)) {
                return false;
            }
        }
        true
    }
}
