use crate::error::{CodecError, Result};

/// A single timestamped, tagged text record.
///
/// An `Event` is immutable once constructed: [`Event::new`] is the only way
/// to build one, and it enforces the invariants the rest of the system
/// relies on (non-empty id, non-negative timestamp).
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    id: String,
    source: String,
    timestamp: f64,
    tags: Vec<String>,
    content: String,
}

impl Event {
    /// Builds a new event, validating the invariants from the data model.
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        timestamp: f64,
        tags: Vec<String>,
        content: impl Into<String>,
    ) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(CodecError::InvalidEvent("id must not be empty".into()));
        }
        if timestamp < 0.0 {
            return Err(CodecError::InvalidEvent(format!(
                "timestamp must be >= 0, got {timestamp}"
            )));
        }
        Ok(Self {
            id,
            source: source.into(),
            timestamp,
            tags,
            content: content.into(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// The partition second this event belongs to when no partition exists
    /// for it yet: the timestamp floored to an integer second.
    pub fn floor_timestamp(&self) -> i64 {
        self.timestamp.floor() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_id() {
        assert!(Event::new("", "env1", 1.0, vec![], "x").is_err());
    }

    #[test]
    fn rejects_negative_timestamp() {
        assert!(Event::new("id1", "env1", -1.0, vec![], "x").is_err());
    }

    #[test]
    fn accepts_empty_content_and_tags() {
        let e = Event::new("id1", "env1", 0.0, vec![], "").unwrap();
        assert_eq!(e.content(), "");
        assert!(e.tags().is_empty());
    }
}
