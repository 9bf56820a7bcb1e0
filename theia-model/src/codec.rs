//! Byte-counted framing used both on disk (one partition file) and on the
//! wire (one WebSocket frame per event).
//!
//! ```text
//! event: <total> <header_bytes> <content_bytes>\n
//! id:<id>\n
//! timestamp: <seven-decimal float>\n
//! source:<source>\n
//! tags:<comma-joined tags>\n
//! <content bytes, no trailing newline of their own>
//! \n
//! ```
//!
//! The trailing `\n` is the separator between this event and the next (or
//! EOF). It is not counted in `content_bytes`.

use std::io::{BufRead, Read, Write};

use crate::error::{CodecError, Result};
use crate::event::Event;

/// Serializes [`Event`]s into the framed wire/disk format.
#[derive(Debug, Default, Clone, Copy)]
pub struct EventSerializer;

impl EventSerializer {
    pub fn new() -> Self {
        Self
    }

    /// Serializes `event` into its framed byte representation, including the
    /// trailing separator newline.
    pub fn serialize(&self, event: &Event) -> Vec<u8> {
        let header = Self::header_bytes(event);
        let content = event.content().as_bytes();
        let total = header.len() + content.len();

        let mut out = Vec::with_capacity(total + header.len() + content.len() + 32);
        let _ = write!(out, "event: {} {} {}\n", total, header.len(), content.len());
        out.extend_from_slice(&header);
        out.extend_from_slice(content);
        out.push(b'\n');
        out
    }

    /// Writes the serialized form of `event` directly to `out`.
    pub fn write_to(&self, event: &Event, out: &mut impl Write) -> std::io::Result<()> {
        out.write_all(&self.serialize(event))
    }

    fn header_bytes(event: &Event) -> Vec<u8> {
        let mut hdr = String::new();
        hdr.push_str("id:");
        hdr.push_str(event.id());
        hdr.push('\n');
        hdr.push_str(&format!("timestamp: {:.7}\n", event.timestamp()));
        hdr.push_str("source:");
        hdr.push_str(event.source());
        hdr.push('\n');
        hdr.push_str("tags:");
        hdr.push_str(&event.tags().join(","));
        hdr.push('\n');
        hdr.into_bytes()
    }
}

#[derive(Debug, Default)]
struct ParsedHeader {
    id: Option<String>,
    timestamp: Option<f64>,
    source: Option<String>,
    tags: Option<Vec<String>>,
}

struct Preamble {
    header: usize,
    content: usize,
}

/// Parses [`Event`]s out of the framed wire/disk format.
#[derive(Debug, Default, Clone, Copy)]
pub struct EventParser;

impl EventParser {
    pub fn new() -> Self {
        Self
    }

    /// Reads exactly one event from `stream`, or `Ok(None)` if the stream is
    /// at a clean boundary (zero bytes available for the next preamble
    /// line). Any other short read or malformed section is an error.
    pub fn parse(&self, stream: &mut impl BufRead) -> Result<Option<Event>> {
        self.parse_inner(stream, false)
    }

    /// Like [`Self::parse`], but discards the content bytes without building
    /// a `String` from them — useful for index-only scans.
    pub fn parse_skip_content(&self, stream: &mut impl BufRead) -> Result<Option<Event>> {
        self.parse_inner(stream, true)
    }

    fn parse_inner(&self, stream: &mut impl BufRead, skip_content: bool) -> Result<Option<Event>> {
        let Some(preamble) = self.parse_preamble(stream)? else {
            return Ok(None);
        };

        let header = self.parse_header(stream, preamble.header)?;

        let content = if skip_content {
            let mut sink = std::io::sink();
            let copied = std::io::copy(&mut stream.by_ref().take(preamble.content as u64), &mut sink)?;
            if copied as usize != preamble.content {
                return Err(CodecError::Malformed(format!(
                    "expected {} content bytes, read {copied}",
                    preamble.content
                )));
            }
            String::new()
        } else {
            let mut buf = vec![0u8; preamble.content];
            stream.read_exact(&mut buf).map_err(|e| {
                CodecError::Malformed(format!("short read of content bytes: {e}"))
            })?;
            String::from_utf8(buf)
                .map_err(|e| CodecError::Malformed(format!("content is not valid utf-8: {e}")))?
        };

        // consume the single separator byte, tolerating a clean EOF for the
        // last event in a stream.
        let mut sep = [0u8; 1];
        match stream.read(&mut sep) {
            Ok(0) => {}
            Ok(_) if sep[0] == b'\n' => {}
            Ok(_) => {
                return Err(CodecError::Malformed(
                    "expected newline separator after event content".into(),
                ));
            }
            Err(e) => return Err(CodecError::Io(e)),
        }

        let id = header
            .id
            .ok_or_else(|| CodecError::Malformed("missing id header".into()))?;
        let timestamp = header
            .timestamp
            .ok_or_else(|| CodecError::Malformed("missing timestamp header".into()))?;
        let source = header
            .source
            .ok_or_else(|| CodecError::Malformed("missing source header".into()))?;
        let tags = header.tags.unwrap_or_default();

        let event = Event::new(id, source, timestamp, tags, content)
            .map_err(|e| CodecError::Malformed(e.to_string()))?;
        Ok(Some(event))
    }

    fn parse_preamble(&self, stream: &mut impl BufRead) -> Result<Option<Preamble>> {
        let mut line = String::new();
        let n = stream.read_line(&mut line)?;
        if n == 0 {
            return Ok(None);
        }
        let line = line.trim_end_matches(['\n', '\r']);
        let rest = line
            .strip_prefix("event: ")
            .ok_or_else(|| CodecError::Malformed(format!("invalid preamble line: {line:?}")))?;

        let mut parts = rest.split(' ');
        let total: usize = parts
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| CodecError::Malformed("invalid preamble total".into()))?;
        let header: usize = parts
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| CodecError::Malformed("invalid preamble header size".into()))?;
        let content: usize = parts
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| CodecError::Malformed("invalid preamble content size".into()))?;
        if parts.next().is_some() {
            return Err(CodecError::Malformed("too many preamble values".into()));
        }
        if header + content != total {
            return Err(CodecError::Malformed(format!(
                "preamble total {total} does not equal header {header} + content {content}"
            )));
        }

        Ok(Some(Preamble { header, content }))
    }

    fn parse_header(&self, stream: &mut impl BufRead, size: usize) -> Result<ParsedHeader> {
        let mut buf = vec![0u8; size];
        stream
            .read_exact(&mut buf)
            .map_err(|e| CodecError::Malformed(format!("short read of header bytes: {e}")))?;
        let text = String::from_utf8(buf)
            .map_err(|e| CodecError::Malformed(format!("header is not valid utf-8: {e}")))?;

        let mut header = ParsedHeader::default();
        for line in text.lines() {
            if line.is_empty() {
                continue;
            }
            let (prop, value) = line
                .split_once(':')
                .ok_or_else(|| CodecError::Malformed(format!("invalid header line: {line:?}")))?;
            match prop {
                "id" => header.id = Some(value.to_string()),
                "timestamp" => {
                    header.timestamp = Some(value.trim().parse().map_err(|_| {
                        CodecError::Malformed(format!("invalid timestamp value: {value:?}"))
                    })?);
                }
                "source" => header.source = Some(value.to_string()),
                "tags" => {
                    header.tags = Some(if value.is_empty() {
                        Vec::new()
                    } else {
                        value.split(',').map(str::to_string).collect()
                    });
                }
                other => {
                    return Err(CodecError::Malformed(format!(
                        "unknown header property: {other:?}"
                    )));
                }
            }
        }
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample() -> Event {
        Event::new(
            "id1",
            "env1",
            1491580705.9789374,
            vec!["a".into(), "b".into()],
            "TEST EVENT",
        )
        .unwrap()
    }

    #[test]
    fn serialize_matches_scenario_5() {
        let ser = EventSerializer::new();
        let bytes = ser.serialize(&sample());
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("event: 68 58 10\n"));
        assert!(text.contains("id:id1\n"));
        assert!(text.contains("timestamp: 1491580705.9789374\n"));
        assert!(text.contains("source:env1\n"));
        assert!(text.contains("tags:a,b\n"));
        assert!(text.ends_with("TEST EVENT\n"));
    }

    #[test]
    fn parse_then_serialize_roundtrips() {
        let ser = EventSerializer::new();
        let parser = EventParser::new();
        let original = sample();
        let bytes = ser.serialize(&original);
        let mut cursor = Cursor::new(bytes);
        let parsed = parser.parse(&mut cursor).unwrap().unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn parse_returns_none_on_clean_eof() {
        let parser = EventParser::new();
        let mut cursor = Cursor::new(Vec::<u8>::new());
        assert!(parser.parse(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn parse_rejects_unknown_header_key() {
        let raw = b"event: 8 8 0\nbogus:x\n\n".to_vec();
        let parser = EventParser::new();
        let mut cursor = Cursor::new(raw);
        assert!(parser.parse(&mut cursor).is_err());
    }

    #[test]
    fn empty_tags_parse_to_empty_vec_not_single_blank() {
        let e = Event::new("id1", "env1", 1.0, vec![], "x").unwrap();
        let ser = EventSerializer::new();
        let bytes = ser.serialize(&e);
        let mut cursor = Cursor::new(bytes);
        let parsed = EventParser::new().parse(&mut cursor).unwrap().unwrap();
        assert!(parsed.tags().is_empty());
    }

    #[test]
    fn concatenated_events_parse_sequentially() {
        let ser = EventSerializer::new();
        let parser = EventParser::new();
        let e1 = Event::new("id1", "env1", 10.0, vec![], "one").unwrap();
        let e2 = Event::new("id2", "env1", 15.0, vec![], "two").unwrap();
        let mut buf = Vec::new();
        ser.write_to(&e1, &mut buf).unwrap();
        ser.write_to(&e2, &mut buf).unwrap();

        let mut cursor = Cursor::new(buf);
        let first = parser.parse(&mut cursor).unwrap().unwrap();
        let second = parser.parse(&mut cursor).unwrap().unwrap();
        let third = parser.parse(&mut cursor).unwrap();
        assert_eq!(first, e1);
        assert_eq!(second, e2);
        assert!(third.is_none());
    }
}
