//! Posture events and the sink boundary.
//!
//! The engine emits one [`PostureEvent`] per classified frame; where those go
//! (a log file, a database, nowhere) is up to the [`EventSink`].

use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::engine::LabelCounts;
use crate::error::Result;
use crate::posture::PostureLabel;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PostureEvent {
    /// Frame timestamp, milliseconds. May be fractional.
    pub ts: f64,
    pub label: PostureLabel,
    pub score: f64,
}

pub trait EventSink {
    fn record(&mut self, event: &PostureEvent) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Writes one JSON object per line.
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> EventSink for JsonLinesSink<W> {
    fn record(&mut self, event: &PostureEvent) -> Result<()> {
        serde_json::to_writer(&mut self.writer, event)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Vec<PostureEvent>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[PostureEvent] {
        &self.events
    }

    pub fn counts_since(&self, since_ts: Option<f64>) -> LabelCounts {
        count_since(&self.events, since_ts)
    }
}

impl EventSink for MemorySink {
    fn record(&mut self, event: &PostureEvent) -> Result<()> {
        self.events.push(*event);
        Ok(())
    }
}

/// Per-label totals over stored events, optionally only those strictly after
/// `since_ts`.
pub fn count_since<'a>(
    events: impl IntoIterator<Item = &'a PostureEvent>,
    since_ts: Option<f64>,
) -> LabelCounts {
    events
        .into_iter()
        .filter(|e| since_ts.map_or(true, |since| e.ts > since))
        .map(|e| e.label)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(ts: f64, label: PostureLabel) -> PostureEvent {
        PostureEvent {
            ts,
            label,
            score: 0.25,
        }
    }

    #[test]
    fn json_lines_output() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.record(&event(10.5, PostureLabel::NeckTilt)).unwrap();
        sink.record(&event(11.0, PostureLabel::Normal)).unwrap();
        sink.flush().unwrap();

        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], r#"{"ts":10.5,"label":"neck_tilt","score":0.25}"#);
        let back: PostureEvent = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(back, event(11.0, PostureLabel::Normal));
    }

    #[test]
    fn counts_respect_since() {
        let mut sink = MemorySink::new();
        for (ts, label) in [
            (1.0, PostureLabel::Normal),
            (2.0, PostureLabel::ForwardHead),
            (3.0, PostureLabel::ForwardHead),
            (4.0, PostureLabel::LeaningBack),
        ] {
            sink.record(&event(ts, label)).unwrap();
        }

        let all = sink.counts_since(None);
        assert_eq!(all.total(), 4);
        assert_eq!(all.get(PostureLabel::ForwardHead), 2);

        let recent = sink.counts_since(Some(2.0));
        assert_eq!(recent.total(), 2);
        assert_eq!(recent.get(PostureLabel::Normal), 0);
        assert_eq!(recent.get(PostureLabel::LeaningBack), 1);
    }
}
