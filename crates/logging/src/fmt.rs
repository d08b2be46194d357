//! Render `tracing` events into a (level, target, message) triple.
//!
//! The message field comes first; any other fields follow in `key=value`
//! form, so structured context such as `pid=…` survives forwarding.

use std::fmt::{Debug, Write};

use tracing::{
    Event,
    field::{Field, Visit},
};

/// Rendered fields extracted from a tracing Event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedLog {
    /// Severity level (e.g., INFO, WARN) for the event.
    pub level: String,
    /// Event target (typically the module path).
    pub target: String,
    /// Message followed by the remaining fields.
    pub message: String,
}

/// Collects the message and the remaining fields of one event.
#[derive(Default)]
struct FieldCollector {
    /// The `message` field, if present.
    message: Option<String>,
    /// Other fields rendered as `key=value`, space separated.
    fields: String,
}

impl FieldCollector {
    /// Append one non-message field.
    fn push(&mut self, name: &str, value: &dyn Debug) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ignored = write!(&mut self.fields, "{name}={value:?}");
    }

    /// Final message text.
    fn finish(self) -> String {
        match self.message {
            Some(msg) if self.fields.is_empty() => msg,
            Some(msg) => format!("{msg} {}", self.fields),
            None => self.fields,
        }
    }
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.push(field.name(), &value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{value:?}"));
        } else {
            self.push(field.name(), value);
        }
    }
}

/// Extract a concise triple (level, target, message) from a tracing Event.
pub fn render_event(event: &Event<'_>) -> RenderedLog {
    let meta = event.metadata();
    let mut collector = FieldCollector::default();
    event.record(&mut collector);
    RenderedLog {
        level: meta.level().to_string(),
        target: meta.target().to_string(),
        message: collector.finish(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_then_fields() {
        let mut c = FieldCollector::default();
        c.message = Some("tracking application".into());
        c.push("pid", &42);
        c.push("app", &"Xcode");
        assert_eq!(c.finish(), "tracking application pid=42 app=\"Xcode\"");
    }

    #[test]
    fn fields_only() {
        let mut c = FieldCollector::default();
        c.push("removed", &3);
        assert_eq!(c.finish(), "removed=3");
    }
}
