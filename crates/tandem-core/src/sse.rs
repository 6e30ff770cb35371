//! Server-sent events framing.
//!
//! ```
//! use tandem_core::ServerSentEvent;
//!
//! let event = ServerSentEvent::new().event("update").data("line one\nline two");
//! assert_eq!(
//!     event.encode(),
//!     b"event: update\ndata: line one\ndata: line two\n\n".to_vec()
//! );
//! ```

use std::time::Duration;

/// Keep-alive comment sent when no event arrives within the ping interval.
pub const PING: &[u8] = b": ping\n\n";

/// Default keep-alive interval (3 seconds).
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(3);

/// One `text/event-stream` event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerSentEvent {
    id: Option<String>,
    event: Option<String>,
    data: Option<String>,
    retry: Option<u64>,
    comment: Option<String>,
}

impl ServerSentEvent {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Payload; each line becomes its own `data:` line.
    #[must_use]
    pub fn data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    #[must_use]
    pub fn event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Reconnection delay in milliseconds.
    #[must_use]
    pub fn retry(mut self, millis: u64) -> Self {
        self.retry = Some(millis);
        self
    }

    #[must_use]
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Wire form, ending with the blank line that terminates the event.
    ///
    /// Line breaks inside `id` and `event` are dropped since they would
    /// start a new field.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = String::new();
        if let Some(comment) = &self.comment {
            for line in split_lines(comment) {
                out.push_str(": ");
                out.push_str(line);
                out.push('\n');
            }
        }
        if let Some(id) = &self.id {
            push_field(&mut out, "id", &single_line(id));
        }
        if let Some(event) = &self.event {
            push_field(&mut out, "event", &single_line(event));
        }
        if let Some(data) = &self.data {
            for line in split_lines(data) {
                push_field(&mut out, "data", line);
            }
        }
        if let Some(retry) = self.retry {
            push_field(&mut out, "retry", &retry.to_string());
        }
        out.push('\n');
        out.into_bytes()
    }
}

impl From<String> for ServerSentEvent {
    fn from(data: String) -> Self {
        Self::new().data(data)
    }
}

impl From<&str> for ServerSentEvent {
    fn from(data: &str) -> Self {
        Self::new().data(data)
    }
}

fn push_field(out: &mut String, name: &str, value: &str) {
    out.push_str(name);
    out.push_str(": ");
    out.push_str(value);
    out.push('\n');
}

/// Split on `\r\n`, `\n`, or `\r`, keeping a trailing empty line.
fn split_lines(s: &str) -> impl Iterator<Item = &str> {
    s.split('\n').map(|line| line.strip_suffix('\r').unwrap_or(line)).flat_map(|line| line.split('\r'))
}

fn single_line(s: &str) -> String {
    s.chars().filter(|c| !matches!(c, '\r' | '\n')).collect()
}
