//! Server-sent event parsing for streaming responses.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Marker some providers send as the final `data:` payload.
const DONE_MARKER: &str = "[DONE]";

/// One event from a `text/event-stream` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub index: usize,
    /// The `event:` field, `message` when absent.
    pub event: String,
    /// Parsed JSON payload, the raw text when it is not JSON, or `null`.
    pub data: Value,
}

/// Return `true` when the content type denotes an SSE body.
pub fn is_event_stream(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| ct.contains("text/event-stream"))
}

/// Parse a raw SSE body into events.
///
/// ```text
/// event: delta
/// data: {"content":"Hel"}
///
/// data: [DONE]
/// ```
pub fn parse_events(body: &str) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    let mut event_type: Option<String> = None;
    let mut data_parts: Vec<String> = Vec::new();

    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            flush(&mut events, &mut event_type, &mut data_parts);
        } else if let Some(stripped) = line.strip_prefix("event:") {
            event_type = Some(stripped.trim().to_string());
        } else if let Some(stripped) = line.strip_prefix("data:") {
            data_parts.push(stripped.trim().to_string());
        }
        // `id:`, `retry:` and `:` comment lines carry nothing we assert on.
    }
    flush(&mut events, &mut event_type, &mut data_parts);

    events
}

fn flush(
    events: &mut Vec<StreamEvent>,
    event_type: &mut Option<String>,
    data_parts: &mut Vec<String>,
) {
    if event_type.is_none() && data_parts.is_empty() {
        return;
    }
    let raw = data_parts.join("\n");
    data_parts.clear();
    let mut event = event_type.take().unwrap_or_else(|| "message".to_string());

    let data = if raw == DONE_MARKER {
        event = "done".to_string();
        Value::Null
    } else if raw.is_empty() {
        Value::Null
    } else {
        serde_json::from_str::<Value>(&raw).unwrap_or(Value::String(raw))
    };

    events.push(StreamEvent {
        index: events.len(),
        event,
        data,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_openai_style_stream() {
        let body = "data: {\"choices\": [{\"delta\": {\"content\": \"Hello\"}}]}\n\n\
                    data: {\"choices\": [{\"delta\": {\"content\": \" world\"}}]}\n\n\
                    data: [DONE]\n\n";
        let events = parse_events(body);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event, "message");
        assert_eq!(
            events[0].data,
            json!({"choices": [{"delta": {"content": "Hello"}}]})
        );
        assert_eq!(events[1].index, 1);
        assert_eq!(events[2].event, "done");
        assert_eq!(events[2].data, Value::Null);
    }

    #[test]
    fn test_named_events_and_text_payloads() {
        let body = "event: tool_call\ndata: {\"id\":\"tc_1\"}\n\nevent: note\ndata: plain text\n";
        let events = parse_events(body);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "tool_call");
        assert_eq!(events[0].data, json!({"id": "tc_1"}));
        assert_eq!(events[1].event, "note");
        assert_eq!(events[1].data, json!("plain text"));
    }

    #[test]
    fn test_multiline_data_is_joined() {
        let body = "data: line one\ndata: line two\n\n";
        let events = parse_events(body);
        assert_eq!(events[0].data, json!("line one\nline two"));
    }

    #[test]
    fn test_comments_and_crlf() {
        let body = ": keep-alive\r\n\r\ndata: 1\r\n\r\n";
        let events = parse_events(body);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, json!(1));
    }

    #[test]
    fn test_content_type_detection() {
        assert!(is_event_stream(Some("text/event-stream; charset=utf-8")));
        assert!(!is_event_stream(Some("application/json")));
        assert!(!is_event_stream(None));
    }
}
