//! Incremental parser for `text/event-stream` bodies.
//!
//! Shared by the completion stream and the HTTP based MCP transports.

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    /// Feed arbitrary bytes into the parser and drain complete events.
    ///
    /// Bytes are buffered until a blank line ends the frame, so multi-byte
    /// characters split across chunks decode correctly.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend(bytes.iter().copied().filter(|b| *b != b'\r'));
        let mut events = Vec::new();

        while let Some(split) = self.buffer.windows(2).position(|pair| pair == b"\n\n") {
            let frame: Vec<u8> = self.buffer.drain(..split + 2).collect();
            if let Some(event) = parse_frame(&String::from_utf8_lossy(&frame[..split])) {
                events.push(event);
            }
        }

        events
    }

    /// Flush a final frame that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let frame = std::mem::take(&mut self.buffer);
        parse_frame(&String::from_utf8_lossy(&frame))
    }
}

fn parse_frame(frame: &str) -> Option<SseEvent> {
    let mut event = SseEvent::default();
    let mut data_lines = Vec::new();

    for line in frame.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "data" => data_lines.push(value),
            "event" => event.event = Some(value.to_string()),
            "id" => event.id = Some(value.to_string()),
            _ => {}
        }
    }

    if data_lines.is_empty() && event.event.is_none() {
        return None;
    }
    event.data = data_lines.join("\n");
    Some(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_split_across_chunks() {
        let mut parser = SseParser::default();
        assert!(parser.feed(b"data: {\"a\":").is_empty());

        let events = parser.feed(b"1}\n\nevent: endpoint\ndata: /messages?session=7\n\n");
        assert_eq!(
            events,
            vec![
                SseEvent {
                    event: None,
                    data: "{\"a\":1}".into(),
                    id: None
                },
                SseEvent {
                    event: Some("endpoint".into()),
                    data: "/messages?session=7".into(),
                    id: None
                },
            ]
        );
    }

    #[test]
    fn test_crlf_comments_and_multiline_data() {
        let mut parser = SseParser::default();
        let events = parser.feed(b": keep-alive\r\n\r\nid: 4\r\ndata: one\r\ndata: two\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "one\ntwo");
        assert_eq!(events[0].id.as_deref(), Some("4"));
    }

    #[test]
    fn test_multibyte_split_and_finish() {
        let mut parser = SseParser::default();
        let text = "data: héllo".as_bytes();
        assert!(parser.feed(&text[..8]).is_empty());
        assert!(parser.feed(&text[8..]).is_empty());
        assert_eq!(parser.finish().unwrap().data, "héllo");
        assert!(parser.finish().is_none());
    }
}
