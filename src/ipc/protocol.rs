use crate::logs::LogEntry;

/// Largest datagram payload kept; longer datagrams are truncated by the socket.
pub const MAX_DATAGRAM_LEN: usize = 1023;

/// Splits an embedded `tag$message` payload.
pub const TAG_DELIMITER: char = '$';

/// Final line of every snapshot dump.
pub const SENTINEL: &str = "EOF\n";

/// Renders entries as `HH:MM:SS (tag): message\n` with the tag left-justified.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineFormat {
    tag_width: usize,
}

impl LineFormat {
    pub fn new(tag_width: usize) -> Self {
        Self { tag_width }
    }

    pub fn render(&self, entry: &LogEntry) -> String {
        format!(
            "{} ({:<width$}): {}\n",
            clock_time(entry.timestamp),
            entry.tag,
            entry.message,
            width = self.tag_width
        )
    }
}

/// Local wall-clock `HH:MM:SS` for a unix timestamp.
pub fn clock_time(timestamp: u64) -> String {
    let time = chrono::DateTime::from_timestamp(timestamp as i64, 0)
        .map(|dt| dt.with_timezone(&chrono::Local))
        .unwrap_or_default();
    time.format("%H:%M:%S").to_string()
}

/// Turns a raw datagram into `(tag, message)`.
///
/// The payload is cut at its first CR or LF. With a static tag the whole text is
/// the message; otherwise everything before the first `$` is the tag.
pub fn decode_datagram(payload: &[u8], static_tag: Option<&str>) -> (String, String) {
    let text = String::from_utf8_lossy(payload);
    let line = first_line(&text);
    match static_tag {
        Some(tag) => (tag.to_string(), line.to_string()),
        None => {
            let (tag, message) = split_tag(line);
            (tag.to_string(), message.to_string())
        }
    }
}

pub fn split_tag(line: &str) -> (&str, &str) {
    line.split_once(TAG_DELIMITER).unwrap_or(("", line))
}

fn first_line(text: &str) -> &str {
    match text.find(['\n', '\r']) {
        Some(end) => &text[..end],
        None => text,
    }
}

/// Builds the datagram `send` puts on the wire.
pub fn encode_datagram(tag: Option<&str>, message: &str) -> String {
    match tag {
        Some(tag) => format!("{tag}{TAG_DELIMITER}{message}"),
        None => message.to_string(),
    }
}
