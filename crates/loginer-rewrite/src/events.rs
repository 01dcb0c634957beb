/// Event kinds the rewrite plugin reports to the supervisor over stdout.
///
/// The wire format is one line per event, `<TAG>payload</TAG>`. Dispatch is a
/// fixed tag table on both ends; unknown tags are ignored by the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A governed request passed through the engine (payload: path).
    Request,
    /// A mutation was applied successfully.
    Info,
    /// A rewrite failed and the original body was passed through.
    Error,
    /// A QR-code login is being created (payload: request path).
    CreateLoginQrcode,
    /// Observed QR-code creation response (payload: JSON body).
    Qrcode,
    /// Observed QR-code token-exchange response (payload: JSON body).
    QrcodeLogin,
}

const TAG_TABLE: [(EventKind, &str); 6] = [
    (EventKind::Request, "REQUEST"),
    (EventKind::Info, "INFO"),
    (EventKind::Error, "ERROR"),
    (EventKind::CreateLoginQrcode, "CreateLoginQRCode"),
    (EventKind::Qrcode, "QRCode"),
    (EventKind::QrcodeLogin, "QRCodeLogin"),
];

impl EventKind {
    pub fn tag(self) -> &'static str {
        TAG_TABLE
            .iter()
            .find(|(kind, _)| *kind == self)
            .map(|(_, tag)| *tag)
            .expect("every event kind has a tag table entry")
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        TAG_TABLE
            .iter()
            .find(|(_, candidate)| *candidate == tag)
            .map(|(kind, _)| *kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineEvent {
    pub kind: EventKind,
    pub payload: String,
}

impl EngineEvent {
    pub fn new(kind: EventKind, payload: impl Into<String>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Renders the event as a `<TAG>payload</TAG>` stdout line.
    pub fn render(&self) -> String {
        let tag = self.kind.tag();
        format!("<{tag}>{}</{tag}>", self.payload)
    }

    /// Parses one stdout line; `None` for anything that is not a well-formed
    /// event with a known tag.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        let rest = line.strip_prefix('<')?;
        let (tag, rest) = rest.split_once('>')?;
        let kind = EventKind::from_tag(tag)?;
        let closing = format!("</{tag}>");
        let payload = rest.strip_suffix(closing.as_str())?;
        Some(Self::new(kind, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::{EngineEvent, EventKind};

    #[test]
    fn event_lines_round_trip_through_the_tag_table() {
        for kind in [
            EventKind::Request,
            EventKind::Info,
            EventKind::Error,
            EventKind::CreateLoginQrcode,
            EventKind::Qrcode,
            EventKind::QrcodeLogin,
        ] {
            let event = EngineEvent::new(kind, "/mpay/api/qrcode/create_login");
            let parsed = EngineEvent::parse_line(&event.render()).expect("parse rendered event");
            assert_eq!(parsed, event);
        }
    }

    #[test]
    fn unknown_tags_are_rejected() {
        assert_eq!(EngineEvent::parse_line("<BOGUS>x</BOGUS>"), None);
        assert_eq!(EngineEvent::parse_line("plain proxy output"), None);
        assert_eq!(EngineEvent::parse_line("<INFO>unterminated"), None);
    }

    #[test]
    fn mismatched_closing_tag_is_rejected() {
        assert_eq!(EngineEvent::parse_line("<INFO>x</ERROR>"), None);
    }

    #[test]
    fn surrounding_whitespace_is_tolerated() {
        let parsed = EngineEvent::parse_line("  <INFO>pc config updated</INFO>\n")
            .expect("parse padded line");
        assert_eq!(parsed.kind, EventKind::Info);
        assert_eq!(parsed.payload, "pc config updated");
    }
}
