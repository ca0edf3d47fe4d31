//! Event package bodies for PUBLISH and NOTIFY.

use core::fmt::Write;

pub const PIDF_CONTENT_TYPE: &str = "application/pidf+xml";
pub const XPIDF_CONTENT_TYPE: &str = "application/xpidf+xml";
pub const MWI_CONTENT_TYPE: &str = "application/simple-message-summary";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceStatus {
    pub open: bool,
    /// Tuple id, usually the contact URI.
    pub id: String,
    pub note: Option<String>,
}

impl PresenceStatus {
    /// `closed` (any case) is closed, everything else is open.
    pub fn from_flag(status: Option<&str>, id: &str, note: Option<&str>) -> Self {
        let open = !matches!(status, Some(s) if s.trim().eq_ignore_ascii_case("closed"));
        Self {
            open,
            id: id.to_string(),
            note: note.map(str::to_string),
        }
    }

    fn basic(&self) -> &'static str {
        if self.open {
            "open"
        } else {
            "closed"
        }
    }
}

/// RFC 3863 presence document with an RPID activity.
pub fn pidf(entity: &str, status: &PresenceStatus) -> String {
    let activity = if status.open { "unknown" } else { "busy" };
    let mut out = String::new();
    let _ = write!(
        out,
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\r\n\
         <presence xmlns=\"urn:ietf:params:xml:ns:pidf\" \
         xmlns:dm=\"urn:ietf:params:xml:ns:pidf:data-model\" \
         xmlns:rpid=\"urn:ietf:params:xml:ns:pidf:rpid\" \
         entity=\"{}\">\r\n\
         <tuple id=\"{}\">\r\n\
         <status><basic>{}</basic></status>\r\n",
        xml_escape(entity),
        xml_escape(&tuple_id(&status.id)),
        status.basic()
    );
    if let Some(note) = &status.note {
        let _ = write!(out, "<note>{}</note>\r\n", xml_escape(note));
    }
    let _ = write!(
        out,
        "</tuple>\r\n\
         <dm:person id=\"p1\">\r\n\
         <rpid:activities><rpid:{}/></rpid:activities>\r\n\
         </dm:person>\r\n\
         </presence>\r\n",
        activity
    );
    out
}

/// Legacy XPIDF document.
pub fn xpidf(entity: &str, status: &PresenceStatus) -> String {
    let mut out = String::new();
    let _ = write!(
        out,
        "<?xml version=\"1.0\"?>\r\n\
         <!DOCTYPE presence PUBLIC \"-//IETF//DTD RFCxxxx XPIDF 1.0//EN\" \"xpidf.dtd\">\r\n\
         <presence>\r\n\
         <presentity uri=\"{};method=SUBSCRIBE\"/>\r\n\
         <atom id=\"{}\">\r\n\
         <address uri=\"{}\">\r\n\
         <status status=\"{}\"/>\r\n\
         </address>\r\n\
         </atom>\r\n\
         </presence>\r\n",
        xml_escape(entity),
        xml_escape(&tuple_id(&status.id)),
        xml_escape(&status.id),
        status.basic()
    );
    out
}

/// RFC 3842 message-summary counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageSummary {
    pub new: u32,
    pub old: u32,
    pub urgent_new: u32,
    pub urgent_old: u32,
}

impl MessageSummary {
    /// Parse `new,old,urgent_new,urgent_old`; missing members are zero.
    pub fn parse(input: &str) -> Option<Self> {
        let mut counts = [0u32; 4];
        let items: Vec<&str> = input.split(',').map(str::trim).collect();
        if items.is_empty() || items.len() > counts.len() {
            return None;
        }
        for (slot, item) in counts.iter_mut().zip(items) {
            *slot = item.parse().ok()?;
        }
        Some(Self {
            new: counts[0],
            old: counts[1],
            urgent_new: counts[2],
            urgent_old: counts[3],
        })
    }
}

pub fn message_summary(account: &str, summary: &MessageSummary) -> String {
    let waiting = if summary.new > 0 { "yes" } else { "no" };
    format!(
        "Messages-Waiting: {}\r\nMessage-Account: {}\r\nVoice-Message: {}/{} ({}/{})\r\n",
        waiting, account, summary.new, summary.old, summary.urgent_new, summary.urgent_old
    )
}

fn tuple_id(id: &str) -> String {
    // Tuple ids are XML ids: keep it to alphanumerics.
    let cleaned: String = id.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    if cleaned.is_empty() {
        "t1".to_string()
    } else {
        format!("t{}", cleaned)
    }
}

fn xml_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_status_maps_to_busy_activity() {
        let status = PresenceStatus::from_flag(Some("Closed"), "sip:a@b", Some("out & about"));
        let doc = pidf("sip:alice@example.com", &status);
        assert!(doc.contains("<basic>closed</basic>"));
        assert!(doc.contains("<rpid:busy/>"));
        assert!(doc.contains("<note>out &amp; about</note>"));
    }

    #[test]
    fn unknown_status_is_open() {
        let status = PresenceStatus::from_flag(Some("away"), "sip:a@b", None);
        assert!(status.open);
        let doc = xpidf("sip:alice@example.com", &status);
        assert!(doc.contains("status=\"open\""));
        assert!(!doc.contains("<note>"));
    }

    #[test]
    fn message_summary_pads_missing_counters() {
        let summary = MessageSummary::parse("3,1").unwrap();
        assert_eq!(summary.urgent_new, 0);
        let body = message_summary("sip:vm@example.com", &summary);
        assert!(body.starts_with("Messages-Waiting: yes\r\n"));
        assert!(body.contains("Voice-Message: 3/1 (0/0)"));
        assert!(MessageSummary::parse("1,2,3,4,5").is_none());
        assert!(MessageSummary::parse("x").is_none());
    }
}
