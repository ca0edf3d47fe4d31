use core::fmt::Write;

use crate::{Result, SipError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Options,
    Register,
    Invite,
    Ack,
    Bye,
    Cancel,
    Publish,
    Subscribe,
    Notify,
    Refer,
    Message,
    /// Any other well-formed method token. Only ever seen on incoming
    /// requests, which get a 501.
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    pub const SIP_2_0: Version = Version { major: 2, minor: 0 };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

pub type HeaderList = Vec<Header>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub uri: String,
    pub version: Version,
    pub headers: HeaderList,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub version: Version,
    pub status_code: u16,
    pub reason: String,
    pub headers: HeaderList,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Header {
    pub fn new(name: &str, value: &str) -> Self {
        Header {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    pub fn is(&self, name: &str) -> bool {
        names_match(&self.name, name)
    }
}

impl Request {
    pub fn new(method: Method, uri: &str) -> Self {
        Self {
            method,
            uri: uri.to_string(),
            version: Version::SIP_2_0,
            headers: HeaderList::new(),
            body: String::new(),
        }
    }

    pub fn add_header(&mut self, header: Header) {
        self.headers.push(header);
    }

    /// Insert a header in front of all others (used for Via).
    pub fn push_front_header(&mut self, header: Header) {
        self.headers.insert(0, header);
    }

    /// Replace every header of that name with a single new one.
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.remove_header(name);
        self.headers.push(Header::new(name, value));
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers.retain(|h| !h.is(name));
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }

    pub fn set_body(&mut self, content_type: &str, body: &str) {
        self.set_header("Content-Type", content_type);
        self.body.clear();
        self.body.push_str(body);
    }

    pub fn cseq(&self) -> Option<(u32, Method)> {
        self.header("CSeq").and_then(parse_cseq)
    }

    /// Serialise to wire format. Content-Length always reflects the body.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = write!(
            out,
            "{} {} SIP/{}.{}\r\n",
            self.method, self.uri, self.version.major, self.version.minor
        );
        render_headers_and_body(&mut out, &self.headers, &self.body);
        out
    }
}

impl Response {
    pub fn new(status_code: u16, reason: &str) -> Self {
        Self {
            version: Version::SIP_2_0,
            status_code,
            reason: reason.to_string(),
            headers: HeaderList::new(),
            body: String::new(),
        }
    }

    pub fn add_header(&mut self, header: Header) {
        self.headers.push(header);
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }

    pub fn set_body(&mut self, content_type: &str, body: &str) {
        self.headers.retain(|h| !h.is("Content-Type"));
        self.headers.push(Header::new("Content-Type", content_type));
        self.body.clear();
        self.body.push_str(body);
    }

    pub fn cseq(&self) -> Option<(u32, Method)> {
        self.header("CSeq").and_then(parse_cseq)
    }

    pub fn is_provisional(&self) -> bool {
        self.status_code < 200
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    pub fn is_challenge(&self) -> bool {
        self.status_code == 401 || self.status_code == 407
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = write!(
            out,
            "SIP/{}.{} {} {}\r\n",
            self.version.major, self.version.minor, self.status_code, self.reason
        );
        render_headers_and_body(&mut out, &self.headers, &self.body);
        out
    }
}

fn render_headers_and_body(out: &mut String, headers: &HeaderList, body: &str) {
    for header in headers.iter().filter(|h| !h.is("Content-Length")) {
        let _ = write!(out, "{}: {}\r\n", header.name, header.value);
    }
    let _ = write!(out, "Content-Length: {}\r\n\r\n{}", body.len(), body);
}

impl core::fmt::Display for Method {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Options => "OPTIONS",
            Method::Register => "REGISTER",
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
            Method::Publish => "PUBLISH",
            Method::Subscribe => "SUBSCRIBE",
            Method::Notify => "NOTIFY",
            Method::Refer => "REFER",
            Method::Message => "MESSAGE",
            Method::Unknown => "UNKNOWN",
        }
    }
}

// Basic parser: decide request vs response by first line.
pub fn parse_message(input: &str) -> Result<Message> {
    let (head, body) = match input.find("\r\n\r\n") {
        Some(idx) => (&input[..idx], &input[idx + 4..]),
        None => match input.find("\n\n") {
            Some(idx) => (&input[..idx], &input[idx + 2..]),
            None => (input, ""),
        },
    };

    let mut lines = head.lines();
    let first = lines.next().ok_or(SipError::Invalid("empty message"))?;

    if first.starts_with("SIP/") {
        parse_response(first, &mut lines, body)
    } else {
        parse_request(first, &mut lines, body)
    }
}

fn parse_request<'a, I>(start_line: &str, lines: &mut I, body: &str) -> Result<Message>
where
    I: Iterator<Item = &'a str>,
{
    let mut parts = start_line.split_whitespace();
    let method = parts.next().ok_or(SipError::Invalid("missing method"))?;
    let uri = parts.next().ok_or(SipError::Invalid("missing uri"))?;
    let version = parts.next().ok_or(SipError::Invalid("missing version"))?;
    if !version.starts_with("SIP/2.0") {
        return Err(SipError::Invalid("unsupported version"));
    }

    let mut req = Request::new(parse_method(method)?, uri);
    req.headers = parse_headers(lines)?;
    req.body = trim_body(&req.headers, body);
    Ok(Message::Request(req))
}

fn parse_response<'a, I>(start_line: &str, lines: &mut I, body: &str) -> Result<Message>
where
    I: Iterator<Item = &'a str>,
{
    let mut parts = start_line.splitn(3, ' ');
    let version = parts.next().ok_or(SipError::Invalid("missing version"))?;
    if !version.starts_with("SIP/2.0") {
        return Err(SipError::Invalid("unsupported version"));
    }
    let status: u16 = parts
        .next()
        .ok_or(SipError::Invalid("missing status"))?
        .trim()
        .parse()
        .map_err(|_| SipError::Invalid("status parse"))?;
    if !(100..700).contains(&status) {
        return Err(SipError::Invalid("status out of range"));
    }
    let reason = parts.next().unwrap_or("").trim();

    let mut resp = Response::new(status, reason);
    resp.headers = parse_headers(lines)?;
    resp.body = trim_body(&resp.headers, body);
    Ok(Message::Response(resp))
}

fn parse_headers<'a, I>(lines: &mut I) -> Result<HeaderList>
where
    I: Iterator<Item = &'a str>,
{
    let mut headers = HeaderList::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        // Folded continuation line.
        if line.starts_with(' ') || line.starts_with('\t') {
            let last = headers
                .last_mut()
                .ok_or(SipError::Invalid("continuation without header"))?;
            last.value.push(' ');
            last.value.push_str(line.trim());
            continue;
        }
        let mut parts = line.splitn(2, ':');
        let name = parts
            .next()
            .ok_or(SipError::Invalid("header name"))?
            .trim();
        let value = parts
            .next()
            .ok_or(SipError::Invalid("header value"))?
            .trim();
        if name.is_empty() {
            return Err(SipError::Invalid("header name"));
        }
        headers.push(Header::new(name, value));
    }
    Ok(headers)
}

fn trim_body(headers: &HeaderList, body: &str) -> String {
    match header_value(headers, "Content-Length").and_then(|v| v.parse::<usize>().ok()) {
        Some(len) if len <= body.len() && body.is_char_boundary(len) => body[..len].to_string(),
        _ => body.to_string(),
    }
}

fn parse_method(input: &str) -> Result<Method> {
    match input {
        "OPTIONS" => Ok(Method::Options),
        "REGISTER" => Ok(Method::Register),
        "INVITE" => Ok(Method::Invite),
        "ACK" => Ok(Method::Ack),
        "BYE" => Ok(Method::Bye),
        "CANCEL" => Ok(Method::Cancel),
        "PUBLISH" => Ok(Method::Publish),
        "SUBSCRIBE" => Ok(Method::Subscribe),
        "NOTIFY" => Ok(Method::Notify),
        "REFER" => Ok(Method::Refer),
        "MESSAGE" => Ok(Method::Message),
        other if is_token(other) => Ok(Method::Unknown),
        _ => Err(SipError::Invalid("bad method")),
    }
}

fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-.!%*_+`'~".contains(c))
}

fn parse_cseq(value: &str) -> Option<(u32, Method)> {
    let mut parts = value.split_whitespace();
    let seq = parts.next()?.parse::<u32>().ok()?;
    let method = parse_method(parts.next()?).ok()?;
    Some((seq, method))
}

/// RFC 3261 compact header forms.
fn compact_form(name: &str) -> Option<&'static str> {
    let full = match name.to_ascii_lowercase().as_str() {
        "i" => "Call-ID",
        "m" => "Contact",
        "e" => "Content-Encoding",
        "l" => "Content-Length",
        "c" => "Content-Type",
        "f" => "From",
        "s" => "Subject",
        "k" => "Supported",
        "t" => "To",
        "v" => "Via",
        "o" => "Event",
        "r" => "Refer-To",
        "b" => "Referred-By",
        _ => return None,
    };
    Some(full)
}

fn names_match(a: &str, b: &str) -> bool {
    let a = compact_form(a).unwrap_or(a);
    let b = compact_form(b).unwrap_or(b);
    a.eq_ignore_ascii_case(b)
}

pub fn header_value<'a>(headers: &'a HeaderList, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.is(name))
        .map(|h| h.value.as_str())
}

pub fn header_values<'a>(headers: &'a HeaderList, name: &'a str) -> impl Iterator<Item = &'a str> {
    headers
        .iter()
        .filter(move |h| h.is(name))
        .map(|h| h.value.as_str())
}

/// Split a comma separated header value, ignoring commas inside quotes
/// and angle brackets.
pub fn split_header_list(value: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut in_angle = false;
    for (idx, ch) in value.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => in_angle = true,
            '>' if !in_quotes => in_angle = false,
            ',' if !in_quotes && !in_angle => {
                let item = value[start..idx].trim();
                if !item.is_empty() {
                    out.push(item);
                }
                start = idx + 1;
            }
            _ => {}
        }
    }
    let item = value[start..].trim();
    if !item.is_empty() {
        out.push(item);
    }
    out
}

/// Value of a `;name=value` parameter inside a header value.
pub fn header_param<'a>(value: &'a str, name: &str) -> Option<&'a str> {
    // Skip the part inside <...> so URI parameters are not picked up.
    let params_start = value.rfind('>').map(|i| i + 1).unwrap_or(0);
    value[params_start..].split(';').skip(1).find_map(|p| {
        let mut kv = p.splitn(2, '=');
        let key = kv.next()?.trim();
        if key.eq_ignore_ascii_case(name) {
            Some(kv.next().unwrap_or("").trim())
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_request_and_response() {
        let mut req = Request::new(Method::Invite, "sip:100@example.com");
        req.add_header(Header::new("Via", "SIP/2.0/UDP 192.0.2.1"));
        let rendered = req.render();
        assert!(rendered.starts_with("INVITE sip:100@example.com SIP/2.0\r\n"));
        assert!(rendered.ends_with("Content-Length: 0\r\n\r\n"));

        let mut resp = Response::new(200, "OK");
        resp.add_header(Header::new("Content-Length", "0"));
        let rendered_resp = resp.render();
        assert!(rendered_resp.starts_with("SIP/2.0 200 OK"));
        assert_eq!(rendered_resp.matches("Content-Length").count(), 1);
    }

    #[test]
    fn parses_request() {
        let raw = "OPTIONS sip:100@example.com SIP/2.0\r\nVia: SIP/2.0/UDP host\r\n\r\n";
        let message = parse_message(raw).unwrap();
        match message {
            Message::Request(r) => assert_eq!(r.method, Method::Options),
            _ => panic!("expected request"),
        }
    }

    #[test]
    fn unimplemented_method_is_parsed_as_unknown() {
        let raw = "INFO sip:100@example.com SIP/2.0\r\nCSeq: 7 INFO\r\n\r\n";
        let Message::Request(req) = parse_message(raw).unwrap() else {
            panic!("expected request");
        };
        assert_eq!(req.method, Method::Unknown);
        assert_eq!(req.header("CSeq"), Some("7 INFO"));
        assert!(parse_message("IN<FO sip:a@b SIP/2.0\r\n\r\n").is_err());
    }

    #[test]
    fn parses_response_with_multi_word_reason_and_body() {
        let raw = "SIP/2.0 487 Request Terminated\r\n\
                   CSeq: 1 INVITE\r\n\
                   l: 5\r\n\r\nhello world";
        let Message::Response(resp) = parse_message(raw).unwrap() else {
            panic!("expected response");
        };
        assert_eq!(resp.status_code, 487);
        assert_eq!(resp.reason, "Request Terminated");
        assert_eq!(resp.body, "hello");
        assert_eq!(resp.cseq(), Some((1, Method::Invite)));
    }

    #[test]
    fn compact_names_match_full_names() {
        let headers = vec![Header::new("i", "abc@host"), Header::new("m", "<sip:a@b>")];
        assert_eq!(header_value(&headers, "Call-ID"), Some("abc@host"));
        assert_eq!(header_value(&headers, "contact"), Some("<sip:a@b>"));
    }

    #[test]
    fn splits_contact_lists() {
        let items = split_header_list(r#""Doe, John" <sip:a@b;x=1,2>;expires=60, <sip:c@d>"#);
        assert_eq!(items.len(), 2);
        assert_eq!(items[1], "<sip:c@d>");
        assert_eq!(header_param(items[0], "expires"), Some("60"));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_message("").is_err());
        assert!(parse_message("HELLO world\r\n\r\n").is_err());
        assert!(parse_message("SIP/2.0 abc Nope\r\n\r\n").is_err());
    }
}
