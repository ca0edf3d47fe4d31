use crate::{Header, Method, Request};

/// Assembles an out-of-dialog request. Via, Route, Max-Forwards and
/// Content-Length are left to the stack, which owns the transport.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    method: Method,
    uri: String,
    from: String,
    to: String,
    contact: Option<String>,
    call_id: String,
    cseq: u32,
    headers: Vec<Header>,
    body: Option<(String, String)>,
}

impl RequestBuilder {
    pub fn new(method: Method, uri: &str, from: &str, to: &str) -> Self {
        Self {
            method,
            uri: uri.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            contact: None,
            call_id: new_call_id(),
            cseq: 1,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn contact(mut self, contact: &str) -> Self {
        self.contact = Some(contact.to_string());
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push(Header::new(name, value));
        self
    }

    pub fn headers<'a, I>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = &'a Header>,
    {
        self.headers.extend(headers.into_iter().cloned());
        self
    }

    pub fn body(mut self, content_type: &str, body: &str) -> Self {
        self.body = Some((content_type.to_string(), body.to_string()));
        self
    }

    pub fn build(self) -> Request {
        let mut req = Request::new(self.method, &self.uri);
        req.add_header(Header::new(
            "From",
            &format!("{};tag={}", self.from, new_tag()),
        ));
        req.add_header(Header::new("To", &self.to));
        req.add_header(Header::new("Call-ID", &self.call_id));
        req.add_header(Header::new(
            "CSeq",
            &format!("{} {}", self.cseq, self.method),
        ));
        if let Some(contact) = &self.contact {
            req.add_header(Header::new("Contact", contact));
        }
        for header in self.headers {
            req.add_header(header);
        }
        if let Some((content_type, body)) = self.body {
            req.set_body(&content_type, &body);
        }
        req
    }
}

pub fn new_tag() -> String {
    format!("{:08x}", rand::random::<u32>())
}

pub fn new_branch() -> String {
    format!("z9hG4bK{:08x}{:04x}", rand::random::<u32>(), rand::random::<u16>())
}

pub fn new_call_id() -> String {
    format!("{:08x}{:08x}", rand::random::<u32>(), rand::random::<u32>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_request_with_tagged_from() {
        let req = RequestBuilder::new(
            Method::Message,
            "sip:bob@example.com",
            "\"Alice\" <sip:alice@example.com>",
            "<sip:bob@example.com>",
        )
        .contact("<sip:alice@192.0.2.1:5060>")
        .header("X-Foo", "bar")
        .body("text/plain", "hi")
        .build();

        assert_eq!(req.method, Method::Message);
        assert!(req.header("From").unwrap().contains(";tag="));
        assert_eq!(req.header("To"), Some("<sip:bob@example.com>"));
        assert_eq!(req.cseq(), Some((1, Method::Message)));
        assert_eq!(req.header("X-Foo"), Some("bar"));
        assert_eq!(req.header("Content-Type"), Some("text/plain"));
        assert_eq!(req.body, "hi");
    }

    #[test]
    fn branches_carry_magic_cookie() {
        assert!(new_branch().starts_with("z9hG4bK"));
        assert_ne!(new_call_id(), new_call_id());
    }
}
