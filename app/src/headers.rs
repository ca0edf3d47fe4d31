//! Header strings derived from the command line: request URI, From, To,
//! Contact and the user supplied extra headers.

use std::net::SocketAddr;

use log::warn;
use sip_core::{Header, SipUri};

use crate::AppError;

pub const MAX_CUSTOM_HEADERS: usize = 12;
pub const DEFAULT_USER: &str = "sippak";

pub type CustomHeaders = heapless::Vec<Header, MAX_CUSTOM_HEADERS>;

/// Destination as a request URI; a bare `user@host` gets `sip:`.
pub fn request_uri(destination: &str) -> Result<SipUri, AppError> {
    SipUri::parse(destination)
        .map_err(|_| AppError::InvalidArgument(format!("invalid destination URI {:?}", destination)))
}

/// `-u` if given, else the user part of the destination.
pub fn local_user<'a>(username: Option<&'a str>, ruri: &'a SipUri) -> &'a str {
    username
        .or(ruri.user.as_deref())
        .unwrap_or(DEFAULT_USER)
}

/// Address of record `sip:user@host` on the destination domain.
pub fn aor(user: &str, ruri: &SipUri) -> String {
    format!("{}{}@{}", ruri.scheme(), user, ruri.host)
}

pub fn from_header(display: Option<&str>, user: &str, ruri: &SipUri) -> String {
    match display.filter(|d| !d.is_empty()) {
        Some(display) => format!("\"{}\" <{}>", display.replace('"', ""), aor(user, ruri)),
        None => format!("<{}>", aor(user, ruri)),
    }
}

pub fn to_header(ruri: &SipUri) -> String {
    format!("<{}>", ruri)
}

/// Explicit contact (validated), or one built from the local address.
pub fn contact_header(custom: Option<&str>, user: &str, local: SocketAddr) -> Result<String, AppError> {
    match custom {
        Some(contact) => {
            let uri = SipUri::parse(contact)
                .map_err(|_| AppError::InvalidArgument(format!("invalid contact {:?}", contact)))?;
            Ok(format!("<{}>", uri))
        }
        None => Ok(format!("<sip:{}@{}>", user, local)),
    }
}

/// Parse `Name: value` / `Name:value` options. Anything past the limit is
/// dropped with a warning; a malformed entry is a configuration error.
pub fn custom_headers(raw: &[String]) -> Result<CustomHeaders, AppError> {
    let mut out = CustomHeaders::new();
    for entry in raw {
        let header = parse_custom_header(entry)?;
        if out.push(header).is_err() {
            warn!(
                "Only {} custom headers are allowed, ignoring {:?}",
                MAX_CUSTOM_HEADERS, entry
            );
        }
    }
    Ok(out)
}

fn parse_custom_header(entry: &str) -> Result<Header, AppError> {
    let invalid = || AppError::InvalidArgument(format!("invalid header {:?}, expected \"Name: value\"", entry));
    let (name, value) = entry.split_once(':').ok_or_else(invalid)?;
    let name = name.trim();
    let value = value.trim();
    let name_ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_.!%*+`'~".contains(c));
    if !name_ok || value.is_empty() {
        return Err(invalid());
    }
    Ok(Header::new(name, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_destination_becomes_sip_uri() {
        let ruri = request_uri("alice@example.com:5070").unwrap();
        assert_eq!(ruri.to_string(), "sip:alice@example.com:5070");
        assert!(request_uri("http://example.com").is_err());
    }

    #[test]
    fn non_ascii_destination_is_accepted_or_rejected_cleanly() {
        let ruri = request_uri("abcé@example.com").unwrap();
        assert_eq!(ruri.to_string(), "sip:abcé@example.com");
        assert!(matches!(request_uri("sipé@"), Err(AppError::InvalidArgument(_))));
    }

    #[test]
    fn from_uses_display_name_and_user() {
        let ruri = request_uri("sip:bob@example.com").unwrap();
        assert_eq!(local_user(None, &ruri), "bob");
        assert_eq!(local_user(Some("alice"), &ruri), "alice");
        assert_eq!(
            from_header(Some("Alice"), "alice", &ruri),
            "\"Alice\" <sip:alice@example.com>"
        );
        assert_eq!(from_header(None, "alice", &ruri), "<sip:alice@example.com>");
        assert_eq!(to_header(&ruri), "<sip:bob@example.com>");

        let host_only = request_uri("example.com").unwrap();
        assert_eq!(local_user(None, &host_only), DEFAULT_USER);
    }

    #[test]
    fn contact_is_generated_or_validated() {
        let local: SocketAddr = "192.0.2.1:5062".parse().unwrap();
        assert_eq!(
            contact_header(None, "alice", local).unwrap(),
            "<sip:alice@192.0.2.1:5062>"
        );
        assert_eq!(
            contact_header(Some("sip:alice@10.10.10.1:123"), "alice", local).unwrap(),
            "<sip:alice@10.10.10.1:123>"
        );
    }

    #[test]
    fn custom_header_forms() {
        let raw = vec!["X-Foo: bar".to_string(), "X-Assert:sip:123@sip.com".to_string()];
        let headers = custom_headers(&raw).unwrap();
        assert_eq!(headers[0], Header::new("X-Foo", "bar"));
        assert_eq!(headers[1], Header::new("X-Assert", "sip:123@sip.com"));
    }

    #[test]
    fn malformed_custom_header_is_rejected() {
        for bad in ["NoColon", ": value", "X-Foo:", "Bad Name: x"] {
            assert!(custom_headers(&[bad.to_string()]).is_err(), "{bad}");
        }
    }

    #[test]
    fn extra_custom_headers_are_dropped() {
        let raw: Vec<String> = (0..15).map(|i| format!("X-H{i}: {i}")).collect();
        let headers = custom_headers(&raw).unwrap();
        assert_eq!(headers.len(), MAX_CUSTOM_HEADERS);
        assert_eq!(headers[11], Header::new("X-H11", "11"));
    }
}
