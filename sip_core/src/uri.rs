use core::fmt;

use crate::{Result, SipError};

pub const DEFAULT_SIP_PORT: u16 = 5060;

/// Just enough of a SIP URI to route a request: scheme, user, host,
/// port and the raw parameter tail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipUri {
    pub sips: bool,
    pub user: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    pub params: String,
}

impl SipUri {
    /// Accepts `sip:user@host:port;params`, `<sip:...>`, or a bare
    /// `user@host` / `host` which is treated as `sip:`.
    pub fn parse(input: &str) -> Result<Self> {
        let mut s = input.trim();
        if let (Some(start), Some(end)) = (s.find('<'), s.rfind('>')) {
            if start < end {
                s = &s[start + 1..end];
            }
        }

        let (sips, rest) = if let Some(rest) = strip_scheme(s, "sips:") {
            (true, rest)
        } else if let Some(rest) = strip_scheme(s, "sip:") {
            (false, rest)
        } else if s.contains("://") {
            return Err(SipError::InvalidUri(input.to_string()));
        } else {
            (false, s)
        };

        let (addr, params) = match rest.find(';') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };
        // Headers part (?...) is not used for routing.
        let addr = addr.split('?').next().unwrap_or(addr);

        let (user, hostport) = match addr.rfind('@') {
            Some(idx) => (Some(&addr[..idx]), &addr[idx + 1..]),
            None => (None, addr),
        };

        let (host, port) = split_host_port(hostport)
            .ok_or_else(|| SipError::InvalidUri(input.to_string()))?;
        if host.is_empty() {
            return Err(SipError::InvalidUri(input.to_string()));
        }

        Ok(Self {
            sips,
            user: user.filter(|u| !u.is_empty()).map(str::to_string),
            host: host.to_string(),
            port,
            params: params.to_string(),
        })
    }

    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_SIP_PORT)
    }

    /// `sip:host[:port]`, the form used as a REGISTER request URI.
    pub fn host_uri(&self) -> String {
        let mut out = String::from(self.scheme());
        push_host_port(&mut out, &self.host, self.port);
        out
    }

    pub fn scheme(&self) -> &'static str {
        if self.sips {
            "sips:"
        } else {
            "sip:"
        }
    }
}

impl fmt::Display for SipUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::from(self.scheme());
        if let Some(user) = &self.user {
            out.push_str(user);
            out.push('@');
        }
        push_host_port(&mut out, &self.host, self.port);
        out.push_str(&self.params);
        f.write_str(&out)
    }
}

fn strip_scheme<'a>(s: &'a str, scheme: &str) -> Option<&'a str> {
    let prefix = s.get(..scheme.len())?;
    if prefix.eq_ignore_ascii_case(scheme) {
        s.get(scheme.len()..)
    } else {
        None
    }
}

fn push_host_port(out: &mut String, host: &str, port: Option<u16>) {
    if host.contains(':') {
        out.push('[');
        out.push_str(host);
        out.push(']');
    } else {
        out.push_str(host);
    }
    if let Some(port) = port {
        out.push(':');
        out.push_str(&port.to_string());
    }
}

fn split_host_port(hostport: &str) -> Option<(&str, Option<u16>)> {
    if let Some(rest) = hostport.strip_prefix('[') {
        let end = rest.find(']')?;
        let host = &rest[..end];
        let tail = &rest[end + 1..];
        return match tail.strip_prefix(':') {
            Some(port) => Some((host, Some(port.parse().ok()?))),
            None if tail.is_empty() => Some((host, None)),
            None => None,
        };
    }
    match hostport.rsplit_once(':') {
        Some((host, port)) => Some((host, Some(port.parse().ok()?))),
        None => Some((hostport, None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_uri() {
        let uri = SipUri::parse("sip:alice@example.com:5070;transport=udp").unwrap();
        assert_eq!(uri.user.as_deref(), Some("alice"));
        assert_eq!(uri.host, "example.com");
        assert_eq!(uri.port, Some(5070));
        assert_eq!(uri.params, ";transport=udp");
        assert_eq!(uri.to_string(), "sip:alice@example.com:5070;transport=udp");
        assert_eq!(uri.host_uri(), "sip:example.com:5070");
    }

    #[test]
    fn bare_destination_defaults_to_sip_scheme() {
        let uri = SipUri::parse("bob@10.0.0.1").unwrap();
        assert!(!uri.sips);
        assert_eq!(uri.to_string(), "sip:bob@10.0.0.1");
        assert_eq!(uri.port_or_default(), 5060);
    }

    #[test]
    fn strips_name_addr_brackets() {
        let uri = SipUri::parse("\"Bob\" <sip:bob@[2001:db8::1]:5061>").unwrap();
        assert_eq!(uri.host, "2001:db8::1");
        assert_eq!(uri.port, Some(5061));
    }

    #[test]
    fn rejects_invalid() {
        assert!(SipUri::parse("sip:alice@").is_err());
        assert!(SipUri::parse("http://example.com").is_err());
        assert!(SipUri::parse("sip:host:notaport").is_err());
    }

    #[test]
    fn multibyte_input_near_scheme_does_not_panic() {
        let uri = SipUri::parse("abcé@example.com").unwrap();
        assert_eq!(uri.user.as_deref(), Some("abcé"));
        assert_eq!(uri.host, "example.com");

        let uri = SipUri::parse("sipé@example.com").unwrap();
        assert_eq!(uri.user.as_deref(), Some("sipé"));
        assert!(SipUri::parse("ééé").is_ok());
        assert!(SipUri::parse("sip:é@").is_err());
    }
}
