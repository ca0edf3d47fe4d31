use core::fmt::Write;

use md5::Digest;

use crate::{Header, Result, SipError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub algorithm: String,
    pub opaque: Option<String>,
    pub qop_auth: bool,
}

/// One credential record used for every challenge in a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// `*` matches any realm.
    pub realm: String,
    pub username: String,
    pub password: String,
    pub scheme: String,
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            realm: "*".to_string(),
            username: username.to_string(),
            password: password.to_string(),
            scheme: "digest".to_string(),
        }
    }

    pub fn matches(&self, challenge: &DigestChallenge) -> bool {
        self.realm == "*" || self.realm == challenge.realm
    }
}

pub fn parse_www_authenticate(input: &str) -> Result<DigestChallenge> {
    let mut parts = input.trim().splitn(2, ' ');
    let scheme = parts.next().ok_or(SipError::Invalid("auth scheme"))?;
    if !scheme.eq_ignore_ascii_case("digest") {
        return Err(SipError::Invalid("auth scheme"));
    }
    let params = parts.next().ok_or(SipError::Invalid("auth params"))?;

    let mut realm: Option<String> = None;
    let mut nonce: Option<String> = None;
    let mut opaque: Option<String> = None;
    let mut algorithm = String::from("MD5");
    let mut qop_auth = false;

    for param in crate::message::split_header_list(params) {
        let mut kv = param.trim().splitn(2, '=');
        let key = kv.next().ok_or(SipError::Invalid("auth key"))?.trim();
        let raw_val = kv
            .next()
            .ok_or(SipError::Invalid("auth value"))?
            .trim()
            .trim_matches('"');
        match key.to_ascii_lowercase().as_str() {
            "realm" => realm = Some(raw_val.to_string()),
            "nonce" => nonce = Some(raw_val.to_string()),
            "opaque" => opaque = Some(raw_val.to_string()),
            "algorithm" => algorithm = raw_val.to_string(),
            "qop" => {
                qop_auth = raw_val
                    .split(',')
                    .any(|q| q.trim().eq_ignore_ascii_case("auth"))
            }
            _ => {}
        }
    }

    if !algorithm.eq_ignore_ascii_case("MD5") {
        return Err(SipError::Invalid("unsupported digest algorithm"));
    }

    Ok(DigestChallenge {
        realm: realm.ok_or(SipError::Invalid("realm"))?,
        nonce: nonce.ok_or(SipError::Invalid("nonce"))?,
        algorithm,
        opaque,
        qop_auth,
    })
}

/// Build `Authorization` (or `Proxy-Authorization` when `proxy` is set)
/// answering `challenge` for `method uri`.
pub fn authorization_header(
    challenge: &DigestChallenge,
    creds: &Credentials,
    method: &str,
    uri: &str,
    proxy: bool,
) -> Header {
    let cnonce = format!("{:08x}", rand::random::<u32>());
    authorization_header_with_cnonce(challenge, creds, method, uri, proxy, &cnonce)
}

fn authorization_header_with_cnonce(
    challenge: &DigestChallenge,
    creds: &Credentials,
    method: &str,
    uri: &str,
    proxy: bool,
    cnonce: &str,
) -> Header {
    const NC: &str = "00000001";
    let qop = challenge.qop_auth.then_some((NC, cnonce));
    let response = compute_digest_response(challenge, creds, method, uri, qop);

    let mut value = String::new();
    let _ = write!(
        value,
        "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\", algorithm={}",
        creds.username, challenge.realm, challenge.nonce, uri, response, challenge.algorithm
    );
    if let Some((nc, cnonce)) = qop {
        let _ = write!(value, ", qop=auth, nc={}, cnonce=\"{}\"", nc, cnonce);
    }
    if let Some(opaque) = &challenge.opaque {
        let _ = write!(value, ", opaque=\"{}\"", opaque);
    }

    let name = if proxy {
        "Proxy-Authorization"
    } else {
        "Authorization"
    };
    Header::new(name, &value)
}

pub fn compute_digest_response(
    challenge: &DigestChallenge,
    creds: &Credentials,
    method: &str,
    uri: &str,
    qop: Option<(&str, &str)>,
) -> String {
    let ha1 = md5_hex(format!("{}:{}:{}", creds.username, challenge.realm, creds.password).as_bytes());
    let ha2 = md5_hex(format!("{}:{}", method, uri).as_bytes());

    let combo = match qop {
        Some((nc, cnonce)) => format!("{}:{}:{}:{}:auth:{}", ha1, challenge.nonce, nc, cnonce, ha2),
        None => format!("{}:{}:{}", ha1, challenge.nonce, ha2),
    };
    md5_hex(combo.as_bytes())
}

fn md5_hex(data: &[u8]) -> String {
    let digest = md5::Md5::digest(data);
    let mut out = String::new();
    for b in &digest {
        let _ = write!(out, "{:02x}", b);
    }
    out
}
