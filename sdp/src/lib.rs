//! Just enough SDP to put an audio offer into an INVITE and to read back
//! where the answer wants media sent.

use core::fmt::Write;
use std::net::IpAddr;

use log::warn;
use thiserror::Error;

/// Audio codecs that have a static RTP payload type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Pcmu,
    Pcma,
    Gsm,
    G722,
    L16,
}

impl Codec {
    pub const ALL: [Codec; 5] = [Codec::Pcmu, Codec::Pcma, Codec::Gsm, Codec::G722, Codec::L16];

    pub fn payload_type(&self) -> u8 {
        match self {
            Codec::Pcmu => 0,
            Codec::Gsm => 3,
            Codec::Pcma => 8,
            Codec::G722 => 9,
            Codec::L16 => 11,
        }
    }

    /// `a=rtpmap` encoding name and clock rate.
    pub fn rtpmap(&self) -> &'static str {
        match self {
            Codec::Pcmu => "PCMU/8000",
            Codec::Pcma => "PCMA/8000",
            Codec::Gsm => "GSM/8000",
            // RFC 3551 keeps 8000 for G.722 even though it samples at 16k.
            Codec::G722 => "G722/8000",
            Codec::L16 => "L16/44100",
        }
    }

    pub fn from_payload_type(pt: u8) -> Option<Self> {
        Codec::ALL.into_iter().find(|c| c.payload_type() == pt)
    }
}

/// Parse a comma separated codec list (`g711`, `gsm`, `g722`, `l16` or
/// `all`). Names are case-insensitive; unknown ones are skipped.
pub fn parse_codecs(list: &str) -> Vec<Codec> {
    let mut out: Vec<Codec> = Vec::new();
    let mut push = |codec: Codec| {
        if !out.contains(&codec) {
            out.push(codec);
        }
    };
    for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match name.to_ascii_lowercase().as_str() {
            "g711" | "pcmu" | "pcma" => {
                push(Codec::Pcmu);
                push(Codec::Pcma);
            }
            "gsm" => push(Codec::Gsm),
            "g722" => push(Codec::G722),
            "l16" => push(Codec::L16),
            "all" => Codec::ALL.into_iter().for_each(&mut push),
            other => warn!("codec {:?} is not supported, skipping", other),
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub session_id: u64,
    pub connection_address: IpAddr,
    pub media_port: u16,
    pub payload_types: Vec<u8>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SdpError {
    #[error("invalid SDP: {0}")]
    Invalid(String),
    #[error("no codecs to offer")]
    NoCodecs,
}

impl SessionDescription {
    pub fn offer(address: IpAddr, media_port: u16, codecs: &[Codec]) -> Result<Self, SdpError> {
        if codecs.is_empty() {
            return Err(SdpError::NoCodecs);
        }
        Ok(Self {
            session_id: rand_session_id(),
            connection_address: address,
            media_port,
            payload_types: codecs.iter().map(Codec::payload_type).collect(),
        })
    }

    pub fn render(&self) -> String {
        let family = if self.connection_address.is_ipv4() { "IP4" } else { "IP6" };
        let mut out = String::new();
        let _ = write!(out, "v=0\r\n");
        let _ = write!(
            out,
            "o=sippak {} {} IN {} {}\r\n",
            self.session_id, self.session_id, family, self.connection_address
        );
        let _ = write!(out, "s=sippak\r\n");
        let _ = write!(out, "c=IN {} {}\r\n", family, self.connection_address);
        let _ = write!(out, "t=0 0\r\n");
        let _ = write!(out, "m=audio {} RTP/AVP", self.media_port);
        for pt in &self.payload_types {
            let _ = write!(out, " {}", pt);
        }
        out.push_str("\r\n");
        for codec in self.payload_types.iter().filter_map(|pt| Codec::from_payload_type(*pt)) {
            let _ = write!(out, "a=rtpmap:{} {}\r\n", codec.payload_type(), codec.rtpmap());
        }
        out.push_str("a=sendrecv\r\n");
        out
    }

    /// Read connection address, audio port and payload types from an
    /// answer. Session and media level `c=` lines are both accepted.
    pub fn parse(input: &str) -> Result<Self, SdpError> {
        let mut session_id = 0;
        let mut address = None;
        let mut audio = None;

        for line in input.lines().map(str::trim_end) {
            let Some((kind, value)) = line.split_once('=') else {
                continue;
            };
            match kind {
                "o" => {
                    session_id = value
                        .split_whitespace()
                        .nth(1)
                        .and_then(|id| id.parse().ok())
                        .unwrap_or(0);
                }
                "c" => {
                    let addr = value
                        .split_whitespace()
                        .nth(2)
                        .ok_or_else(|| SdpError::Invalid(format!("connection line {:?}", line)))?;
                    // Multicast answers carry a /ttl suffix.
                    let addr = addr.split('/').next().unwrap_or(addr);
                    address = Some(
                        addr.parse::<IpAddr>()
                            .map_err(|_| SdpError::Invalid(format!("connection address {:?}", addr)))?,
                    );
                }
                "m" if audio.is_none() && value.starts_with("audio ") => {
                    let mut parts = value.split_whitespace().skip(1);
                    let port = parts
                        .next()
                        .and_then(|p| p.parse::<u16>().ok())
                        .ok_or_else(|| SdpError::Invalid(format!("media line {:?}", line)))?;
                    let payload_types = parts.skip(1).filter_map(|pt| pt.parse().ok()).collect();
                    audio = Some((port, payload_types));
                }
                _ => {}
            }
        }

        let connection_address =
            address.ok_or_else(|| SdpError::Invalid("missing connection line".into()))?;
        let (media_port, payload_types) =
            audio.ok_or_else(|| SdpError::Invalid("missing audio media line".into()))?;
        Ok(Self {
            session_id,
            connection_address,
            media_port,
            payload_types,
        })
    }
}

fn rand_session_id() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
