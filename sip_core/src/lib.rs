//! Outbound SIP plumbing for a one-shot command line user agent.
//!
//! The crate is split the same way the request travels: `message` and
//! `uri` model the wire format, `builder` assembles requests, `auth`,
//! `transaction` and `dialog` hold the per-request state, and `stack`
//! ties everything to a UDP socket behind the [`Engine`] trait.

use thiserror::Error;

pub mod auth;
pub mod body;
pub mod builder;
pub mod dialog;
pub mod engine;
pub mod message;
pub mod registration;
pub mod resolver;
pub mod stack;
pub mod transaction;
pub mod uri;

pub use auth::{authorization_header, Credentials, DigestChallenge};
pub use body::{message_summary, pidf, xpidf, MessageSummary, PresenceStatus};
pub use builder::RequestBuilder;
pub use dialog::{Dialog, InviteState};
pub use engine::{Engine, EngineEvent, RouteSet, TransactionId, MAX_ROUTES};
pub use message::{
    header_value, header_values, parse_message, Header, Message, Method, Request, Response,
};
pub use registration::{contacts_from_response, RegistrationKind};
pub use resolver::{
    parse_nameservers, system_nameservers, DnsResolver, NameserverEntry, NameserverList,
    DEFAULT_DNS_PORT, MAX_NS_COUNT,
};
pub use stack::{SipStack, StackConfig};
pub use uri::SipUri;

#[derive(Debug, Error)]
pub enum SipError {
    #[error("invalid message: {0}")]
    Invalid(&'static str),
    #[error("invalid uri: {0}")]
    InvalidUri(String),
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error("unknown transaction {0}")]
    UnknownTransaction(TransactionId),
    #[error("resolver error: {0}")]
    Resolver(String),
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SipError>;
