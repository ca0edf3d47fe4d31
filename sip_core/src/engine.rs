use core::fmt;
use std::time::Instant;

use crate::{InviteState, NameserverEntry, Request, Response, Result};

/// Proxies accepted on the command line; the first is the outbound hop.
pub const MAX_ROUTES: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tsx#{}", self.0)
    }
}

/// Outbound proxy plus the Route entries behind it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteSet {
    pub outbound: Option<String>,
    pub routes: heapless::Vec<String, MAX_ROUTES>,
}

impl RouteSet {
    pub fn is_empty(&self) -> bool {
        self.outbound.is_none() && self.routes.is_empty()
    }
}

/// What the engine reports back while it pumps the socket and timers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Every response matched to one of our transactions, as received,
    /// including provisional responses and challenges.
    Response {
        tsx: TransactionId,
        response: Response,
    },
    /// The request reached its final outcome after any automatic
    /// credential retry. Timeouts surface here as a local 408.
    Completed {
        tsx: TransactionId,
        response: Response,
    },
    /// The INVITE session moved to a new state.
    DialogStateChanged(InviteState),
}

/// The protocol engine the command controllers run on.
///
/// Controllers never talk to the network; the session driver translates
/// their effects into these calls.
pub trait Engine {
    fn send_request(&mut self, request: Request) -> Result<TransactionId>;

    /// ACK for the final response of an INVITE transaction.
    fn build_ack(&mut self, tsx: TransactionId) -> Result<Request>;

    /// Request that ends the INVITE session, if one can be built yet.
    /// `Ok(None)` means there is nothing to send at this point.
    fn end_session(&mut self, status_code: u16) -> Result<Option<Request>>;

    fn configure_resolver(&mut self, nameservers: &[NameserverEntry]) -> Result<()>;

    /// Run one round of I/O and timers; returns the events it produced.
    fn poll(&mut self, now: Instant) -> Result<Vec<EngineEvent>>;
}
