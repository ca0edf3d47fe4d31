use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::{engine::TransactionId, Method, Request, Response};

// Timer values from RFC 3261 (assuming UDP/unreliable transport)
pub const T1: Duration = Duration::from_millis(500);
pub const T2: Duration = Duration::from_secs(4);
const TIMER_B: Duration = Duration::from_millis(500 * 64); // 64 * T1, also timer F

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientTxState {
    Calling,
    Proceeding,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    Retransmit,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseDisposition {
    Provisional,
    Final,
    /// A final response seen again after the transaction completed.
    Retransmission,
}

/// Client transaction for one request. The id survives an
/// authentication retry so callers keep a stable handle.
#[derive(Debug, Clone)]
pub struct ClientTransaction {
    pub id: TransactionId,
    pub request: Request,
    pub destination: SocketAddr,
    pub auth_attempts: u8,
    pub last_provisional: Option<Response>,
    pub last_final: Option<Response>,
    branch: String,
    state: ClientTxState,
    retransmit_interval: Duration,
    next_retransmit: Option<Instant>,
    deadline: Option<Instant>,
}

impl ClientTransaction {
    pub fn new(id: TransactionId, request: Request, destination: SocketAddr, now: Instant) -> Self {
        let branch = top_via_branch(&request).unwrap_or_default();
        Self {
            id,
            request,
            destination,
            auth_attempts: 0,
            last_provisional: None,
            last_final: None,
            branch,
            state: ClientTxState::Calling,
            retransmit_interval: T1,
            next_retransmit: Some(now + T1),
            deadline: Some(now + TIMER_B),
        }
    }

    /// Re-arm for a new request under the same id (credential retry).
    pub fn restart(&mut self, request: Request, now: Instant) {
        self.branch = top_via_branch(&request).unwrap_or_default();
        self.request = request;
        self.last_provisional = None;
        self.last_final = None;
        self.state = ClientTxState::Calling;
        self.retransmit_interval = T1;
        self.next_retransmit = Some(now + T1);
        self.deadline = Some(now + TIMER_B);
    }

    /// Bound the wait for a final response once the INVITE has been
    /// cancelled: after 64*T1 it times out even if no 487 comes back.
    pub fn arm_timeout(&mut self, now: Instant) {
        if self.state != ClientTxState::Completed {
            self.deadline = Some(now + TIMER_B);
        }
    }

    pub fn method(&self) -> Method {
        self.request.method
    }

    pub fn state(&self) -> ClientTxState {
        self.state
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn matches(&self, resp: &Response) -> bool {
        let branch_ok = response_branch(resp).is_some_and(|b| b == self.branch);
        let method_ok = resp
            .cseq()
            .is_some_and(|(_, method)| method == self.request.method);
        branch_ok && method_ok
    }

    pub fn on_response(&mut self, resp: &Response, now: Instant) -> ResponseDisposition {
        if self.state == ClientTxState::Completed {
            return ResponseDisposition::Retransmission;
        }

        if resp.is_provisional() {
            self.state = ClientTxState::Proceeding;
            self.last_provisional = Some(resp.clone());
            if self.request.method == Method::Invite {
                // INVITE stops retransmitting and waits for the final answer.
                self.next_retransmit = None;
                self.deadline = None;
            } else {
                self.retransmit_interval = T2;
                self.next_retransmit = Some(now + T2);
            }
            return ResponseDisposition::Provisional;
        }

        self.state = ClientTxState::Completed;
        self.last_final = Some(resp.clone());
        self.next_retransmit = None;
        self.deadline = None;
        ResponseDisposition::Final
    }

    /// Advance timers. Returns what the owner has to do now, if anything.
    pub fn poll(&mut self, now: Instant) -> Option<TimerEvent> {
        if self.state == ClientTxState::Completed {
            return None;
        }

        if let Some(deadline) = self.deadline {
            if now >= deadline {
                self.state = ClientTxState::Completed;
                self.next_retransmit = None;
                self.deadline = None;
                return Some(TimerEvent::Timeout);
            }
        }

        let next = self.next_retransmit?;
        if now < next {
            return None;
        }

        // Backoff: INVITE doubles without cap, others cap at T2.
        let doubled = self.retransmit_interval * 2;
        self.retransmit_interval = if self.request.method == Method::Invite {
            doubled
        } else {
            doubled.min(T2)
        };
        self.next_retransmit = Some(now + self.retransmit_interval);
        Some(TimerEvent::Retransmit)
    }
}

pub fn top_via_branch(req: &Request) -> Option<String> {
    req.header("Via")
        .and_then(|via| crate::message::header_param(via, "branch"))
        .map(str::to_string)
}

pub fn response_branch(resp: &Response) -> Option<&str> {
    resp.header("Via")
        .and_then(|via| crate::message::header_param(via, "branch"))
}
