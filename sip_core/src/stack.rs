use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::time::Instant;

use log::{debug, info, warn};

use crate::{
    auth::{authorization_header, parse_www_authenticate},
    builder::new_branch,
    dialog::{build_response_for_request, Dialog, InviteState},
    engine::{Engine, EngineEvent, RouteSet, TransactionId},
    message::{parse_message, split_header_list, Header, Message, Method, Request, Response},
    resolver::{DnsResolver, NameserverEntry},
    transaction::{top_via_branch, ClientTransaction, ResponseDisposition, TimerEvent},
    uri::SipUri,
    Credentials, Result, SipError,
};

const MAX_DATAGRAM: usize = 65_535;

#[derive(Debug, Clone, Default)]
pub struct StackConfig {
    pub local_host: Option<String>,
    pub local_port: u16,
    pub user_agent: Option<String>,
    /// Print a `.` at the end of every logged message line.
    pub trail_dot: bool,
}

/// Single threaded UDP user agent engine.
///
/// It owns the socket, the client transactions and at most one INVITE
/// dialog. Nothing happens between calls to [`Engine::poll`].
///
/// Known gap: a 487 final response to the INVITE is not acknowledged
/// here. Whoever drives the session has to ACK it via
/// [`Engine::build_ack`].
pub struct SipStack {
    config: StackConfig,
    socket: UdpSocket,
    advertised: SocketAddr,
    resolver: Option<DnsResolver>,
    credentials: Option<Credentials>,
    route_set: RouteSet,
    transactions: Vec<ClientTransaction>,
    dialog: Option<Dialog>,
    next_id: u64,
    pending: Vec<EngineEvent>,
    rx_buf: Vec<u8>,
}

impl SipStack {
    pub fn bind(config: StackConfig) -> Result<Self> {
        let host = config.local_host.as_deref().unwrap_or("0.0.0.0");
        let socket = UdpSocket::bind((host, config.local_port))?;
        socket.set_nonblocking(true)?;
        let advertised = socket.local_addr()?;
        info!("SIP transport bound to {}", advertised);

        Ok(Self {
            config,
            socket,
            advertised,
            resolver: None,
            credentials: None,
            route_set: RouteSet::default(),
            transactions: Vec::new(),
            dialog: None,
            next_id: 1,
            pending: Vec::new(),
            rx_buf: vec![0u8; MAX_DATAGRAM],
        })
    }

    /// Address written into Via and Contact.
    pub fn local_addr(&self) -> SocketAddr {
        self.advertised
    }

    pub fn set_credentials(&mut self, credentials: Option<Credentials>) {
        self.credentials = credentials;
    }

    pub fn set_route_set(&mut self, route_set: RouteSet) {
        self.route_set = route_set;
    }

    pub fn dialog_state(&self) -> InviteState {
        self.dialog
            .as_ref()
            .map(Dialog::state)
            .unwrap_or(InviteState::Null)
    }

    /// Resolve the first hop toward `uri` and, when bound to a wildcard
    /// address, learn which local address reaches it.
    pub fn prepare(&mut self, uri: &str) -> Result<SocketAddr> {
        let next_hop = match &self.route_set.outbound {
            Some(proxy) => proxy.clone(),
            None => uri.to_string(),
        };
        let target = self.resolve_uri(&next_hop)?;
        if self.advertised.ip().is_unspecified() {
            let route_check = UdpSocket::bind((unspecified_for(&target), 0))?;
            route_check.connect(target)?;
            self.advertised.set_ip(route_check.local_addr()?.ip());
        }
        debug!("next hop {} -> {}, local {}", next_hop, target, self.advertised);
        Ok(self.advertised)
    }

    fn resolve_uri(&self, uri: &str) -> Result<SocketAddr> {
        let uri = SipUri::parse(uri)?;
        match &self.resolver {
            Some(resolver) => resolver.resolve(&uri.host, uri.port_or_default()),
            None => uri
                .host
                .parse::<IpAddr>()
                .map(|ip| SocketAddr::new(ip, uri.port_or_default()))
                .map_err(|_| SipError::Resolver("resolver is not configured".into())),
        }
    }

    /// Outbound proxy first, then a loose-routing top Route (the
    /// record-routed path of a dialog), then the Request-URI.
    fn next_hop_for(&self, req: &Request) -> Result<SocketAddr> {
        if let Some(proxy) = &self.route_set.outbound {
            return self.resolve_uri(proxy);
        }
        match loose_route(req) {
            Some(route) => self.resolve_uri(route),
            None => self.resolve_uri(&req.uri),
        }
    }

    /// Fill in what the transport layer owns: Via, Route, Max-Forwards
    /// and User-Agent. Headers already present are kept.
    fn prepare_outgoing(&self, req: &mut Request) {
        if req.header("Via").is_none() {
            req.push_front_header(Header::new(
                "Via",
                &format!(
                    "SIP/2.0/UDP {};rport;branch={}",
                    self.advertised,
                    new_branch()
                ),
            ));
        }
        if req.header("Route").is_none() {
            for route in &self.route_set.routes {
                req.add_header(Header::new("Route", route));
            }
        }
        if req.header("Max-Forwards").is_none() {
            req.add_header(Header::new("Max-Forwards", "70"));
        }
        if let Some(agent) = &self.config.user_agent {
            if req.header("User-Agent").is_none() {
                req.add_header(Header::new("User-Agent", agent));
            }
        }
    }

    fn transmit(&self, text: &str, dest: SocketAddr) -> Result<()> {
        log_message("Send", dest, text, self.config.trail_dot);
        self.socket.send_to(text.as_bytes(), dest)?;
        Ok(())
    }

    fn allocate_id(&mut self) -> TransactionId {
        let id = TransactionId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    fn position_by_branch(&self, branch: &str, method: Method) -> Option<usize> {
        self.transactions
            .iter()
            .position(|tx| tx.branch() == branch && tx.method() == method)
    }

    fn emit_dialog_state(&mut self, change: Option<InviteState>, events: &mut Vec<EngineEvent>) {
        if let Some(state) = change {
            events.push(EngineEvent::DialogStateChanged(state));
        }
    }

    fn disconnect(&mut self, events: &mut Vec<EngineEvent>) {
        let change = self
            .dialog
            .as_mut()
            .and_then(|dlg| dlg.set_state(InviteState::Disconnected));
        self.emit_dialog_state(change, events);
    }

    // --- Receive path --------------------------------------------------------

    fn poll_socket(&mut self, now: Instant, events: &mut Vec<EngineEvent>) {
        loop {
            match self.socket.recv_from(&mut self.rx_buf) {
                Ok((len, addr)) => {
                    let text = match core::str::from_utf8(&self.rx_buf[..len]) {
                        Ok(text) => text.to_string(),
                        Err(_) => {
                            debug!("dropping non UTF-8 datagram from {}", addr);
                            continue;
                        }
                    };
                    log_message("Recv", addr, &text, self.config.trail_dot);
                    match parse_message(&text) {
                        Ok(Message::Response(resp)) => self.handle_response(resp, now, events),
                        Ok(Message::Request(req)) => self.handle_request(req, addr),
                        Err(e) => debug!("dropping unparsable message from {}: {}", addr, e),
                    }
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                // ICMP port unreachable surfaces as a reset on some platforms.
                Err(ref e) if e.kind() == ErrorKind::ConnectionReset => continue,
                Err(e) => {
                    warn!("SIP recv error: {:?}", e);
                    break;
                }
            }
        }
    }

    fn handle_response(&mut self, resp: Response, now: Instant, events: &mut Vec<EngineEvent>) {
        let Some(idx) = self.transactions.iter().position(|tx| tx.matches(&resp)) else {
            debug!("no transaction for {} {}", resp.status_code, resp.reason);
            return;
        };

        let disposition = self.transactions[idx].on_response(&resp, now);
        let id = self.transactions[idx].id;
        let method = self.transactions[idx].method();

        if disposition == ResponseDisposition::Retransmission {
            if method == Method::Invite && resp.status_code != 487 {
                self.ack_invite_response(&resp);
            }
            return;
        }

        events.push(EngineEvent::Response {
            tsx: id,
            response: resp.clone(),
        });

        if disposition == ResponseDisposition::Provisional {
            if method == Method::Invite {
                let change = self
                    .dialog
                    .as_mut()
                    .and_then(|dlg| dlg.on_invite_response(&resp));
                self.emit_dialog_state(change, events);
            }
            return;
        }

        if resp.is_challenge() {
            match self.retry_with_credentials(idx, &resp, now) {
                Ok(true) => return,
                Ok(false) => {}
                Err(e) => warn!("failed to retry {} with credentials: {}", method, e),
            }
        }

        match method {
            Method::Invite if resp.is_success() => {
                let change = self
                    .dialog
                    .as_mut()
                    .and_then(|dlg| dlg.on_invite_response(&resp));
                self.ack_invite_response(&resp);
                self.emit_dialog_state(change, events);
                events.push(EngineEvent::Completed { tsx: id, response: resp });
            }
            Method::Invite => {
                if resp.status_code != 487 {
                    self.ack_invite_response(&resp);
                }
                events.push(EngineEvent::Completed { tsx: id, response: resp });
                self.disconnect(events);
            }
            Method::Bye => {
                events.push(EngineEvent::Completed { tsx: id, response: resp });
                self.disconnect(events);
            }
            _ => events.push(EngineEvent::Completed { tsx: id, response: resp }),
        }
    }

    fn ack_invite_response(&mut self, resp: &Response) {
        let Some(dialog) = &self.dialog else {
            return;
        };
        match dialog.build_ack(resp) {
            Ok(ack) => {
                if let Err(e) = self.send_request(ack) {
                    warn!("failed to send ACK: {}", e);
                }
            }
            Err(e) => warn!("failed to build ACK: {}", e),
        }
    }

    /// Re-send a challenged request once with credentials. Returns false
    /// when the challenge has to be reported to the caller instead.
    fn retry_with_credentials(&mut self, idx: usize, resp: &Response, now: Instant) -> Result<bool> {
        let Some(creds) = self.credentials.clone() else {
            return Ok(false);
        };
        if self.transactions[idx].auth_attempts >= 1 {
            debug!("{} challenged again, giving up", self.transactions[idx].id);
            return Ok(false);
        }

        let proxy = resp.status_code == 407;
        let challenge_header = if proxy {
            "Proxy-Authenticate"
        } else {
            "WWW-Authenticate"
        };
        let Some(challenge) = resp
            .header(challenge_header)
            .and_then(|value| parse_www_authenticate(value).ok())
        else {
            warn!("{} without a usable {} header", resp.status_code, challenge_header);
            return Ok(false);
        };
        if !creds.matches(&challenge) {
            return Ok(false);
        }

        let method = self.transactions[idx].method();
        if method == Method::Invite {
            self.ack_invite_response(resp);
        }

        let mut retry = self.transactions[idx].request.clone();
        retry.remove_header("Via");
        retry.remove_header("Authorization");
        retry.remove_header("Proxy-Authorization");
        let (seq, _) = retry
            .cseq()
            .ok_or(SipError::Invalid("request without CSeq"))?;
        retry.set_header("CSeq", &format!("{} {}", seq.wrapping_add(1), method));
        retry.add_header(authorization_header(
            &challenge,
            &creds,
            method.as_str(),
            &retry.uri,
            proxy,
        ));
        self.prepare_outgoing(&mut retry);

        let dest = self.transactions[idx].destination;
        self.transmit(&retry.render(), dest)?;

        if let Some(dialog) = self.dialog.as_mut().filter(|_| method == Method::Invite) {
            dialog.on_invite_sent(&retry);
        }
        let tx = &mut self.transactions[idx];
        tx.restart(retry, now);
        tx.auth_attempts += 1;
        debug!("{} retried with credentials for realm {}", tx.id, challenge.realm);
        Ok(true)
    }

    fn handle_request(&mut self, req: Request, from: SocketAddr) {
        let (status, reason) = match req.method {
            Method::Ack => return,
            Method::Bye if self.dialog.as_ref().is_some_and(|dlg| dlg.owns(&req)) => {
                info!("Received BYE from {}", from);
                let mut events = Vec::new();
                self.disconnect(&mut events);
                self.pending.extend(events);
                (200, "OK")
            }
            Method::Bye | Method::Cancel => (481, "Call/Transaction Does Not Exist"),
            Method::Options => (200, "OK"),
            Method::Notify => {
                info!(
                    "Received NOTIFY ({}) from {}",
                    req.header("Event").unwrap_or("no event"),
                    from
                );
                (200, "OK")
            }
            _ => (501, "Not Implemented"),
        };

        match build_response_for_request(&req, status, reason) {
            Ok(resp) => {
                if let Err(e) = self.transmit(&resp.render(), from) {
                    warn!("failed to answer {}: {}", req.method, e);
                }
            }
            Err(e) => debug!("cannot answer {}: {}", req.method, e),
        }
    }

    // --- Timers --------------------------------------------------------------

    fn poll_timers(&mut self, now: Instant, events: &mut Vec<EngineEvent>) {
        let mut timed_out = Vec::new();
        for tx in &mut self.transactions {
            match tx.poll(now) {
                Some(TimerEvent::Retransmit) => {
                    debug!("retransmitting {} {}", tx.method(), tx.id);
                    let text = tx.request.render();
                    log_message("Send", tx.destination, &text, self.config.trail_dot);
                    if let Err(e) = self.socket.send_to(text.as_bytes(), tx.destination) {
                        warn!("retransmission failed: {}", e);
                    }
                }
                Some(TimerEvent::Timeout) => timed_out.push((tx.id, tx.method())),
                None => {}
            }
        }

        for (id, method) in timed_out {
            info!("{} {} timed out", method, id);
            let response = Response::new(408, "Request Timeout");
            events.push(EngineEvent::Completed { tsx: id, response });
            if method == Method::Invite || method == Method::Bye {
                self.disconnect(events);
            }
        }
    }
}

impl Engine for SipStack {
    fn send_request(&mut self, mut request: Request) -> Result<TransactionId> {
        let now = Instant::now();
        self.prepare_outgoing(&mut request);

        // CANCEL and non-2xx ACK reuse the INVITE branch and its hop.
        let invite = top_via_branch(&request)
            .and_then(|branch| self.position_by_branch(&branch, Method::Invite));
        let dest = match invite {
            Some(idx) => self.transactions[idx].destination,
            None => self.next_hop_for(&request)?,
        };

        let id = self.allocate_id();
        self.transmit(&request.render(), dest)?;

        match request.method {
            Method::Ack => return Ok(id),
            Method::Cancel => {
                if let Some(idx) = invite {
                    self.transactions[idx].arm_timeout(now);
                }
            }
            Method::Invite => {
                let mut dialog = Dialog::new_uac(&request)?;
                let change = dialog.on_invite_sent(&request);
                self.dialog = Some(dialog);
                if let Some(state) = change {
                    self.pending.push(EngineEvent::DialogStateChanged(state));
                }
            }
            _ => {}
        }

        self.transactions
            .push(ClientTransaction::new(id, request, dest, now));
        Ok(id)
    }

    fn build_ack(&mut self, tsx: TransactionId) -> Result<Request> {
        let tx = self
            .transactions
            .iter()
            .find(|tx| tx.id == tsx)
            .ok_or(SipError::UnknownTransaction(tsx))?;
        if tx.method() != Method::Invite {
            return Err(SipError::InvalidState("ACK only applies to INVITE"));
        }
        let last = tx
            .last_final
            .as_ref()
            .ok_or(SipError::InvalidState("no final response to acknowledge"))?;
        let dialog = self
            .dialog
            .as_ref()
            .ok_or(SipError::InvalidState("no dialog"))?;
        dialog.build_ack(last)
    }

    fn end_session(&mut self, status_code: u16) -> Result<Option<Request>> {
        let Some(dialog) = self.dialog.as_mut() else {
            return Ok(None);
        };
        let req = match dialog.state() {
            InviteState::Early => dialog.build_cancel(),
            InviteState::Confirmed => dialog.build_bye(),
            _ => None,
        };
        debug!(
            "end session ({}) in {}: {}",
            status_code,
            dialog.state().name(),
            req.as_ref().map(|r| r.method.as_str()).unwrap_or("nothing to send")
        );
        Ok(req)
    }

    fn configure_resolver(&mut self, nameservers: &[NameserverEntry]) -> Result<()> {
        self.resolver = Some(DnsResolver::configure(nameservers)?);
        Ok(())
    }

    fn poll(&mut self, now: Instant) -> Result<Vec<EngineEvent>> {
        let mut events = std::mem::take(&mut self.pending);
        self.poll_socket(now, &mut events);
        self.poll_timers(now, &mut events);
        Ok(events)
    }
}

/// Top Route entry, when it names a loose router (`;lr`).
fn loose_route(req: &Request) -> Option<&str> {
    let top = req
        .header("Route")
        .and_then(|value| split_header_list(value).into_iter().next())?;
    let uri = SipUri::parse(top).ok()?;
    let is_loose = uri.params.split(';').any(|param| {
        let name = param.split('=').next().unwrap_or(param).trim();
        name.eq_ignore_ascii_case("lr")
    });
    is_loose.then_some(top)
}

fn unspecified_for(target: &SocketAddr) -> IpAddr {
    if target.is_ipv4() {
        IpAddr::from([0, 0, 0, 0])
    } else {
        IpAddr::from([0u16; 8])
    }
}

fn log_message(direction: &str, peer: SocketAddr, text: &str, trail_dot: bool) {
    if !log::log_enabled!(log::Level::Debug) {
        return;
    }
    let mut out = String::with_capacity(text.len() + 64);
    for line in text.split("\r\n") {
        out.push_str(line);
        if trail_dot {
            out.push('.');
        }
        out.push('\n');
    }
    let preposition = if direction == "Send" { "to" } else { "from" };
    debug!(
        "{} {} bytes {} {}:\n{}",
        direction,
        text.len(),
        preposition,
        peer,
        out
    );
}
