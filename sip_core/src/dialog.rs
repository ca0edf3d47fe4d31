use crate::{
    message::{header_param, header_values, split_header_list, Header, Method, Request, Response},
    Result, SipError,
};

/// INVITE session state as seen by the calling side.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum InviteState {
    #[default]
    Null,
    Calling,
    Early,
    Confirmed,
    Disconnected,
}

impl InviteState {
    pub fn name(&self) -> &'static str {
        match self {
            InviteState::Null => "NULL",
            InviteState::Calling => "CALLING",
            InviteState::Early => "EARLY",
            InviteState::Confirmed => "CONFIRMED",
            InviteState::Disconnected => "DISCONNECTED",
        }
    }
}

/// UAC dialog created by an outgoing INVITE.
#[derive(Debug, Clone)]
pub struct Dialog {
    state: InviteState,
    invite: Request,
    call_id: String,
    local_cseq: u32,
    remote_to: String,
    remote_tag: Option<String>,
    remote_target: Option<String>,
    route_set: Vec<String>,
}

impl Dialog {
    pub fn new_uac(invite: &Request) -> Result<Self> {
        if invite.method != Method::Invite {
            return Err(SipError::InvalidState("dialog needs an INVITE"));
        }
        let call_id = invite
            .header("Call-ID")
            .ok_or(SipError::Invalid("missing Call-ID"))?
            .to_string();
        let remote_to = invite
            .header("To")
            .ok_or(SipError::Invalid("missing To"))?
            .to_string();
        let (local_cseq, _) = invite.cseq().ok_or(SipError::Invalid("missing CSeq"))?;

        Ok(Self {
            state: InviteState::Null,
            invite: invite.clone(),
            call_id,
            local_cseq,
            remote_to,
            remote_tag: None,
            remote_target: None,
            route_set: Vec::new(),
        })
    }

    pub fn state(&self) -> InviteState {
        self.state
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn invite(&self) -> &Request {
        &self.invite
    }

    /// Move to `next`, returning it when the state actually changed.
    /// DISCONNECTED is final.
    pub fn set_state(&mut self, next: InviteState) -> Option<InviteState> {
        if self.state == next || self.state == InviteState::Disconnected {
            return None;
        }
        log::debug!("dialog {}: {} -> {}", self.call_id, self.state.name(), next.name());
        self.state = next;
        Some(next)
    }

    /// The INVITE (possibly re-sent with credentials) went out.
    pub fn on_invite_sent(&mut self, invite: &Request) -> Option<InviteState> {
        if let Some((cseq, _)) = invite.cseq() {
            self.local_cseq = cseq;
        }
        self.invite = invite.clone();
        self.set_state(InviteState::Calling)
    }

    /// Feed a response to our INVITE. Challenges and other failures are
    /// left to the caller, which knows whether a retry follows.
    pub fn on_invite_response(&mut self, resp: &Response) -> Option<InviteState> {
        match resp.status_code {
            100 => None,
            101..=199 => {
                self.learn_remote(resp);
                if self.state == InviteState::Calling {
                    self.set_state(InviteState::Early)
                } else {
                    None
                }
            }
            200..=299 => {
                self.learn_remote(resp);
                self.set_state(InviteState::Confirmed)
            }
            _ => None,
        }
    }

    fn learn_remote(&mut self, resp: &Response) {
        if let Some(to) = resp.header("To") {
            if let Some(tag) = parse_tag_param(to) {
                self.remote_tag = Some(tag.to_string());
                self.remote_to = to.to_string();
            }
        }
        if let Some(contact) = resp.header("Contact") {
            if let Some(first) = split_header_list(contact).first() {
                self.remote_target = Some(strip_angle(first).to_string());
            }
        }
        if resp.is_success() {
            // Route set is the Record-Route list in reverse order.
            let mut routes: Vec<String> = header_values(&resp.headers, "Record-Route")
                .flat_map(split_header_list)
                .map(str::to_string)
                .collect();
            routes.reverse();
            self.route_set = routes;
        }
    }

    /// ACK for a final response to the INVITE.
    ///
    /// A 2xx ACK is its own transaction (the stack adds a fresh Via and
    /// targets the remote Contact); a non-2xx ACK reuses the INVITE Via.
    pub fn build_ack(&self, final_resp: &Response) -> Result<Request> {
        if final_resp.is_provisional() {
            return Err(SipError::InvalidState("cannot ACK a provisional response"));
        }
        let to = final_resp.header("To").unwrap_or(&self.remote_to);

        let mut ack = if final_resp.is_success() {
            let target = self.remote_target.as_deref().unwrap_or(&self.invite.uri);
            let mut ack = Request::new(Method::Ack, target);
            for route in &self.route_set {
                ack.add_header(Header::new("Route", route));
            }
            ack
        } else {
            let mut ack = Request::new(Method::Ack, &self.invite.uri);
            self.copy_headers(&mut ack, &["Via", "Route"]);
            ack
        };

        self.copy_headers(&mut ack, &["From"]);
        ack.add_header(Header::new("To", to));
        ack.add_header(Header::new("Call-ID", &self.call_id));
        ack.add_header(Header::new(
            "CSeq",
            &format!("{} ACK", self.local_cseq),
        ));
        self.copy_headers(&mut ack, &["Max-Forwards", "User-Agent"]);
        Ok(ack)
    }

    /// CANCEL for the pending INVITE; only meaningful once something
    /// provisional came back.
    pub fn build_cancel(&self) -> Option<Request> {
        if self.state != InviteState::Early {
            return None;
        }
        let mut cancel = Request::new(Method::Cancel, &self.invite.uri);
        self.copy_headers(&mut cancel, &["Via", "Route", "From", "To", "Call-ID"]);
        cancel.add_header(Header::new(
            "CSeq",
            &format!("{} CANCEL", self.local_cseq),
        ));
        self.copy_headers(&mut cancel, &["Max-Forwards", "User-Agent"]);
        Some(cancel)
    }

    pub fn build_bye(&mut self) -> Option<Request> {
        if self.state != InviteState::Confirmed {
            return None;
        }
        self.local_cseq = self.local_cseq.wrapping_add(1);
        let target = self.remote_target.as_deref().unwrap_or(&self.invite.uri);
        let mut bye = Request::new(Method::Bye, target);
        for route in &self.route_set {
            bye.add_header(Header::new("Route", route));
        }
        self.copy_headers(&mut bye, &["From"]);
        bye.add_header(Header::new("To", &self.remote_to));
        bye.add_header(Header::new("Call-ID", &self.call_id));
        bye.add_header(Header::new(
            "CSeq",
            &format!("{} BYE", self.local_cseq),
        ));
        self.copy_headers(&mut bye, &["User-Agent"]);
        Some(bye)
    }

    /// Does an incoming request belong to this dialog?
    pub fn owns(&self, req: &Request) -> bool {
        let same_call = req.header("Call-ID") == Some(self.call_id.as_str());
        let local_tag = self.invite.header("From").and_then(parse_tag_param);
        let their_to_tag = req.header("To").and_then(parse_tag_param);
        same_call && local_tag.is_some() && local_tag == their_to_tag
    }

    fn copy_headers(&self, req: &mut Request, names: &[&str]) {
        for name in names {
            for value in header_values(&self.invite.headers, name) {
                req.add_header(Header::new(name, value));
            }
        }
    }
}

/// Build a response to an incoming request, copying the headers a
/// response must echo. Adds a To tag when the request had none.
pub fn build_response_for_request(req: &Request, status: u16, reason: &str) -> Result<Response> {
    let mut resp = Response::new(status, reason);

    let mut has_via = false;
    for via in header_values(&req.headers, "Via") {
        resp.add_header(Header::new("Via", via));
        has_via = true;
    }
    if !has_via {
        return Err(SipError::Invalid("missing Via"));
    }

    let from = req.header("From").ok_or(SipError::Invalid("missing From"))?;
    resp.add_header(Header::new("From", from));

    let to = req.header("To").ok_or(SipError::Invalid("missing To"))?;
    if parse_tag_param(to).is_some() {
        resp.add_header(Header::new("To", to));
    } else {
        resp.add_header(Header::new(
            "To",
            &format!("{};tag={}", to, crate::builder::new_tag()),
        ));
    }

    let call_id = req
        .header("Call-ID")
        .ok_or(SipError::Invalid("missing Call-ID"))?;
    resp.add_header(Header::new("Call-ID", call_id));

    let cseq = req.header("CSeq").ok_or(SipError::Invalid("missing CSeq"))?;
    resp.add_header(Header::new("CSeq", cseq));

    Ok(resp)
}

pub fn parse_tag_param(input: &str) -> Option<&str> {
    header_param(input, "tag").filter(|t| !t.is_empty())
}

fn strip_angle(value: &str) -> &str {
    match (value.find('<'), value.find('>')) {
        (Some(start), Some(end)) if start < end => &value[start + 1..end],
        _ => value.split(';').next().unwrap_or(value).trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_invite() -> Request {
        let mut req = Request::new(Method::Invite, "sip:bob@example.com");
        req.add_header(Header::new("Via", "SIP/2.0/UDP 192.0.2.10:5060;branch=z9hG4bK1"));
        req.add_header(Header::new("Max-Forwards", "70"));
        req.add_header(Header::new("From", "<sip:alice@example.com>;tag=from1"));
        req.add_header(Header::new("To", "<sip:bob@example.com>"));
        req.add_header(Header::new("Call-ID", "call123"));
        req.add_header(Header::new("CSeq", "2 INVITE"));
        req
    }

    fn sample_response(status: u16) -> Response {
        let mut resp = Response::new(status, "Whatever");
        resp.add_header(Header::new("Via", "SIP/2.0/UDP 192.0.2.10:5060;branch=z9hG4bK1"));
        resp.add_header(Header::new("From", "<sip:alice@example.com>;tag=from1"));
        resp.add_header(Header::new("To", "<sip:bob@example.com>;tag=to1"));
        resp.add_header(Header::new("Call-ID", "call123"));
        resp.add_header(Header::new("CSeq", "2 INVITE"));
        resp.add_header(Header::new("Contact", "<sip:bob@192.0.2.20:5062>"));
        resp
    }

    #[test]
    fn walks_calling_early_confirmed() {
        let invite = sample_invite();
        let mut dlg = Dialog::new_uac(&invite).unwrap();
        assert_eq!(dlg.on_invite_sent(&invite), Some(InviteState::Calling));
        assert_eq!(dlg.on_invite_response(&sample_response(100)), None);
        assert!(dlg.build_cancel().is_none());
        assert_eq!(dlg.on_invite_response(&sample_response(180)), Some(InviteState::Early));

        let cancel = dlg.build_cancel().unwrap();
        assert_eq!(cancel.header("CSeq"), Some("2 CANCEL"));
        assert_eq!(cancel.header("Via"), invite.header("Via"));
        assert_eq!(cancel.header("To"), Some("<sip:bob@example.com>"));

        assert_eq!(dlg.on_invite_response(&sample_response(200)), Some(InviteState::Confirmed));
        let ack = dlg.build_ack(&sample_response(200)).unwrap();
        assert_eq!(ack.uri, "sip:bob@192.0.2.20:5062");
        assert_eq!(ack.header("CSeq"), Some("2 ACK"));
        assert!(ack.header("Via").is_none());

        let bye = dlg.build_bye().unwrap();
        assert_eq!(bye.header("CSeq"), Some("3 BYE"));
        assert_eq!(bye.header("To"), Some("<sip:bob@example.com>;tag=to1"));
    }

    #[test]
    fn non_2xx_ack_reuses_invite_via_and_cseq() {
        let invite = sample_invite();
        let dlg = Dialog::new_uac(&invite).unwrap();
        let ack = dlg.build_ack(&sample_response(487)).unwrap();
        assert_eq!(ack.uri, "sip:bob@example.com");
        assert_eq!(ack.header("Via"), invite.header("Via"));
        assert_eq!(ack.header("CSeq"), Some("2 ACK"));
        assert!(dlg.build_ack(&sample_response(180)).is_err());
    }

    #[test]
    fn disconnected_is_final() {
        let mut dlg = Dialog::new_uac(&sample_invite()).unwrap();
        assert_eq!(dlg.set_state(InviteState::Disconnected), Some(InviteState::Disconnected));
        assert_eq!(dlg.set_state(InviteState::Confirmed), None);
        assert!(dlg.build_bye().is_none());
    }

    #[test]
    fn builds_response_with_local_tag() {
        let mut bye = Request::new(Method::Bye, "sip:alice@192.0.2.10");
        bye.add_header(Header::new("Via", "SIP/2.0/UDP 192.0.2.20;branch=z9hG4bKx"));
        bye.add_header(Header::new("From", "<sip:bob@example.com>;tag=to1"));
        bye.add_header(Header::new("To", "<sip:alice@example.com>;tag=from1"));
        bye.add_header(Header::new("Call-ID", "call123"));
        bye.add_header(Header::new("CSeq", "1 BYE"));

        let dlg = Dialog::new_uac(&sample_invite()).unwrap();
        assert!(dlg.owns(&bye));

        let resp = build_response_for_request(&bye, 200, "OK").unwrap();
        assert_eq!(resp.header("CSeq"), Some("1 BYE"));
        assert_eq!(resp.header("To"), Some("<sip:alice@example.com>;tag=from1"));
    }
}
