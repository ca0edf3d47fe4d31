use log::{debug, info, warn};
use sdp::SessionDescription;
use sip_core::{EngineEvent, InviteState, Method, Request, Response, TransactionId};

use super::{Effect, Outcome};

const REQUEST_TERMINATED: u16 = 487;

/// Places a call only to prove it can be set up: hangs up as soon as it
/// is confirmed, or cancels it while ringing when asked to.
#[derive(Debug)]
pub struct InviteController {
    request: Option<Request>,
    tsx: Option<TransactionId>,
    early_cancel: bool,
    state: InviteState,
    teardown_requested: bool,
    confirmed: bool,
    last_final: Option<(u16, String)>,
}

impl InviteController {
    pub fn new(request: Request, early_cancel: bool) -> Self {
        Self {
            request: Some(request),
            tsx: None,
            early_cancel,
            state: InviteState::Null,
            teardown_requested: false,
            confirmed: false,
            last_final: None,
        }
    }

    pub fn state(&self) -> InviteState {
        self.state
    }

    pub fn start(&mut self) -> Vec<Effect> {
        self.request
            .take()
            .map(|request| vec![Effect::Send(request)])
            .unwrap_or_default()
    }

    pub fn on_sent(&mut self, tsx: TransactionId) {
        self.tsx.get_or_insert(tsx);
    }

    pub fn on_event(&mut self, event: &EngineEvent) -> Vec<Effect> {
        match event {
            EngineEvent::DialogStateChanged(state) => self.on_state(*state),
            EngineEvent::Response { tsx, response } if self.tsx == Some(*tsx) => {
                self.on_response(*tsx, response)
            }
            EngineEvent::Completed { tsx, response } if self.tsx == Some(*tsx) => {
                self.last_final = Some((response.status_code, response.reason.clone()));
                if response.is_success() {
                    log_answer(response);
                }
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn on_state(&mut self, state: InviteState) -> Vec<Effect> {
        if self.state == InviteState::Disconnected {
            return Vec::new();
        }
        debug!("call state {} -> {}", self.state.name(), state.name());
        self.state = state;

        match state {
            InviteState::Early if self.early_cancel && !self.teardown_requested => {
                info!("Cancel session in early state");
                self.teardown_requested = true;
                vec![Effect::EndSession(REQUEST_TERMINATED)]
            }
            InviteState::Confirmed if !self.confirmed => {
                self.confirmed = true;
                info!("Call confirmed. Now terminating with BYE.");
                vec![Effect::EndSession(200)]
            }
            InviteState::Disconnected => {
                info!("Call completed.");
                vec![Effect::Terminate(self.outcome())]
            }
            _ => Vec::new(),
        }
    }

    /// The engine does not ACK a 487 to our INVITE; do it here and stop,
    /// whatever state the dialog is in.
    fn on_response(&mut self, tsx: TransactionId, response: &Response) -> Vec<Effect> {
        let to_invite = matches!(response.cseq(), Some((_, Method::Invite)));
        if response.status_code != REQUEST_TERMINATED || !to_invite {
            return Vec::new();
        }
        self.last_final = Some((response.status_code, response.reason.clone()));
        vec![Effect::SendAck(tsx), Effect::Terminate(self.outcome())]
    }

    fn outcome(&self) -> Outcome {
        if self.confirmed {
            return Outcome::Success;
        }
        match &self.last_final {
            Some((REQUEST_TERMINATED, _)) if self.early_cancel => Outcome::Success,
            Some((code, reason)) => Outcome::from_final(*code, reason),
            None => Outcome::Failed {
                code: 0,
                reason: "no final response".into(),
            },
        }
    }
}

fn log_answer(response: &Response) {
    if response.body.is_empty() {
        return;
    }
    match SessionDescription::parse(&response.body) {
        Ok(answer) => info!(
            "Remote media {}:{} payload types {:?}",
            answer.connection_address, answer.media_port, answer.payload_types
        ),
        Err(e) => warn!("Cannot read SDP answer: {}", e),
    }
}
