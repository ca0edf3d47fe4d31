use log::{error, info};
use sip_core::{contacts_from_response, EngineEvent, RegistrationKind, Request, TransactionId};

use super::{Effect, Outcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterState {
    Init,
    Sent,
    Success,
    AuthFailed,
    Failed,
}

/// REGISTER, unregister and contact listing. A challenge that reaches
/// this controller is final: the engine already spent its retry.
#[derive(Debug)]
pub struct RegisterController {
    kind: RegistrationKind,
    request: Option<Request>,
    tsx: Option<TransactionId>,
    state: RegisterState,
}

impl RegisterController {
    pub fn new(kind: RegistrationKind, request: Request) -> Self {
        Self {
            kind,
            request: Some(request),
            tsx: None,
            state: RegisterState::Init,
        }
    }

    pub fn state(&self) -> RegisterState {
        self.state
    }

    pub fn start(&mut self) -> Vec<Effect> {
        match self.request.take() {
            Some(request) => {
                self.state = RegisterState::Sent;
                vec![Effect::Send(request)]
            }
            None => Vec::new(),
        }
    }

    pub fn on_sent(&mut self, tsx: TransactionId) {
        self.tsx.get_or_insert(tsx);
    }

    pub fn on_event(&mut self, event: &EngineEvent) -> Vec<Effect> {
        let EngineEvent::Completed { tsx, response } = event else {
            return Vec::new();
        };
        if self.tsx != Some(*tsx) || self.state != RegisterState::Sent {
            return Vec::new();
        }

        let outcome = match response.status_code {
            200 => {
                self.state = RegisterState::Success;
                info!("{}", self.kind.describe());
                let contacts = contacts_from_response(response);
                if contacts.is_empty() {
                    info!("No contacts registered");
                }
                for (idx, contact) in contacts.iter().enumerate() {
                    info!("Contact #{}: {}", idx + 1, contact);
                }
                Outcome::Success
            }
            401 => {
                self.state = RegisterState::AuthFailed;
                error!("Authentication failed. Check your username and password");
                Outcome::AuthFailed { code: 401 }
            }
            code => {
                self.state = RegisterState::Failed;
                error!("Registration response: {} {}", code, response.reason);
                Outcome::Failed {
                    code,
                    reason: response.reason.clone(),
                }
            }
        };
        vec![Effect::Terminate(outcome)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::mock::response;
    use sip_core::{Header, Method};
    use std::sync::Mutex;

    static CAPTURED: Mutex<Vec<(log::Level, String)>> = Mutex::new(Vec::new());

    struct Capture;

    impl log::Log for Capture {
        fn enabled(&self, _metadata: &log::Metadata) -> bool {
            true
        }

        fn log(&self, record: &log::Record) {
            if let Ok(mut lines) = CAPTURED.lock() {
                lines.push((record.level(), record.args().to_string()));
            }
        }

        fn flush(&self) {}
    }

    static CAPTURE: Capture = Capture;

    fn started(kind: RegistrationKind) -> RegisterController {
        let request = Request::new(Method::Register, "sip:example.com");
        let mut ctl = RegisterController::new(kind, request);
        assert!(matches!(ctl.start().as_slice(), [Effect::Send(_)]));
        assert!(ctl.start().is_empty());
        ctl.on_sent(TransactionId(7));
        ctl
    }

    fn completed(code: u16, reason: &str) -> EngineEvent {
        EngineEvent::Completed {
            tsx: TransactionId(7),
            response: response(code, reason, Method::Register),
        }
    }

    #[test]
    fn ok_terminates_with_success() {
        let mut ctl = started(RegistrationKind::Register);
        let mut ok = completed(200, "OK");
        if let EngineEvent::Completed { response, .. } = &mut ok {
            response.add_header(Header::new("Contact", "<sip:alice@192.0.2.1>;expires=60"));
        }
        assert_eq!(ctl.on_event(&ok), vec![Effect::Terminate(Outcome::Success)]);
        assert_eq!(ctl.state(), RegisterState::Success);
    }

    #[test]
    fn single_challenge_is_terminal() {
        let mut ctl = started(RegistrationKind::Register);
        // The raw challenge is not this controller's business.
        let raw = EngineEvent::Response {
            tsx: TransactionId(7),
            response: response(401, "Unauthorized", Method::Register),
        };
        assert!(ctl.on_event(&raw).is_empty());

        let effects = ctl.on_event(&completed(401, "Unauthorized"));
        assert_eq!(effects, vec![Effect::Terminate(Outcome::AuthFailed { code: 401 })]);
        assert_eq!(ctl.state(), RegisterState::AuthFailed);
    }

    #[test]
    fn other_codes_fail_with_reason() {
        let mut ctl = started(RegistrationKind::UnregisterAll);
        let effects = ctl.on_event(&completed(403, "Forbidden"));
        assert_eq!(
            effects,
            vec![Effect::Terminate(Outcome::Failed {
                code: 403,
                reason: "Forbidden".into()
            })]
        );
        assert_eq!(ctl.state(), RegisterState::Failed);
        // Terminal: later events do nothing.
        assert!(ctl.on_event(&completed(200, "OK")).is_empty());
    }

    #[test]
    fn failure_code_is_reported_at_error_level() {
        let _ = log::set_logger(&CAPTURE);
        log::set_max_level(log::LevelFilter::Trace);

        let mut ctl = started(RegistrationKind::Register);
        ctl.on_event(&completed(480, "Temporarily Unavailable"));

        let lines = CAPTURED.lock().unwrap();
        assert!(lines.iter().any(|(level, line)| {
            *level == log::Level::Error && line == "Registration response: 480 Temporarily Unavailable"
        }));
    }

    #[test]
    fn ignores_other_transactions() {
        let mut ctl = started(RegistrationKind::Register);
        let other = EngineEvent::Completed {
            tsx: TransactionId(8),
            response: response(200, "OK", Method::Register),
        };
        assert!(ctl.on_event(&other).is_empty());
        assert_eq!(ctl.state(), RegisterState::Sent);
    }
}
