use log::{error, info, warn};
use sip_core::{
    body::{PIDF_CONTENT_TYPE, XPIDF_CONTENT_TYPE},
    pidf, xpidf, EngineEvent, PresenceStatus, Request, TransactionId,
};

use super::{Effect, Outcome};
use crate::AppError;

/// Challenges survived before the publication counts as unauthorized.
pub const AUTH_RETRY_LIMIT: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceFormat {
    Pidf,
    /// Legacy format kept for older presence servers.
    Xpidf,
}

impl PresenceFormat {
    /// Unknown selectors fall back to PIDF.
    pub fn select(selector: Option<&str>) -> Self {
        match selector.map(str::trim) {
            None => PresenceFormat::Pidf,
            Some(s) if s.eq_ignore_ascii_case("pidf") => PresenceFormat::Pidf,
            Some(s) if s.eq_ignore_ascii_case("xpidf") => PresenceFormat::Xpidf,
            Some(other) => {
                warn!("Content type {:?} is not supported for PUBLISH, using pidf", other);
                PresenceFormat::Pidf
            }
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            PresenceFormat::Pidf => PIDF_CONTENT_TYPE,
            PresenceFormat::Xpidf => XPIDF_CONTENT_TYPE,
        }
    }

    pub fn render(&self, entity: &str, status: &PresenceStatus) -> String {
        match self {
            PresenceFormat::Pidf => pidf(entity, status),
            PresenceFormat::Xpidf => xpidf(entity, status),
        }
    }
}

/// A publication lifetime has to be at least one second.
pub fn validate_expires(expires: i64) -> Result<u32, AppError> {
    if expires < 1 {
        return Err(AppError::InvalidArgument(format!(
            "Invalid expires value {}. Must be more than 0",
            expires
        )));
    }
    u32::try_from(expires)
        .map_err(|_| AppError::InvalidArgument(format!("expires value {} is too large", expires)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishState {
    Init,
    Sent,
    AuthRetry,
    Success,
    AuthFailed,
    Failed,
}

impl PublishState {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            PublishState::Success | PublishState::AuthFailed | PublishState::Failed
        )
    }
}

#[derive(Debug)]
pub struct PublishController {
    request: Option<Request>,
    tsx: Option<TransactionId>,
    state: PublishState,
    auth_retries: u32,
}

impl PublishController {
    pub fn new(request: Request) -> Self {
        Self {
            request: Some(request),
            tsx: None,
            state: PublishState::Init,
            auth_retries: 0,
        }
    }

    pub fn state(&self) -> PublishState {
        self.state
    }

    pub fn auth_retries(&self) -> u32 {
        self.auth_retries
    }

    pub fn start(&mut self) -> Vec<Effect> {
        match self.request.take() {
            Some(request) => {
                self.state = PublishState::Sent;
                vec![Effect::Send(request)]
            }
            None => Vec::new(),
        }
    }

    pub fn on_sent(&mut self, tsx: TransactionId) {
        self.tsx.get_or_insert(tsx);
    }

    pub fn on_event(&mut self, event: &EngineEvent) -> Vec<Effect> {
        if self.state.is_terminal() {
            return Vec::new();
        }
        match event {
            EngineEvent::Response { tsx, response }
                if self.tsx == Some(*tsx) && response.is_challenge() =>
            {
                self.auth_retries += 1;
                if self.auth_retries > AUTH_RETRY_LIMIT {
                    self.state = PublishState::AuthFailed;
                    error!(
                        "Authentication failed ({} {}). Check your username and password",
                        response.status_code, response.reason
                    );
                    return vec![Effect::Terminate(Outcome::AuthFailed {
                        code: response.status_code,
                    })];
                }
                // The engine answers the first challenge itself.
                self.state = PublishState::AuthRetry;
                Vec::new()
            }
            EngineEvent::Completed { tsx, response } if self.tsx == Some(*tsx) => {
                info!("Response received: {} {}", response.status_code, response.reason);
                let outcome = if response.is_challenge() {
                    self.state = PublishState::AuthFailed;
                    Outcome::AuthFailed {
                        code: response.status_code,
                    }
                } else {
                    let outcome = Outcome::from_final(response.status_code, &response.reason);
                    self.state = match outcome {
                        Outcome::Success => PublishState::Success,
                        _ => PublishState::Failed,
                    };
                    outcome
                };
                vec![Effect::Terminate(outcome)]
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::mock::response;
    use sip_core::Method;

    fn started() -> PublishController {
        let mut ctl = PublishController::new(Request::new(Method::Publish, "sip:alice@example.com"));
        assert_eq!(ctl.start().len(), 1);
        ctl.on_sent(TransactionId(1));
        ctl
    }

    fn raw(code: u16) -> EngineEvent {
        EngineEvent::Response {
            tsx: TransactionId(1),
            response: response(code, "Unauthorized", Method::Publish),
        }
    }

    #[test]
    fn expires_must_be_positive() {
        assert!(matches!(validate_expires(0), Err(AppError::InvalidArgument(_))));
        assert!(matches!(validate_expires(-10), Err(AppError::InvalidArgument(_))));
        assert_eq!(validate_expires(1).unwrap(), 1);
        assert_eq!(validate_expires(3600).unwrap(), 3600);
    }

    #[test]
    fn format_selection_falls_back_to_pidf() {
        assert_eq!(PresenceFormat::select(None), PresenceFormat::Pidf);
        assert_eq!(PresenceFormat::select(Some("XPIDF")), PresenceFormat::Xpidf);
        assert_eq!(PresenceFormat::select(Some("mwi")), PresenceFormat::Pidf);
        assert_eq!(PresenceFormat::Xpidf.content_type(), XPIDF_CONTENT_TYPE);
    }

    #[test]
    fn first_challenge_is_tolerated() {
        let mut ctl = started();
        assert!(ctl.on_event(&raw(401)).is_empty());
        assert_eq!(ctl.state(), PublishState::AuthRetry);
        assert_eq!(ctl.auth_retries(), 1);
    }

    #[test]
    fn second_challenge_fails_once() {
        let mut ctl = started();
        ctl.on_event(&raw(407));
        let effects = ctl.on_event(&raw(401));
        assert_eq!(effects, vec![Effect::Terminate(Outcome::AuthFailed { code: 401 })]);
        assert_eq!(ctl.state(), PublishState::AuthFailed);

        // The engine still reports the final 401; nothing more happens.
        let done = EngineEvent::Completed {
            tsx: TransactionId(1),
            response: response(401, "Unauthorized", Method::Publish),
        };
        assert!(ctl.on_event(&done).is_empty());
    }

    #[test]
    fn provisional_and_success_do_not_count_as_challenges() {
        let mut ctl = started();
        let trying = EngineEvent::Response {
            tsx: TransactionId(1),
            response: response(100, "Trying", Method::Publish),
        };
        assert!(ctl.on_event(&trying).is_empty());
        assert_eq!(ctl.auth_retries(), 0);

        let ok = EngineEvent::Completed {
            tsx: TransactionId(1),
            response: response(200, "OK", Method::Publish),
        };
        assert_eq!(ctl.on_event(&ok), vec![Effect::Terminate(Outcome::Success)]);
        assert_eq!(ctl.state(), PublishState::Success);
    }

    #[test]
    fn challenge_then_failure() {
        let mut ctl = started();
        ctl.on_event(&raw(401));
        let forbidden = EngineEvent::Completed {
            tsx: TransactionId(1),
            response: response(403, "Forbidden", Method::Publish),
        };
        assert_eq!(
            ctl.on_event(&forbidden),
            vec![Effect::Terminate(Outcome::Failed {
                code: 403,
                reason: "Forbidden".into()
            })]
        );
        assert_eq!(ctl.state(), PublishState::Failed);
    }
}
