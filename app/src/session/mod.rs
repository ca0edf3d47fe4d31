//! Per-command controllers and the loop that feeds them engine events.
//!
//! A controller never touches the network. It reacts to an
//! [`EngineEvent`] with a list of [`Effect`]s; [`Session`] carries those
//! out against the engine and stops once the [`Terminator`] is raised.

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};
use sip_core::{Engine, EngineEvent, Request, TransactionId};

use crate::{AppError, ExitStatus};

pub mod invite;
pub mod publish;
pub mod register;
pub mod request;

pub use invite::InviteController;
pub use publish::PublishController;
pub use register::RegisterController;
pub use request::RequestController;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How the invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failed { code: u16, reason: String },
    AuthFailed { code: u16 },
}

impl Outcome {
    pub fn from_final(code: u16, reason: &str) -> Self {
        if (200..300).contains(&code) {
            Outcome::Success
        } else {
            Outcome::Failed {
                code,
                reason: reason.to_string(),
            }
        }
    }

    pub fn exit_status(&self) -> ExitStatus {
        match self {
            Outcome::Success => ExitStatus::Success,
            Outcome::Failed { .. } | Outcome::AuthFailed { .. } => ExitStatus::Failure,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Send(Request),
    /// ACK the final response of this INVITE transaction.
    SendAck(TransactionId),
    /// Hang up or cancel the INVITE session with this status.
    EndSession(u16),
    Terminate(Outcome),
}

/// Loop termination signal. Only the first raise counts.
#[derive(Debug, Default)]
pub struct Terminator {
    outcome: Option<Outcome>,
}

impl Terminator {
    /// Returns false when the signal was already raised.
    pub fn raise(&mut self, outcome: Outcome) -> bool {
        if self.outcome.is_some() {
            debug!("termination already signalled, ignoring {:?}", outcome);
            return false;
        }
        self.outcome = Some(outcome);
        true
    }

    pub fn is_raised(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }
}

#[derive(Debug)]
pub enum Controller {
    Register(RegisterController),
    Publish(PublishController),
    Invite(InviteController),
    /// OPTIONS, SUBSCRIBE, NOTIFY, REFER and MESSAGE: one request, one answer.
    Request(RequestController),
}

impl Controller {
    pub fn start(&mut self) -> Vec<Effect> {
        match self {
            Controller::Register(c) => c.start(),
            Controller::Publish(c) => c.start(),
            Controller::Invite(c) => c.start(),
            Controller::Request(c) => c.start(),
        }
    }

    /// The initial request went out as `tsx`.
    pub fn on_sent(&mut self, tsx: TransactionId) {
        match self {
            Controller::Register(c) => c.on_sent(tsx),
            Controller::Publish(c) => c.on_sent(tsx),
            Controller::Invite(c) => c.on_sent(tsx),
            Controller::Request(c) => c.on_sent(tsx),
        }
    }

    pub fn on_event(&mut self, event: &EngineEvent) -> Vec<Effect> {
        match self {
            Controller::Register(c) => c.on_event(event),
            Controller::Publish(c) => c.on_event(event),
            Controller::Invite(c) => c.on_event(event),
            Controller::Request(c) => c.on_event(event),
        }
    }
}

/// Drives one controller over an engine until termination.
pub struct Session<E: Engine> {
    engine: E,
    controller: Controller,
    terminator: Terminator,
}

impl<E: Engine> Session<E> {
    pub fn new(engine: E, controller: Controller) -> Self {
        Self {
            engine,
            controller,
            terminator: Terminator::default(),
        }
    }

    pub fn run(mut self) -> Result<Outcome, AppError> {
        let effects = self.controller.start();
        self.apply(effects)?;

        loop {
            if let Some(outcome) = self.terminator.outcome() {
                return Ok(outcome.clone());
            }

            let events = self.engine.poll(Instant::now())?;
            let idle = events.is_empty();
            self.dispatch(&events)?;

            if idle && !self.terminator.is_raised() {
                thread::sleep(POLL_INTERVAL);
            }
        }
    }

    /// Hand one batch of engine events to the controller. The rest of the
    /// batch is dropped once the session has terminated.
    fn dispatch(&mut self, events: &[EngineEvent]) -> Result<(), AppError> {
        for event in events {
            if self.terminator.is_raised() {
                break;
            }
            let effects = self.controller.on_event(event);
            self.apply(effects)?;
        }
        Ok(())
    }

    fn apply(&mut self, effects: Vec<Effect>) -> Result<(), AppError> {
        for effect in effects {
            match effect {
                Effect::Send(request) => {
                    let tsx = self
                        .engine
                        .send_request(request)
                        .map_err(|source| AppError::EngineSetup {
                            step: "send request",
                            source,
                        })?;
                    self.controller.on_sent(tsx);
                }
                Effect::SendAck(tsx) => match self.engine.build_ack(tsx) {
                    Ok(ack) => {
                        self.engine.send_request(ack)?;
                    }
                    Err(e) => warn!("cannot acknowledge {}: {}", tsx, e),
                },
                Effect::EndSession(status) => match self.engine.end_session(status)? {
                    Some(request) => {
                        self.engine.send_request(request)?;
                    }
                    None => debug!("nothing to send to end the session yet"),
                },
                Effect::Terminate(outcome) => {
                    self.terminator.raise(outcome);
                }
            }
        }
        Ok(())
    }
}
