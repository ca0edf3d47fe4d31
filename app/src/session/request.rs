use log::info;
use sip_core::{EngineEvent, Method, Request, TransactionId};

use super::{Effect, Outcome};

/// Sends one request and stops on its final response. Timeouts arrive
/// from the engine as a local 408.
#[derive(Debug)]
pub struct RequestController {
    method: Method,
    request: Option<Request>,
    tsx: Option<TransactionId>,
    done: bool,
}

impl RequestController {
    pub fn new(request: Request) -> Self {
        Self {
            method: request.method,
            request: Some(request),
            tsx: None,
            done: false,
        }
    }

    pub fn method(&self) -> Method {
        self.method
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
            EngineEvent::Completed { tsx, response } if !self.done && self.tsx == Some(*tsx) => {
                self.done = true;
                info!(
                    "{} response received: {} {}",
                    self.method, response.status_code, response.reason
                );
                vec![Effect::Terminate(Outcome::from_final(
                    response.status_code,
                    &response.reason,
                ))]
            }
            _ => Vec::new(),
        }
    }
}
