use std::sync::Arc;

use log::{debug, warn};

use crate::{
    backend::{Backend, Interrupt},
    packstream::PackError,
    protocol::{
        BoltProtocol, ProtocolVersion,
        message::{Request, Response},
        registry::Tagged,
    },
    status::Status,
};

use super::{
    State, Transition,
    actions::{Context, Next, Outcome},
    session::Session,
};

/// Drives one connection's session through the transition table of its
/// negotiated protocol version.
///
/// Every call to [`process`](Self::process) or [`reject`](Self::reject) answers
/// with exactly one summary response, possibly preceded by records. GOODBYE
/// is the one request that gets no answer.
pub struct StateMachine {
    protocol: Arc<BoltProtocol>,
    backend: Backend,
    interrupt: Interrupt,
    server_agent: String,
    session: Session,
    state: State,
}

impl StateMachine {
    pub fn new(
        protocol: Arc<BoltProtocol>,
        backend: Backend,
        session: Session,
        server_agent: impl Into<String>,
    ) -> Self {
        let state = protocol.state_machine().initial();
        Self {
            protocol,
            backend,
            interrupt: Interrupt::new(),
            server_agent: server_agent.into(),
            session,
            state,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn version(&self) -> ProtocolVersion {
        self.protocol.version()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The handle raised for every RESET before it is queued.
    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    pub fn is_closed(&self) -> bool {
        self.state == State::Defunct
    }

    pub fn process(&mut self, request: Request) -> Vec<Response> {
        if self.state == State::Defunct {
            return vec![Response::Failure(Status::request_invalid(
                "the connection is closed",
            ))];
        }
        self.observe_interrupt();

        let Some(transition) = self
            .protocol
            .state_machine()
            .transition(self.state, request.tag())
            .copied()
        else {
            let status = Status::request_invalid(format!(
                "message {} cannot be handled by a session in the {} state",
                request.name(),
                self.state
            ));
            warn!("{}: {status}", self.session.connection_id());
            self.state = State::Failed;
            return vec![Response::Failure(status)];
        };

        let outcome = self.context().perform(transition.action, request);
        self.apply(transition, outcome)
    }

    /// Ends the session once the transport is gone, rolling back whatever it
    /// left open.
    pub fn close(&mut self) {
        if self.state == State::Defunct {
            return;
        }
        self.context().release();
        debug!(
            "{}: {} -> {} (transport closed)",
            self.session.connection_id(),
            self.state,
            State::Defunct
        );
        self.state = State::Defunct;
    }

    fn context(&mut self) -> Context<'_> {
        Context {
            session: &mut self.session,
            backend: &self.backend,
            metadata: self.protocol.metadata_handler(),
            interrupt: &self.interrupt,
            server_agent: &self.server_agent,
            initial: self.protocol.state_machine().initial(),
        }
    }

    /// Answers a request that could not be decoded.
    pub fn reject(&mut self, error: &PackError) -> Vec<Response> {
        if self.state == State::Defunct {
            return vec![Response::Failure(Status::request_invalid(
                "the connection is closed",
            ))];
        }
        self.observe_interrupt();
        if matches!(self.state, State::Failed | State::Interrupted) {
            return vec![Response::Ignored];
        }
        warn!("{}: undecodable request: {error}", self.session.connection_id());
        let status = if error.is_validation() {
            Status::request_invalid(error.to_string())
        } else {
            Status::invalid_format(error.to_string())
        };
        self.state = State::Failed;
        vec![Response::Failure(status)]
    }

    fn observe_interrupt(&mut self) {
        if self.interrupt.is_interrupted() && self.state != State::Interrupted {
            debug!("{}: {} -> {} (reset pending)", self.session.connection_id(), self.state, State::Interrupted);
            self.state = State::Interrupted;
        }
    }

    fn apply(&mut self, transition: Transition, outcome: Outcome) -> Vec<Response> {
        let before = self.state;
        let responses = match outcome {
            Outcome::Success {
                records,
                metadata,
                next,
            } => {
                self.state = match next {
                    Next::Registered => transition.next,
                    Next::Stay => self.state,
                    Next::To(state) => state,
                };
                let mut responses = records.into_iter().map(Response::Record).collect::<Vec<_>>();
                responses.push(Response::Success(metadata));
                responses
            }
            Outcome::Ignored => vec![Response::Ignored],
            Outcome::Failure(status) => {
                warn!("{}: {status}", self.session.connection_id());
                self.state = State::Failed;
                vec![Response::Failure(status)]
            }
            Outcome::Retry(status) => vec![Response::Failure(status)],
            Outcome::Closed => {
                self.state = State::Defunct;
                Vec::new()
            }
        };
        debug!(
            "{}: {before} --{:?}--> {}",
            self.session.connection_id(),
            transition.action,
            self.state
        );
        responses
    }
}

impl Drop for StateMachine {
    fn drop(&mut self) {
        self.close();
    }
}
