//! What each transition does against the session and the collaborators.
use std::time::Instant;

use log::{debug, info, warn};

use crate::{
    backend::{Backend, Interrupt, Principal},
    packstream::{Map, Value},
    protocol::{
        message::{
            AuthToken, Hello, NotificationConfig, Request, Route, Run, StreamLimit,
            TransactionExtra,
        },
        metadata::MetadataHandler,
    },
    status::Status,
};

use super::{
    Action, State,
    session::{AUTOCOMMIT_QID, OpenResult, Session, filter_notifications},
};

/// Where the machine goes after a successful action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Next {
    /// The transition's own target.
    Registered,
    Stay,
    To(State),
}

pub(crate) enum Outcome {
    Success {
        records: Vec<Vec<Value>>,
        metadata: Map,
        next: Next,
    },
    Ignored,
    /// Reported, and the session fails.
    Failure(Status),
    /// Reported, but the session may try again from the same state.
    Retry(Status),
    /// The client said goodbye; nothing is sent back.
    Closed,
}

impl Outcome {
    fn success(metadata: Map) -> Self {
        Outcome::Success {
            records: Vec::new(),
            metadata,
            next: Next::Registered,
        }
    }

    fn staying(records: Vec<Vec<Value>>, metadata: Map, next: Next) -> Self {
        Outcome::Success {
            records,
            metadata,
            next,
        }
    }
}

pub(crate) struct Context<'a> {
    pub session: &'a mut Session,
    pub backend: &'a Backend,
    pub metadata: &'a dyn MetadataHandler,
    pub interrupt: &'a Interrupt,
    pub server_agent: &'a str,
    pub initial: State,
}

impl Context<'_> {
    pub(crate) fn perform(&mut self, action: Action, request: Request) -> Outcome {
        match (action, request) {
            (Action::Hello { authenticate }, Request::Hello(hello)) => self.hello(hello, authenticate),
            (Action::Logon, Request::Logon(token)) => self.logon(&token),
            (Action::Logoff, Request::Logoff) => self.logoff(),
            (Action::Goodbye, Request::Goodbye) => self.goodbye(),
            (Action::Reset, Request::Reset) => self.reset(),
            (Action::Run, Request::Run(run)) => self.run(run),
            (Action::Begin, Request::Begin(extra)) => self.begin(extra),
            (Action::Commit, Request::Commit) => self.commit(),
            (Action::Rollback, Request::Rollback) => self.rollback(),
            (Action::Pull, Request::Pull(limit)) => self.stream(limit, true),
            (Action::Discard, Request::Discard(limit)) => self.stream(limit, false),
            (Action::Route, Request::Route(route)) => self.route(&route),
            (Action::Telemetry, Request::Telemetry(telemetry)) => {
                debug!("{}: telemetry api {}", self.session.connection_id, telemetry.api);
                Outcome::success(Map::new())
            }
            (Action::Ignore, _) => Outcome::Ignored,
            (action, request) => Outcome::Failure(Status::request_invalid(format!(
                "{} cannot be handled by {action:?}",
                request.name()
            ))),
        }
    }

    fn principal(&self) -> Result<Principal, Status> {
        self.session
            .principal
            .clone()
            .ok_or_else(|| Status::unauthorized("the session is not authenticated"))
    }

    fn authenticate(&mut self, token: &AuthToken) -> Result<(), Outcome> {
        match self.backend.auth.authenticate(token) {
            Ok(principal) => {
                info!("{}: authenticated as {}", self.session.connection_id, principal.name);
                self.session.principal = Some(principal);
                Ok(())
            }
            Err(status) if status.is_authentication_failure() => {
                warn!("{}: authentication failed: {status}", self.session.connection_id);
                Err(Outcome::Retry(status))
            }
            Err(status) => Err(Outcome::Failure(status)),
        }
    }

    fn hello(&mut self, hello: Hello, authenticate: bool) -> Outcome {
        if authenticate {
            let Some(token) = &hello.auth else {
                return Outcome::Failure(Status::request_invalid("HELLO carries no credentials"));
            };
            if let Err(outcome) = self.authenticate(token) {
                return outcome;
            }
        }
        debug!("{}: hello from {}", self.session.connection_id, hello.user_agent);
        self.session.user_agent = Some(hello.user_agent);
        self.session.notifications = hello.notifications;

        let mut meta = Map::new();
        self.metadata
            .on_hello(&mut meta, self.server_agent, &self.session.connection_id);
        Outcome::success(meta)
    }

    fn logon(&mut self, token: &AuthToken) -> Outcome {
        match self.authenticate(token) {
            Ok(()) => Outcome::success(Map::new()),
            Err(outcome) => outcome,
        }
    }

    fn logoff(&mut self) -> Outcome {
        self.session.principal = None;
        Outcome::success(Map::new())
    }

    fn goodbye(&mut self) -> Outcome {
        self.release();
        Outcome::Closed
    }

    /// Only the last of several queued RESETs does the work; the ones before
    /// it are ignored.
    fn reset(&mut self) -> Outcome {
        if self.interrupt.acknowledge() > 0 {
            return Outcome::Ignored;
        }
        self.release();
        let next = if self.session.principal.is_some() {
            State::Ready
        } else if self.session.user_agent.is_some() {
            State::Authentication
        } else {
            self.initial
        };
        Outcome::staying(Vec::new(), Map::new(), Next::To(next))
    }

    /// Rolls back the open transaction and drops every open result.
    pub(crate) fn release(&mut self) {
        if let Some(tx) = self.session.clear() {
            if let Err(status) = self.backend.executor.rollback(&tx) {
                warn!(
                    "{}: rollback of transaction {} failed: {status}",
                    self.session.connection_id, tx.id
                );
            }
        }
    }

    fn run(&mut self, run: Run) -> Outcome {
        let principal = match self.principal() {
            Ok(principal) => principal,
            Err(status) => return Outcome::Failure(status),
        };
        let notifications = self.session.effective_notifications(&run.extra.notifications);
        let started = Instant::now();
        let stream = match self.backend.executor.run(
            &principal,
            self.session.tx.as_ref(),
            &run,
            self.interrupt,
        ) {
            Ok(stream) => stream,
            Err(status) => return Outcome::Failure(status),
        };
        let t_first = started.elapsed();

        let explicit = self.session.tx.is_some();
        let qid = if explicit {
            self.session.allocate_qid()
        } else {
            AUTOCOMMIT_QID
        };
        let mut meta = Map::new();
        self.metadata
            .on_run(&mut meta, stream.fields(), explicit.then_some(qid), t_first);
        self.session.open(
            qid,
            OpenResult {
                stream,
                pending: None,
                started,
                notifications,
            },
        );
        Outcome::success(meta)
    }

    fn begin(&mut self, extra: TransactionExtra) -> Outcome {
        let principal = match self.principal() {
            Ok(principal) => principal,
            Err(status) => return Outcome::Failure(status),
        };
        match self.backend.executor.begin(&principal, &extra) {
            Ok(tx) => {
                debug!("{}: transaction {} open", self.session.connection_id, tx.id);
                let mut meta = Map::new();
                self.metadata.on_begin(&mut meta, &tx.database);
                if extra.notifications != NotificationConfig::default() {
                    self.session.tx_notifications = Some(extra.notifications);
                }
                self.session.tx = Some(tx);
                Outcome::success(meta)
            }
            Err(status) => Outcome::Failure(status),
        }
    }

    fn commit(&mut self) -> Outcome {
        let Some(tx) = self.session.clear() else {
            return Outcome::Failure(Status::request_invalid("no open transaction"));
        };
        match self.backend.executor.commit(&tx) {
            Ok(bookmark) => {
                let mut meta = Map::new();
                if let Some(bookmark) = &bookmark {
                    meta.insert("bookmark".into(), bookmark.as_str().into());
                }
                self.session.bookmark = bookmark;
                Outcome::success(meta)
            }
            Err(status) => Outcome::Failure(status),
        }
    }

    fn rollback(&mut self) -> Outcome {
        let Some(tx) = self.session.clear() else {
            return Outcome::Failure(Status::request_invalid("no open transaction"));
        };
        match self.backend.executor.rollback(&tx) {
            Ok(()) => Outcome::success(Map::new()),
            Err(status) => Outcome::Failure(status),
        }
    }

    /// PULL (`keep`) or DISCARD up to `limit.n` records of one result.
    fn stream(&mut self, limit: StreamLimit, keep: bool) -> Outcome {
        let Some(qid) = self.session.resolve_qid(limit.qid) else {
            return Outcome::Failure(Status::request_invalid(format!(
                "no open result for query id {}",
                limit.qid
            )));
        };
        let Some(result) = self.session.results.get_mut(&qid) else {
            return Outcome::Failure(Status::request_invalid(format!(
                "no open result for query id {qid}"
            )));
        };

        let mut records = Vec::new();
        let mut taken = 0;
        let mut exhausted = false;
        while limit.all() || taken < limit.n {
            if let Err(status) = self.interrupt.check() {
                return Outcome::Failure(status);
            }
            match result.next() {
                Ok(Some(record)) => {
                    taken += 1;
                    if keep {
                        records.push(record);
                    }
                }
                Ok(None) => {
                    exhausted = true;
                    break;
                }
                Err(status) => return Outcome::Failure(status),
            }
        }
        if !exhausted {
            match result.peek() {
                Ok(more) => exhausted = !more,
                Err(status) => return Outcome::Failure(status),
            }
        }

        let mut meta = Map::new();
        if !exhausted {
            meta.insert("has_more".into(), true.into());
            return Outcome::staying(records, meta, Next::Stay);
        }

        let Some(result) = self.session.results.remove(&qid) else {
            return Outcome::Failure(Status::unknown("result vanished while streaming"));
        };
        let summary = result.stream.summary();
        let notifications = filter_notifications(&summary.notifications, &result.notifications);
        self.metadata
            .on_stream_done(&mut meta, &summary, &notifications, result.started.elapsed());
        if summary.bookmark.is_some() {
            self.session.bookmark = summary.bookmark;
        }
        let next = if self.session.results.is_empty() {
            Next::Registered
        } else {
            Next::Stay
        };
        Outcome::staying(records, meta, next)
    }

    fn route(&mut self, route: &Route) -> Outcome {
        let principal = match self.principal() {
            Ok(principal) => principal,
            Err(status) => return Outcome::Failure(status),
        };
        match self.backend.executor.route(&principal, route) {
            Ok(table) => Outcome::success(crate::map! { "rt" => table }),
            Err(status) => Outcome::Failure(status),
        }
    }
}
