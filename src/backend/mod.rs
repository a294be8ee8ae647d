//! Collaborators invoked by state machine transitions.
//!
//! The protocol core never authenticates, plans or stores anything itself.
//! Transitions call through the narrow traits defined here and map every
//! `Err(Status)` they get back to a FAILURE response.
//!
//! # Key Components
//!
//! - [`Authenticator`]: validates the credentials of HELLO (5.0) or LOGON.
//! - [`Executor`]: transactions, queries and routing tables.
//! - [`ResultStream`]: records produced by a RUN, pulled lazily.
//! - [`Interrupt`]: cooperative cancellation shared with in-flight work.
//! - [`memory::MemoryBackend`]: a small in-process implementation.
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use crate::{
    packstream::{Map, Value},
    protocol::message::{AuthToken, Route, Run, TransactionExtra},
    status::Status,
};

pub mod memory;
#[cfg(test)]
pub(crate) mod testing;

/// The authenticated identity a session acts as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub name: String,
}

/// An open explicit transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxHandle {
    pub id: u64,
    pub database: String,
}

/// A notification attached to a query result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub code: String,
    pub gql_status: String,
    pub title: String,
    pub description: String,
    pub severity: String,
    pub category: String,
}

/// What is known about a result once its stream is exhausted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Summary {
    /// `r`, `w`, `rw` or `s`.
    pub query_type: Option<String>,
    pub database: Option<String>,
    /// Set by auto-commit queries once they have committed.
    pub bookmark: Option<String>,
    pub stats: Map,
    pub notifications: Vec<Notification>,
}

pub trait ResultStream: Send {
    fn fields(&self) -> &[String];

    /// `Ok(None)` once the stream is exhausted.
    fn next_record(&mut self) -> Result<Option<Vec<Value>>, Status>;

    fn summary(&self) -> Summary;
}

pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: &AuthToken) -> Result<Principal, Status>;
}

pub trait Executor: Send + Sync {
    fn begin(&self, principal: &Principal, extra: &TransactionExtra) -> Result<TxHandle, Status>;

    /// Starts a query, inside `tx` when given, auto-commit otherwise. The
    /// interrupt is raised when the client resets while the query runs.
    fn run(
        &self,
        principal: &Principal,
        tx: Option<&TxHandle>,
        run: &Run,
        interrupt: &Interrupt,
    ) -> Result<Box<dyn ResultStream>, Status>;

    /// Returns the bookmark of the committed transaction, if any.
    fn commit(&self, tx: &TxHandle) -> Result<Option<String>, Status>;

    fn rollback(&self, tx: &TxHandle) -> Result<(), Status>;

    fn route(&self, principal: &Principal, route: &Route) -> Result<Map, Status>;
}

/// The collaborators one server hands to every connection.
#[derive(Clone)]
pub struct Backend {
    pub auth: Arc<dyn Authenticator>,
    pub executor: Arc<dyn Executor>,
}

impl Backend {
    pub fn new(auth: Arc<dyn Authenticator>, executor: Arc<dyn Executor>) -> Self {
        Self { auth, executor }
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend").finish_non_exhaustive()
    }
}

/// Counts RESET requests that have been received but not yet processed.
///
/// The reader side raises it as soon as a RESET is decoded, ahead of any
/// queued work; running collaborators poll it and stop early. Each processed
/// RESET acknowledges one.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    pending: Arc<AtomicUsize>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.pending.load(Ordering::SeqCst) > 0
    }

    /// Acknowledges one RESET and returns how many are still pending.
    pub fn acknowledge(&self) -> usize {
        match self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        {
            Ok(previous) => previous - 1,
            Err(_) => 0,
        }
    }

    /// Fails with a terminated status once a RESET is pending.
    pub fn check(&self) -> Result<(), Status> {
        if self.is_interrupted() {
            return Err(Status::terminated(
                "the transaction has been terminated by a reset",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acknowledge_counts_down_and_saturates() {
        let interrupt = Interrupt::new();
        interrupt.interrupt();
        interrupt.interrupt();
        assert!(interrupt.is_interrupted());
        assert_eq!(interrupt.acknowledge(), 1);
        assert_eq!(interrupt.acknowledge(), 0);
        assert_eq!(interrupt.acknowledge(), 0);
        assert!(!interrupt.is_interrupted());
    }

    #[test]
    fn clones_share_the_counter() {
        let interrupt = Interrupt::new();
        let seen_by_worker = interrupt.clone();
        assert!(seen_by_worker.check().is_ok());
        interrupt.interrupt();
        assert!(seen_by_worker.check().is_err());
    }
}
