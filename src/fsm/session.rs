use std::{collections::BTreeMap, fmt, time::Instant};

use crate::{
    backend::{Notification, Principal, ResultStream, TxHandle},
    packstream::Value,
    protocol::message::NotificationConfig,
    status::Status,
};

/// Query id of an auto-commit result, which is never reported to clients.
pub(crate) const AUTOCOMMIT_QID: i64 = 0;

pub(crate) struct OpenResult {
    pub stream: Box<dyn ResultStream>,
    /// A record read ahead to learn whether more follow.
    pub pending: Option<Vec<Value>>,
    pub started: Instant,
    pub notifications: NotificationConfig,
}

impl OpenResult {
    pub fn next(&mut self) -> Result<Option<Vec<Value>>, Status> {
        match self.pending.take() {
            Some(record) => Ok(Some(record)),
            None => self.stream.next_record(),
        }
    }

    pub fn peek(&mut self) -> Result<bool, Status> {
        if self.pending.is_none() {
            self.pending = self.stream.next_record()?;
        }
        Ok(self.pending.is_some())
    }
}

/// Mutable per-connection data the state machine carries between requests.
#[derive(Default)]
pub struct Session {
    pub(crate) connection_id: String,
    pub(crate) user_agent: Option<String>,
    pub(crate) principal: Option<Principal>,
    pub(crate) notifications: NotificationConfig,
    pub(crate) tx: Option<TxHandle>,
    pub(crate) tx_notifications: Option<NotificationConfig>,
    pub(crate) results: BTreeMap<i64, OpenResult>,
    pub(crate) next_qid: i64,
    pub(crate) last_qid: Option<i64>,
    pub(crate) bookmark: Option<String>,
}

impl Session {
    pub fn new(connection_id: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            ..Self::default()
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub fn transaction(&self) -> Option<&TxHandle> {
        self.tx.as_ref()
    }

    pub fn open_results(&self) -> usize {
        self.results.len()
    }

    pub fn last_bookmark(&self) -> Option<&str> {
        self.bookmark.as_deref()
    }

    pub(crate) fn open(&mut self, qid: i64, result: OpenResult) {
        self.results.insert(qid, result);
        self.last_qid = Some(qid);
    }

    pub(crate) fn allocate_qid(&mut self) -> i64 {
        let qid = self.next_qid;
        self.next_qid += 1;
        qid
    }

    /// Resolves `-1` to the most recent query.
    pub(crate) fn resolve_qid(&self, qid: i64) -> Option<i64> {
        match qid {
            -1 => self.last_qid.filter(|q| self.results.contains_key(q)),
            qid => self.results.contains_key(&qid).then_some(qid),
        }
    }

    /// Forgets the transaction and every open result.
    pub(crate) fn clear(&mut self) -> Option<TxHandle> {
        self.results.clear();
        self.last_qid = None;
        self.next_qid = 0;
        self.tx_notifications = None;
        self.tx.take()
    }

    /// The notification filter that applies to new work: a transaction's own
    /// filter, or the one from HELLO.
    pub(crate) fn effective_notifications(&self, requested: &NotificationConfig) -> NotificationConfig {
        if *requested != NotificationConfig::default() {
            return requested.clone();
        }
        self.tx_notifications
            .clone()
            .unwrap_or_else(|| self.notifications.clone())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("connection_id", &self.connection_id)
            .field("principal", &self.principal)
            .field("tx", &self.tx)
            .field("open_results", &self.results.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Drops notifications the client asked not to receive.
pub(crate) fn filter_notifications(
    notifications: &[Notification],
    config: &NotificationConfig,
) -> Vec<Notification> {
    if config.is_off() {
        return Vec::new();
    }
    let warnings_only = config.minimum_severity.as_deref() == Some("WARNING");
    notifications
        .iter()
        .filter(|n| !warnings_only || n.severity == "WARNING")
        .filter(|n| {
            config
                .disabled
                .as_ref()
                .is_none_or(|disabled| !disabled.contains(&n.category))
        })
        .cloned()
        .collect()
}
