//! An in-process backend that answers every query by echoing its parameters.
//!
//! Good enough to exercise a full session end to end: basic authentication
//! against a fixed user table, explicit transactions with bookmarks, and a
//! routing table that points every role at the advertised address.
use std::{
    collections::{HashMap, HashSet},
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use log::debug;

use crate::{
    map,
    packstream::{Map, Value},
    protocol::message::{AccessMode, AuthToken, Route, Run, TransactionExtra},
    status::{Status, code},
};

use super::{Authenticator, Executor, Interrupt, Principal, ResultStream, Summary, TxHandle};

pub const DEFAULT_DATABASE: &str = "neo4j";
const SYSTEM_DATABASE: &str = "system";
const ROUTING_TTL: i64 = 300;

#[derive(Debug)]
pub struct MemoryBackend {
    users: HashMap<String, String>,
    allow_anonymous: bool,
    advertised_address: String,
    open: Mutex<HashSet<u64>>,
    next_tx: AtomicU64,
    commits: AtomicU64,
}

impl MemoryBackend {
    pub fn new(advertised_address: impl Into<String>) -> Self {
        Self {
            users: HashMap::new(),
            allow_anonymous: false,
            advertised_address: advertised_address.into(),
            open: Mutex::new(HashSet::new()),
            next_tx: AtomicU64::new(1),
            commits: AtomicU64::new(0),
        }
    }

    pub fn with_user(mut self, name: impl Into<String>, password: impl Into<String>) -> Self {
        self.users.insert(name.into(), password.into());
        self
    }

    pub fn allow_anonymous(mut self, allow: bool) -> Self {
        self.allow_anonymous = allow;
        self
    }

    pub fn open_transactions(&self) -> usize {
        self.open.lock().map(|open| open.len()).unwrap_or(0)
    }

    fn database(requested: Option<&str>) -> Result<String, Status> {
        match requested {
            None => Ok(DEFAULT_DATABASE.to_string()),
            Some(db @ (DEFAULT_DATABASE | SYSTEM_DATABASE)) => Ok(db.to_string()),
            Some(other) => Err(Status::new(
                code::DATABASE_NOT_FOUND,
                format!("database '{other}' does not exist"),
            )),
        }
    }

    fn next_bookmark(&self) -> String {
        format!("memory:{}", self.commits.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn is_open(&self, tx: &TxHandle) -> bool {
        self.open.lock().map(|open| open.contains(&tx.id)).unwrap_or(false)
    }

    fn close(&self, tx: &TxHandle) -> Result<(), Status> {
        let mut open = self
            .open
            .lock()
            .map_err(|_| Status::unknown("transaction table is poisoned"))?;
        if !open.remove(&tx.id) {
            return Err(Status::terminated(format!("transaction {} is not open", tx.id)));
        }
        Ok(())
    }
}

impl Authenticator for MemoryBackend {
    fn authenticate(&self, token: &AuthToken) -> Result<Principal, Status> {
        match token.scheme.as_str() {
            "none" if self.allow_anonymous => Ok(Principal {
                name: "anonymous".into(),
            }),
            "basic" => {
                let (Some(name), Some(password)) = (&token.principal, &token.credentials) else {
                    return Err(Status::unauthorized("basic auth needs principal and credentials"));
                };
                match self.users.get(name) {
                    Some(expected) if expected == password => Ok(Principal { name: name.clone() }),
                    _ => Err(Status::unauthorized(
                        "the client is unauthorized due to authentication failure",
                    )),
                }
            }
            scheme => Err(Status::unauthorized(format!(
                "unsupported authentication scheme '{scheme}'"
            ))),
        }
    }
}

impl Executor for MemoryBackend {
    fn begin(&self, principal: &Principal, extra: &TransactionExtra) -> Result<TxHandle, Status> {
        let database = Self::database(extra.db.as_deref())?;
        let id = self.next_tx.fetch_add(1, Ordering::SeqCst);
        self.open
            .lock()
            .map_err(|_| Status::unknown("transaction table is poisoned"))?
            .insert(id);
        debug!("{} began transaction {id} on {database}", principal.name);
        Ok(TxHandle { id, database })
    }

    fn run(
        &self,
        _principal: &Principal,
        tx: Option<&TxHandle>,
        run: &Run,
        interrupt: &Interrupt,
    ) -> Result<Box<dyn ResultStream>, Status> {
        interrupt.check()?;
        if run.query.trim().is_empty() {
            return Err(Status::new(code::SYNTAX_ERROR, "empty query"));
        }
        let database = match tx {
            Some(tx) if !self.is_open(tx) => {
                return Err(Status::terminated(format!("transaction {} is not open", tx.id)));
            }
            Some(tx) => tx.database.clone(),
            None => Self::database(run.extra.db.as_deref())?,
        };
        let query_type = match run.extra.mode {
            AccessMode::Read => "r",
            AccessMode::Write => "rw",
        };
        Ok(Box::new(EchoStream {
            fields: run.parameters.keys().cloned().collect(),
            record: Some(run.parameters.values().cloned().collect()),
            interrupt: interrupt.clone(),
            summary: Summary {
                query_type: Some(query_type.into()),
                database: Some(database),
                bookmark: tx.is_none().then(|| self.next_bookmark()),
                ..Summary::default()
            },
        }))
    }

    fn commit(&self, tx: &TxHandle) -> Result<Option<String>, Status> {
        self.close(tx)?;
        Ok(Some(self.next_bookmark()))
    }

    fn rollback(&self, tx: &TxHandle) -> Result<(), Status> {
        self.close(tx)
    }

    fn route(&self, _principal: &Principal, route: &Route) -> Result<Map, Status> {
        let database = Self::database(route.db.as_deref())?;
        let server = |role: &str| {
            Value::Map(map! {
                "addresses" => vec![Value::from(self.advertised_address.as_str())],
                "role" => role,
            })
        };
        Ok(map! {
            "ttl" => ROUTING_TTL,
            "db" => database,
            "servers" => vec![server("WRITE"), server("READ"), server("ROUTE")],
        })
    }
}

/// A single record whose columns are the query parameters.
struct EchoStream {
    fields: Vec<String>,
    record: Option<Vec<Value>>,
    interrupt: Interrupt,
    summary: Summary,
}

impl ResultStream for EchoStream {
    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn next_record(&mut self) -> Result<Option<Vec<Value>>, Status> {
        self.interrupt.check()?;
        Ok(self.record.take())
    }

    fn summary(&self) -> Summary {
        self.summary.clone()
    }
}
