use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use crate::{
    packstream::{Map, Value},
    protocol::message::{AuthToken, Route, Run, TransactionExtra},
    status::{Status, code},
};

use super::{
    Authenticator, Backend, Executor, Interrupt, Notification, Principal, ResultStream, Summary,
    TxHandle,
};

/// Accepts `neo`/`secret`. Queries produce `$rows` records counting up from
/// zero; a query reading `FAIL` fails and one containing `WARN` carries a
/// warning notification.
#[derive(Default)]
pub(crate) struct Scripted {
    next_tx: AtomicU64,
}

pub(crate) fn backend() -> Backend {
    let scripted = Arc::new(Scripted::default());
    Backend::new(scripted.clone(), scripted)
}

pub(crate) fn warning() -> Notification {
    Notification {
        code: "Neo.ClientNotification.Statement.CartesianProduct".into(),
        gql_status: "03N90".into(),
        title: "cartesian product".into(),
        description: "the query builds a cartesian product".into(),
        severity: "WARNING".into(),
        category: "PERFORMANCE".into(),
    }
}

impl Authenticator for Scripted {
    fn authenticate(&self, token: &AuthToken) -> Result<Principal, Status> {
        match (token.principal.as_deref(), token.credentials.as_deref()) {
            (Some("neo"), Some("secret")) => Ok(Principal { name: "neo".into() }),
            _ => Err(Status::unauthorized("wrong credentials")),
        }
    }
}

impl Executor for Scripted {
    fn begin(&self, _: &Principal, extra: &TransactionExtra) -> Result<TxHandle, Status> {
        if extra.db.as_deref() == Some("missing") {
            return Err(Status::new(code::DATABASE_NOT_FOUND, "no such database"));
        }
        Ok(TxHandle {
            id: self.next_tx.fetch_add(1, Ordering::SeqCst),
            database: extra.db.clone().unwrap_or_else(|| "neo4j".into()),
        })
    }

    fn run(
        &self,
        _: &Principal,
        tx: Option<&TxHandle>,
        run: &Run,
        interrupt: &Interrupt,
    ) -> Result<Box<dyn ResultStream>, Status> {
        if run.query == "FAIL" {
            return Err(Status::new(code::SYNTAX_ERROR, "invalid input"));
        }
        let rows = run.parameters.get("rows").and_then(Value::as_int).unwrap_or(1);
        let notifications = if run.query.contains("WARN") {
            vec![warning()]
        } else {
            Vec::new()
        };
        Ok(Box::new(Counting {
            fields: vec!["n".into()],
            next: 0,
            rows,
            interrupt: interrupt.clone(),
            summary: Summary {
                query_type: Some("r".into()),
                database: Some("neo4j".into()),
                bookmark: tx.is_none().then(|| "bm:auto".into()),
                notifications,
                ..Summary::default()
            },
        }))
    }

    fn commit(&self, tx: &TxHandle) -> Result<Option<String>, Status> {
        Ok(Some(format!("bm:{}", tx.id)))
    }

    fn rollback(&self, _: &TxHandle) -> Result<(), Status> {
        Ok(())
    }

    fn route(&self, _: &Principal, route: &Route) -> Result<Map, Status> {
        Ok(crate::map! { "ttl" => 10, "db" => route.db.clone() })
    }
}

struct Counting {
    fields: Vec<String>,
    next: i64,
    rows: i64,
    interrupt: Interrupt,
    summary: Summary,
}

impl ResultStream for Counting {
    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn next_record(&mut self) -> Result<Option<Vec<Value>>, Status> {
        self.interrupt.check()?;
        if self.next >= self.rows {
            return Ok(None);
        }
        self.next += 1;
        Ok(Some(vec![Value::Integer(self.next - 1)]))
    }

    fn summary(&self) -> Summary {
        self.summary.clone()
    }
}
