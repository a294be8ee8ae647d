//! SUCCESS metadata that changes shape between protocol versions.
//!
//! Transitions never build version-specific metadata themselves; they call the
//! [`MetadataHandler`] of the negotiated protocol.
use std::{fmt, time::Duration};

use crate::{
    backend::{Notification, Summary},
    packstream::{Map, Value},
};

pub trait MetadataHandler: fmt::Debug + Send + Sync {
    /// Whether HELLO advertises the telemetry hint.
    fn telemetry(&self) -> bool {
        false
    }

    fn on_hello(&self, meta: &mut Map, server_agent: &str, connection_id: &str) {
        meta.insert("server".into(), server_agent.into());
        meta.insert("connection_id".into(), connection_id.into());
        if self.telemetry() {
            meta.insert(
                "hints".into(),
                crate::map! { "telemetry.enabled" => true }.into(),
            );
        }
    }

    fn on_begin(&self, _meta: &mut Map, _database: &str) {}

    fn on_run(&self, meta: &mut Map, fields: &[String], qid: Option<i64>, t_first: Duration) {
        let fields = fields.iter().map(|f| Value::from(f.as_str())).collect::<Vec<_>>();
        meta.insert("fields".into(), fields.into());
        meta.insert("t_first".into(), millis(t_first));
        if let Some(qid) = qid {
            meta.insert("qid".into(), qid.into());
        }
    }

    /// Called once a result has been fully pulled or discarded.
    /// `notifications` are already filtered for the session.
    fn on_stream_done(
        &self,
        meta: &mut Map,
        summary: &Summary,
        notifications: &[Notification],
        t_last: Duration,
    ) {
        meta.insert("t_last".into(), millis(t_last));
        if let Some(query_type) = &summary.query_type {
            meta.insert("type".into(), query_type.as_str().into());
        }
        if let Some(db) = &summary.database {
            meta.insert("db".into(), db.as_str().into());
        }
        if let Some(bookmark) = &summary.bookmark {
            meta.insert("bookmark".into(), bookmark.as_str().into());
        }
        if !summary.stats.is_empty() {
            meta.insert("stats".into(), summary.stats.clone().into());
        }
        self.on_notifications(meta, notifications);
    }

    fn on_notifications(&self, meta: &mut Map, notifications: &[Notification]);
}

fn millis(d: Duration) -> Value {
    Value::Integer(i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

/// Notifications reported as a `notifications` list.
#[derive(Debug)]
pub struct NotificationMetadata {
    telemetry: bool,
}

pub static NOTIFICATIONS: NotificationMetadata = NotificationMetadata { telemetry: false };
pub static NOTIFICATIONS_WITH_TELEMETRY: NotificationMetadata =
    NotificationMetadata { telemetry: true };

impl MetadataHandler for NotificationMetadata {
    fn telemetry(&self) -> bool {
        self.telemetry
    }

    fn on_notifications(&self, meta: &mut Map, notifications: &[Notification]) {
        if notifications.is_empty() {
            return;
        }
        let list = notifications
            .iter()
            .map(|n| {
                Value::Map(crate::map! {
                    "code" => n.code.as_str(),
                    "title" => n.title.as_str(),
                    "description" => n.description.as_str(),
                    "severity" => n.severity.as_str(),
                    "category" => n.category.as_str(),
                })
            })
            .collect::<Vec<_>>();
        meta.insert("notifications".into(), list.into());
    }
}

/// GQL statuses reported as a `statuses` list. A result without notifications
/// still reports successful completion.
#[derive(Debug)]
pub struct StatusMetadata {
    home_database: bool,
}

pub static STATUSES: StatusMetadata = StatusMetadata {
    home_database: false,
};
pub static STATUSES_WITH_HOME_DATABASE: StatusMetadata = StatusMetadata {
    home_database: true,
};

const SUCCESSFUL_COMPLETION: &str = "00000";

impl MetadataHandler for StatusMetadata {
    fn telemetry(&self) -> bool {
        true
    }

    fn on_begin(&self, meta: &mut Map, database: &str) {
        if self.home_database {
            meta.insert("db".into(), database.into());
        }
    }

    fn on_notifications(&self, meta: &mut Map, notifications: &[Notification]) {
        let statuses = if notifications.is_empty() {
            vec![Value::Map(crate::map! {
                "gql_status" => SUCCESSFUL_COMPLETION,
                "status_description" => "note: successful completion",
            })]
        } else {
            notifications
                .iter()
                .map(|n| {
                    Value::Map(crate::map! {
                        "gql_status" => n.gql_status.as_str(),
                        "status_description" => n.description.as_str(),
                        "neo4j_code" => n.code.as_str(),
                        "title" => n.title.as_str(),
                        "diagnostic_record" => crate::map! {
                            "OPERATION" => "",
                            "OPERATION_CODE" => "0",
                            "CURRENT_SCHEMA" => "/",
                            "_severity" => n.severity.as_str(),
                            "_classification" => n.category.as_str(),
                        },
                    })
                })
                .collect()
        };
        meta.insert("statuses".into(), statuses.into());
    }
}
