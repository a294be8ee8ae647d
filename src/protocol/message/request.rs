use std::fmt;

use crate::{
    packstream::{Map, PackError, Packer, Unpacker, Value},
    protocol::registry::{StructRule, Tagged},
};

use super::{
    fields::{
        insert_opt, optional_int, optional_map, optional_string, optional_string_list, read_int,
        read_list, read_map, read_string, required_string, string_list,
    },
    tag,
};

/// A decoded client request.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Hello(Hello),
    Logon(AuthToken),
    Logoff,
    Goodbye,
    Reset,
    Run(Run),
    Begin(TransactionExtra),
    Commit,
    Rollback,
    Pull(StreamLimit),
    Discard(StreamLimit),
    Route(Route),
    Telemetry(Telemetry),
}

impl Request {
    pub fn name(&self) -> &'static str {
        tag::name(self.tag())
    }
}

impl Tagged for Request {
    fn tag(&self) -> u8 {
        match self {
            Request::Hello(_) => tag::HELLO,
            Request::Logon(_) => tag::LOGON,
            Request::Logoff => tag::LOGOFF,
            Request::Goodbye => tag::GOODBYE,
            Request::Reset => tag::RESET,
            Request::Run(_) => tag::RUN,
            Request::Begin(_) => tag::BEGIN,
            Request::Commit => tag::COMMIT,
            Request::Rollback => tag::ROLLBACK,
            Request::Pull(_) => tag::PULL,
            Request::Discard(_) => tag::DISCARD,
            Request::Route(_) => tag::ROUTE,
            Request::Telemetry(_) => tag::TELEMETRY,
        }
    }
}

/// Credentials presented by the client. Never printed in full.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct AuthToken {
    pub scheme: String,
    pub principal: Option<String>,
    pub credentials: Option<String>,
    pub realm: Option<String>,
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("scheme", &self.scheme)
            .field("principal", &self.principal)
            .field("credentials", &self.credentials.as_ref().map(|_| "******"))
            .field("realm", &self.realm)
            .finish()
    }
}

impl AuthToken {
    pub fn basic(principal: &str, credentials: &str) -> Self {
        Self {
            scheme: "basic".into(),
            principal: Some(principal.into()),
            credentials: Some(credentials.into()),
            realm: None,
        }
    }

    pub fn none() -> Self {
        Self {
            scheme: "none".into(),
            ..Self::default()
        }
    }

    fn take_from(map: &mut Map, structure: &'static str) -> Result<Self, PackError> {
        Ok(Self {
            scheme: required_string(map, structure, "scheme")?,
            principal: optional_string(map, structure, "principal")?,
            credentials: optional_string(map, structure, "credentials")?,
            realm: optional_string(map, structure, "realm")?,
        })
    }

    fn put_into(&self, map: &mut Map) {
        map.insert("scheme".into(), self.scheme.as_str().into());
        insert_opt(map, "principal", self.principal.clone());
        insert_opt(map, "credentials", self.credentials.clone());
        insert_opt(map, "realm", self.realm.clone());
    }
}

pub const DISABLED_CATEGORIES: &str = "notifications_disabled_categories";
pub const DISABLED_CLASSIFICATIONS: &str = "notifications_disabled_classifications";
const MINIMUM_SEVERITY: &str = "notifications_minimum_severity";

/// Which notifications the client wants to receive.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NotificationConfig {
    pub minimum_severity: Option<String>,
    pub disabled: Option<Vec<String>>,
}

impl NotificationConfig {
    fn take_from(
        map: &mut Map,
        structure: &'static str,
        disabled_key: &str,
    ) -> Result<Self, PackError> {
        let minimum_severity = optional_string(map, structure, MINIMUM_SEVERITY)?;
        if let Some(severity) = &minimum_severity {
            if !matches!(severity.as_str(), "OFF" | "WARNING" | "INFORMATION") {
                return Err(PackError::illegal(
                    structure,
                    MINIMUM_SEVERITY,
                    format!("unknown severity '{severity}'"),
                ));
            }
        }
        Ok(Self {
            minimum_severity,
            disabled: optional_string_list(map, structure, disabled_key)?,
        })
    }

    /// Transaction extras accept either spelling of the disabled list.
    fn take_lenient(map: &mut Map, structure: &'static str) -> Result<Self, PackError> {
        let mut config = Self::take_from(map, structure, DISABLED_CATEGORIES)?;
        if config.disabled.is_none() {
            config.disabled = optional_string_list(map, structure, DISABLED_CLASSIFICATIONS)?;
        }
        Ok(config)
    }

    fn put_into(&self, map: &mut Map, disabled_key: &str) {
        insert_opt(map, MINIMUM_SEVERITY, self.minimum_severity.clone());
        if let Some(disabled) = &self.disabled {
            map.insert(disabled_key.into(), string_list(disabled));
        }
    }

    pub fn is_off(&self) -> bool {
        self.minimum_severity.as_deref() == Some("OFF")
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Hello {
    pub user_agent: String,
    /// Only carried by HELLO before LOGON existed.
    pub auth: Option<AuthToken>,
    pub routing: Option<Map>,
    pub bolt_agent: Option<Map>,
    pub notifications: NotificationConfig,
    /// Keys this server does not interpret.
    pub extra: Map,
}

struct HelloShape {
    inline_auth: bool,
    disabled_key: Option<&'static str>,
    bolt_agent: bool,
}

fn read_hello_shaped(u: &mut Unpacker<'_>, shape: &HelloShape) -> Result<Request, PackError> {
    const S: &str = "HELLO";
    let mut map = read_map(u, S, "extra")?;

    let auth = if shape.inline_auth {
        Some(AuthToken::take_from(&mut map, S)?)
    } else if map.contains_key("scheme") {
        return Err(PackError::illegal(
            S,
            "scheme",
            "credentials are sent with LOGON",
        ));
    } else {
        None
    };

    let notifications = match shape.disabled_key {
        Some(key) => NotificationConfig::take_from(&mut map, S, key)?,
        None => NotificationConfig::default(),
    };

    let bolt_agent = optional_map(&mut map, S, "bolt_agent")?;
    if shape.bolt_agent {
        match &bolt_agent {
            Some(agent) if agent.get("product").and_then(Value::as_str).is_some() => {}
            Some(_) => {
                return Err(PackError::illegal(S, "bolt_agent", "'product' must be a String"));
            }
            None => return Err(PackError::illegal(S, "bolt_agent", "required field is missing")),
        }
    }

    Ok(Request::Hello(Hello {
        user_agent: required_string(&mut map, S, "user_agent")?,
        routing: optional_map(&mut map, S, "routing")?,
        auth,
        bolt_agent,
        notifications,
        extra: map,
    }))
}

fn read_hello_v50(u: &mut Unpacker<'_>) -> Result<Request, PackError> {
    read_hello_shaped(
        u,
        &HelloShape {
            inline_auth: true,
            disabled_key: None,
            bolt_agent: false,
        },
    )
}

fn read_hello_v51(u: &mut Unpacker<'_>) -> Result<Request, PackError> {
    read_hello_shaped(
        u,
        &HelloShape {
            inline_auth: false,
            disabled_key: None,
            bolt_agent: false,
        },
    )
}

fn read_hello_v52(u: &mut Unpacker<'_>) -> Result<Request, PackError> {
    read_hello_shaped(
        u,
        &HelloShape {
            inline_auth: false,
            disabled_key: Some(DISABLED_CATEGORIES),
            bolt_agent: false,
        },
    )
}

fn read_hello_v53(u: &mut Unpacker<'_>) -> Result<Request, PackError> {
    read_hello_shaped(
        u,
        &HelloShape {
            inline_auth: false,
            disabled_key: Some(DISABLED_CATEGORIES),
            bolt_agent: true,
        },
    )
}

fn read_hello_v55(u: &mut Unpacker<'_>) -> Result<Request, PackError> {
    read_hello_shaped(
        u,
        &HelloShape {
            inline_auth: false,
            disabled_key: Some(DISABLED_CLASSIFICATIONS),
            bolt_agent: true,
        },
    )
}

fn hello_map(hello: &Hello, disabled_key: &str) -> Map {
    let mut map = hello.extra.clone();
    map.insert("user_agent".into(), hello.user_agent.as_str().into());
    if let Some(auth) = &hello.auth {
        auth.put_into(&mut map);
    }
    insert_opt(&mut map, "routing", hello.routing.clone());
    insert_opt(&mut map, "bolt_agent", hello.bolt_agent.clone());
    hello.notifications.put_into(&mut map, disabled_key);
    map
}

fn write_hello(r: &Request, p: &mut Packer) -> Result<(), PackError> {
    let Request::Hello(hello) = r else {
        return Err(mismatched(r, "HELLO"));
    };
    p.pack_struct_header(tag::HELLO, 1)?;
    p.pack_map(&hello_map(hello, DISABLED_CATEGORIES))
}

fn write_hello_v55(r: &Request, p: &mut Packer) -> Result<(), PackError> {
    let Request::Hello(hello) = r else {
        return Err(mismatched(r, "HELLO"));
    };
    p.pack_struct_header(tag::HELLO, 1)?;
    p.pack_map(&hello_map(hello, DISABLED_CLASSIFICATIONS))
}

fn read_logon(u: &mut Unpacker<'_>) -> Result<Request, PackError> {
    let mut map = read_map(u, "LOGON", "auth")?;
    Ok(Request::Logon(AuthToken::take_from(&mut map, "LOGON")?))
}

fn write_logon(r: &Request, p: &mut Packer) -> Result<(), PackError> {
    let Request::Logon(auth) = r else {
        return Err(mismatched(r, "LOGON"));
    };
    let mut map = Map::new();
    auth.put_into(&mut map);
    p.pack_struct_header(tag::LOGON, 1)?;
    p.pack_map(&map)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    Read,
    #[default]
    Write,
}

/// Options shared by BEGIN and auto-commit RUN.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransactionExtra {
    pub bookmarks: Vec<String>,
    pub tx_timeout: Option<i64>,
    pub tx_metadata: Option<Map>,
    pub mode: AccessMode,
    pub db: Option<String>,
    pub imp_user: Option<String>,
    pub notifications: NotificationConfig,
}

impl TransactionExtra {
    fn read(map: &mut Map, structure: &'static str) -> Result<Self, PackError> {
        let mode = match optional_string(map, structure, "mode")?.as_deref() {
            None | Some("w") => AccessMode::Write,
            Some("r") => AccessMode::Read,
            Some(other) => {
                return Err(PackError::illegal(
                    structure,
                    "mode",
                    format!("expected 'r' or 'w', found '{other}'"),
                ));
            }
        };
        let tx_timeout = optional_int(map, structure, "tx_timeout")?;
        if tx_timeout.is_some_and(|t| t < 0) {
            return Err(PackError::illegal(structure, "tx_timeout", "must not be negative"));
        }
        Ok(Self {
            bookmarks: optional_string_list(map, structure, "bookmarks")?.unwrap_or_default(),
            tx_timeout,
            tx_metadata: optional_map(map, structure, "tx_metadata")?,
            mode,
            db: optional_string(map, structure, "db")?,
            imp_user: optional_string(map, structure, "imp_user")?,
            notifications: NotificationConfig::take_lenient(map, structure)?,
        })
    }

    fn to_map(&self) -> Map {
        let mut map = Map::new();
        if !self.bookmarks.is_empty() {
            map.insert("bookmarks".into(), string_list(&self.bookmarks));
        }
        insert_opt(&mut map, "tx_timeout", self.tx_timeout);
        insert_opt(&mut map, "tx_metadata", self.tx_metadata.clone());
        if self.mode == AccessMode::Read {
            map.insert("mode".into(), "r".into());
        }
        insert_opt(&mut map, "db", self.db.clone());
        insert_opt(&mut map, "imp_user", self.imp_user.clone());
        self.notifications.put_into(&mut map, DISABLED_CATEGORIES);
        map
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Run {
    pub query: String,
    pub parameters: Map,
    pub extra: TransactionExtra,
}

fn read_run(u: &mut Unpacker<'_>) -> Result<Request, PackError> {
    let query = read_string(u, "RUN", "query")?;
    let parameters = read_map(u, "RUN", "parameters")?;
    let mut extra = read_map(u, "RUN", "extra")?;
    Ok(Request::Run(Run {
        query,
        parameters,
        extra: TransactionExtra::read(&mut extra, "RUN")?,
    }))
}

fn write_run(r: &Request, p: &mut Packer) -> Result<(), PackError> {
    let Request::Run(run) = r else {
        return Err(mismatched(r, "RUN"));
    };
    p.pack_struct_header(tag::RUN, 3)?;
    p.pack_string(&run.query)?;
    p.pack_map(&run.parameters)?;
    p.pack_map(&run.extra.to_map())
}

fn read_begin(u: &mut Unpacker<'_>) -> Result<Request, PackError> {
    let mut extra = read_map(u, "BEGIN", "extra")?;
    Ok(Request::Begin(TransactionExtra::read(&mut extra, "BEGIN")?))
}

fn write_begin(r: &Request, p: &mut Packer) -> Result<(), PackError> {
    let Request::Begin(extra) = r else {
        return Err(mismatched(r, "BEGIN"));
    };
    p.pack_struct_header(tag::BEGIN, 1)?;
    p.pack_map(&extra.to_map())
}

/// How many records a PULL or DISCARD covers and for which query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamLimit {
    /// `-1` means all remaining records.
    pub n: i64,
    /// `-1` means the most recent query.
    pub qid: i64,
}

impl StreamLimit {
    pub const ALL: StreamLimit = StreamLimit { n: -1, qid: -1 };

    pub fn all(&self) -> bool {
        self.n == -1
    }
}

fn read_stream_limit(u: &mut Unpacker<'_>, structure: &'static str) -> Result<StreamLimit, PackError> {
    let mut map = read_map(u, structure, "extra")?;
    let n = optional_int(&mut map, structure, "n")?
        .ok_or_else(|| PackError::illegal(structure, "n", "required field is missing"))?;
    if n == 0 || n < -1 {
        return Err(PackError::illegal(structure, "n", format!("expecting -1 or a positive number, found {n}")));
    }
    let qid = optional_int(&mut map, structure, "qid")?.unwrap_or(-1);
    if qid < -1 {
        return Err(PackError::illegal(structure, "qid", format!("invalid query id {qid}")));
    }
    Ok(StreamLimit { n, qid })
}

fn read_pull(u: &mut Unpacker<'_>) -> Result<Request, PackError> {
    read_stream_limit(u, "PULL").map(Request::Pull)
}

fn read_discard(u: &mut Unpacker<'_>) -> Result<Request, PackError> {
    read_stream_limit(u, "DISCARD").map(Request::Discard)
}

fn write_stream_limit(r: &Request, p: &mut Packer) -> Result<(), PackError> {
    let (Request::Pull(limit) | Request::Discard(limit)) = r else {
        return Err(mismatched(r, "PULL or DISCARD"));
    };
    let mut map = crate::map! { "n" => limit.n };
    if limit.qid != -1 {
        map.insert("qid".into(), limit.qid.into());
    }
    p.pack_struct_header(r.tag(), 1)?;
    p.pack_map(&map)
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Route {
    pub routing: Map,
    pub bookmarks: Vec<String>,
    pub db: Option<String>,
    pub imp_user: Option<String>,
}

fn read_route(u: &mut Unpacker<'_>) -> Result<Request, PackError> {
    const S: &str = "ROUTE";
    let routing = read_map(u, S, "routing")?;
    let bookmarks = read_list(u, S, "bookmarks")?
        .into_iter()
        .map(|b| {
            b.into_string()
                .ok_or_else(|| PackError::illegal(S, "bookmarks", "expected List<String>"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let mut extra = read_map(u, S, "extra")?;
    Ok(Request::Route(Route {
        routing,
        bookmarks,
        db: optional_string(&mut extra, S, "db")?,
        imp_user: optional_string(&mut extra, S, "imp_user")?,
    }))
}

fn write_route(r: &Request, p: &mut Packer) -> Result<(), PackError> {
    let Request::Route(route) = r else {
        return Err(mismatched(r, "ROUTE"));
    };
    let mut extra = Map::new();
    insert_opt(&mut extra, "db", route.db.clone());
    insert_opt(&mut extra, "imp_user", route.imp_user.clone());
    p.pack_struct_header(tag::ROUTE, 3)?;
    p.pack_map(&route.routing)?;
    p.pack(&string_list(&route.bookmarks))?;
    p.pack_map(&extra)
}

/// Driver API usage report; values 0 to 3 name the API family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Telemetry {
    pub api: i64,
}

fn read_telemetry(u: &mut Unpacker<'_>) -> Result<Request, PackError> {
    let api = read_int(u, "TELEMETRY", "api")?;
    if !(0..=3).contains(&api) {
        return Err(PackError::illegal("TELEMETRY", "api", format!("unknown api {api}")));
    }
    Ok(Request::Telemetry(Telemetry { api }))
}

fn write_telemetry(r: &Request, p: &mut Packer) -> Result<(), PackError> {
    let Request::Telemetry(t) = r else {
        return Err(mismatched(r, "TELEMETRY"));
    };
    p.pack_struct_header(tag::TELEMETRY, 1)?;
    p.pack_int(t.api);
    Ok(())
}

fn read_goodbye(_: &mut Unpacker<'_>) -> Result<Request, PackError> {
    Ok(Request::Goodbye)
}

fn read_reset(_: &mut Unpacker<'_>) -> Result<Request, PackError> {
    Ok(Request::Reset)
}

fn read_commit(_: &mut Unpacker<'_>) -> Result<Request, PackError> {
    Ok(Request::Commit)
}

fn read_rollback(_: &mut Unpacker<'_>) -> Result<Request, PackError> {
    Ok(Request::Rollback)
}

fn read_logoff(_: &mut Unpacker<'_>) -> Result<Request, PackError> {
    Ok(Request::Logoff)
}

fn write_empty(r: &Request, p: &mut Packer) -> Result<(), PackError> {
    p.pack_struct_header(r.tag(), 0)
}

fn mismatched(r: &Request, expected: &str) -> PackError {
    PackError::Malformed(format!("{} cannot be written as {expected}", r.name()))
}

pub const HELLO_V50: StructRule<Request> = StructRule {
    tag: tag::HELLO,
    name: "HELLO (inline auth)",
    fields: 1,
    read: read_hello_v50,
    write: write_hello,
};
pub const HELLO_V51: StructRule<Request> = StructRule {
    tag: tag::HELLO,
    name: "HELLO",
    fields: 1,
    read: read_hello_v51,
    write: write_hello,
};
pub const HELLO_V52: StructRule<Request> = StructRule {
    tag: tag::HELLO,
    name: "HELLO (notification filters)",
    fields: 1,
    read: read_hello_v52,
    write: write_hello,
};
pub const HELLO_V53: StructRule<Request> = StructRule {
    tag: tag::HELLO,
    name: "HELLO (bolt agent)",
    fields: 1,
    read: read_hello_v53,
    write: write_hello,
};
pub const HELLO_V55: StructRule<Request> = StructRule {
    tag: tag::HELLO,
    name: "HELLO (notification classifications)",
    fields: 1,
    read: read_hello_v55,
    write: write_hello_v55,
};
pub const LOGON: StructRule<Request> = StructRule {
    tag: tag::LOGON,
    name: "LOGON",
    fields: 1,
    read: read_logon,
    write: write_logon,
};
pub const LOGOFF: StructRule<Request> = StructRule {
    tag: tag::LOGOFF,
    name: "LOGOFF",
    fields: 0,
    read: read_logoff,
    write: write_empty,
};
pub const GOODBYE: StructRule<Request> = StructRule {
    tag: tag::GOODBYE,
    name: "GOODBYE",
    fields: 0,
    read: read_goodbye,
    write: write_empty,
};
pub const RESET: StructRule<Request> = StructRule {
    tag: tag::RESET,
    name: "RESET",
    fields: 0,
    read: read_reset,
    write: write_empty,
};
pub const RUN: StructRule<Request> = StructRule {
    tag: tag::RUN,
    name: "RUN",
    fields: 3,
    read: read_run,
    write: write_run,
};
pub const BEGIN: StructRule<Request> = StructRule {
    tag: tag::BEGIN,
    name: "BEGIN",
    fields: 1,
    read: read_begin,
    write: write_begin,
};
pub const COMMIT: StructRule<Request> = StructRule {
    tag: tag::COMMIT,
    name: "COMMIT",
    fields: 0,
    read: read_commit,
    write: write_empty,
};
pub const ROLLBACK: StructRule<Request> = StructRule {
    tag: tag::ROLLBACK,
    name: "ROLLBACK",
    fields: 0,
    read: read_rollback,
    write: write_empty,
};
pub const PULL: StructRule<Request> = StructRule {
    tag: tag::PULL,
    name: "PULL",
    fields: 1,
    read: read_pull,
    write: write_stream_limit,
};
pub const DISCARD: StructRule<Request> = StructRule {
    tag: tag::DISCARD,
    name: "DISCARD",
    fields: 1,
    read: read_discard,
    write: write_stream_limit,
};
pub const ROUTE: StructRule<Request> = StructRule {
    tag: tag::ROUTE,
    name: "ROUTE",
    fields: 3,
    read: read_route,
    write: write_route,
};
pub const TELEMETRY: StructRule<Request> = StructRule {
    tag: tag::TELEMETRY,
    name: "TELEMETRY",
    fields: 1,
    read: read_telemetry,
    write: write_telemetry,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::registry::StructRegistry;

    fn registry(rules: &[StructRule<Request>]) -> StructRegistry<Request> {
        rules
            .iter()
            .fold(StructRegistry::builder(), |b, rule| b.register(*rule))
            .build()
            .unwrap()
    }

    fn encode(registry: &StructRegistry<Request>, request: &Request) -> Vec<u8> {
        let mut packer = Packer::new();
        registry.write(request, &mut packer).unwrap();
        packer.into_inner().to_vec()
    }

    fn decode(registry: &StructRegistry<Request>, bytes: &[u8]) -> Result<Request, PackError> {
        registry.read(&mut Unpacker::new(bytes))
    }

    fn hello_bytes(extra: Map) -> Vec<u8> {
        let mut packer = Packer::new();
        packer.pack_struct_header(tag::HELLO, 1).unwrap();
        packer.pack_map(&extra).unwrap();
        packer.into_inner().to_vec()
    }

    #[test]
    fn hello_v50_carries_credentials() {
        let registry = registry(&[HELLO_V50]);
        let bytes = hello_bytes(crate::map! {
            "user_agent" => "test/1.0",
            "scheme" => "basic",
            "principal" => "neo",
            "credentials" => "secret",
            "patch_bolt" => Value::List(vec![]),
        });
        let Request::Hello(hello) = decode(&registry, &bytes).unwrap() else {
            panic!("expected HELLO");
        };
        assert_eq!(hello.auth, Some(AuthToken::basic("neo", "secret")));
        assert_eq!(hello.user_agent, "test/1.0");
        assert!(hello.extra.contains_key("patch_bolt"));
    }

    #[test]
    fn hello_v51_rejects_credentials() {
        let registry = registry(&[HELLO_V51]);
        let bytes = hello_bytes(crate::map! { "user_agent" => "x", "scheme" => "basic" });
        let err = decode(&registry, &bytes).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn hello_requires_user_agent() {
        let registry = registry(&[HELLO_V51]);
        let err = decode(&registry, &hello_bytes(Map::new())).unwrap_err();
        assert_eq!(
            err,
            PackError::illegal("HELLO", "user_agent", "required field is missing")
        );
    }

    #[test]
    fn hello_v53_requires_bolt_agent_product() {
        let registry = registry(&[HELLO_V53]);
        let missing = hello_bytes(crate::map! { "user_agent" => "x" });
        assert!(decode(&registry, &missing).unwrap_err().is_validation());

        let ok = hello_bytes(crate::map! {
            "user_agent" => "x",
            "bolt_agent" => crate::map! { "product" => "driver/5" },
        });
        assert!(decode(&registry, &ok).is_ok());
    }

    #[test]
    fn hello_v55_reads_classifications() {
        let registry = registry(&[HELLO_V55]);
        let hello = Hello {
            user_agent: "x".into(),
            bolt_agent: Some(crate::map! { "product" => "p" }),
            notifications: NotificationConfig {
                minimum_severity: Some("WARNING".into()),
                disabled: Some(vec!["HINT".into()]),
            },
            ..Hello::default()
        };
        let request = Request::Hello(hello);
        let bytes = encode(&registry, &request);
        assert_eq!(decode(&registry, &bytes).unwrap(), request);
    }

    #[test]
    fn run_round_trips_with_extras() {
        let registry = registry(&[RUN]);
        let request = Request::Run(Run {
            query: "RETURN $x".into(),
            parameters: crate::map! { "x" => 1 },
            extra: TransactionExtra {
                bookmarks: vec!["bm:1".into()],
                tx_timeout: Some(500),
                mode: AccessMode::Read,
                db: Some("neo4j".into()),
                ..TransactionExtra::default()
            },
        });
        let bytes = encode(&registry, &request);
        assert_eq!(decode(&registry, &bytes).unwrap(), request);
    }

    #[test]
    fn run_with_non_string_query_is_invalid() {
        let registry = registry(&[RUN]);
        let err = decode(&registry, &[0xB3, tag::RUN, 0x01, 0xA0, 0xA0]).unwrap_err();
        assert_eq!(
            err,
            PackError::illegal("RUN", "query", "expected String, found Integer")
        );
    }

    #[test]
    fn begin_rejects_unknown_mode() {
        let registry = registry(&[BEGIN]);
        let mut packer = Packer::new();
        packer.pack_struct_header(tag::BEGIN, 1).unwrap();
        packer.pack_map(&crate::map! { "mode" => "x" }).unwrap();
        assert!(decode(&registry, packer.as_slice()).unwrap_err().is_validation());
    }

    #[test]
    fn pull_requires_positive_or_all() {
        let registry = registry(&[PULL]);
        let mut packer = Packer::new();
        packer.pack_struct_header(tag::PULL, 1).unwrap();
        packer.pack_map(&crate::map! { "n" => 0 }).unwrap();
        assert!(decode(&registry, packer.as_slice()).unwrap_err().is_validation());

        let bytes = encode(&registry, &Request::Pull(StreamLimit { n: 100, qid: 2 }));
        assert_eq!(
            decode(&registry, &bytes).unwrap(),
            Request::Pull(StreamLimit { n: 100, qid: 2 })
        );
    }

    #[test]
    fn route_round_trips() {
        let registry = registry(&[ROUTE]);
        let request = Request::Route(Route {
            routing: crate::map! { "address" => "localhost:7687" },
            bookmarks: vec!["a".into()],
            db: Some("system".into()),
            imp_user: None,
        });
        let bytes = encode(&registry, &request);
        assert_eq!(decode(&registry, &bytes).unwrap(), request);
    }

    #[test]
    fn empty_messages_are_bare_headers() {
        let registry = registry(&[RESET, GOODBYE, COMMIT]);
        assert_eq!(encode(&registry, &Request::Reset), vec![0xB0, 0x0F]);
        assert_eq!(decode(&registry, &[0xB0, 0x12]).unwrap(), Request::Commit);
    }

    #[test]
    fn credentials_are_masked_in_debug() {
        let printed = format!("{:?}", AuthToken::basic("neo", "secret"));
        assert!(!printed.contains("secret"));
        assert!(printed.contains("neo"));
    }

    #[test]
    fn telemetry_api_range() {
        let registry = registry(&[TELEMETRY]);
        assert!(decode(&registry, &[0xB1, tag::TELEMETRY, 0x09]).unwrap_err().is_validation());
        assert_eq!(
            decode(&registry, &[0xB1, tag::TELEMETRY, 0x02]).unwrap(),
            Request::Telemetry(Telemetry { api: 2 })
        );
    }
}
