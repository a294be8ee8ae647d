//! Every supported protocol version, each defined by what it changes.
//!
//! 5.0 is spelled out in full. Every later version starts from its predecessor
//! and lists only its deltas: rules unregistered and registered, transitions
//! added, replaced or removed, and a different metadata handler where the
//! shape of SUCCESS metadata changed.
use std::{collections::BTreeMap, sync::Arc};

use log::trace;
use thiserror::Error;

use crate::{
    fsm::{Action, State, StateMachineBuilder, StateMachineConfiguration, Transition, TransitionError},
    packstream::{PackError, Packer, Unpacker, Value},
};

use super::{
    handshake::{VersionOffer, negotiate},
    message::{Request, Response, request, response, tag, values},
    metadata::{self, MetadataHandler},
    registry::{RegistryError, StructRegistry, StructRegistryBuilder},
    version::ProtocolVersion,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("protocol {version}: {source}")]
    Registry {
        version: ProtocolVersion,
        source: RegistryError,
    },
    #[error("protocol {version}: {source}")]
    Transition {
        version: ProtocolVersion,
        source: TransitionError,
    },
    #[error("protocol {0} is defined twice")]
    DuplicateVersion(ProtocolVersion),
}

/// Everything that makes up one protocol version. Immutable once built and
/// shared by every connection that negotiated it.
pub struct BoltProtocol {
    version: ProtocolVersion,
    requests: StructRegistry<Request>,
    responses: StructRegistry<Response>,
    values: StructRegistry<Value>,
    state_machine: StateMachineConfiguration,
    metadata: &'static dyn MetadataHandler,
}

impl std::fmt::Debug for BoltProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoltProtocol")
            .field("version", &self.version)
            .field("requests", &self.requests.len())
            .field("responses", &self.responses.len())
            .field("transitions", &self.state_machine.len())
            .field("metadata", &self.metadata)
            .finish()
    }
}

impl BoltProtocol {
    /// Starts a version from scratch.
    pub fn builder(version: ProtocolVersion, metadata: &'static dyn MetadataHandler) -> ProtocolBuilder {
        ProtocolBuilder {
            version,
            metadata,
            requests: StructRegistry::builder(),
            responses: StructRegistry::builder(),
            values: StructRegistry::builder(),
            state_machine: StateMachineConfiguration::builder(),
        }
    }

    /// Starts `version` from everything this protocol defines.
    pub fn extend(&self, version: ProtocolVersion) -> ProtocolBuilder {
        ProtocolBuilder {
            version,
            metadata: self.metadata,
            requests: StructRegistry::builder().inherit_from(&self.requests),
            responses: StructRegistry::builder().inherit_from(&self.responses),
            values: StructRegistry::builder().inherit_from(&self.values),
            state_machine: StateMachineConfiguration::builder().inherit_from(&self.state_machine),
        }
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn requests(&self) -> &StructRegistry<Request> {
        &self.requests
    }

    pub fn responses(&self) -> &StructRegistry<Response> {
        &self.responses
    }

    pub fn values(&self) -> &StructRegistry<Value> {
        &self.values
    }

    pub fn state_machine(&self) -> &StateMachineConfiguration {
        &self.state_machine
    }

    pub fn metadata_handler(&self) -> &'static dyn MetadataHandler {
        self.metadata
    }

    /// Decodes one complete message frame into a request.
    pub fn decode_request(&self, frame: &[u8]) -> Result<Request, PackError> {
        let mut unpacker = Unpacker::with_structs(frame, &self.values);
        let request = self.requests.read(&mut unpacker)?;
        ensure_consumed(&unpacker, request.name())?;
        Ok(request)
    }

    pub fn encode_request(&self, request: &Request) -> Result<Vec<u8>, PackError> {
        let mut packer = Packer::new();
        self.requests.write(request, &mut packer)?;
        Ok(packer.into_inner().to_vec())
    }

    pub fn decode_response(&self, frame: &[u8]) -> Result<Response, PackError> {
        let mut unpacker = Unpacker::with_structs(frame, &self.values);
        let response = self.responses.read(&mut unpacker)?;
        ensure_consumed(&unpacker, response.name())?;
        Ok(response)
    }

    pub fn encode_response(&self, response: &Response) -> Result<Vec<u8>, PackError> {
        let mut packer = Packer::new();
        self.responses.write(response, &mut packer)?;
        Ok(packer.into_inner().to_vec())
    }
}

fn ensure_consumed(unpacker: &Unpacker<'_>, name: &str) -> Result<(), PackError> {
    if unpacker.is_empty() {
        return Ok(());
    }
    Err(PackError::Malformed(format!(
        "{} unexpected trailing bytes after {name}",
        unpacker.remaining()
    )))
}

/// Collects one version's deltas on top of an inherited protocol.
pub struct ProtocolBuilder {
    version: ProtocolVersion,
    metadata: &'static dyn MetadataHandler,
    requests: StructRegistryBuilder<Request>,
    responses: StructRegistryBuilder<Response>,
    values: StructRegistryBuilder<Value>,
    state_machine: StateMachineBuilder,
}

impl ProtocolBuilder {
    pub fn requests(
        mut self,
        deltas: impl FnOnce(StructRegistryBuilder<Request>) -> StructRegistryBuilder<Request>,
    ) -> Self {
        self.requests = deltas(self.requests);
        self
    }

    pub fn responses(
        mut self,
        deltas: impl FnOnce(StructRegistryBuilder<Response>) -> StructRegistryBuilder<Response>,
    ) -> Self {
        self.responses = deltas(self.responses);
        self
    }

    pub fn values(
        mut self,
        deltas: impl FnOnce(StructRegistryBuilder<Value>) -> StructRegistryBuilder<Value>,
    ) -> Self {
        self.values = deltas(self.values);
        self
    }

    pub fn state_machine(mut self, deltas: impl FnOnce(StateMachineBuilder) -> StateMachineBuilder) -> Self {
        self.state_machine = deltas(self.state_machine);
        self
    }

    pub fn metadata(mut self, handler: &'static dyn MetadataHandler) -> Self {
        self.metadata = handler;
        self
    }

    /// Applies all deltas. `Failed` and `Interrupted` then ignore every
    /// request the version knows that they have no transition for.
    pub fn build(self) -> Result<BoltProtocol, CatalogError> {
        let version = self.version;
        let registry = |source| CatalogError::Registry { version, source };
        let requests = self.requests.build().map_err(registry)?;
        let responses = self.responses.build().map_err(registry)?;
        let values = self.values.build().map_err(registry)?;
        let state_machine = self
            .state_machine
            .ignore_rest(State::Failed, requests.tags())
            .ignore_rest(State::Interrupted, requests.tags())
            .build()
            .map_err(|source| CatalogError::Transition { version, source })?;
        trace!(
            "built protocol {version}: {} requests, {} transitions",
            requests.len(),
            state_machine.len()
        );
        Ok(BoltProtocol {
            version,
            requests,
            responses,
            values,
            state_machine,
            metadata: self.metadata,
        })
    }
}

const fn on(tag: u8, action: Action, next: State) -> Transition {
    Transition::new(tag, action, next)
}

/// RESET and GOODBYE in every state a session can be reset from.
fn resettable(machine: StateMachineBuilder, states: &[State]) -> StateMachineBuilder {
    states.iter().fold(machine, |m, state| {
        m.with_state(*state, on(tag::RESET, Action::Reset, State::Ready))
            .with_state(*state, on(tag::GOODBYE, Action::Goodbye, State::Defunct))
    })
}

fn v5_0() -> Result<BoltProtocol, CatalogError> {
    use Action::*;
    use State::*;

    BoltProtocol::builder(ProtocolVersion::new(5, 0), &metadata::NOTIFICATIONS)
        .requests(|r| {
            r.register(request::HELLO_V50)
                .register(request::GOODBYE)
                .register(request::RESET)
                .register(request::RUN)
                .register(request::BEGIN)
                .register(request::COMMIT)
                .register(request::ROLLBACK)
                .register(request::DISCARD)
                .register(request::PULL)
                .register(request::ROUTE)
        })
        .responses(|r| {
            r.register(response::SUCCESS)
                .register(response::RECORD)
                .register(response::IGNORED)
                .register(response::LEGACY_FAILURE)
        })
        .values(|v| values::ALL.iter().fold(v, |v, rule| v.register(*rule)))
        .state_machine(|m| {
            let m = m
                .initial(Authentication)
                .with_state(Authentication, on(tag::HELLO, Hello { authenticate: true }, Ready))
                .with_state(Ready, on(tag::RUN, Run, Streaming))
                .with_state(Ready, on(tag::BEGIN, Begin, InTransaction))
                .with_state(Ready, on(tag::ROUTE, Route, Ready))
                .with_state(Streaming, on(tag::PULL, Pull, Ready))
                .with_state(Streaming, on(tag::DISCARD, Discard, Ready))
                .with_state(InTransaction, on(tag::RUN, Run, TxStreaming))
                .with_state(InTransaction, on(tag::COMMIT, Commit, Ready))
                .with_state(InTransaction, on(tag::ROLLBACK, Rollback, Ready))
                .with_state(TxStreaming, on(tag::RUN, Run, TxStreaming))
                .with_state(TxStreaming, on(tag::PULL, Pull, InTransaction))
                .with_state(TxStreaming, on(tag::DISCARD, Discard, InTransaction));
            resettable(
                m,
                &[
                    Authentication,
                    Ready,
                    Streaming,
                    InTransaction,
                    TxStreaming,
                    Failed,
                    Interrupted,
                ],
            )
        })
        .build()
}

/// Credentials move from HELLO to LOGON.
fn v5_1(base: &BoltProtocol) -> Result<BoltProtocol, CatalogError> {
    use Action::*;
    use State::*;

    base.extend(ProtocolVersion::new(5, 1))
        .requests(|r| {
            r.unregister(request::HELLO_V50)
                .register(request::HELLO_V51)
                .register(request::LOGON)
                .register(request::LOGOFF)
        })
        .state_machine(|m| {
            let m = m
                .initial(PreAuth)
                .without(Authentication, tag::HELLO)
                .with_state(PreAuth, on(tag::HELLO, Hello { authenticate: false }, Authentication))
                .with_state(Authentication, on(tag::LOGON, Logon, Ready))
                .with_state(Ready, on(tag::LOGOFF, Logoff, Authentication));
            resettable(m, &[PreAuth])
        })
        .build()
}

/// Notification filters in HELLO.
fn v5_2(base: &BoltProtocol) -> Result<BoltProtocol, CatalogError> {
    base.extend(ProtocolVersion::new(5, 2))
        .requests(|r| r.unregister(request::HELLO_V51).register(request::HELLO_V52))
        .build()
}

/// HELLO must identify the driver.
fn v5_3(base: &BoltProtocol) -> Result<BoltProtocol, CatalogError> {
    base.extend(ProtocolVersion::new(5, 3))
        .requests(|r| r.unregister(request::HELLO_V52).register(request::HELLO_V53))
        .build()
}

fn v5_4(base: &BoltProtocol) -> Result<BoltProtocol, CatalogError> {
    base.extend(ProtocolVersion::new(5, 4))
        .requests(|r| r.register(request::TELEMETRY))
        .state_machine(|m| {
            m.with_state(
                State::Ready,
                on(tag::TELEMETRY, Action::Telemetry, State::Ready),
            )
        })
        .metadata(&metadata::NOTIFICATIONS_WITH_TELEMETRY)
        .build()
}

/// Notification filters name classifications instead of categories.
fn v5_5(base: &BoltProtocol) -> Result<BoltProtocol, CatalogError> {
    base.extend(ProtocolVersion::new(5, 5))
        .requests(|r| r.unregister(request::HELLO_V53).register(request::HELLO_V55))
        .build()
}

fn v5_6(base: &BoltProtocol) -> Result<BoltProtocol, CatalogError> {
    base.extend(ProtocolVersion::new(5, 6))
        .metadata(&metadata::STATUSES)
        .build()
}

fn v5_7(base: &BoltProtocol) -> Result<BoltProtocol, CatalogError> {
    base.extend(ProtocolVersion::new(5, 7))
        .responses(|r| {
            r.unregister(response::LEGACY_FAILURE)
                .register(response::GQL_FAILURE)
        })
        .build()
}

fn v5_8(base: &BoltProtocol) -> Result<BoltProtocol, CatalogError> {
    base.extend(ProtocolVersion::new(5, 8))
        .metadata(&metadata::STATUSES_WITH_HOME_DATABASE)
        .build()
}

type Derive = fn(&BoltProtocol) -> Result<BoltProtocol, CatalogError>;

const DERIVED: [Derive; 8] = [v5_1, v5_2, v5_3, v5_4, v5_5, v5_6, v5_7, v5_8];

/// The versions this server speaks.
#[derive(Debug, Clone)]
pub struct Catalog {
    protocols: BTreeMap<ProtocolVersion, Arc<BoltProtocol>>,
}

impl Catalog {
    /// Builds 5.0 through 5.8. Any inconsistent delta fails the whole catalog.
    pub fn new() -> Result<Self, CatalogError> {
        let mut latest = v5_0()?;
        let mut protocols = Vec::with_capacity(DERIVED.len() + 1);
        for derive in DERIVED {
            let next = derive(&latest)?;
            protocols.push(std::mem::replace(&mut latest, next));
        }
        protocols.push(latest);
        Self::from_protocols(protocols)
    }

    pub fn from_protocols(
        protocols: impl IntoIterator<Item = BoltProtocol>,
    ) -> Result<Self, CatalogError> {
        let mut map = BTreeMap::new();
        for protocol in protocols {
            let version = protocol.version();
            if map.insert(version, Arc::new(protocol)).is_some() {
                return Err(CatalogError::DuplicateVersion(version));
            }
        }
        Ok(Self { protocols: map })
    }

    pub fn get(&self, version: ProtocolVersion) -> Option<&Arc<BoltProtocol>> {
        self.protocols.get(&version)
    }

    /// Ascending by version.
    pub fn all_versions(&self) -> impl Iterator<Item = (ProtocolVersion, &Arc<BoltProtocol>)> {
        self.protocols.iter().map(|(v, p)| (*v, p))
    }

    pub fn versions(&self) -> impl Iterator<Item = ProtocolVersion> + Clone + '_ {
        self.protocols.keys().copied()
    }

    pub fn negotiate(&self, offers: &[VersionOffer]) -> Option<&Arc<BoltProtocol>> {
        negotiate(self.versions(), offers).and_then(|v| self.get(v))
    }

    /// One offer per major version, each covering every supported minor.
    pub fn offers(&self) -> Vec<VersionOffer> {
        let mut by_major: BTreeMap<u8, (u8, u8)> = BTreeMap::new();
        for version in self.versions() {
            let entry = by_major
                .entry(version.major())
                .or_insert((version.minor(), version.minor()));
            entry.0 = entry.0.min(version.minor());
            entry.1 = entry.1.max(version.minor());
        }
        by_major
            .into_iter()
            .rev()
            .map(|(major, (lowest, highest))| {
                VersionOffer::range(ProtocolVersion::new(major, highest), highest - lowest)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::registry::StructRule;

    fn catalog() -> Catalog {
        Catalog::new().unwrap()
    }

    fn v(minor: u8) -> ProtocolVersion {
        ProtocolVersion::new(5, minor)
    }

    fn protocol(minor: u8) -> Arc<BoltProtocol> {
        catalog().get(v(minor)).unwrap().clone()
    }

    #[test]
    fn knows_5_0_through_5_8() {
        let versions = catalog().versions().collect::<Vec<_>>();
        assert_eq!(versions, (0..=8).map(v).collect::<Vec<_>>());
    }

    #[test]
    fn hello_rule_per_version() {
        let expected: [(u8, StructRule<Request>); 9] = [
            (0, request::HELLO_V50),
            (1, request::HELLO_V51),
            (2, request::HELLO_V52),
            (3, request::HELLO_V53),
            (4, request::HELLO_V53),
            (5, request::HELLO_V55),
            (6, request::HELLO_V55),
            (7, request::HELLO_V55),
            (8, request::HELLO_V55),
        ];
        let catalog = catalog();
        for (minor, rule) in expected {
            let protocol = catalog.get(v(minor)).unwrap();
            assert_eq!(protocol.requests().get(tag::HELLO), Some(&rule), "5.{minor}");
        }
    }

    #[test]
    fn deltas_leave_the_rest_untouched() {
        let catalog = catalog();
        let (v51, v52) = (catalog.get(v(1)).unwrap(), catalog.get(v(2)).unwrap());
        let changed = v51
            .requests()
            .rules()
            .filter(|rule| !v52.requests().contains(rule))
            .collect::<Vec<_>>();
        assert_eq!(changed, vec![&request::HELLO_V51]);
        assert_eq!(v51.requests().len(), v52.requests().len());
        assert_eq!(v51.responses().len(), v52.responses().len());
    }

    #[test]
    fn failure_encoding_changes_at_5_7() {
        assert!(protocol(6).responses().contains(&response::LEGACY_FAILURE));
        assert!(protocol(7).responses().contains(&response::GQL_FAILURE));
        assert!(!protocol(7).responses().contains(&response::LEGACY_FAILURE));
    }

    #[test]
    fn logon_appears_at_5_1() {
        assert!(protocol(0).requests().get(tag::LOGON).is_none());
        let v51 = protocol(1);
        assert!(v51.requests().get(tag::LOGON).is_some());
        assert!(v51.state_machine().transition(State::Authentication, tag::HELLO).is_none());
        assert_eq!(
            v51.state_machine()
                .transition(State::Authentication, tag::LOGON)
                .map(|t| t.next),
            Some(State::Ready)
        );
    }

    #[test]
    fn reset_is_registered_before_authentication() {
        for (version, protocol) in catalog().all_versions() {
            let config = protocol.state_machine();
            let mut states = vec![State::Authentication];
            if version.minor() > 0 {
                states.push(State::PreAuth);
            }
            for state in states {
                assert_eq!(
                    config.transition(state, tag::RESET).map(|t| t.action),
                    Some(Action::Reset),
                    "{version} {state}"
                );
            }
        }
    }

    #[test]
    fn failed_ignores_every_known_request_but_reset_and_goodbye() {
        for (version, protocol) in catalog().all_versions() {
            for tag in protocol.requests().tags() {
                let action = protocol
                    .state_machine()
                    .transition(State::Failed, tag)
                    .map(|t| t.action);
                let expected = match tag {
                    tag::RESET => Action::Reset,
                    tag::GOODBYE => Action::Goodbye,
                    _ => Action::Ignore,
                };
                assert_eq!(action, Some(expected), "{version} {tag:#04x}");
            }
        }
    }

    #[test]
    fn version_5_9_only_is_rejected() {
        let catalog = catalog();
        assert!(catalog.negotiate(&[VersionOffer::exact(v(9))]).is_none());
        assert!(catalog.negotiate(&[VersionOffer::exact(ProtocolVersion::new(4, 4))]).is_none());
    }

    #[test]
    fn negotiation_over_offer_permutations() {
        let catalog = catalog();
        let offers = [
            VersionOffer::exact(ProtocolVersion::new(4, 4)),
            VersionOffer::range(v(3), 3),
            VersionOffer::range(v(8), 2),
        ];
        // every ordering picks the first offer that overlaps, at its highest minor
        let permutations = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];
        for order in permutations {
            let ordered = order.map(|i| offers[i]);
            let expected = if ordered.iter().position(|o| *o == offers[1])
                < ordered.iter().position(|o| *o == offers[2])
            {
                v(3)
            } else {
                v(8)
            };
            let chosen = catalog.negotiate(&ordered).map(|p| p.version());
            assert_eq!(chosen, Some(expected), "{order:?}");
        }
    }

    #[test]
    fn default_offers_cover_every_version() {
        let catalog = catalog();
        assert_eq!(catalog.offers(), vec![VersionOffer::range(v(8), 8)]);
        for version in catalog.versions() {
            assert!(catalog.offers()[0].accepts(version));
        }
    }

    #[test]
    fn response_registry_rejects_unknown_tag() {
        let err = protocol(8).decode_response(&[0xB1, 0x01, 0xA0]).unwrap_err();
        assert_eq!(err, PackError::UnexpectedStruct { tag: 0x01, length: 1 });
    }

    #[test]
    fn trailing_bytes_are_malformed() {
        let err = protocol(8).decode_request(&[0xB0, tag::RESET, 0xC0]).unwrap_err();
        assert!(matches!(err, PackError::Malformed(_)));
    }

    #[test]
    fn unregistering_an_absent_rule_fails_the_version() {
        let base = protocol(0);
        let err = base
            .extend(v(1))
            .requests(|r| r.unregister(request::HELLO_V51))
            .build()
            .unwrap_err();
        assert!(matches!(err, CatalogError::Registry { .. }));
    }

    #[test]
    fn values_are_resolved_inside_requests() {
        let protocol = protocol(8);
        let run = Request::Run(crate::protocol::message::Run {
            query: "RETURN $d".into(),
            parameters: crate::map! {
                "d" => crate::packstream::Structure::new(0x44, vec![Value::Integer(19000)]),
            },
            ..Default::default()
        });
        let bytes = protocol.encode_request(&run).unwrap();
        assert_eq!(protocol.decode_request(&bytes).unwrap(), run);
    }
}
