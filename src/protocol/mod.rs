//! Bolt session protocol.
//!
//! This module holds everything that varies between protocol versions:
//! message shapes, the structure registries that read and write them, the
//! transition table of the state machine and the metadata a session reports.
//! A [`BoltProtocol`] bundles these for one version and the [`Catalog`] holds
//! every supported version, each derived from its predecessor.
//!
//! # Key Components
//!
//! - [`handshake`]: the 20-byte preamble and version negotiation.
//! - [`ProtocolTransport`]: handshake bytes and chunked messages over any
//!   bidirectional stream (e.g. TCP).
//! - [`registry::StructRegistry`]: tag-indexed read/write rules.
//! - [`message`]: typed requests and responses.
//! - [`metadata::MetadataHandler`]: per-version SUCCESS metadata.
//!
//! # Binary Format
//!
//! After the handshake every message is one PackStream structure, split into
//! chunks:
//!
//! - Each chunk starts with a big-endian u16 size followed by that many bytes.
//! - A zero-sized chunk ends the message.
//! - A zero-sized chunk outside a message is a keep-alive.
//!
//! # See Also
//!
//! - [`fsm`](crate::fsm): the state machine driven by decoded requests.
//! - [`packstream`](crate::packstream): the value codec underneath.
pub mod catalog;
pub mod handshake;
pub mod message;
pub mod metadata;
pub mod registry;
pub mod transport;
pub mod version;

pub use catalog::{BoltProtocol, Catalog, CatalogError, ProtocolBuilder};
pub use handshake::{HandshakeError, VersionOffer};
pub use transport::{MessageFramer, ProtocolTransport, TransportError};
pub use version::ProtocolVersion;
