//! One negotiated connection: decode, process, encode.
use std::sync::Arc;

use crate::{
    backend::{Backend, Interrupt},
    fsm::{Session, State, StateMachine},
    packstream::PackError,
    protocol::{BoltProtocol, ProtocolVersion, message::Request},
};

pub use crate::protocol::message::Response;

/// Decodes frames with the negotiated version's request registry.
///
/// Meant for the reader side of a connection: a decoded RESET raises the
/// interrupt right away, before the request waits its turn in the queue.
#[derive(Clone)]
pub struct Decoder {
    protocol: Arc<BoltProtocol>,
    interrupt: Interrupt,
}

impl Decoder {
    pub fn decode(&self, frame: &[u8]) -> Result<Request, PackError> {
        let request = self.protocol.decode_request(frame);
        if let Ok(Request::Reset) = &request {
            self.interrupt.interrupt();
        }
        request
    }
}

pub struct Connection {
    protocol: Arc<BoltProtocol>,
    machine: StateMachine,
}

impl Connection {
    pub fn new(
        protocol: Arc<BoltProtocol>,
        backend: Backend,
        connection_id: impl Into<String>,
        server_agent: impl Into<String>,
    ) -> Self {
        let machine = StateMachine::new(
            Arc::clone(&protocol),
            backend,
            Session::new(connection_id),
            server_agent,
        );
        Self { protocol, machine }
    }

    pub fn decoder(&self) -> Decoder {
        Decoder {
            protocol: Arc::clone(&self.protocol),
            interrupt: self.machine.interrupt().clone(),
        }
    }

    pub fn version(&self) -> ProtocolVersion {
        self.protocol.version()
    }

    pub fn state(&self) -> State {
        self.machine.state()
    }

    pub fn session(&self) -> &Session {
        self.machine.session()
    }

    pub fn is_closed(&self) -> bool {
        self.machine.is_closed()
    }

    /// Tears the session down after the peer is gone.
    pub fn close(&mut self) {
        self.machine.close();
    }

    /// Answers one decoded (or undecodable) request.
    pub fn handle(&mut self, request: Result<Request, PackError>) -> Vec<Response> {
        match request {
            Ok(request) => self.machine.process(request),
            Err(error) => self.machine.reject(&error),
        }
    }

    pub fn encode(&self, responses: &[Response]) -> Result<Vec<Vec<u8>>, PackError> {
        responses
            .iter()
            .map(|response| self.protocol.encode_response(response))
            .collect()
    }

    /// Decodes, handles and encodes one frame on the calling thread.
    pub fn process_frame(&mut self, frame: &[u8]) -> Result<Vec<Vec<u8>>, PackError> {
        let request = self.decoder().decode(frame);
        let responses = self.handle(request);
        self.encode(&responses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::testing,
        map,
        packstream::{Packer, Value},
        protocol::{
            Catalog,
            message::{AuthToken, Hello, Run, StreamLimit, TransactionExtra},
        },
    };

    fn connection(minor: u8) -> Connection {
        let catalog = Catalog::new().unwrap();
        let protocol = catalog.get(ProtocolVersion::new(5, minor)).unwrap().clone();
        Connection::new(protocol, testing::backend(), "bolt-7", "boltd/test")
    }

    fn frame(connection: &Connection, request: &Request) -> Vec<u8> {
        connection.protocol.encode_request(request).unwrap()
    }

    fn decode(connection: &Connection, frames: Vec<Vec<u8>>) -> Vec<Response> {
        frames
            .iter()
            .map(|f| connection.protocol.decode_response(f).unwrap())
            .collect()
    }

    fn authenticated(minor: u8) -> Connection {
        let mut connection = connection(minor);
        let hello = Request::Hello(Hello {
            user_agent: "test/1.0".into(),
            bolt_agent: Some(map! { "product" => "test/1.0" }),
            ..Hello::default()
        });
        let logon = Request::Logon(AuthToken::basic("neo", "secret"));
        for request in [hello, logon] {
            let bytes = frame(&connection, &request);
            connection.process_frame(&bytes).unwrap();
        }
        assert_eq!(connection.state(), State::Ready);
        connection
    }

    #[test]
    fn frames_round_trip_through_the_machine() {
        let mut connection = authenticated(8);
        let run = Request::Run(Run {
            query: "RETURN $rows".into(),
            parameters: map! { "rows" => 2 },
            extra: TransactionExtra::default(),
        });
        let bytes = frame(&connection, &run);
        let frames = connection.process_frame(&bytes).unwrap();
        let responses = decode(&connection, frames);
        assert!(matches!(&responses[..], [Response::Success(_)]));
        assert_eq!(connection.state(), State::Streaming);

        let bytes = frame(&connection, &Request::Pull(StreamLimit::ALL));
        let frames = connection.process_frame(&bytes).unwrap();
        let responses = decode(&connection, frames);
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0], Response::Record(vec![Value::Integer(0)]));
        assert_eq!(connection.state(), State::Ready);
    }

    #[test]
    fn undecodable_frame_fails_the_session() {
        let mut connection = authenticated(8);
        let mut packer = Packer::new();
        packer.pack_struct_header(0x01, 1).unwrap();
        packer.pack_int(1);
        let frames = connection.process_frame(packer.as_slice()).unwrap();
        let responses = decode(&connection, frames);
        assert!(matches!(&responses[..], [Response::Failure(_)]));
        assert_eq!(connection.state(), State::Failed);
    }

    #[test]
    fn decoded_reset_raises_the_interrupt() {
        let connection = authenticated(4);
        let decoder = connection.decoder();
        let reset = frame(&connection, &Request::Reset);
        decoder.decode(&reset).unwrap();
        assert!(connection.machine.interrupt().is_interrupted());
    }

    #[test]
    fn queued_reset_recovers_a_failed_session() {
        let mut connection = authenticated(8);
        let commit = frame(&connection, &Request::Commit);
        let frames = connection.process_frame(&commit).unwrap();
        let responses = decode(&connection, frames);
        assert!(matches!(&responses[..], [Response::Failure(_)]));

        let reset = frame(&connection, &Request::Reset);
        let request = connection.decoder().decode(&reset);
        let responses = connection.handle(request);
        assert_eq!(responses, vec![Response::success()]);
        assert_eq!(connection.state(), State::Ready);
        assert!(!connection.machine.interrupt().is_interrupted());
    }

    #[test]
    fn close_without_goodbye_ends_the_session() {
        let mut connection = authenticated(8);
        let begin = frame(&connection, &Request::Begin(TransactionExtra::default()));
        connection.process_frame(&begin).unwrap();
        assert_eq!(connection.state(), State::InTransaction);

        connection.close();
        assert!(connection.is_closed());
        assert!(connection.session().transaction().is_none());
    }

    #[test]
    fn goodbye_closes_without_response() {
        let mut connection = authenticated(8);
        let goodbye = frame(&connection, &Request::Goodbye);
        assert!(connection.process_frame(&goodbye).unwrap().is_empty());
        assert!(connection.is_closed());
    }
}
