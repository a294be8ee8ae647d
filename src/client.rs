//! Blocking Bolt client.
//!
//! Speaks whichever version the server picks from the local catalog and hides
//! the version differences a caller would otherwise see: 5.0 authenticates in
//! HELLO, later versions follow HELLO with LOGON.
use std::{
    io::{Read, Write},
    net::{TcpStream, ToSocketAddrs},
    sync::Arc,
};

use log::{debug, info};
use thiserror::Error;

use crate::{
    map,
    packstream::{Map, PackError, Value},
    protocol::{
        BoltProtocol, Catalog, CatalogError, ProtocolTransport, ProtocolVersion, TransportError,
        message::{AuthToken, Hello, Request, Response, Route, Run, StreamLimit, TransactionExtra},
    },
    status::Status,
};

const FIRST_WITH_LOGON: ProtocolVersion = ProtocolVersion::new(5, 1);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Pack(#[from] PackError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("the server supports none of the offered versions")]
    NoCommonVersion,
    #[error("the server chose version {0}, which was never offered")]
    UnsupportedVersion(ProtocolVersion),
    #[error("server failure: {0}")]
    Failure(Status),
    #[error("the request was ignored")]
    Ignored,
    #[error("unexpected {0} response")]
    Unexpected(&'static str),
    #[error("the server closed the connection")]
    Closed,
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::Transport(e.into())
    }
}

/// Everything one RUN + PULL produced.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryResult {
    pub fields: Vec<String>,
    pub records: Vec<Vec<Value>>,
    pub summary: Map,
}

pub struct Client<T: Read + Write> {
    transport: ProtocolTransport<T>,
    protocol: Arc<BoltProtocol>,
}

impl Client<TcpStream> {
    pub fn connect(address: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(address)?;
        stream.set_nodelay(true)?;
        Self::handshake(stream, &Catalog::new()?)
    }
}

impl<T: Read + Write> Client<T> {
    /// Offers every version in `catalog` and settles on the server's choice.
    pub fn handshake(stream: T, catalog: &Catalog) -> Result<Self, ClientError> {
        let mut transport = ProtocolTransport::new(stream);
        transport.write_preamble(&catalog.offers())?;
        let version = transport.read_choice()?.ok_or(ClientError::NoCommonVersion)?;
        let protocol = catalog
            .get(version)
            .cloned()
            .ok_or(ClientError::UnsupportedVersion(version))?;
        info!("negotiated protocol {version}");
        Ok(Self {
            transport,
            protocol,
        })
    }

    pub fn version(&self) -> ProtocolVersion {
        self.protocol.version()
    }

    pub fn send(&mut self, request: &Request) -> Result<(), ClientError> {
        debug!("C: {}", request.name());
        let frame = self.protocol.encode_request(request)?;
        self.transport.write_message(&frame)?;
        Ok(())
    }

    pub fn receive(&mut self) -> Result<Response, ClientError> {
        let frame = self.transport.read_message()?.ok_or(ClientError::Closed)?;
        let response = self.protocol.decode_response(&frame)?;
        debug!("S: {}", response.name());
        Ok(response)
    }

    /// Sends `request` and collects records up to its summary.
    pub fn request(&mut self, request: &Request) -> Result<(Vec<Vec<Value>>, Map), ClientError> {
        self.send(request)?;
        let mut records = Vec::new();
        loop {
            match self.receive()? {
                Response::Record(record) => records.push(record),
                Response::Success(metadata) => return Ok((records, metadata)),
                Response::Ignored => return Err(ClientError::Ignored),
                Response::Failure(status) => return Err(ClientError::Failure(status)),
            }
        }
    }

    fn summary(&mut self, request: &Request) -> Result<Map, ClientError> {
        match self.request(request)? {
            (records, metadata) if records.is_empty() => Ok(metadata),
            _ => Err(ClientError::Unexpected("RECORD")),
        }
    }

    /// Opens the session and authenticates. Returns the HELLO metadata.
    pub fn hello(&mut self, user_agent: &str, auth: AuthToken) -> Result<Map, ClientError> {
        let inline = self.version() < FIRST_WITH_LOGON;
        let hello = Request::Hello(Hello {
            user_agent: user_agent.to_string(),
            auth: inline.then(|| auth.clone()),
            bolt_agent: Some(map! { "product" => user_agent }),
            ..Hello::default()
        });
        let metadata = self.summary(&hello)?;
        if !inline {
            self.logon(auth)?;
        }
        Ok(metadata)
    }

    pub fn logon(&mut self, auth: AuthToken) -> Result<Map, ClientError> {
        self.summary(&Request::Logon(auth))
    }

    pub fn logoff(&mut self) -> Result<Map, ClientError> {
        self.summary(&Request::Logoff)
    }

    pub fn run(&mut self, query: &str, parameters: Map) -> Result<Map, ClientError> {
        self.run_with(query, parameters, TransactionExtra::default())
    }

    pub fn run_with(
        &mut self,
        query: &str,
        parameters: Map,
        extra: TransactionExtra,
    ) -> Result<Map, ClientError> {
        self.summary(&Request::Run(Run {
            query: query.to_string(),
            parameters,
            extra,
        }))
    }

    pub fn pull(&mut self, n: i64) -> Result<(Vec<Vec<Value>>, Map), ClientError> {
        self.request(&Request::Pull(StreamLimit { n, qid: -1 }))
    }

    pub fn discard(&mut self) -> Result<Map, ClientError> {
        self.summary(&Request::Discard(StreamLimit::ALL))
    }

    /// RUN followed by PULL of every record.
    pub fn query(&mut self, query: &str, parameters: Map) -> Result<QueryResult, ClientError> {
        let run = self.run(query, parameters)?;
        let fields = run
            .get("fields")
            .and_then(Value::as_list)
            .unwrap_or_default()
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
        let (records, summary) = self.pull(-1)?;
        Ok(QueryResult {
            fields,
            records,
            summary,
        })
    }

    pub fn begin(&mut self, extra: TransactionExtra) -> Result<Map, ClientError> {
        self.summary(&Request::Begin(extra))
    }

    pub fn commit(&mut self) -> Result<Map, ClientError> {
        self.summary(&Request::Commit)
    }

    pub fn rollback(&mut self) -> Result<Map, ClientError> {
        self.summary(&Request::Rollback)
    }

    pub fn reset(&mut self) -> Result<Map, ClientError> {
        self.summary(&Request::Reset)
    }

    pub fn route(&mut self, db: Option<&str>) -> Result<Map, ClientError> {
        self.summary(&Request::Route(Route {
            db: db.map(str::to_string),
            ..Route::default()
        }))
    }

    /// Ends the session. The server answers GOODBYE by closing the stream.
    pub fn goodbye(mut self) -> Result<T, ClientError> {
        self.send(&Request::Goodbye)?;
        Ok(self.transport.into_inner())
    }
}
