//! TCP front end.
//!
//! The accept loop runs on the calling thread and hands every connection to
//! a [`ThreadPool`] worker. Inside a connection a scoped reader thread
//! reassembles and decodes frames while the worker answers them strictly in
//! order, so a RESET can raise the interrupt while earlier work still runs.
mod pool;

use std::{
    io,
    net::{Shutdown, SocketAddr, TcpListener, TcpStream},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc,
    },
    thread,
    time::Duration,
};

use log::{debug, info, warn};
use thiserror::Error;

use crate::{
    backend::Backend,
    config::ServerConfig,
    connection::Connection,
    packstream::PackError,
    protocol::{Catalog, CatalogError, ProtocolTransport, TransportError, message::Request},
};

pub use pool::{PoolClosed, ThreadPool};

const ACCEPT_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to build the protocol catalog: {0}")]
    Catalog(#[from] CatalogError),
    #[error("at least one worker is required")]
    NoWorkers,
    #[error(transparent)]
    Pool(#[from] PoolClosed),
    #[error("Server IO Error: {0}")]
    Io(#[from] io::Error),
}

/// Stops a running accept loop from another thread.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    stop: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

pub struct Server {
    config: Arc<ServerConfig>,
    catalog: Arc<Catalog>,
    backend: Backend,
    pool: ThreadPool,
    shutdown: ShutdownHandle,
    connections: AtomicU64,
}

impl Server {
    pub fn new(config: ServerConfig, backend: Backend) -> Result<Self, ServerError> {
        if config.workers == 0 {
            return Err(ServerError::NoWorkers);
        }
        let catalog = Catalog::new()?;
        Ok(Self {
            pool: ThreadPool::new(config.workers),
            config: Arc::new(config),
            catalog: Arc::new(catalog),
            backend,
            shutdown: ShutdownHandle::default(),
            connections: AtomicU64::new(0),
        })
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn bind(&self) -> Result<TcpListener, ServerError> {
        Ok(TcpListener::bind(self.config.address)?)
    }

    /// Accepts connections until the shutdown handle fires.
    pub fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        listener.set_nonblocking(true)?;
        info!("listening at {}", listener.local_addr()?);

        while !self.shutdown.is_shutdown() {
            match listener.accept() {
                Ok((stream, peer)) => self.dispatch(stream, peer)?,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(e) => warn!("broken connection: {e:?}"),
            }
        }
        info!("shutting down");
        Ok(())
    }

    pub fn listen(self) -> Result<(), ServerError> {
        let listener = self.bind()?;
        self.serve(listener)
    }

    fn dispatch(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), ServerError> {
        stream.set_nonblocking(false)?;
        let id = format!("bolt-{}", self.connections.fetch_add(1, Ordering::SeqCst));
        info!("{id}: accepted connection from {peer}");

        let config = Arc::clone(&self.config);
        let catalog = Arc::clone(&self.catalog);
        let backend = self.backend.clone();
        self.pool.execute(move || {
            match handle_connection(stream, &config, &catalog, backend, &id) {
                Ok(()) => info!("{id}: connection closed"),
                Err(e) => warn!("{id}: dropped connection from {peer}: {e}"),
            }
        })?;
        Ok(())
    }
}

fn handle_connection(
    stream: TcpStream,
    config: &ServerConfig,
    catalog: &Catalog,
    backend: Backend,
    id: &str,
) -> Result<(), TransportError> {
    let control = stream.try_clone()?;
    let mut reader =
        ProtocolTransport::with_limits(stream, config.max_chunk_size, config.max_message_size);

    let offers = reader.read_preamble()?;
    let Some(protocol) = catalog.negotiate(&offers).cloned() else {
        info!("{id}: no common protocol version in {offers:?}");
        reader.write_choice(None)?;
        control.shutdown(Shutdown::Both)?;
        return Ok(());
    };
    reader.write_choice(Some(protocol.version()))?;
    info!("{id}: negotiated protocol {}", protocol.version());

    let mut writer = ProtocolTransport::with_limits(
        control.try_clone()?,
        config.max_chunk_size,
        config.max_message_size,
    );
    let mut connection = Connection::new(protocol, backend, id, config.server_agent.as_str());
    let decoder = connection.decoder();

    let (sender, receiver) = mpsc::channel();
    thread::scope(|scope| {
        scope.spawn(move || {
            loop {
                match reader.read_message() {
                    Ok(Some(frame)) => {
                        if sender.send(decoder.decode(&frame)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("{id}: peer closed the stream");
                        break;
                    }
                    Err(e) => {
                        warn!("{id}: read failed: {e}");
                        break;
                    }
                }
            }
        });

        let result = answer(&mut connection, &mut writer, receiver);
        connection.close();
        // Unblocks the reader when the session ended first.
        let _ = control.shutdown(Shutdown::Both);
        result
    })
}

fn answer(
    connection: &mut Connection,
    writer: &mut ProtocolTransport<TcpStream>,
    requests: mpsc::Receiver<Result<Request, PackError>>,
) -> Result<(), TransportError> {
    for request in requests {
        let responses = connection.handle(request);
        let frames = connection.encode(&responses)?;
        writer.write_messages(frames.iter().map(Vec::as_slice))?;
        if connection.is_closed() {
            break;
        }
    }
    Ok(())
}
