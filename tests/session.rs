use std::{
    io::{Read, Write},
    net::{SocketAddr, TcpStream},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use boltd::{
    Client, Server, ServerConfig,
    backend::{Backend, memory::MemoryBackend},
    client::ClientError,
    map,
    packstream::{Map, Value},
    protocol::{
        Catalog, ProtocolVersion, VersionOffer,
        handshake::{MAGIC, encode_preamble},
        message::{AuthToken, TransactionExtra},
    },
    server::ShutdownHandle,
};

const AGENT: &str = "session-test/1.0";

fn config() -> ServerConfig {
    ServerConfig {
        address: "127.0.0.1:0".parse().unwrap(),
        workers: 4,
        users: vec![("neo".into(), "secret".into())],
        ..ServerConfig::default()
    }
}

fn start() -> (SocketAddr, ShutdownHandle) {
    let config = config();
    start_with(config.clone(), config.memory_backend())
}

fn start_with(config: ServerConfig, backend: Backend) -> (SocketAddr, ShutdownHandle) {
    let server = Server::new(config, backend).unwrap();
    let listener = server.bind().unwrap();
    let address = listener.local_addr().unwrap();
    let handle = server.shutdown_handle();
    thread::spawn(move || server.serve(listener));
    (address, handle)
}

fn client_for(address: SocketAddr, versions: &[ProtocolVersion]) -> Client<TcpStream> {
    let all = Catalog::new().unwrap();
    let offered = Catalog::from_protocols(
        all.all_versions()
            .filter(|(v, _)| versions.contains(v))
            .map(|(_, p)| p.extend(p.version()).build().unwrap()),
    )
    .unwrap();
    Client::handshake(TcpStream::connect(address).unwrap(), &offered).unwrap()
}

#[test]
fn auto_commit_query_over_tcp() {
    let (address, shutdown) = start();
    let mut client = Client::connect(address).unwrap();
    assert_eq!(client.version(), ProtocolVersion::new(5, 8));

    let hello = client.hello(AGENT, AuthToken::basic("neo", "secret")).unwrap();
    assert!(hello.get("server").and_then(Value::as_str).is_some_and(|s| s.starts_with("boltd/")));

    let result = client
        .query("RETURN $a, $b", map! { "a" => 1, "b" => "two" })
        .unwrap();
    assert_eq!(result.fields, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(result.records, vec![vec![Value::Integer(1), Value::from("two")]]);
    assert!(result.summary.get("bookmark").is_some());

    client.goodbye().unwrap();
    shutdown.shutdown();
}

#[test]
fn explicit_transaction_commits_with_bookmark() {
    let (address, shutdown) = start();
    let mut client = Client::connect(address).unwrap();
    client.hello(AGENT, AuthToken::basic("neo", "secret")).unwrap();

    client.begin(TransactionExtra::default()).unwrap();
    let result = client.query("RETURN $x", map! { "x" => 42 }).unwrap();
    assert_eq!(result.records, vec![vec![Value::Integer(42)]]);
    let commit = client.commit().unwrap();
    assert!(commit.get("bookmark").and_then(Value::as_str).is_some());
    shutdown.shutdown();
}

#[test]
fn failure_ignores_until_reset() {
    let (address, shutdown) = start();
    let mut client = Client::connect(address).unwrap();
    client.hello(AGENT, AuthToken::basic("neo", "secret")).unwrap();

    assert!(matches!(client.commit(), Err(ClientError::Failure(_))));
    assert!(matches!(client.run("RETURN 1", Map::new()), Err(ClientError::Ignored)));
    client.reset().unwrap();
    assert!(client.query("RETURN 1", Map::new()).is_ok());
    shutdown.shutdown();
}

#[test]
fn wrong_password_can_retry_logon() {
    let (address, shutdown) = start();
    let mut client = Client::connect(address).unwrap();
    let err = client.hello(AGENT, AuthToken::basic("neo", "nope")).unwrap_err();
    assert!(matches!(err, ClientError::Failure(status) if status.is_authentication_failure()));
    client.logon(AuthToken::basic("neo", "secret")).unwrap();
    assert!(client.route(None).unwrap().get("rt").is_some());
    shutdown.shutdown();
}

#[test]
fn version_5_0_authenticates_in_hello() {
    let (address, shutdown) = start();
    let mut client = client_for(address, &[ProtocolVersion::new(5, 0)]);
    assert_eq!(client.version(), ProtocolVersion::new(5, 0));
    client.hello(AGENT, AuthToken::basic("neo", "secret")).unwrap();
    assert!(client.query("RETURN 1", Map::new()).is_ok());
    shutdown.shutdown();
}

#[test]
fn unsupported_versions_are_rejected_with_zeroes() {
    let (address, shutdown) = start();
    let mut stream = TcpStream::connect(address).unwrap();
    let preamble = encode_preamble(&[VersionOffer::exact(ProtocolVersion::new(5, 9))]).unwrap();
    assert_eq!(&preamble[..4], &MAGIC.to_be_bytes());
    stream.write_all(&preamble).unwrap();

    let mut choice = [0xFFu8; 4];
    stream.read_exact(&mut choice).unwrap();
    assert_eq!(choice, [0, 0, 0, 0]);
    let mut rest = Vec::new();
    assert_eq!(stream.read_to_end(&mut rest).unwrap(), 0);
    shutdown.shutdown();
}

#[test]
fn dropped_client_rolls_back_its_transaction() {
    let memory = Arc::new(MemoryBackend::new("localhost:7687").with_user("neo", "secret"));
    let (address, shutdown) = start_with(config(), Backend::new(memory.clone(), memory.clone()));
    let mut client = Client::connect(address).unwrap();
    client.hello(AGENT, AuthToken::basic("neo", "secret")).unwrap();
    client.begin(TransactionExtra::default()).unwrap();
    assert_eq!(memory.open_transactions(), 1);
    drop(client);

    let deadline = Instant::now() + Duration::from_secs(5);
    while memory.open_transactions() > 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(memory.open_transactions(), 0);
    shutdown.shutdown();
}
