use std::{
    error::Error,
    io::{self, ErrorKind},
};

use boltd::{
    Command,
    client::{Client, ClientError, QueryResult},
    packstream::{Map, Value},
    prompt,
    protocol::message::{AuthToken, TransactionExtra},
};
use clap::Parser;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Server address
    #[arg(long, env = "BOLTC_ADDRESS", default_value = "127.0.0.1:7687")]
    address: String,
    /// User name for basic authentication; connects anonymously when absent
    #[arg(long, short, env = "BOLTC_USER")]
    user: Option<String>,
    #[arg(long, short, env = "BOLTC_PASSWORD", default_value = "")]
    password: String,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let mut client = Client::connect(&cli.address)?;
    let auth = match &cli.user {
        Some(user) => AuthToken::basic(user, &cli.password),
        None => AuthToken::none(),
    };
    let hello = client.hello(concat!("boltc/", env!("CARGO_PKG_VERSION")), auth)?;
    println!(
        "connected to {} over Bolt {}",
        hello.get("server").and_then(Value::as_str).unwrap_or("unknown server"),
        client.version()
    );

    let stdin = io::stdin();
    let mut parameters = Map::new();
    loop {
        let cmd = match prompt(stdin.lock(), io::stdout()) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::InvalidInput => {
                eprintln!("{e}");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let outcome = match cmd {
            Command::Exit => break,
            Command::Begin => client.begin(TransactionExtra::default()).map(drop),
            Command::Commit => client.commit().map(|metadata| {
                if let Some(bookmark) = metadata.get("bookmark").and_then(Value::as_str) {
                    println!("committed, bookmark {bookmark}");
                }
            }),
            Command::Rollback => client.rollback().map(drop),
            Command::Reset => client.reset().map(drop),
            Command::Param(name, value) => {
                parameters.insert(name, value);
                Ok(())
            }
            Command::Query(query) if query.is_empty() => Ok(()),
            Command::Query(query) => client
                .query(&query, parameters.clone())
                .map(|result| print_result(&result)),
        };

        match outcome {
            Ok(()) => {}
            // The session stays failed until it is reset.
            Err(e @ (ClientError::Failure(_) | ClientError::Ignored)) => {
                eprintln!("error: {e}");
                client.reset()?;
            }
            Err(e) => return Err(e.into()),
        }
    }

    client.goodbye()?;
    Ok(())
}

fn print_result(result: &QueryResult) {
    if !result.fields.is_empty() {
        println!("{}", result.fields.join(" | "));
    }
    for record in &result.records {
        let row = record
            .iter()
            .map(|value| format!("{value:?}"))
            .collect::<Vec<_>>();
        println!("{}", row.join(" | "));
    }
    println!("({} records)", result.records.len());
}
