//! CLI utilities for boltd.
//!
//! The utilities present in this module can be used to build an interactive
//! client on top of [`Client`](crate::client::Client).
use std::io::{self, BufRead, Write};

use crate::packstream::Value;

/// Possible commands from a user.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// `.exit`, or end of input
    Exit,
    /// `.begin`
    Begin,
    /// `.commit`
    Commit,
    /// `.rollback`
    Rollback,
    /// `.reset`
    Reset,
    /// `.param <name> <value>` sets a parameter for the following queries
    Param(String, Value),
    /// Anything else is sent as a query
    Query(String),
}

/// Prompt user for a command.
///
/// Fails with `InvalidInput` on an unrecognized dot-command.
pub fn prompt<R, W>(mut reader: R, mut writer: W) -> io::Result<Command>
where
    R: BufRead,
    W: Write,
{
    let mut s = String::default();
    write!(&mut writer, "> ")?;
    writer.flush()?;

    if reader.read_line(&mut s)? == 0 {
        return Ok(Command::Exit);
    }

    match s.trim() {
        ".exit" => Ok(Command::Exit),
        ".begin" => Ok(Command::Begin),
        ".commit" => Ok(Command::Commit),
        ".rollback" => Ok(Command::Rollback),
        ".reset" => Ok(Command::Reset),
        s if s.starts_with(".param") => parse_param(&s[".param".len()..]),
        s if !s.starts_with('.') => Ok(Command::Query(s.to_string())),
        s => Err(invalid(format!("unrecognized command '{s}'"))),
    }
}

fn parse_param(rest: &str) -> io::Result<Command> {
    let mut parts = rest.trim().splitn(2, char::is_whitespace);
    let (Some(name), Some(value)) = (parts.next().filter(|n| !n.is_empty()), parts.next()) else {
        return Err(invalid("usage: .param <name> <value>"));
    };
    Ok(Command::Param(name.to_string(), parse_value(value.trim())))
}

/// Integers, floats, booleans and `null` are taken literally; anything else
/// is a string, with surrounding quotes removed.
fn parse_value(s: &str) -> Value {
    match s {
        "null" => Value::Null,
        "true" => Value::Boolean(true),
        "false" => Value::Boolean(false),
        s => s
            .parse::<i64>()
            .map(Value::Integer)
            .or_else(|_| s.parse::<f64>().map(Value::Float))
            .unwrap_or_else(|_| Value::String(s.trim_matches('"').to_string())),
    }
}

fn invalid(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, message.into())
}
