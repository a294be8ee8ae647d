use crate::{
    packstream::{Map, PackError, Packer, Unpacker, Value},
    protocol::registry::{StructRule, Tagged},
    status::{Status, code},
};

use super::{
    fields::{optional_string, read_list, read_map},
    tag,
};

/// A server response. Every request gets exactly one summary (SUCCESS,
/// IGNORED or FAILURE), possibly preceded by RECORDs.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Success(Map),
    Record(Vec<Value>),
    Ignored,
    Failure(Status),
}

impl Response {
    pub fn success() -> Self {
        Response::Success(Map::new())
    }

    pub fn name(&self) -> &'static str {
        tag::name(self.tag())
    }
}

impl Tagged for Response {
    fn tag(&self) -> u8 {
        match self {
            Response::Success(_) => tag::SUCCESS,
            Response::Record(_) => tag::RECORD,
            Response::Ignored => tag::IGNORED,
            Response::Failure(_) => tag::FAILURE,
        }
    }
}

fn read_success(u: &mut Unpacker<'_>) -> Result<Response, PackError> {
    Ok(Response::Success(read_map(u, "SUCCESS", "metadata")?))
}

fn write_success(r: &Response, p: &mut Packer) -> Result<(), PackError> {
    let Response::Success(metadata) = r else {
        return Err(mismatched(r, "SUCCESS"));
    };
    p.pack_struct_header(tag::SUCCESS, 1)?;
    p.pack_map(metadata)
}

fn read_record(u: &mut Unpacker<'_>) -> Result<Response, PackError> {
    Ok(Response::Record(read_list(u, "RECORD", "data")?))
}

fn write_record(r: &Response, p: &mut Packer) -> Result<(), PackError> {
    let Response::Record(data) = r else {
        return Err(mismatched(r, "RECORD"));
    };
    p.pack_struct_header(tag::RECORD, 1)?;
    p.pack_list(data)
}

fn read_ignored(_: &mut Unpacker<'_>) -> Result<Response, PackError> {
    Ok(Response::Ignored)
}

fn write_ignored(_: &Response, p: &mut Packer) -> Result<(), PackError> {
    p.pack_struct_header(tag::IGNORED, 0)
}

fn read_failure(u: &mut Unpacker<'_>) -> Result<Response, PackError> {
    let mut map = read_map(u, "FAILURE", "metadata")?;
    let code = optional_string(&mut map, "FAILURE", "code")?
        .unwrap_or_else(|| code::UNKNOWN.0.to_string());
    let message = optional_string(&mut map, "FAILURE", "message")?.unwrap_or_default();
    Ok(Response::Failure(Status::from_code(&code, message)))
}

fn write_failure(r: &Response, p: &mut Packer) -> Result<(), PackError> {
    let Response::Failure(status) = r else {
        return Err(mismatched(r, "FAILURE"));
    };
    p.pack_struct_header(tag::FAILURE, 1)?;
    p.pack_map(&crate::map! {
        "code" => status.code.as_str(),
        "message" => status.message.as_str(),
    })
}

fn read_gql_failure(u: &mut Unpacker<'_>) -> Result<Response, PackError> {
    const S: &str = "FAILURE";
    let mut map = read_map(u, S, "metadata")?;
    let code = optional_string(&mut map, S, "neo4j_code")?
        .unwrap_or_else(|| code::UNKNOWN.0.to_string());
    let message = optional_string(&mut map, S, "message")?.unwrap_or_default();
    let mut status = Status::from_code(&code, message);
    if let Some(gql_status) = optional_string(&mut map, S, "gql_status")? {
        status.gql_status = gql_status;
    }
    Ok(Response::Failure(status))
}

fn write_gql_failure(r: &Response, p: &mut Packer) -> Result<(), PackError> {
    let Response::Failure(status) = r else {
        return Err(mismatched(r, "FAILURE"));
    };
    let diagnostic_record = crate::map! {
        "OPERATION" => "",
        "OPERATION_CODE" => "0",
        "CURRENT_SCHEMA" => "/",
        "_classification" => status.classification(),
    };
    p.pack_struct_header(tag::FAILURE, 1)?;
    p.pack_map(&crate::map! {
        "neo4j_code" => status.code.as_str(),
        "message" => status.message.as_str(),
        "gql_status" => status.gql_status.as_str(),
        "description" => format!("error: {}", status.message),
        "diagnostic_record" => diagnostic_record,
    })
}

fn mismatched(r: &Response, expected: &str) -> PackError {
    PackError::Malformed(format!("{} cannot be written as {expected}", r.name()))
}

pub const SUCCESS: StructRule<Response> = StructRule {
    tag: tag::SUCCESS,
    name: "SUCCESS",
    fields: 1,
    read: read_success,
    write: write_success,
};
pub const RECORD: StructRule<Response> = StructRule {
    tag: tag::RECORD,
    name: "RECORD",
    fields: 1,
    read: read_record,
    write: write_record,
};
pub const IGNORED: StructRule<Response> = StructRule {
    tag: tag::IGNORED,
    name: "IGNORED",
    fields: 0,
    read: read_ignored,
    write: write_ignored,
};
/// `{code, message}` failures.
pub const LEGACY_FAILURE: StructRule<Response> = StructRule {
    tag: tag::FAILURE,
    name: "FAILURE (legacy)",
    fields: 1,
    read: read_failure,
    write: write_failure,
};
/// Failures carrying GQL status and diagnostic record.
pub const GQL_FAILURE: StructRule<Response> = StructRule {
    tag: tag::FAILURE,
    name: "FAILURE (GQL)",
    fields: 1,
    read: read_gql_failure,
    write: write_gql_failure,
};
