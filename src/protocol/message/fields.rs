//! Typed extraction of message fields.
//!
//! Extras arrive as maps; these helpers remove a key from such a map and
//! check its kind, turning a mismatch into a request validation error that
//! names the structure and the field.
use crate::packstream::{Map, PackError, Unpacker, Value};

fn mismatch(structure: &'static str, key: &str, expected: &str, found: &Value) -> PackError {
    PackError::illegal(
        structure,
        key,
        format!("expected {expected}, found {}", found.type_name()),
    )
}

pub(crate) fn optional_string(
    map: &mut Map,
    structure: &'static str,
    key: &str,
) -> Result<Option<String>, PackError> {
    match map.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(mismatch(structure, key, "String", &other)),
    }
}

pub(crate) fn required_string(
    map: &mut Map,
    structure: &'static str,
    key: &str,
) -> Result<String, PackError> {
    optional_string(map, structure, key)?
        .ok_or_else(|| PackError::illegal(structure, key, "required field is missing"))
}

pub(crate) fn optional_int(
    map: &mut Map,
    structure: &'static str,
    key: &str,
) -> Result<Option<i64>, PackError> {
    match map.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Integer(i)) => Ok(Some(i)),
        Some(other) => Err(mismatch(structure, key, "Integer", &other)),
    }
}

pub(crate) fn optional_map(
    map: &mut Map,
    structure: &'static str,
    key: &str,
) -> Result<Option<Map>, PackError> {
    match map.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Map(m)) => Ok(Some(m)),
        Some(other) => Err(mismatch(structure, key, "Map", &other)),
    }
}

pub(crate) fn optional_string_list(
    map: &mut Map,
    structure: &'static str,
    key: &str,
) -> Result<Option<Vec<String>>, PackError> {
    match map.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::List(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                other => Err(mismatch(structure, key, "List<String>", &other)),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        Some(other) => Err(mismatch(structure, key, "List<String>", &other)),
    }
}

/// Reads a top-level field that must be a map; null counts as empty.
pub(crate) fn read_map(
    unpacker: &mut Unpacker<'_>,
    structure: &'static str,
    field: &str,
) -> Result<Map, PackError> {
    match unpacker.unpack()? {
        Value::Map(m) => Ok(m),
        Value::Null => Ok(Map::new()),
        other => Err(mismatch(structure, field, "Map", &other)),
    }
}

pub(crate) fn read_string(
    unpacker: &mut Unpacker<'_>,
    structure: &'static str,
    field: &str,
) -> Result<String, PackError> {
    match unpacker.unpack()? {
        Value::String(s) => Ok(s),
        other => Err(mismatch(structure, field, "String", &other)),
    }
}

pub(crate) fn read_int(
    unpacker: &mut Unpacker<'_>,
    structure: &'static str,
    field: &str,
) -> Result<i64, PackError> {
    match unpacker.unpack()? {
        Value::Integer(i) => Ok(i),
        other => Err(mismatch(structure, field, "Integer", &other)),
    }
}

pub(crate) fn read_list(
    unpacker: &mut Unpacker<'_>,
    structure: &'static str,
    field: &str,
) -> Result<Vec<Value>, PackError> {
    match unpacker.unpack()? {
        Value::List(l) => Ok(l),
        Value::Null => Ok(Vec::new()),
        other => Err(mismatch(structure, field, "List", &other)),
    }
}

pub(crate) fn insert_opt<T: Into<Value>>(map: &mut Map, key: &str, value: Option<T>) {
    if let Some(value) = value {
        map.insert(key.to_string(), value.into());
    }
}

pub(crate) fn string_list(items: &[String]) -> Value {
    Value::List(items.iter().map(|s| Value::from(s.as_str())).collect())
}
