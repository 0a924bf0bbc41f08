//! JSON that can ride inside a single frame field.
//!
//! `|` and `*` never appear in JSON outside string literals, so escaping them
//! as `\u007c` and `\u002a` keeps the document valid and equal once parsed,
//! while guaranteeing it contains neither the separator nor the terminator.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

pub fn to_wire_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let json = serde_json::to_string(value)?;
    Ok(escape(&json))
}

pub fn from_wire_json<T: DeserializeOwned>(field: &str) -> Result<T> {
    Ok(serde_json::from_str(field)?)
}

fn escape(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        match c {
            '|' => out.push_str("\\u007c"),
            '*' => out.push_str("\\u002a"),
            c => out.push(c),
        }
    }
    out
}
