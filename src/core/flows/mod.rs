//! Concrete wizards built on [`WizardController`](crate::core::wizard::WizardController).
//!
//! Each flow declares its steps and the endpoint keys it expects in the host
//! page's `urls` table. The server performs the actual randomization and file
//! parsing; the flows only collect and check input.

pub mod import;
pub mod randomization;

use serde_json::Value;

use crate::core::wizard::Payload;

/// Entries of a list field, or nothing if the field is absent or not a list.
fn list<'a>(payload: &'a Payload, field: &str) -> &'a [Value] {
    payload
        .get(field)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Positive integer stored either as a number or a numeric string.
fn positive_int(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n.as_u64().filter(|n| *n > 0),
        Value::String(s) => s.trim().parse::<u64>().ok().filter(|n| *n > 0),
        _ => None,
    }
}
