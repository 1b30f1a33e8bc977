//! Reading optional fields out of ticket PATCH bodies.
//!
//! A settings update has to tell apart a field the client left out (keep the
//! stored value) from an explicit `null` (clear it, e.g. `second_category_id`
//! or `deadline`).

use serde_json::Value;

#[derive(Debug, PartialEq, Eq)]
pub enum PatchField {
    Absent,
    Clear,
    Set(String),
}

/// Ids and timestamps travel as strings, so anything else is rejected.
pub fn patch_field(body: &Value, field: &str) -> Result<PatchField, String> {
    match body.get(field) {
        None => Ok(PatchField::Absent),
        Some(Value::Null) => Ok(PatchField::Clear),
        Some(Value::String(raw)) => Ok(PatchField::Set(raw.clone())),
        Some(other) => Err(format!("expected a string or null, got {other}")),
    }
}
