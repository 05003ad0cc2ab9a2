// Deterministic JSON serialization: object keys sorted lexicographically,
// non-finite numbers rendered as null, containers checked for cycles.

use std::rc::Rc;

use thiserror::Error;

use crate::value::Value;

#[derive(Error, Debug)]
pub enum SerializeError {
    #[error("cannot serialize cyclic structure")]
    CyclicStructure,
}

/// Render a number the way JSON does: integral values without a fraction,
/// negative zero collapsed to "0". Non-finite values are the caller's
/// problem (the serializer emits null for them).
pub fn format_number(n: f64) -> String {
    if n == 0.0 {
        // covers -0.0
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Escape a string for inclusion in a JSON document, surrounding quotes
/// included.
pub fn escape_json_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{0008}' => out.push_str("\\b"),
            '\u{000C}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Serialize a value to a deterministic JSON string.
///
/// Object keys are emitted in sorted order regardless of insertion order,
/// so structurally equal documents always produce identical text.
/// Expression references have no JSON rendering: as an object member they
/// are dropped, elsewhere they serialize as null. Sibling references to
/// the same container are fine; only a container appearing within itself
/// is an error.
pub fn serialize(value: &Value) -> Result<String, SerializeError> {
    let mut out = String::new();
    let mut seen: Vec<usize> = Vec::new();
    write_value(value, &mut out, &mut seen)?;
    Ok(out)
}

fn container_id(value: &Value) -> Option<usize> {
    match value {
        Value::Array(items) => Some(Rc::as_ptr(items) as usize),
        Value::Object(map) => Some(Rc::as_ptr(map) as *const u8 as usize),
        _ => None,
    }
}

fn write_value(
    value: &Value,
    out: &mut String,
    seen: &mut Vec<usize>,
) -> Result<(), SerializeError> {
    if let Some(id) = container_id(value) {
        if seen.contains(&id) {
            return Err(SerializeError::CyclicStructure);
        }
        seen.push(id);
    }

    match value {
        Value::Null | Value::Expref(_) => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            if n.is_finite() {
                out.push_str(&format_number(*n));
            } else {
                out.push_str("null");
            }
        }
        Value::String(s) => out.push_str(&escape_json_string(s)),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out, seen)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            let mut first = true;
            for key in keys {
                let member = &map[key.as_str()];
                // No JSON rendering for expression references; the member
                // disappears, matching how undefined members are dropped.
                if member.is_expref() {
                    continue;
                }
                if !first {
                    out.push(',');
                }
                first = false;
                out.push_str(&escape_json_string(key));
                out.push(':');
                write_value(member, out, seen)?;
            }
            out.push('}');
        }
    }

    if container_id(value).is_some() {
        seen.pop();
    }
    Ok(())
}
