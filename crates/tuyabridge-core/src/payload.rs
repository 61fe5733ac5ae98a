//! Command payload normalization and parsing.
//!
//! Publishers that string-encode their JSON send `'{"1":true}'` or
//! `"{"1":true}"`; one matching pair of outer quotes is stripped before the
//! text is read as a DPS map.  A payload that is a JSON string literal
//! (`"{\"1\":true}"`) is decoded once and read again.

use serde_json::Value;
use tuyabridge_types::{BridgeError, DpIndex, DpsMap, DpsValue};

/// Decode `raw` as text, trim it and strip one matching pair of outer
/// quotes (`'…'` or `"…"`).
pub fn clean_payload(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    strip_matching_quotes(text.trim()).to_string()
}

fn strip_matching_quotes(text: &str) -> &str {
    let bytes = text.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(&first), Some(&last))
            if bytes.len() >= 2 && first == last && (first == b'\'' || first == b'"') =>
        {
            &text[1..text.len() - 1]
        }
        _ => text,
    }
}

/// Parse a command payload into a DPS map.
///
/// # Errors
///
/// Returns [`BridgeError::Parse`] when the payload is not a JSON object,
/// when a key is not a positive integer, when a value is not a boolean,
/// number or string, or when the map is empty.
pub fn parse_command(raw: &[u8]) -> Result<DpsMap, BridgeError> {
    match parse_dps_object(&clean_payload(raw)) {
        Ok(dps) => Ok(dps),
        Err(first) => {
            let text = String::from_utf8_lossy(raw);
            match serde_json::from_str::<String>(text.trim()) {
                Ok(decoded) => parse_dps_object(&decoded),
                Err(_) => Err(first),
            }
        }
    }
}

fn parse_dps_object(text: &str) -> Result<DpsMap, BridgeError> {
    let object: serde_json::Map<String, Value> = serde_json::from_str(text)
        .map_err(|e| BridgeError::Parse(format!("expected a JSON object of data points: {e}")))?;
    if object.is_empty() {
        return Err(BridgeError::Parse("command carries no data points".to_string()));
    }

    let mut dps = DpsMap::new();
    for (key, value) in object {
        let dp = parse_dp_index(&key)?;
        let value: DpsValue = serde_json::from_value(value.clone()).map_err(|_| {
            BridgeError::Parse(format!("dp {dp}: unsupported value {value}"))
        })?;
        dps.insert(dp, value);
    }
    Ok(dps)
}

/// Coerce a map key into a data-point index.
pub fn parse_dp_index(key: &str) -> Result<DpIndex, BridgeError> {
    match key.trim().parse::<DpIndex>() {
        Ok(dp) if dp > 0 => Ok(dp),
        _ => Err(BridgeError::Parse(format!(
            "data-point key '{key}' is not a positive integer"
        ))),
    }
}
