//! Parsing of sample batches delivered by a transport.
//!
//! A batch is a JSON object with parallel `ir` and `red` arrays. Values may be JSON
//! integers, floats (truncated toward zero) or numeric strings. Anything else makes
//! the whole batch malformed; callers treat a malformed batch as zero samples.
use crate::core::Sample;
use crate::error::{AppResult, PpgError};
use serde_json::Value;

/// Parses `payload` into sample pairs.
pub fn parse_batch(payload: &Value) -> AppResult<Vec<Sample>> {
    let object = payload
        .as_object()
        .ok_or_else(|| PpgError::MalformedIngress("payload is not a JSON object".to_string()))?;
    let ir = channel(object.get("ir"), "ir")?;
    let red = channel(object.get("red"), "red")?;
    if ir.len() != red.len() {
        return Err(PpgError::MalformedIngress(format!(
            "channel lengths differ: {} ir vs {} red",
            ir.len(),
            red.len()
        )));
    }
    Ok(ir
        .into_iter()
        .zip(red)
        .map(|(ir, red)| Sample::new(ir, red))
        .collect())
}

fn channel(value: Option<&Value>, name: &str) -> AppResult<Vec<i64>> {
    let values = value
        .ok_or_else(|| PpgError::MalformedIngress(format!("missing '{name}' key")))?
        .as_array()
        .ok_or_else(|| PpgError::MalformedIngress(format!("'{name}' is not a list")))?;
    values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            to_integer(v).ok_or_else(|| {
                PpgError::MalformedIngress(format!("'{name}'[{i}] is not an integer: {v}"))
            })
        })
        .collect()
}

fn to_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}
