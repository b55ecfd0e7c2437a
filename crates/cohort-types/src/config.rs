use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TypeError;

/// Opaque, caller-supplied study configuration document.
///
/// The persistence layer never interprets the contents. It only needs a
/// stable serialization so that identical documents hash to the same
/// [`ConfigVersion`](crate::ConfigVersion).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudyConfig(Value);

impl StudyConfig {
    pub fn new(document: Value) -> Self {
        Self(document)
    }

    /// Parse a configuration from JSON text.
    pub fn from_json(text: &str) -> Result<Self, TypeError> {
        serde_json::from_str(text)
            .map(Self)
            .map_err(|e| TypeError::Serialization(e.to_string()))
    }

    pub fn document(&self) -> &Value {
        &self.0
    }

    /// Canonical serialization: compact JSON with object keys sorted at
    /// every depth, independent of insertion order.
    pub fn canonical_json(&self) -> Result<String, TypeError> {
        let mut out = String::new();
        write_canonical(&self.0, &mut out)?;
        Ok(out)
    }
}

impl From<Value> for StudyConfig {
    fn from(document: Value) -> Self {
        Self(document)
    }
}

// Sorts explicitly so the hash stays stable if serde_json's `preserve_order`
// feature is ever enabled somewhere in the dependency graph.
fn write_canonical(value: &Value, out: &mut String) -> Result<(), TypeError> {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            out.push('{');
            for (i, (key, child)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&to_json(key)?);
                out.push(':');
                write_canonical(child, out)?;
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, child) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(child, out)?;
            }
            out.push(']');
        }
        scalar => out.push_str(&to_json(scalar)?),
    }
    Ok(())
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, TypeError> {
    serde_json::to_string(value).map_err(|e| TypeError::Serialization(e.to_string()))
}
