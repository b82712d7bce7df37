//! Management operation model.
//!
//! An [`Operation`] targets a resource [`Address`] and carries an operation
//! name plus named parameters. It serializes to the flat JSON shape the
//! management endpoint expects:
//!
//! ```json
//! {"operation": "add", "address": [{"system-property": "foo"}], "value": "bar"}
//! ```
//!
//! The endpoint answers with an [`OperationResult`] whose `outcome` says
//! whether the operation was applied.

use crate::error::{Error, Result};
use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Ordered `type=value` path to a managed resource. The empty address is the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Address(Vec<(String, String)>);

impl Address {
    /// The root resource
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Single-segment address
    pub fn of(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self(vec![(key.into(), value.into())])
    }

    /// Extend this address with a child segment
    pub fn append(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.push((key.into(), value.into()));
        self
    }

    pub fn segments(&self) -> &[(String, String)] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Value of the first segment with the given type
    pub fn value_of(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "/");
        }
        for (key, value) in &self.0 {
            write!(f, "/{}={}", key, value)?;
        }
        Ok(())
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        struct Segment<'a>(&'a str, &'a str);

        impl Serialize for Segment<'_> {
            fn serialize<S: Serializer>(
                &self,
                serializer: S,
            ) -> std::result::Result<S::Ok, S::Error> {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(self.0, self.1)?;
                map.end()
            }
        }

        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            seq.serialize_element(&Segment(key, value))?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = Vec::<Map<String, Value>>::deserialize(deserializer)?;
        let mut segments = Vec::with_capacity(raw.len());
        for entry in raw {
            if entry.len() != 1 {
                return Err(de::Error::custom(
                    "address segments must hold exactly one entry",
                ));
            }
            for (key, value) in entry {
                let value = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                segments.push((key, value));
            }
        }
        Ok(Address(segments))
    }
}

/// A single management operation
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    name: String,
    address: Address,
    params: Map<String, Value>,
}

/// Keys of the flat wire form that carry the operation itself
pub const RESERVED_PARAMS: [&str; 2] = ["operation", "address"];

impl Operation {
    /// Create an operation without parameters
    pub fn new(name: impl Into<String>, address: Address) -> Self {
        Self {
            name: name.into(),
            address,
            params: Map::new(),
        }
    }

    /// Add a named parameter. A parameter named `operation` or `address`
    /// is kept locally but never overrides the operation name or address
    /// on the wire.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    pub fn get_param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    pub fn read_attribute(address: Address, attribute: &str) -> Self {
        Self::new("read-attribute", address).param("name", attribute)
    }

    pub fn write_attribute(address: Address, attribute: &str, value: impl Into<Value>) -> Self {
        Self::new("write-attribute", address)
            .param("name", attribute)
            .param("value", value)
    }

    pub fn add(address: Address) -> Self {
        Self::new("add", address)
    }

    pub fn remove(address: Address) -> Self {
        Self::new("remove", address)
    }

    pub fn read_children_names(address: Address, child_type: &str) -> Self {
        Self::new("read-children-names", address).param("child-type", child_type)
    }

    pub fn read_children_resources(address: Address, child_type: &str) -> Self {
        Self::new("read-children-resources", address).param("child-type", child_type)
    }

    /// Wrap operations into one all-or-nothing composite request
    pub fn composite(steps: Vec<Operation>) -> Self {
        let steps: Vec<Value> = steps.iter().map(Operation::to_value).collect();
        Self::new("composite", Address::root()).param("steps", Value::Array(steps))
    }

    /// Steps of a composite operation, `None` for any other operation
    pub fn steps(&self) -> Option<Result<Vec<Operation>>> {
        if self.name != "composite" {
            return None;
        }
        let steps = match self.params.get("steps") {
            Some(Value::Array(steps)) => steps,
            _ => return Some(Ok(Vec::new())),
        };
        Some(steps.iter().map(Operation::from_value).collect())
    }

    /// Flat JSON form sent over the wire
    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        for (key, value) in &self.params {
            if RESERVED_PARAMS.contains(&key.as_str()) {
                tracing::warn!(
                    "Dropping parameter '{}' of {}: the name is reserved",
                    key,
                    self.name
                );
                continue;
            }
            object.insert(key.clone(), value.clone());
        }
        object.insert("operation".to_string(), Value::String(self.name.clone()));
        object.insert(
            "address".to_string(),
            serde_json::to_value(&self.address).unwrap_or(Value::Array(Vec::new())),
        );
        Value::Object(object)
    }

    /// Parse the flat JSON form
    pub fn from_value(value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| Error::Serialization("operation must be a JSON object".to_string()))?;
        let name = object
            .get("operation")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Serialization("operation name is missing".to_string()))?
            .to_string();
        let address = match object.get("address") {
            Some(raw) => serde_json::from_value(raw.clone())
                .map_err(|e| Error::Serialization(format!("Invalid operation address: {}", e)))?,
            None => Address::root(),
        };
        let params = object
            .iter()
            .filter(|(key, _)| key.as_str() != "operation" && key.as_str() != "address")
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Ok(Self {
            name,
            address,
            params,
        })
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.name)?;
        if !self.params.is_empty() {
            let params: Vec<String> = self
                .params
                .iter()
                .map(|(key, value)| match value {
                    Value::String(s) => format!("{}={}", key, s),
                    other => format!("{}={}", key, other),
                })
                .collect();
            write!(f, "({})", params.join(","))?;
        }
        Ok(())
    }
}

impl Serialize for Operation {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Operation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Operation::from_value(&value).map_err(de::Error::custom)
    }
}

/// Outcome field of an operation result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failed,
    Cancelled,
}

/// Structured answer to an [`Operation`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    /// Whether the operation was applied
    pub outcome: Outcome,
    /// Operation-specific result value
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub result: Value,
    /// Server description of a failure
    #[serde(
        rename = "failure-description",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub failure_description: Option<Value>,
    /// Set when the server rolled the operation back
    #[serde(rename = "rolled-back", default, skip_serializing_if = "is_false")]
    pub rolled_back: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl OperationResult {
    pub fn success(result: Value) -> Self {
        Self {
            outcome: Outcome::Success,
            result,
            failure_description: None,
            rolled_back: false,
        }
    }

    pub fn failed(description: impl Into<Value>) -> Self {
        Self {
            outcome: Outcome::Failed,
            result: Value::Null,
            failure_description: Some(description.into()),
            rolled_back: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    /// Human readable failure description
    pub fn failure_message(&self) -> String {
        match &self.failure_description {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => match self.outcome {
                Outcome::Cancelled => "Operation was cancelled".to_string(),
                _ => "Unknown failure".to_string(),
            },
        }
    }

    /// Zero-based index of the first failed step of a composite result
    pub fn failed_step(&self) -> Option<usize> {
        let steps = self.result.as_object()?;
        let mut failed: Vec<usize> = steps
            .iter()
            .filter(|(_, step)| step.get("outcome").and_then(Value::as_str) == Some("failed"))
            .filter_map(|(key, _)| key.strip_prefix("step-")?.parse::<usize>().ok())
            .collect();
        failed.sort_unstable();
        failed.first().and_then(|step| step.checked_sub(1))
    }

    /// Turn a failed outcome into [`Error::OperationFailed`]
    pub fn into_result(self, operation: &str) -> Result<Value> {
        if self.is_success() {
            Ok(self.result)
        } else {
            Err(Error::OperationFailed {
                operation: operation.to_string(),
                message: self.failure_message(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_wire_shape() {
        let op = Operation::add(Address::of("system-property", "foo")).param("value", "bar");

        assert_eq!(
            op.to_value(),
            json!({
                "operation": "add",
                "address": [{"system-property": "foo"}],
                "value": "bar"
            })
        );
        assert_eq!(Operation::from_value(&op.to_value()).unwrap(), op);
    }

    #[test]
    fn test_reserved_params_do_not_override_name_or_address() {
        let op = Operation::add(Address::of("system-property", "real"))
            .param("operation", "remove")
            .param("address", json!([{"system-property": "other"}]))
            .param("value", "x");

        assert_eq!(
            op.to_value(),
            json!({
                "operation": "add",
                "address": [{"system-property": "real"}],
                "value": "x"
            })
        );
    }

    #[test]
    fn test_composite_steps() {
        let composite = Operation::composite(vec![
            Operation::add(Address::of("system-property", "a")),
            Operation::remove(Address::of("system-property", "b")),
        ]);

        let steps = composite.steps().unwrap().unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1].name(), "remove");
        assert!(Operation::add(Address::root()).steps().is_none());
    }

    #[test]
    fn test_failed_step_lookup() {
        let result: OperationResult = serde_json::from_value(json!({
            "outcome": "failed",
            "result": {
                "step-1": {"outcome": "success"},
                "step-2": {"outcome": "failed", "failure-description": "duplicate"},
                "step-3": {"outcome": "cancelled"}
            },
            "failure-description": "Composite operation failed and was rolled back",
            "rolled-back": true
        }))
        .unwrap();

        assert_eq!(result.failed_step(), Some(1));
        assert!(result.rolled_back);
        assert_eq!(
            result.failure_message(),
            "Composite operation failed and was rolled back"
        );
    }

    #[test]
    fn test_address_display() {
        assert_eq!(Address::root().to_string(), "/");
        assert_eq!(
            Address::of("host", "primary").append("server", "one").to_string(),
            "/host=primary/server=one"
        );
    }
}
