//! Conversion between JSON values and natively typed attributes.
//!
//! Scalar JSON values are stored natively: integers as 64-bit signed
//! integers, floating point numbers as 64-bit floats, and strings as
//! fixed-length UTF-8. Aggregates (arrays and objects) are stored as their
//! serialized string, flagged by a stored-name prefix and decoded on read.

use super::{
    index::{AttributeRecord, AttributeValue},
    ContainerError,
};

/// The stored-name prefix flagging a serialized aggregate attribute.
pub(crate) const SERIALIZED_ATTRIBUTE_PREFIX: &str = ".json.";

/// Convert a JSON value to an attribute record with logical name `name`.
pub(crate) fn attribute_to_record(
    name: &str,
    value: &serde_json::Value,
) -> Result<AttributeRecord, ContainerError> {
    match value {
        serde_json::Value::Number(number) => {
            if let Some(value) = number.as_i64() {
                Ok(AttributeRecord {
                    name: name.to_string(),
                    value: AttributeValue::Int64(value),
                })
            } else if let Some(value) = number.as_f64() {
                Ok(AttributeRecord {
                    name: name.to_string(),
                    value: AttributeValue::Float64(value),
                })
            } else {
                Err(ContainerError::InvalidArgument(format!(
                    "attribute {name}: unrepresentable number {number}"
                )))
            }
        }
        serde_json::Value::String(string) => Ok(AttributeRecord {
            name: name.to_string(),
            value: AttributeValue::String(string.clone()),
        }),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => Ok(AttributeRecord {
            name: format!("{SERIALIZED_ATTRIBUTE_PREFIX}{name}"),
            value: AttributeValue::String(value.to_string()),
        }),
        serde_json::Value::Bool(_) | serde_json::Value::Null => {
            Err(ContainerError::InvalidArgument(format!(
                "attribute {name}: unsupported JSON type"
            )))
        }
    }
}

/// Return the logical name of a stored attribute record.
pub(crate) fn logical_name(record: &AttributeRecord) -> &str {
    record
        .name
        .strip_prefix(SERIALIZED_ATTRIBUTE_PREFIX)
        .unwrap_or(&record.name)
}

/// Decode an attribute record back to a JSON value.
pub(crate) fn record_to_json(record: &AttributeRecord) -> Result<serde_json::Value, ContainerError> {
    let serialized = record.name.starts_with(SERIALIZED_ATTRIBUTE_PREFIX);
    match (&record.value, serialized) {
        (AttributeValue::Int64(value), false) => Ok(serde_json::Value::from(*value)),
        (AttributeValue::Float64(value), false) => Ok(serde_json::Value::from(*value)),
        (AttributeValue::String(value), false) => Ok(serde_json::Value::from(value.clone())),
        (AttributeValue::String(value), true) => serde_json::from_str(value).map_err(|err| {
            ContainerError::Other(format!(
                "attribute {}: invalid serialized value: {err}",
                logical_name(record)
            ))
        }),
        (_, true) => Err(ContainerError::Other(format!(
            "attribute {}: serialized attribute is not a string",
            logical_name(record)
        ))),
    }
}
