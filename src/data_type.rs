//! Array element data types.
//!
//! Every element type has a fixed byte size. Conversions between these types
//! and the container's native types preserve byte count; see
//! [`NativeType`](crate::container::NativeType).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An array element data type.
#[derive(Serialize, Deserialize, Copy, Clone, Eq, PartialEq, Hash, Debug, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Unsigned 8-bit integer.
    UInt8,
    /// Unsigned 16-bit integer.
    UInt16,
    /// Unsigned 32-bit integer.
    UInt32,
    /// Unsigned 64-bit integer.
    UInt64,
    /// Signed 8-bit integer.
    Int8,
    /// Signed 16-bit integer.
    Int16,
    /// Signed 32-bit integer.
    Int32,
    /// Signed 64-bit integer.
    Int64,
    /// IEEE 754 binary32 floating point.
    Float32,
    /// IEEE 754 binary64 floating point.
    Float64,
}

/// An unsupported data type error.
#[derive(Clone, Debug, Error)]
#[error("data type {_0} is not supported")]
pub struct UnsupportedDataTypeError(String);

impl UnsupportedDataTypeError {
    /// Create a new unsupported data type error.
    #[must_use]
    pub fn new(dtype: impl Into<String>) -> Self {
        Self(dtype.into())
    }
}

impl DataType {
    /// All supported data types.
    pub const ALL: [DataType; 10] = [
        Self::UInt8,
        Self::UInt16,
        Self::UInt32,
        Self::UInt64,
        Self::Int8,
        Self::Int16,
        Self::Int32,
        Self::Int64,
        Self::Float32,
        Self::Float64,
    ];

    /// Returns the identifier of the data type, e.g. `"uint8"`.
    #[must_use]
    pub const fn identifier(&self) -> &'static str {
        match self {
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        }
    }

    /// Returns the size of an element in bytes.
    #[must_use]
    pub const fn size(&self) -> usize {
        match self {
            Self::UInt8 | Self::Int8 => 1,
            Self::UInt16 | Self::Int16 => 2,
            Self::UInt32 | Self::Int32 | Self::Float32 => 4,
            Self::UInt64 | Self::Int64 | Self::Float64 => 8,
        }
    }

    /// Returns true for the signed integer types.
    #[must_use]
    pub const fn is_signed_integer(&self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }

    /// Returns true for the unsigned integer types.
    #[must_use]
    pub const fn is_unsigned_integer(&self) -> bool {
        matches!(
            self,
            Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64
        )
    }

    /// Returns true for the floating point types.
    #[must_use]
    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    /// Create a data type from its identifier.
    ///
    /// # Errors
    /// Returns [`UnsupportedDataTypeError`] if `identifier` is not a supported
    /// data type name.
    pub fn from_identifier(identifier: &str) -> Result<Self, UnsupportedDataTypeError> {
        Self::ALL
            .iter()
            .find(|dtype| dtype.identifier() == identifier)
            .copied()
            .ok_or_else(|| UnsupportedDataTypeError(identifier.to_string()))
    }
}

impl core::fmt::Display for DataType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.identifier())
    }
}

impl TryFrom<&str> for DataType {
    type Error = UnsupportedDataTypeError;

    fn try_from(identifier: &str) -> Result<Self, Self::Error> {
        Self::from_identifier(identifier)
    }
}
