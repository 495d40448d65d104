//! Mapping between engine data types and container native types.

use serde::{Deserialize, Serialize};

use crate::data_type::{DataType, UnsupportedDataTypeError};

/// The class of a container native type.
#[derive(Serialize, Deserialize, Copy, Clone, Eq, PartialEq, Debug)]
#[serde(rename_all = "snake_case")]
pub enum TypeClass {
    /// Fixed-size integer.
    Integer,
    /// IEEE 754 floating point.
    Float,
    /// Boolean.
    Boolean,
    /// Fixed-length string.
    String,
    /// Compound (struct-like) type.
    Compound,
    /// Enumeration.
    Enum,
    /// Variable-length sequence.
    VariableLength,
    /// Opaque bytes.
    Opaque,
    /// Object or region reference.
    Reference,
    /// Fixed-size array.
    Array,
    /// Time.
    Time,
    /// Bitfield.
    Bitfield,
}

/// A container native type: a type class, a size in bytes, and a signedness.
///
/// The engine only ever creates integer and float native types; the remaining
/// [`TypeClass`]es exist so that pre-existing container state can be decoded
/// and rejected.
#[derive(Serialize, Deserialize, Copy, Clone, Eq, PartialEq, Debug)]
pub struct NativeType {
    /// The type class.
    pub class: TypeClass,
    /// The size of the type in bytes.
    pub size: u32,
    /// Whether an integer type is signed.
    #[serde(default)]
    pub signed: bool,
}

impl NativeType {
    /// Return the native type of `dtype`.
    ///
    /// Total over the supported element types; conversions preserve byte
    /// count.
    #[must_use]
    pub fn from_data_type(dtype: DataType) -> Self {
        let class = if dtype.is_float() {
            TypeClass::Float
        } else {
            TypeClass::Integer
        };
        Self {
            class,
            size: u32::try_from(dtype.size()).expect("element sizes are small"),
            signed: dtype.is_signed_integer(),
        }
    }

    /// Return the engine data type of this native type.
    ///
    /// Integers are recognized by size and sign, floats by size, and booleans
    /// as unsigned 8-bit integers.
    ///
    /// # Errors
    /// Returns [`UnsupportedDataTypeError`] for compound, enum,
    /// variable-length, opaque, reference, array, time, and bitfield classes,
    /// and for unrecognized sizes.
    pub fn to_data_type(&self) -> Result<DataType, UnsupportedDataTypeError> {
        let unsupported = || UnsupportedDataTypeError::new(format!("{self:?}"));
        match self.class {
            TypeClass::Integer => match (self.size, self.signed) {
                (1, false) => Ok(DataType::UInt8),
                (2, false) => Ok(DataType::UInt16),
                (4, false) => Ok(DataType::UInt32),
                (8, false) => Ok(DataType::UInt64),
                (1, true) => Ok(DataType::Int8),
                (2, true) => Ok(DataType::Int16),
                (4, true) => Ok(DataType::Int32),
                (8, true) => Ok(DataType::Int64),
                _ => Err(unsupported()),
            },
            TypeClass::Float => match self.size {
                4 => Ok(DataType::Float32),
                8 => Ok(DataType::Float64),
                _ => Err(unsupported()),
            },
            TypeClass::Boolean => Ok(DataType::UInt8),
            TypeClass::String
            | TypeClass::Compound
            | TypeClass::Enum
            | TypeClass::VariableLength
            | TypeClass::Opaque
            | TypeClass::Reference
            | TypeClass::Array
            | TypeClass::Time
            | TypeClass::Bitfield => Err(unsupported()),
        }
    }

    /// Return the size of the type in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size as usize
    }
}
