use serde::{Deserialize, Serialize};

use crate::error::HicError;
use crate::store::ScalarType;

/// Host scalar component types of a voxel.
///
/// The fixed enumeration the image side of the codec understands:
/// signed and unsigned integers of 8/16/32/64 bits plus the two float
/// widths. Voxel data maps width-for-width onto the container's native
/// scalar set, so no disambiguation tags are needed for the image
/// dataset itself (the metadata codec is the one that needs them, see
/// [`crate::layout::meta`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
}

/// Names of the auxiliary boolean tag attributes that record which host
/// type an on-disk value actually represents. Absence of a tag means
/// "use the on-disk type directly".
pub const TAG_IS_BOOL: &str = "isBool";
pub const TAG_IS_LONG: &str = "isLong";
pub const TAG_IS_UNSIGNED_LONG: &str = "isUnsignedLong";
pub const TAG_IS_LLONG: &str = "isLLong";
pub const TAG_IS_ULLONG: &str = "isULLong";

impl ComponentType {
    /// On-disk scalar type for this component type. Total: every host
    /// component type has a native container representation.
    pub fn encode(self) -> ScalarType {
        match self {
            ComponentType::Int8 => ScalarType::I8,
            ComponentType::UInt8 => ScalarType::U8,
            ComponentType::Int16 => ScalarType::I16,
            ComponentType::UInt16 => ScalarType::U16,
            ComponentType::Int32 => ScalarType::I32,
            ComponentType::UInt32 => ScalarType::U32,
            ComponentType::Int64 => ScalarType::I64,
            ComponentType::UInt64 => ScalarType::U64,
            ComponentType::Float32 => ScalarType::F32,
            ComponentType::Float64 => ScalarType::F64,
        }
    }

    /// Host component type for an on-disk scalar type.
    ///
    /// # Returns
    /// The matching [`ComponentType`], or [`HicError::UnsupportedType`]
    /// for a scalar type that cannot be a voxel component (`Str`).
    pub fn decode(scalar: ScalarType) -> Result<Self, HicError> {
        Ok(match scalar {
            ScalarType::I8 => ComponentType::Int8,
            ScalarType::U8 => ComponentType::UInt8,
            ScalarType::I16 => ComponentType::Int16,
            ScalarType::U16 => ComponentType::UInt16,
            ScalarType::I32 => ComponentType::Int32,
            ScalarType::U32 => ComponentType::UInt32,
            ScalarType::I64 => ComponentType::Int64,
            ScalarType::U64 => ComponentType::UInt64,
            ScalarType::F32 => ComponentType::Float32,
            ScalarType::F64 => ComponentType::Float64,
            ScalarType::Str => {
                return Err(HicError::UnsupportedType(
                    "str is not a voxel component type".into(),
                ));
            }
        })
    }

    /// Size of one component in bytes.
    pub fn size(self) -> usize {
        self.encode().elem_size()
    }

    pub fn name(self) -> &'static str {
        match self {
            ComponentType::Int8 => "int8",
            ComponentType::UInt8 => "uint8",
            ComponentType::Int16 => "int16",
            ComponentType::UInt16 => "uint16",
            ComponentType::Int32 => "int32",
            ComponentType::UInt32 => "uint32",
            ComponentType::Int64 => "int64",
            ComponentType::UInt64 => "uint64",
            ComponentType::Float32 => "float32",
            ComponentType::Float64 => "float64",
        }
    }

    pub const ALL: [ComponentType; 10] = [
        ComponentType::Int8,
        ComponentType::UInt8,
        ComponentType::Int16,
        ComponentType::UInt16,
        ComponentType::Int32,
        ComponentType::UInt32,
        ComponentType::Int64,
        ComponentType::UInt64,
        ComponentType::Float32,
        ComponentType::Float64,
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_is_bijective() {
        for t in ComponentType::ALL {
            assert_eq!(ComponentType::decode(t.encode()).unwrap(), t);
        }
    }

    #[test]
    fn string_scalar_is_not_a_component() {
        assert!(matches!(
            ComponentType::decode(ScalarType::Str),
            Err(HicError::UnsupportedType(_))
        ));
    }
}
