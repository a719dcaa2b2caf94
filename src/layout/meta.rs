use log::debug;

use crate::error::HicError;
use crate::layout::types::{
    TAG_IS_BOOL, TAG_IS_LLONG, TAG_IS_LONG, TAG_IS_ULLONG, TAG_IS_UNSIGNED_LONG,
};
use crate::store::{ContainerFile, Dataset, Node, ScalarType, Value};

/// Name of the group holding the key/value metadata entries, a sibling
/// of the image dataset.
pub const META_GROUP: &str = "ITKMetaData";

/// One typed metadata entry.
///
/// The container's native scalar set has no bool and only one integer
/// type per width, so the host types that do not map one-to-one are
/// stored at a canonical width with a boolean tag attribute recording
/// the host type: bool and long as i32 (`isBool`/`isLong`), unsigned
/// long as u32 (`isUnsignedLong`), long long as i64 (`isLLong`) and
/// unsigned long long as u64 (`isULLong`). Arrays always use the
/// natural width and carry no tag.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    Bool(bool),
    Char(i8),
    UChar(u8),
    Short(i16),
    UShort(u16),
    Int(i32),
    UInt(u32),
    Long(i64),
    ULong(u64),
    LLong(i64),
    ULLong(u64),
    Float(f32),
    Double(f64),
    String(String),
    CharArray(Vec<i8>),
    UCharArray(Vec<u8>),
    ShortArray(Vec<i16>),
    UShortArray(Vec<u16>),
    IntArray(Vec<i32>),
    UIntArray(Vec<u32>),
    LongArray(Vec<i64>),
    ULongArray(Vec<u64>),
    FloatArray(Vec<f32>),
    DoubleArray(Vec<f64>),
}

impl MetaValue {
    /// Encode the entry into its on-disk value and the tag attribute
    /// name, if the host type needs one.
    fn encode(&self) -> (Value, Option<&'static str>) {
        match self {
            MetaValue::Bool(v) => (Value::vector_i32(&[*v as i32]), Some(TAG_IS_BOOL)),
            MetaValue::Char(v) => (Value::vector_i8(&[*v]), None),
            MetaValue::UChar(v) => (Value::vector_u8(&[*v]), None),
            MetaValue::Short(v) => (Value::vector_i16(&[*v]), None),
            MetaValue::UShort(v) => (Value::vector_u16(&[*v]), None),
            MetaValue::Int(v) => (Value::vector_i32(&[*v]), None),
            MetaValue::UInt(v) => (Value::vector_u32(&[*v]), None),
            MetaValue::Long(v) => (Value::vector_i32(&[*v as i32]), Some(TAG_IS_LONG)),
            MetaValue::ULong(v) => (Value::vector_u32(&[*v as u32]), Some(TAG_IS_UNSIGNED_LONG)),
            MetaValue::LLong(v) => (Value::vector_i64(&[*v]), Some(TAG_IS_LLONG)),
            MetaValue::ULLong(v) => (Value::vector_u64(&[*v]), Some(TAG_IS_ULLONG)),
            MetaValue::Float(v) => (Value::vector_f32(&[*v]), None),
            MetaValue::Double(v) => (Value::vector_f64(&[*v]), None),
            MetaValue::String(v) => (Value::string(v), None),
            MetaValue::CharArray(v) => (Value::vector_i8(v), None),
            MetaValue::UCharArray(v) => (Value::vector_u8(v), None),
            MetaValue::ShortArray(v) => (Value::vector_i16(v), None),
            MetaValue::UShortArray(v) => (Value::vector_u16(v), None),
            MetaValue::IntArray(v) => (Value::vector_i32(v), None),
            MetaValue::UIntArray(v) => (Value::vector_u32(v), None),
            MetaValue::LongArray(v) => (Value::vector_i64(v), None),
            MetaValue::ULongArray(v) => (Value::vector_u64(v), None),
            MetaValue::FloatArray(v) => (Value::vector_f32(v), None),
            MetaValue::DoubleArray(v) => (Value::vector_f64(v), None),
        }
    }

    /// Decode one metadata dataset back into the host type.
    ///
    /// Tag attributes take precedence over the on-disk type; an untagged
    /// value dispatches on the type alone, with a single element read as
    /// a scalar and anything longer as an array.
    fn decode(name: &str, ds: &Dataset, value: &Value) -> Result<Self, HicError> {
        let n = value.n_elements();
        let tagged = ds.has_attr(TAG_IS_BOOL)
            || ds.has_attr(TAG_IS_LONG)
            || ds.has_attr(TAG_IS_UNSIGNED_LONG)
            || ds.has_attr(TAG_IS_LLONG)
            || ds.has_attr(TAG_IS_ULLONG);
        if tagged && n != 1 {
            return Err(HicError::MalformedLayout(format!(
                "tagged metadata entry \"{name}\" holds {n} elements, expected 1"
            )));
        }

        Ok(match value.scalar {
            ScalarType::I8 => match n {
                1 => MetaValue::Char(value.as_i8s()?[0]),
                _ => MetaValue::CharArray(value.as_i8s()?),
            },
            ScalarType::U8 => {
                if ds.has_attr(TAG_IS_BOOL) {
                    MetaValue::Bool(value.as_u8s()?[0] != 0)
                } else {
                    match n {
                        1 => MetaValue::UChar(value.as_u8s()?[0]),
                        _ => MetaValue::UCharArray(value.as_u8s()?),
                    }
                }
            }
            ScalarType::I16 => match n {
                1 => MetaValue::Short(value.as_i16s()?[0]),
                _ => MetaValue::ShortArray(value.as_i16s()?),
            },
            ScalarType::U16 => match n {
                1 => MetaValue::UShort(value.as_u16s()?[0]),
                _ => MetaValue::UShortArray(value.as_u16s()?),
            },
            ScalarType::I32 => {
                if ds.has_attr(TAG_IS_BOOL) {
                    MetaValue::Bool(value.as_i32s()?[0] != 0)
                } else if ds.has_attr(TAG_IS_LONG) {
                    MetaValue::Long(value.as_i32s()?[0] as i64)
                } else if ds.has_attr(TAG_IS_LLONG) {
                    MetaValue::LLong(value.as_i32s()?[0] as i64)
                } else {
                    match n {
                        1 => MetaValue::Int(value.as_i32s()?[0]),
                        _ => MetaValue::IntArray(value.as_i32s()?),
                    }
                }
            }
            ScalarType::U32 => {
                if ds.has_attr(TAG_IS_UNSIGNED_LONG) {
                    MetaValue::ULong(value.as_u32s()?[0] as u64)
                } else if ds.has_attr(TAG_IS_ULLONG) {
                    MetaValue::ULLong(value.as_u32s()?[0] as u64)
                } else {
                    match n {
                        1 => MetaValue::UInt(value.as_u32s()?[0]),
                        _ => MetaValue::UIntArray(value.as_u32s()?),
                    }
                }
            }
            ScalarType::I64 => {
                if ds.has_attr(TAG_IS_LLONG) {
                    MetaValue::LLong(value.as_i64s()?[0])
                } else {
                    match n {
                        1 => MetaValue::Long(value.as_i64s()?[0]),
                        _ => MetaValue::LongArray(value.as_i64s()?),
                    }
                }
            }
            ScalarType::U64 => {
                if ds.has_attr(TAG_IS_ULLONG) {
                    MetaValue::ULLong(value.as_u64s()?[0])
                } else {
                    match n {
                        1 => MetaValue::ULong(value.as_u64s()?[0]),
                        _ => MetaValue::ULongArray(value.as_u64s()?),
                    }
                }
            }
            ScalarType::F32 => match n {
                1 => MetaValue::Float(value.as_f32s()?[0]),
                _ => MetaValue::FloatArray(value.as_f32s()?),
            },
            ScalarType::F64 => match n {
                1 => MetaValue::Double(value.as_f64s()?[0]),
                _ => MetaValue::DoubleArray(value.as_f64s()?),
            },
            ScalarType::Str => MetaValue::String(value.as_string()?),
        })
    }
}

/// The key/value metadata dictionary, kept in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetaDict {
    entries: Vec<(String, MetaValue)>,
}

impl MetaDict {
    pub fn new() -> Self {
        MetaDict::default()
    }

    /// Insert or replace an entry, keeping its position when replacing.
    pub fn insert(&mut self, key: &str, value: MetaValue) {
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| k == key) {
            slot.1 = value;
        } else {
            self.entries.push((key.to_string(), value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<MetaValue> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetaValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Write every dictionary entry as a dataset under `group_path`.
///
/// Each entry becomes one rank-1 dataset named after its key; existing
/// datasets with the same name are replaced in place, so rewriting the
/// dictionary is idempotent.
pub fn write_meta(
    file: &mut ContainerFile,
    group_path: &str,
    dict: &MetaDict,
) -> Result<(), HicError> {
    let group = file.ensure_group(group_path);
    for (key, entry) in dict.iter() {
        let (value, tag) = entry.encode();
        let mut ds = Dataset::new(value);
        if let Some(tag) = tag {
            ds.set_attr(tag, Value::vector_i32(&[1]));
        }
        group.insert(key, Node::Dataset(ds));
    }
    debug!("wrote {} metadata entries to {group_path}", dict.len());
    Ok(())
}

/// Read every metadata entry under `group_path` into a dictionary.
///
/// Child groups and datasets of rank other than 1 are not metadata
/// entries and are skipped.
///
/// # Returns
/// The dictionary, or [`HicError::NotFound`] if the group is missing.
pub fn read_meta(file: &ContainerFile, group_path: &str) -> Result<MetaDict, HicError> {
    let group = file
        .group_at(group_path)
        .ok_or_else(|| HicError::NotFound(group_path.to_string()))?;

    let mut dict = MetaDict::new();
    for (name, node) in &group.children {
        let ds = match node {
            Node::Dataset(ds) => ds,
            Node::Group(_) => {
                debug!("skipping metadata child group \"{name}\"");
                continue;
            }
        };
        if ds.value.rank() != 1 {
            debug!(
                "skipping metadata entry \"{name}\" of rank {}",
                ds.value.rank()
            );
            continue;
        }
        let bytes = file.payload_bytes(&ds.value)?;
        let value = Value::new(ds.value.scalar, ds.value.shape.clone(), bytes.into_owned())?;
        dict.insert(name, MetaValue::decode(name, ds, &value)?);
    }
    Ok(dict)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_dataset(entry: &MetaValue) -> Dataset {
        let (value, tag) = entry.encode();
        let mut ds = Dataset::new(value);
        if let Some(tag) = tag {
            ds.set_attr(tag, Value::vector_i32(&[1]));
        }
        ds
    }

    fn decode_back(entry: &MetaValue) -> MetaValue {
        let ds = entry_dataset(entry);
        MetaValue::decode("key", &ds, &ds.value).unwrap()
    }

    #[test]
    fn tagged_scalars_round_trip() {
        for entry in [
            MetaValue::Bool(true),
            MetaValue::Bool(false),
            MetaValue::Long(-7),
            MetaValue::ULong(7),
            MetaValue::LLong(-1 << 40),
            MetaValue::ULLong(1 << 40),
        ] {
            assert_eq!(decode_back(&entry), entry);
        }
    }

    #[test]
    fn untagged_values_round_trip() {
        for entry in [
            MetaValue::Char(-3),
            MetaValue::UChar(200),
            MetaValue::Short(-1000),
            MetaValue::UShort(60000),
            MetaValue::Int(-123456),
            MetaValue::UInt(123456),
            MetaValue::Float(1.5),
            MetaValue::Double(-2.25),
            MetaValue::String("hello".to_string()),
            MetaValue::IntArray(vec![1, 2, 3]),
            MetaValue::DoubleArray(vec![0.5, 1.5]),
            MetaValue::ULongArray(vec![10, 20]),
        ] {
            assert_eq!(decode_back(&entry), entry);
        }
    }

    #[test]
    fn long_is_stored_at_32_bits() {
        let ds = entry_dataset(&MetaValue::Long(-7));
        assert_eq!(ds.value.scalar, ScalarType::I32);
        assert!(ds.has_attr(TAG_IS_LONG));
    }

    #[test]
    fn tagged_array_is_malformed() {
        let mut ds = Dataset::new(Value::vector_i32(&[1, 2]));
        ds.set_attr(TAG_IS_BOOL, Value::vector_i32(&[1]));
        let err = MetaValue::decode("key", &ds, &ds.value).unwrap_err();
        assert!(matches!(err, HicError::MalformedLayout(_)));
    }

    #[test]
    fn untagged_i64_scalar_reads_as_long() {
        let ds = Dataset::new(Value::vector_i64(&[42]));
        assert_eq!(
            MetaValue::decode("key", &ds, &ds.value).unwrap(),
            MetaValue::Long(42)
        );
    }

    #[test]
    fn dict_replaces_in_place() {
        let mut dict = MetaDict::new();
        dict.insert("a", MetaValue::Int(1));
        dict.insert("b", MetaValue::Int(2));
        dict.insert("a", MetaValue::Int(3));
        assert_eq!(dict.len(), 2);
        assert_eq!(dict.get("a"), Some(&MetaValue::Int(3)));
        let keys: Vec<&str> = dict.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }
}
