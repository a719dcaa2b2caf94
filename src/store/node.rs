use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::error::HicError;

/// Native scalar types of the container format.
///
/// Every dataset and attribute carries exactly one of these. `Str` holds a
/// single UTF-8 string; all numeric payloads are little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalarType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Str,
}

impl ScalarType {
    /// Wire code used in the container encoding.
    pub fn to_u8(self) -> u8 {
        match self {
            ScalarType::I8 => 0,
            ScalarType::U8 => 1,
            ScalarType::I16 => 2,
            ScalarType::U16 => 3,
            ScalarType::I32 => 4,
            ScalarType::U32 => 5,
            ScalarType::I64 => 6,
            ScalarType::U64 => 7,
            ScalarType::F32 => 8,
            ScalarType::F64 => 9,
            ScalarType::Str => 10,
        }
    }

    /// Decode a wire code.
    ///
    /// # Returns
    /// The matching [`ScalarType`] or [`HicError::UnsupportedType`] for an
    /// unknown code.
    pub fn from_u8(code: u8) -> Result<Self, HicError> {
        Ok(match code {
            0 => ScalarType::I8,
            1 => ScalarType::U8,
            2 => ScalarType::I16,
            3 => ScalarType::U16,
            4 => ScalarType::I32,
            5 => ScalarType::U32,
            6 => ScalarType::I64,
            7 => ScalarType::U64,
            8 => ScalarType::F32,
            9 => ScalarType::F64,
            10 => ScalarType::Str,
            n => {
                return Err(HicError::UnsupportedType(format!(
                    "unknown scalar type code {n}"
                )));
            }
        })
    }

    /// Size of one element in bytes. `Str` payloads are raw UTF-8, counted
    /// per byte.
    pub fn elem_size(self) -> usize {
        match self {
            ScalarType::I8 | ScalarType::U8 | ScalarType::Str => 1,
            ScalarType::I16 | ScalarType::U16 => 2,
            ScalarType::I32 | ScalarType::U32 | ScalarType::F32 => 4,
            ScalarType::I64 | ScalarType::U64 | ScalarType::F64 => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ScalarType::I8 => "i8",
            ScalarType::U8 => "u8",
            ScalarType::I16 => "i16",
            ScalarType::U16 => "u16",
            ScalarType::I32 => "i32",
            ScalarType::U32 => "u32",
            ScalarType::I64 => "i64",
            ScalarType::U64 => "u64",
            ScalarType::F32 => "f32",
            ScalarType::F64 => "f64",
            ScalarType::Str => "str",
        }
    }
}

/// Payload size in bytes for a scalar type and shape, `None` when the
/// element count does not fit in 64 bits.
pub fn byte_len(scalar: ScalarType, shape: &[u64]) -> Option<u64> {
    shape
        .iter()
        .try_fold(1u64, |acc, d| acc.checked_mul(*d))
        .and_then(|n| n.checked_mul(scalar.elem_size() as u64))
}

/// Backing bytes of a dataset or attribute value.
///
/// `Inline` payloads live on the heap and are always uncompressed.
/// `Mapped` payloads are windows into the memory map of a read-only
/// container file and are resolved by [`super::ContainerFile`].
#[derive(Debug, Clone)]
pub enum Payload {
    Inline(Vec<u8>),
    Mapped {
        offset:   usize,
        len:      usize,
        deflated: bool,
        raw_len:  usize,
    },
}

/// A typed N-dimensional value. `shape` is listed slowest-moving first.
#[derive(Debug, Clone)]
pub struct Value {
    pub scalar:  ScalarType,
    pub shape:   Vec<u64>,
    pub payload: Payload,
}

macro_rules! vector_ctor {
    ($name:ident, $ty:ty, $scalar:expr) => {
        pub fn $name(vals: &[$ty]) -> Value {
            let mut buf = Vec::with_capacity(vals.len() * size_of::<$ty>());
            for v in vals {
                buf.extend_from_slice(&v.to_le_bytes());
            }
            Value {
                scalar:  $scalar,
                shape:   vec![vals.len() as u64],
                payload: Payload::Inline(buf),
            }
        }
    };
}

macro_rules! exact_reader {
    ($name:ident, $ty:ty, $scalar:expr, $read:ident) => {
        /// Decode the payload as a vector of the exact element type,
        /// failing if the on-disk scalar type differs.
        pub fn $name(&self) -> Result<Vec<$ty>, HicError> {
            if self.scalar != $scalar {
                return Err(HicError::MalformedLayout(format!(
                    "expected {} payload, found {}",
                    $scalar.name(),
                    self.scalar.name()
                )));
            }
            let bytes = self.inline_bytes()?;
            Ok(bytes
                .chunks_exact(size_of::<$ty>())
                .map(LittleEndian::$read)
                .collect())
        }
    };
}

impl Value {
    /// Build a value from pre-encoded little-endian bytes.
    ///
    /// # Returns
    /// The value, or [`HicError::MalformedLayout`] if the byte length does
    /// not match `shape` and the element size.
    pub fn new(scalar: ScalarType, shape: Vec<u64>, bytes: Vec<u8>) -> Result<Self, HicError> {
        let expected = byte_len(scalar, &shape).ok_or_else(|| {
            HicError::MalformedLayout(format!(
                "shape {shape:?} of {} exceeds the addressable size",
                scalar.name()
            ))
        })?;
        if scalar != ScalarType::Str && bytes.len() as u64 != expected {
            return Err(HicError::MalformedLayout(format!(
                "payload of {} bytes does not match shape {:?} of {}",
                bytes.len(),
                shape,
                scalar.name()
            )));
        }
        Ok(Value {
            scalar,
            shape,
            payload: Payload::Inline(bytes),
        })
    }

    /// A zero-filled value of the given shape, used when a dataset is
    /// created before any region of it is written.
    pub fn zeroed(scalar: ScalarType, shape: Vec<u64>) -> Value {
        let len = shape.iter().product::<u64>() as usize * scalar.elem_size();
        Value {
            scalar,
            shape,
            payload: Payload::Inline(vec![0u8; len]),
        }
    }

    vector_ctor!(vector_i16, i16, ScalarType::I16);
    vector_ctor!(vector_u16, u16, ScalarType::U16);
    vector_ctor!(vector_i32, i32, ScalarType::I32);
    vector_ctor!(vector_u32, u32, ScalarType::U32);
    vector_ctor!(vector_i64, i64, ScalarType::I64);
    vector_ctor!(vector_u64, u64, ScalarType::U64);
    vector_ctor!(vector_f32, f32, ScalarType::F32);
    vector_ctor!(vector_f64, f64, ScalarType::F64);

    pub fn vector_i8(vals: &[i8]) -> Value {
        let buf: Vec<u8> = vals.iter().map(|v| *v as u8).collect();
        Value {
            scalar:  ScalarType::I8,
            shape:   vec![vals.len() as u64],
            payload: Payload::Inline(buf),
        }
    }

    pub fn vector_u8(vals: &[u8]) -> Value {
        Value {
            scalar:  ScalarType::U8,
            shape:   vec![vals.len() as u64],
            payload: Payload::Inline(vals.to_vec()),
        }
    }

    pub fn string(s: &str) -> Value {
        Value {
            scalar:  ScalarType::Str,
            shape:   vec![1],
            payload: Payload::Inline(s.as_bytes().to_vec()),
        }
    }

    /// A 2-D row-major f64 matrix with shape `[rows, cols]`.
    pub fn matrix_f64(rows: u64, cols: u64, data: &[f64]) -> Result<Value, HicError> {
        if data.len() as u64 != rows * cols {
            return Err(HicError::MalformedLayout(format!(
                "matrix payload has {} elements, expected {}",
                data.len(),
                rows * cols
            )));
        }
        let mut buf = Vec::with_capacity(data.len() * 8);
        for v in data {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Ok(Value {
            scalar:  ScalarType::F64,
            shape:   vec![rows, cols],
            payload: Payload::Inline(buf),
        })
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn n_elements(&self) -> u64 {
        self.shape.iter().product()
    }

    /// Inline payload bytes. Attribute values and read-write datasets are
    /// always inline; mapped dataset payloads must be resolved through the
    /// owning [`super::ContainerFile`].
    pub fn inline_bytes(&self) -> Result<&[u8], HicError> {
        match &self.payload {
            Payload::Inline(b) => Ok(b),
            Payload::Mapped { .. } => Err(HicError::MalformedLayout(
                "mapped payload accessed without its container file".into(),
            )),
        }
    }

    exact_reader!(as_i16s, i16, ScalarType::I16, read_i16);
    exact_reader!(as_u16s, u16, ScalarType::U16, read_u16);
    exact_reader!(as_i32s, i32, ScalarType::I32, read_i32);
    exact_reader!(as_u32s, u32, ScalarType::U32, read_u32);
    exact_reader!(as_i64s, i64, ScalarType::I64, read_i64);
    exact_reader!(as_u64s, u64, ScalarType::U64, read_u64);
    exact_reader!(as_f32s, f32, ScalarType::F32, read_f32);
    exact_reader!(as_f64s, f64, ScalarType::F64, read_f64);

    pub fn as_i8s(&self) -> Result<Vec<i8>, HicError> {
        if self.scalar != ScalarType::I8 {
            return Err(HicError::MalformedLayout(format!(
                "expected i8 payload, found {}",
                self.scalar.name()
            )));
        }
        Ok(self.inline_bytes()?.iter().map(|b| *b as i8).collect())
    }

    pub fn as_u8s(&self) -> Result<Vec<u8>, HicError> {
        if self.scalar != ScalarType::U8 {
            return Err(HicError::MalformedLayout(format!(
                "expected u8 payload, found {}",
                self.scalar.name()
            )));
        }
        Ok(self.inline_bytes()?.to_vec())
    }

    pub fn as_string(&self) -> Result<String, HicError> {
        if self.scalar != ScalarType::Str {
            return Err(HicError::MalformedLayout(format!(
                "expected string payload, found {}",
                self.scalar.name()
            )));
        }
        String::from_utf8(self.inline_bytes()?.to_vec())
            .map_err(|e| HicError::MalformedLayout(format!("invalid UTF-8 in string value: {e}")))
    }

    /// Decode any numeric payload to f64, converting element-wise.
    ///
    /// Mirrors the automatic numeric conversion container libraries apply
    /// when an attribute is read with a wider target type.
    pub fn to_f64_vec(&self) -> Result<Vec<f64>, HicError> {
        let bytes = self.inline_bytes()?;
        let n = self.n_elements() as usize;
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            out.push(self.element_as_f64(bytes, i)?);
        }
        Ok(out)
    }

    /// Decode any integer payload to u64, converting element-wise.
    pub fn to_u64_vec(&self) -> Result<Vec<u64>, HicError> {
        let bytes = self.inline_bytes()?;
        let n = self.n_elements() as usize;
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            let off = i * self.scalar.elem_size();
            let v = match self.scalar {
                ScalarType::I8 => bytes[off] as i8 as u64,
                ScalarType::U8 => bytes[off] as u64,
                ScalarType::I16 => LittleEndian::read_i16(&bytes[off..]) as u64,
                ScalarType::U16 => LittleEndian::read_u16(&bytes[off..]) as u64,
                ScalarType::I32 => LittleEndian::read_i32(&bytes[off..]) as u64,
                ScalarType::U32 => LittleEndian::read_u32(&bytes[off..]) as u64,
                ScalarType::I64 => LittleEndian::read_i64(&bytes[off..]) as u64,
                ScalarType::U64 => LittleEndian::read_u64(&bytes[off..]),
                other => {
                    return Err(HicError::MalformedLayout(format!(
                        "expected an integer payload, found {}",
                        other.name()
                    )));
                }
            };
            out.push(v);
        }
        Ok(out)
    }

    fn element_as_f64(&self, bytes: &[u8], i: usize) -> Result<f64, HicError> {
        let off = i * self.scalar.elem_size();
        Ok(match self.scalar {
            ScalarType::I8 => bytes[off] as i8 as f64,
            ScalarType::U8 => bytes[off] as f64,
            ScalarType::I16 => LittleEndian::read_i16(&bytes[off..]) as f64,
            ScalarType::U16 => LittleEndian::read_u16(&bytes[off..]) as f64,
            ScalarType::I32 => LittleEndian::read_i32(&bytes[off..]) as f64,
            ScalarType::U32 => LittleEndian::read_u32(&bytes[off..]) as f64,
            ScalarType::I64 => LittleEndian::read_i64(&bytes[off..]) as f64,
            ScalarType::U64 => LittleEndian::read_u64(&bytes[off..]) as f64,
            ScalarType::F32 => LittleEndian::read_f32(&bytes[off..]) as f64,
            ScalarType::F64 => LittleEndian::read_f64(&bytes[off..]),
            ScalarType::Str => {
                return Err(HicError::MalformedLayout(
                    "expected a numeric payload, found str".into(),
                ));
            }
        })
    }
}

/// A dataset node: one typed N-dimensional value plus named attributes.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub value: Value,
    /// Attributes in insertion order. Attribute payloads are always inline.
    pub attrs: Vec<(String, Value)>,
    /// Deflate level requested for the payload when the file is flushed.
    pub deflate: Option<u32>,
}

impl Dataset {
    pub fn new(value: Value) -> Self {
        Dataset {
            value,
            attrs: Vec::new(),
            deflate: None,
        }
    }

    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.attrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    /// Insert or replace an attribute, keeping its original position when
    /// replacing.
    pub fn set_attr(&mut self, name: &str, value: Value) {
        if let Some(slot) = self.attrs.iter_mut().find(|(n, _)| n == name) {
            slot.1 = value;
        } else {
            self.attrs.push((name.to_string(), value));
        }
    }
}

/// A group node: named children in insertion order.
#[derive(Debug, Clone, Default)]
pub struct Group {
    pub children: Vec<(String, Node)>,
}

#[derive(Debug, Clone)]
pub enum Node {
    Group(Group),
    Dataset(Dataset),
}

impl Node {
    pub fn as_group(&self) -> Option<&Group> {
        match self {
            Node::Group(g) => Some(g),
            Node::Dataset(_) => None,
        }
    }

    pub fn as_group_mut(&mut self) -> Option<&mut Group> {
        match self {
            Node::Group(g) => Some(g),
            Node::Dataset(_) => None,
        }
    }

    pub fn as_dataset(&self) -> Option<&Dataset> {
        match self {
            Node::Dataset(d) => Some(d),
            Node::Group(_) => None,
        }
    }

    pub fn as_dataset_mut(&mut self) -> Option<&mut Dataset> {
        match self {
            Node::Dataset(d) => Some(d),
            Node::Group(_) => None,
        }
    }
}

impl Group {
    pub fn new() -> Self {
        Group::default()
    }

    pub fn get(&self, name: &str) -> Option<&Node> {
        self.children
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, node)| node)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.children
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, node)| node)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn group(&self, name: &str) -> Option<&Group> {
        self.get(name).and_then(Node::as_group)
    }

    pub fn group_mut(&mut self, name: &str) -> Option<&mut Group> {
        self.get_mut(name).and_then(Node::as_group_mut)
    }

    pub fn dataset(&self, name: &str) -> Option<&Dataset> {
        self.get(name).and_then(Node::as_dataset)
    }

    pub fn dataset_mut(&mut self, name: &str) -> Option<&mut Dataset> {
        self.get_mut(name).and_then(Node::as_dataset_mut)
    }

    /// Insert or replace a child, keeping its position when replacing.
    pub fn insert(&mut self, name: &str, node: Node) {
        if let Some(slot) = self.children.iter_mut().find(|(n, _)| n == name) {
            slot.1 = node;
        } else {
            self.children.push((name.to_string(), node));
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Node> {
        let pos = self.children.iter().position(|(n, _)| n == name)?;
        Some(self.children.remove(pos).1)
    }

    /// Child group with the given name, created if missing.
    pub fn ensure_group(&mut self, name: &str) -> &mut Group {
        if !matches!(self.get(name), Some(Node::Group(_))) {
            self.children
                .push((name.to_string(), Node::Group(Group::new())));
        }
        match self.get_mut(name) {
            Some(Node::Group(g)) => g,
            _ => unreachable!("child was just inserted as a group"),
        }
    }
}
