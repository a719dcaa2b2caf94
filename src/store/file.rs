use std::borrow::Cow;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use log::debug;
use memmap2::Mmap;

use crate::error::HicError;
use crate::store::hyperslab::{self, Hyperslab};
use crate::store::node::{byte_len, Dataset, Group, Node, Payload, ScalarType, Value};

/// Signature prefix of a container file, modeled after the HDF5 format
/// signature so that text tools and transfer layers that mangle line
/// endings are detected.
pub const SIGNATURE: [u8; 8] = [0x89, b'H', b'I', b'C', b'\r', b'\n', 0x1a, b'\n'];
/// Current encoding version.
pub const VERSION: u16 = 1;

const TAG_GROUP: u8 = 0;
const TAG_DATASET: u8 = 1;

/// One open container file.
///
/// A read-only session keeps the file memory mapped and leaves dataset
/// payloads as windows into the map (the map is only touched when a
/// hyperslab is read). A read-write session holds the whole tree in
/// memory and rewrites the file on [`ContainerFile::flush`].
pub struct ContainerFile {
    path:     PathBuf,
    root:     Group,
    mmap:     Option<Mmap>,
    writable: bool,
}

impl ContainerFile {
    /// Open an existing container read-only.
    ///
    /// # Returns
    /// The parsed container, [`HicError::NotFound`] if the file is absent,
    /// or [`HicError::MalformedLayout`] if it is not a container file.
    pub fn open(path: &Path) -> Result<Self, HicError> {
        if !path.exists() {
            return Err(HicError::NotFound(path.display().to_string()));
        }
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        let root = parse_tree(&mmap)?;
        Ok(ContainerFile {
            path: path.to_path_buf(),
            root,
            mmap: Some(mmap),
            writable: false,
        })
    }

    /// Create a fresh container, truncating any existing file on the
    /// first flush.
    pub fn create(path: &Path) -> Result<Self, HicError> {
        Ok(ContainerFile {
            path:     path.to_path_buf(),
            root:     Group::new(),
            mmap:     None,
            writable: true,
        })
    }

    /// Open a container read-write, creating it if absent and otherwise
    /// reusing the existing tree.
    pub fn open_rw(path: &Path) -> Result<Self, HicError> {
        if !path.exists() {
            return Self::create(path);
        }
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        let mut root = parse_tree(&mmap)?;
        // materialize every payload so the tree can be mutated and
        // rewritten without the map
        materialize(&mut root, &mmap)?;
        Ok(ContainerFile {
            path: path.to_path_buf(),
            root,
            mmap: None,
            writable: true,
        })
    }

    /// Signature sniff. Never fails: any problem reads as "not a
    /// container file".
    pub fn is_container(path: &Path) -> bool {
        let mut file = match File::open(path) {
            Ok(f) => f,
            Err(_) => return false,
        };
        let mut magic = [0u8; 8];
        match file.read_exact(&mut magic) {
            Ok(()) => magic == SIGNATURE,
            Err(_) => false,
        }
    }

    pub fn writable(&self) -> bool {
        self.writable
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn root(&self) -> &Group {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Group {
        &mut self.root
    }

    /// Look up the node at a slash-separated path. The root itself is a
    /// group, not a node, so the empty path yields `None`.
    pub fn node_at(&self, path: &str) -> Option<&Node> {
        let segs: Vec<&str> = segments(path).collect();
        let (last, parents) = segs.split_last()?;
        let mut g = &self.root;
        for seg in parents {
            g = g.group(seg)?;
        }
        g.get(last)
    }

    /// Group at a slash-separated path; the empty path is the root.
    pub fn group_at(&self, path: &str) -> Option<&Group> {
        let mut g = &self.root;
        for seg in segments(path) {
            g = g.group(seg)?;
        }
        Some(g)
    }

    pub fn group_at_mut(&mut self, path: &str) -> Option<&mut Group> {
        let mut g = &mut self.root;
        for seg in segments(path) {
            g = g.group_mut(seg)?;
        }
        Some(g)
    }

    /// Existence probe. Never errors: any lookup failure is `false`.
    pub fn exists(&self, path: &str) -> bool {
        if segments(path).next().is_none() {
            // the root always exists
            return true;
        }
        self.node_at(path).is_some()
    }

    /// Group at the given path, with missing intermediate groups created
    /// and existing ones reused.
    pub fn ensure_group(&mut self, path: &str) -> &mut Group {
        let segs: Vec<String> = segments(path).map(str::to_string).collect();
        let mut g = &mut self.root;
        for seg in &segs {
            if !g.contains(seg) {
                debug!("creating group: {seg}");
            }
            g = g.ensure_group(seg);
        }
        g
    }

    /// Dataset at a slash-separated path.
    ///
    /// # Returns
    /// The dataset or [`HicError::NotFound`] if the path does not resolve
    /// to one.
    pub fn dataset_at(&self, path: &str) -> Result<&Dataset, HicError> {
        self.node_at(path)
            .and_then(Node::as_dataset)
            .ok_or_else(|| HicError::NotFound(path.to_string()))
    }

    pub fn dataset_at_mut(&mut self, path: &str) -> Result<&mut Dataset, HicError> {
        let segs: Vec<&str> = segments(path).collect();
        let Some((last, parents)) = segs.split_last() else {
            return Err(HicError::NotFound(path.to_string()));
        };
        let mut g = &mut self.root;
        for seg in parents {
            g = g
                .group_mut(seg)
                .ok_or_else(|| HicError::NotFound(path.to_string()))?;
        }
        g.dataset_mut(last)
            .ok_or_else(|| HicError::NotFound(path.to_string()))
    }

    /// Create a dataset inside `group_path`, creating intermediate groups
    /// on demand. Fails with [`HicError::AlreadyExists`] if the name is
    /// taken; removal is the caller's overwrite policy.
    pub fn create_dataset(
        &mut self,
        group_path: &str,
        name: &str,
        value: Value,
        deflate: Option<u32>,
    ) -> Result<(), HicError> {
        let group = self.ensure_group(group_path);
        if group.contains(name) {
            return Err(HicError::AlreadyExists(name.to_string()));
        }
        let mut ds = Dataset::new(value);
        ds.deflate = deflate;
        group.insert(name, Node::Dataset(ds));
        Ok(())
    }

    /// Resolve the raw payload bytes of a value, inflating mapped
    /// compressed payloads on the fly.
    pub fn payload_bytes<'a>(&'a self, value: &'a Value) -> Result<Cow<'a, [u8]>, HicError> {
        match &value.payload {
            Payload::Inline(b) => Ok(Cow::Borrowed(b)),
            Payload::Mapped {
                offset,
                len,
                deflated,
                raw_len,
            } => {
                let mmap = self.mmap.as_ref().ok_or_else(|| {
                    HicError::MalformedLayout("mapped payload without a memory map".into())
                })?;
                let stored = &mmap[*offset..*offset + *len];
                if *deflated {
                    Ok(Cow::Owned(inflate(stored, *raw_len)?))
                } else {
                    Ok(Cow::Borrowed(stored))
                }
            }
        }
    }

    /// Read a hyperslab selection of a dataset into a compact buffer.
    pub fn read_hyperslab(
        &self,
        dataset_path: &str,
        slab: &Hyperslab,
        dest: &mut [u8],
    ) -> Result<(), HicError> {
        let ds = self.dataset_at(dataset_path)?;
        let payload = self.payload_bytes(&ds.value)?;
        hyperslab::copy_from(
            &payload,
            &ds.value.shape,
            ds.value.scalar.elem_size(),
            slab,
            dest,
        )
    }

    /// Write a compact buffer into a hyperslab selection of a dataset.
    pub fn write_hyperslab(
        &mut self,
        dataset_path: &str,
        slab: &Hyperslab,
        src: &[u8],
    ) -> Result<(), HicError> {
        if !self.writable {
            return Err(read_only_error());
        }
        let ds = self.dataset_at_mut(dataset_path)?;
        let shape = ds.value.shape.clone();
        let elem_size = ds.value.scalar.elem_size();
        match &mut ds.value.payload {
            Payload::Inline(buf) => hyperslab::copy_into(buf, &shape, elem_size, slab, src),
            Payload::Mapped { .. } => Err(HicError::MalformedLayout(
                "dataset payload is not writable".into(),
            )),
        }
    }

    /// Serialize the tree and atomically replace the file on disk.
    pub fn flush(&mut self) -> Result<(), HicError> {
        if !self.writable {
            return Err(read_only_error());
        }
        let mut buf = Vec::new();
        buf.extend_from_slice(&SIGNATURE);
        buf.write_u16::<LittleEndian>(VERSION)?;
        encode_group(&self.root, &mut buf)?;

        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&buf)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        debug!("flushed {} bytes to {}", buf.len(), self.path.display());
        Ok(())
    }
}

fn read_only_error() -> HicError {
    HicError::Io(std::io::Error::new(
        std::io::ErrorKind::PermissionDenied,
        "container file is open read-only",
    ))
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

// ---------------------------------------------------------------------------
// binary encoding
// ---------------------------------------------------------------------------

fn encode_group(group: &Group, out: &mut Vec<u8>) -> Result<(), HicError> {
    out.write_u32::<LittleEndian>(group.children.len() as u32)?;
    for (name, node) in &group.children {
        match node {
            Node::Group(g) => {
                out.write_u8(TAG_GROUP)?;
                encode_name(name, out)?;
                encode_group(g, out)?;
            }
            Node::Dataset(d) => {
                out.write_u8(TAG_DATASET)?;
                encode_name(name, out)?;
                encode_dataset(d, out)?;
            }
        }
    }
    Ok(())
}

fn encode_name(name: &str, out: &mut Vec<u8>) -> Result<(), HicError> {
    let bytes = name.as_bytes();
    if bytes.len() > u16::MAX as usize {
        return Err(HicError::MalformedLayout(format!(
            "node name of {} bytes exceeds the encoding limit",
            bytes.len()
        )));
    }
    out.write_u16::<LittleEndian>(bytes.len() as u16)?;
    out.extend_from_slice(bytes);
    Ok(())
}

fn encode_value_header(value: &Value, out: &mut Vec<u8>) -> Result<(), HicError> {
    out.write_u8(value.scalar.to_u8())?;
    out.write_u16::<LittleEndian>(value.shape.len() as u16)?;
    for dim in &value.shape {
        out.write_u64::<LittleEndian>(*dim)?;
    }
    Ok(())
}

fn encode_dataset(ds: &Dataset, out: &mut Vec<u8>) -> Result<(), HicError> {
    encode_value_header(&ds.value, out)?;

    out.write_u16::<LittleEndian>(ds.attrs.len() as u16)?;
    for (name, attr) in &ds.attrs {
        encode_name(name, out)?;
        encode_value_header(attr, out)?;
        let bytes = attr.inline_bytes()?;
        out.write_u32::<LittleEndian>(bytes.len() as u32)?;
        out.extend_from_slice(bytes);
    }

    let raw = ds.value.inline_bytes()?;
    match ds.deflate {
        Some(level) => {
            let stored = deflate(raw, level)?;
            out.write_u8(1)?;
            out.write_u32::<LittleEndian>(level)?;
            out.write_u64::<LittleEndian>(raw.len() as u64)?;
            out.write_u64::<LittleEndian>(stored.len() as u64)?;
            out.extend_from_slice(&stored);
        }
        None => {
            out.write_u8(0)?;
            out.write_u64::<LittleEndian>(raw.len() as u64)?;
            out.write_u64::<LittleEndian>(raw.len() as u64)?;
            out.extend_from_slice(raw);
        }
    }
    Ok(())
}

fn deflate(raw: &[u8], level: u32) -> Result<Vec<u8>, HicError> {
    let mut enc = DeflateEncoder::new(Vec::new(), Compression::new(level.min(9)));
    enc.write_all(raw)?;
    Ok(enc.finish()?)
}

fn inflate(stored: &[u8], raw_len: usize) -> Result<Vec<u8>, HicError> {
    let mut out = Vec::with_capacity(raw_len);
    DeflateDecoder::new(stored).read_to_end(&mut out)?;
    if out.len() != raw_len {
        return Err(HicError::MalformedLayout(format!(
            "compressed payload inflated to {} bytes, expected {}",
            out.len(),
            raw_len
        )));
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// binary decoding
// ---------------------------------------------------------------------------

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn need(&self, n: usize) -> Result<(), HicError> {
        if self.pos + n > self.buf.len() {
            return Err(HicError::TooShortBuffer {
                actual:   self.buf.len(),
                expected: self.pos + n,
            });
        }
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], HicError> {
        self.need(n)?;
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8, HicError> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, HicError> {
        let mut b = self.take(2)?;
        Ok(b.read_u16::<LittleEndian>()?)
    }

    fn read_u32(&mut self) -> Result<u32, HicError> {
        let mut b = self.take(4)?;
        Ok(b.read_u32::<LittleEndian>()?)
    }

    fn read_u64(&mut self) -> Result<u64, HicError> {
        let mut b = self.take(8)?;
        Ok(b.read_u64::<LittleEndian>()?)
    }

    fn read_name(&mut self) -> Result<String, HicError> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| HicError::MalformedLayout(format!("invalid UTF-8 in node name: {e}")))
    }
}

fn parse_tree(data: &[u8]) -> Result<Group, HicError> {
    if data.len() < SIGNATURE.len() || data[..SIGNATURE.len()] != SIGNATURE {
        return Err(HicError::MalformedLayout(
            "missing container signature".into(),
        ));
    }
    let mut rd = Reader {
        buf: data,
        pos: SIGNATURE.len(),
    };
    let version = rd.read_u16()?;
    if version != VERSION {
        return Err(HicError::MalformedLayout(format!(
            "unsupported container version {version}"
        )));
    }
    parse_group(&mut rd)
}

fn parse_group(rd: &mut Reader<'_>) -> Result<Group, HicError> {
    let n_children = rd.read_u32()?;
    let mut group = Group::new();
    for _ in 0..n_children {
        let tag = rd.read_u8()?;
        let name = rd.read_name()?;
        let node = match tag {
            TAG_GROUP => Node::Group(parse_group(rd)?),
            TAG_DATASET => Node::Dataset(parse_dataset(rd)?),
            n => {
                return Err(HicError::MalformedLayout(format!(
                    "unknown node tag {n} for \"{name}\""
                )));
            }
        };
        group.children.push((name, node));
    }
    Ok(group)
}

fn parse_value_header(rd: &mut Reader<'_>) -> Result<(ScalarType, Vec<u64>), HicError> {
    let scalar = ScalarType::from_u8(rd.read_u8()?)?;
    let rank = rd.read_u16()? as usize;
    let mut shape = Vec::with_capacity(rank);
    for _ in 0..rank {
        shape.push(rd.read_u64()?);
    }
    Ok((scalar, shape))
}

fn parse_dataset(rd: &mut Reader<'_>) -> Result<Dataset, HicError> {
    let (scalar, shape) = parse_value_header(rd)?;

    let n_attrs = rd.read_u16()?;
    let mut attrs = Vec::with_capacity(n_attrs as usize);
    for _ in 0..n_attrs {
        let name = rd.read_name()?;
        let (attr_scalar, attr_shape) = parse_value_header(rd)?;
        let len = rd.read_u32()? as usize;
        let bytes = rd.take(len)?.to_vec();
        attrs.push((name, Value::new(attr_scalar, attr_shape, bytes)?));
    }

    let flag = rd.read_u8()?;
    let (deflated, level) = match flag {
        0 => (false, None),
        1 => (true, Some(rd.read_u32()?)),
        n => {
            return Err(HicError::MalformedLayout(format!(
                "unknown payload compression flag {n}"
            )));
        }
    };
    let raw_len = rd.read_u64()? as usize;
    let stored_len = rd.read_u64()? as usize;
    let offset = rd.pos;
    rd.take(stored_len)?;

    if !deflated && scalar != ScalarType::Str && byte_len(scalar, &shape) != Some(raw_len as u64) {
        return Err(HicError::MalformedLayout(format!(
            "dataset payload of {raw_len} bytes does not match shape {shape:?} of {}",
            scalar.name()
        )));
    }

    Ok(Dataset {
        value: Value {
            scalar,
            shape,
            payload: Payload::Mapped {
                offset,
                len: stored_len,
                deflated,
                raw_len,
            },
        },
        attrs,
        deflate: level,
    })
}

/// Replace every mapped payload with an inline copy (inflating if
/// needed) so the tree no longer references the memory map.
fn materialize(group: &mut Group, data: &[u8]) -> Result<(), HicError> {
    for (_, node) in &mut group.children {
        match node {
            Node::Group(g) => materialize(g, data)?,
            Node::Dataset(d) => {
                if let Payload::Mapped {
                    offset,
                    len,
                    deflated,
                    raw_len,
                } = d.value.payload
                {
                    let stored = &data[offset..offset + len];
                    let raw = if deflated {
                        inflate(stored, raw_len)?
                    } else {
                        stored.to_vec()
                    };
                    d.value.payload = Payload::Inline(raw);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // hand-assembled stream: one uncompressed dataset named "data" whose
    // declared shape does not fit in 64 bits of bytes
    #[test]
    fn oversized_dataset_shape_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&SIGNATURE);
        buf.extend_from_slice(&VERSION.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.push(TAG_DATASET);
        buf.extend_from_slice(&4u16.to_le_bytes());
        buf.extend_from_slice(b"data");
        buf.push(ScalarType::U64.to_u8());
        buf.extend_from_slice(&2u16.to_le_bytes());
        buf.extend_from_slice(&u64::MAX.to_le_bytes());
        buf.extend_from_slice(&2u64.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.push(0);
        buf.extend_from_slice(&8u64.to_le_bytes());
        buf.extend_from_slice(&8u64.to_le_bytes());
        buf.extend_from_slice(&[0u8; 8]);

        let err = parse_tree(&buf).unwrap_err();
        assert!(matches!(err, HicError::MalformedLayout(_)));
    }
}
