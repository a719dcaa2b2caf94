use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::HicError;
use crate::store::{ContainerFile, Group, Node, ScalarType};

/// One dataset listed by a [`ContainerIndex`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetEntry {
    /// Absolute slash-separated path of the dataset.
    pub path:       String,
    pub scalar:     ScalarType,
    /// Shape, slowest-moving axis first.
    pub shape:      Vec<u64>,
    /// Attribute names in file order.
    pub attributes: Vec<String>,
}

/// A lightweight structural index of a container file.
///
/// Built from the node tree alone, without touching any dataset payload,
/// so indexing a large file is cheap. The index serializes to JSON and
/// back, which makes it usable as a sidecar manifest for containers kept
/// on slow storage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerIndex {
    pub datasets: Vec<DatasetEntry>,
}

impl ContainerIndex {
    /// Index the container at `path`.
    ///
    /// # Returns
    /// The index, or the [`HicError`] from opening or parsing the file.
    pub fn build(path: &Path) -> Result<Self, HicError> {
        let file = ContainerFile::open(path)?;
        let mut index = ContainerIndex::default();
        walk(file.root(), "", &mut index.datasets);
        Ok(index)
    }

    pub fn find(&self, path: &str) -> Option<&DatasetEntry> {
        self.datasets.iter().find(|e| e.path == path)
    }

    pub fn to_json(&self) -> Result<String, HicError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| HicError::MalformedLayout(format!("index serialization failed: {e}")))
    }

    pub fn from_json(json: &str) -> Result<Self, HicError> {
        serde_json::from_str(json)
            .map_err(|e| HicError::MalformedLayout(format!("index deserialization failed: {e}")))
    }
}

fn walk(group: &Group, prefix: &str, out: &mut Vec<DatasetEntry>) {
    for (name, node) in &group.children {
        let path = format!("{prefix}/{name}");
        match node {
            Node::Group(g) => walk(g, &path, out),
            Node::Dataset(d) => out.push(DatasetEntry {
                path,
                scalar: d.value.scalar,
                shape: d.value.shape.clone(),
                attributes: d.attrs.iter().map(|(n, _)| n.clone()).collect(),
            }),
        }
    }
}
