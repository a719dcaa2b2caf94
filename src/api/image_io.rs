use std::path::Path;

use log::debug;

use crate::error::HicError;
use crate::layout::geometry::{self, ImageDescriptor};
use crate::layout::meta::{self, MetaDict, META_GROUP};
use crate::layout::path;
use crate::layout::region::{map_region, DatasetOverrides, RegionRequest};
use crate::store::ContainerFile;
use crate::store::Value;

/// File extensions the codec claims for writing.
pub const SUPPORTED_EXTENSIONS: [&str; 8] =
    ["hdf", "h4", "hdf4", "h5", "hdf5", "he4", "he5", "hd5"];

const DEFAULT_COMPRESSION_LEVEL: u32 = 5;
const MAX_COMPRESSION_LEVEL: u32 = 9;

/// One image read/write session against a container file.
///
/// The session owns the open file handle and sequences the
/// information-once-then-data protocol: geometry and metadata are written
/// exactly once per session ([`ImageIo::write_information`] is guarded),
/// voxel regions any number of times. Reconfiguring the session and
/// calling [`ImageIo::read_information`] again reopens the file from
/// scratch; any previously open handle is closed first.
pub struct ImageIo {
    file_name:         String,
    path:              String,
    dataset_name:      String,
    overwrite:         bool,
    re_create:         bool,
    use_metadata:      bool,
    use_compression:   bool,
    compression_level: u32,
    overrides:         DatasetOverrides,
    io_region:         Option<RegionRequest>,
    descriptor:        ImageDescriptor,
    dictionary:        MetaDict,
    file:              Option<ContainerFile>,
    info_written:      bool,
    inferred_dims:     bool,
}

impl ImageIo {
    /// New session against `file_name`, with the default layout: root
    /// group `/`, dataset `data`, no metadata, no compression, no
    /// overwrite.
    pub fn new(file_name: &str) -> Self {
        ImageIo {
            file_name:         file_name.to_string(),
            path:              "/".to_string(),
            dataset_name:      "data".to_string(),
            overwrite:         false,
            re_create:         false,
            use_metadata:      false,
            use_compression:   false,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            overrides:         DatasetOverrides::none(),
            io_region:         None,
            descriptor:        ImageDescriptor::new(0),
            dictionary:        MetaDict::new(),
            file:              None,
            info_written:      false,
            inferred_dims:     false,
        }
    }

    /// Whether the file exists and starts with the container signature.
    /// A probe: never panics and never returns an error.
    pub fn can_read(file_name: &str) -> bool {
        ContainerFile::is_container(Path::new(file_name))
    }

    /// Whether the file name carries one of the supported extensions.
    pub fn can_write(file_name: &str) -> bool {
        let ext = match Path::new(file_name).extension().and_then(|e| e.to_str()) {
            Some(e) => e,
            None => return false,
        };
        SUPPORTED_EXTENSIONS
            .iter()
            .any(|s| s.eq_ignore_ascii_case(ext))
    }

    // ------------------------------------------------------------------
    // configuration
    // ------------------------------------------------------------------

    /// Root group path holding the image dataset.
    pub fn set_path(&mut self, path: &str) {
        self.path = path.to_string();
    }

    pub fn set_dataset_name(&mut self, name: &str) {
        self.dataset_name = name.to_string();
    }

    /// Allow replacing an existing dataset or metadata group on write.
    pub fn set_overwrite(&mut self, overwrite: bool) {
        self.overwrite = overwrite;
    }

    /// Discard any existing file content on write instead of reusing the
    /// existing tree.
    pub fn set_re_create(&mut self, re_create: bool) {
        self.re_create = re_create;
    }

    /// Persist and reconstruct the metadata dictionary. When enabled on
    /// read, a missing metadata group is an error.
    pub fn set_use_metadata(&mut self, use_metadata: bool) {
        self.use_metadata = use_metadata;
    }

    pub fn set_use_compression(&mut self, use_compression: bool) {
        self.use_compression = use_compression;
    }

    /// Deflate level for the voxel dataset, clamped to 9.
    pub fn set_compression_level(&mut self, level: u32) {
        self.compression_level = level.min(MAX_COMPRESSION_LEVEL);
    }

    /// Per-axis stored offset/size/stride overrides, host axis order.
    pub fn set_overrides(&mut self, overrides: DatasetOverrides) {
        self.overrides = overrides;
    }

    /// Restrict reads and writes to a sub-region of the image. `None`
    /// means the full image extent.
    pub fn set_io_region(&mut self, region: Option<RegionRequest>) {
        self.io_region = region;
    }

    pub fn set_descriptor(&mut self, descriptor: ImageDescriptor) {
        self.descriptor = descriptor;
    }

    pub fn descriptor(&self) -> &ImageDescriptor {
        &self.descriptor
    }

    pub fn dictionary(&self) -> &MetaDict {
        &self.dictionary
    }

    pub fn dictionary_mut(&mut self) -> &mut MetaDict {
        &mut self.dictionary
    }

    /// Whether the last [`ImageIo::read_information`] derived the
    /// dimensionality from the dataset shape instead of an explicit
    /// `Dimension` attribute.
    pub fn dimensions_inferred(&self) -> bool {
        self.inferred_dims
    }

    /// Close the file handle, if any. Dropping the session does the same.
    pub fn close(&mut self) {
        self.file = None;
    }

    fn dataset_path(&self) -> String {
        path::join(&self.path, &self.dataset_name)
    }

    fn meta_path(&self) -> String {
        path::join(&self.path, META_GROUP)
    }

    // ------------------------------------------------------------------
    // read path
    // ------------------------------------------------------------------

    /// Whether the image dataset exists in the file. Opens a transient
    /// read-only handle; the session's own handle and guard state are
    /// untouched. A probe: any failure reads as `false`.
    pub fn dataset_exists(&self) -> bool {
        match ContainerFile::open(Path::new(&self.file_name)) {
            Ok(file) => file.exists(&self.dataset_path()),
            Err(_) => false,
        }
    }

    /// Open the file read-only and populate the descriptor and, when
    /// metadata use is enabled, the dictionary.
    ///
    /// Callable repeatedly on a reused session: any previously open
    /// handle is closed first and the dictionary is cleared before it is
    /// repopulated. On failure the session holds no open handle.
    pub fn read_information(&mut self) -> Result<(), HicError> {
        self.file = None;
        self.dictionary.clear();

        let file = ContainerFile::open(Path::new(&self.file_name))?;
        let ds = file.dataset_at(&self.dataset_path())?;
        let (descriptor, inferred) = geometry::read_geometry(ds, &self.overrides)?;
        debug!(
            "read {}-d {} image information from {}",
            descriptor.n_dims(),
            descriptor.component_type.name(),
            self.file_name
        );
        self.descriptor = descriptor;
        self.inferred_dims = inferred;

        if self.use_metadata {
            self.dictionary = meta::read_meta(&file, &self.meta_path())?;
        }
        self.file = Some(file);
        Ok(())
    }

    /// Read the configured region into `dest`, which must hold exactly
    /// the region's voxels in host axis order (components fastest).
    ///
    /// Opens the file via [`ImageIo::read_information`] if the session
    /// has no handle yet.
    pub fn read(&mut self, dest: &mut [u8]) -> Result<(), HicError> {
        if self.file.is_none() {
            self.read_information()?;
        }
        let dataset_path = self.dataset_path();
        let region = match &self.io_region {
            Some(r) => r.clone(),
            None => RegionRequest::full(&self.descriptor.dimensions),
        };
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| HicError::NotFound(self.file_name.clone()))?;
        let ds = file.dataset_at(&dataset_path)?;
        let slab = map_region(
            &region,
            &self.overrides,
            self.descriptor.components,
            ds.value.rank(),
        );
        file.read_hyperslab(&dataset_path, &slab, dest)
    }

    // ------------------------------------------------------------------
    // write path
    // ------------------------------------------------------------------

    /// Open the file read-write and persist the image structure: the
    /// voxel dataset (zero-filled), its four geometry attributes and,
    /// when enabled, the metadata dictionary.
    ///
    /// Runs once per session; subsequent calls are no-ops. Writing a
    /// dataset or metadata group name that is already taken fails with
    /// [`HicError::AlreadyExists`] unless overwrite is set, in which
    /// case the old nodes are replaced. On failure the session holds no
    /// open handle.
    pub fn write_information(&mut self) -> Result<(), HicError> {
        if self.info_written {
            return Ok(());
        }
        self.file = None;

        let file_path = Path::new(&self.file_name);
        let mut file = if self.re_create {
            ContainerFile::create(file_path)?
        } else {
            ContainerFile::open_rw(file_path)?
        };

        let group = file.ensure_group(&self.path);
        if group.contains(&self.dataset_name) {
            if !self.overwrite {
                return Err(HicError::AlreadyExists(self.dataset_path()));
            }
            group.remove(&self.dataset_name);
        }
        if group.contains(META_GROUP) {
            if !self.overwrite {
                return Err(HicError::AlreadyExists(self.meta_path()));
            }
            group.remove(META_GROUP);
        }

        let deflate = if self.use_compression {
            Some(self.compression_level.min(MAX_COMPRESSION_LEVEL))
        } else {
            None
        };
        let value = Value::zeroed(
            self.descriptor.component_type.encode(),
            self.descriptor.disk_shape(),
        );
        file.create_dataset(&self.path, &self.dataset_name, value, deflate)?;

        let ds = file.dataset_at_mut(&self.dataset_path())?;
        geometry::write_geometry(ds, &self.descriptor)?;

        if self.use_metadata {
            meta::write_meta(&mut file, &self.meta_path(), &self.dictionary)?;
        }

        file.flush()?;
        debug!(
            "wrote image information for {} to {}",
            self.dataset_path(),
            self.file_name
        );
        self.file = Some(file);
        self.info_written = true;
        Ok(())
    }

    /// Write `src` into the configured region, persisting the image
    /// structure first via [`ImageIo::write_information`] if this
    /// session has not done so yet.
    pub fn write(&mut self, src: &[u8]) -> Result<(), HicError> {
        self.write_information()?;
        let dataset_path = self.dataset_path();
        let region = match &self.io_region {
            Some(r) => r.clone(),
            None => RegionRequest::full(&self.descriptor.dimensions),
        };
        let slab = map_region(
            &region,
            &self.overrides,
            self.descriptor.components,
            self.descriptor.disk_shape().len(),
        );
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| HicError::NotFound(self.file_name.clone()))?;
        file.write_hyperslab(&dataset_path, &slab, src)?;
        file.flush()
    }
}
