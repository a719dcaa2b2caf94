use log::debug;

use crate::store::Hyperslab;

/// A requested sub-region of the image, in host axis order
/// (fastest-moving first). `index` is the per-axis start offset and
/// `size` the per-axis extent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionRequest {
    pub index: Vec<u64>,
    pub size:  Vec<u64>,
}

impl RegionRequest {
    /// The region covering a whole image with the given host-order
    /// dimensions.
    pub fn full(dimensions: &[u64]) -> Self {
        RegionRequest {
            index: vec![0; dimensions.len()],
            size:  dimensions.to_vec(),
        }
    }

    pub fn n_dims(&self) -> usize {
        self.index.len()
    }
}

/// Caller-supplied per-axis overrides for the stored selection, in host
/// axis order. When a vector is present it takes precedence over the
/// region's own offset/extent (and unit stride) for every axis.
#[derive(Debug, Clone, Default)]
pub struct DatasetOverrides {
    pub offset: Option<Vec<u64>>,
    pub size:   Option<Vec<u64>>,
    pub stride: Option<Vec<u64>>,
}

impl DatasetOverrides {
    pub fn none() -> Self {
        DatasetOverrides::default()
    }

    pub fn is_any(&self) -> bool {
        self.offset.is_some() || self.size.is_some() || self.stride.is_some()
    }
}

/// Map a host-order region onto an on-disk hyperslab selection.
///
/// On-disk axes are listed slowest-moving first, so spatial axes are
/// reversed one-to-one. When `components > 1` the fastest on-disk axis
/// is the component axis: it selects all components and is not part of
/// the spatial mapping. Any on-disk axis beyond the region's
/// dimensionality defaults to offset 0, extent 1 (this occurs when the
/// in-memory region has fewer axes than the on-disk array).
///
/// # Arguments
/// * `region` - Requested region in host axis order.
/// * `overrides` - Stored offset/size/stride overrides; each collection
///   that is present replaces the region's own values on every axis.
/// * `components` - Components per voxel.
/// * `disk_rank` - Rank of the on-disk dataset.
///
/// # Returns
/// The hyperslab selection over the on-disk array. The compact
/// destination buffer holds exactly `n_elements()` elements of the
/// selection, in on-disk axis order.
pub fn map_region(
    region: &RegionRequest,
    overrides: &DatasetOverrides,
    components: u64,
    disk_rank: usize,
) -> Hyperslab {
    let mut slab = Hyperslab {
        offset: vec![0u64; disk_rank],
        count:  vec![1u64; disk_rank],
        stride: vec![1u64; disk_rank],
    };

    let limit = region.n_dims();
    let mut i = 0usize;

    // fastest moving on-disk axis is the intra-voxel component index
    if components > 1 && disk_rank > 0 {
        slab.offset[disk_rank - 1] = 0;
        slab.count[disk_rank - 1] = components;
        i += 1;
    }

    let mut j = 0usize;
    while j < limit && i < disk_rank {
        let d = disk_rank - i - 1;
        slab.offset[d] = match &overrides.offset {
            Some(o) => o[j],
            None => region.index[j],
        };
        slab.count[d] = match &overrides.size {
            Some(s) => s[j],
            None => region.size[j],
        };
        slab.stride[d] = match &overrides.stride {
            Some(s) => s[j],
            None => 1,
        };
        i += 1;
        j += 1;
    }

    // surplus on-disk axes select a single leading element
    while i < disk_rank {
        let d = disk_rank - i - 1;
        slab.offset[d] = 0;
        slab.count[d] = 1;
        slab.stride[d] = 1;
        i += 1;
    }

    debug!(
        "mapped region {:?}+{:?} (components {components}) to hyperslab {slab:?}",
        region.index, region.size
    );
    slab
}
