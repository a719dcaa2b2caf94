use log::debug;

use crate::error::HicError;
use crate::layout::region::DatasetOverrides;
use crate::layout::types::ComponentType;
use crate::store::{Dataset, Value};

// Attribute names defining the image layout inside the container.
pub const ORIGIN: &str = "Origin";
pub const SPACING: &str = "Spacing";
pub const DIRECTIONS: &str = "Directions";
pub const DIMENSION: &str = "Dimension";

/// Geometry and typing of one N-dimensional image.
///
/// `dimensions`, `spacing` and `origin` are in host axis order
/// (fastest-moving first) and all have length N; `directions` is the
/// row-major N x N direction-cosine matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageDescriptor {
    pub dimensions:     Vec<u64>,
    pub spacing:        Vec<f64>,
    pub origin:         Vec<f64>,
    pub directions:     Vec<Vec<f64>>,
    pub components:     u64,
    pub component_type: ComponentType,
}

impl ImageDescriptor {
    /// Descriptor defaults for an N-dimensional image: zero extent, unit
    /// spacing, zero origin, identity directions, one uint8 component.
    pub fn new(n_dims: usize) -> Self {
        let directions = (0..n_dims)
            .map(|i| {
                (0..n_dims)
                    .map(|j| if i == j { 1.0 } else { 0.0 })
                    .collect()
            })
            .collect();
        ImageDescriptor {
            dimensions: vec![0; n_dims],
            spacing: vec![1.0; n_dims],
            origin: vec![0.0; n_dims],
            directions,
            components: 1,
            component_type: ComponentType::UInt8,
        }
    }

    pub fn n_dims(&self) -> usize {
        self.dimensions.len()
    }

    /// Number of bytes one full image buffer occupies.
    pub fn image_size_in_bytes(&self) -> usize {
        self.dimensions.iter().product::<u64>() as usize
            * self.components as usize
            * self.component_type.size()
    }

    /// On-disk shape for this descriptor: dimensions reversed into
    /// slowest-first order, with a trailing component axis when the
    /// image is non-scalar.
    pub fn disk_shape(&self) -> Vec<u64> {
        let mut shape: Vec<u64> = self.dimensions.iter().rev().copied().collect();
        if self.components > 1 {
            shape.push(self.components);
        }
        shape
    }
}

/// Write the four geometry attributes onto the image dataset.
pub fn write_geometry(ds: &mut Dataset, desc: &ImageDescriptor) -> Result<(), HicError> {
    ds.set_attr(ORIGIN, Value::vector_f64(&desc.origin));
    ds.set_attr(SPACING, Value::vector_f64(&desc.spacing));
    ds.set_attr(DIMENSION, Value::vector_u64(&desc.dimensions));

    let n = desc.directions.len() as u64;
    let flat: Vec<f64> = desc.directions.iter().flatten().copied().collect();
    ds.set_attr(DIRECTIONS, Value::matrix_f64(n, n, &flat)?);
    Ok(())
}

/// Reconstruct an [`ImageDescriptor`] from the image dataset.
///
/// Dimensionality comes from the explicit `Dimension` attribute when
/// present (the trailing on-disk axis is then the component count if the
/// dataset rank exceeds it); otherwise it is inferred from the dataset
/// shape with one component per voxel. Missing `Origin`/`Spacing`/
/// `Directions` attributes fall back to the descriptor defaults.
/// Overrides are validated against the dimensionality and folded into
/// the result: a non-unit stride rescales spacing, and without an
/// explicit size the effective extent becomes `extent / stride - offset`.
///
/// # Returns
/// The descriptor, plus whether the dimensions were inferred from the
/// dataset shape (no `Dimension` attribute present).
pub fn read_geometry(
    ds: &Dataset,
    overrides: &DatasetOverrides,
) -> Result<(ImageDescriptor, bool), HicError> {
    let component_type = ComponentType::decode(ds.value.scalar)?;
    let disk_shape = &ds.value.shape;
    let disk_rank = disk_shape.len();

    let (mut dimensions, components, inferred) = match ds.attr(DIMENSION) {
        Some(attr) => {
            if attr.rank() != 1 {
                return Err(HicError::MalformedLayout(format!(
                    "{DIMENSION} attribute has rank {}, expected 1",
                    attr.rank()
                )));
            }
            let dims = attr.to_u64_vec()?;
            // a non-scalar image adds one trailing on-disk axis that is
            // not reflected in the Dimension attribute
            let components = if disk_rank > dims.len() {
                disk_shape[disk_rank - 1]
            } else {
                1
            };
            (dims, components, false)
        }
        None => {
            // only scalar images can be inferred from the dataset shape;
            // there is no way to tell a component axis apart
            let dims: Vec<u64> = disk_shape.iter().rev().copied().collect();
            debug!("inferred {} dimensions from the dataset shape", dims.len());
            (dims, 1, true)
        }
    };
    let n_dims = dimensions.len();

    if let Some(size) = &overrides.size {
        if size.len() != n_dims {
            return Err(HicError::DimensionMismatch {
                expected: n_dims,
                actual:   size.len(),
            });
        }
        dimensions.clone_from(size);
    }

    let mut desc = ImageDescriptor::new(n_dims);
    desc.dimensions = dimensions;
    desc.components = components;
    desc.component_type = component_type;

    if let Some(attr) = ds.attr(DIRECTIONS) {
        if attr.rank() != 2 {
            return Err(HicError::MalformedLayout(format!(
                "{DIRECTIONS} attribute has rank {}, expected 2",
                attr.rank()
            )));
        }
        let rows = attr.shape[0] as usize;
        let cols = attr.shape[1] as usize;
        let flat = attr.to_f64_vec()?;
        desc.directions = flat.chunks(cols).take(rows).map(<[f64]>::to_vec).collect();
    }

    if let Some(attr) = ds.attr(ORIGIN) {
        if attr.rank() != 1 {
            return Err(HicError::MalformedLayout(format!(
                "{ORIGIN} attribute has rank {}, expected 1",
                attr.rank()
            )));
        }
        desc.origin = attr.to_f64_vec()?;
    }

    if let Some(attr) = ds.attr(SPACING) {
        if attr.rank() != 1 {
            return Err(HicError::MalformedLayout(format!(
                "{SPACING} attribute has rank {}, expected 1",
                attr.rank()
            )));
        }
        desc.spacing = attr.to_f64_vec()?;
    }

    if let Some(offset) = &overrides.offset {
        if offset.len() != n_dims {
            return Err(HicError::DimensionMismatch {
                expected: n_dims,
                actual:   offset.len(),
            });
        }
    }

    if let Some(stride) = &overrides.stride {
        if stride.len() != n_dims {
            return Err(HicError::DimensionMismatch {
                expected: n_dims,
                actual:   stride.len(),
            });
        }

        // a strided read walks the image more coarsely, so the effective
        // spacing grows by the stride factor
        for (spacing, s) in desc.spacing.iter_mut().zip(stride) {
            *spacing *= *s as f64;
        }

        if overrides.size.is_none() {
            // a stride without an explicit size: derive the extent that
            // a strided read will actually produce
            for (i, s) in stride.iter().enumerate() {
                if *s > 1 {
                    let offset = overrides
                        .offset
                        .as_ref()
                        .map(|o| o[i])
                        .unwrap_or(0);
                    let strided = desc.dimensions[i] / s;
                    desc.dimensions[i] =
                        strided
                            .checked_sub(offset)
                            .ok_or(HicError::SelectionOutOfBounds {
                                axis: i,
                                offset,
                                count: strided,
                                stride: *s,
                                extent: desc.dimensions[i],
                            })?;
                }
            }
        }
    }

    Ok((desc, inferred))
}
