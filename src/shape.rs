use crate::error::{KernelError, Result};

/// Tensor extents, outermost axis first.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct RuntimeShape {
    dims: Vec<usize>,
}

impl RuntimeShape {
    pub fn new(dims: &[usize]) -> Self { Self { dims: dims.to_vec() } }

    #[inline]
    pub fn dimensions_count(&self) -> usize { self.dims.len() }

    /// Extent of axis `i`. Panics if `i` is out of range.
    #[inline]
    pub fn dims(&self, i: usize) -> usize { self.dims[i] }

    pub fn as_slice(&self) -> &[usize] { &self.dims }

    pub fn flat_size(&self) -> usize { self.dims.iter().product() }

    /// Product of every extent except `skip`.
    pub fn flat_size_skip_dim(&self, skip: usize) -> usize {
        self.dims.iter().enumerate().filter(|(i, _)| *i != skip).map(|(_, d)| *d).product()
    }
}

impl From<Vec<usize>> for RuntimeShape {
    fn from(dims: Vec<usize>) -> Self { Self { dims } }
}

/// Extent shared by `a[ia]` and `b[ib]`, or a shape error when they differ.
pub fn matching_dim(a: &RuntimeShape, ia: usize, b: &RuntimeShape, ib: usize) -> Result<usize> {
    let (da, db) = (a.dims(ia), b.dims(ib));
    if da != db {
        return Err(KernelError::Shape(format!("axis {} of {:?} ({}) != axis {} of {:?} ({})", ia, a.dims, da, ib, b.dims, db)));
    }
    Ok(da)
}
