//! Source-side annotation bundles consumed by the decoder.

use std::collections::HashMap;

use anyhow::{ensure, Result};
use ndarray::{Array2, Array3};

/// One source modality: a `[batch, positions, width]` annotation block and an
/// optional `[batch, positions]` validity mask (1.0 = valid position).
pub struct Annotations {
    data: Array3<f32>,
    mask: Option<Array2<f32>>,
}

impl Annotations {
    pub fn new(data: Array3<f32>, mask: Option<Array2<f32>>) -> Result<Self> {
        if let Some(mask) = &mask {
            ensure!(
                mask.dim() == (data.dim().0, data.dim().1),
                "annotation mask shape {:?} does not match annotations {:?}",
                mask.dim(),
                data.dim()
            );
        }
        Ok(Self { data, mask })
    }

    /// Annotations with every position valid.
    pub fn unmasked(data: Array3<f32>) -> Self {
        Self { data, mask: None }
    }

    pub fn batch(&self) -> usize {
        self.data.dim().0
    }

    pub fn positions(&self) -> usize {
        self.data.dim().1
    }

    pub fn width(&self) -> usize {
        self.data.dim().2
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn mask(&self) -> Option<&Array2<f32>> {
        self.mask.as_ref()
    }
}

/// A named, read-only map of annotation blocks.
#[derive(Default)]
pub struct ContextBundle {
    entries: HashMap<String, Annotations>,
}

impl ContextBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, annotations: Annotations) -> Self {
        self.entries.insert(name.into(), annotations);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, annotations: Annotations) {
        self.entries.insert(name.into(), annotations);
    }

    pub fn get(&self, name: &str) -> Option<&Annotations> {
        self.entries.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3};

    #[test]
    fn test_mask_shape_checked() {
        let data = Array3::<f32>::zeros((2, 3, 4));
        let bad_mask = Array2::<f32>::ones((2, 5));
        assert!(Annotations::new(data, Some(bad_mask)).is_err());
    }

    #[test]
    fn test_bundle_lookup() {
        let ann = Annotations::unmasked(Array3::<f32>::zeros((1, 2, 3)));
        let bundle = ContextBundle::new().with("image", ann);
        assert!(bundle.get("image").is_some());
        assert!(bundle.get("speech").is_none());
        assert_eq!(bundle.get("image").unwrap().width(), 3);
    }
}
