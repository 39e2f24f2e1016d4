use candle_core::{Device, Tensor};

use crate::error::{GcnError, Result};
use crate::graph::Graph;

/// A node-classification graph with a fixed train / val / test split.
#[derive(Debug, Clone)]
pub struct CitationDataset {
    pub name: String,
    pub features: Tensor,
    pub labels: Tensor,
    pub graph: Graph,
    pub train_indices: Tensor,
    pub val_indices: Tensor,
    pub test_indices: Tensor,
    pub num_classes: usize,
}

impl CitationDataset {
    pub fn num_nodes(&self) -> usize {
        self.graph.num_nodes()
    }
    pub fn num_features(&self) -> usize {
        self.features.dims()[1]
    }

    /// Assembles a dataset from host buffers, splitting it with `split`.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        name: &str,
        features: Vec<f32>,
        num_features: usize,
        labels: Vec<u32>,
        num_classes: usize,
        graph: Graph,
        split: &PlanetoidSplit,
        device: &Device,
    ) -> Result<Self> {
        let num_nodes = labels.len();
        if graph.num_nodes() != num_nodes {
            return Err(GcnError::DimensionMismatch {
                expected: num_nodes,
                actual: graph.num_nodes(),
            });
        }
        if features.len() != num_nodes * num_features {
            return Err(GcnError::DimensionMismatch {
                expected: num_nodes * num_features,
                actual: features.len(),
            });
        }
        let (train, val, test) = split.split(&labels, num_classes)?;
        let indices = |ids: Vec<u32>| {
            let len = ids.len();
            Tensor::from_vec(ids, len, device)
        };
        Ok(Self {
            name: name.to_owned(),
            features: Tensor::from_vec(features, (num_nodes, num_features), device)?,
            labels: Tensor::from_vec(labels, num_nodes, device)?,
            graph,
            train_indices: indices(train)?,
            val_indices: indices(val)?,
            test_indices: indices(test)?,
            num_classes,
        })
    }
}

/// Divides every row by its sum; all-zero rows are left alone.
pub fn row_normalize(features: &mut [f32], num_features: usize) {
    for row in features.chunks_mut(num_features) {
        let sum: f32 = row.iter().sum();
        if sum > 0.0 {
            row.iter_mut().for_each(|x| *x /= sum);
        }
    }
}

/// The split of the Planetoid benchmark: `per_class` labelled nodes of every
/// class for training, then `num_val` and `num_test` of the remaining nodes
/// in id order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanetoidSplit {
    pub per_class: usize,
    pub num_val: usize,
    pub num_test: usize,
}
impl Default for PlanetoidSplit {
    fn default() -> Self {
        Self {
            per_class: 20,
            num_val: 500,
            num_test: 1000,
        }
    }
}
impl PlanetoidSplit {
    pub fn split(&self, labels: &[u32], num_classes: usize) -> Result<(Vec<u32>, Vec<u32>, Vec<u32>)> {
        let mut taken = vec![0usize; num_classes];
        let mut train = Vec::new();
        let mut rest = Vec::new();
        for (node, &label) in labels.iter().enumerate() {
            let count = taken.get_mut(label as usize).ok_or_else(|| {
                GcnError::dataset(format!("label {label} out of range for {num_classes} classes"))
            })?;
            if *count < self.per_class {
                *count += 1;
                train.push(node as u32);
            } else {
                rest.push(node as u32);
            }
        }
        if train.is_empty() {
            return Err(GcnError::dataset("no training nodes"));
        }
        let val: Vec<u32> = rest.iter().copied().take(self.num_val).collect();
        let test: Vec<u32> = rest
            .iter()
            .copied()
            .skip(val.len())
            .take(self.num_test)
            .collect();
        Ok((train, val, test))
    }
}
