use std::collections::HashMap;
use std::path::Path;

use candle_core::{DType, Device, Tensor};

use super::CitationDataset;
use crate::error::{GcnError, Result};
use crate::graph::Graph;
use crate::utils::mask_to_index;

// ```python
// dataset = dataset = Planetoid(root='data/Planetoid', name='Cora')
// data = {
//     "x": dataset.x.numpy(),
//     "edge_index": dataset.edge_index.numpy(),
//     "y": dataset.y.numpy(),
//     "train_indices": np.where(dataset.train_mask)[0],
//     "val_indices": np.where(dataset.val_mask)[0],
//     "test_indices": np.where(dataset.test_mask)[0],
// }
// with open("cora.npz", "wb") as f:
//     np.savez(f, **data)
// ```
pub struct Cora;

impl Cora {
    pub fn from_file<P: AsRef<Path>>(cora_npz: P, device: &Device) -> Result<CitationDataset> {
        let mut arrays: HashMap<String, Tensor> =
            HashMap::from_iter(Tensor::read_npz(cora_npz.as_ref())?);
        let features = take(&mut arrays, "x", DType::F32, device)?;
        let edge_index = take(&mut arrays, "edge_index", DType::U32, device)?;
        let labels = take(&mut arrays, "y", DType::U32, device)?;
        let train_indices = split(&mut arrays, "train", device)?;
        let val_indices = split(&mut arrays, "val", device)?;
        let test_indices = split(&mut arrays, "test", device)?;

        let (num_nodes, _) = features.dims2()?;
        let num_classes = labels.max(0)?.to_scalar::<u32>()? as usize + 1;
        Ok(CitationDataset {
            name: "cora".to_owned(),
            graph: Graph::from_edge_index(num_nodes, &edge_index)?,
            features,
            labels,
            train_indices,
            val_indices,
            test_indices,
            num_classes,
        })
    }
}

fn take(
    arrays: &mut HashMap<String, Tensor>,
    key: &str,
    dtype: DType,
    device: &Device,
) -> Result<Tensor> {
    let t = arrays
        .remove(key)
        .ok_or_else(|| GcnError::dataset(format!("missing array {key:?}")))?;
    Ok(t.to_dtype(dtype)?.to_device(device)?)
}

/// `{name}_indices`, or the nonzero positions of `{name}_mask` for older
/// exports that ship boolean masks instead.
fn split(arrays: &mut HashMap<String, Tensor>, name: &str, device: &Device) -> Result<Tensor> {
    let key = format!("{name}_indices");
    if !arrays.contains_key(&key) {
        return mask_to_index(&take(arrays, &format!("{name}_mask"), DType::U8, device)?);
    }
    let indices = take(arrays, &key, DType::U32, device)?;
    if indices.rank() != 1 {
        return Err(GcnError::dataset(format!(
            "{key:?} must be 1-d, got shape {:?}",
            indices.dims()
        )));
    }
    Ok(indices)
}
