use candle_core::{DType, Tensor};

use crate::error::Result;

/// Positions of the non-zero entries of a boolean mask, as `u32`.
pub fn mask_to_index(mask: &Tensor) -> Result<Tensor> {
    Ok(Tensor::from_iter(
        mask.to_dtype(DType::U8)?
            .to_vec1()?
            .into_iter()
            .enumerate()
            .filter_map(|(idx, m): (_, u8)| if m == 0 { None } else { Some(idx as u32) }),
        mask.device(),
    )?)
}
