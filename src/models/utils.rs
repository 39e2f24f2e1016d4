use candle_core::Tensor;
use candle_nn::{Activation, Dropout, Init, Module, VarBuilder};

use crate::config::GcnConfig;
use crate::error::Result;

/// Per-layer knobs shared by both GCN layer flavours.
#[derive(Debug, Clone, Copy)]
pub struct LayerParams {
    pub activation: Option<Activation>,
    pub dropout: f32,
    pub bias: bool,
}
impl Default for LayerParams {
    fn default() -> Self {
        Self {
            activation: Some(Activation::Relu),
            dropout: 0.0,
            bias: true,
        }
    }
}

//
// Dense part of a GCN layer: dropout, `h @ W`, then `+ b` and activation
// once the neighborhood has been aggregated.
//
//   weight and bias are drawn from Uniform(-stdv, stdv), stdv = 1/sqrt(out_dim)
//
pub(crate) struct Projection {
    weight: Tensor,
    bias: Option<Tensor>,
    activation: Option<Activation>,
    dropout: Option<Dropout>,
}
impl Projection {
    pub(crate) fn new(
        in_dim: usize,
        out_dim: usize,
        params: LayerParams,
        vs: VarBuilder,
    ) -> Result<Self> {
        let stdv = 1.0 / (out_dim as f64).sqrt();
        let init = Init::Uniform {
            lo: -stdv,
            up: stdv,
        };
        let weight = vs.get_with_hints((in_dim, out_dim), "weight", init)?;
        let bias = if params.bias {
            Some(vs.get_with_hints(out_dim, "bias", init)?)
        } else {
            None
        };
        Ok(Self {
            weight,
            bias,
            activation: params.activation,
            dropout: (params.dropout > 0.0).then(|| Dropout::new(params.dropout)),
        })
    }
    pub(crate) fn weight(&self) -> &Tensor {
        &self.weight
    }
    pub(crate) fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }
    pub(crate) fn project(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let xs = match &self.dropout {
            Some(dropout) => dropout.forward(xs, train)?,
            None => xs.clone(),
        };
        Ok(xs.matmul(&self.weight)?)
    }
    pub(crate) fn finish(&self, h: Tensor) -> Result<Tensor> {
        let h = match &self.bias {
            Some(bias) => h.broadcast_add(bias)?,
            None => h,
        };
        Ok(match &self.activation {
            Some(activation) => activation.forward(&h)?,
            None => h,
        })
    }
}

/// `(in_dim, out_dim, params)` for every layer of a GCN stack.
pub(crate) fn layer_plan(config: &GcnConfig) -> Result<Vec<(usize, usize, LayerParams)>> {
    config.validate()?;
    let hidden = LayerParams {
        activation: Some(config.activation.into()),
        dropout: config.dropout,
        bias: config.bias,
    };
    let mut plan = vec![(
        config.in_feats,
        config.n_hidden,
        LayerParams {
            dropout: 0.0,
            ..hidden
        },
    )];
    for _ in 1..config.n_layers {
        plan.push((config.n_hidden, config.n_hidden, hidden));
    }
    plan.push((
        config.n_hidden,
        config.n_classes,
        LayerParams {
            activation: None,
            ..hidden
        },
    ));
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_shapes() {
        let config = GcnConfig {
            n_layers: 3,
            ..GcnConfig::new(100, 5)
        };
        let plan = layer_plan(&config).unwrap();
        let dims: Vec<_> = plan.iter().map(|(i, o, _)| (*i, *o)).collect();
        assert_eq!(dims, [(100, 16), (16, 16), (16, 16), (16, 5)]);

        assert_eq!(plan[0].2.dropout, 0.0);
        assert!(plan[0].2.activation.is_some());
        assert_eq!(plan[1].2.dropout, 0.5);
        assert!(plan[3].2.activation.is_none());
        assert_eq!(plan[3].2.dropout, 0.5);
    }

    #[test]
    fn plan_rejects_invalid_config() {
        assert!(layer_plan(&GcnConfig::default()).is_err());
    }
}
