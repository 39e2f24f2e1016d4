use candle_core::Tensor;
use candle_nn::VarBuilder;

use super::traits::GnnModule;
use super::utils::{layer_plan, LayerParams, Projection};
use crate::config::GcnConfig;
use crate::error::Result;
use crate::graph::Graph;
use crate::message::{update_all, MessageFn, ReduceFn};

/// GCN layer built on the copy-src / sum builtins.
///
/// `h' = act(D^-1/2 A^T D^-1/2 (h W) + b)`, where the two `D^-1/2` factors
/// are the graph's `"norm"` node feature applied before and after the sum.
pub struct GcnLayer {
    proj: Projection,
}
impl GcnLayer {
    pub fn new(in_dim: usize, out_dim: usize, params: LayerParams, vs: VarBuilder) -> Result<Self> {
        Ok(Self {
            proj: Projection::new(in_dim, out_dim, params, vs)?,
        })
    }
    pub fn weight(&self) -> &Tensor {
        self.proj.weight()
    }
    pub fn bias(&self) -> Option<&Tensor> {
        self.proj.bias()
    }
}
impl GnnModule for GcnLayer {
    fn forward_t(&self, x: &Tensor, graph: &Graph, train: bool) -> Result<Tensor> {
        let h = self.proj.project(x, train)?;
        let norm = graph.norm()?.to_dtype(h.dtype())?;
        // normalization by square root of src degree
        let h = h.broadcast_mul(&norm)?;
        let h = update_all(graph, &h, MessageFn::CopySrc, ReduceFn::Sum)?;
        // normalization by square root of dst degree
        let h = h.broadcast_mul(&norm)?;
        self.proj.finish(h)
    }
}

pub struct Gcn {
    layers: Vec<GcnLayer>,
}
impl Gcn {
    pub fn new(config: &GcnConfig, vs: VarBuilder) -> Result<Self> {
        let layers = layer_plan(config)?
            .into_iter()
            .enumerate()
            .map(|(i, (in_dim, out_dim, params))| {
                GcnLayer::new(in_dim, out_dim, params, vs.pp(format!("layer_{}", i)))
            })
            .collect::<Result<_>>()?;
        Ok(Self { layers })
    }
    pub fn layers(&self) -> &[GcnLayer] {
        &self.layers
    }
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }
}
impl GnnModule for Gcn {
    fn forward_t(&self, x: &Tensor, graph: &Graph, train: bool) -> Result<Tensor> {
        let mut h = x.clone();
        for layer in &self.layers {
            h = layer.forward_t(&h, graph, train)?;
        }
        Ok(h)
    }
}
