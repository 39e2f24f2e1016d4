use std::sync::Arc;

use candle_core::Tensor;
use candle_nn::VarBuilder;

use super::traits::GnnModule;
use super::utils::{layer_plan, LayerParams, Projection};
use crate::backend::{ContextManager, ExecutionBackend, NodeFeats};
use crate::config::GcnConfig;
use crate::error::Result;
use crate::graph::Graph;

/// GCN layer whose aggregation runs as a vertex program on an
/// [`ExecutionBackend`].
pub struct EglGcnLayer {
    proj: Projection,
    cm: ContextManager,
}
impl EglGcnLayer {
    pub fn new(
        in_dim: usize,
        out_dim: usize,
        params: LayerParams,
        backend: Arc<dyn ExecutionBackend>,
        vs: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            proj: Projection::new(in_dim, out_dim, params, vs)?,
            cm: ContextManager::new(backend),
        })
    }
    pub fn weight(&self) -> &Tensor {
        self.proj.weight()
    }
    pub fn bias(&self) -> Option<&Tensor> {
        self.proj.bias()
    }
    pub fn backend(&self) -> &dyn ExecutionBackend {
        self.cm.backend()
    }
}
impl GnnModule for EglGcnLayer {
    fn forward_t(&self, x: &Tensor, graph: &Graph, train: bool) -> Result<Tensor> {
        let h = self.proj.project(x, train)?;
        let norm = graph.norm()?.to_dtype(h.dtype())?;
        {
            let v = self
                .cm
                .zoom_in(graph, NodeFeats::new().with("h", h).with("norm", norm))?;
            let h = v
                .innbs()
                .map(|nb| Ok(nb.feat("h")?.broadcast_mul(&nb.feat("norm")?)?))?
                .sum()?;
            let h = h.broadcast_mul(v.feat("norm")?)?;
            v.collect_output(h)?;
        }
        let h = self.cm.zoom_out()?;
        self.proj.finish(h)
    }
}

pub struct EglGcn {
    layers: Vec<EglGcnLayer>,
}
impl EglGcn {
    pub fn new(
        config: &GcnConfig,
        backend: Arc<dyn ExecutionBackend>,
        vs: VarBuilder,
    ) -> Result<Self> {
        let layers = layer_plan(config)?
            .into_iter()
            .enumerate()
            .map(|(i, (in_dim, out_dim, params))| {
                EglGcnLayer::new(
                    in_dim,
                    out_dim,
                    params,
                    backend.clone(),
                    vs.pp(format!("layer_{}", i)),
                )
            })
            .collect::<Result<_>>()?;
        Ok(Self { layers })
    }
    pub fn layers(&self) -> &[EglGcnLayer] {
        &self.layers
    }
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }
}
impl GnnModule for EglGcn {
    fn forward_t(&self, x: &Tensor, graph: &Graph, train: bool) -> Result<Tensor> {
        let mut h = x.clone();
        for layer in &self.layers {
            h = layer.forward_t(&h, graph, train)?;
        }
        Ok(h)
    }
}
