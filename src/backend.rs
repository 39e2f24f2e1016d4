//! Offloading neighborhood aggregation to an execution backend.
//!
//! A [`ContextManager`] opens a vertex-centric scope over a graph with
//! [`ContextManager::zoom_in`]. Inside the scope the program is written from
//! the point of view of a single vertex `v`:
//!
//! ```ignore
//! let v = cm.zoom_in(&graph, NodeFeats::new().with("h", h).with("norm", norm))?;
//! let h = v
//!     .innbs()
//!     .map(|nb| Ok(nb.feat("h")?.broadcast_mul(&nb.feat("norm")?)?))?
//!     .sum()?;
//! v.collect_output(h.broadcast_mul(v.feat("norm")?)?)?;
//! let h = cm.zoom_out()?;
//! ```
//!
//! Expressions are evaluated for all vertices at once; the backend only
//! decides how per-edge gathers and per-vertex scatters are executed.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use candle_core::{DType, Tensor};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GcnError, Result};
use crate::graph::Graph;
use crate::message::check_rows;

pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Primitives an external executor provides for vertex-centric programs.
pub trait ExecutionBackend: Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// One row of `feats` per entry of `index`.
    fn gather(&self, feats: &Tensor, index: &Tensor) -> Result<Tensor>;

    /// Sums row `e` of `messages` into row `dst[e]` of a `num_nodes`-row output.
    fn scatter_sum(&self, messages: &Tensor, dst: &Tensor, num_nodes: usize) -> Result<Tensor>;
}

/// Shape of `t` with the leading dimension replaced by `rows`.
fn with_rows(t: &Tensor, rows: usize) -> Result<Vec<usize>> {
    let mut dims = t.dims().to_vec();
    match dims.first_mut() {
        Some(first) => *first = rows,
        None => {
            return Err(GcnError::DimensionMismatch {
                expected: 1,
                actual: 0,
            })
        }
    }
    Ok(dims)
}

/// candle's own `index_select` / `index_add`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeBackend;

impl ExecutionBackend for NativeBackend {
    fn name(&self) -> &'static str {
        "native"
    }
    fn gather(&self, feats: &Tensor, index: &Tensor) -> Result<Tensor> {
        Ok(feats.index_select(index, 0)?)
    }
    fn scatter_sum(&self, messages: &Tensor, dst: &Tensor, num_nodes: usize) -> Result<Tensor> {
        let out = Tensor::zeros(with_rows(messages, num_nodes)?, messages.dtype(), messages.device())?;
        Ok(out.index_add(dst, messages, 0)?)
    }
}

/// Materializes one-hot selection matrices and runs everything as GEMM.
///
/// Memory is `O(N * E)`, so this only makes sense for small graphs.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenseBackend;

impl DenseBackend {
    /// `(rows, cols)` matrix with a single 1 per row at `cols_of_row[r]`.
    fn one_hot(cols_of_row: &[u32], cols: usize, like: &Tensor) -> Result<Tensor> {
        let mut data = vec![0f32; cols_of_row.len() * cols];
        for (r, &c) in cols_of_row.iter().enumerate() {
            if c as usize >= cols {
                return Err(GcnError::invalid_graph(format!(
                    "index {c} out of range for {cols} rows"
                )));
            }
            data[r * cols + c as usize] = 1.0;
        }
        Ok(Tensor::from_vec(data, (cols_of_row.len(), cols), like.device())?.to_dtype(like.dtype())?)
    }
}

impl ExecutionBackend for DenseBackend {
    fn name(&self) -> &'static str {
        "dense"
    }
    fn gather(&self, feats: &Tensor, index: &Tensor) -> Result<Tensor> {
        let index = index.to_dtype(DType::U32)?.to_vec1::<u32>()?;
        let shape = with_rows(feats, index.len())?;
        let select = Self::one_hot(&index, feats.dims()[0], feats)?;
        let flat = feats.flatten_from(1)?.contiguous()?;
        let out = select.matmul(&flat)?;
        Ok(out.reshape(shape)?)
    }
    fn scatter_sum(&self, messages: &Tensor, dst: &Tensor, num_nodes: usize) -> Result<Tensor> {
        let shape = with_rows(messages, num_nodes)?;
        let dst = dst.to_dtype(DType::U32)?.to_vec1::<u32>()?;
        // (E, N) transposed into the (N, E) incidence matrix
        let incidence = Self::one_hot(&dst, num_nodes, messages)?.t()?.contiguous()?;
        let flat = messages.flatten_from(1)?.contiguous()?;
        let out = incidence.matmul(&flat)?;
        Ok(out.reshape(shape)?)
    }
}

/// Streams edges through the native primitives `chunk_size` at a time.
#[derive(Debug, Clone, Copy)]
pub struct ChunkedBackend {
    chunk_size: usize,
}

impl ChunkedBackend {
    pub fn new(chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(GcnError::InvalidConfig {
                reason: "chunk size must be positive".to_owned(),
            });
        }
        Ok(Self { chunk_size })
    }
    fn chunks(&self, len: usize) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..len)
            .step_by(self.chunk_size)
            .map(move |start| (start, self.chunk_size.min(len - start)))
    }
}

impl Default for ChunkedBackend {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ExecutionBackend for ChunkedBackend {
    fn name(&self) -> &'static str {
        "chunked"
    }
    fn gather(&self, feats: &Tensor, index: &Tensor) -> Result<Tensor> {
        let parts = self
            .chunks(index.dims1()?)
            .map(|(start, len)| feats.index_select(&index.narrow(0, start, len)?, 0))
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(Tensor::cat(&parts, 0)?)
    }
    fn scatter_sum(&self, messages: &Tensor, dst: &Tensor, num_nodes: usize) -> Result<Tensor> {
        let mut out =
            Tensor::zeros(with_rows(messages, num_nodes)?, messages.dtype(), messages.device())?;
        for (start, len) in self.chunks(dst.dims1()?) {
            out = out.index_add(
                &dst.narrow(0, start, len)?,
                &messages.narrow(0, start, len)?,
                0,
            )?;
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Native,
    Dense,
    Chunked,
}

impl BackendKind {
    pub fn build(self) -> Arc<dyn ExecutionBackend> {
        match self {
            Self::Native => Arc::new(NativeBackend),
            Self::Dense => Arc::new(DenseBackend),
            Self::Chunked => Arc::new(ChunkedBackend::default()),
        }
    }
}

/// Named per-vertex tensors handed to a scope.
#[derive(Debug, Clone, Default)]
pub struct NodeFeats {
    feats: HashMap<String, Tensor>,
}
impl NodeFeats {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with(mut self, name: &str, value: Tensor) -> Self {
        self.insert(name, value);
        self
    }
    pub fn insert(&mut self, name: &str, value: Tensor) -> Option<Tensor> {
        self.feats.insert(name.to_owned(), value)
    }
    pub fn get(&self, name: &str) -> Result<&Tensor> {
        self.feats
            .get(name)
            .ok_or_else(|| GcnError::MissingNodeFeature {
                name: name.to_owned(),
            })
    }
}

#[derive(Debug)]
enum Scope {
    Closed,
    Open,
    Collected(Tensor),
}

/// Scoped dispatch of vertex programs to an [`ExecutionBackend`].
///
/// A scope counts as open from `zoom_in` until `zoom_out`, except that a
/// [`Zoom`] dropped without collecting closes it again.
#[derive(Debug)]
pub struct ContextManager {
    backend: Arc<dyn ExecutionBackend>,
    scope: Mutex<Scope>,
}

impl ContextManager {
    pub fn new(backend: Arc<dyn ExecutionBackend>) -> Self {
        Self {
            backend,
            scope: Mutex::new(Scope::Closed),
        }
    }
    pub fn backend(&self) -> &dyn ExecutionBackend {
        self.backend.as_ref()
    }

    pub fn zoom_in<'a>(&'a self, graph: &'a Graph, feats: NodeFeats) -> Result<Zoom<'a>> {
        for feat in feats.feats.values() {
            check_rows(feat, graph.num_nodes())?;
        }
        let mut scope = self.scope.lock();
        if !matches!(*scope, Scope::Closed) {
            return Err(GcnError::ScopeAlreadyOpen);
        }
        *scope = Scope::Open;
        debug!(
            backend = self.backend.name(),
            num_nodes = graph.num_nodes(),
            num_edges = graph.num_edges(),
            "zoom_in"
        );
        Ok(Zoom {
            manager: self,
            graph,
            feats,
        })
    }

    /// Closes the scope and hands back what was collected in it.
    pub fn zoom_out(&self) -> Result<Tensor> {
        match std::mem::replace(&mut *self.scope.lock(), Scope::Closed) {
            Scope::Collected(output) => Ok(output),
            Scope::Open | Scope::Closed => Err(GcnError::NoOutputCollected),
        }
    }
}

/// The vertex `v` of an open scope.
#[derive(Debug)]
pub struct Zoom<'a> {
    manager: &'a ContextManager,
    graph: &'a Graph,
    feats: NodeFeats,
}

impl<'a> Zoom<'a> {
    /// `v`'s own value of a feature, for every vertex at once.
    pub fn feat(&self, name: &str) -> Result<&Tensor> {
        self.feats.get(name)
    }

    /// The in-neighbors of `v`, one entry per incoming edge.
    pub fn innbs(&self) -> Neighbors<'_> {
        Neighbors {
            backend: self.manager.backend.as_ref(),
            graph: self.graph,
            feats: &self.feats,
        }
    }

    pub fn collect_output(self, output: Tensor) -> Result<()> {
        check_rows(&output, self.graph.num_nodes())?;
        *self.manager.scope.lock() = Scope::Collected(output);
        Ok(())
    }
}

impl Drop for Zoom<'_> {
    fn drop(&mut self) {
        let mut scope = self.manager.scope.lock();
        if matches!(*scope, Scope::Open) {
            *scope = Scope::Closed;
        }
    }
}

pub struct Neighbors<'z> {
    backend: &'z dyn ExecutionBackend,
    graph: &'z Graph,
    feats: &'z NodeFeats,
}

impl<'z> Neighbors<'z> {
    pub fn len(&self) -> usize {
        self.graph.num_edges()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The source vertex's value of a feature, one row per incoming edge.
    pub fn feat(&self, name: &str) -> Result<Tensor> {
        let feat = self.feats.get(name)?;
        if self.is_empty() {
            return Ok(Tensor::zeros(with_rows(feat, 0)?, feat.dtype(), feat.device())?);
        }
        self.backend.gather(feat, self.graph.src())
    }

    /// Evaluates a per-neighbor expression over all incoming edges.
    pub fn map<F>(&self, f: F) -> Result<EdgeValues<'z>>
    where
        F: FnOnce(&Neighbor<'_, 'z>) -> Result<Tensor>,
    {
        let values = f(&Neighbor { neighbors: self })?;
        check_rows(&values, self.len())?;
        Ok(EdgeValues {
            backend: self.backend,
            graph: self.graph,
            values,
        })
    }
}

/// A single in-neighbor `nb` inside [`Neighbors::map`].
pub struct Neighbor<'n, 'z> {
    neighbors: &'n Neighbors<'z>,
}
impl Neighbor<'_, '_> {
    pub fn feat(&self, name: &str) -> Result<Tensor> {
        self.neighbors.feat(name)
    }
}

/// One value per incoming edge, waiting to be reduced onto vertices.
pub struct EdgeValues<'z> {
    backend: &'z dyn ExecutionBackend,
    graph: &'z Graph,
    values: Tensor,
}
impl EdgeValues<'_> {
    pub fn sum(self) -> Result<Tensor> {
        let num_nodes = self.graph.num_nodes();
        if self.graph.num_edges() == 0 {
            let v = &self.values;
            return Ok(Tensor::zeros(with_rows(v, num_nodes)?, v.dtype(), v.device())?);
        }
        self.backend
            .scatter_sum(&self.values, self.graph.dst(), num_nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{update_all, MessageFn, ReduceFn};
    use candle_core::Device;

    fn graph() -> Graph {
        Graph::new(5, &[0, 1, 2, 3, 0, 4], &[1, 2, 0, 0, 3, 4], &Device::Cpu)
            .unwrap()
            .add_self_loops()
            .unwrap()
    }
    fn feats() -> Tensor {
        Tensor::arange(0f32, 15., &Device::Cpu)
            .unwrap()
            .reshape((5, 3))
            .unwrap()
    }
    fn backends() -> Vec<Arc<dyn ExecutionBackend>> {
        vec![
            Arc::new(NativeBackend),
            Arc::new(DenseBackend),
            Arc::new(ChunkedBackend::new(2).unwrap()),
        ]
    }
    fn max_abs_diff(a: &Tensor, b: &Tensor) -> f32 {
        (a - b)
            .unwrap()
            .abs()
            .unwrap()
            .max_keepdim(0)
            .unwrap()
            .max_keepdim(1)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap()[0]
    }

    fn gcn_scope(cm: &ContextManager, g: &Graph, h: &Tensor) -> Result<Tensor> {
        let norm = g.symmetric_norm()?;
        let v = cm.zoom_in(g, NodeFeats::new().with("h", h.clone()).with("norm", norm))?;
        let h = v
            .innbs()
            .map(|nb| Ok(nb.feat("h")?.broadcast_mul(&nb.feat("norm")?)?))?
            .sum()?;
        let h = h.broadcast_mul(v.feat("norm")?)?;
        v.collect_output(h)?;
        cm.zoom_out()
    }

    #[test]
    fn backends_agree_with_update_all() {
        let g = graph();
        let norm = g.symmetric_norm().unwrap();
        let h = feats();
        let expected = update_all(
            &g,
            &h.broadcast_mul(&norm).unwrap(),
            MessageFn::CopySrc,
            ReduceFn::Sum,
        )
        .unwrap()
        .broadcast_mul(&norm)
        .unwrap();

        for backend in backends() {
            let name = backend.name();
            let cm = ContextManager::new(backend);
            let out = gcn_scope(&cm, &g, &h).unwrap();
            assert_eq!(out.dims(), &[5, 3]);
            assert!(max_abs_diff(&out, &expected) < 1e-5, "backend {name}");
        }
    }

    #[test]
    fn chunked_gather_keeps_edge_order() {
        let g = graph();
        let native = NativeBackend.gather(&feats(), g.src()).unwrap();
        let chunked = ChunkedBackend::new(3)
            .unwrap()
            .gather(&feats(), g.src())
            .unwrap();
        assert_eq!(
            native.to_vec2::<f32>().unwrap(),
            chunked.to_vec2::<f32>().unwrap()
        );
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        assert!(ChunkedBackend::new(0).is_err());
    }

    #[test]
    fn zoom_out_without_output() {
        let g = graph();
        let cm = ContextManager::new(Arc::new(NativeBackend));
        assert!(matches!(cm.zoom_out(), Err(GcnError::NoOutputCollected)));

        let v = cm.zoom_in(&g, NodeFeats::new().with("h", feats())).unwrap();
        drop(v);
        assert!(matches!(cm.zoom_out(), Err(GcnError::NoOutputCollected)));
        // the manager is usable again afterwards
        assert!(gcn_scope(&cm, &g, &feats()).is_ok());
    }

    #[test]
    fn nested_scopes_are_rejected() {
        let g = graph();
        let cm = ContextManager::new(Arc::new(NativeBackend));
        let _v = cm.zoom_in(&g, NodeFeats::new()).unwrap();
        assert!(matches!(
            cm.zoom_in(&g, NodeFeats::new()),
            Err(GcnError::ScopeAlreadyOpen)
        ));
    }

    #[test]
    fn missing_feature() {
        let g = graph();
        let cm = ContextManager::new(Arc::new(NativeBackend));
        let v = cm.zoom_in(&g, NodeFeats::new().with("h", feats())).unwrap();
        assert!(matches!(
            v.feat("norm"),
            Err(GcnError::MissingNodeFeature { .. })
        ));
        assert!(v.innbs().feat("norm").is_err());
    }

    #[test]
    fn features_must_cover_every_node() {
        let g = graph();
        let cm = ContextManager::new(Arc::new(NativeBackend));
        let short = Tensor::zeros((4, 3), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(
            cm.zoom_in(&g, NodeFeats::new().with("h", short)),
            Err(GcnError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn edgeless_scope_sums_to_zero() {
        let g = Graph::new(5, &[], &[], &Device::Cpu).unwrap();
        for backend in backends() {
            let cm = ContextManager::new(backend);
            let out = gcn_scope(&cm, &g, &feats()).unwrap();
            assert_eq!(out.dims(), &[5, 3]);
            assert_eq!(
                out.abs().unwrap().sum_all().unwrap().to_scalar::<f32>().unwrap(),
                0.0
            );
        }
    }

    #[test]
    fn malformed_inputs_are_errors() {
        let dev = Device::Cpu;
        let scalar = Tensor::new(1f32, &dev).unwrap();
        let dst = Tensor::new(&[0u32], &dev).unwrap();
        for backend in backends() {
            assert!(matches!(
                backend.scatter_sum(&scalar, &dst, 3),
                Err(GcnError::DimensionMismatch { .. })
            ));
        }
        let out_of_range = Tensor::new(&[0u32, 7], &dev).unwrap();
        assert!(matches!(
            DenseBackend.gather(&feats(), &out_of_range),
            Err(GcnError::InvalidGraph { .. })
        ));
        assert!(NativeBackend.gather(&feats(), &out_of_range).is_err());

        // a scalar per-edge value has no row dimension to scatter into
        let g = Graph::new(5, &[], &[], &dev).unwrap();
        let cm = ContextManager::new(Arc::new(NativeBackend));
        let v = cm.zoom_in(&g, NodeFeats::new().with("h", feats())).unwrap();
        let summed = v.innbs().map(|_| Ok(Tensor::new(1f32, &Device::Cpu)?)).unwrap().sum();
        assert!(matches!(summed, Err(GcnError::DimensionMismatch { .. })));
    }
}
