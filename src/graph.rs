use std::collections::HashMap;

use candle_core::{DType, Device, Tensor};
use itertools::Itertools;

use crate::error::{GcnError, Result};

/// Name under which the symmetric normalization is stored in the node frame.
pub const NORM: &str = "norm";

/// Per-node tensors keyed by name. Every entry has `num_nodes` rows.
#[derive(Debug, Clone, Default)]
pub struct NodeFrame {
    data: HashMap<String, Tensor>,
}
impl NodeFrame {
    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.data.get(name)
    }
    pub fn contains(&self, name: &str) -> bool {
        self.data.contains_key(name)
    }
    fn insert(&mut self, name: String, value: Tensor) -> Option<Tensor> {
        self.data.insert(name, value)
    }
    fn remove(&mut self, name: &str) -> Option<Tensor> {
        self.data.remove(name)
    }
}

/// Directed graph in coordinate form.
///
/// Edge `i` goes from `src[i]` to `dst[i]`. Endpoint ids are kept both on the
/// host (for structural operations) and on the device (for message passing).
#[derive(Debug, Clone)]
pub struct Graph {
    num_nodes: usize,
    src_ids: Vec<u32>,
    dst_ids: Vec<u32>,
    src: Tensor,
    dst: Tensor,
    device: Device,
    ndata: NodeFrame,
}

impl Graph {
    pub fn new(num_nodes: usize, src: &[u32], dst: &[u32], device: &Device) -> Result<Self> {
        if src.len() != dst.len() {
            return Err(GcnError::invalid_graph(format!(
                "{} sources but {} destinations",
                src.len(),
                dst.len()
            )));
        }
        if let Some(&v) = src.iter().chain(dst).find(|&&v| v as usize >= num_nodes) {
            return Err(GcnError::invalid_graph(format!(
                "endpoint {v} out of range for {num_nodes} nodes"
            )));
        }
        Ok(Self {
            num_nodes,
            src_ids: src.to_vec(),
            dst_ids: dst.to_vec(),
            src: Tensor::from_slice(src, src.len(), device)?,
            dst: Tensor::from_slice(dst, dst.len(), device)?,
            device: device.clone(),
            ndata: NodeFrame::default(),
        })
    }

    /// Builds a graph from a `(2, E)` edge index (row 0 = source).
    pub fn from_edge_index(num_nodes: usize, edge_index: &Tensor) -> Result<Self> {
        let (rows, _) = edge_index.dims2()?;
        if rows != 2 {
            return Err(GcnError::DimensionMismatch {
                expected: 2,
                actual: rows,
            });
        }
        let rows = edge_index.to_dtype(DType::U32)?.to_vec2::<u32>()?;
        Self::new(num_nodes, &rows[0], &rows[1], edge_index.device())
    }

    /// Drops every `(v, v)` edge.
    pub fn remove_self_loops(&self) -> Result<Self> {
        let (src, dst): (Vec<u32>, Vec<u32>) = self
            .src_ids
            .iter()
            .zip(&self.dst_ids)
            .filter(|(u, v)| u != v)
            .unzip();
        Self::new(self.num_nodes, &src, &dst, &self.device)
    }

    /// Gives every node exactly one `(v, v)` edge, replacing any existing loops.
    pub fn add_self_loops(&self) -> Result<Self> {
        let g = self.remove_self_loops()?;
        let nodes = 0..self.num_nodes as u32;
        let src: Vec<u32> = g.src_ids.into_iter().chain(nodes.clone()).collect();
        let dst: Vec<u32> = g.dst_ids.into_iter().chain(nodes).collect();
        Self::new(self.num_nodes, &src, &dst, &self.device)
    }

    /// Mirrors every edge and drops duplicates. Edges come out sorted.
    pub fn to_undirected(&self) -> Result<Self> {
        let (src, dst): (Vec<u32>, Vec<u32>) = self
            .src_ids
            .iter()
            .zip(&self.dst_ids)
            .flat_map(|(&u, &v)| [(u, v), (v, u)])
            .sorted()
            .dedup()
            .unzip();
        Self::new(self.num_nodes, &src, &dst, &self.device)
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }
    pub fn num_edges(&self) -> usize {
        self.src_ids.len()
    }
    pub fn src(&self) -> &Tensor {
        &self.src
    }
    pub fn dst(&self) -> &Tensor {
        &self.dst
    }
    pub fn src_ids(&self) -> &[u32] {
        &self.src_ids
    }
    pub fn dst_ids(&self) -> &[u32] {
        &self.dst_ids
    }
    pub fn device(&self) -> &Device {
        &self.device
    }
    pub fn edge_index(&self) -> Result<Tensor> {
        Ok(Tensor::stack(&[&self.src, &self.dst], 0)?)
    }

    fn count(&self, ids: &[u32]) -> Vec<f32> {
        let mut degree = vec![0f32; self.num_nodes];
        for &v in ids {
            degree[v as usize] += 1.0;
        }
        degree
    }
    pub fn in_degrees(&self) -> Result<Tensor> {
        Ok(Tensor::from_vec(
            self.count(&self.dst_ids),
            self.num_nodes,
            &self.device,
        )?)
    }
    pub fn out_degrees(&self) -> Result<Tensor> {
        Ok(Tensor::from_vec(
            self.count(&self.src_ids),
            self.num_nodes,
            &self.device,
        )?)
    }

    /// `(N, 1)` tensor of `in_degree^-1/2`; isolated nodes get 0 instead of inf.
    pub fn symmetric_norm(&self) -> Result<Tensor> {
        let norm = self
            .count(&self.dst_ids)
            .into_iter()
            .map(|d| if d > 0.0 { d.powf(-0.5) } else { 0.0 })
            .collect::<Vec<_>>();
        Ok(Tensor::from_vec(norm, (self.num_nodes, 1), &self.device)?)
    }

    /// The stored `"norm"` node feature, or a freshly computed one.
    pub fn norm(&self) -> Result<Tensor> {
        match self.ndata.get(NORM) {
            Some(norm) => Ok(norm.clone()),
            None => self.symmetric_norm(),
        }
    }

    /// Stores the symmetric norm under `"norm"`.
    pub fn with_norm(mut self) -> Result<Self> {
        let norm = self.symmetric_norm()?;
        self.set_ndata(NORM, norm)?;
        Ok(self)
    }

    pub fn ndata(&self) -> &NodeFrame {
        &self.ndata
    }
    pub fn set_ndata(&mut self, name: &str, value: Tensor) -> Result<Option<Tensor>> {
        let rows = value.dims().first().copied().unwrap_or(0);
        if rows != self.num_nodes {
            return Err(GcnError::DimensionMismatch {
                expected: self.num_nodes,
                actual: rows,
            });
        }
        Ok(self.ndata.insert(name.to_owned(), value))
    }
    pub fn pop_ndata(&mut self, name: &str) -> Option<Tensor> {
        self.ndata.remove(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path() -> Graph {
        // 0 -> 1 -> 2, node 3 isolated
        Graph::new(4, &[0, 1], &[1, 2], &Device::Cpu).unwrap()
    }

    #[test]
    fn degrees() {
        let g = path();
        assert_eq!(g.num_edges(), 2);
        assert_eq!(
            g.in_degrees().unwrap().to_vec1::<f32>().unwrap(),
            [0.0, 1.0, 1.0, 0.0]
        );
        assert_eq!(
            g.out_degrees().unwrap().to_vec1::<f32>().unwrap(),
            [1.0, 1.0, 0.0, 0.0]
        );
    }

    #[test]
    fn norm_is_zero_for_isolated_nodes() {
        let g = path().add_self_loops().unwrap();
        let norm = g.symmetric_norm().unwrap().flatten_all().unwrap();
        let norm = norm.to_vec1::<f32>().unwrap();
        assert!((norm[0] - 1.0).abs() < 1e-6);
        assert!((norm[1] - 0.5f32.sqrt()).abs() < 1e-6);

        let norm = path().symmetric_norm().unwrap();
        assert_eq!(norm.dims(), &[4, 1]);
        assert_eq!(
            norm.flatten_all().unwrap().to_vec1::<f32>().unwrap(),
            [0.0, 1.0, 1.0, 0.0]
        );
    }

    #[test]
    fn rejects_bad_edges() {
        let dev = Device::Cpu;
        assert!(matches!(
            Graph::new(2, &[0, 1], &[1], &dev),
            Err(GcnError::InvalidGraph { .. })
        ));
        assert!(matches!(
            Graph::new(2, &[0], &[2], &dev),
            Err(GcnError::InvalidGraph { .. })
        ));
    }

    #[test]
    fn existing_self_loops_are_not_doubled() {
        let g = Graph::new(2, &[0], &[0], &Device::Cpu).unwrap();
        let g = g.add_self_loops().unwrap();
        assert_eq!(g.num_edges(), 2);
        assert_eq!(g.src_ids(), &[0, 1]);
        assert_eq!(
            g.symmetric_norm().unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap(),
            [1.0, 1.0]
        );

        let g = Graph::new(3, &[0, 1, 2], &[0, 2, 2], &Device::Cpu).unwrap();
        let g = g.remove_self_loops().unwrap();
        assert_eq!(g.src_ids(), &[1]);
        assert_eq!(g.dst_ids(), &[2]);
    }

    #[test]
    fn undirected_dedups() {
        let g = Graph::new(3, &[0, 1, 1], &[1, 0, 2], &Device::Cpu).unwrap();
        let g = g.to_undirected().unwrap();
        assert_eq!(g.src_ids(), &[0, 1, 1, 2]);
        assert_eq!(g.dst_ids(), &[1, 0, 2, 1]);
    }

    #[test]
    fn edge_index_round_trip() {
        let g = path().add_self_loops().unwrap();
        assert_eq!(g.num_edges(), 6);
        let h = Graph::from_edge_index(4, &g.edge_index().unwrap()).unwrap();
        assert_eq!(h.src_ids(), g.src_ids());
        assert_eq!(h.dst_ids(), g.dst_ids());
    }

    #[test]
    fn node_frame() {
        let mut g = path().with_norm().unwrap();
        assert!(g.ndata().contains(NORM));
        let wrong = Tensor::zeros((3, 1), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(
            g.set_ndata("h", wrong),
            Err(GcnError::DimensionMismatch {
                expected: 4,
                actual: 3
            })
        ));
        assert!(g.pop_ndata(NORM).is_some());
        assert!(!g.ndata().contains(NORM));
    }
}
