//! Built-in message and reduce functions.
//!
//! `update_all(g, h, CopySrc, Sum)` is the SpMV `A^T h`: every node receives
//! the sum of its in-neighbors' rows. Gather and scatter go through candle's
//! `index_select` / `index_add`, so gradients flow through both.

use candle_core::Tensor;

use crate::error::{GcnError, Result};
use crate::graph::Graph;

/// How a message is built from the source node of an edge.
#[derive(Debug, Clone, Copy)]
pub enum MessageFn<'a> {
    /// The source node's feature row.
    CopySrc,
    /// The source node's feature row scaled by a per-edge weight `(E,)`.
    SrcMulEdge(&'a Tensor),
}

/// How the messages arriving at a node are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReduceFn {
    #[default]
    Sum,
    /// Sum divided by in-degree. Nodes without in-edges stay at zero.
    Mean,
}

pub(crate) fn check_rows(feats: &Tensor, num_nodes: usize) -> Result<()> {
    let rows = feats.dims().first().copied().unwrap_or(0);
    if rows != num_nodes {
        return Err(GcnError::DimensionMismatch {
            expected: num_nodes,
            actual: rows,
        });
    }
    Ok(())
}

pub fn update_all(
    graph: &Graph,
    feats: &Tensor,
    message: MessageFn,
    reduce: ReduceFn,
) -> Result<Tensor> {
    let (num_nodes, _) = feats.dims2()?;
    check_rows(feats, graph.num_nodes())?;
    if graph.num_edges() == 0 {
        return Ok(feats.zeros_like()?);
    }

    let mut messages = feats.index_select(graph.src(), 0)?;
    if let MessageFn::SrcMulEdge(weight) = message {
        let num_edges = weight.elem_count();
        if num_edges != graph.num_edges() {
            return Err(GcnError::DimensionMismatch {
                expected: graph.num_edges(),
                actual: num_edges,
            });
        }
        let weight = weight.reshape((num_edges, 1))?.to_dtype(feats.dtype())?;
        messages = messages.broadcast_mul(&weight)?;
    }

    let out = feats.zeros_like()?.index_add(graph.dst(), &messages, 0)?;
    match reduce {
        ReduceFn::Sum => Ok(out),
        ReduceFn::Mean => {
            let degree = graph
                .in_degrees()?
                .to_vec1::<f32>()?
                .into_iter()
                .map(|d| d.max(1.0))
                .collect::<Vec<_>>();
            let degree = Tensor::from_vec(degree, (num_nodes, 1), feats.device())?
                .to_dtype(feats.dtype())?;
            Ok(out.broadcast_div(&degree)?)
        }
    }
}
