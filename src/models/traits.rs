use candle_core::Tensor;

use crate::error::Result;
use crate::graph::Graph;

pub trait GnnModule {
    fn forward_t(&self, x: &Tensor, graph: &Graph, train: bool) -> Result<Tensor>;

    fn forward(&self, x: &Tensor, graph: &Graph) -> Result<Tensor> {
        self.forward_t(x, graph, false)
    }
}
