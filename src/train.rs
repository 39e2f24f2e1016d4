use std::time::Instant;

use candle_core::{DType, Tensor, D};
use candle_nn::{loss, AdamW, Optimizer, ParamsAdamW, VarMap};
use tracing::info;

use crate::config::TrainConfig;
use crate::datasets::CitationDataset;
use crate::error::Result;
use crate::graph::Graph;
use crate::models::GnnModule;

/// Fraction of `indices` whose argmax prediction equals the label.
/// An empty index set scores 0.
pub fn accuracy(logits: &Tensor, labels: &Tensor, indices: &Tensor) -> Result<f32> {
    if indices.elem_count() == 0 {
        return Ok(0.0);
    }
    Ok(logits
        .index_select(indices, 0)?
        .argmax(D::Minus1)?
        .eq(&labels.index_select(indices, 0)?)?
        .to_dtype(DType::F32)?
        .mean_all()?
        .to_scalar::<f32>()?)
}

/// Evaluation runs every `every` epochs and after the last one; `every == 0`
/// turns periodic evaluation off.
fn is_eval_epoch(epoch: usize, every: usize, epochs: usize) -> bool {
    every > 0 && (epoch % every == 0 || epoch + 1 == epochs)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub train_accuracy: f32,
    pub val_accuracy: f32,
    pub test_accuracy: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainReport {
    pub losses: Vec<f32>,
    pub evaluation: Evaluation,
}

/// Full-batch node classification with AdamW and cross entropy.
pub struct Trainer<M> {
    model: M,
    optimizer: AdamW,
    config: TrainConfig,
}

impl<M: GnnModule> Trainer<M> {
    pub fn new(model: M, varmap: &VarMap, config: TrainConfig) -> Result<Self> {
        config.validate()?;
        let optimizer = AdamW::new(
            varmap.all_vars(),
            ParamsAdamW {
                lr: config.lr,
                weight_decay: config.weight_decay,
                ..Default::default()
            },
        )?;
        Ok(Self {
            model,
            optimizer,
            config,
        })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// The graph the model is trained on: optional self loops, norm cached.
    pub fn prepare_graph(&self, graph: &Graph) -> Result<Graph> {
        let graph = if self.config.self_loop {
            graph.add_self_loops()?
        } else {
            graph.clone()
        };
        graph.with_norm()
    }

    pub fn evaluate(&self, dataset: &CitationDataset, graph: &Graph) -> Result<Evaluation> {
        let logits = self.model.forward(&dataset.features, graph)?;
        Ok(Evaluation {
            train_accuracy: accuracy(&logits, &dataset.labels, &dataset.train_indices)?,
            val_accuracy: accuracy(&logits, &dataset.labels, &dataset.val_indices)?,
            test_accuracy: accuracy(&logits, &dataset.labels, &dataset.test_indices)?,
        })
    }

    pub fn fit(&mut self, dataset: &CitationDataset) -> Result<TrainReport> {
        let graph = self.prepare_graph(&dataset.graph)?;
        let train_labels = dataset.labels.index_select(&dataset.train_indices, 0)?;
        let mut losses = Vec::with_capacity(self.config.epochs);
        let start = Instant::now();

        for epoch in 0..self.config.epochs {
            let logits = self.model.forward_t(&dataset.features, &graph, true)?;
            let loss = loss::cross_entropy(
                &logits.index_select(&dataset.train_indices, 0)?,
                &train_labels,
            )?;
            self.optimizer.backward_step(&loss)?;
            let loss = loss.to_scalar::<f32>()?;
            losses.push(loss);

            if is_eval_epoch(epoch, self.config.eval_every, self.config.epochs) {
                let eval = self.evaluate(dataset, &graph)?;
                info!(
                    epoch,
                    loss,
                    train_acc = eval.train_accuracy,
                    val_acc = eval.val_accuracy,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "epoch"
                );
            }
        }

        let evaluation = self.evaluate(dataset, &graph)?;
        info!(
            dataset = %dataset.name,
            test_acc = evaluation.test_accuracy,
            "training finished"
        );
        Ok(TrainReport { losses, evaluation })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcnConfig;
    use crate::graph::NORM;
    use crate::models::Gcn;
    use candle_core::Device;
    use candle_nn::VarBuilder;

    fn trainer(self_loop: bool) -> Trainer<Gcn> {
        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let gcn = Gcn::new(&GcnConfig::new(4, 2), vs).unwrap();
        let config = TrainConfig {
            self_loop,
            ..Default::default()
        };
        Trainer::new(gcn, &varmap, config).unwrap()
    }

    #[test]
    fn prepared_graph_caches_norm() {
        let g = Graph::new(3, &[0, 1], &[1, 2], &Device::Cpu).unwrap();

        let looped = trainer(true).prepare_graph(&g).unwrap();
        assert_eq!(looped.num_edges(), 5);
        assert!(looped.ndata().contains(NORM));

        let plain = trainer(false).prepare_graph(&g).unwrap();
        assert_eq!(plain.src_ids(), g.src_ids());
        assert_eq!(plain.dst_ids(), g.dst_ids());
        assert!(plain.ndata().contains(NORM));
        assert!(!g.ndata().contains(NORM));
    }

    #[test]
    fn eval_schedule() {
        let epochs: Vec<usize> = (0..25).filter(|&e| is_eval_epoch(e, 10, 25)).collect();
        assert_eq!(epochs, [0, 10, 20, 24]);
        assert!((0..25).all(|e| !is_eval_epoch(e, 0, 25)));
        let epochs: Vec<usize> = (0..3).filter(|&e| is_eval_epoch(e, 1, 3)).collect();
        assert_eq!(epochs, [0, 1, 2]);
    }

    #[test]
    fn accuracy_on_subset() {
        let dev = Device::Cpu;
        let logits = Tensor::new(&[[2f32, 1.], [0., 3.], [5., 1.], [0., 1.]], &dev).unwrap();
        let labels = Tensor::new(&[0u32, 1, 1, 1], &dev).unwrap();
        let all = Tensor::new(&[0u32, 1, 2, 3], &dev).unwrap();
        assert_eq!(accuracy(&logits, &labels, &all).unwrap(), 0.75);
        let some = Tensor::new(&[2u32], &dev).unwrap();
        assert_eq!(accuracy(&logits, &labels, &some).unwrap(), 0.0);
        let none = Tensor::from_vec(Vec::<u32>::new(), 0, &dev).unwrap();
        assert_eq!(accuracy(&logits, &labels, &none).unwrap(), 0.0);
    }
}
