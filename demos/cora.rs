use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};

use candle_gcn::config::{GcnConfig, TrainConfig};
use candle_gcn::datasets::Cora;
use candle_gcn::models::Gcn;
use candle_gcn::train::Trainer;

// cargo run --example cora
fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();
    let device = Device::Cpu;

    // load dataset
    let cora = Cora::from_file("datasets/cora.npz", &device)?;

    // create a GCN model
    let varmap = VarMap::new();
    let vs = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let config = GcnConfig::new(cora.num_features(), cora.num_classes);
    let gcn = Gcn::new(&config, vs.pp("gcn"))?;

    // training loop
    let mut trainer = Trainer::new(gcn, &varmap, TrainConfig::default())?;
    let report = trainer.fit(&cora)?;
    println!(
        "Final train loss: {:8.5} Test accuracy: {:5.2}%",
        report.losses.last().copied().unwrap_or(f32::NAN),
        100.0 * report.evaluation.test_accuracy,
    );
    Ok(())
}
