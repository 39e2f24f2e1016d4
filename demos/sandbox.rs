use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};

use candle_gcn::backend::BackendKind;
use candle_gcn::config::GcnConfig;
use candle_gcn::models::{EglGcn, Gcn, GnnModule};
use candle_gcn::Graph;

// cargo run --example sandbox
//
// Runs the SpMV model and the offloaded model on the same parameters and
// prints how far apart their outputs are for every backend.
fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("debug").init();
    let device = Device::Cpu;

    let n = 32u32;
    let src: Vec<u32> = (0..n).flat_map(|v| [v, v]).collect();
    let dst: Vec<u32> = (0..n).flat_map(|v| [(v + 1) % n, (v * 7 + 3) % n]).collect();
    let graph = Graph::new(n as usize, &src, &dst, &device)?
        .to_undirected()?
        .add_self_loops()?
        .with_norm()?;
    let x = Tensor::randn(0f32, 1., (n as usize, 16), &device)?;

    let varmap = VarMap::new();
    let vs = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let config = GcnConfig {
        n_layers: 2,
        ..GcnConfig::new(16, 4)
    };
    let gcn = Gcn::new(&config, vs.pp("gcn"))?;
    let expected = gcn.forward(&x, &graph)?;

    for kind in [BackendKind::Native, BackendKind::Dense, BackendKind::Chunked] {
        let egl = EglGcn::new(&config, kind.build(), vs.pp("gcn"))?;
        let h = egl.forward(&x, &graph)?;
        let diff = (h - &expected)?.abs()?.flatten_all()?.max(0)?.to_scalar::<f32>()?;
        println!("{kind:?}: max |egl - spmv| = {diff:e}");
    }
    Ok(())
}
