mod traits;
pub use traits::GnnModule;
mod utils;
pub use utils::LayerParams;

mod gcn;
pub use gcn::{Gcn, GcnLayer};
mod egl_gcn;
pub use egl_gcn::{EglGcn, EglGcnLayer};
