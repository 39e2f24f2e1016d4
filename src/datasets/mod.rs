mod citation;
pub use citation::*;

mod cora;
pub use cora::*;

mod linqs;
pub use linqs::*;

mod pubmed;
pub use pubmed::*;

mod utils;
pub use utils::*;
