//! Graph Convolutional Networks on candle.
//!
//! Two layer flavours compute the same propagation rule
//! `h' = act(D^-1/2 A^T D^-1/2 h W + b)`:
//!
//! * [`models::GcnLayer`] aggregates with the built-in copy-src / sum
//!   message passing in [`message`].
//! * [`models::EglGcnLayer`] hands the aggregation to an
//!   [`backend::ExecutionBackend`] through a [`backend::ContextManager`] scope.

pub mod backend;
pub mod config;
pub mod datasets;
pub mod error;
pub mod graph;
pub mod message;
pub mod models;
pub mod train;
pub mod utils;

pub use error::{GcnError, Result};
pub use graph::Graph;
