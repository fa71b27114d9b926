pub mod adjacency;
pub mod cli;
pub mod clustering;
pub mod config;
pub mod covariates;
pub mod diagnostics;
pub mod error;
pub mod evaluation;
pub mod logging;
pub mod match_log;
pub mod model;
pub mod pipeline;
pub mod posterior;
pub mod registry;
pub mod report;
pub mod sampler;

pub use adjacency::{AdjacencyMatrix, AdjacencyStack, PairKey, build_adjacency_stack};
pub use error::DataError;
pub use registry::TeamRegistry;
