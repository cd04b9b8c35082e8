//! # Optimizer Module
//!
//! Modulo che separa le responsabilità in sottomoduli:
//! - `pipeline`: client di trasformazione remota per un singolo record
//! - `workspace`: stato di sessione posseduto esplicitamente (coda, crop, export)

pub mod pipeline;
pub mod workspace;

pub use pipeline::{savings_percent, Pipeline};
pub use workspace::{Comparison, Workspace};
