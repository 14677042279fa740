pub mod ingest;
pub mod sample;

pub use ingest::{compute_stats, load_panel, IngestedData, InputSpec, RowError};
pub use sample::{generate_panel, SampleConfig};
