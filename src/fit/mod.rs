pub mod diagnostics;
pub mod sampler;
pub mod selection;

pub use sampler::{sample_posterior, Posterior, SamplerConfig};
pub use selection::{fit_and_select, FitResult, FitSelection};
