mod irls;
mod special;

pub use irls::{moment_inv_phi, poisson_irls, solve_least_squares, IrlsFit};
pub use special::{ln_gamma, neg_binomial_ln_pmf, normal_ln_pdf, poisson_ln_pmf};
