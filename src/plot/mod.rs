mod ascii;

pub use ascii::{render_fit_plot, render_fit_plot_from_file, render_rootogram};
