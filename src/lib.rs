//! Gene-level association of predicted expression with GWAS summary statistics.

pub mod error;
pub mod logging;
pub mod types;

pub mod io;
pub mod matrix;
pub mod parallel;
pub mod qc;
pub mod schema;

pub mod alleles;
pub mod association;
pub mod covariance;
pub mod gwas;
pub mod joint;
pub mod model;
pub mod results;
