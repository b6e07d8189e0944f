use anyhow::{Context, Result};
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;

/// Applies `f` to every item on a pool of `cores` threads, or on the global
/// pool when `cores` is `None`.
///
/// Output keeps input order; the first failing item in that order is the
/// error returned.
pub fn try_par_map<I, T, F>(items: &[I], cores: Option<usize>, f: F) -> Result<Vec<T>>
where
    I: Sync,
    T: Send,
    F: Fn(&I) -> Result<T> + Sync + Send,
{
    let run = || items.par_iter().map(&f).collect::<Vec<Result<T>>>();
    let results = match cores {
        Some(cores) => {
            let threads = cores.clamp(1, items.len().max(1));
            if threads < cores {
                tracing::debug!("{cores} cores requested for {} tasks; using {threads}", items.len());
            }
            ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .context("build thread pool")?
                .install(run)
        }
        None => run(),
    };
    results.into_iter().collect()
}
