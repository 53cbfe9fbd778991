//! Per-item worker pool. Every task runs inside its own error boundary: a
//! returned error or a panic is logged and recorded, never propagated, and
//! never retried.

use std::panic::{AssertUnwindSafe, catch_unwind};

use anyhow::{Context, Result};
use rayon::prelude::*;

use crate::config::ConfigError;

/// Threads to use for an `n_jobs` setting: `-1` means every available core.
pub fn resolve_jobs(n_jobs: i32) -> Result<usize, ConfigError> {
    match n_jobs {
        -1 => Ok(std::thread::available_parallelism().map_or(1, |n| n.get())),
        n if n > 0 => Ok(n as usize),
        n => Err(ConfigError::InvalidJobs(n)),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskFailure {
    pub index: usize,
    pub error: String,
}

/// Results of a parallel map. `results` are sorted by item index.
#[derive(Debug)]
pub struct Outcome<R> {
    pub results: Vec<(usize, R)>,
    pub failures: Vec<TaskFailure>,
}

impl<R> Outcome<R> {
    pub fn values(self) -> impl Iterator<Item = R> {
        self.results.into_iter().map(|(_, r)| r)
    }
}

/// Run `task` over `items` on a pool of `n_jobs` threads.
///
/// `label` names the items in log lines, e.g. `"species detection"`. The only
/// error returned is a bad `n_jobs` or a pool that cannot be built.
pub fn map_parallel<T, R, F>(items: &[T], n_jobs: i32, label: &str, task: F) -> Result<Outcome<R>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> Result<R> + Sync,
{
    let threads = resolve_jobs(n_jobs)?;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .context("building worker pool")?;
    log::info!("Running {label} on {} items with {threads} workers", items.len());

    let settled: Vec<(usize, Result<R, String>)> = pool.install(|| {
        items
            .par_iter()
            .enumerate()
            .map(|(idx, item)| {
                let result = match catch_unwind(AssertUnwindSafe(|| task(item))) {
                    Ok(Ok(r)) => Ok(r),
                    Ok(Err(e)) => Err(format!("{e:#}")),
                    Err(panic) => Err(panic_message(panic.as_ref())),
                };
                (idx, result)
            })
            .collect()
    });

    let mut outcome = Outcome { results: Vec::new(), failures: Vec::new() };
    for (index, result) in settled {
        match result {
            Ok(r) => outcome.results.push((index, r)),
            Err(error) => {
                log::error!("{label} failed on item {index}: {error}");
                outcome.failures.push(TaskFailure { index, error });
            }
        }
    }
    outcome.results.sort_by_key(|(idx, _)| *idx);
    outcome.failures.sort_by_key(|f| f.index);

    if !outcome.failures.is_empty() {
        log::warn!("{label}: {} of {} items failed", outcome.failures.len(), items.len());
    }
    Ok(outcome)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minus_one_means_all_cores() {
        assert!(resolve_jobs(-1).unwrap() >= 1);
        assert_eq!(resolve_jobs(3).unwrap(), 3);
        assert!(matches!(resolve_jobs(0), Err(ConfigError::InvalidJobs(0))));
        assert!(matches!(resolve_jobs(-2), Err(ConfigError::InvalidJobs(-2))));
    }

    #[test]
    fn failures_are_captured_and_results_ordered() {
        let items: Vec<i32> = (0..20).collect();
        let outcome = map_parallel(&items, 4, "squares", |&x| {
            if x % 7 == 3 {
                anyhow::bail!("bad item {x}");
            }
            Ok(x * x)
        })
        .unwrap();

        let indices: Vec<usize> = outcome.results.iter().map(|(i, _)| *i).collect();
        let mut sorted = indices.clone();
        sorted.sort();
        assert_eq!(indices, sorted);
        assert_eq!(outcome.failures.len(), 3);
        assert_eq!(outcome.failures[0].index, 3);
        assert_eq!(outcome.failures[0].error, "bad item 3");
        assert_eq!(outcome.values().count(), 17);
    }

    #[test]
    fn panics_do_not_escape() {
        let outcome = map_parallel(&[1, 2], 1, "panicky", |&x: &i32| {
            if x == 2 {
                panic!("boom");
            }
            Ok(x)
        })
        .unwrap();
        assert_eq!(outcome.results, vec![(0, 1)]);
        assert!(outcome.failures[0].error.contains("boom"));
    }

    #[test]
    fn zero_jobs_is_an_error() {
        assert!(map_parallel(&[1], 0, "none", |&x: &i32| Ok(x)).is_err());
    }
}
