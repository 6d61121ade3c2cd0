//! Fixed-size worker pool over a bounded channel, for the per-image stages.

use std::thread;

use crossbeam_channel::bounded;
use tracing::debug;

use crate::progress::Progress;

/// Apply `work` to every item on `workers` threads and return the results in
/// input order. `progress` advances once per finished item.
pub fn map_parallel<T, R, F>(items: Vec<T>, workers: usize, progress: &Progress, work: F) -> Vec<R>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Sync,
{
    let count = items.len();
    let workers = workers.clamp(1, count.max(1));
    let (job_tx, job_rx) = bounded::<(usize, T)>(workers * 2);
    let (result_tx, result_rx) = bounded::<(usize, R)>(workers * 2);

    let mut results: Vec<Option<R>> = (0..count).map(|_| None).collect();
    thread::scope(|scope| {
        for worker_id in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let work = &work;
            scope.spawn(move || {
                debug!(worker_id, "worker started");
                while let Ok((idx, item)) = job_rx.recv() {
                    if result_tx.send((idx, work(item))).is_err() {
                        break;
                    }
                }
                debug!(worker_id, "worker shutting down");
            });
        }
        drop(job_rx);
        drop(result_tx);

        scope.spawn(move || {
            for job in items.into_iter().enumerate() {
                if job_tx.send(job).is_err() {
                    break;
                }
            }
        });

        for (idx, result) in result_rx.iter() {
            results[idx] = Some(result);
            progress.inc(1);
        }
    });

    results.into_iter().flatten().collect()
}

/// [`map_parallel`] for work whose result is only logged.
pub fn for_each_parallel<T, F>(items: Vec<T>, workers: usize, progress: &Progress, work: F)
where
    T: Send,
    F: Fn(T) + Sync,
{
    map_parallel(items, workers, progress, work);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn results_keep_input_order() {
        let items: Vec<u64> = (0..100).collect();
        let out = map_parallel(items, 8, &Progress::hidden(), |n| {
            // uneven work so completion order differs from input order
            thread::sleep(std::time::Duration::from_micros((100 - n) * 10));
            n * n
        });
        assert_eq!(out, (0..100).map(|n| n * n).collect::<Vec<_>>());
    }

    #[test]
    fn every_item_visited_once() {
        let seen = AtomicUsize::new(0);
        for_each_parallel((0..37).collect::<Vec<_>>(), 4, &Progress::hidden(), |_| {
            seen.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(seen.load(Ordering::Relaxed), 37);
    }

    #[test]
    fn empty_input() {
        let out: Vec<i32> = map_parallel(Vec::<i32>::new(), 4, &Progress::hidden(), |x| x);
        assert!(out.is_empty());
    }
}
