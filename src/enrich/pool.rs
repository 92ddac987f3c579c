//! Bounded worker pool for independent, network-bound lookup tasks.
//!
//! Spawns `min(concurrency, items)` persistent workers pulling from a shared
//! queue, plus a reporter task that polls completion depth once per second
//! and renders a progress bar. The call blocks until all workers have
//! exited. Completion order is not guaranteed; callers must only submit
//! work whose side effects are independently keyed.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

/// Interval between progress reporter polls.
const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Runs `per_item` over every item with bounded concurrency.
///
/// Each worker invokes `per_item` one item at a time. A panicked worker is
/// not respawned: the surviving workers drain the remaining items, so with
/// a single worker a panic abandons the rest of the queue.
#[instrument(skip(items, per_item), fields(items = items.len(), concurrency, label))]
pub async fn run<T, F, Fut>(items: Vec<T>, per_item: F, concurrency: usize, label: &str)
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let total = items.len();
    if total == 0 {
        return;
    }
    let workers = concurrency.max(1).min(total);
    debug!(workers, "starting worker pool");

    let queue = Arc::new(Mutex::new(VecDeque::from(items)));
    let done = Arc::new(AtomicUsize::new(0));
    let per_item = Arc::new(per_item);

    let bar = ProgressBar::new(total as u64);
    bar.set_style(
        ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.set_message(label.to_string());

    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let queue = Arc::clone(&queue);
        let done = Arc::clone(&done);
        let per_item = Arc::clone(&per_item);
        handles.push(tokio::spawn(async move {
            loop {
                let item = { queue.lock().await.pop_front() };
                let Some(item) = item else { break };
                per_item(item).await;
                done.fetch_add(1, Ordering::SeqCst);
            }
        }));
    }

    let reporter = {
        let done = Arc::clone(&done);
        let bar = bar.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(REPORT_INTERVAL);
            loop {
                tick.tick().await;
                let completed = done.load(Ordering::SeqCst);
                bar.set_position(completed as u64);
                if completed >= total {
                    break;
                }
            }
        })
    };

    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "enrichment worker panicked");
        }
    }

    // A panicked worker can leave the counter short of total; the pool is
    // done regardless once all workers have exited.
    reporter.abort();
    let _ = reporter.await;
    bar.finish_and_clear();
    debug!(completed = done.load(Ordering::SeqCst), "worker pool drained");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pool_invokes_per_item_exactly_once_each() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let items: Vec<u32> = (0..25).collect();

        let seen_in = Arc::clone(&seen);
        run(
            items,
            move |item| {
                let seen = Arc::clone(&seen_in);
                async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    seen.lock().unwrap().push(item);
                }
            },
            10,
            "test",
        )
        .await;

        let mut seen = seen.lock().unwrap().clone();
        seen.sort_unstable();
        assert_eq!(seen, (0..25).collect::<Vec<u32>>(), "no duplicate, no omission");
    }

    #[tokio::test]
    async fn test_pool_clamps_concurrency_to_batch_size() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let active_in = Arc::clone(&active);
        let peak_in = Arc::clone(&peak);
        run(
            vec![1, 2, 3],
            move |_item| {
                let active = Arc::clone(&active_in);
                let peak = Arc::clone(&peak_in);
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                }
            },
            100,
            "test",
        )
        .await;

        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_pool_empty_batch_returns_immediately() {
        run(
            Vec::<u32>::new(),
            |_item| async move { panic!("must not be called") },
            10,
            "test",
        )
        .await;
    }

    #[tokio::test]
    async fn test_pool_survives_item_panic() {
        let done = Arc::new(AtomicUsize::new(0));
        let done_in = Arc::clone(&done);

        run(
            vec![0u32, 1, 2, 3],
            move |item| {
                let done = Arc::clone(&done_in);
                async move {
                    assert!(item != 1, "boom");
                    done.fetch_add(1, Ordering::SeqCst);
                }
            },
            1,
            "test",
        )
        .await;

        // The panicking worker is replaced by nothing, but with concurrency 1
        // the panic kills the only worker after item 1; remaining items stay
        // queued. What matters is the pool itself returns cleanly.
        assert!(done.load(Ordering::SeqCst) >= 1);
    }
}
