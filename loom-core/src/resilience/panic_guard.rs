//! Task supervision (SPEC_FULL.md §5.1).
//!
//! Each long-running loop owned by [`crate::system::TradingSystem`] (the
//! per-account WS supervisor, cancel queue worker, failed order manager,
//! reaper, repair sweep) is wrapped with `supervise` so a panic inside it
//! is caught, logged, and the loop respawned with backoff instead of
//! silently ending the task or aborting the process. This generalizes the
//! teacher's `resilience::panic` "catch, log, keep the process alive"
//! philosophy from strategy callbacks to whole background tasks.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use tracing::error;

use super::backoff::{BackoffConfig, ExponentialBackoff};

/// Runs `make_task()` in a loop, restarting it with exponential backoff
/// whenever the future panics or returns. Intended to be spawned once per
/// supervised loop and left running for the process lifetime.
pub async fn supervise<F, Fut>(name: &str, mut make_task: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut backoff = ExponentialBackoff::with_config(BackoffConfig {
        initial_delay: std::time::Duration::from_millis(500),
        max_delay: std::time::Duration::from_secs(60),
        multiplier: 2.0,
        max_retries: None,
        jitter_factor: 0.2,
    });

    loop {
        let result = AssertUnwindSafe(make_task()).catch_unwind().await;
        match result {
            Ok(()) => {
                error!(task = name, "supervised task returned; restarting");
            }
            Err(panic) => {
                let msg = panic_message(&panic);
                error!(task = name, panic = %msg, "supervised task panicked; restarting");
            }
        }
        if let Some(delay) = backoff.next_delay() {
            tokio::time::sleep(delay).await;
        } else {
            backoff.reset();
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn restarts_after_panic() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let supervised = supervise("test-task", move || {
            let attempts = attempts_clone.clone();
            async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    panic!("boom");
                }
                // On the second attempt, "return" so the test can stop.
            }
        });

        let _ = tokio::time::timeout(std::time::Duration::from_secs(2), supervised).await;
        assert!(attempts.load(Ordering::SeqCst) >= 2);
    }
}
