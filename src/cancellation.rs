//! Cooperative cancellation signal threaded through every suspension point.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

/// Maximum chunk size for any cancellation-aware sleep.
pub const SLEEP_CHUNK: Duration = Duration::from_millis(500);

/// A cheaply-cloneable cancellation flag.
///
/// Call [`CancellationToken::cancel`] from whatever owns the run (e.g. an
/// HTTP handler reacting to a client disconnect) and every in-flight sleep
/// or resource wait observes it within one chunk.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self { flag: Arc::new(AtomicBool::new(false)) }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Sleep for `duration`, polling `token` every [`SLEEP_CHUNK`] at most.
///
/// Returns `false` if the sleep ran to completion, `true` if it was cut
/// short by cancellation.
pub async fn sleep_cancellable(duration: Duration, token: &CancellationToken) -> bool {
    let mut remaining = duration;
    loop {
        if token.is_cancelled() {
            return true;
        }
        if remaining.is_zero() {
            return false;
        }
        let chunk = remaining.min(SLEEP_CHUNK);
        sleep(chunk).await;
        remaining -= chunk;
    }
}
