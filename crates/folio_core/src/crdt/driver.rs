//! Tokio task that drives the coordinator's debounce deadlines.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use super::coordinator::SnapshotSyncCoordinator;

/// Spawn a task that calls [`SnapshotSyncCoordinator::run_due`] whenever a
/// debounce deadline passes.
///
/// The coordinator should be built with a [`TokioClock`](super::TokioClock)
/// so deadlines follow tokio's (possibly paused) time. Abort the returned
/// handle on teardown, after `flush_all`.
pub fn spawn_debounce_driver(coordinator: Arc<SnapshotSyncCoordinator>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let wake = coordinator.wake_handle();
        loop {
            // Registered before reading the deadline so a concurrent edit is not missed.
            let notified = wake.notified();

            match coordinator.next_deadline() {
                Some(deadline) => {
                    tokio::select! {
                        _ = time::sleep_until(Instant::from_std(deadline)) => {}
                        _ = notified => continue,
                    }
                }
                None => {
                    notified.await;
                    continue;
                }
            }

            let exported = coordinator.run_due();
            if exported > 0 {
                log::debug!("[SyncDriver] Exported {} replica(s)", exported);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::crdt::{ReplicaKey, ReplicaRegistry, TokioClock};
    use crate::document::Block;
    use crate::error::Result;

    #[tokio::test(start_paused = true)]
    async fn test_driver_exports_after_quiet_period() {
        let exports = Arc::new(Mutex::new(0usize));
        let sink_exports = Arc::clone(&exports);
        let sink = move |_key: &ReplicaKey, _snapshot: &[u8]| -> Result<()> {
            *sink_exports.lock().unwrap() += 1;
            Ok(())
        };
        let coordinator = Arc::new(SnapshotSyncCoordinator::new(
            Arc::new(ReplicaRegistry::new()),
            Arc::new(TokioClock),
            Duration::from_millis(400),
            Arc::new(sink),
        ));
        let driver = spawn_debounce_driver(Arc::clone(&coordinator));

        let key = ReplicaKey::new("doc-1", "main");
        let replica = coordinator.acquire(&key, None).unwrap();

        for text in ["a", "ab", "abc"] {
            replica
                .doc()
                .replace_blocks(&Block::doc(vec![Block::paragraph(text)]));
            time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(*exports.lock().unwrap(), 0);

        time::sleep(Duration::from_millis(500)).await;
        assert_eq!(*exports.lock().unwrap(), 1);
        assert!(!coordinator.is_dirty(&key));

        driver.abort();
    }
}
