//! The per-reader update loop.
//!
//! One background thread per reader. Each cycle waits out the poll period
//! (or a shutdown), runs a best-effort download, reads the local
//! `timestamp.latest`, and swaps the reader to a newer generation when one
//! appeared. Every download error is recoverable; the loop just tries again
//! next tick.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use strata_runtime::{read_latest_timestamp, Reader};

use crate::download::Downloader;

/// A single cancellation token honored at every suspension point of the
/// update loop. Cloned freely; all clones observe one flag.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    /// Trip the token and wake every waiter.
    pub fn cancel(&self) {
        let (flag, condvar) = &*self.inner;
        *flag.lock() = true;
        condvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Sleep for `period` or until cancelled. Returns true when cancelled.
    pub fn wait_for(&self, period: Duration) -> bool {
        let (flag, condvar) = &*self.inner;
        let mut cancelled = flag.lock();
        if *cancelled {
            return true;
        }
        condvar.wait_for(&mut cancelled, period);
        *cancelled
    }
}

/// Handle to one reader's background update task.
pub struct Updater {
    token: CancelToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Updater {
    /// Start the loop. `downloader` is optional: without one the loop only
    /// follows the local `timestamp.latest` marker.
    pub fn spawn(
        reader: Arc<Reader>,
        downloader: Option<Arc<Downloader>>,
        update_period: Duration,
    ) -> Updater {
        let token = CancelToken::new();
        let loop_token = token.clone();
        let handle = std::thread::Builder::new()
            .name(format!("strata-update-{}", reader.task()))
            .spawn(move || update_loop(reader, downloader, update_period, loop_token))
            .expect("spawning the update thread cannot fail");
        Updater {
            token,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    /// Signal shutdown and join the loop. Idempotent, callable from any
    /// thread.
    pub fn shutdown(&self) {
        self.token.cancel();
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                error!("update thread panicked");
            }
        }
    }
}

impl Drop for Updater {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn update_loop(
    reader: Arc<Reader>,
    downloader: Option<Arc<Downloader>>,
    update_period: Duration,
    token: CancelToken,
) {
    debug!(task = reader.task(), period = ?update_period, "update loop started");
    loop {
        if token.wait_for(update_period) {
            break;
        }

        if let Some(downloader) = &downloader {
            // Best-effort: a failed download leaves the current generation
            // serving and the next tick retries.
            if let Err(err) = downloader.run() {
                warn!(task = reader.task(), %err, "download failed");
            }
        }
        if token.is_cancelled() {
            break;
        }

        let latest = match read_latest_timestamp(reader.destination(), reader.task()) {
            Ok(ts) => ts,
            Err(err) => {
                warn!(task = reader.task(), %err, "cannot read latest timestamp");
                continue;
            }
        };
        let current = reader.most_recent_timestamp().unwrap_or(0);
        if latest > current {
            info!(task = reader.task(), latest, current, "found a new timestamp");
            if let Err(err) = reader.update(latest) {
                error!(task = reader.task(), latest, %err, "error updating to latest timestamp");
            }
        }
    }
    info!(task = reader.task(), "update loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Instant;

    use strata_runtime::{Builder, ReaderOptions, WriterOptions};

    #[test]
    fn cancel_token_wakes_waiters() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let start = Instant::now();
        let handle = std::thread::spawn(move || waiter.wait_for(Duration::from_secs(30)));
        std::thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert!(handle.join().unwrap());
        assert!(start.elapsed() < Duration::from_secs(5));
        // Subsequent waits return immediately.
        assert!(token.wait_for(Duration::from_secs(30)));
        assert!(token.is_cancelled());
    }

    #[test]
    fn wait_for_times_out_without_cancel() {
        let token = CancelToken::new();
        assert!(!token.wait_for(Duration::from_millis(10)));
    }

    fn publish(dir: &std::path::Path, task: &str, key: &[u8], value: &[u8]) -> u64 {
        let mut options = WriterOptions::new(task, dir);
        options.num_slots = 64;
        let mut builder = Builder::open(&options).unwrap();
        builder.insert_string(key, value).unwrap();
        builder.finalize().unwrap()
    }

    #[test]
    fn updater_observes_new_generation() {
        let dir = tempfile::tempdir().unwrap();
        publish(dir.path(), "t", b"key_333", b"val_333");

        let swaps = Arc::new(AtomicU64::new(0));
        let counted = swaps.clone();
        let mut options = ReaderOptions::new("t", dir.path());
        options.update_callback = Some(Arc::new(move |_: &strata_runtime::Reader| {
            counted.fetch_add(1, Ordering::SeqCst);
        }));
        let reader = strata_runtime::Reader::open(&options).unwrap();
        assert_eq!(reader.get_string(b"key_333").unwrap(), "val_333");
        assert_eq!(swaps.load(Ordering::SeqCst), 1);

        let updater = Updater::spawn(reader.clone(), None, Duration::from_millis(20));

        // An external agent publishes a newer artifact.
        std::thread::sleep(Duration::from_millis(5));
        publish(dir.path(), "t", b"key_333", b"val_331");

        // Within one period (plus slack) the swap is observed.
        let deadline = Instant::now() + Duration::from_secs(5);
        while reader.get_string(b"key_333").unwrap() != "val_331" {
            assert!(Instant::now() < deadline, "swap not observed in time");
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(swaps.load(Ordering::SeqCst) >= 2);

        updater.shutdown();
        updater.shutdown(); // idempotent
        reader.delete();
    }
}
