use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::catalog::{self, BadRecordPolicy, Catalog, CatalogHandle};
use crate::Result;

/// State shared by the scheduler and every in-flight cycle.
struct Inner {
    dir: PathBuf,
    handle: CatalogHandle,
    generation: AtomicU64,
    in_flight: AtomicBool,
}

/// Periodically rebuilds the catalog from a songs directory and swaps the
/// result into a [`CatalogHandle`].
#[derive(Clone)]
pub struct CatalogReloader {
    inner: Arc<Inner>,
    interval: Duration,
    policy: BadRecordPolicy,
    single_flight: bool,
}

impl CatalogReloader {
    /// Creates a reloader for `dir` that publishes into `handle` every
    /// `interval` once spawned. Bad song files are skipped by default.
    pub fn new(dir: impl Into<PathBuf>, interval: Duration, handle: CatalogHandle) -> Self {
        Self {
            inner: Arc::new(Inner {
                dir: dir.into(),
                handle,
                generation: AtomicU64::new(0),
                in_flight: AtomicBool::new(false),
            }),
            interval,
            policy: BadRecordPolicy::default(),
            single_flight: true,
        }
    }

    /// What a cycle does with a song file that cannot be read or parsed.
    pub fn with_policy(mut self, policy: BadRecordPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// When enabled (the default) a cycle is skipped while the previous one
    /// is still rebuilding.
    pub fn with_single_flight(mut self, enabled: bool) -> Self {
        self.single_flight = enabled;
        self
    }

    /// Directory scanned by every cycle.
    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// Handle the reloader publishes into.
    pub fn handle(&self) -> &CatalogHandle {
        &self.inner.handle
    }

    /// Runs one rescan-parse-swap cycle on the calling thread and returns the
    /// catalog it built, whether or not a newer one had already been swapped
    /// in.
    ///
    /// On error the previously published catalog stays in place.
    pub fn reload_once(&self) -> Result<Arc<Catalog>> {
        self.inner.reload(self.policy)
    }

    /// Starts the background schedule. The first cycle runs immediately, each
    /// further one `interval` after the previous one was started.
    pub fn spawn(self) -> std::io::Result<ReloaderHandle> {
        let (stop, stopped) = mpsc::channel::<()>();
        let thread = thread::Builder::new()
            .name("kbox-reload".to_string())
            .spawn(move || {
                tracing::info!(path = ?self.inner.dir, interval = ?self.interval, "reloading songs");
                loop {
                    let started = Instant::now();
                    self.start_cycle();
                    let wait = self.interval.saturating_sub(started.elapsed());
                    match stopped.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::debug!("reloader stopped");
            })?;

        Ok(ReloaderHandle { stop, thread })
    }

    fn start_cycle(&self) {
        let inner = self.inner.clone();
        let policy = self.policy;
        let single_flight = self.single_flight;
        if single_flight && inner.in_flight.swap(true, Ordering::AcqRel) {
            tracing::debug!("previous reload still running, skipping cycle");
            return;
        }

        let spawned = thread::Builder::new()
            .name("kbox-reload-cycle".to_string())
            .spawn(move || {
                let _flight = single_flight.then(|| FlightGuard(&inner));
                if let Err(err) = inner.reload(policy) {
                    tracing::error!(error = %err, path = ?inner.dir, "reload failed, keeping previous songs");
                }
            });

        if let Err(err) = spawned {
            if single_flight {
                self.inner.in_flight.store(false, Ordering::Release);
            }
            tracing::error!(error = %err, "could not start reload cycle");
        }
    }
}

impl std::fmt::Debug for CatalogReloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogReloader")
            .field("dir", &self.inner.dir)
            .field("interval", &self.interval)
            .field("policy", &self.policy)
            .field("single_flight", &self.single_flight)
            .finish()
    }
}

impl Inner {
    fn reload(&self, policy: BadRecordPolicy) -> Result<Arc<Catalog>> {
        // Issued at cycle start so that a slow cycle cannot overwrite a newer
        // one that finished first.
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let catalog = Arc::new(catalog::rebuild(&self.dir, policy, generation)?);
        let records = catalog.len();
        if self.handle.replace(catalog.clone())? {
            tracing::debug!(generation, records, "catalog reloaded");
        } else {
            tracing::debug!(generation, records, "newer catalog already published");
        }
        Ok(catalog)
    }
}

struct FlightGuard<'a>(&'a Inner);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.in_flight.store(false, Ordering::Release);
    }
}

/// Owner of a running reload schedule.
#[derive(Debug)]
pub struct ReloaderHandle {
    stop: mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

impl ReloaderHandle {
    /// Stops scheduling new cycles and waits for the scheduler to exit. A
    /// cycle already rebuilding finishes on its own.
    pub fn stop(self) {
        let _ = self.stop.send(());
        if self.thread.join().is_err() {
            tracing::error!("reload scheduler panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_song(dir: &Path, file: &str, name: &str) {
        fs::write(dir.join(file), format!("song {{ name: \"{name}\" }}\n")).unwrap();
    }

    #[test]
    fn reload_once_swaps_in_new_generation() {
        let dir = tempdir().unwrap();
        write_song(dir.path(), "one.sng", "One");
        let handle = CatalogHandle::new();
        let reloader = CatalogReloader::new(dir.path(), Duration::from_secs(5), handle.clone());

        let first = reloader.reload_once().unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first.generation(), 1);

        write_song(dir.path(), "two.sng", "Two");
        reloader.reload_once().unwrap();
        assert_eq!(handle.snapshot().unwrap().len(), 2);
        assert_eq!(handle.snapshot().unwrap().generation(), 2);
        assert_eq!(first.len(), 1);
    }

    #[test]
    fn empty_reload_replaces_stale_songs() {
        let dir = tempdir().unwrap();
        write_song(dir.path(), "one.sng", "One");
        let handle = CatalogHandle::new();
        let reloader = CatalogReloader::new(dir.path(), Duration::from_secs(5), handle.clone());
        reloader.reload_once().unwrap();

        fs::remove_file(dir.path().join("one.sng")).unwrap();
        reloader.reload_once().unwrap();
        assert!(handle.snapshot().unwrap().is_empty());
    }

    #[test]
    fn fatal_policy_keeps_previous_catalog() {
        let dir = tempdir().unwrap();
        write_song(dir.path(), "one.sng", "One");
        let handle = CatalogHandle::new();
        let reloader = CatalogReloader::new(dir.path(), Duration::from_secs(5), handle.clone())
            .with_policy(BadRecordPolicy::Fatal);
        reloader.reload_once().unwrap();

        fs::write(dir.path().join("broken.sng"), "song {").unwrap();
        assert!(reloader.reload_once().is_err());
        assert_eq!(handle.snapshot().unwrap().len(), 1);
    }

    #[test]
    fn policy_survives_cloning_the_reloader() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("bad.sng"), "song {").unwrap();
        let reloader = CatalogReloader::new(dir.path(), Duration::from_secs(5), CatalogHandle::new());
        let _keep = reloader.clone();

        let reloader = reloader.with_policy(BadRecordPolicy::Fatal);
        assert!(reloader.reload_once().is_err());
    }

    #[test]
    fn returns_the_catalog_it_built_even_when_stale() {
        let dir = tempdir().unwrap();
        write_song(dir.path(), "one.sng", "One");
        let handle = CatalogHandle::new();
        handle.replace(Catalog::new(Default::default(), 100)).unwrap();

        let reloader = CatalogReloader::new(dir.path(), Duration::from_secs(5), handle.clone());
        let built = reloader.reload_once().unwrap();
        assert_eq!(built.generation(), 1);
        assert_eq!(built.len(), 1);
        assert_eq!(handle.snapshot().unwrap().generation(), 100);
    }

    #[test]
    fn background_schedule_picks_up_changes() {
        let dir = tempdir().unwrap();
        let handle = CatalogHandle::new();
        let running = CatalogReloader::new(dir.path(), Duration::from_millis(10), handle.clone())
            .spawn()
            .unwrap();

        write_song(dir.path(), "late.sng", "Late");
        let key = catalog::song_key(dir.path(), "late.sng");
        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.lookup(&key).unwrap().is_none() {
            assert!(Instant::now() < deadline, "song never appeared");
            thread::sleep(Duration::from_millis(5));
        }
        running.stop();
    }

    #[test]
    fn single_flight_skips_overlapping_cycle() {
        let dir = tempdir().unwrap();
        let reloader = CatalogReloader::new(dir.path(), Duration::from_secs(5), CatalogHandle::new());

        reloader.inner.in_flight.store(true, Ordering::Release);
        reloader.start_cycle();
        assert_eq!(reloader.inner.generation.load(Ordering::Acquire), 0);
        assert!(reloader.inner.in_flight.load(Ordering::Acquire));
    }
}
