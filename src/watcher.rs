//! Change watcher for the data file.
//!
//! Filesystem events for the tracked file are forwarded as [`WatchSignal`]s to
//! a single loop thread. The loop owns a [`Debouncer`]; every change restarts
//! the quiet window and a pass runs only once the window elapses without
//! further changes. Passes run on the loop thread, so they never overlap:
//! changes that arrive mid-pass are drained into the debouncer when the pass
//! returns and open a fresh window.

use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchSignal {
    /// The tracked file was written.
    Changed,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Pending { deadline: Instant },
    Processing,
}

/// Debounce state machine: idle → pending → processing → idle.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    state: WatchState,
    queued: bool,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            state: WatchState::Idle,
            queued: false,
        }
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    /// Record a change. Starts or restarts the window; during a pass the
    /// change is remembered and opens a new window when the pass finishes.
    pub fn on_change(&mut self, now: Instant) {
        match self.state {
            WatchState::Idle | WatchState::Pending { .. } => {
                self.state = WatchState::Pending {
                    deadline: now + self.delay,
                };
            }
            WatchState::Processing => self.queued = true,
        }
    }

    /// Time until the pending window closes, or `None` when nothing is pending.
    pub fn time_left(&self, now: Instant) -> Option<Duration> {
        match self.state {
            WatchState::Pending { deadline } => Some(deadline.saturating_duration_since(now)),
            _ => None,
        }
    }

    /// Move to processing if the window has closed.
    pub fn try_begin_pass(&mut self, now: Instant) -> bool {
        match self.state {
            WatchState::Pending { deadline } if now >= deadline => {
                self.state = WatchState::Processing;
                true
            }
            _ => false,
        }
    }

    pub fn finish_pass(&mut self, now: Instant) {
        self.state = WatchState::Idle;
        if std::mem::take(&mut self.queued) {
            self.on_change(now);
        }
    }
}

/// Drive the debouncer from `signals` until shutdown, calling `on_stable`
/// once per closed window. Returns the number of passes started.
///
/// A failed pass is logged and the loop goes back to waiting.
pub fn run_loop<F>(signals: Receiver<WatchSignal>, delay: Duration, mut on_stable: F) -> usize
where
    F: FnMut() -> Result<()>,
{
    let mut debouncer = Debouncer::new(delay);
    let mut passes = 0;

    loop {
        let timer = match debouncer.time_left(Instant::now()) {
            Some(left) => crossbeam_channel::after(left),
            None => crossbeam_channel::never(),
        };

        crossbeam_channel::select! {
            recv(signals) -> msg => match msg {
                Ok(WatchSignal::Changed) => {
                    tracing::debug!("change recorded, debounce window restarted");
                    debouncer.on_change(Instant::now());
                }
                Ok(WatchSignal::Shutdown) | Err(_) => break,
            },
            recv(timer) -> _ => {
                if debouncer.try_begin_pass(Instant::now()) {
                    passes += 1;
                    tracing::info!(pass = passes, "data file stable, starting pass");
                    if let Err(e) = on_stable() {
                        tracing::error!(error = %format!("{:#}", e), "pass failed");
                    }
                    // Changes seen during the pass are queued on the debouncer.
                    let mut shutdown = false;
                    for signal in signals.try_iter() {
                        match signal {
                            WatchSignal::Changed => debouncer.on_change(Instant::now()),
                            WatchSignal::Shutdown => {
                                shutdown = true;
                                break;
                            }
                        }
                    }
                    debouncer.finish_pass(Instant::now());
                    if shutdown {
                        break;
                    }
                }
            }
        }
    }

    passes
}

/// Absolute form of `path`, resolved through its canonical parent directory.
///
/// The file itself need not exist yet.
pub fn tracked_path(path: &Path) -> Result<PathBuf> {
    let file_name = path
        .file_name()
        .with_context(|| format!("Not a file path: {}", path.display()))?;
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let parent = parent
        .canonicalize()
        .with_context(|| format!("Cannot watch directory: {}", parent.display()))?;
    Ok(parent.join(file_name))
}

/// True for create or modify events that touch `tracked`.
pub fn is_relevant(event: &Event, tracked: &Path) -> bool {
    matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
        && event
            .paths
            .iter()
            .any(|p| p.as_path() == tracked && !p.is_dir())
}

/// A running watcher: the notify handle plus the debounce loop thread.
pub struct ChangeWatcher {
    tracked: PathBuf,
    watcher: Option<RecommendedWatcher>,
    signals: Sender<WatchSignal>,
    worker: Option<JoinHandle<usize>>,
}

impl ChangeWatcher {
    /// Watch `data_file` and call `on_stable` after each quiet window of `delay`.
    pub fn start<F>(data_file: &Path, delay: Duration, on_stable: F) -> Result<Self>
    where
        F: FnMut() -> Result<()> + Send + 'static,
    {
        let tracked = tracked_path(data_file)?;
        let (tx, rx) = crossbeam_channel::unbounded();

        let worker = std::thread::Builder::new()
            .name("bugreport-watch".into())
            .spawn(move || run_loop(rx, delay, on_stable))
            .context("Failed to spawn watch thread")?;

        let events_tx = tx.clone();
        let filter_path = tracked.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if is_relevant(&event, &filter_path) {
                    let _ = events_tx.send(WatchSignal::Changed);
                }
            }
            Err(e) => tracing::warn!(error = %e, "watch error"),
        })
        .context("Failed to create filesystem watcher")?;

        let dir = tracked.parent().unwrap_or(Path::new("."));
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {}", dir.display()))?;
        tracing::info!(path = %tracked.display(), debounce_ms = delay.as_millis() as u64, "watching");

        Ok(Self {
            tracked,
            watcher: Some(watcher),
            signals: tx,
            worker: Some(worker),
        })
    }

    pub fn tracked(&self) -> &Path {
        &self.tracked
    }

    /// Behave as if the file had just been written.
    pub fn trigger(&self) {
        let _ = self.signals.send(WatchSignal::Changed);
    }

    /// Stop watching, wait for an in-flight pass, and return the pass count.
    pub fn stop(mut self) -> Result<usize> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<usize> {
        drop(self.watcher.take());
        let _ = self.signals.send(WatchSignal::Shutdown);
        match self.worker.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| anyhow::anyhow!("watch thread panicked")),
            None => Ok(0),
        }
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
