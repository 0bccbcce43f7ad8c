//! Filesystem watcher with hot-file coalescing
//!
//! The OS watch primitive is not recursive, so every directory under the
//! sync root is subscribed individually and the subscription set is kept
//! consistent across creates, removes, and renames. Writes to recently
//! uploaded paths are held in a delay map and flushed once per hot-delay
//! window instead of being enqueued immediately.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use color_eyre::eyre::eyre;
use color_eyre::Result;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use walkdir::WalkDir;

use obsync_core::{Config, HotSet, IgnoreMatcher, Md5Cache};

/// Real-time engine: consumes filesystem events and feeds the queues
pub struct Watcher {
    enable: bool,
    local_root: PathBuf,
    hot_delay: Duration,
    ignore: Arc<IgnoreMatcher>,
    hotset: HotSet,
    cache: Arc<Md5Cache>,
    upload_tx: mpsc::Sender<PathBuf>,
    delete_tx: mpsc::Sender<PathBuf>,
    notify: RecommendedWatcher,
    events: Option<mpsc::Receiver<notify::Result<Event>>>,
    /// Directories currently subscribed to the OS watcher
    watched: HashSet<PathBuf>,
    /// Hot paths being coalesced, keyed to their first write
    delayed: HashMap<PathBuf, Instant>,
}

impl Watcher {
    /// Create the watcher and its OS watch handle.
    ///
    /// # Errors
    /// Returns an error if the OS watch primitive cannot be initialized.
    pub fn new(
        config: &Config,
        ignore: Arc<IgnoreMatcher>,
        hotset: HotSet,
        cache: Arc<Md5Cache>,
        upload_tx: mpsc::Sender<PathBuf>,
        delete_tx: mpsc::Sender<PathBuf>,
    ) -> Result<Self> {
        let (event_tx, event_rx) = mpsc::channel(1024);
        let notify = RecommendedWatcher::new(
            move |res| {
                let _ = event_tx.blocking_send(res);
            },
            notify::Config::default(),
        )?;

        Ok(Self {
            enable: config.sync.real_time.enable,
            local_root: config.local.path.clone(),
            hot_delay: config.hot_delay(),
            ignore,
            hotset,
            cache,
            upload_tx,
            delete_tx,
            notify,
            events: Some(event_rx),
            watched: HashSet::new(),
            delayed: HashMap::new(),
        })
    }

    /// Main loop: multiplex filesystem events, the 1-second coalescing
    /// tick, and cancellation.
    ///
    /// When real-time sync is disabled the task parks on cancellation so
    /// check-job-only deployments keep running.
    ///
    /// # Errors
    /// Returns an error if the watcher was already consumed.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        if !self.enable {
            debug!("real-time sync is disabled");
            cancel.cancelled().await;
            return Ok(());
        }

        let root = self.local_root.clone();
        self.subscribe(&root);

        let mut events = self
            .events
            .take()
            .ok_or_else(|| eyre!("watcher already running"))?;
        let mut tick = tokio::time::interval(Duration::from_secs(1));

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("watcher received shutdown signal, exiting");
                    break;
                }
                _ = tick.tick() => self.flush_delayed().await,
                next = events.recv() => match next {
                    Some(Ok(event)) => self.handle_event(event).await,
                    Some(Err(err)) => error!("watch error: {err}"),
                    None => break,
                },
            }
        }
        Ok(())
    }

    /// Dispatch one OS event. Renames surface as a remove of the old name
    /// and a create of the new one; chmod-only events are dropped.
    async fn handle_event(&mut self, event: Event) {
        match event.kind {
            EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                for path in &event.paths {
                    self.on_create(path).await;
                }
            }
            EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                for path in &event.paths {
                    self.on_remove(path).await;
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                if let [from, to] = &event.paths[..] {
                    self.on_remove(from).await;
                    self.on_create(to).await;
                }
            }
            EventKind::Modify(ModifyKind::Name(_)) => {
                // Unpaired rename notification; existence decides the side.
                for path in &event.paths {
                    if path.exists() {
                        self.on_create(path).await;
                    } else {
                        self.on_remove(path).await;
                    }
                }
            }
            EventKind::Modify(ModifyKind::Metadata(_)) => {}
            EventKind::Modify(_) => {
                for path in &event.paths {
                    self.on_write(path).await;
                }
            }
            _ => {}
        }
    }

    async fn on_create(&mut self, path: &Path) {
        if self.ignore.matches(path) {
            debug!("ignore {}", path.display());
            return;
        }
        debug!("event create {}", path.display());

        // A directory arriving via rename already has children that will
        // produce no events of their own; subscribe the whole subtree.
        self.subscribe(path);
        self.send_upload(path.to_path_buf()).await;
    }

    async fn on_write(&mut self, path: &Path) {
        if self.ignore.matches(path) {
            debug!("ignore {}", path.display());
            return;
        }
        debug!("event write {}", path.display());
        self.cache.invalidate(path);

        if self.hotset.contains(path) {
            // First write wins; later writes in the window are absorbed.
            if !self.delayed.contains_key(path) {
                self.delayed.insert(path.to_path_buf(), Instant::now());
                debug!("hot path, delaying sync {}", path.display());
            }
        } else {
            self.send_upload(path.to_path_buf()).await;
        }
    }

    async fn on_remove(&mut self, path: &Path) {
        if self.ignore.matches(path) {
            debug!("ignore {}", path.display());
            return;
        }
        debug!("event remove {}", path.display());

        // Unsubscribe the path and every watched directory below it; the
        // OS only drops the renamed directory itself, not its subtree.
        let victims: Vec<PathBuf> = self
            .watched
            .iter()
            .filter(|dir| dir.starts_with(path))
            .cloned()
            .collect();
        for dir in victims {
            if let Err(err) = self.notify.unwatch(&dir) {
                debug!("watch remove {}: {err}", dir.display());
            }
            self.watched.remove(&dir);
            debug!("watch remove {}", dir.display());
        }

        self.send_delete(path.to_path_buf()).await;
    }

    /// Subscribe every non-ignored directory under `root`
    fn subscribe(&mut self, root: &Path) {
        let ignore = Arc::clone(&self.ignore);
        let walker = WalkDir::new(root)
            .into_iter()
            .filter_entry(move |entry| !ignore.matches(entry.path()));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    error!("walk error under {}: {err}", root.display());
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            let dir = entry.path();
            if self.watched.contains(dir) {
                continue;
            }
            match self.notify.watch(dir, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    self.watched.insert(dir.to_path_buf());
                    debug!("watch add {}", dir.display());
                }
                Err(err) => error!("watch add {}: {err}", dir.display()),
            }
        }
    }

    /// Enqueue every delay entry whose hot-delay window has elapsed
    async fn flush_delayed(&mut self) {
        let now = Instant::now();
        let due: Vec<PathBuf> = self
            .delayed
            .iter()
            .filter(|(_, first_seen)| now.duration_since(**first_seen) >= self.hot_delay)
            .map(|(path, _)| path.clone())
            .collect();

        for path in due {
            self.delayed.remove(&path);
            debug!("flushing delayed path {}", path.display());
            self.send_upload(path).await;
        }
    }

    async fn send_upload(&self, path: PathBuf) {
        if self.upload_tx.send(path).await.is_err() {
            debug!("upload queue closed");
        }
    }

    async fn send_delete(&self, path: PathBuf) {
        if self.delete_tx.send(path).await.is_err() {
            debug!("delete queue closed");
        }
    }
}
