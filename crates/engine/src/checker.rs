//! Periodic reconciliation job
//!
//! Walks the whole local tree on a schedule and enqueues any file that
//! drifted from its remote object, repairing events the real-time path
//! missed or failed to apply. The job never deletes remote objects.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveTime};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use walkdir::WalkDir;

use obsync_core::{Config, IgnoreMatcher};

use crate::compare::Comparator;

/// Scheduled full-tree comparison against the remote
pub struct CheckJob {
    enable: bool,
    /// Hours between walks, minimum 1
    interval_hours: u64,
    initial_delay: Duration,
    local_root: PathBuf,
    ignore: Arc<IgnoreMatcher>,
    compare: Arc<Comparator>,
    upload_tx: mpsc::Sender<PathBuf>,
}

impl CheckJob {
    #[must_use]
    pub fn new(
        config: &Config,
        ignore: Arc<IgnoreMatcher>,
        compare: Arc<Comparator>,
        upload_tx: mpsc::Sender<PathBuf>,
    ) -> Self {
        Self {
            enable: config.sync.check_job.enable,
            interval_hours: config.sync.check_job.interval.max(1),
            initial_delay: delay_until(&config.sync.check_job.start_at, Local::now()),
            local_root: config.local.path.clone(),
            ignore,
            compare,
            upload_tx,
        }
    }

    /// Sleep until the configured start time, then walk every interval
    pub async fn run(self, cancel: CancellationToken) {
        if !self.enable {
            debug!("the check job is disabled");
            return;
        }
        info!("the check job will first run in {:?}", self.initial_delay);

        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(self.initial_delay) => {}
        }

        loop {
            self.walk(&cancel).await;
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(Duration::from_secs(self.interval_hours * 3600)) => {}
            }
        }
    }

    /// One full-tree pass: enqueue every non-ignored file that differs.
    /// Exposed so a one-shot reconciliation can be driven directly.
    pub async fn walk(&self, cancel: &CancellationToken) {
        info!("check job begin");

        let ignore = Arc::clone(&self.ignore);
        let walker = WalkDir::new(&self.local_root)
            .into_iter()
            .filter_entry(move |entry| {
                !(entry.file_type().is_dir() && ignore.matches(entry.path()))
            });

        for entry in walker {
            if cancel.is_cancelled() {
                return;
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    error!("walk error: {err}");
                    continue;
                }
            };
            if entry.file_type().is_dir() {
                continue;
            }

            let path = entry.path();
            if self.ignore.matches(path) {
                continue;
            }
            if !self.compare.is_same(path).await {
                info!("differences found {}", path.display());
                if self.upload_tx.send(path.to_path_buf()).await.is_err() {
                    return;
                }
            }
        }

        info!("check job ends");
    }
}

/// Time until the next occurrence of the `HH:MM:SS` wall-clock instant.
/// Invalid values fall back to midnight.
fn delay_until(start_at: &str, now: DateTime<Local>) -> Duration {
    let time = NaiveTime::parse_from_str(start_at, "%H:%M:%S").unwrap_or_else(|err| {
        error!("parse start_at {start_at:?}: {err}, resetting to 00:00:00");
        NaiveTime::MIN
    });

    let naive_now = now.naive_local();
    let mut target = naive_now.date().and_time(time);
    if target < naive_now {
        target += chrono::Duration::days(1);
    }

    (target - naive_now).to_std().unwrap_or_default()
}
