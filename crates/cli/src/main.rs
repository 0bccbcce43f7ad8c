//! obsync: One-way continuous replication to object storage
//!
//! Mirrors a local directory tree to an S3-compatible bucket by combining
//! a real-time watcher with a periodic reconciliation walk. The local
//! tree is the source of truth; remote drift is repaired on the next
//! event or walk.

use std::path::PathBuf;
use std::sync::Arc;

use clap::builder::styling::{AnsiColor, Effects};
use clap::{builder::Styles, Parser};
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use obsync_core::{logging, Config, HotSet, IgnoreMatcher, KeyMap, Md5Cache};
use obsync_engine::{
    transfer, CheckJob, Comparator, Transfer, Watcher, DELETE_QUEUE_CAP, UPLOAD_QUEUE_CAP,
    WORKER_COUNT,
};
use obsync_store::{ObjectStore, S3Store};

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default())
    .valid(AnsiColor::Green.on_default())
    .invalid(AnsiColor::Red.on_default());

#[derive(Parser)]
#[command(name = "obsync")]
#[command(version)]
#[command(styles = STYLES)]
#[command(about = "Mirror a local directory to S3-compatible object storage")]
#[command(long_about = r#"
obsync keeps a bucket in sync with a local directory tree.

Two engines cooperate:
  • real-time   - filesystem events drive uploads and deletes
  • check job   - a scheduled walk repairs anything the events missed

The local tree always wins; remote changes are overwritten on the next
visit. Configure endpoints, schedules, and ignore rules in the YAML
config file.
"#)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short = 'c', long = "config", default_value = "./config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    let _log_guards = logging::init(&config.log)?;

    println!("{}", config.summary());

    std::fs::read_dir(&config.local.path).wrap_err_with(|| {
        format!(
            "local path {} is not readable",
            config.local.path.display()
        )
    })?;

    let store: Arc<dyn ObjectStore> = Arc::new(S3Store::new(&config.remote));
    store.bucket_exists().await?;

    run(&config, store).await
}

/// Wire up the shared state, queues, and tasks, then block until a
/// shutdown signal arrives and every task has drained.
async fn run(config: &Config, store: Arc<dyn ObjectStore>) -> Result<()> {
    let cancel = CancellationToken::new();
    let hotset = HotSet::new();
    let cache = Arc::new(Md5Cache::new());
    let ignore = Arc::new(IgnoreMatcher::new(&config.sync.ignore));
    let keymap = KeyMap::new(config.local.path.clone(), config.remote.path.clone());
    let compare = Arc::new(Comparator::new(
        Arc::clone(&store),
        keymap.clone(),
        Arc::clone(&cache),
        config.sync.symlink,
    ));

    let (upload_tx, upload_rx) = mpsc::channel(UPLOAD_QUEUE_CAP);
    let (delete_tx, delete_rx) = mpsc::channel(DELETE_QUEUE_CAP);
    let upload_rx = transfer::shared(upload_rx);
    let delete_rx = transfer::shared(delete_rx);

    let pool = Arc::new(Transfer::new(
        Arc::clone(&store),
        Arc::clone(&compare),
        keymap,
        hotset.clone(),
        config.hot_delay(),
        config.sync.symlink,
    ));

    let mut workers = JoinSet::new();
    for _ in 0..WORKER_COUNT {
        workers.spawn(Arc::clone(&pool).run(
            Arc::clone(&upload_rx),
            Arc::clone(&delete_rx),
            cancel.clone(),
        ));
    }

    let checker = CheckJob::new(
        config,
        Arc::clone(&ignore),
        Arc::clone(&compare),
        upload_tx.clone(),
    );
    let checker_task = tokio::spawn(checker.run(cancel.clone()));

    let watcher = Watcher::new(
        config,
        ignore,
        hotset.clone(),
        cache,
        upload_tx,
        delete_tx,
    )?;
    let mut watcher_task = tokio::spawn(watcher.run(cancel.clone()));

    let mut watcher_done = false;
    tokio::select! {
        sig = shutdown_signal() => {
            sig?;
            info!("shutdown signal received, stopping");
        }
        res = &mut watcher_task => {
            watcher_done = true;
            res??;
            info!("watcher exited, stopping");
        }
    }

    cancel.cancel();
    hotset.stop();

    if !watcher_done {
        watcher_task.await??;
    }
    checker_task.await?;
    while let Some(res) = workers.join_next().await {
        if let Err(err) = res {
            error!("worker task failed: {err}");
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Resolves when SIGINT or SIGTERM arrives
async fn shutdown_signal() -> Result<()> {
    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
    Ok(())
}
