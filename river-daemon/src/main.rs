use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use river_core::{
    build_client, load_subscriptions, spawn_poller, AggregationSink, Event, FetchCache, Fetcher,
    FingerprintLedger, IntervalEstimator, PollContext, RiverConfig, Schedule,
};

/// Polls subscribed feeds and maintains river.js files for publication.
#[derive(Debug, Parser)]
#[command(name = "riverd", version, about)]
struct Args {
    /// Subscription list: a YAML file path or HTTP(S) URL mapping river
    /// names to feed URLs.
    subscriptions: String,

    /// Directory holding ledger, cache, history, and river state.
    #[arg(long, default_value = "state")]
    state_dir: PathBuf,

    /// Directory river.js files are written under.
    #[arg(long, default_value = "output")]
    output_dir: PathBuf,

    /// Optional config file overriding the built-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured worker count.
    #[arg(long)]
    workers: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => RiverConfig::from_file(path)
            .with_context(|| format!("malformed config file {}", path.display()))?,
        None => RiverConfig::default(),
    };
    if let Some(workers) = args.workers {
        config.workers = workers;
    }

    let client = build_client(&config).context("failed to build HTTP client")?;

    let subscriptions = load_subscriptions(&args.subscriptions, &client)
        .await
        .context("failed to load subscription list")?;

    tokio::fs::create_dir_all(&args.state_dir)
        .await
        .with_context(|| format!("failed to create state dir {}", args.state_dir.display()))?;

    let ledger =
        FingerprintLedger::load_from(args.state_dir.join("fingerprints.json"), config.ledger_cap)
            .await;
    let cache = FetchCache::load_from(args.state_dir.join("cache.json")).await;
    let estimator = IntervalEstimator::load_from(args.state_dir.join("history.json"), &config).await;
    let schedule = Schedule::load_from(args.state_dir.join("schedule.json")).await;
    let sink = AggregationSink::load_from(args.state_dir.join("rivers.json"), &config).await;

    sink.register_subscriptions(&subscriptions).await;
    let now = Utc::now();
    for subscription in &subscriptions {
        for feed in &subscription.feeds {
            schedule.ensure(feed, now).await;
        }
    }

    info!(
        rivers = subscriptions.len(),
        feeds = schedule.len().await,
        workers = config.workers,
        "riverd starting"
    );

    let (update_tx, mut update_rx) = mpsc::channel(64);
    let ctx = PollContext {
        config,
        fetcher: Fetcher::new(client, cache),
        ledger,
        estimator,
        schedule,
        sink,
    };
    let poller = spawn_poller(ctx.clone(), update_tx);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            event = update_rx.recv() => match event {
                Some(Event::RiverChanged(name)) => write_river(&ctx, &args.output_dir, &name).await,
                None => break,
            },
        }
    }

    poller.stop().await.context("poller did not stop cleanly")?;
    Ok(())
}

async fn write_river(ctx: &PollContext, output_dir: &std::path::Path, name: &str) {
    let Some(snapshot) = ctx.sink.river_snapshot(name).await else {
        warn!(river = %name, "change notification for unknown river");
        return;
    };
    match river_core::write_river_js(output_dir, &snapshot).await {
        Ok(path) => info!(river = %name, path = %path.display(), "wrote river.js"),
        Err(err) => warn!(river = %name, error = %err, "failed to write river.js"),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
