//! CLI entry point for the mediathek downloader.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use mediathek_dl::{
    Candidate, Database, DownloadEngine, HttpTransfer, Pipeline, RatingClient, SearchClient,
    Store, download::HttpSeriesCatalog,
};
use tracing::{debug, info};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let run = args.run;
    let series = args.series;
    let mark_done = args.mark_done;
    let mark_undone = args.mark_undone;
    let config = args.into_config();

    tokio::fs::create_dir_all(&config.config_dir).await?;
    let db = Database::new(&config.db_path()).await?;
    let store = Store::new(db);

    let transfer = Arc::new(HttpTransfer::new());
    let catalog = Arc::new(HttpSeriesCatalog::new());
    let engine = DownloadEngine::new(store.clone(), transfer).with_catalog(catalog.clone());
    let pipeline = Pipeline::new(store, SearchClient::new(), RatingClient::new(), engine)
        .with_catalog(catalog);

    if series {
        let batches = pipeline.collect_series(&config).await?;
        for batch in &batches {
            println!("== {} ==", batch.series);
            print_listing(&batch.candidates);
        }
        if run {
            let stats = pipeline.download_series(&batches).await;
            info!(
                committed = stats.committed,
                discarded = stats.discarded,
                skipped = stats.skipped,
                "series run complete"
            );
        } else {
            info!(series = batches.len(), "listing only; pass --run to download");
        }
        return Ok(());
    }

    let (candidates, ratings) = pipeline.collect(&config).await?;
    if candidates.is_empty() {
        info!("no candidates match the query");
        return Ok(());
    }
    print_listing(&candidates);

    if mark_done || mark_undone {
        pipeline.mark(&candidates, mark_done).await?;
        info!(
            count = candidates.len(),
            done = mark_done,
            "download ledger updated"
        );
        return Ok(());
    }

    if run {
        let stats = pipeline.download(&config, &candidates, ratings.as_ref()).await;
        info!(
            committed = stats.committed,
            discarded = stats.discarded,
            skipped = stats.skipped,
            "run complete"
        );
    } else {
        info!("listing only; pass --run to download");
    }
    Ok(())
}

/// Prints the numbered candidate table the --select flag indexes into.
fn print_listing(candidates: &[Candidate]) {
    for (i, c) in candidates.iter().enumerate() {
        let date = c
            .published_at
            .map_or_else(|| "----------".to_string(), |d| d.format("%Y-%m-%d").to_string());
        let minutes = c.duration.as_secs() / 60;
        println!(
            "{i:>4}  {date}  {:>7.1} MB  {minutes:>4} min  [{}]  {}",
            c.size_mb, c.channel, c.title
        );
    }
}
