use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::warn;

use product_aggregator::config::{init_tracing, Settings};
use product_aggregator::db::SnapshotStore;
use product_aggregator::pipeline::{Aggregation, Aggregator, FetchRequest, DEFAULT_MAX_PER_SITE};
use product_aggregator::record::CanonicalRecord;
use product_aggregator::sources::{Binding, Registry};

#[derive(Parser)]
#[command(name = "prodagg", about = "Search several shops at once and compare listings")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search every enabled source and print the merged listings
    Search {
        query: String,
        /// Max listings per source
        #[arg(short = 'n', long, default_value_t = DEFAULT_MAX_PER_SITE)]
        max_per_site: usize,
        /// Only run these sources (repeatable, case-insensitive)
        #[arg(short = 's', long = "source")]
        sources: Vec<String>,
        /// Show the browser window for browser-driven sources
        #[arg(long)]
        headed: bool,
        /// Do not record a snapshot of the results
        #[arg(long)]
        no_save: bool,
    },
    /// List saved snapshots, newest first
    Snapshots {
        /// Only snapshots for this exact query
        #[arg(short, long)]
        query: Option<String>,
        /// Rows to preview per snapshot
        #[arg(short = 'n', long, default_value = "3")]
        preview: usize,
    },
    /// Delete a snapshot by id
    Delete { id: i64 },
    /// Show configured sources and whether they can run
    Sources,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (settings, settings_err) = match Settings::load() {
        Ok(s) => (s, None),
        Err(e) => (Settings::default(), Some(e)),
    };
    init_tracing(&settings.log_level);
    if let Some(e) = settings_err {
        warn!("Could not read settings from the environment, using defaults: {:#}", e);
    }

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Search {
            query,
            max_per_site,
            sources,
            headed,
            no_save,
        } => {
            let store = Arc::new(SnapshotStore::new(&settings.db_path));
            let aggregator = Aggregator::new(Registry::standard(&settings))
                .with_snapshots(store)
                .with_source_timeout(settings.source_timeout());

            let mut request = FetchRequest::new(query)
                .max_per_site(max_per_site)
                .headless(!headed)
                .persist(!no_save);
            if !sources.is_empty() {
                request = request.sources(sources);
            }

            let pb = ProgressBar::new_spinner();
            pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed}] {msg}")?);
            pb.set_message(format!("Searching for '{}'...", request.query));
            pb.enable_steady_tick(Duration::from_millis(120));
            let agg = aggregator.fetch(&request).await;
            pb.finish_and_clear();

            print_aggregation(&agg);
            Ok(())
        }
        Commands::Snapshots { query, preview } => {
            let store = SnapshotStore::new(&settings.db_path);
            let snapshots = store.try_load(query.as_deref())?;
            if snapshots.is_empty() {
                println!("No snapshots found.");
                return Ok(());
            }
            for s in &snapshots {
                println!(
                    "#{:<4} {:<24} {}  ({} rows)",
                    s.id,
                    truncate(&s.query, 24),
                    s.created_at,
                    s.rows.len()
                );
                for r in s.rows.iter().take(preview) {
                    println!(
                        "      {:<40} {:>10}  {}",
                        truncate(&r.title, 40),
                        price_cell(r),
                        r.source
                    );
                }
                if s.rows.len() > preview && preview > 0 {
                    println!("      ... {} more", s.rows.len() - preview);
                }
            }
            println!("\n{} snapshots", snapshots.len());
            Ok(())
        }
        Commands::Delete { id } => {
            let store = SnapshotStore::new(&settings.db_path);
            if store.delete(id)? {
                println!("Deleted snapshot #{}.", id);
            } else {
                println!("No snapshot with id {}.", id);
            }
            Ok(())
        }
        Commands::Sources => {
            let registry = Registry::standard(&settings);
            for entry in registry.entries() {
                match &entry.binding {
                    Binding::Available(_) => println!("{:<10} available", entry.id),
                    Binding::Unavailable(reason) => {
                        println!("{:<10} unavailable: {}", entry.id, reason)
                    }
                }
            }
            println!("\nWebDriver endpoint: {}", settings.webdriver_url);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn print_aggregation(agg: &Aggregation) {
    if agg.results.is_empty() {
        println!("No products found.");
    } else {
        println!(
            "{:>3} | {:<40} | {:>10} | {:<8} | {}",
            "#", "Title", "Price", "Source", "Link"
        );
        println!("{}", "-".repeat(100));
        for (i, r) in agg.results.iter().enumerate() {
            println!(
                "{:>3} | {:<40} | {:>10} | {:<8} | {}",
                i + 1,
                truncate(&r.title, 40),
                price_cell(r),
                truncate(&r.source, 8),
                r.link
            );
        }
    }

    println!("\n--- Sources ---");
    for s in &agg.sources {
        match &s.reason {
            Some(reason) => println!("  {:<10} {:<11} {}", s.source, s.status, truncate(reason, 60)),
            None => println!("  {:<10} {:<11} {} items", s.source, s.status, s.items),
        }
    }

    let snapshot = agg
        .snapshot_id
        .map(|id| format!(" | saved as snapshot #{}", id))
        .unwrap_or_default();
    println!("\n{} products{}", agg.results.len(), snapshot);
}

fn price_cell(r: &CanonicalRecord) -> String {
    r.price
        .map(|p| format!("{} {:.0}", r.currency, p))
        .unwrap_or_else(|| "-".into())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
