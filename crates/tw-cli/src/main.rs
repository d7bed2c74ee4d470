//! trackwatch CLI
//!
//! Operator tool for replaying recorded browsing traces through the observer
//! and for inspecting or editing the persisted tracking state.

mod trace;

use std::collections::HashMap;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use tw_core::types::{Category, GateDecision, RequestInfo};
use tw_observer::{JsonFileStore, NoopSink, Observer};

use trace::{Event, Trace, TraceCookies, TraceHistory, TraceWindows};

#[derive(Parser)]
#[command(name = "tw-cli")]
#[command(about = "trackwatch trace replay and state tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a recorded browsing trace through the observer
    Replay {
        /// Trace file (JSON)
        #[arg(short, long)]
        trace: String,

        /// Directory holding the persisted state blobs
        #[arg(short, long, default_value = ".trackwatch")]
        state_dir: String,

        /// Print the decision for every request
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print by-site and by-tracker reports over persisted state
    Report {
        /// Directory holding the persisted state blobs
        #[arg(short, long, default_value = ".trackwatch")]
        state_dir: String,
    },

    /// Block a tracker domain, or a whole category given as a single letter
    Block {
        /// Directory holding the persisted state blobs
        #[arg(short, long, default_value = ".trackwatch")]
        state_dir: String,

        /// Tracker domain or category letter (A-F)
        target: String,
    },

    /// Undo a domain or category block
    Unblock {
        /// Directory holding the persisted state blobs
        #[arg(short, long, default_value = ".trackwatch")]
        state_dir: String,

        /// Tracker domain or category letter (A-F)
        target: String,
    },
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Replay {
            trace,
            state_dir,
            verbose,
        } => cmd_replay(&trace, &state_dir, verbose).await,
        Commands::Report { state_dir } => cmd_report(&state_dir).await,
        Commands::Block { state_dir, target } => cmd_block(&state_dir, &target, true).await,
        Commands::Unblock { state_dir, target } => cmd_block(&state_dir, &target, false).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn load_observer(
    state_dir: &str,
    cookies: TraceCookies,
    windows: TraceWindows,
) -> Result<Observer, String> {
    Observer::load(
        Arc::new(JsonFileStore::new(state_dir)),
        Arc::new(cookies),
        Arc::new(windows),
        Arc::new(TraceHistory),
        Arc::new(NoopSink),
    )
    .await
    .map_err(|e| format!("Failed to load state from '{state_dir}': {e}"))
}

async fn cmd_replay(trace_path: &str, state_dir: &str, verbose: bool) -> Result<(), String> {
    let trace = Trace::load(trace_path)?;
    log::debug!("trace '{}': {} events", trace_path, trace.events.len());
    let observer = load_observer(
        state_dir,
        TraceCookies(trace.cookies),
        TraceWindows(trace.windows),
    )
    .await?;

    let mut requests = 0usize;
    let mut cancelled = 0usize;
    let mut stripped = 0usize;

    for event in trace.events {
        match event {
            Event::TabUpdated {
                tab_id,
                url,
                window_id,
                loading,
            } => observer.tab_updated(tab_id, &url, window_id, loading),
            Event::TabRemoved { tab_id } => observer.tab_removed(tab_id),
            Event::CookieSet {
                tab_id,
                page_url,
                call_stack,
                cookie,
            } => observer.cookie_set_reported(tab_id, &page_url, &call_stack, &cookie),
            Event::HistoryVisited { url } => observer.history_visited(&url),
            Event::Request {
                url,
                tab_id,
                headers,
            } => {
                requests += 1;
                let request = RequestInfo {
                    url,
                    tab_id,
                    headers,
                };
                let outcome = observer.gate(&request);
                match outcome.decision {
                    GateDecision::Cancel => cancelled += 1,
                    GateDecision::StripCookies => stripped += 1,
                    GateDecision::Allow => {}
                }
                if verbose {
                    println!("  {:<12} {}", decision_str(outcome.decision), request.url);
                }
                observer.complete(outcome.side_work).await;
            }
        }
    }

    observer
        .flush()
        .await
        .map_err(|e| format!("Failed to persist state to '{state_dir}': {e}"))?;

    let trackers = observer.get_trackers();
    println!("Replayed '{trace_path}'");
    println!("  Requests:   {requests}");
    println!("  Cancelled:  {cancelled}");
    println!("  Stripped:   {stripped}");
    println!("  Trackers:   {}", trackers.len());

    Ok(())
}

async fn cmd_report(state_dir: &str) -> Result<(), String> {
    let observer = load_observer(
        state_dir,
        TraceCookies(HashMap::new()),
        TraceWindows(HashMap::new()),
    )
    .await?;

    println!("Sites:");
    for (site, tracker_map) in observer.get_trackers_by_site() {
        println!("  {site}");
        for (domain, categories) in tracker_map {
            println!("    {:<40} {}", domain, categories_str(&categories));
        }
    }
    println!();

    println!("Trackers:");
    for (domain, summary) in observer.get_trackers() {
        println!(
            "  {:<30} {:<8} on {} site(s)",
            domain,
            categories_str(&summary.categories),
            summary.tracked_sites.len()
        );
    }
    println!();

    let blocked = observer.get_blocked_domains();
    let categories = observer.get_blocked_categories();
    let stripping = observer.get_remove_cookie_domains();
    println!("Blocked domains:    {}", list_str(&blocked));
    println!(
        "Blocked categories: {}",
        categories_str(&categories)
    );
    println!("Stripping cookies:  {}", list_str(&stripping));

    Ok(())
}

async fn cmd_block(state_dir: &str, target: &str, block: bool) -> Result<(), String> {
    let observer = load_observer(
        state_dir,
        TraceCookies(HashMap::new()),
        TraceWindows(HashMap::new()),
    )
    .await?;

    // A single letter means a category sweep; anything else is a domain.
    if target.len() == 1 {
        let category: Category = target
            .parse()
            .map_err(|_| format!("Unknown category '{target}' (expected A-F)"))?;
        if block {
            observer.block_category(category);
            println!("Blocked category {category}");
        } else {
            observer.unblock_category(category);
            println!("Unblocked category {category}");
        }
    } else if block {
        observer.block_tracker_domain(target);
        println!("Blocked {target}");
    } else {
        observer.unblock_tracker_domain(target);
        println!("Unblocked {target}");
    }

    observer
        .flush()
        .await
        .map_err(|e| format!("Failed to persist state to '{state_dir}': {e}"))
}

fn decision_str(decision: GateDecision) -> &'static str {
    match decision {
        GateDecision::Allow => "allow",
        GateDecision::Cancel => "cancel",
        GateDecision::StripCookies => "strip-cookies",
    }
}

fn categories_str(categories: &[Category]) -> String {
    if categories.is_empty() {
        return "-".to_string();
    }
    categories
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

fn list_str(items: &[String]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}
