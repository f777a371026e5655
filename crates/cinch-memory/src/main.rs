//! Inspect and maintain a cinch-memory store.
//!
//! # Examples
//!
//! ```sh
//! # Totals and the ten most recently used entries
//! cinch-memory --store .agents/memory.redb stats --limit 10
//!
//! # Full entry, including the stored original messages
//! cinch-memory --store .agents/memory.redb show mem_0f3a...
//!
//! # Protect an entry, or release it
//! cinch-memory --store .agents/memory.redb pin mem_0f3a... --max-pins 5
//! cinch-memory --store .agents/memory.redb unpin mem_0f3a...
//!
//! # Recent compaction passes
//! cinch-memory --store .agents/memory.redb events --limit 20
//!
//! # Compact a saved conversation offline (leading-words summaries)
//! cinch-memory --store .agents/memory.redb compact session.json --force -o compacted.json
//! ```
//!
//! Logging goes to stderr and follows `RUST_LOG` (default `info`).

use cinch_memory::context::sizing::estimate_tokens;
use cinch_memory::context::summarizer::{SUMMARY_MAX_WORDS, truncate_words};
use cinch_memory::prelude::*;
use cinch_memory::{DEFAULT_MODEL, agent::config::context_window_for_model};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Inspect and maintain a cinch-memory store.
#[derive(Parser)]
#[command(name = "cinch-memory")]
struct Cli {
    /// Path to the redb store.
    #[arg(long, default_value = ".agents/memory.redb")]
    store: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Entry totals and the most recently accessed entries.
    Stats {
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Print one entry as JSON. Counts as an access.
    Show { id: String },
    /// Pin an entry.
    Pin {
        id: String,
        #[arg(long, default_value_t = 5)]
        max_pins: usize,
    },
    /// Unpin an entry.
    Unpin { id: String },
    /// Most recent compaction events.
    Events {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Resolved compaction thresholds for a model.
    Thresholds {
        #[arg(long, default_value = DEFAULT_MODEL)]
        model: String,
        #[arg(long, default_value = "openrouter")]
        provider: String,
        /// JSON file with a `MemoryConfig`.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Compact a conversation saved as a JSON message array.
    ///
    /// Summaries are the leading words of each turn, so no model is called.
    Compact {
        input: PathBuf,
        /// Write the compacted messages here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Compact every eligible turn regardless of size.
        #[arg(long)]
        force: bool,
        #[arg(long, default_value = DEFAULT_MODEL)]
        model: String,
        #[arg(long, default_value = "openrouter")]
        provider: String,
        /// JSON file with a `MemoryConfig`.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Stats { limit, json } => {
            let store = MemoryStore::open(&cli.store)?;
            print_stats(&store.stats(limit)?, json)
        }
        Command::Show { id } => {
            let store = MemoryStore::open(&cli.store)?;
            let entry = store.access(&id, MemoryEntry::touch)?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
            Ok(())
        }
        Command::Pin { id, max_pins } => {
            let store = MemoryStore::open(&cli.store)?;
            let entry = store.pin(&id, true, max_pins)?;
            println!(
                "{} pinned ({}/{max_pins} pinned)",
                entry.id,
                store.pinned_count()?
            );
            Ok(())
        }
        Command::Unpin { id } => {
            let store = MemoryStore::open(&cli.store)?;
            let entry = store.pin(&id, false, usize::MAX)?;
            println!("{} unpinned ({} pinned)", entry.id, store.pinned_count()?);
            Ok(())
        }
        Command::Events { limit } => {
            let store = MemoryStore::open(&cli.store)?;
            for event in store.load_compaction_events(limit)? {
                println!(
                    "{}  {:>8} -> {:>8} bytes (~{} tokens freed)  {:>4}/{:<4} msgs  {}ms",
                    event.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    event.chars_before,
                    event.chars_after,
                    estimate_tokens(event.chars_freed()),
                    event.messages_compacted,
                    event.messages_considered,
                    event.duration_ms,
                );
            }
            Ok(())
        }
        Command::Thresholds {
            model,
            provider,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            let t = Thresholds::resolve(&config, &provider, &model);
            println!(
                "{provider}/{model}: window {} tokens (lookup {}), compaction above {} bytes, summary input capped at {} bytes",
                t.context_window_tokens,
                context_window_for_model(&provider, &model),
                t.conversation_bytes,
                t.message_bytes,
            );
            Ok(())
        }
        Command::Compact {
            input,
            output,
            force,
            model,
            provider,
            config,
        } => {
            let config = load_config(config.as_deref())?.with_store_path(&cli.store);
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            rt.block_on(compact_file(&input, output.as_deref(), force, &provider, &model, config))
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<MemoryConfig> {
    let config = match path {
        Some(p) => serde_json::from_str(&std::fs::read_to_string(p)?)?,
        None => MemoryConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn print_stats(stats: &StoreStats, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(stats)?);
        return Ok(());
    }
    println!(
        "{} entries, {} pinned",
        stats.total_entries, stats.pinned_entries
    );
    for entry in &stats.recent {
        println!(
            "{} {}  {}  {}",
            if entry.pinned { "*" } else { " " },
            entry.id,
            entry.last_access.format("%Y-%m-%d %H:%M:%S"),
            entry.summary,
        );
    }
    Ok(())
}

async fn compact_file(
    input: &Path,
    output: Option<&Path>,
    force: bool,
    provider: &str,
    model: &str,
    config: MemoryConfig,
) -> Result<()> {
    let messages: Vec<Message> = serde_json::from_str(&std::fs::read_to_string(input)?)?;
    let conversation = SharedConversation::new(messages);

    let summarizer = FnSummarizer::new(|_model, _system, content| async move {
        Ok(truncate_words(&content, SUMMARY_MAX_WORDS))
    });
    let profile = MemoryProfile::new(config, provider, model, Arc::new(summarizer))?;
    profile.set_event_handler(LoggingHandler);
    if force {
        profile.force_compaction();
    }

    let outcome = profile.prepare(&conversation).await;
    if outcome.compaction.is_none() {
        tracing::info!("{} is within the threshold; nothing to compact", input.display());
    }

    let rendered = serde_json::to_string_pretty(&outcome.messages)?;
    match output {
        Some(path) => std::fs::write(path, rendered)?,
        None => println!("{rendered}"),
    }
    Ok(())
}
