use std::str::FromStr;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use dex_api::{is_unknown, Dex, DexConfig, Entity, EntityDetails, SearchPhase, SearchState, TypeFilter};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "dexctl", version, about = "Browse, filter and search the Dex catalog")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(flatten)]
    config: ConfigFlags,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

/// Overrides for [`DexConfig`]; each falls back to its environment variable.
#[derive(Args, Debug)]
struct ConfigFlags {
    /// API root, e.g. https://pokeapi.co/api/v2/
    #[arg(long, global = true, env = "DEX_BASE_URL")]
    base_url: Option<String>,
    /// Entities per page
    #[arg(long, global = true, env = "DEX_PAGE_LIMIT")]
    page_limit: Option<String>,
    /// Concurrent detail fetches per enrichment batch
    #[arg(long, global = true, env = "DEX_BATCH_SIZE")]
    batch_size: Option<String>,
    /// Pause between enrichment batches, in milliseconds
    #[arg(long, global = true, env = "DEX_BATCH_DELAY_MS")]
    batch_delay_ms: Option<String>,
    /// Per-request timeout, in seconds
    #[arg(long, global = true, env = "DEX_TIMEOUT_SECS")]
    timeout_secs: Option<String>,
    /// Size of the name list used for search
    #[arg(long, global = true, env = "DEX_NAME_INDEX_LIMIT")]
    name_index_limit: Option<String>,
}

impl ConfigFlags {
    fn to_config(&self) -> DexConfig {
        DexConfig::from_lookup(|key| {
            let value = match key {
                "DEX_BASE_URL" => &self.base_url,
                "DEX_PAGE_LIMIT" => &self.page_limit,
                "DEX_BATCH_SIZE" => &self.batch_size,
                "DEX_BATCH_DELAY_MS" => &self.batch_delay_ms,
                "DEX_TIMEOUT_SECS" => &self.timeout_secs,
                "DEX_NAME_INDEX_LIMIT" => &self.name_index_limit,
                _ => return None,
            };
            value.clone()
        })
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load pages and print the list
    Ls {
        /// Pages to load
        #[arg(long, default_value_t = 1)]
        pages: usize,
        /// Only show entities of this type ("all" for no filter)
        #[arg(long = "type")]
        type_: Option<String>,
    },
    /// Resolve a search term and print the resulting list
    Search {
        term: String,
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
    /// Print the full record of one entity
    Show {
        /// Name or id
        name: String,
    },
    /// Print the type filter options
    Types {
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
    /// Print name suggestions for a partial term
    Suggest {
        term: String,
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
}

fn init_tracing() {
    let env = std::env::var("DEX_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("DEX_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid DEX_METRICS_ADDR; expected host:port");
        }
    }
}

/// Load up to `pages` pages and wait for their enrichment.
async fn load_pages(dex: &Dex, pages: usize) -> Result<()> {
    let t0 = Instant::now();
    match dex.start().await {
        Err(e) if e.is_retryable() => {
            warn!(error = ?dex.last_error(), "first page failed; retrying once");
            dex.retry().await.context("loading first page")?;
        }
        res => {
            res.context("loading first page")?;
        }
    }
    for _ in 1..pages.max(1) {
        if !dex.has_more() {
            break;
        }
        dex.load_next_page().await.context("loading next page")?;
    }
    dex.wait_enriched().await;
    info!(items = dex.catalog().len(), took_ms = %t0.elapsed().as_millis(), "catalog ready");
    Ok(())
}

fn print_json<T: Serialize>(v: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(v)?);
    Ok(())
}

fn print_entities(items: &[Entity]) {
    println!("{:<6} {:<20} TYPES", "ID", "NAME");
    for e in items {
        let types = if !e.details_loaded {
            "-".to_string()
        } else if is_unknown(e) {
            "? (details unavailable)".to_string()
        } else {
            e.types.join(", ")
        };
        println!("{:<6} {:<20} {}", e.id.as_deref().unwrap_or("-"), e.name, types);
    }
}

fn describe(state: &SearchState) -> String {
    match &state.phase {
        SearchPhase::Idle => "term too short; showing everything".to_string(),
        SearchPhase::Searching => "searching".to_string(),
        SearchPhase::Resolved(None) => format!("'{}' is in the loaded list", state.term),
        SearchPhase::Resolved(Some(e)) => format!("'{}' found remotely (#{})", state.term, e.id.as_deref().unwrap_or("?")),
        SearchPhase::NotFound => format!("no entity named '{}'", state.term),
        SearchPhase::Errored(m) => format!("search failed: {}", m),
    }
}

fn print_details(d: &EntityDetails) {
    println!("#{} {}", d.id, d.name);
    println!("types:     {}", d.types.join(", "));
    println!("height:    {}", d.height);
    println!("weight:    {}", d.weight);
    if let Some(sprite) = d.sprites.front_default.as_deref() {
        println!("sprite:    {}", sprite);
    }
    println!("stats:");
    for s in &d.stats {
        println!("  {:<16} {}", s.name, s.value);
    }
    let abilities: Vec<&str> = d.abilities.iter().take(5).map(String::as_str).collect();
    println!("abilities: {}", abilities.join(", "));
    let moves: Vec<&str> = d.moves.iter().take(10).map(String::as_str).collect();
    println!("moves:     {}", moves.join(", "));
}

#[derive(Serialize)]
struct SearchOutput<'a> {
    state: &'a SearchState,
    view: Vec<Entity>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let cfg = cli.config.to_config();
    let dex = Dex::connect(cfg).context("building HTTP client")?;
    let cfg = dex.config();
    info!(base_url = %cfg.base_url, limit = cfg.page_limit, batch = cfg.batch_size, "dexctl starting");

    match cli.command {
        Commands::Ls { pages, type_ } => {
            load_pages(&dex, pages).await?;
            if let Some(t) = type_.as_deref() {
                dex.select_type(TypeFilter::parse(t));
            }
            let items = dex.view();
            match cli.output {
                Output::Human => {
                    print_entities(&items);
                    if dex.has_more() {
                        eprintln!("({} shown; more available with --pages)", items.len());
                    }
                }
                Output::Json => print_json(&items)?,
            }
        }
        Commands::Search { term, pages } => {
            load_pages(&dex, pages).await?;
            let entries = dex.wait_name_index().await;
            info!(entries, "name index ready");
            let state = dex.search(&term).await;
            let view = dex.view();
            match cli.output {
                Output::Human => {
                    println!("{}", describe(&state));
                    print_entities(&view);
                }
                Output::Json => print_json(&SearchOutput { state: &state, view })?,
            }
        }
        Commands::Show { name } => {
            let details = dex.details(&name).await.with_context(|| format!("fetching details for '{}'", name))?;
            match cli.output {
                Output::Human => print_details(&details),
                Output::Json => print_json(&details)?,
            }
        }
        Commands::Types { pages } => {
            load_pages(&dex, pages).await?;
            let options = dex.type_options();
            match cli.output {
                Output::Human => options.iter().for_each(|t| println!("{}", t)),
                Output::Json => print_json(&options)?,
            }
        }
        Commands::Suggest { term, pages } => {
            load_pages(&dex, pages).await?;
            let names = dex.suggestions(&term);
            match cli.output {
                Output::Human => names.iter().for_each(|n| println!("{}", n)),
                Output::Json => print_json(&names)?,
            }
        }
    }
    Ok(())
}
