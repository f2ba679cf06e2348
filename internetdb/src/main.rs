use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use decompress::Bzip2Cli;
use internetdb_core::units::{file_size, file_size_gb};
use internetdb_core::{DataFiles, StateStore};
use refresh::{spawn_schedule, Lookup, LookupError, Query, RefreshOutcome, Refresher, SharedHandle, SnapshotDb};
use snapshot_fetch::ShodanClient;
use snapshot_sqlite::{Db, IpRecord};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat { Text, Json }

#[derive(Debug, Parser)]
#[command(name = "internetdb", version, about = "Local copy of the InternetDB snapshot: refresh, reformat and look up")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./internetdb.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// More log output (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// Run one refresh: download, decompress and reformat when upstream moved
    Refresh,
    /// Refresh on the configured schedule and answer lookups read from stdin
    /// (one query per line, `search <text>` for full-text)
    Serve,
    /// Look up an IP address or domain in the current database
    Lookup {
        query: String,
        /// Full-text search over every column (requires enable_domain_and_cve_searching)
        #[arg(long, default_value_t = false)]
        text: bool,
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Print the persisted refresh state and data file sizes
    Status,
}

fn init_logging(verbose: u8, configured: Option<&str>) {
    let level = match verbose {
        0 => configured.unwrap_or("info"),
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn build_refresher(cfg: &config::Config) -> Result<Refresher> {
    let settings = cfg.refresh_settings(std::env::var(config::API_KEY_ENV).ok())?;
    let source = ShodanClient::new(&cfg.upstream_url, settings.api_key.clone(), &cfg.network)?;
    Ok(Refresher::new(
        DataFiles::new(cfg.data_dir.clone()),
        settings,
        Arc::new(source),
        Arc::new(Bzip2Cli::default()),
    ))
}

fn parse_line(line: &str) -> Option<Query> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    match line.strip_prefix("search ") {
        Some(text) => Some(Query::Text(text.trim().to_string())),
        None => Some(Query::classify(line)),
    }
}

fn query_text(query: &Query) -> &str {
    match query {
        Query::Ip(s) | Query::Domain(s) | Query::Text(s) => s,
    }
}

fn print_records(records: &[IpRecord], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(records)?),
        OutputFormat::Text => {
            if records.is_empty() {
                println!("no results");
            }
            for r in records {
                println!(
                    "{} ports={} tags={} hostnames={} vulns={} cpes={}",
                    r.ip,
                    r.ports.as_deref().unwrap_or("-"),
                    r.tags.as_deref().unwrap_or("-"),
                    r.hostnames.as_deref().unwrap_or("-"),
                    r.vulns.as_deref().unwrap_or("-"),
                    r.cpes.as_deref().unwrap_or("-"),
                );
            }
        }
    }
    Ok(())
}

fn print_outcome(outcome: &RefreshOutcome) -> Result<()> {
    match outcome {
        RefreshOutcome::AlreadyRunning => println!("refresh already running"),
        RefreshOutcome::Attached => println!("existing database attached, upstream not checked"),
        RefreshOutcome::UpToDate => println!("database is up to date"),
        RefreshOutcome::Refreshed { downloaded, reformat, counts } => {
            let report = serde_json::json!({
                "downloaded": downloaded,
                "reformat": reformat,
                "counts": counts,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

async fn serve(refresher: Arc<Refresher>) -> Result<()> {
    let settings = refresher.settings().clone();
    let lookup = Lookup::new(refresher.handle(), settings.max_results, settings.search_mode);
    let schedule = spawn_schedule(refresher);
    info!(schedule = %settings.schedule, "serving lookups from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let Some(query) = parse_line(&line) else { continue };
        let reply = match lookup.lookup(query.clone()).await {
            Ok(records) => serde_json::json!({ "query": query_text(&query), "results": records }),
            Err(e) => {
                if !matches!(e, LookupError::RefreshInProgress | LookupError::SearchDisabled) {
                    warn!(error = %e, "lookup failed");
                }
                serde_json::json!({ "query": query_text(&query), "error": e.to_string() })
            }
        };
        println!("{}", serde_json::to_string(&reply)?);
    }
    info!("stdin closed, waiting on the refresh schedule");
    schedule.await?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref())?;
    init_logging(cli.verbose, cfg.log_level.as_deref());
    match cli.command {
        Commands::Version => {
            println!("internetdb {} (core {})", env!("CARGO_PKG_VERSION"), internetdb_core::version());
        }
        Commands::Refresh => {
            let refresher = build_refresher(&cfg)?;
            let rt = tokio::runtime::Runtime::new()?;
            let started = Instant::now();
            let outcome = rt.block_on(refresher.refresh())?;
            print_outcome(&outcome)?;
            eprintln!("completed in {} ms", started.elapsed().as_millis());
        }
        Commands::Serve => {
            let refresher = Arc::new(build_refresher(&cfg)?);
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(serve(refresher))?;
        }
        Commands::Lookup { query, text, format } => {
            let settings = cfg.refresh_settings(None)?;
            let files = DataFiles::new(cfg.data_dir.clone());
            let state = StateStore::new(files.state.clone()).load();
            let query = if text { Query::Text(query) } else { Query::classify(&query) };
            let rt = tokio::runtime::Runtime::new()?;
            let records = rt.block_on(async {
                let handle = Arc::new(SharedHandle::new());
                if state.is_reformatted() && file_size(&files.final_db) > 0 {
                    let db = Db::open(&files.final_db)?;
                    handle.publish(SnapshotDb::new(db, files.final_db.clone())).await;
                }
                let lookup = Lookup::new(handle.clone(), settings.max_results, state.search_mode.unwrap_or_default());
                let records = lookup.lookup(query).await;
                handle.release().await;
                anyhow::Ok(records?)
            })?;
            print_records(&records, format)?;
        }
        Commands::Status => {
            let files = DataFiles::new(cfg.data_dir.clone());
            let state = StateStore::new(files.state.clone()).load();
            let report = serde_json::json!({
                "data_dir": files.dir,
                "state": state,
                "files": {
                    "compressed_gb": file_size_gb(&files.compressed),
                    "temp_db_gb": file_size_gb(&files.temp_db),
                    "final_db_gb": file_size_gb(&files.final_db),
                    "preformatted_gb": file_size_gb(&files.preformatted),
                },
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdin_lines_become_queries() {
        assert_eq!(parse_line("  "), None);
        assert_eq!(parse_line("# comment"), None);
        assert_eq!(parse_line("1.1.1.1"), Some(Query::Ip("1.1.1.1".into())));
        assert_eq!(parse_line("mail.example.co.uk"), Some(Query::Domain("mail.example.co.uk".into())));
        assert_eq!(parse_line("search CVE-2021-44228"), Some(Query::Text("CVE-2021-44228".into())));
    }

    #[test]
    fn cli_parses_lookup() {
        let cli = Cli::parse_from(["internetdb", "-vv", "lookup", "--text", "openssh", "--format", "json"]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Lookup { query, text, format } => {
                assert_eq!(query, "openssh");
                assert!(text);
                assert_eq!(format, OutputFormat::Json);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
