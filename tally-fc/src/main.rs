//! tally-fc (Fetch Client) - command-line front end
//!
//! Runs a fetch cycle for the filter given by flags and prints the locally
//! refined result. With `--follow`, reads user lists from stdin (one
//! comma-separated list per line) and re-runs the cycle after each debounced
//! edit.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tally_common::model::LocalAlbumFilter;
use tally_common::{FacetFilter, FilterSpec, LocalFilterSpec, SortMethod, TrackWithStats};
use tally_fc::config::{ClientArgs, ClientConfig};
use tally_fc::{CycleOutcome, Debouncer, FetchOrchestrator, HttpTransport, TrackDataCache};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

/// Command-line arguments for tally-fc
#[derive(Parser, Debug)]
#[command(name = "tally-fc")]
#[command(about = "Listening statistics fetch client")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    client: ClientArgs,

    /// User ids whose plays count (comma-separated or repeated)
    #[arg(short, long = "user", value_delimiter = ',')]
    users: Vec<String>,

    /// Server sort: playtime, play_count, track_length, track_name, artist_name
    #[arg(long, default_value = "play_count")]
    sort: String,

    /// Reverse the server order
    #[arg(long)]
    reverse: bool,

    #[arg(long, value_delimiter = ',')]
    include_artist: Vec<String>,

    #[arg(long, value_delimiter = ',')]
    exclude_artist: Vec<String>,

    #[arg(long, value_delimiter = ',')]
    include_album: Vec<String>,

    #[arg(long, value_delimiter = ',')]
    exclude_album: Vec<String>,

    /// Local search over track, artist and album names
    #[arg(long, default_value = "")]
    search: String,

    /// Local album allow-list
    #[arg(long = "local-album", value_delimiter = ',')]
    local_albums: Vec<String>,

    /// Local sort (defaults to the server sort)
    #[arg(long)]
    local_sort: Option<String>,

    #[arg(long)]
    local_reverse: bool,

    /// Extra pages to load after the first window
    #[arg(long, default_value_t = 0)]
    pages: usize,

    /// Re-run with user lists read from stdin
    #[arg(long)]
    follow: bool,
}

impl Cli {
    fn filter(&self) -> FilterSpec {
        FilterSpec {
            sort: SortMethod::parse_lenient(&self.sort),
            reverse: self.reverse,
            users: self.users.clone(),
            artists: facet(&self.include_artist, &self.exclude_artist),
            albums: facet(&self.include_album, &self.exclude_album),
            ..FilterSpec::default()
        }
    }

    fn local(&self, filter: &FilterSpec) -> LocalFilterSpec {
        LocalFilterSpec {
            search: self.search.clone(),
            sort: self
                .local_sort
                .as_deref()
                .map(SortMethod::parse_lenient)
                .unwrap_or(filter.sort),
            reverse: self.local_reverse || filter.reverse,
            album: LocalAlbumFilter {
                include: self.local_albums.clone(),
            },
        }
    }
}

fn facet(include: &[String], exclude: &[String]) -> FacetFilter {
    FacetFilter {
        include: include.to_vec(),
        exclude: exclude.to_vec(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ClientConfig::load(&cli.client).context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Starting Tally Fetch Client (tally-fc) v{}", env!("CARGO_PKG_VERSION"));
    info!("Server: {}", config.server_url);
    if config.viewer.is_none() {
        warn!("No viewer id configured; the server will reject queries");
    }

    let transport = HttpTransport::new(&config.server_url, config.viewer.clone())
        .context("Failed to create HTTP client")?;
    let orchestrator = FetchOrchestrator::new(
        Arc::new(transport),
        TrackDataCache::open(&config.cache_file),
        config.page_size,
    );

    let filter = cli.filter();
    run_cycle(&orchestrator, &cli, filter.clone()).await?;

    if cli.follow {
        follow_stdin(&orchestrator, &cli, filter, &config).await?;
    }

    Ok(())
}

async fn run_cycle(orchestrator: &FetchOrchestrator, cli: &Cli, filter: FilterSpec) -> Result<()> {
    let local = cli.local(&filter);

    match orchestrator.apply_filter(filter).await? {
        CycleOutcome::Settled { total, loaded } => info!("{} tracks matched, {} loaded", total, loaded),
        CycleOutcome::Unchanged => info!("Filter unchanged"),
        CycleOutcome::Superseded => return Ok(()),
    }

    for _ in 0..cli.pages {
        if !orchestrator.has_more() {
            break;
        }
        orchestrator.load_more().await?;
    }

    print_tracks(&orchestrator.local_view(&local), orchestrator.total_matches());
    Ok(())
}

/// Each stdin line replaces the user selection; edits are debounced
async fn follow_stdin(
    orchestrator: &FetchOrchestrator,
    cli: &Cli,
    base: FilterSpec,
    config: &ClientConfig,
) -> Result<()> {
    let (debouncer, mut committed) = Debouncer::spawn(config.debounce);

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let users = line
                        .split(',')
                        .map(str::trim)
                        .filter(|u| !u.is_empty())
                        .map(String::from)
                        .collect::<Vec<_>>();
                    if !debouncer.push(users) {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    });

    while let Some(users) = committed.recv().await {
        let filter = FilterSpec {
            users,
            ..base.clone()
        };
        // Failures keep the previous result; wait for the next edit
        if let Err(e) = run_cycle(orchestrator, cli, filter).await {
            error!("Fetch failed: {:#}", e);
        }
    }

    Ok(())
}

fn print_tracks(tracks: &[TrackWithStats], total: usize) {
    for (rank, t) in tracks.iter().enumerate() {
        println!(
            "{:>4}. {} - {} [{}]  plays={}  time={}",
            rank + 1,
            t.track.name,
            t.track.joined_artist_names(),
            t.track.album.name,
            t.stats.total_plays,
            format_ms(t.stats.total_ms),
        );
    }
    println!("({} shown, {} matched)", tracks.len(), total);
}

/// `h:mm:ss`, or `m:ss` under an hour
fn format_ms(ms: i64) -> String {
    let secs = ms.max(0) / 1000;
    let (h, m, s) = (secs / 3600, (secs / 60) % 60, secs % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}
