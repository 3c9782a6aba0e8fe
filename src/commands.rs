//! Command-line subcommands and their handlers.

use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;

use crate::brewery::{
  api_slug, capitalize, filter_by_name, Brewery, BreweryClient, Listing, DEFAULT_RANDOM_SIZE,
};
use crate::cache::{CacheResult, CacheSource};
use crate::config::Config;
use crate::db::LocalStorage;
use crate::favorites::Favorites;
use crate::net::Request;
use crate::query::{QueryState, SearchQuery, DEFAULT_DEBOUNCE};
use crate::worker::{AssetRoute, ServiceWorker};

/// How often the stdin search loop checks for a settled result
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Precache the application shell and activate this version
  Install,

  /// Route a single GET request through the worker
  Fetch {
    url: String,
  },

  /// Browse the brewery API
  #[command(subcommand)]
  Breweries(BreweriesCommand),

  /// Manage favorite breweries
  #[command(subcommand)]
  Favorites(FavoritesCommand),

  /// Inspect or clear the cache store
  #[command(subcommand)]
  Cache(CacheCommand),
}

#[derive(Subcommand, Debug)]
pub enum BreweriesCommand {
  /// One page of the sorted brewery list
  List {
    #[arg(short, long, default_value_t = 1)]
    page: u32,
    /// Sort descending instead of ascending
    #[arg(long)]
    desc: bool,
  },
  /// Details of a single brewery
  Show { id: String },
  Random {
    #[arg(short, long, default_value_t = DEFAULT_RANDOM_SIZE)]
    size: u32,
    /// Only keep breweries whose name contains this text
    #[arg(short, long)]
    filter: Option<String>,
  },
  /// Search by name; without QUERY, reads search input line by line from stdin
  Search {
    query: Option<String>,
    /// Quiet period after the last stdin line before searching
    #[arg(long, default_value_t = DEFAULT_DEBOUNCE.as_millis() as u64)]
    debounce_ms: u64,
  },
  Autocomplete { query: String },
  /// Brewery totals, optionally for one state
  Meta {
    #[arg(long)]
    by_state: Option<String>,
  },
  /// Load an image through the worker's image cache
  Image {
    url: String,
    /// Write the bytes here instead of only reporting their size
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
}

#[derive(Subcommand, Debug)]
pub enum FavoritesCommand {
  List,
  /// Add the brewery, or remove it if it is already a favorite
  Toggle { id: String },
  Clear,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
  /// Entry counts per namespace and the active shell version
  Status {
    /// Also list each namespace's stored URLs, oldest first
    #[arg(long)]
    entries: bool,
  },
  /// Delete every namespace
  Clear,
}

pub async fn run(command: Command, config: &Config, worker: Arc<ServiceWorker>) -> Result<()> {
  match command {
    Command::Install => {
      let count = worker.install_and_activate().await?;
      println!(
        "Installed {} shell assets into {}",
        count,
        worker.shell_namespace()
      );
    }
    Command::Fetch { url } => {
      let request = Request::parse(&url)?;
      let policy = match worker.classify_asset(&request) {
        None => "api (network-first)",
        Some(AssetRoute::Precached) => "shell (precached)",
        Some(AssetRoute::Image) => "image (stale-while-revalidate)",
        Some(AssetRoute::Passthrough) => "passthrough",
      };
      let served = worker.handle_fetch(&request).await?;
      println!("{} {} via {}", served.data.status, describe_source(&served), policy);
      println!("{}", served.data.text());
    }
    Command::Breweries(cmd) => {
      let client = BreweryClient::new(worker, config.api.base_url.clone());
      run_breweries(cmd, &client, config).await?;
    }
    Command::Favorites(cmd) => {
      let client = BreweryClient::new(worker, config.api.base_url.clone());
      run_favorites(cmd, &client, config).await?;
    }
    Command::Cache(cmd) => run_cache(cmd, &worker)?,
  }

  Ok(())
}

async fn run_breweries(cmd: BreweriesCommand, client: &BreweryClient, config: &Config) -> Result<()> {
  match cmd {
    BreweriesCommand::List { page, desc } => {
      let mut listing = Listing::new();
      listing.set_page(page);
      if desc {
        listing.toggle_sort();
      }

      let result = client.list(&listing.params()).await?;
      let meta = client.meta(None).await?;
      print_breweries(&result.data.iter().collect::<Vec<_>>());
      println!(
        "Page {} of {}, {} per page, sorted {} ({})",
        listing.page(),
        listing.total_pages(&meta.data),
        listing.per_page(),
        listing.sort(),
        describe_source(&result)
      );
    }
    BreweriesCommand::Show { id } => {
      let result = client.get(&id).await?;
      let favorites = load_favorites(config)?;
      print_details(&result.data, favorites.contains(&id));
      println!("({})", describe_source(&result));
    }
    BreweriesCommand::Random { size, filter } => {
      let result = client.random(size).await?;
      let shown = filter_by_name(&result.data, filter.as_deref().unwrap_or(""));
      print_breweries(&shown);
    }
    BreweriesCommand::Search { query: Some(query), .. } => {
      let result = client.search(&query).await?;
      print_breweries(&result.data.iter().collect::<Vec<_>>());
    }
    BreweriesCommand::Search { query: None, debounce_ms } => {
      search_stdin(client, Duration::from_millis(debounce_ms)).await?
    }
    BreweriesCommand::Autocomplete { query } => {
      let result = client.autocomplete(&query).await?;
      for brewery in &result.data {
        println!("{}  {}", brewery.id, brewery.name);
      }
    }
    BreweriesCommand::Meta { by_state } => {
      let state = by_state.as_deref().map(api_slug);
      let result = client.meta(state.as_deref()).await?;
      println!(
        "total: {}  page: {}  per_page: {}",
        result.data.total, result.data.page, result.data.per_page
      );
    }
    BreweriesCommand::Image { url, output } => {
      let result = client.load_image(&url).await?;
      match output {
        Some(path) => {
          std::fs::write(&path, &result.data)
            .map_err(|e| eyre!("Failed to write image to {}: {}", path.display(), e))?;
          println!(
            "Wrote {} bytes to {} ({})",
            result.data.len(),
            path.display(),
            describe_source(&result)
          );
        }
        None => println!("{} bytes ({})", result.data.len(), describe_source(&result)),
      }
    }
  }

  Ok(())
}

/// Search-as-you-type over stdin: each line replaces the query text.
async fn search_stdin(client: &BreweryClient, debounce: Duration) -> Result<()> {
  let (tx, mut rx) = mpsc::unbounded_channel();
  tokio::spawn(async move {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
      if tx.send(line).is_err() {
        break;
      }
    }
  });

  let searcher = client.clone();
  let mut search = SearchQuery::new(move |text: String| {
    let client = searcher.clone();
    async move {
      client
        .search(&text)
        .await
        .map(|result| result.data)
        .map_err(|e| e.to_string())
    }
  })
  .with_debounce(debounce);

  loop {
    let line = if search.state().is_loading() {
      tokio::select! {
        line = rx.recv() => line,
        _ = tokio::time::sleep(POLL_INTERVAL) => {
          if search.poll() {
            print_search_state(search.text(), search.state());
          }
          continue;
        }
      }
    } else {
      rx.recv().await
    };

    match line {
      Some(text) => search.input(&text),
      None => break,
    }
  }

  if search.state().is_loading() {
    let text = search.text().to_string();
    print_search_state(&text, search.settle().await);
  }

  Ok(())
}

async fn run_favorites(cmd: FavoritesCommand, client: &BreweryClient, config: &Config) -> Result<()> {
  let mut favorites = load_favorites(config)?;

  match cmd {
    FavoritesCommand::List => {
      print_breweries(&favorites.list().iter().collect::<Vec<_>>());
    }
    FavoritesCommand::Toggle { id } => {
      // Removing works offline; adding needs the full record
      let brewery = match favorites.list().iter().find(|b| b.id == id) {
        Some(existing) => existing.clone(),
        None => client.get(&id).await?.data,
      };
      let added = favorites.toggle(&brewery)?;
      info!(id = %brewery.id, added, "Toggled favorite");
      println!(
        "{} {} favorites",
        brewery.name,
        if added { "added to" } else { "removed from" }
      );
    }
    FavoritesCommand::Clear => {
      favorites.clear()?;
      println!("Favorites cleared");
    }
  }

  Ok(())
}

fn run_cache(cmd: CacheCommand, worker: &ServiceWorker) -> Result<()> {
  let store = worker.store();

  match cmd {
    CacheCommand::Status { entries } => {
      let active = worker.active_version()?;
      println!(
        "Active shell version: {}",
        active.as_deref().unwrap_or("(not installed)")
      );
      for (namespace, count) in store.summary()? {
        println!("{:<32} {:>6} entries", namespace, count);
        if entries {
          for url in store.urls(&namespace)? {
            println!("  {}", url);
          }
        }
      }
    }
    CacheCommand::Clear => {
      store.clear()?;
      println!("Cache cleared");
    }
  }

  Ok(())
}

fn load_favorites(config: &Config) -> Result<Favorites> {
  let storage = LocalStorage::open(&config.local_storage_path()?)
    .map_err(|e| eyre!("Failed to open favorites storage: {}", e))?;
  Favorites::load(Arc::new(storage))
}

fn describe_source<T>(result: &CacheResult<T>) -> String {
  match (result.source, result.cached_at) {
    (CacheSource::Network, _) | (_, None) => result.source.to_string(),
    (source, Some(at)) => format!("{}, cached {}", source, at.format("%Y-%m-%d %H:%M:%S UTC")),
  }
}

fn print_breweries(breweries: &[&Brewery]) {
  if breweries.is_empty() {
    println!("No breweries found");
    return;
  }
  for brewery in breweries {
    println!(
      "{:<40} {:<12} {}",
      brewery.name,
      capitalize(brewery.brewery_type.as_deref().unwrap_or("")),
      brewery.location()
    );
  }
}

fn print_details(brewery: &Brewery, favorite: bool) {
  println!("{}{}", brewery.name, if favorite { " ★" } else { "" });
  if let Some(kind) = &brewery.brewery_type {
    println!("  type:     {}", capitalize(kind));
  }
  let address = [&brewery.address_1, &brewery.address_2, &brewery.address_3]
    .iter()
    .filter_map(|line| line.as_deref())
    .collect::<Vec<_>>()
    .join(", ");
  if !address.is_empty() {
    println!("  address:  {}", address);
  }
  println!("  location: {}", brewery.location());
  if let Some(phone) = brewery.dialable_phone() {
    println!("  phone:    {}", phone);
  }
  if let Some(url) = &brewery.website_url {
    println!("  website:  {}", url);
  }
}

fn print_search_state(text: &str, state: &QueryState<Vec<Brewery>>) {
  if let Some(results) = state.data() {
    println!("-- {} result(s) for '{}'", results.len(), text);
    print_breweries(&results.iter().collect::<Vec<_>>());
  } else if let Some(e) = state.error() {
    println!("-- search for '{}' failed: {}", text, e);
  }
}
