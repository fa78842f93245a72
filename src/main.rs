mod app;
mod cache;
mod config;
mod event;
mod interceptor;
mod queue;
mod remote;

#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::queue::{Connectivity, PendingWrite};

#[derive(Parser, Debug)]
#[command(name = "restocache")]
#[command(about = "Offline cache and review queue for the restaurant reviews app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/restocache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Path to the cache database
  #[arg(long)]
  database: Option<PathBuf>,

  /// Start with the network reported as unavailable
  #[arg(long)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install the current cache generation and delete stale ones
  Install,
  /// Show the active generation and queue state
  Status,
  /// Request a URL through the cache interceptor
  Fetch { url: String },
  /// Submit a review, queueing it when offline
  Review {
    restaurant_id: u64,
    name: String,
    #[arg(value_parser = clap::value_parser!(u8).range(1..=5))]
    rating: u8,
    comments: String,
  },
  /// List reviews waiting for delivery
  Pending,
  /// Replay queued reviews now
  Replay,
  /// List restaurants, optionally filtered
  Restaurants {
    #[arg(long, default_value = "all")]
    cuisine: String,
    #[arg(long, default_value = "all")]
    neighborhood: String,
    /// Only restaurants marked as favorite
    #[arg(long)]
    favorites: bool,
  },
  /// Show one restaurant
  Restaurant { restaurant_id: u64 },
  /// List the cuisines and neighborhoods available for filtering
  Filters,
  /// List reviews of a restaurant
  Reviews { restaurant_id: u64 },
  /// Mark or unmark a restaurant as favorite
  Favorite {
    restaurant_id: u64,
    #[arg(long)]
    unset: bool,
  },
  /// Read online/offline/review/fetch commands from stdin
  Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Override database if specified on command line
  let config = if let Some(database) = args.database {
    config::Config {
      database: Some(database),
      ..config
    }
  } else {
    config
  };

  let _guard = init_tracing(config.database.as_deref())?;

  let connectivity = if args.offline {
    Connectivity::Offline
  } else {
    Connectivity::Online
  };
  let app = app::App::new(config, connectivity).await?;

  match args.command {
    Command::Install => app.install().await?,
    Command::Status => app.status().await?,
    Command::Fetch { url } => {
      app.fetch(&url).await?;
    }
    Command::Review {
      restaurant_id,
      name,
      rating,
      comments,
    } => {
      app.start_queue().await?;
      app
        .submit_review(PendingWrite {
          restaurant_id,
          name,
          rating,
          comments,
        })
        .await?;
    }
    Command::Pending => {
      for write in app.pending().await? {
        println!(
          "restaurant {} | {} | {} | {}",
          write.restaurant_id, write.name, write.rating, write.comments
        );
      }
    }
    Command::Replay => {
      app.replay().await?;
    }
    Command::Restaurants {
      cuisine,
      neighborhood,
      favorites,
    } => {
      let restaurants = if favorites {
        app.api().favorites().await?
      } else {
        app
          .api()
          .by_cuisine_and_neighborhood(&cuisine, &neighborhood)
          .await?
      };
      for r in restaurants {
        let fav = if r.is_favorite { "*" } else { " " };
        println!("{} {:>3} {} ({}, {})", fav, r.id, r.name, r.cuisine_type, r.neighborhood);
      }
    }
    Command::Restaurant { restaurant_id } => {
      let r = app.api().restaurant_by_id(restaurant_id).await?;
      println!("{} ({})", r.name, r.cuisine_type);
      println!("  neighborhood: {}", r.neighborhood);
      if let Some(address) = &r.address {
        println!("  address: {}", address);
      }
      if let Some(latlng) = &r.latlng {
        println!("  location: {}, {}", latlng.lat, latlng.lng);
      }
      println!("  favorite: {}", r.is_favorite);
    }
    Command::Filters => {
      println!("cuisines: {}", app.api().cuisines().await?.join(", "));
      println!("neighborhoods: {}", app.api().neighborhoods().await?.join(", "));
    }
    Command::Reviews { restaurant_id } => {
      for review in app.api().reviews_for(restaurant_id).await? {
        println!("{} ({}/5): {}", review.name, review.rating, review.comments);
      }
    }
    Command::Favorite {
      restaurant_id,
      unset,
    } => {
      app.api().set_favorite(restaurant_id, !unset).await?;
    }
    Command::Watch => app.watch().await?,
  }

  Ok(())
}

/// Log to stderr and to a daily file next to the cache database.
fn init_tracing(database: Option<&Path>) -> Result<WorkerGuard> {
  let log_dir = match database.and_then(Path::parent) {
    Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
    _ => cache::SqliteStorage::default_path()?
      .parent()
      .map(Path::to_path_buf)
      .ok_or_else(|| eyre!("Could not determine log directory"))?,
  };
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let (file_writer, guard) =
    tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, "restocache.log"));

  tracing_subscriber::registry()
    .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with(fmt::layer().with_writer(std::io::stderr))
    .with(fmt::layer().with_ansi(false).with_writer(file_writer))
    .init();

  Ok(guard)
}
