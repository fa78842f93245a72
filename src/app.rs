use color_eyre::Result;
use std::sync::Arc;
use tracing::info;

use crate::cache::{GenerationManager, SqliteStorage};
use crate::config::Config;
use crate::event::{Event, EventHandler};
use crate::interceptor::{BypassSet, Intercepted, RequestInterceptor};
use crate::queue::{Connectivity, OfflineQueue, PendingWrite, ReplayReport, SubmitOutcome};
use crate::remote::{Fetcher, HttpFetcher, Request, RestaurantApi};

type Api<F> = RestaurantApi<SqliteStorage, F>;

/// Application state: every cache component, constructed once at startup.
pub struct App<F: Fetcher = HttpFetcher> {
  generations: Arc<GenerationManager<SqliteStorage>>,
  fetcher: Arc<F>,
  interceptor: RequestInterceptor<SqliteStorage, F>,
  api: Arc<Api<F>>,
  queue: OfflineQueue<SqliteStorage, Api<F>>,
}

impl App<HttpFetcher> {
  pub async fn new(config: Config, connectivity: Connectivity) -> Result<Self> {
    let storage = Arc::new(match &config.database {
      Some(path) => SqliteStorage::open_at(path)?,
      None => SqliteStorage::open()?,
    });
    let fetcher = Arc::new(HttpFetcher::new(config.timeout())?);

    Self::with_fetcher(config, storage, fetcher, connectivity).await
  }
}

impl<F: Fetcher> App<F> {
  /// Wire every component around an already opened store and fetcher.
  pub async fn with_fetcher(
    config: Config,
    storage: Arc<SqliteStorage>,
    fetcher: Arc<F>,
    connectivity: Connectivity,
  ) -> Result<Self> {
    let generations = Arc::new(GenerationManager::new(
      Arc::clone(&storage),
      config.cache_name(),
      config.manifest_urls()?,
    ));
    if generations.resume().await? {
      info!(generation = %generations.name(), "resumed installed cache generation");
    }

    let bypass = BypassSet::new(&config.cache.bypass_origins)?;
    let interceptor =
      RequestInterceptor::new(Arc::clone(&generations), Arc::clone(&fetcher), bypass);

    let api = Arc::new(RestaurantApi::new(
      config.data_url()?,
      Arc::clone(&storage),
      Arc::clone(&fetcher),
    ));
    let queue = OfflineQueue::new(Arc::clone(&storage), Arc::clone(&api), connectivity)
      .with_policy(config.queue.replay_policy);

    Ok(Self {
      generations,
      fetcher,
      interceptor,
      api,
      queue,
    })
  }

  pub fn api(&self) -> &Api<F> {
    &self.api
  }

  /// Install the current generation and activate it.
  pub async fn install(&self) -> Result<()> {
    let deleted = self.generations.run_lifecycle(self.fetcher.as_ref()).await?;
    println!("installed {}", self.generations.name());
    for name in deleted {
      println!("deleted {}", name);
    }
    Ok(())
  }

  pub async fn status(&self) -> Result<()> {
    println!(
      "generation {} ({:?})",
      self.generations.name(),
      self.generations.state()
    );
    for url in self.generations.entries().await? {
      println!("  {}", url);
    }
    println!("connectivity {:?}", self.queue.connectivity());
    println!("pending reviews {}", self.queue.pending().await?.len());
    Ok(())
  }

  pub async fn fetch(&self, url: &str) -> Result<Intercepted> {
    let served = self.interceptor.handle(&Request::get(url)?).await?;
    println!(
      "{} {} {:?} {} bytes sha256={}",
      served.response.status,
      url,
      served.outcome,
      served.response.body.len(),
      served.response.digest()
    );
    Ok(served)
  }

  /// Start the queue: create its record and replay if already online.
  pub async fn start_queue(&self) -> Result<()> {
    if let Some(report) = self.queue.start().await? {
      print_report(&report);
    }
    Ok(())
  }

  pub async fn submit_review(&self, write: PendingWrite) -> Result<SubmitOutcome> {
    let outcome = self.queue.submit(write).await?;
    match outcome {
      SubmitOutcome::Sent => println!("review sent"),
      SubmitOutcome::Queued => println!(
        "you are currently offline, your review has been saved and will be sent when you are back online"
      ),
    }
    Ok(outcome)
  }

  pub async fn pending(&self) -> Result<Vec<PendingWrite>> {
    Ok(self.queue.pending().await?)
  }

  pub async fn replay(&self) -> Result<ReplayReport> {
    let report = self.queue.replay().await?;
    print_report(&report);
    Ok(report.into_result()?)
  }

  /// Interactive session: read connectivity changes, reviews and fetches
  /// from stdin until it closes.
  pub async fn watch(&self) -> Result<()> {
    self.run_session(EventHandler::new()).await
  }

  /// Apply events in arrival order. Each event, including a replay triggered
  /// by going online, completes before the next one is read.
  pub async fn run_session(&self, mut events: EventHandler) -> Result<()> {
    self.start_queue().await?;

    while let Some(event) = events.next().await {
      match event {
        Event::Quit => break,
        Event::Connectivity(next) => match self.queue.set_connectivity(next).await {
          Ok(Some(report)) => print_report(&report),
          Ok(None) => {}
          Err(e) => eprintln!("Error: {}", e),
        },
        Event::Review(write) => {
          if let Err(e) = self.submit_review(write).await {
            eprintln!("Error: {}", e);
          }
        }
        Event::Fetch(url) => {
          if let Err(e) = self.fetch(&url).await {
            eprintln!("Error: {}", e);
          }
        }
      }
    }

    Ok(())
  }
}

fn print_report(report: &ReplayReport) {
  if report.attempted > 0 {
    println!(
      "replayed {} reviews: {} sent, {} kept for later",
      report.attempted, report.succeeded, report.retained
    );
  }
}
