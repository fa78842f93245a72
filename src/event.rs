use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::warn;

use crate::queue::{Connectivity, PendingWrite};

/// Commands read by the interactive `watch` session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
  /// The environment reported a connectivity change
  Connectivity(Connectivity),
  /// A review typed by the user
  Review(PendingWrite),
  /// Request a URL through the interceptor
  Fetch(String),
  Quit,
}

impl Event {
  /// Parse one input line.
  ///
  /// Accepted forms: `online`, `offline`, `quit`, `fetch <url>`,
  /// `review <restaurant_id> <name> <rating> <comments...>`.
  pub fn parse(line: &str) -> Result<Self, String> {
    let mut parts = line.split_whitespace();
    let command = parts.next().ok_or_else(|| "empty line".to_string())?;

    match command {
      "online" => Ok(Event::Connectivity(Connectivity::Online)),
      "offline" => Ok(Event::Connectivity(Connectivity::Offline)),
      "quit" | "exit" => Ok(Event::Quit),
      "fetch" => parts
        .next()
        .map(|url| Event::Fetch(url.to_string()))
        .ok_or_else(|| "usage: fetch <url>".to_string()),
      "review" => {
        let usage = || "usage: review <restaurant_id> <name> <rating> <comments...>".to_string();
        let restaurant_id = parts.next().and_then(|s| s.parse().ok()).ok_or_else(usage)?;
        let name = parts.next().ok_or_else(usage)?.to_string();
        let rating = parts
          .next()
          .and_then(|s| s.parse::<u8>().ok())
          .filter(|r| (1..=5).contains(r))
          .ok_or_else(|| "rating must be between 1 and 5".to_string())?;
        let comments = parts.collect::<Vec<_>>().join(" ");
        Ok(Event::Review(PendingWrite {
          restaurant_id,
          name,
          rating,
          comments,
        }))
      }
      other => Err(format!("unknown command: {}", other)),
    }
  }
}

/// Event handler that produces events from input lines
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  pub fn new() -> Self {
    Self::from_reader(tokio::io::stdin())
  }

  /// Produce events from any line-oriented input.
  pub fn from_reader<R>(reader: R) -> Self
  where
    R: AsyncRead + Unpin + Send + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
      let mut lines = BufReader::new(reader).lines();
      while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
          continue;
        }
        match Event::parse(&line) {
          Ok(event) => {
            if tx.send(event).is_err() {
              break;
            }
          }
          Err(e) => warn!("{}", e),
        }
      }
    });

    Self { rx }
  }

  /// Receive the next event. `None` once stdin is closed.
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
