use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::commands::{self, Command};
use crate::timing::Debouncer;

/// Input events of the interactive browser
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
  /// A `:` line that resolved to a command, with its argument text
  Command(&'static Command, String),
  /// A `:` line that matched nothing
  Unknown(String),
  /// A search query that stayed unchanged for the debounce window
  Search(String),
  /// Input ended
  Closed,
}

/// Event handler that turns input lines into commands and settled searches
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Read events from standard input
  pub fn new(debounce: Duration) -> Self {
    Self::from_reader(BufReader::new(tokio::io::stdin()), debounce)
  }

  /// Commands go out as soon as they are read; other lines are search text and
  /// only the last of a quick burst goes out.
  pub fn from_reader<R>(reader: R, debounce: Duration) -> Self
  where
    R: AsyncBufRead + Unpin + Send + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();
    let (debouncer, mut settled) = Debouncer::new(debounce);

    // Forward settled searches; the debouncer closes after input ends
    let search_tx = tx.clone();
    tokio::spawn(async move {
      while let Some(query) = settled.recv().await {
        if search_tx.send(Event::Search(query)).is_err() {
          return;
        }
      }
      let _ = search_tx.send(Event::Closed);
    });

    // Spawn line reader
    tokio::spawn(async move {
      let mut lines = reader.lines();
      while let Ok(Some(line)) = lines.next_line().await {
        let event = if line.trim_start().starts_with(':') {
          match commands::parse(&line) {
            Some((cmd, args)) => Event::Command(cmd, args),
            None => Event::Unknown(line.trim().to_string()),
          }
        } else {
          debouncer.push(line.trim().to_string());
          continue;
        };

        if tx.send(event).is_err() {
          break;
        }
      }
      // Dropping the debouncer flushes its last query
      drop(debouncer);
    });

    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
