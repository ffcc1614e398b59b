//! Timer-driven helpers: a search debouncer and a self-clearing notice.
//!
//! Both run their timers on spawned tokio tasks and talk to the owner through
//! channels or shared state, so the owner never blocks on them.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Coalesces bursts of values, emitting only the last one once `window` has
/// passed without a newer value.
///
/// # Example
///
/// ```ignore
/// let (debouncer, mut settled) = Debouncer::new(Duration::from_millis(120));
/// debouncer.push("k".to_string());
/// debouncer.push("ku".to_string());
/// assert_eq!(settled.recv().await.as_deref(), Some("ku"));
/// ```
pub struct Debouncer<T> {
  tx: mpsc::UnboundedSender<T>,
}

impl<T: Send + 'static> Debouncer<T> {
  pub fn new(window: Duration) -> (Self, mpsc::UnboundedReceiver<T>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<T>();
    let (out_tx, out_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
      while let Some(mut latest) = rx.recv().await {
        loop {
          match tokio::time::timeout(window, rx.recv()).await {
            Ok(Some(newer)) => latest = newer,
            // Input closed: flush what we have and stop
            Ok(None) => {
              let _ = out_tx.send(latest);
              return;
            }
            Err(_) => break,
          }
        }
        if out_tx.send(latest).is_err() {
          break;
        }
      }
    });

    (Self { tx }, out_rx)
  }

  /// Returns false once the debouncer task has stopped.
  pub fn push(&self, value: T) -> bool {
    self.tx.send(value).is_ok()
  }
}

/// A transient status message.
///
/// Posting replaces the current message and cancels its timer; the message
/// clears itself when its display window elapses.
#[derive(Clone)]
pub struct Notice {
  current: Arc<Mutex<Option<String>>>,
  timer: Arc<Mutex<Option<JoinHandle<()>>>>,
  window: Duration,
}

impl Notice {
  pub fn new(window: Duration) -> Self {
    Self {
      current: Arc::new(Mutex::new(None)),
      timer: Arc::new(Mutex::new(None)),
      window,
    }
  }

  pub fn post(&self, message: impl Into<String>) {
    let message = message.into();
    tracing::debug!(%message, "notice");
    if let Ok(mut current) = self.current.lock() {
      *current = Some(message.clone());
    }

    let current = Arc::clone(&self.current);
    let window = self.window;
    let handle = tokio::spawn(async move {
      tokio::time::sleep(window).await;
      if let Ok(mut current) = current.lock() {
        if current.as_deref() == Some(message.as_str()) {
          *current = None;
        }
      }
    });

    if let Ok(mut timer) = self.timer.lock() {
      if let Some(previous) = timer.replace(handle) {
        previous.abort();
      }
    }
  }

  pub fn current(&self) -> Option<String> {
    self.current.lock().ok().and_then(|c| c.clone())
  }
}
