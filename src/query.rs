//! Debounced search-as-you-type query.
//!
//! Every keystroke goes through [`SearchQuery::input`]. The previous pending
//! request is aborted, the new one waits out the debounce interval, and only
//! the result for the latest input is ever applied.
//!
//! ```ignore
//! let client = brewery_client.clone();
//! let mut search = SearchQuery::new(move |text| {
//!     let client = client.clone();
//!     async move {
//!         client.search(&text).await.map(|r| r.data).map_err(|e| e.to_string())
//!     }
//! });
//!
//! search.input("stone");
//!
//! // In the event loop tick
//! if search.poll() {
//!     render(search.state());
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// The state of a query
#[derive(Debug, Clone, PartialEq)]
pub enum QueryState<T> {
  /// No input, or input cleared
  Idle,
  /// Waiting out the debounce or the response
  Loading,
  Success(T),
  Error(String),
}

impl<T> QueryState<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryState::Loading)
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      QueryState::Success(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&str> {
    match self {
      QueryState::Error(e) => Some(e),
      _ => None,
    }
  }
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T, String>> + Send>>;

type FetcherFn<T> = Box<dyn Fn(String) -> BoxFuture<T> + Send + Sync>;

pub struct SearchQuery<T> {
  state: QueryState<T>,
  text: String,
  fetcher: FetcherFn<T>,
  debounce: Duration,
  receiver: Option<mpsc::UnboundedReceiver<Result<T, String>>>,
  pending: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> SearchQuery<T> {
  pub fn new<F, Fut>(fetcher: F) -> Self
  where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, String>> + Send + 'static,
  {
    Self {
      state: QueryState::Idle,
      text: String::new(),
      fetcher: Box::new(move |text| Box::pin(fetcher(text))),
      debounce: DEFAULT_DEBOUNCE,
      receiver: None,
      pending: None,
    }
  }

  pub fn with_debounce(mut self, debounce: Duration) -> Self {
    self.debounce = debounce;
    self
  }

  pub fn state(&self) -> &QueryState<T> {
    &self.state
  }

  /// Latest input text.
  pub fn text(&self) -> &str {
    &self.text
  }

  /// Replace the input. Aborts whatever was pending for the previous text.
  pub fn input(&mut self, text: &str) {
    self.cancel();
    self.text = text.to_string();

    if text.trim().is_empty() {
      self.state = QueryState::Idle;
      return;
    }

    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    self.state = QueryState::Loading;

    let debounce = self.debounce;
    let future = (self.fetcher)(self.text.clone());
    self.pending = Some(tokio::spawn(async move {
      tokio::time::sleep(debounce).await;
      let result = future.await;
      // Receiver is gone if the input changed meanwhile
      let _ = tx.send(result);
    }));
  }

  /// Apply the result of the latest input if it has arrived.
  ///
  /// Returns `true` if the state changed.
  pub fn poll(&mut self) -> bool {
    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return false,
    };

    match receiver.try_recv() {
      Ok(result) => {
        self.apply(result);
        true
      }
      Err(mpsc::error::TryRecvError::Empty) => false,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        self.state = QueryState::Error("Query was cancelled".to_string());
        self.receiver = None;
        true
      }
    }
  }

  /// Wait for the latest input to settle. No-op when idle.
  pub async fn settle(&mut self) -> &QueryState<T> {
    if let Some(receiver) = &mut self.receiver {
      match receiver.recv().await {
        Some(result) => self.apply(result),
        None => {
          self.state = QueryState::Error("Query was cancelled".to_string());
          self.receiver = None;
        }
      }
    }
    &self.state
  }

  fn apply(&mut self, result: Result<T, String>) {
    self.state = match result {
      Ok(data) => QueryState::Success(data),
      Err(error) => QueryState::Error(error),
    };
    self.receiver = None;
    self.pending = None;
  }

  fn cancel(&mut self) {
    if let Some(handle) = self.pending.take() {
      handle.abort();
    }
    self.receiver = None;
  }
}

impl<T> Drop for SearchQuery<T> {
  fn drop(&mut self) {
    if let Some(handle) = self.pending.take() {
      handle.abort();
    }
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for SearchQuery<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SearchQuery")
      .field("state", &self.state)
      .field("text", &self.text)
      .field("debounce", &self.debounce)
      .finish_non_exhaustive()
  }
}
