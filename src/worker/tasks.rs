//! Work that outlives the request that started it.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use tokio::task::JoinSet;
use tracing::warn;

/// Tracks background work such as cache revalidation so the host can wait for
/// it before shutting down.
#[derive(Default)]
pub struct BackgroundTasks {
  set: Mutex<JoinSet<()>>,
}

impl BackgroundTasks {
  pub fn new() -> Self {
    Self::default()
  }

  /// Spawn `task` onto the current runtime, first reaping finished tasks so
  /// a long-running host does not accumulate them.
  pub fn spawn<F>(&self, task: F)
  where
    F: Future<Output = ()> + Send + 'static,
  {
    let mut set = self.set.lock().unwrap_or_else(PoisonError::into_inner);
    while let Some(result) = set.try_join_next() {
      if let Err(e) = result {
        warn!(error = %e, "Background task did not complete");
      }
    }
    set.spawn(task);
  }

  /// Number of tasks spawned and not yet reaped.
  #[cfg(test)]
  pub fn len(&self) -> usize {
    self.set.lock().unwrap_or_else(PoisonError::into_inner).len()
  }

  /// Wait for every task, including ones spawned while waiting.
  pub async fn wait_idle(&self) {
    loop {
      // Never hold the lock across an await
      let mut set = std::mem::take(&mut *self.set.lock().unwrap_or_else(PoisonError::into_inner));
      if set.is_empty() {
        return;
      }

      while let Some(result) = set.join_next().await {
        if let Err(e) = result {
          warn!(error = %e, "Background task did not complete");
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Arc;
  use std::time::Duration;

  #[tokio::test]
  async fn test_wait_idle_runs_everything() {
    let tasks = BackgroundTasks::new();
    let counter = Arc::new(AtomicU32::new(0));

    for _ in 0..3 {
      let counter = Arc::clone(&counter);
      tasks.spawn(async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        counter.fetch_add(1, Ordering::SeqCst);
      });
    }
    assert_eq!(tasks.len(), 3);

    tasks.wait_idle().await;

    assert_eq!(counter.load(Ordering::SeqCst), 3);
    assert_eq!(tasks.len(), 0);
  }

  #[tokio::test]
  async fn test_spawn_reaps_finished_tasks() {
    let tasks = BackgroundTasks::new();
    for _ in 0..3 {
      tasks.spawn(async {});
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    tasks.spawn(tokio::time::sleep(Duration::from_secs(60)));

    assert_eq!(tasks.len(), 1);
  }

  #[tokio::test]
  async fn test_wait_idle_with_nothing_pending() {
    let tasks = BackgroundTasks::new();
    tasks.wait_idle().await;
    assert_eq!(tasks.len(), 0);
  }
}
