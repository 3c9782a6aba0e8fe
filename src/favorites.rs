//! Favorite breweries, persisted as one JSON array under a fixed key.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::warn;

use crate::brewery::Brewery;
use crate::db::LocalStorage;

pub const FAVORITES_KEY: &str = "BEER_FAVORITES";

pub struct Favorites {
  storage: Arc<LocalStorage>,
  items: Vec<Brewery>,
}

impl Favorites {
  /// Read the stored list. A missing or unreadable value starts empty.
  pub fn load(storage: Arc<LocalStorage>) -> Result<Self> {
    let items = match storage.get(FAVORITES_KEY)? {
      Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
        warn!(error = %e, "Discarding unreadable favorites");
        Vec::new()
      }),
      None => Vec::new(),
    };

    Ok(Self { storage, items })
  }

  pub fn list(&self) -> &[Brewery] {
    &self.items
  }

  pub fn contains(&self, id: &str) -> bool {
    self.items.iter().any(|b| b.id == id)
  }

  /// Remove the brewery if it is a favorite, append it otherwise.
  /// Returns whether it is a favorite afterwards.
  pub fn toggle(&mut self, brewery: &Brewery) -> Result<bool> {
    let added = if self.contains(&brewery.id) {
      self.items.retain(|b| b.id != brewery.id);
      false
    } else {
      self.items.push(brewery.clone());
      true
    };

    self.save()?;
    Ok(added)
  }

  pub fn clear(&mut self) -> Result<()> {
    self.items.clear();
    self.save()
  }

  fn save(&self) -> Result<()> {
    let raw = serde_json::to_string(&self.items)
      .map_err(|e| eyre!("Failed to serialize favorites: {}", e))?;
    self.storage.set(FAVORITES_KEY, &raw)
  }
}
