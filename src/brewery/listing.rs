//! Paging, sorting and filtering state for brewery lists.

use std::fmt;

use super::client::ListParams;
use super::types::{Brewery, Meta};

pub const DEFAULT_PER_PAGE: u32 = 9;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
  #[default]
  Asc,
  Desc,
}

impl SortOrder {
  pub fn toggled(self) -> Self {
    match self {
      SortOrder::Asc => SortOrder::Desc,
      SortOrder::Desc => SortOrder::Asc,
    }
  }
}

impl fmt::Display for SortOrder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SortOrder::Asc => write!(f, "asc"),
      SortOrder::Desc => write!(f, "desc"),
    }
  }
}

/// Current page and sort of the paged brewery list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
  page: u32,
  per_page: u32,
  sort: SortOrder,
}

impl Default for Listing {
  fn default() -> Self {
    Self {
      page: 1,
      per_page: DEFAULT_PER_PAGE,
      sort: SortOrder::Asc,
    }
  }
}

impl Listing {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn page(&self) -> u32 {
    self.page
  }

  pub fn per_page(&self) -> u32 {
    self.per_page
  }

  pub fn sort(&self) -> SortOrder {
    self.sort
  }

  /// Jump to a page; pages are 1-based.
  pub fn set_page(&mut self, page: u32) {
    self.page = page.max(1);
  }

  pub fn toggle_sort(&mut self) {
    self.sort = self.sort.toggled();
  }

  /// Parameters for the next `breweries/` request
  pub fn params(&self) -> ListParams {
    ListParams {
      page: Some(self.page),
      per_page: Some(self.per_page),
      sort: Some(format!("type,name:{}", self.sort)),
    }
  }

  /// Page count for the pager. Rounds to nearest, so a short last page
  /// under half a page is not counted.
  pub fn total_pages(&self, meta: &Meta) -> u64 {
    (meta.total as f64 / self.per_page as f64).round() as u64
  }
}

/// Case-insensitive substring match on brewery names.
pub fn filter_by_name<'a>(breweries: &'a [Brewery], query: &str) -> Vec<&'a Brewery> {
  let needle = query.to_lowercase();
  breweries
    .iter()
    .filter(|b| b.name.to_lowercase().contains(&needle))
    .collect()
}

/// API spelling of a free-text value, e.g. "New York" -> "new_york".
pub fn api_slug(value: &str) -> String {
  value.to_lowercase().replace(' ', "_")
}

/// First letter upper, rest lower: "micro" -> "Micro".
pub fn capitalize(value: &str) -> String {
  let mut chars = value.chars();
  match chars.next() {
    Some(first) => format!("{}{}", first.to_uppercase(), chars.as_str().to_lowercase()),
    None => String::new(),
  }
}
