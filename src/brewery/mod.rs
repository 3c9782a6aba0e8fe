mod client;
mod listing;
mod types;

pub use client::{BreweryClient, DEFAULT_RANDOM_SIZE};
pub use listing::{api_slug, capitalize, filter_by_name, Listing};
pub use types::Brewery;
