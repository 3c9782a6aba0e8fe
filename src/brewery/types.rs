//! Brewery API records.
//!
//! The API is loose about number encoding (coordinates and meta counts come
//! back as numbers or numeric strings), so those fields go through lenient
//! deserializers.

use serde::{Deserialize, Deserializer, Serialize};

/// A single brewery as returned by the list, detail and search endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Brewery {
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub brewery_type: Option<String>,
  #[serde(default)]
  pub address_1: Option<String>,
  #[serde(default)]
  pub address_2: Option<String>,
  #[serde(default)]
  pub address_3: Option<String>,
  #[serde(default)]
  pub city: Option<String>,
  #[serde(default)]
  pub state_province: Option<String>,
  #[serde(default)]
  pub postal_code: Option<String>,
  #[serde(default)]
  pub country: Option<String>,
  #[serde(default, deserialize_with = "lenient_string")]
  pub longitude: Option<String>,
  #[serde(default, deserialize_with = "lenient_string")]
  pub latitude: Option<String>,
  #[serde(default)]
  pub phone: Option<String>,
  #[serde(default)]
  pub website_url: Option<String>,
  #[serde(default)]
  pub state: Option<String>,
  #[serde(default)]
  pub street: Option<String>,
}

impl Brewery {
  /// Phone number with spaces, `+`, `-` and parentheses stripped.
  pub fn dialable_phone(&self) -> Option<String> {
    self.phone.as_deref().map(|phone| {
      phone
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '+' | '-' | '(' | ')'))
        .collect()
    })
  }

  /// One-line location, e.g. "Denver, Colorado, United States".
  pub fn location(&self) -> String {
    [&self.city, &self.state_province, &self.country]
      .iter()
      .filter_map(|part| part.as_deref())
      .filter(|part| !part.is_empty())
      .collect::<Vec<_>>()
      .join(", ")
  }
}

/// Result of `breweries/meta`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
  #[serde(deserialize_with = "lenient_u64")]
  pub total: u64,
  #[serde(deserialize_with = "lenient_u64")]
  pub page: u64,
  #[serde(deserialize_with = "lenient_u64")]
  pub per_page: u64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
  Number(serde_json::Number),
  String(String),
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
  D: Deserializer<'de>,
{
  let value: Option<NumberOrString> = Option::deserialize(deserializer)?;
  Ok(value.map(|v| match v {
    NumberOrString::Number(n) => n.to_string(),
    NumberOrString::String(s) => s,
  }))
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
  D: Deserializer<'de>,
{
  match NumberOrString::deserialize(deserializer)? {
    NumberOrString::Number(n) => n
      .as_u64()
      .ok_or_else(|| serde::de::Error::custom(format!("expected unsigned integer, got {}", n))),
    NumberOrString::String(s) => s
      .trim()
      .parse()
      .map_err(|e| serde::de::Error::custom(format!("invalid count '{}': {}", s, e))),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_brewery_accepts_numeric_coordinates() {
    let json = r#"{
      "id": "b54b16e1-ac3b-4bff-a11f-f7ae9ddc27e0",
      "name": "MadTree Brewing 2.0",
      "brewery_type": "regional",
      "city": "Cincinnati",
      "state_province": "Ohio",
      "country": "United States",
      "longitude": -84.4137736,
      "latitude": "39.1885752",
      "phone": "(513) 836-8733",
      "website_url": null
    }"#;

    let brewery: Brewery = serde_json::from_str(json).unwrap();

    assert_eq!(brewery.longitude.as_deref(), Some("-84.4137736"));
    assert_eq!(brewery.latitude.as_deref(), Some("39.1885752"));
    assert_eq!(brewery.website_url, None);
    assert_eq!(brewery.address_1, None);
    assert_eq!(brewery.location(), "Cincinnati, Ohio, United States");
    assert_eq!(brewery.dialable_phone().as_deref(), Some("5138368733"));
  }

  #[test]
  fn test_meta_accepts_strings_and_numbers() {
    let strings: Meta =
      serde_json::from_str(r#"{"total":"8355","page":"1","per_page":"50"}"#).unwrap();
    let numbers: Meta = serde_json::from_str(r#"{"total":8355,"page":1,"per_page":50}"#).unwrap();

    assert_eq!(strings, numbers);
    assert_eq!(strings.total, 8355);
  }

  #[test]
  fn test_meta_rejects_garbage() {
    assert!(serde_json::from_str::<Meta>(r#"{"total":"lots","page":1,"per_page":1}"#).is_err());
  }
}
