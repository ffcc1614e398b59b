//! Per-column suggestion lists for form inputs.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use super::dataset::Dataset;
use super::schema::{FieldKey, FieldMap};

const RARITIES: &[&str] = &[
  "Common",
  "Rare",
  "Super Rare",
  "Ultra Rare",
  "Secret Rare",
  "Ultimate Rare",
  "Collector's Rare",
  "Ghost Rare",
  "Starlight Rare",
  "Quarter Century Secret Rare",
];

const SUBTYPES: &[&str] = &[
  // monsters
  "Normal",
  "Effect",
  "Fusion",
  "Synchro",
  "Xyz",
  "Link",
  "Ritual",
  "Pendulum",
  "Tuner",
  // spells and traps
  "Normal Spell",
  "Continuous Spell",
  "Quick-Play Spell",
  "Field Spell",
  "Ritual Spell",
  "Normal Trap",
  "Continuous Trap",
  "Counter Trap",
];

/// Columns that get suggestions, with values offered even on an empty sheet.
const SUGGESTED: &[(FieldKey, &[&str])] = &[
  (FieldKey::Edition, &["1st", "Unlimited", "Limited"]),
  (FieldKey::Year, &[]),
  (FieldKey::Deck, &[]),
  (FieldKey::Category, &["Monster", "Spell", "Trap"]),
  (FieldKey::Type, &[]),
  (FieldKey::Subtype, SUBTYPES),
  (
    FieldKey::Attribute,
    &["Light", "Dark", "Fire", "Water", "Earth", "Wind", "Divine"],
  ),
  (FieldKey::Rarity, RARITIES),
  (FieldKey::Language, &["EN", "ES", "JP", "DE", "FR", "IT", "PT"]),
];

/// Known values per column, rebuilt whenever a dataset is adopted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Suggestions {
  lists: BTreeMap<FieldKey, Vec<String>>,
}

impl Suggestions {
  pub fn hydrate(dataset: &Dataset, fields: &FieldMap) -> Self {
    let mut lists = BTreeMap::new();

    for (key, defaults) in SUGGESTED {
      let mut seen = HashSet::new();
      let mut from_sheet: Vec<String> = dataset
        .records()
        .iter()
        .map(|row| fields.read(row, *key).trim())
        .filter(|v| !v.is_empty() && seen.insert(v.to_lowercase()))
        .map(String::from)
        .collect();
      from_sheet.sort_by(|a, b| natural_cmp(a, b));

      let extra: Vec<String> = defaults
        .iter()
        .filter(|v| seen.insert(v.to_lowercase()))
        .map(|v| v.to_string())
        .collect();
      from_sheet.extend(extra);

      lists.insert(*key, from_sheet);
    }

    Self { lists }
  }

  pub fn get(&self, key: FieldKey) -> &[String] {
    self.lists.get(&key).map(Vec::as_slice).unwrap_or(&[])
  }
}

/// Case-insensitive ordering that compares digit runs by value, so "Deck 2"
/// sorts before "Deck 10".
fn natural_cmp(a: &str, b: &str) -> Ordering {
  let a = a.to_lowercase();
  let b = b.to_lowercase();
  let mut ai = a.chars().peekable();
  let mut bi = b.chars().peekable();

  loop {
    match (ai.peek().copied(), bi.peek().copied()) {
      (None, None) => return Ordering::Equal,
      (None, Some(_)) => return Ordering::Less,
      (Some(_), None) => return Ordering::Greater,
      (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
        let mut xs = String::new();
        while let Some(c) = ai.peek().copied().filter(char::is_ascii_digit) {
          xs.push(c);
          ai.next();
        }
        let mut ys = String::new();
        while let Some(c) = bi.peek().copied().filter(char::is_ascii_digit) {
          ys.push(c);
          bi.next();
        }
        let xs = xs.trim_start_matches('0');
        let ys = ys.trim_start_matches('0');
        let ord = xs.len().cmp(&ys.len()).then_with(|| xs.cmp(ys));
        if ord != Ordering::Equal {
          return ord;
        }
      }
      (Some(x), Some(y)) => {
        if x != y {
          return x.cmp(&y);
        }
        ai.next();
        bi.next();
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_natural_order() {
    let mut values = vec!["Deck 10", "deck 2", "Deck 1", "alpha"];
    values.sort_by(|a, b| natural_cmp(a, b));
    assert_eq!(values, ["alpha", "Deck 1", "deck 2", "Deck 10"]);
  }

  #[test]
  fn test_sheet_values_come_first_then_missing_defaults() {
    let dataset = Dataset::parse_tsv(
      "_id\tCategoría\tIdioma\tMazo\n\
       1\tmonster\tES\tStarter 10\n\
       2\tMONSTER\tKR\tStarter 2\n\
       3\t\tes\t\n",
    )
    .unwrap();
    let fields = FieldMap::resolve(dataset.header());
    let suggestions = Suggestions::hydrate(&dataset, &fields);

    assert_eq!(suggestions.get(FieldKey::Category), ["monster", "Spell", "Trap"]);
    assert_eq!(
      suggestions.get(FieldKey::Language),
      ["ES", "KR", "EN", "JP", "DE", "FR", "IT", "PT"]
    );
    assert_eq!(suggestions.get(FieldKey::Deck), ["Starter 2", "Starter 10"]);
  }

  #[test]
  fn test_absent_columns_still_offer_defaults() {
    let dataset = Dataset::parse_tsv("_id\tNombre").unwrap();
    let fields = FieldMap::resolve(dataset.header());
    let suggestions = Suggestions::hydrate(&dataset, &fields);
    assert_eq!(suggestions.get(FieldKey::Rarity).len(), RARITIES.len());
    assert!(suggestions.get(FieldKey::Year).is_empty());
    assert!(suggestions.get(FieldKey::Notes).is_empty());
  }
}
