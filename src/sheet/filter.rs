//! Category filter and free-text search over a loaded dataset.

use super::dataset::{Dataset, Row};
use super::schema::{normalize, FieldKey, FieldMap};

/// The three card classes. Category cells are matched against a small
/// multi-locale synonym table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryClass {
  Monster,
  Spell,
  Trap,
}

impl CategoryClass {
  pub const ALL: [CategoryClass; 3] = [
    CategoryClass::Monster,
    CategoryClass::Spell,
    CategoryClass::Trap,
  ];

  fn synonyms(&self) -> &'static [&'static str] {
    match self {
      CategoryClass::Monster => &["monster", "monsters", "monstruo", "monstruos"],
      CategoryClass::Spell => &["spell", "spells", "magia", "magias", "hechizo", "hechizos"],
      CategoryClass::Trap => &["trap", "traps", "trampa", "trampas"],
    }
  }

  /// Canonical label written back to the sheet.
  pub fn label(&self) -> &'static str {
    match self {
      CategoryClass::Monster => "Monster",
      CategoryClass::Spell => "Spell",
      CategoryClass::Trap => "Trap",
    }
  }

  pub fn classify(value: &str) -> Option<Self> {
    let value = normalize(value);
    if value.is_empty() {
      return None;
    }
    Self::ALL
      .into_iter()
      .find(|class| class.synonyms().contains(&value.as_str()))
  }

  /// Canonical label when recognised, otherwise the trimmed input.
  pub fn canonicalize(value: &str) -> String {
    match Self::classify(value) {
      Some(class) => class.label().to_string(),
      None => value.trim().to_string(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CategoryFilter {
  #[default]
  All,
  Only(CategoryClass),
}

impl CategoryFilter {
  /// Unknown or empty values mean no filtering.
  pub fn parse(value: &str) -> Self {
    match CategoryClass::classify(value) {
      Some(class) => CategoryFilter::Only(class),
      None => CategoryFilter::All,
    }
  }

  pub fn admits(&self, category_cell: &str) -> bool {
    match self {
      CategoryFilter::All => true,
      CategoryFilter::Only(class) => CategoryClass::classify(category_cell) == Some(*class),
    }
  }
}

/// Records passing both the category filter and the search query, in their
/// original order.
///
/// Cheap enough to run on every settled query; callers debounce keystrokes.
pub fn view<'a>(
  dataset: &'a Dataset,
  fields: &FieldMap,
  filter: CategoryFilter,
  query: &str,
) -> Vec<&'a Row> {
  let query = query.trim().to_lowercase();

  dataset
    .records()
    .iter()
    .filter(|row| filter.admits(fields.read(row, FieldKey::Category)))
    .filter(|row| {
      query.is_empty()
        || row
          .iter()
          .any(|cell| cell.to_lowercase().contains(query.as_str()))
    })
    .collect()
}
