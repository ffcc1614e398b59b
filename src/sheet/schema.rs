//! Header-driven column resolution.
//!
//! The sheet's columns are identified by their header labels, never by
//! position, so columns may be reordered or renamed between loads.

use std::collections::BTreeMap;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Semantic fields of a card record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldKey {
  Identity,
  Number,
  Edition,
  Year,
  Deck,
  Name,
  Category,
  Type,
  Level,
  Subtype,
  Attribute,
  Attack,
  Defense,
  ScaleType,
  ScaleValue,
  Rarity,
  Quantity,
  Language,
  Price,
  PurchaseDate,
  Notes,
  ImageUrl,
}

impl FieldKey {
  pub const ALL: [FieldKey; 22] = [
    FieldKey::Identity,
    FieldKey::Number,
    FieldKey::Edition,
    FieldKey::Year,
    FieldKey::Deck,
    FieldKey::Name,
    FieldKey::Category,
    FieldKey::Type,
    FieldKey::Level,
    FieldKey::Subtype,
    FieldKey::Attribute,
    FieldKey::Attack,
    FieldKey::Defense,
    FieldKey::ScaleType,
    FieldKey::ScaleValue,
    FieldKey::Rarity,
    FieldKey::Quantity,
    FieldKey::Language,
    FieldKey::Price,
    FieldKey::PurchaseDate,
    FieldKey::Notes,
    FieldKey::ImageUrl,
  ];

  /// Short name used on the command line (`--set name=...`).
  pub fn name(&self) -> &'static str {
    match self {
      FieldKey::Identity => "id",
      FieldKey::Number => "num",
      FieldKey::Edition => "edition",
      FieldKey::Year => "year",
      FieldKey::Deck => "deck",
      FieldKey::Name => "name",
      FieldKey::Category => "category",
      FieldKey::Type => "type",
      FieldKey::Level => "level",
      FieldKey::Subtype => "subtype",
      FieldKey::Attribute => "attribute",
      FieldKey::Attack => "atk",
      FieldKey::Defense => "def",
      FieldKey::ScaleType => "scale_type",
      FieldKey::ScaleValue => "scale",
      FieldKey::Rarity => "rarity",
      FieldKey::Quantity => "quantity",
      FieldKey::Language => "language",
      FieldKey::Price => "price",
      FieldKey::PurchaseDate => "purchase_date",
      FieldKey::Notes => "notes",
      FieldKey::ImageUrl => "image_url",
    }
  }

  pub fn from_name(name: &str) -> Option<Self> {
    let name = name.trim().to_lowercase();
    Self::ALL.into_iter().find(|k| k.name() == name)
  }

  /// Fields that only make sense for monster cards.
  pub fn is_creature_only(&self) -> bool {
    matches!(
      self,
      FieldKey::Level
        | FieldKey::Attack
        | FieldKey::Defense
        | FieldKey::ScaleType
        | FieldKey::ScaleValue
    )
  }
}

/// Header labels recognised for each field, already in normalized form.
pub const DEFAULT_ALIASES: &[(FieldKey, &[&str])] = &[
  (FieldKey::Identity, &["_id", "id", "identity", "uuid"]),
  (FieldKey::Number, &["#", "num", "numero", "number", "no"]),
  (FieldKey::Edition, &["edicion", "edition"]),
  (FieldKey::Year, &["ano", "anio", "year"]),
  (FieldKey::Deck, &["mazo", "deck"]),
  (FieldKey::Name, &["nombre", "name", "carta", "card name"]),
  (FieldKey::Category, &["categoria", "category"]),
  (FieldKey::Type, &["tipo", "type"]),
  (FieldKey::Level, &["nivel", "level", "rango", "rank"]),
  (FieldKey::Subtype, &["subtipo", "subtype"]),
  (FieldKey::Attribute, &["atributo", "attribute"]),
  (FieldKey::Attack, &["atk", "ataque", "attack"]),
  (FieldKey::Defense, &["def", "defensa", "defense"]),
  (
    FieldKey::ScaleType,
    &["tipo escala", "tipo de escala", "scale type"],
  ),
  (
    FieldKey::ScaleValue,
    &["escala", "valor escala", "scale", "scale value"],
  ),
  (FieldKey::Rarity, &["rareza", "rarity"]),
  (FieldKey::Quantity, &["cantidad", "quantity", "qty"]),
  (FieldKey::Language, &["idioma", "language", "lang"]),
  (FieldKey::Price, &["precio", "price"]),
  (
    FieldKey::PurchaseDate,
    &["fecha compra", "fecha de compra", "purchase date", "purchased"],
  ),
  (FieldKey::Notes, &["notas", "notes", "nota"]),
  (
    FieldKey::ImageUrl,
    &["imagenurl", "imagen url", "imagen", "image url", "image"],
  ),
];

/// Aliases shorter than this only ever match a header cell exactly.
/// Otherwise `id` would claim `Idioma` and `no` would claim `Notas`.
const MIN_CONTAINS_LEN: usize = 3;

/// Trim, lowercase and strip diacritics.
pub fn normalize(s: &str) -> String {
  s.trim()
    .nfd()
    .filter(|c| !is_combining_mark(*c))
    .collect::<String>()
    .to_lowercase()
}

/// Semantic field to column position, rebuilt from every loaded header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
  columns: BTreeMap<FieldKey, usize>,
  width: usize,
}

impl FieldMap {
  pub fn resolve(header: &[String]) -> Self {
    Self::resolve_with(header, DEFAULT_ALIASES)
  }

  /// Two passes per key over the header, left to right: exact match against
  /// any alias first, then containment. The first hit wins.
  pub fn resolve_with<S: AsRef<str>>(header: &[S], aliases: &[(FieldKey, &[&str])]) -> Self {
    let cells: Vec<String> = header.iter().map(|c| normalize(c.as_ref())).collect();
    let mut columns = BTreeMap::new();

    for (key, names) in aliases {
      let names: Vec<String> = names.iter().map(|n| normalize(n)).collect();

      let exact = cells
        .iter()
        .position(|cell| names.iter().any(|n| cell == n));

      let found = exact.or_else(|| {
        cells.iter().position(|cell| {
          !cell.is_empty()
            && names
              .iter()
              .any(|n| n.chars().count() >= MIN_CONTAINS_LEN && cell.contains(n.as_str()))
        })
      });

      if let Some(index) = found {
        columns.insert(*key, index);
      }
    }

    // Legacy sheets never labelled their identity column
    if !columns.contains_key(&FieldKey::Identity)
      && cells.first().is_some_and(|first| !first.is_empty())
    {
      columns.insert(FieldKey::Identity, 0);
    }

    Self {
      columns,
      width: header.len(),
    }
  }

  pub fn column(&self, key: FieldKey) -> Option<usize> {
    self.columns.get(&key).copied()
  }

  pub fn has(&self, key: FieldKey) -> bool {
    self.columns.contains_key(&key)
  }

  /// Header width the map was built from.
  pub fn width(&self) -> usize {
    self.width
  }

  /// Value of `key` in `row`; empty when the column is absent.
  pub fn read<'a>(&self, row: &'a [String], key: FieldKey) -> &'a str {
    self
      .column(key)
      .and_then(|i| row.get(i))
      .map(String::as_str)
      .unwrap_or("")
  }

  /// Write `value` into `row`. Returns false (and does nothing) when the sheet
  /// has no column for `key`.
  pub fn write(&self, row: &mut [String], key: FieldKey, value: impl Into<String>) -> bool {
    match self.column(key).and_then(|i| row.get_mut(i)) {
      Some(cell) => {
        *cell = value.into();
        true
      }
      None => false,
    }
  }

  /// Fields the current header does not provide.
  pub fn missing(&self) -> Vec<FieldKey> {
    FieldKey::ALL
      .into_iter()
      .filter(|k| !self.columns.contains_key(k))
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn header(cells: &[&str]) -> Vec<String> {
    cells.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn test_normalize_strips_case_and_accents() {
    assert_eq!(normalize("  Categoría "), "categoria");
    assert_eq!(normalize("AÑO"), "ano");
    assert_eq!(normalize("Edición"), "edicion");
  }

  #[test]
  fn test_resolves_accented_spanish_header() {
    let h = header(&[
      "_id", "#", "Edición", "Año", "Mazo", "Nombre", "Categoría", "Tipo", "Subtipo", "Atributo",
      "Rareza", "Cantidad", "Idioma", "Precio", "Fecha compra", "Notas", "ImagenURL",
    ]);
    let map = FieldMap::resolve(&h);

    assert_eq!(map.column(FieldKey::Identity), Some(0));
    assert_eq!(map.column(FieldKey::Number), Some(1));
    assert_eq!(map.column(FieldKey::Year), Some(3));
    assert_eq!(map.column(FieldKey::Name), Some(5));
    assert_eq!(map.column(FieldKey::Category), Some(6));
    assert_eq!(map.column(FieldKey::Type), Some(7));
    assert_eq!(map.column(FieldKey::Subtype), Some(8));
    assert_eq!(map.column(FieldKey::Language), Some(12));
    assert_eq!(map.column(FieldKey::PurchaseDate), Some(14));
    assert_eq!(map.column(FieldKey::Notes), Some(15));
    assert_eq!(map.column(FieldKey::ImageUrl), Some(16));
    assert_eq!(map.column(FieldKey::Level), None);
    assert_eq!(map.width(), 17);
  }

  #[test]
  fn test_exact_match_beats_earlier_containment() {
    // "Tipo escala" contains "tipo" but the exact "Tipo" column wins
    let map = FieldMap::resolve(&header(&["_id", "Tipo escala", "Tipo"]));
    assert_eq!(map.column(FieldKey::Type), Some(2));
    assert_eq!(map.column(FieldKey::ScaleType), Some(1));
  }

  #[test]
  fn test_containment_pass_finds_decorated_labels() {
    let map = FieldMap::resolve(&header(&["_id", "Nombre de la carta", "Precio (EUR)"]));
    assert_eq!(map.column(FieldKey::Name), Some(1));
    assert_eq!(map.column(FieldKey::Price), Some(2));
  }

  #[test]
  fn test_short_aliases_do_not_match_by_containment() {
    let map = FieldMap::resolve(&header(&["", "Idioma", "Notas"]));
    assert_eq!(map.column(FieldKey::Identity), None);
    assert_eq!(map.column(FieldKey::Number), None);
    assert_eq!(map.column(FieldKey::Language), Some(1));
  }

  #[test]
  fn test_unlabelled_identity_defaults_to_first_column() {
    let map = FieldMap::resolve(&header(&["key", "Nombre"]));
    assert_eq!(map.column(FieldKey::Identity), Some(0));
  }

  #[test]
  fn test_resolution_is_idempotent() {
    let h = header(&["_id", "Name", "Category"]);
    assert_eq!(FieldMap::resolve(&h), FieldMap::resolve(&h));
  }

  #[test]
  fn test_permutation_invariance() {
    let labels = ["_id", "Nombre", "Categoría", "Rareza", "Precio", "Notas"];
    let original = header(&labels);
    let original_map = FieldMap::resolve(&original);

    let mut permuted: Vec<&str> = labels.to_vec();
    permuted.reverse();
    permuted.swap(0, 2);
    let permuted = header(&permuted);
    let permuted_map = FieldMap::resolve(&permuted);

    for key in FieldKey::ALL {
      let a = original_map.column(key).map(|i| normalize(&original[i]));
      let b = permuted_map.column(key).map(|i| normalize(&permuted[i]));
      assert_eq!(a, b, "field {:?} moved to a different label", key);
    }
  }

  #[test]
  fn test_absent_fields_read_empty_and_ignore_writes() {
    let map = FieldMap::resolve(&header(&["_id", "Nombre"]));
    let mut row = vec!["x".to_string(), "Kuriboh".to_string()];

    assert_eq!(map.read(&row, FieldKey::Name), "Kuriboh");
    assert_eq!(map.read(&row, FieldKey::Price), "");
    assert!(!map.write(&mut row, FieldKey::Price, "3.50"));
    assert_eq!(row, vec!["x".to_string(), "Kuriboh".to_string()]);
    assert!(map.missing().contains(&FieldKey::Price));
  }
}
