use color_eyre::{eyre::eyre, Result};
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::error::ValidationError;
use crate::sheet::{CategoryClass, FieldKey, FieldMap, Row};

/// Values typed into the edit form, keyed by field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormValues {
  values: BTreeMap<FieldKey, String>,
}

impl FormValues {
  pub fn new() -> Self {
    Self::default()
  }

  /// Pre-fill from an existing row.
  pub fn from_row(row: &[String], fields: &FieldMap) -> Self {
    let values = FieldKey::ALL
      .into_iter()
      .filter(|k| *k != FieldKey::Identity)
      .map(|k| (k, fields.read(row, k).to_string()))
      .filter(|(_, v)| !v.is_empty())
      .collect();
    Self { values }
  }

  pub fn get(&self, key: FieldKey) -> &str {
    self.values.get(&key).map(String::as_str).unwrap_or("")
  }

  pub fn set(&mut self, key: FieldKey, value: impl Into<String>) {
    self.values.insert(key, value.into());
  }
}

/// Split one `key=value` assignment such as `name=Dark Magician`, resolving
/// the key to a field.
pub fn parse_assignment(assignment: &str) -> Result<(FieldKey, &str)> {
  let (key, value) = assignment
    .split_once('=')
    .ok_or_else(|| eyre!("Expected key=value, got {:?}", assignment))?;
  let key = FieldKey::from_name(key).ok_or_else(|| eyre!("Unknown field {:?}", key))?;
  Ok((key, value))
}

/// The record currently open for editing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
  /// Row values as loaded
  pub values: Row,
  /// 1-based row in the remote sheet; `None` for a record not stored yet
  pub row_position: Option<usize>,
}

impl Selection {
  pub fn identity<'a>(&'a self, fields: &FieldMap) -> Option<&'a str> {
    Some(fields.read(&self.values, FieldKey::Identity)).filter(|id| !id.is_empty())
  }
}

static LAST_IDENTITY_MILLIS: AtomicI64 = AtomicI64::new(0);

/// A fresh opaque identity: a strictly increasing millisecond stamp plus a
/// random suffix, both base 36. Collisions are not detected.
pub fn new_identity() -> String {
  let now = chrono::Utc::now().timestamp_millis();
  let previous = LAST_IDENTITY_MILLIS
    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
      Some(now.max(last + 1))
    })
    .unwrap_or(now);
  let stamp = now.max(previous + 1);

  let mut rng = rand::rng();
  let suffix: String = (0..6)
    .map(|_| base36_digit(rng.random_range(0..36)))
    .collect();

  format!("card_{}_{}", to_base36(stamp as u64), suffix)
}

fn base36_digit(d: u32) -> char {
  char::from_digit(d, 36).unwrap_or('0')
}

fn to_base36(mut n: u64) -> String {
  if n == 0 {
    return "0".to_string();
  }
  let mut digits = Vec::new();
  while n > 0 {
    digits.push(base36_digit((n % 36) as u32));
    n /= 36;
  }
  digits.iter().rev().collect()
}

/// Lay the form out as a row shaped like the current header.
///
/// Fields the sheet has no column for are skipped, as are fields sharing the
/// identity's column. Monster-only fields are cleared unless the category is a
/// monster.
pub fn build(form: &FormValues, selection: Option<&Selection>, fields: &FieldMap) -> Row {
  let mut row = vec![String::new(); fields.width()];

  let identity = selection
    .and_then(|s| s.identity(fields))
    .map(String::from)
    .unwrap_or_else(new_identity);
  fields.write(&mut row, FieldKey::Identity, identity);
  let identity_column = fields.column(FieldKey::Identity);

  let category = CategoryClass::canonicalize(form.get(FieldKey::Category));
  let is_monster = CategoryClass::classify(&category) == Some(CategoryClass::Monster);

  for key in FieldKey::ALL {
    // The identity owns its column even when another key resolved to it
    if key == FieldKey::Identity
      || (identity_column.is_some() && fields.column(key) == identity_column)
    {
      continue;
    }
    let value = match key {
      FieldKey::Category => category.clone(),
      k if k.is_creature_only() && !is_monster => String::new(),
      k => form.get(k).trim().to_string(),
    };
    fields.write(&mut row, key, value);
  }

  row
}

/// Check the form before anything is sent.
pub fn validate(form: &FormValues) -> Result<(), ValidationError> {
  if form.get(FieldKey::Name).trim().is_empty() {
    return Err(ValidationError::MissingName);
  }

  if CategoryClass::classify(form.get(FieldKey::Category)) != Some(CategoryClass::Monster) {
    return Ok(());
  }

  let level = form.get(FieldKey::Level).trim();
  if !level.is_empty() && level.parse::<i64>().is_err() {
    return Err(ValidationError::InvalidLevel(level.to_string()));
  }

  for (key, label) in [(FieldKey::Attack, "ATK"), (FieldKey::Defense, "DEF")] {
    let value = form.get(key).trim();
    if !value.is_empty() && !is_decimal(value) {
      return Err(ValidationError::InvalidStat {
        field: label,
        value: value.to_string(),
      });
    }
  }

  Ok(())
}

/// Accepts `1500`, `1500.5` and `1500,5`.
fn is_decimal(value: &str) -> bool {
  value
    .replace(',', ".")
    .parse::<f64>()
    .is_ok_and(f64::is_finite)
}
