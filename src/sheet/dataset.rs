use crate::error::ParseError;

use super::schema::{FieldKey, FieldMap};

pub type Row = Vec<String>;

/// The sheet as loaded: row 0 is the header, the rest are records.
///
/// Every row is as wide as the header. A dataset is replaced wholesale on each
/// load and never edited in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dataset {
  rows: Vec<Row>,
}

impl Dataset {
  pub fn empty() -> Self {
    Self::default()
  }

  /// Parse tab-separated text. Cells are trimmed (which also drops trailing
  /// carriage returns) and blank lines are skipped.
  pub fn parse_tsv(text: &str) -> Result<Self, ParseError> {
    let mut rows: Vec<Row> = text
      .split('\n')
      .filter(|line| !line.trim().is_empty())
      .map(|line| line.split('\t').map(|cell| cell.trim().to_string()).collect())
      .collect();

    let width = match rows.first() {
      Some(header) => header.len(),
      None => return Err(ParseError::EmptyDataset),
    };
    for row in rows.iter_mut().skip(1) {
      row.resize(width, String::new());
    }

    Ok(Self { rows })
  }

  pub fn header(&self) -> &[String] {
    self.rows.first().map(Vec::as_slice).unwrap_or(&[])
  }

  pub fn records(&self) -> &[Row] {
    self.rows.get(1..).unwrap_or(&[])
  }

  /// Find a record by identity. Returns its 1-based row number in the remote
  /// sheet (the header is row 1) along with the row.
  pub fn find_by_identity(&self, fields: &FieldMap, identity: &str) -> Option<(usize, &Row)> {
    if identity.is_empty() {
      return None;
    }
    self
      .records()
      .iter()
      .position(|row| fields.read(row, FieldKey::Identity) == identity)
      .map(|i| (i + 2, &self.records()[i]))
  }
}
